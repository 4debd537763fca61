//! CLI option parsing and script driver: a demonstration harness around the
//! kernel, not a surface parser/elaborator. `Opt` derives `StructOpt` for the
//! command-line flags, plus a hand-rolled flat-text options reader for
//! settings better left out of argv.

use std::path::PathBuf;

use structopt::StructOpt;

use crate::env::Env;
use crate::errors::KernelErr;
use crate::name::Name;
use crate::parser::{parse_script, Command};

#[derive(StructOpt, Debug)]
#[structopt(name = "ichor", about = "Kernel driver for a dependently-typed proof assistant")]
pub struct Opt {
    /// Script file(s) to load and check, in order.
    #[structopt(name = "FILE", parse(from_os_str))]
    pub files: Vec<PathBuf>,

    /// Print a line for every successfully checked command.
    #[structopt(short = "v", long = "verbose")]
    pub verbose: bool,

    /// Unification recursion depth budget (overridden by `kernel_options.txt`
    /// if present).
    #[structopt(long = "max-depth", default_value = "256")]
    pub max_depth: u32,
}

/// Kernel-tunable parameters read from an optional flat `key = value` text
/// file in the working directory.
#[derive(Debug, Clone)]
pub struct KernelOptions {
    pub max_depth: u32,
    pub install_int_builtins: bool,
}

impl Default for KernelOptions {
    fn default() -> Self {
        KernelOptions { max_depth: 256, install_int_builtins: true }
    }
}

pub fn try_read_kernel_options() -> KernelOptions {
    let mut opts = KernelOptions::default();
    let Ok(cwd) = std::env::current_dir() else { return opts };
    let path = cwd.join("kernel_options.txt");
    let Ok(contents) = std::fs::read_to_string(path) else { return opts };
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else { continue };
        let (key, value) = (key.trim(), value.trim());
        match key {
            "max_depth" => {
                if let Ok(n) = value.parse() {
                    opts.max_depth = n;
                }
            }
            "install_int_builtins" => opts.install_int_builtins = value == "true",
            _ => {}
        }
    }
    opts
}

/// Runs every command in `source` against a fresh `Env`, in declaration
/// order, returning the number successfully checked. Stops at the first
/// error; there's no automatic retry.
pub fn run_script(source: &str, env: &Env, opts: &KernelOptions, verbose: bool) -> Result<usize, KernelErr> {
    let commands = parse_script(source).map_err(|e| KernelErr::Bug("parser.rs", line!(), e.to_string()))?;
    let mut checked = 0;
    for command in commands {
        run_command(command, env, opts)?;
        checked += 1;
        if verbose {
            println!("ok ({} / {})", checked, checked);
        }
    }
    Ok(checked)
}

fn run_command(command: Command, env: &Env, opts: &KernelOptions) -> Result<(), KernelErr> {
    match command {
        Command::Universe { name, bounds } => {
            let bounds = bounds.into_iter().map(|(base, offset)| (Name::from(base.as_str()), offset)).collect();
            env.define_uvar(Name::from(name.as_str()), bounds)
        }
        Command::Axiom { name, ty } => env.add_var(Name::from(name.as_str()), vec![], ty),
        Command::Def { name, ty, value, opaque } => {
            env.add_definition(Name::from(name.as_str()), vec![], ty, value, opaque)
        }
        Command::Check { expr, ty } => crate::tc::check(&expr, &ty, env, None, &[]),
        Command::Eval { expr } => {
            let reduced = crate::normalize::normalize(&expr, env, None)?;
            println!("{:?}", reduced);
            Ok(())
        }
        Command::Unify { lhs, rhs } => {
            let menv = crate::metavar::MEnv::new_menv(env.clone(), None, opts.max_depth);
            crate::unify::unify(&lhs, &rhs, env, &menv)
        }
    }
}

/// Builds the demonstration environment used when no script files are given
/// on the command line: installs the `Int`/`int_add`/`int_mul` builtins so
/// `ichor` is useful to poke at interactively even without a script.
pub fn demo_env() -> Env {
    let env = Env::new();
    crate::value::install_int_builtins(&env).expect("demo environment is well-formed");
    env
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_a_small_script_end_to_end() {
        let env = Env::new();
        let opts = KernelOptions::default();
        let script = "universe u\naxiom A : Sort u\ndef id : Pi (x : A) => A := fun (x : A) => x\ncheck id : Pi (x : A) => A\n";
        let n = run_script(script, &env, &opts, false).unwrap();
        assert_eq!(n, 4);
    }

    #[test]
    fn stops_at_first_error() {
        let env = Env::new();
        let opts = KernelOptions::default();
        let script = "axiom A : Sort 0\naxiom A : Sort 0\naxiom B : Sort 0\n";
        let res = run_script(script, &env, &opts, false);
        assert!(matches!(res, Err(KernelErr::AlreadyDeclared(_))));
    }
}
