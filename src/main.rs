#![forbid(unsafe_code)]

use structopt::StructOpt;

use ichor::cli::{demo_env, run_script, try_read_kernel_options, Opt};

fn main() {
    let opt = Opt::from_args();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut options = try_read_kernel_options();
    if opt.max_depth != 256 {
        options.max_depth = opt.max_depth;
    }

    if opt.files.is_empty() {
        let _env = demo_env();
        println!("ichor: no script files given; built the demonstration environment (Int/int_add/int_mul).");
        println!("pass one or more script files to check your own declarations.");
        return;
    }

    let mut total_checked = 0usize;
    for path in &opt.files {
        let source = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("ichor: could not read {}: {}", path.display(), e);
                std::process::exit(1);
            }
        };
        let env = demo_env();
        match run_script(&source, &env, &options, opt.verbose) {
            Ok(n) => {
                total_checked += n;
                println!("{}: {} declaration(s) checked ok", path.display(), n);
            }
            Err(e) => {
                eprintln!("{}: {}", path.display(), e);
                std::process::exit(1);
            }
        }
    }

    println!("\nichor: checked {} declaration(s) across {} file(s), all passed.", total_checked, opt.files.len());
}
