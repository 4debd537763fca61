//! A tiny line-oriented script reader for the CLI driver. The real surface
//! parser for an elaborator front-end is an external collaborator, out of
//! scope for the kernel; this one just reads the small term grammar below so
//! the CLI has something to drive the kernel with.
//!
//! Grammar (one command per non-blank, non-`#`-comment line):
//!
//! ```text
//! universe u
//! universe w >= u + 1
//! universe w >= u + 1, v + 2
//! axiom name : <expr>
//! def name : <expr> := <expr>
//! opaque name : <expr> := <expr>
//! check <expr> : <expr>
//! eval <expr>
//! unify <expr> =?= <expr>
//! ```
//!
//! Expressions: `Sort <level>`, `fun (x : A) => body`, `Pi (x : A) => body`,
//! `Sigma (x : A) => body`, application by juxtaposition (left-associative),
//! parenthesized groups, and bare identifiers resolved against the
//! in-progress binder stack first, falling back to an environment constant
//! reference. Levels: `0`, a bare name (a universe parameter), `succ <l>`,
//! `max <l> <l>`, `imax <l> <l>`, and parens.

use crate::expr::{mk_lambda, mk_pi, mk_sigma, mk_sort, mk_var, Expr};
use crate::level::{mk_imax, mk_max, mk_succ, mk_zero, Level};
use crate::name::Name;

pub type ParseResult<T> = Result<T, ParseErr>;

#[derive(Debug, Clone)]
pub enum ParseErr {
    Exhausted(usize),
    UnexpectedToken(usize, String),
    Malformed(usize, String),
}

impl std::fmt::Display for ParseErr {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ParseErr::Exhausted(line) => write!(f, "line {}: unexpected end of input", line),
            ParseErr::UnexpectedToken(line, t) => write!(f, "line {}: unexpected token {:?}", line, t),
            ParseErr::Malformed(line, msg) => write!(f, "line {}: {}", line, msg),
        }
    }
}
impl std::error::Error for ParseErr {}

/// One parsed top-level command, ready for `cli::run_script` to act on.
#[derive(Debug, Clone)]
pub enum Command {
    Universe { name: String, bounds: Vec<(String, i32)> },
    Axiom { name: String, ty: Expr },
    Def { name: String, ty: Expr, value: Expr, opaque: bool },
    Check { expr: Expr, ty: Expr },
    Eval { expr: Expr },
    Unify { lhs: Expr, rhs: Expr },
}

struct Tokens<'s> {
    toks: Vec<&'s str>,
    pos: usize,
    line: usize,
}

impl<'s> Tokens<'s> {
    fn new(line_text: &'s str, line: usize) -> Self {
        Tokens { toks: tokenize(line_text), pos: 0, line }
    }

    fn peek(&self) -> Option<&'s str> {
        self.toks.get(self.pos).copied()
    }

    fn next(&mut self) -> ParseResult<&'s str> {
        let t = self.toks.get(self.pos).copied().ok_or(ParseErr::Exhausted(self.line))?;
        self.pos += 1;
        Ok(t)
    }

    fn expect(&mut self, s: &str) -> ParseResult<()> {
        let t = self.next()?;
        if t == s {
            Ok(())
        } else {
            Err(ParseErr::UnexpectedToken(self.line, t.to_string()))
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.toks.len()
    }
}

/// Splits `(`, `)`, `,`, `:`, `:=`, `=>` out as their own tokens; everything
/// else is whitespace-delimited.
fn tokenize(line: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let bytes = line.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '(' || c == ')' || c == ',' {
            out.push(&line[i..i + 1]);
            i += 1;
            continue;
        }
        if c == ':' {
            if bytes.get(i + 1) == Some(&b'=') {
                out.push(&line[i..i + 2]);
                i += 2;
            } else {
                out.push(&line[i..i + 1]);
                i += 1;
            }
            continue;
        }
        if c == '=' && bytes.get(i + 1) == Some(&b'>') {
            out.push(&line[i..i + 2]);
            i += 2;
            continue;
        }
        let start = i;
        while i < bytes.len() {
            let c = bytes[i] as char;
            if c.is_whitespace() || c == '(' || c == ')' || c == ',' || c == ':' || (c == '=' && bytes.get(i + 1) == Some(&b'>')) {
                break;
            }
            i += 1;
        }
        out.push(&line[start..i]);
    }
    out
}

/// Parses an entire script (one command per meaningful line) against the
/// binder-free top-level scope; `eval`/`check`/`def`/`axiom` right-hand
/// sides may use binders internally but a command itself always starts
/// closed.
pub fn parse_script(source: &str) -> ParseResult<Vec<Command>> {
    let mut commands = Vec::new();
    for (idx, raw_line) in source.lines().enumerate() {
        let line_no = idx + 1;
        let trimmed = raw_line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let mut toks = Tokens::new(trimmed, line_no);
        commands.push(parse_command(&mut toks)?);
    }
    Ok(commands)
}

fn parse_command(toks: &mut Tokens) -> ParseResult<Command> {
    let kw = toks.next()?;
    match kw {
        "universe" => {
            let name = toks.next()?.to_string();
            let mut bounds = Vec::new();
            if !toks.at_end() {
                toks.expect(">=")?;
                loop {
                    let base = toks.next()?.to_string();
                    let offset = if toks.peek() == Some("+") {
                        toks.next()?;
                        toks.next()?.parse::<i32>().map_err(|e| ParseErr::Malformed(toks.line, e.to_string()))?
                    } else {
                        0
                    };
                    bounds.push((base, offset));
                    if toks.peek() == Some(",") {
                        toks.next()?;
                        continue;
                    }
                    break;
                }
            }
            Ok(Command::Universe { name, bounds })
        }
        "axiom" => {
            let name = toks.next()?.to_string();
            toks.expect(":")?;
            let mut scope = Vec::new();
            let ty = parse_expr(toks, &mut scope)?;
            Ok(Command::Axiom { name, ty })
        }
        "def" | "opaque" => {
            let opaque = kw == "opaque";
            let name = toks.next()?.to_string();
            toks.expect(":")?;
            let mut scope = Vec::new();
            let ty = parse_expr(toks, &mut scope)?;
            toks.expect(":=")?;
            let mut scope2 = Vec::new();
            let value = parse_expr(toks, &mut scope2)?;
            Ok(Command::Def { name, ty, value, opaque })
        }
        "check" => {
            let mut scope = Vec::new();
            let expr = parse_expr(toks, &mut scope)?;
            toks.expect(":")?;
            let mut scope2 = Vec::new();
            let ty = parse_expr(toks, &mut scope2)?;
            Ok(Command::Check { expr, ty })
        }
        "eval" => {
            let mut scope = Vec::new();
            let expr = parse_expr(toks, &mut scope)?;
            Ok(Command::Eval { expr })
        }
        "unify" => {
            let mut scope = Vec::new();
            let lhs = parse_expr(toks, &mut scope)?;
            toks.expect("=?=")?;
            let mut scope2 = Vec::new();
            let rhs = parse_expr(toks, &mut scope2)?;
            Ok(Command::Unify { lhs, rhs })
        }
        other => Err(ParseErr::UnexpectedToken(toks.line, other.to_string())),
    }
}

/// `scope` holds bound-variable names innermost-last, the same push order
/// `tc::Ctx` uses, so a name's de Bruijn index is its distance from the end.
fn parse_expr(toks: &mut Tokens, scope: &mut Vec<String>) -> ParseResult<Expr> {
    match toks.peek() {
        Some("fun") => {
            toks.next()?;
            let (name, domain) = parse_binder(toks, scope)?;
            scope.push(name.clone());
            let body = parse_expr(toks, scope)?;
            scope.pop();
            Ok(mk_lambda(name, domain, body))
        }
        Some("Pi") => {
            toks.next()?;
            let (name, domain) = parse_binder(toks, scope)?;
            scope.push(name.clone());
            let body = parse_expr(toks, scope)?;
            scope.pop();
            Ok(mk_pi(name, domain, body))
        }
        Some("Sigma") => {
            toks.next()?;
            let (name, domain) = parse_binder(toks, scope)?;
            scope.push(name.clone());
            let body = parse_expr(toks, scope)?;
            scope.pop();
            Ok(mk_sigma(name, domain, body))
        }
        _ => parse_app(toks, scope),
    }
}

fn parse_binder(toks: &mut Tokens, scope: &mut Vec<String>) -> ParseResult<(String, Expr)> {
    toks.expect("(")?;
    let name = toks.next()?.to_string();
    toks.expect(":")?;
    let domain = parse_expr(toks, scope)?;
    toks.expect(")")?;
    toks.expect("=>")?;
    Ok((name, domain))
}

fn parse_app(toks: &mut Tokens, scope: &mut Vec<String>) -> ParseResult<Expr> {
    let mut head = parse_atom(toks, scope)?;
    let mut args = Vec::new();
    loop {
        match toks.peek() {
            Some(")") | None | Some(":=") | Some(":") | Some("=>") | Some("=?=") => break,
            _ => args.push(parse_atom(toks, scope)?),
        }
    }
    if !args.is_empty() {
        head = crate::expr::mk_app(head, args);
    }
    Ok(head)
}

fn parse_atom(toks: &mut Tokens, scope: &mut Vec<String>) -> ParseResult<Expr> {
    match toks.peek() {
        Some("(") => {
            toks.next()?;
            let e = parse_expr(toks, scope)?;
            toks.expect(")")?;
            Ok(e)
        }
        Some("Sort") => {
            toks.next()?;
            let level = parse_level(toks)?;
            Ok(mk_sort(level))
        }
        Some(ident) => {
            let ident = ident.to_string();
            toks.next()?;
            if let Ok(n) = ident.parse::<i64>() {
                return Ok(crate::value::int_value(n));
            }
            if let Some(pos) = scope.iter().rev().position(|b| b == &ident) {
                return Ok(mk_var(pos as u32));
            }
            Ok(crate::expr::mk_const(Name::from(ident.as_str()), vec![]))
        }
        None => Err(ParseErr::Exhausted(toks.line)),
    }
}

fn parse_level(toks: &mut Tokens) -> ParseResult<Level> {
    match toks.peek() {
        Some("(") => {
            toks.next()?;
            let l = parse_level(toks)?;
            toks.expect(")")?;
            Ok(l)
        }
        Some("0") => {
            toks.next()?;
            Ok(mk_zero())
        }
        Some("succ") => {
            toks.next()?;
            Ok(mk_succ(parse_level(toks)?))
        }
        Some("max") => {
            toks.next()?;
            let a = parse_level(toks)?;
            let b = parse_level(toks)?;
            Ok(mk_max(a, b))
        }
        Some("imax") => {
            toks.next()?;
            let a = parse_level(toks)?;
            let b = parse_level(toks)?;
            Ok(mk_imax(a, b))
        }
        Some(ident) => {
            let ident = ident.to_string();
            toks.next()?;
            Ok(crate::level::mk_param(Name::from(ident.as_str())))
        }
        None => Err(ParseErr::Exhausted(toks.line)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_universe_and_axiom() {
        let script = "universe u\naxiom A : Sort u\n";
        let cmds = parse_script(script).unwrap();
        assert_eq!(cmds.len(), 2);
        assert!(matches!(&cmds[0], Command::Universe { bounds, .. } if bounds.is_empty()));
        assert!(matches!(cmds[1], Command::Axiom { .. }));
    }

    #[test]
    fn parses_universe_with_multiple_bounds() {
        let script = "universe u\nuniverse v\nuniverse w >= u + 1, v + 2\n";
        let cmds = parse_script(script).unwrap();
        assert_eq!(cmds.len(), 3);
        match &cmds[2] {
            Command::Universe { name, bounds } => {
                assert_eq!(name, "w");
                assert_eq!(bounds, &[("u".to_string(), 1), ("v".to_string(), 2)]);
            }
            other => panic!("expected Universe, got {:?}", other),
        }
    }

    #[test]
    fn parses_identity_definition() {
        let script = "axiom A : Sort 0\ndef id : Pi (x : A) => A := fun (x : A) => x\n";
        let cmds = parse_script(script).unwrap();
        assert_eq!(cmds.len(), 2);
        match &cmds[1] {
            Command::Def { name, opaque, .. } => {
                assert_eq!(name, "id");
                assert!(!opaque);
            }
            other => panic!("expected Def, got {:?}", other),
        }
    }

    #[test]
    fn rejects_truncated_line() {
        let script = "axiom A :";
        assert!(parse_script(script).is_err());
    }
}
