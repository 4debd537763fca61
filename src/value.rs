//! A demonstration `Value` plugin — a machine-integer literal type plus
//! `int_add`/`int_mul` builtins reducing over it.
//!
//! The kernel itself never inspects a `Value`'s payload (`ValueObj` has no
//! downcasting), so the two builtins below recover operands from literal
//! `Int`s the same way any other collaborator's plugin would have to: through
//! the trait's own `kind_tag`/`display`, not by peeking at private fields.

use std::sync::Arc;

use crate::expr::{mk_const, mk_pi, mk_value, Expr, ValueObj};

const INT_TAG: &str = "Int";

/// A literal machine integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Int(pub i64);

impl ValueObj for Int {
    fn kind_tag(&self) -> &str {
        INT_TAG
    }

    fn ty(&self) -> Expr {
        mk_const("Int", vec![])
    }

    fn normalize(&self, _args: &[Expr]) -> Option<Expr> {
        None
    }

    fn value_hash(&self) -> u64 {
        fxhash::hash64(&(INT_TAG, self.0))
    }

    fn value_eq(&self, other: &dyn ValueObj) -> bool {
        other.kind_tag() == INT_TAG && other.display() == self.display()
    }

    fn display(&self) -> String {
        self.0.to_string()
    }
}

pub fn int_value(n: i64) -> Expr {
    mk_value(Arc::new(Int(n)))
}

/// Recovers an `Int`'s payload from a `Value` node. Round-trips through
/// `display` rather than downcasting, since `ValueObj` deliberately gives the
/// kernel no way to inspect a payload's concrete type.
fn extract_int(e: &Expr) -> Option<i64> {
    let val = e.value_obj()?;
    if val.kind_tag() != INT_TAG {
        return None;
    }
    val.display().parse::<i64>().ok()
}

/// A binary `Int -> Int -> Int` builtin operation. `normalize` fires only
/// once both arguments have reduced down to literal `Int`s; applied to fewer
/// than two arguments, or to arguments that aren't yet literals, it's stuck
/// like any other partially-applied function.
pub struct IntBinOp {
    name: &'static str,
    op: fn(i64, i64) -> i64,
}

impl std::fmt::Debug for IntBinOp {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "IntBinOp({})", self.name)
    }
}

impl ValueObj for IntBinOp {
    fn kind_tag(&self) -> &str {
        self.name
    }

    fn ty(&self) -> Expr {
        let int = mk_const("Int", vec![]);
        mk_pi("_", int.clone(), mk_pi("_", int.clone(), int))
    }

    fn normalize(&self, args: &[Expr]) -> Option<Expr> {
        if args.len() != 2 {
            return None;
        }
        let a = extract_int(&args[0])?;
        let b = extract_int(&args[1])?;
        Some(int_value((self.op)(a, b)))
    }

    fn value_hash(&self) -> u64 {
        fxhash::hash64(&self.name)
    }

    fn value_eq(&self, other: &dyn ValueObj) -> bool {
        other.kind_tag() == self.name
    }

    fn display(&self) -> String {
        self.name.to_string()
    }
}

pub fn int_add() -> Arc<dyn ValueObj> {
    Arc::new(IntBinOp { name: "int_add", op: |a, b| a + b })
}

pub fn int_mul() -> Arc<dyn ValueObj> {
    Arc::new(IntBinOp { name: "int_mul", op: |a, b| a * b })
}

/// Declares `Int` plus `int_add`/`int_mul` in `env`. Fails only via the
/// usual `KernelErr` machinery if `Int` is already declared, same as any
/// other `add_*` call.
pub fn install_int_builtins(env: &crate::env::Env) -> crate::errors::KernelResult<()> {
    env.add_var(crate::name::Name::from("Int"), vec![], crate::expr::mk_sort(crate::level::mk_zero()))?;
    let int = mk_const("Int", vec![]);
    let binop_ty = mk_pi("_", int.clone(), mk_pi("_", int, mk_const("Int", vec![])));
    env.add_builtin(crate::name::Name::from("int_add"), binop_ty.clone(), int_add())?;
    env.add_builtin(crate::name::Name::from("int_mul"), binop_ty, int_mul())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::Env;
    use crate::expr::mk_app;
    use crate::normalize::normalize;

    #[test]
    fn int_add_reduces_literals() {
        let env = Env::new();
        install_int_builtins(&env).unwrap();
        let one = int_value(1);
        let two = int_value(2);
        let sum = mk_app(mk_const("int_add", vec![]), vec![one, two]);
        let reduced = normalize(&sum, &env, None).unwrap();
        assert_eq!(extract_int(&reduced), Some(3));
    }

    #[test]
    fn chained_definitions_fold_through_builtin_arithmetic() {
        // a := 1 + 2; b := 2 * a; normalize(b) == 6
        let env = Env::new();
        install_int_builtins(&env).unwrap();
        let a_val = mk_app(mk_const("int_add", vec![]), vec![int_value(1), int_value(2)]);
        env.add_definition(crate::name::Name::from("a"), vec![], mk_const("Int", vec![]), a_val, false).unwrap();
        let b_val = mk_app(mk_const("int_mul", vec![]), vec![int_value(2), mk_const("a", vec![])]);
        env.add_definition(crate::name::Name::from("b"), vec![], mk_const("Int", vec![]), b_val, false).unwrap();
        let reduced = normalize(&mk_const("b", vec![]), &env, None).unwrap();
        assert_eq!(extract_int(&reduced), Some(6));
    }

    #[test]
    fn stuck_on_non_literal_argument() {
        let env = Env::new();
        install_int_builtins(&env).unwrap();
        env.add_var(crate::name::Name::from("x"), vec![], mk_const("Int", vec![])).unwrap();
        let applied = mk_app(mk_const("int_add", vec![]), vec![int_value(1), mk_const("x", vec![])]);
        let reduced = normalize(&applied, &env, None).unwrap();
        assert!(reduced.value_obj().is_none());
    }
}
