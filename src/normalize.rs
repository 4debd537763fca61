//! Weak-head/full normalization and definitional equality.
//!
//! No inductive types here, so delta (definition unfolding) and iota
//! (projection) are handled directly against `env.rs`'s `Definition` and
//! `expr.rs`'s `Pair`/`Proj`, rather than through a generic recursor-based
//! rewrite-rule table.

use crate::env::Env;
use crate::errors::KernelResult;
use crate::expr::{mk_sort, Expr, InnerExpr};
use crate::metavar::MEnv;
use crate::subst::{apply_beta, instantiate, instantiate_levels};

/// A `Const` head naming an `Object::Builtin` unfolds to its `Value` payload
/// unconditionally — unlike `Definition`, a builtin carries no universe
/// parameters and is never `opaque`.
fn builtin_value(env: &Env, name: &crate::name::Name) -> Option<std::sync::Arc<dyn crate::expr::ValueObj>> {
    match env.find_object(name)? {
        crate::env::Object::Builtin { value, .. } => Some(value),
        _ => None,
    }
}

fn unfoldable(env: &Env, menv: Option<&MEnv>, name: &crate::name::Name) -> Option<(Vec<crate::name::Name>, Expr, Expr)> {
    match env.find_object(name)? {
        crate::env::Object::Definition { univ_params, ty: _, value, opaque } => {
            if opaque {
                return None;
            }
            if let Some(m) = menv {
                if !m.is_unfoldable(name) {
                    return None;
                }
            }
            Some((univ_params, value.clone(), value))
        }
        _ => None,
    }
}

/// One step of weak-head reduction, or `None` if `e` is already irreducible.
fn whnf_step(e: &Expr, env: &Env, menv: Option<&MEnv>) -> KernelResult<Option<Expr>> {
    use InnerExpr::*;
    match e.as_ref() {
        App { fun, args, .. } => {
            if fun.is_lambda() {
                return Ok(Some(apply_beta(fun, args)));
            }
            if let Some(name) = fun.const_name() {
                if let Some((univ_params, value, _)) = unfoldable(env, menv, name) {
                    tracing::trace!(name = ?name, "delta-unfolding definition");
                    let levels = fun.const_levels().cloned().unwrap_or_default();
                    let substs: Vec<_> = univ_params.into_iter().map(crate::level::mk_param).zip(levels).collect();
                    let unfolded = instantiate_levels(&value, &substs);
                    return Ok(Some(crate::expr::mk_app(unfolded, args.clone())));
                }
                if let Some(value) = builtin_value(env, name) {
                    return Ok(Some(crate::expr::mk_app(crate::expr::mk_value(value), args.clone())));
                }
            }
            if let Some(val) = fun.value_obj() {
                if let Some(reduced) = val.normalize(args) {
                    return Ok(Some(reduced));
                }
            }
            if let Some(assigned) = resolve_metavar(fun, menv) {
                return Ok(Some(crate::expr::mk_app(assigned, args.clone())));
            }
            Ok(None)
        }
        Proj { is_fst, arg, .. } => {
            let whnfd_arg = whnf(arg, env, menv)?;
            if let Some((fst, snd, _)) = whnfd_arg.pair_parts() {
                Ok(Some(if *is_fst { fst.clone() } else { snd.clone() }))
            } else {
                Ok(None)
            }
        }
        Let { val, body, .. } => Ok(Some(instantiate(body, 0, std::slice::from_ref(val)))),
        MetaVar { .. } => Ok(resolve_metavar(e, menv)),
        Sort { level, .. } => {
            let simplified = level.simplify();
            if crate::level::Level::eq_by_antisymm(&simplified, level) {
                Ok(None)
            } else {
                Ok(Some(mk_sort(simplified)))
            }
        }
        _ => {
            if let Some(name) = e.const_name() {
                if let Some((univ_params, value, _)) = unfoldable(env, menv, name) {
                    let levels = e.const_levels().cloned().unwrap_or_default();
                    let substs: Vec<_> = univ_params.into_iter().map(crate::level::mk_param).zip(levels).collect();
                    return Ok(Some(instantiate_levels(&value, &substs)));
                }
                if let Some(value) = builtin_value(env, name) {
                    return Ok(Some(crate::expr::mk_value(value)));
                }
            }
            Ok(None)
        }
    }
}

fn resolve_metavar(e: &Expr, menv: Option<&MEnv>) -> Option<Expr> {
    let menv = menv?;
    let name = e.metavar_name()?;
    menv.lookup_assignment(name).map(|assigned| {
        let pending = e.metavar_pending().unwrap_or(&[]);
        crate::metavar::apply_pending(&assigned, pending)
    })
}

/// Weak-head normal form. Steps until the head is irreducible.
pub fn whnf(e: &Expr, env: &Env, menv: Option<&MEnv>) -> KernelResult<Expr> {
    tick(menv)?;
    let mut cur = e.clone();
    loop {
        match whnf_step(&cur, env, menv)? {
            Some(next) => cur = next,
            None => {
                #[cfg(feature = "tracing-trace")]
                crate::trace::record(crate::trace::TraceItem::Whnf { before_digest: e.digest(), after_digest: cur.digest() });
                return Ok(cur);
            }
        }
    }
}

fn tick(menv: Option<&MEnv>) -> KernelResult<()> {
    if let Some(m) = menv {
        m.interrupt().tick()?;
    }
    Ok(())
}

/// Full normalization: reduce under binders too. Assumes
/// strongly-normalizing input (ensured by the surface type system, not
/// checked here). Memoizes by pointer identity within this call so a term
/// shared by several parents (common under hash-consing) is only normalized
/// once, the same way `expr::expr_eq`'s visited-pairs set avoids re-walking
/// shared sub-DAGs.
pub fn normalize(e: &Expr, env: &Env, menv: Option<&MEnv>) -> KernelResult<Expr> {
    let mut memo = hashbrown::HashMap::new();
    normalize_memo(e, env, menv, &mut memo)
}

fn normalize_memo(
    e: &Expr,
    env: &Env,
    menv: Option<&MEnv>,
    memo: &mut hashbrown::HashMap<usize, Expr>,
) -> KernelResult<Expr> {
    let key = e.as_ptr_key();
    if let Some(cached) = memo.get(&key) {
        return Ok(cached.clone());
    }
    tick(menv)?;
    let whnfd = whnf(e, env, menv)?;
    use InnerExpr::*;
    let out = match whnfd.as_ref() {
        Var { .. } | Sort { .. } | Const { .. } | Value { .. } | MetaVar { .. } => whnfd,
        App { fun, args, .. } => {
            let fun_n = normalize_memo(fun, env, menv, memo)?;
            let args_n: KernelResult<Vec<Expr>> = args.iter().map(|a| normalize_memo(a, env, menv, memo)).collect();
            crate::expr::mk_app(fun_n, args_n?)
        }
        Lambda { name_hint, domain, body, .. } => {
            crate::expr::mk_lambda(name_hint.clone(), normalize_memo(domain, env, menv, memo)?, normalize_memo(body, env, menv, memo)?)
        }
        Pi { name_hint, domain, body, .. } => {
            crate::expr::mk_pi(name_hint.clone(), normalize_memo(domain, env, menv, memo)?, normalize_memo(body, env, menv, memo)?)
        }
        Sigma { name_hint, domain, body, .. } => {
            crate::expr::mk_sigma(name_hint.clone(), normalize_memo(domain, env, menv, memo)?, normalize_memo(body, env, menv, memo)?)
        }
        Pair { fst, snd, ty, .. } => crate::expr::mk_pair(
            normalize_memo(fst, env, menv, memo)?,
            normalize_memo(snd, env, menv, memo)?,
            normalize_memo(ty, env, menv, memo)?,
        ),
        Proj { is_fst, arg, .. } => crate::expr::mk_proj(*is_fst, normalize_memo(arg, env, menv, memo)?),
        Let { name_hint, ty, val, body, .. } => {
            let ty_n = match ty {
                Some(t) => Some(normalize_memo(t, env, menv, memo)?),
                None => None,
            };
            crate::expr::mk_let(name_hint.clone(), ty_n, normalize_memo(val, env, menv, memo)?, normalize_memo(body, env, menv, memo)?)
        }
        HEq { lhs, rhs, .. } => crate::expr::mk_heq(normalize_memo(lhs, env, menv, memo)?, normalize_memo(rhs, env, menv, memo)?),
    };
    memo.insert(key, out.clone());
    Ok(out)
}

/// Whether `e`, once normalized, has a `Sort(Zero)` (Prop-like) type — used
/// by `is_proof_irrel_eq` below. `infer` is threaded in via callback to avoid
/// a hard dependency from `normalize.rs` on `tc.rs`'s full inference (only
/// `tc.rs` calls this, passing itself).
pub fn is_prop_whnf(e: &Expr, env: &Env, menv: Option<&MEnv>) -> KernelResult<bool> {
    let w = whnf(e, env, menv)?;
    Ok(matches!(w.sort_level(), Some(l) if l.is_zero()))
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Both sides must be definitionally equal (used for domains, and for
    /// every position that isn't the codomain of a top-level `Pi`/`Sort`
    /// comparison).
    Equiv,
    /// `lhs` may be a subtype of `rhs` via cumulativity (`Sort(u) <= Sort(v)`
    /// when `env.is_ge(v, u)`); used for `Pi` codomains and the top-level
    /// check call.
    Cumulative,
}

/// Definitional equality / convertibility, up to cumulativity.
pub fn is_convertible(a: &Expr, b: &Expr, env: &Env, menv: Option<&MEnv>) -> KernelResult<bool> {
    conv(a, b, env, menv, Mode::Cumulative)
}

/// Strict (non-cumulative) convertibility, used for domains and everywhere
/// else asymmetry doesn't apply.
pub fn is_equivalent(a: &Expr, b: &Expr, env: &Env, menv: Option<&MEnv>) -> KernelResult<bool> {
    conv(a, b, env, menv, Mode::Equiv)
}

fn conv(a: &Expr, b: &Expr, env: &Env, menv: Option<&MEnv>, mode: Mode) -> KernelResult<bool> {
    tick(menv)?;
    if a.ptr_eq(b) {
        return Ok(true);
    }
    if is_proof_irrel_eq(a, b, env, menv)? {
        return Ok(true);
    }
    let wa = whnf(a, env, menv)?;
    let wb = whnf(b, env, menv)?;
    conv_whnfd(&wa, &wb, env, menv, mode)
}

fn is_proof_irrel_eq(a: &Expr, b: &Expr, env: &Env, menv: Option<&MEnv>) -> KernelResult<bool> {
    // Two proofs of the same Sort(Zero) (Prop-like) proposition are
    // convertible regardless of their actual structure. This is the only
    // proof-irrelevance rule implemented at kernel level; see DESIGN.md for
    // why a dedicated Bool-literal rule is not (deferred to the elaborator).
    let ta = crate::tc::infer_type(a, env, menv, &[]);
    let tb = crate::tc::infer_type(b, env, menv, &[]);
    match (ta, tb) {
        (Ok(ta), Ok(tb)) => {
            if is_prop_whnf(&ta, env, menv)? && is_prop_whnf(&tb, env, menv)? {
                Ok(is_equivalent(&ta, &tb, env, menv)?)
            } else {
                Ok(false)
            }
        }
        _ => Ok(false),
    }
}

fn conv_whnfd(a: &Expr, b: &Expr, env: &Env, menv: Option<&MEnv>, mode: Mode) -> KernelResult<bool> {
    use InnerExpr::*;
    if a.ptr_eq(b) {
        return Ok(true);
    }
    if a.is_metavar() || b.is_metavar() {
        return crate::unify::try_unify_fallback(a, b, env, menv);
    }
    match (a.as_ref(), b.as_ref()) {
        (Sort { level: l1, .. }, Sort { level: l2, .. }) => match mode {
            Mode::Equiv => Ok(crate::level::Level::eq_by_antisymm(l1, l2)),
            Mode::Cumulative => Ok(crate::env::sort_leq(env, l1, l2)),
        },
        (Var { idx: i1, .. }, Var { idx: i2, .. }) => Ok(i1 == i2),
        (Const { name: n1, levels: lv1, .. }, Const { name: n2, levels: lv2, .. }) => {
            Ok(n1 == n2 && lv1.len() == lv2.len() && lv1.iter().zip(lv2).all(|(x, y)| crate::level::Level::eq_by_antisymm(x, y)))
        }
        (App { fun: f1, args: a1, .. }, App { fun: f2, args: a2, .. }) => {
            if a1.len() != a2.len() {
                return Ok(false);
            }
            if !conv(f1, f2, env, menv, Mode::Equiv)? {
                return Ok(false);
            }
            for (x, y) in a1.iter().zip(a2) {
                if !conv(x, y, env, menv, Mode::Equiv)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        (Lambda { domain: d1, body: b1, .. }, Lambda { domain: d2, body: b2, .. }) => {
            Ok(conv(d1, d2, env, menv, Mode::Equiv)? && conv(b1, b2, env, menv, Mode::Equiv)?)
        }
        (Pi { domain: d1, body: b1, .. }, Pi { domain: d2, body: b2, .. }) => {
            Ok(conv(d1, d2, env, menv, Mode::Equiv)? && conv(b1, b2, env, menv, mode)?)
        }
        (Sigma { domain: d1, body: b1, .. }, Sigma { domain: d2, body: b2, .. }) => {
            Ok(conv(d1, d2, env, menv, Mode::Equiv)? && conv(b1, b2, env, menv, Mode::Equiv)?)
        }
        (Pair { fst: f1, snd: s1, .. }, Pair { fst: f2, snd: s2, .. }) => {
            Ok(conv(f1, f2, env, menv, Mode::Equiv)? && conv(s1, s2, env, menv, Mode::Equiv)?)
        }
        (Proj { is_fst: p1, arg: a1, .. }, Proj { is_fst: p2, arg: a2, .. }) => {
            Ok(p1 == p2 && conv(a1, a2, env, menv, Mode::Equiv)?)
        }
        (HEq { lhs: l1, rhs: r1, .. }, HEq { lhs: l2, rhs: r2, .. }) => {
            Ok(conv(l1, l2, env, menv, Mode::Equiv)? && conv(r1, r2, env, menv, Mode::Equiv)?)
        }
        (Value { val: v1, .. }, Value { val: v2, .. }) => Ok(v1.value_eq(v2.as_ref())),
        // Eta for functions: `f` vs a non-lambda `g` compares `f` against
        // `λ x. g x` at the domain type the lambda side provides. `g` is
        // lifted by one before entering the new binder: it was closed at the
        // outer de Bruijn depth, and `Var(0)` under the fresh `Lambda` now
        // occupies the slot every one of `g`'s own free variables must shift
        // past (`subst::lift`'s usual binder-crossing discipline).
        (Lambda { domain, body, .. }, _) => {
            let eta = crate::expr::mk_app(crate::subst::lift(b, 0, 1), vec![crate::expr::mk_var(0)]);
            let eta_lambda = crate::expr::mk_lambda(crate::name::Name::from("_"), domain.clone(), eta);
            conv(&crate::expr::mk_lambda(crate::name::Name::from("_"), domain.clone(), body.clone()), &eta_lambda, env, menv, Mode::Equiv)
        }
        (_, Lambda { domain, body, .. }) => {
            let eta = crate::expr::mk_app(crate::subst::lift(a, 0, 1), vec![crate::expr::mk_var(0)]);
            let eta_lambda = crate::expr::mk_lambda(crate::name::Name::from("_"), domain.clone(), eta);
            conv(&eta_lambda, &crate::expr::mk_lambda(crate::name::Name::from("_"), domain.clone(), body.clone()), env, menv, Mode::Equiv)
        }
        // Eta for pairs: a non-Pair `p : Sigma` is convertible to `<p.1, p.2>`.
        (Pair { fst, snd, .. }, _) => {
            let b1 = crate::expr::mk_proj(true, b.clone());
            let b2 = crate::expr::mk_proj(false, b.clone());
            Ok(conv(fst, &b1, env, menv, Mode::Equiv)? && conv(snd, &b2, env, menv, Mode::Equiv)?)
        }
        (_, Pair { fst, snd, .. }) => {
            let a1 = crate::expr::mk_proj(true, a.clone());
            let a2 = crate::expr::mk_proj(false, a.clone());
            Ok(conv(&a1, fst, env, menv, Mode::Equiv)? && conv(&a2, snd, env, menv, Mode::Equiv)?)
        }
        _ => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{mk_app, mk_const, mk_lambda, mk_pair, mk_proj, mk_sigma, mk_sort, mk_var};
    use crate::level::mk_zero;

    #[test]
    fn beta_reduces_under_whnf() {
        let env = Env::new();
        let body = mk_var(0);
        let lam = mk_lambda("x", mk_sort(mk_zero()), body);
        let applied = mk_app(lam, vec![mk_const("a", vec![])]);
        let w = whnf(&applied, &env, None).unwrap();
        assert!(w.ptr_eq(&mk_const("a", vec![])));
    }

    #[test]
    fn opaque_definition_blocks_delta() {
        let env = Env::new();
        let int_sort = mk_sort(mk_zero());
        env.add_var(crate::name::Name::from("Int"), vec![], int_sort).unwrap();
        let int = mk_const("Int", vec![]);
        env.add_var(crate::name::Name::from("one"), vec![], int.clone()).unwrap();
        env.add_definition(crate::name::Name::from("a"), vec![], int, mk_const("one", vec![]), true).unwrap();
        let a = mk_const("a", vec![]);
        let w = whnf(&a, &env, None).unwrap();
        assert!(w.ptr_eq(&a));
    }

    #[test]
    fn reflexive_convertibility() {
        let env = Env::new();
        let s = mk_sort(mk_zero());
        assert!(is_convertible(&s, &s, &env, None).unwrap());
    }

    #[test]
    fn iota_reduces_projection_of_pair() {
        let env = Env::new();
        let a = mk_const("a", vec![]);
        let b = mk_const("b", vec![]);
        let ty = mk_sigma("x", mk_sort(mk_zero()), mk_sort(mk_zero()));
        let pair = mk_pair(a.clone(), b.clone(), ty);
        let fst = mk_proj(true, pair.clone());
        let snd = mk_proj(false, pair);
        assert!(whnf(&fst, &env, None).unwrap().ptr_eq(&a));
        assert!(whnf(&snd, &env, None).unwrap().ptr_eq(&b));
    }

    #[test]
    fn eta_for_pairs() {
        let env = Env::new();
        let ty = mk_sigma("x", mk_sort(mk_zero()), mk_sort(mk_zero()));
        env.add_var(crate::name::Name::from("p"), vec![], ty.clone()).unwrap();
        let p = mk_const("p", vec![]);
        // A non-`Pair` term is convertible to the `Pair` built from its own
        // projections, even though the two sides have different shapes.
        let reassembled = mk_pair(mk_proj(true, p.clone()), mk_proj(false, p.clone()), ty);
        assert!(is_convertible(&p, &reassembled, &env, None).unwrap());
        assert!(is_convertible(&reassembled, &p, &env, None).unwrap());
    }
}
