//! Bounded-depth higher-order unification restricted to the Miller pattern
//! fragment: a metavariable applied to distinct bound variables can be solved
//! by abstracting the other side over those variables, without the full
//! undecidable higher-order unification problem.
//!
//! The recursive case-split follows the familiar "reduce to whnf, compare
//! head, recurse on spine" shape definitional equality uses, with metavariable
//! assignment spliced in ahead of the structural cases (see DESIGN.md).

use hashbrown::HashSet;

use crate::env::Env;
use crate::errors::{KernelErr, KernelResult};
use crate::expr::{mk_app, mk_lambda, mk_pi, mk_sigma, mk_var, Expr, InnerExpr};
use crate::level::Level;
use crate::metavar::MEnv;
use crate::normalize::{is_equivalent, whnf};

/// Attempts to unify `e1` and `e2`, assigning metavariables as needed.
/// Bounded by `menv.max_depth()`; fails with `FailedToUnify` on structural
/// disagreement the unifier has no flexibility left to close.
pub fn unify(e1: &Expr, e2: &Expr, env: &Env, menv: &MEnv) -> KernelResult<()> {
    let result = unify_depth(e1, e2, env, menv, 0);
    tracing::debug!(ok = result.is_ok(), "unify");
    #[cfg(feature = "tracing-trace")]
    crate::trace::record(crate::trace::TraceItem::Unify {
        lhs_digest: e1.digest(),
        rhs_digest: e2.digest(),
        ok: result.is_ok(),
    });
    result
}

/// Convertibility's fallback when either whnf'd side is a metavariable
/// occurrence (called from `normalize::conv_whnfd`). With no `MEnv` present
/// there is nothing to assign, so only pointer equality can succeed.
pub fn try_unify_fallback(a: &Expr, b: &Expr, env: &Env, menv: Option<&MEnv>) -> KernelResult<bool> {
    let menv = match menv {
        Some(m) => m,
        None => return Ok(a.ptr_eq(b)),
    };
    match unify(a, b, env, menv) {
        Ok(()) => Ok(true),
        Err(KernelErr::FailedToUnify { .. })
        | Err(KernelErr::OccursCheck { .. })
        | Err(KernelErr::EscapingLocal { .. }) => Ok(false),
        Err(e) => Err(e),
    }
}

fn unify_depth(e1: &Expr, e2: &Expr, env: &Env, menv: &MEnv, depth: u32) -> KernelResult<()> {
    menv.interrupt().tick()?;
    if depth > menv.max_depth() {
        return Err(KernelErr::MaxDepthExceeded(menv.max_depth()));
    }
    if e1.ptr_eq(e2) {
        return Ok(());
    }

    if try_assign_pattern(e1, e2, env, menv)? {
        return Ok(());
    }
    if try_assign_pattern(e2, e1, env, menv)? {
        return Ok(());
    }

    use InnerExpr::*;
    let progressed = match (e1.as_ref(), e2.as_ref()) {
        (Sort { level: l1, .. }, Sort { level: l2, .. }) => return bool_to_result(Level::eq_by_antisymm(l1, l2), e1, e2),
        (Var { idx: i1, .. }, Var { idx: i2, .. }) => return bool_to_result(i1 == i2, e1, e2),
        (Const { name: n1, levels: lv1, .. }, Const { name: n2, levels: lv2, .. }) => {
            let eq = n1 == n2 && lv1.len() == lv2.len() && lv1.iter().zip(lv2).all(|(x, y)| Level::eq_by_antisymm(x, y));
            return bool_to_result(eq, e1, e2);
        }
        (Value { val: v1, .. }, Value { val: v2, .. }) => return bool_to_result(v1.value_eq(v2.as_ref()), e1, e2),
        (App { fun: f1, args: a1, .. }, App { fun: f2, args: a2, .. }) if a1.len() == a2.len() => {
            if is_equivalent(f1, f2, env, Some(menv))? {
                for (x, y) in a1.iter().zip(a2) {
                    unify_depth(x, y, env, menv, depth + 1)?;
                }
                return Ok(());
            }
            false
        }
        (Lambda { domain: d1, body: b1, .. }, Lambda { domain: d2, body: b2, .. })
        | (Pi { domain: d1, body: b1, .. }, Pi { domain: d2, body: b2, .. })
        | (Sigma { domain: d1, body: b1, .. }, Sigma { domain: d2, body: b2, .. }) => {
            unify_depth(d1, d2, env, menv, depth + 1)?;
            unify_depth(b1, b2, env, menv, depth + 1)?;
            return Ok(());
        }
        (Pair { fst: f1, snd: s1, .. }, Pair { fst: f2, snd: s2, .. }) => {
            unify_depth(f1, f2, env, menv, depth + 1)?;
            unify_depth(s1, s2, env, menv, depth + 1)?;
            return Ok(());
        }
        (Proj { is_fst: p1, arg: a1, .. }, Proj { is_fst: p2, arg: a2, .. }) if p1 == p2 => {
            unify_depth(a1, a2, env, menv, depth + 1)?;
            return Ok(());
        }
        (HEq { lhs: l1, rhs: r1, .. }, HEq { lhs: l2, rhs: r2, .. }) => {
            unify_depth(l1, l2, env, menv, depth + 1)?;
            unify_depth(r1, r2, env, menv, depth + 1)?;
            return Ok(());
        }
        _ => false,
    };
    if progressed {
        return Ok(());
    }

    let w1 = whnf(e1, env, Some(menv))?;
    let w2 = whnf(e2, env, Some(menv))?;
    if !w1.ptr_eq(e1) || !w2.ptr_eq(e2) {
        return unify_depth(&w1, &w2, env, menv, depth + 1);
    }

    Err(KernelErr::FailedToUnify { lhs: e1.clone(), rhs: e2.clone() })
}

fn bool_to_result(b: bool, e1: &Expr, e2: &Expr) -> KernelResult<()> {
    if b {
        Ok(())
    } else {
        Err(KernelErr::FailedToUnify { lhs: e1.clone(), rhs: e2.clone() })
    }
}

/// Extracts `(meta_name, args)` if `lhs` (after metavar-root resolution) is a
/// bare or applied unassigned metavariable occurrence.
fn as_meta_app(lhs: &Expr, menv: &MEnv) -> Option<(crate::name::Name, Vec<Expr>)> {
    let (head, args) = match lhs.as_ref() {
        InnerExpr::App { fun, args, .. } => (fun, args.clone()),
        InnerExpr::MetaVar { .. } => (lhs, Vec::new()),
        _ => return None,
    };
    let name = head.metavar_name()?;
    let root = menv.root(name);
    if menv.is_assigned(&root) {
        return None;
    }
    Some((root, args))
}

/// Tries the pattern-unification case: `?m a1 … an ≡ rhs` succeeds when the
/// `ai` are distinct bound variables, by assigning `?m := λ … . rhs'` where
/// `rhs'` is `rhs` with each `ai` renamed to the correspondingly bound
/// variable of the new lambda chain.
fn try_assign_pattern(lhs: &Expr, rhs: &Expr, _env: &Env, menv: &MEnv) -> KernelResult<bool> {
    let (meta, args) = match as_meta_app(lhs, menv) {
        Some(x) => x,
        None => return Ok(false),
    };

    // `?m1 ≡ ?m2`, both unassigned, both applied to nothing: union them
    // rather than picking an arbitrary direction.
    if args.is_empty() {
        if let Some((other, other_args)) = as_meta_app(rhs, menv) {
            if other_args.is_empty() {
                menv.union(&meta, &other);
                return Ok(true);
            }
        }
    }

    let idxs = match pattern_vars(&args) {
        Some(v) => v,
        None => return Ok(false),
    };

    let ctx = menv.ctx_of(&meta);
    if idxs.iter().any(|&i| i as usize >= ctx.len()) {
        return Ok(false);
    }

    let n = idxs.len() as u32;
    let mut map = hashbrown::HashMap::new();
    for (p, &i) in idxs.iter().enumerate() {
        map.insert(i, n - 1 - p as u32);
    }

    let renamed = match rename_pattern(rhs, 0, &map) {
        Ok(r) => r,
        Err(_) => return Ok(false),
    };

    let mut body = renamed;
    for p in (0..idxs.len()).rev() {
        let i = idxs[p];
        let dom = crate::tc::ctx_lookup(&ctx, i);
        body = mk_lambda("_", dom, body);
    }
    menv.assign(&meta, &body)?;
    Ok(true)
}

fn pattern_vars(args: &[Expr]) -> Option<Vec<u32>> {
    let mut seen = HashSet::new();
    let mut idxs = Vec::with_capacity(args.len());
    for a in args {
        match a.var_idx() {
            Some(i) if seen.insert(i) => idxs.push(i),
            _ => return None,
        }
    }
    Some(idxs)
}

/// Re-expresses `e` (whose free variables live in the ambient context the
/// pattern's arguments were drawn from) as a term valid under the fresh
/// lambda chain `try_assign_pattern` is building: every free variable that
/// was one of the pattern's argument positions is renamed to its new bound
/// index; anything else escapes the pattern fragment and is rejected.
fn rename_pattern(e: &Expr, depth: u32, map: &hashbrown::HashMap<u32, u32>) -> KernelResult<Expr> {
    if e.closed_below(depth) {
        return Ok(e.clone());
    }
    use InnerExpr::*;
    match e.as_ref() {
        Var { idx, .. } => {
            if *idx < depth {
                Ok(e.clone())
            } else {
                let outer = *idx - depth;
                match map.get(&outer) {
                    Some(&p) => Ok(mk_var(depth + p)),
                    None => Err(KernelErr::EscapingLocal { meta: crate::name::Name::from("pattern"), assignment: e.clone() }),
                }
            }
        }
        Sort { .. } | Const { .. } | Value { .. } | MetaVar { .. } => Ok(e.clone()),
        App { fun, args, .. } => {
            let fun = rename_pattern(fun, depth, map)?;
            let args = args.iter().map(|a| rename_pattern(a, depth, map)).collect::<KernelResult<Vec<_>>>()?;
            Ok(mk_app(fun, args))
        }
        Lambda { name_hint, domain, body, .. } => {
            Ok(mk_lambda(name_hint.clone(), rename_pattern(domain, depth, map)?, rename_pattern(body, depth + 1, map)?))
        }
        Pi { name_hint, domain, body, .. } => {
            Ok(mk_pi(name_hint.clone(), rename_pattern(domain, depth, map)?, rename_pattern(body, depth + 1, map)?))
        }
        Sigma { name_hint, domain, body, .. } => {
            Ok(mk_sigma(name_hint.clone(), rename_pattern(domain, depth, map)?, rename_pattern(body, depth + 1, map)?))
        }
        Pair { fst, snd, ty, .. } => Ok(crate::expr::mk_pair(
            rename_pattern(fst, depth, map)?,
            rename_pattern(snd, depth, map)?,
            rename_pattern(ty, depth, map)?,
        )),
        Proj { is_fst, arg, .. } => Ok(crate::expr::mk_proj(*is_fst, rename_pattern(arg, depth, map)?)),
        Let { name_hint, ty, val, body, .. } => Ok(crate::expr::mk_let(
            name_hint.clone(),
            ty.as_ref().map(|t| rename_pattern(t, depth, map)).transpose()?,
            rename_pattern(val, depth, map)?,
            rename_pattern(body, depth + 1, map)?,
        )),
        HEq { lhs, rhs, .. } => Ok(crate::expr::mk_heq(rename_pattern(lhs, depth, map)?, rename_pattern(rhs, depth, map)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{mk_const, mk_sort};
    use crate::level::mk_zero;

    #[test]
    fn pattern_unification_assigns_full_context() {
        let env = Env::new();
        let menv = MEnv::new_menv(env.clone(), None, 64);
        let int_ty = mk_sort(mk_zero());
        let m = menv.mk_metavar(vec![int_ty.clone()], mk_const("zero", vec![]));
        let m_name = m.metavar_name().unwrap().clone();
        let m_app = mk_app(m, vec![mk_var(0)]);
        let target = mk_const("zero", vec![]);
        unify(&m_app, &target, &env, &menv).unwrap();
        assert!(menv.is_assigned(&m_name));
    }

    #[test]
    fn unifying_distinct_constants_fails() {
        let env = Env::new();
        let menv = MEnv::new_menv(env.clone(), None, 64);
        let a = mk_const("a", vec![]);
        let b = mk_const("b", vec![]);
        assert!(unify(&a, &b, &env, &menv).is_err());
    }
}
