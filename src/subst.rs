//! The substitution algebra: `lift`, `instantiate`,
//! `apply_beta`/`head_beta_reduce`/`beta_reduce`, kept as its own module
//! separate from the term DAG since substitution is a distinct concern from
//! term construction.
//!
//! Every traversal here is free-variable-range-aware: a closed sub-DAG is
//! returned unchanged in O(1) via [`Expr::closed_below`], which is what
//! makes these operations linear in the size of the non-closed portion of a
//! term rather than the whole term.

use crate::expr::{
    mk_app, mk_const, mk_heq, mk_lambda, mk_let, mk_metavar_with_pending, mk_pair, mk_pi, mk_proj,
    mk_sigma, mk_sort, mk_value, mk_var, Expr, LocalEntry,
};
use crate::level::Level;

/// Add `offset` to every free `Var(i)` with `i >= cutoff`. Recurses under
/// binders with `cutoff + 1`. A no-op whenever `e` has no free variable
/// `>= cutoff` (in particular when `offset == 0`).
pub fn lift(e: &Expr, cutoff: u32, offset: u32) -> Expr {
    if offset == 0 || e.closed_below(cutoff) {
        return e.clone();
    }
    lift_core(e, cutoff, offset)
}

fn lift_core(e: &Expr, cutoff: u32, offset: u32) -> Expr {
    if e.closed_below(cutoff) {
        return e.clone();
    }
    use crate::expr::InnerExpr::*;
    match e.as_ref() {
        Var { idx, .. } => {
            if *idx >= cutoff {
                mk_var(idx + offset)
            } else {
                e.clone()
            }
        }
        Sort { .. } | Const { .. } | Value { .. } => e.clone(),
        App { fun, args, .. } => {
            let fun = lift_core(fun, cutoff, offset);
            let args = args.iter().map(|a| lift_core(a, cutoff, offset)).collect();
            mk_app(fun, args)
        }
        Lambda { name_hint, domain, body, .. } => {
            crate::expr::mk_lambda(name_hint.clone(), lift_core(domain, cutoff, offset), lift_core(body, cutoff + 1, offset))
        }
        Pi { name_hint, domain, body, .. } => {
            mk_pi(name_hint.clone(), lift_core(domain, cutoff, offset), lift_core(body, cutoff + 1, offset))
        }
        Sigma { name_hint, domain, body, .. } => {
            mk_sigma(name_hint.clone(), lift_core(domain, cutoff, offset), lift_core(body, cutoff + 1, offset))
        }
        Pair { fst, snd, ty, .. } => mk_pair(lift_core(fst, cutoff, offset), lift_core(snd, cutoff, offset), lift_core(ty, cutoff, offset)),
        Proj { is_fst, arg, .. } => mk_proj(*is_fst, lift_core(arg, cutoff, offset)),
        Let { name_hint, ty, val, body, .. } => mk_let(
            name_hint.clone(),
            ty.as_ref().map(|t| lift_core(t, cutoff, offset)),
            lift_core(val, cutoff, offset),
            lift_core(body, cutoff + 1, offset),
        ),
        HEq { lhs, rhs, .. } => mk_heq(lift_core(lhs, cutoff, offset), lift_core(rhs, cutoff, offset)),
        MetaVar { name, pending, .. } => {
            let mut pending = pending.clone();
            pending.push(LocalEntry::Lift { start: cutoff, offset });
            mk_metavar_with_pending(name.clone(), pending)
        }
    }
}

/// Replace `Var(start + i)` for `i` in `[0, n)` with `subst[n - 1 - i]`,
/// shifting every other free variable `>= start + n` down by `n`. `subst`
/// need not be closed: each replacement is lifted by the accumulated binder
/// depth as the traversal descends, which degenerates automatically into the
/// closed-substitution fast path when every element of `subst` is in fact
/// closed, since [`lift`] is then a no-op.
pub fn instantiate(e: &Expr, start: u32, subst: &[Expr]) -> Expr {
    if subst.is_empty() || e.closed_below(start) {
        return e.clone();
    }
    instantiate_core(e, start, subst, 0)
}

fn instantiate_core(e: &Expr, start: u32, subst: &[Expr], depth: u32) -> Expr {
    let cur = start + depth;
    if e.closed_below(cur) {
        return e.clone();
    }
    let n = subst.len() as u32;
    use crate::expr::InnerExpr::*;
    match e.as_ref() {
        Var { idx, .. } => {
            let idx = *idx;
            if idx < cur {
                e.clone()
            } else if idx < cur + n {
                let which = idx - cur;
                let repl = &subst[(n - 1 - which) as usize];
                lift(repl, 0, depth)
            } else {
                mk_var(idx - n)
            }
        }
        Sort { .. } | Const { .. } | Value { .. } => e.clone(),
        App { fun, args, .. } => {
            let fun = instantiate_core(fun, start, subst, depth);
            let args = args.iter().map(|a| instantiate_core(a, start, subst, depth)).collect();
            mk_app(fun, args)
        }
        Lambda { name_hint, domain, body, .. } => mk_lambda_helper(name_hint, domain, body, start, subst, depth),
        Pi { name_hint, domain, body, .. } => mk_pi(
            name_hint.clone(),
            instantiate_core(domain, start, subst, depth),
            instantiate_core(body, start, subst, depth + 1),
        ),
        Sigma { name_hint, domain, body, .. } => mk_sigma(
            name_hint.clone(),
            instantiate_core(domain, start, subst, depth),
            instantiate_core(body, start, subst, depth + 1),
        ),
        Pair { fst, snd, ty, .. } => mk_pair(
            instantiate_core(fst, start, subst, depth),
            instantiate_core(snd, start, subst, depth),
            instantiate_core(ty, start, subst, depth),
        ),
        Proj { is_fst, arg, .. } => mk_proj(*is_fst, instantiate_core(arg, start, subst, depth)),
        Let { name_hint, ty, val, body, .. } => mk_let(
            name_hint.clone(),
            ty.as_ref().map(|t| instantiate_core(t, start, subst, depth)),
            instantiate_core(val, start, subst, depth),
            instantiate_core(body, start, subst, depth + 1),
        ),
        HEq { lhs, rhs, .. } => mk_heq(instantiate_core(lhs, start, subst, depth), instantiate_core(rhs, start, subst, depth)),
        MetaVar { name, pending, .. } => {
            let replacements: Vec<Expr> = subst.iter().map(|s| lift(s, 0, depth)).collect();
            let mut pending = pending.clone();
            pending.push(LocalEntry::Inst { start: cur, replacements });
            mk_metavar_with_pending(name.clone(), pending)
        }
    }
}

fn mk_lambda_helper(name_hint: &crate::name::Name, domain: &Expr, body: &Expr, start: u32, subst: &[Expr], depth: u32) -> Expr {
    crate::expr::mk_lambda(
        name_hint.clone(),
        instantiate_core(domain, start, subst, depth),
        instantiate_core(body, start, subst, depth + 1),
    )
}

/// If `f` is a lambda, `instantiate`s its body with as many leading `args`
/// as there are leading lambdas (one bound variable at a time, since each
/// `Lambda` binds exactly one variable). Excess `args` become a residual
/// application; fewer than needed yield a partially-applied residual
/// lambda.
pub fn apply_beta(f: &Expr, args: &[Expr]) -> Expr {
    let mut cur = f.clone();
    let mut i = 0usize;
    while i < args.len() {
        match cur.as_ref() {
            crate::expr::InnerExpr::Lambda { body, .. } => {
                cur = instantiate(body, 0, std::slice::from_ref(&args[i]));
                i += 1;
            }
            _ => break,
        }
    }
    if i < args.len() {
        mk_app(cur, args[i..].to_vec())
    } else {
        cur
    }
}

/// Applies [`apply_beta`] once, only if `e`'s head is literally a lambda
/// applied to arguments (no normalization first — that's `normalize::whnf`'s
/// job).
pub fn head_beta_reduce(e: &Expr) -> Expr {
    if let (Some(fun), Some(args)) = (e.app_fn(), e.app_args()) {
        if fun.is_lambda() {
            return apply_beta(fun, args);
        }
    }
    e.clone()
}

/// Beta-reduces `e` to a fixpoint, including under binders. Does not touch
/// delta/iota/zeta — purely the beta rule, matching the module's S-only
/// scope; full definitional reduction lives in `normalize.rs`.
pub fn beta_reduce(e: &Expr) -> Expr {
    let mut cur = e.clone();
    loop {
        let next = beta_reduce_step(&cur);
        if next.ptr_eq(&cur) {
            return cur;
        }
        cur = next;
    }
}

fn beta_reduce_step(e: &Expr) -> Expr {
    use crate::expr::InnerExpr::*;
    match e.as_ref() {
        Var { .. } | Sort { .. } | Const { .. } | Value { .. } | MetaVar { .. } => e.clone(),
        App { fun, args, .. } => {
            let fun = beta_reduce_step(fun);
            let args: Vec<Expr> = args.iter().map(beta_reduce_step).collect();
            let applied = mk_app(fun, args);
            head_beta_reduce(&applied)
        }
        Lambda { name_hint, domain, body, .. } => {
            crate::expr::mk_lambda(name_hint.clone(), beta_reduce_step(domain), beta_reduce_step(body))
        }
        Pi { name_hint, domain, body, .. } => mk_pi(name_hint.clone(), beta_reduce_step(domain), beta_reduce_step(body)),
        Sigma { name_hint, domain, body, .. } => mk_sigma(name_hint.clone(), beta_reduce_step(domain), beta_reduce_step(body)),
        Pair { fst, snd, ty, .. } => mk_pair(beta_reduce_step(fst), beta_reduce_step(snd), beta_reduce_step(ty)),
        Proj { is_fst, arg, .. } => mk_proj(*is_fst, beta_reduce_step(arg)),
        Let { name_hint, ty, val, body, .. } => mk_let(
            name_hint.clone(),
            ty.as_ref().map(beta_reduce_step),
            beta_reduce_step(val),
            beta_reduce_step(body),
        ),
        HEq { lhs, rhs, .. } => mk_heq(beta_reduce_step(lhs), beta_reduce_step(rhs)),
    }
}

/// Replaces every `Level::Param` occurring in `e` (inside `Sort`/`Const`
/// nodes) per `substs`, leaving de Bruijn structure untouched. Needed to
/// instantiate a `Definition`'s universe-polymorphic body/type at a
/// particular `Const(name, levels)` use site during delta unfolding; kept in
/// this module since it's the same "replace a bound name throughout a DAG"
/// shape as `instantiate`, just over universe variables instead of term
/// variables.
pub fn instantiate_levels(e: &Expr, substs: &[(Level, Level)]) -> Expr {
    if substs.is_empty() {
        return e.clone();
    }
    use crate::expr::InnerExpr::*;
    match e.as_ref() {
        Var { .. } => e.clone(),
        Sort { level, .. } => mk_sort(level.instantiate_lvl(&substs.to_vec())),
        Const { name, levels, .. } => {
            mk_const(name.clone(), levels.iter().map(|l| l.instantiate_lvl(&substs.to_vec())).collect::<Vec<_>>())
        }
        App { fun, args, .. } => mk_app(
            instantiate_levels(fun, substs),
            args.iter().map(|a| instantiate_levels(a, substs)).collect(),
        ),
        Lambda { name_hint, domain, body, .. } => {
            mk_lambda(name_hint.clone(), instantiate_levels(domain, substs), instantiate_levels(body, substs))
        }
        Pi { name_hint, domain, body, .. } => {
            mk_pi(name_hint.clone(), instantiate_levels(domain, substs), instantiate_levels(body, substs))
        }
        Sigma { name_hint, domain, body, .. } => {
            mk_sigma(name_hint.clone(), instantiate_levels(domain, substs), instantiate_levels(body, substs))
        }
        Pair { fst, snd, ty, .. } => {
            mk_pair(instantiate_levels(fst, substs), instantiate_levels(snd, substs), instantiate_levels(ty, substs))
        }
        Proj { is_fst, arg, .. } => mk_proj(*is_fst, instantiate_levels(arg, substs)),
        Let { name_hint, ty, val, body, .. } => mk_let(
            name_hint.clone(),
            ty.as_ref().map(|t| instantiate_levels(t, substs)),
            instantiate_levels(val, substs),
            instantiate_levels(body, substs),
        ),
        HEq { lhs, rhs, .. } => mk_heq(instantiate_levels(lhs, substs), instantiate_levels(rhs, substs)),
        Value { val, .. } => mk_value(val.clone()),
        MetaVar { name, pending, .. } => {
            // Pending Lift/Inst entries don't mention universes directly;
            // levels inside any already-queued Inst replacements are handled
            // when those replacements themselves get built.
            mk_metavar_with_pending(name.clone(), pending.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{mk_const, mk_lambda};
    use crate::level::mk_zero;
    use crate::expr::mk_sort;

    #[test]
    fn instantiate_zero_is_identity() {
        let e = mk_app(mk_const("f", vec![]), vec![mk_var(3)]);
        let instd = instantiate(&e, 0, &[]);
        assert!(instd.ptr_eq(&e));
    }

    #[test]
    fn lift_zero_offset_is_identity() {
        let e = mk_app(mk_const("f", vec![]), vec![mk_var(3)]);
        assert!(lift(&e, 0, 0).ptr_eq(&e));
    }

    #[test]
    fn beta_matches_instantiate() {
        let ty = mk_sort(mk_zero());
        let body = mk_app(mk_var(0), vec![mk_var(0)]);
        let lam = mk_lambda("x", ty, body.clone());
        let arg = mk_const("a", vec![]);
        let via_beta = beta_reduce(&mk_app(lam, vec![arg.clone()]));
        let via_instantiate = beta_reduce(&instantiate(&body, 0, &[arg]));
        assert!(via_beta.ptr_eq(&via_instantiate));
    }

    #[test]
    fn lift_then_instantiate_matches_direct_instantiate_for_closed_subst() {
        let e = mk_app(mk_var(0), vec![mk_var(1)]);
        let subst = vec![mk_const("a", vec![]), mk_const("b", vec![])];
        let lhs = instantiate(&lift(&e, 0, 2), 0, &subst);
        let rhs = instantiate(&e, 0, &subst);
        assert!(expr_eq_helper(&lhs, &rhs));
    }

    fn expr_eq_helper(a: &Expr, b: &Expr) -> bool {
        crate::expr::expr_eq(a, b)
    }
}
