//! Type inference and checking.
//!
//! `infer_type` mirrors the usual bidirectional-less "infer everything"
//! discipline for a kernel with no surface elaboration: every case recurses
//! structurally, consulting `env`/`menv` only at the leaves (`Const`,
//! `MetaVar`). The context is a plain `&[Expr]` de Bruijn telescope rather
//! than a locally-nameless one, and there are no recursor-specific inference
//! rules since this kernel has no inductive types.
//!
//! `Ctx` convention: a context is a `Vec<Expr>` of domain types pushed in
//! binder order, so `Var(i)`'s type is the `i`-th entry counting from the
//! end, lifted past the `i+1` binders between its declaration and this use.

use crate::bug;
use crate::env::Env;
use crate::errors::{KernelErr, KernelResult};
use crate::expr::{mk_sort, Expr, InnerExpr};
use crate::level::{mk_imax, mk_max, mk_zero, Level};
use crate::metavar::MEnv;
use crate::normalize::{is_convertible, whnf};
use crate::subst::instantiate;

/// The type of `Var(idx)` under `ctx`, shifted to account for the `idx + 1`
/// binders crossed between its introduction and this occurrence.
pub fn ctx_lookup(ctx: &[Expr], idx: u32) -> Expr {
    let pos = ctx.len() - 1 - idx as usize;
    crate::subst::lift(&ctx[pos], 0, idx + 1)
}

/// Infers the type of `e` under `ctx`.
pub fn infer_type(e: &Expr, env: &Env, menv: Option<&MEnv>, ctx: &[Expr]) -> KernelResult<Expr> {
    if let Some(m) = menv {
        m.interrupt().tick()?;
    }
    #[cfg(feature = "tracing-trace")]
    crate::trace::record(crate::trace::TraceItem::Infer { expr_digest: e.digest() });
    use InnerExpr::*;
    match e.as_ref() {
        Var { idx, .. } => {
            if (*idx as usize) < ctx.len() {
                Ok(ctx_lookup(ctx, *idx))
            } else {
                Err(bug!("free variable #{} escaped its context (len {})", idx, ctx.len()))
            }
        }
        Sort { level, .. } => Ok(mk_sort(mk_succ_level(level))),
        Const { name, levels, .. } => {
            let obj = env.find_object(name).ok_or_else(|| KernelErr::UnknownName(name.clone()))?;
            let ty = obj.ty().cloned().ok_or_else(|| KernelErr::UnknownName(name.clone()))?;
            let params = obj.univ_params();
            if params.len() != levels.len() {
                return Err(bug!("universe argument count mismatch for {:?}", name));
            }
            let substs: Vec<(Level, Level)> =
                params.iter().cloned().map(crate::level::mk_param).zip(levels.iter().cloned()).collect();
            Ok(crate::subst::instantiate_levels(&ty, &substs))
        }
        App { fun, args, .. } => {
            let mut fun_ty = infer_type(fun, env, menv, ctx)?;
            for arg in args {
                let whnfd = whnf(&fun_ty, env, menv)?;
                if !whnfd.is_pi() {
                    return Err(KernelErr::FunctionExpected(whnfd));
                }
                let domain = whnfd.abst_domain().unwrap().clone();
                let body = whnfd.abst_body().unwrap().clone();
                check(arg, &domain, env, menv, ctx)?;
                fun_ty = instantiate(&body, 0, std::slice::from_ref(arg));
            }
            Ok(fun_ty)
        }
        Lambda { name_hint, domain, body, .. } => {
            infer_universe_of_type(domain, env, menv, ctx)?;
            let mut ctx2 = ctx.to_vec();
            ctx2.push(domain.clone());
            let body_ty = infer_type(body, env, menv, &ctx2)?;
            Ok(crate::expr::mk_pi(name_hint.clone(), domain.clone(), body_ty))
        }
        Pi { domain, body, .. } => {
            // A Pi's universe collapses to Sort(Zero) (Prop) whenever its
            // codomain's universe does, regardless of how large the domain's
            // own universe is — exactly `imax`'s behavior, not a plain `max`.
            // This is what makes `Pi (x : A), P` impredicative when `P : Prop`.
            let dom_level = infer_universe_of_type(domain, env, menv, ctx)?;
            let mut ctx2 = ctx.to_vec();
            ctx2.push(domain.clone());
            let body_level = infer_universe_of_type(body, env, menv, &ctx2)?;
            Ok(mk_sort(mk_imax(dom_level, body_level)))
        }
        Sigma { domain, body, .. } => {
            let dom_level = infer_universe_of_type(domain, env, menv, ctx)?;
            let mut ctx2 = ctx.to_vec();
            ctx2.push(domain.clone());
            let body_level = infer_universe_of_type(body, env, menv, &ctx2)?;
            Ok(mk_sort(mk_max(dom_level, body_level)))
        }
        Pair { fst, snd, ty, .. } => {
            let whnfd_ty = whnf(ty, env, menv)?;
            if !whnfd_ty.is_sigma() {
                return Err(bug!("Pair type annotation {:?} is not a Sigma", ty));
            }
            let domain = whnfd_ty.abst_domain().unwrap().clone();
            let body = whnfd_ty.abst_body().unwrap().clone();
            let fst_ty = infer_type(fst, env, menv, ctx)?;
            if !is_convertible(&fst_ty, &domain, env, menv)? {
                return Err(KernelErr::PairTypeMismatch { component: fst.clone(), expected: domain });
            }
            let snd_expected = instantiate(&body, 0, std::slice::from_ref(fst));
            let snd_ty = infer_type(snd, env, menv, ctx)?;
            if !is_convertible(&snd_ty, &snd_expected, env, menv)? {
                return Err(KernelErr::PairTypeMismatch { component: snd.clone(), expected: snd_expected });
            }
            Ok(ty.clone())
        }
        Proj { is_fst, arg, .. } => {
            let arg_ty = infer_type(arg, env, menv, ctx)?;
            let whnfd = whnf(&arg_ty, env, menv)?;
            if !whnfd.is_sigma() {
                return Err(bug!("projection of a non-Sigma-typed term {:?}", arg));
            }
            let domain = whnfd.abst_domain().unwrap().clone();
            let body = whnfd.abst_body().unwrap().clone();
            if *is_fst {
                Ok(domain)
            } else {
                let fst_proj = crate::expr::mk_proj(true, arg.clone());
                Ok(instantiate(&body, 0, std::slice::from_ref(&fst_proj)))
            }
        }
        Let { name_hint, ty, val, body, .. } => {
            let val_ty = infer_type(val, env, menv, ctx)?;
            if let Some(t) = ty {
                if !is_convertible(&val_ty, t, env, menv)? {
                    return Err(KernelErr::DefTypeMismatch { name: name_hint.clone(), declared: t.clone(), inferred: val_ty });
                }
            }
            let substituted = instantiate(body, 0, std::slice::from_ref(val));
            infer_type(&substituted, env, menv, ctx)
        }
        HEq { lhs, rhs, .. } => {
            infer_type(lhs, env, menv, ctx)?;
            infer_type(rhs, env, menv, ctx)?;
            Ok(mk_sort(mk_zero()))
        }
        MetaVar { name, pending, .. } => {
            let m = menv.ok_or_else(|| bug!("metavariable {:?} encountered with no MEnv", name))?;
            let ty = m.ty_of(name);
            Ok(crate::metavar::apply_pending(&ty, pending))
        }
        Value { val, .. } => Ok(val.ty()),
    }
}

fn mk_succ_level(level: &Level) -> Level {
    crate::level::mk_succ(level.clone())
}

/// Checks that `ty` is itself a well-formed type (has some `Sort` as its
/// type) and returns that `Sort`'s level.
pub fn infer_universe_of_type(ty: &Expr, env: &Env, menv: Option<&MEnv>, ctx: &[Expr]) -> KernelResult<Level> {
    let inferred = infer_type(ty, env, menv, ctx)?;
    let whnfd = whnf(&inferred, env, menv)?;
    match whnfd.sort_level() {
        Some(l) => Ok(l.clone()),
        None => Err(KernelErr::TypeExpected(ty.clone())),
    }
}

/// Checks `e` against an expected type: infers `e`'s actual type and
/// requires it convertible to `expected`.
pub fn check(e: &Expr, expected: &Expr, env: &Env, menv: Option<&MEnv>, ctx: &[Expr]) -> KernelResult<()> {
    let actual = infer_type(e, env, menv, ctx)?;
    let ok = is_convertible(&actual, expected, env, menv)?;
    #[cfg(feature = "tracing-trace")]
    crate::trace::record(crate::trace::TraceItem::Check { expr_digest: e.digest(), expected_digest: expected.digest() });
    if ok {
        Ok(())
    } else {
        Err(KernelErr::AppTypeMismatch { expected: expected.clone(), found: actual })
    }
}

/// Convenience used by declaration-adding code that only needs to know `ty`
/// is well-formed, not its resulting level.
pub fn check_type(ty: &Expr, env: &Env, menv: Option<&MEnv>, ctx: &[Expr]) -> KernelResult<()> {
    infer_universe_of_type(ty, env, menv, ctx).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{mk_app, mk_const, mk_heq, mk_lambda, mk_pair, mk_pi, mk_proj, mk_sigma, mk_sort, mk_var};
    use crate::level::mk_zero;
    use crate::name::Name;

    #[test]
    fn infers_identity_lambda_type() {
        let env = Env::new();
        env.add_var(crate::name::Name::from("A"), vec![], mk_sort(crate::level::mk_succ(mk_zero()))).unwrap();
        let a = mk_const("A", vec![]);
        let id = mk_lambda("x", a.clone(), mk_var(0));
        let ty = infer_type(&id, &env, None, &[]).unwrap();
        let expected = mk_pi("x", a.clone(), a.clone());
        assert!(is_convertible(&ty, &expected, &env, None).unwrap());
    }

    #[test]
    fn app_type_mismatch_is_rejected() {
        let env = Env::new();
        env.add_var(crate::name::Name::from("A"), vec![], mk_sort(crate::level::mk_succ(mk_zero()))).unwrap();
        env.add_var(crate::name::Name::from("B"), vec![], mk_sort(crate::level::mk_succ(mk_zero()))).unwrap();
        let a = mk_const("A", vec![]);
        let b = mk_const("B", vec![]);
        env.add_var(crate::name::Name::from("f"), vec![], mk_pi("x", a.clone(), a.clone())).unwrap();
        env.add_var(crate::name::Name::from("bb"), vec![], b.clone()).unwrap();
        let applied = mk_app(mk_const("f", vec![]), vec![mk_const("bb", vec![])]);
        let res = infer_type(&applied, &env, None, &[]);
        assert!(res.is_err());
    }

    #[test]
    fn pi_universe_combines_domain_and_codomain_levels() {
        let env = Env::new();
        let dom = mk_sort(mk_zero());
        let pi = mk_pi("x", dom, mk_sort(mk_zero()));
        // Both domain and codomain are literally `Prop` (`Sort Zero`) used as
        // a *type*, so each has inferred universe `Succ(Zero)`; the Pi's
        // universe is their `imax`, which only collapses to `Zero` when the
        // codomain side is `Zero`, not when the codomain itself merely
        // denotes `Prop`.
        let level = infer_universe_of_type(&pi, &env, None, &[]).unwrap();
        assert!(level.is_nonzero());
    }

    #[test]
    fn sigma_pair_proj_infer_and_mismatch() {
        let env = Env::new();
        env.add_var(Name::from("A"), vec![], mk_sort(crate::level::mk_succ(mk_zero()))).unwrap();
        let a = mk_const("A", vec![]);
        env.add_var(Name::from("a1"), vec![], a.clone()).unwrap();
        env.add_var(Name::from("a2"), vec![], a.clone()).unwrap();

        let sigma_ty = mk_sigma("x", a.clone(), a.clone());
        let pair = mk_pair(mk_const("a1", vec![]), mk_const("a2", vec![]), sigma_ty.clone());

        let ty = infer_type(&pair, &env, None, &[]).unwrap();
        assert!(ty.ptr_eq(&sigma_ty));

        let fst = mk_proj(true, pair.clone());
        let fst_ty = infer_type(&fst, &env, None, &[]).unwrap();
        assert!(is_convertible(&fst_ty, &a, &env, None).unwrap());

        let snd = mk_proj(false, pair);
        let snd_ty = infer_type(&snd, &env, None, &[]).unwrap();
        assert!(is_convertible(&snd_ty, &a, &env, None).unwrap());

        // A pair whose annotated Sigma doesn't match its first component's
        // actual type is rejected, not silently accepted.
        env.add_var(Name::from("B"), vec![], mk_sort(crate::level::mk_succ(mk_zero()))).unwrap();
        let bogus_sigma = mk_sigma("x", mk_const("B", vec![]), mk_const("B", vec![]));
        let bogus_pair = mk_pair(mk_const("a1", vec![]), mk_const("a2", vec![]), bogus_sigma);
        let res = infer_type(&bogus_pair, &env, None, &[]);
        assert!(matches!(res, Err(KernelErr::PairTypeMismatch { .. })));
    }

    #[test]
    fn heq_is_prop_typed() {
        let env = Env::new();
        env.add_var(Name::from("A"), vec![], mk_sort(mk_zero())).unwrap();
        let a = mk_const("A", vec![]);
        env.add_var(Name::from("x"), vec![], a.clone()).unwrap();
        env.add_var(Name::from("y"), vec![], a).unwrap();
        let heq = mk_heq(mk_const("x", vec![]), mk_const("y", vec![]));
        let ty = infer_type(&heq, &env, None, &[]).unwrap();
        assert!(matches!(ty.sort_level(), Some(l) if l.is_zero()));
    }
}
