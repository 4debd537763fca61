//! End-to-end scenarios, exercising the public crate API the way an external
//! collaborator (elaborator, tactic engine) would rather than reaching into
//! any one module's internals.

use ichor::cli::{run_script, KernelOptions};
use ichor::env::Env;
use ichor::errors::KernelErr;
use ichor::expr::{mk_app, mk_const, mk_lambda, mk_pi, mk_sort, mk_var};
use ichor::level::{mk_param, mk_succ, mk_zero};
use ichor::name::Name;
use ichor::normalize::{is_convertible, normalize, whnf};
use ichor::value::{install_int_builtins, int_value};

/// Arithmetic reduction, plus child-env scoping and the parent-side
/// `unknown_name` failure on a name only the child declared.
#[test]
fn arithmetic_reduction_and_env_scoping() {
    let env = Env::new();
    install_int_builtins(&env).unwrap();

    let a_val = mk_app(mk_const("int_add", vec![]), vec![int_value(1), int_value(2)]);
    env.add_definition(Name::from("a"), vec![], mk_const("Int", vec![]), a_val, false).unwrap();

    let b_val = mk_app(mk_const("int_mul", vec![]), vec![int_value(2), mk_const("a", vec![])]);
    env.add_definition(Name::from("b"), vec![], mk_const("Int", vec![]), b_val, false).unwrap();

    let b_normal = normalize(&mk_const("b", vec![]), &env, None).unwrap();
    assert_eq!(b_normal.value_obj().unwrap().display(), "6");

    let child = env.mk_child();
    child.add_definition(Name::from("c"), vec![], mk_const("Int", vec![]), mk_const("a", vec![]), false).unwrap();
    let c_normal = normalize(&mk_const("c", vec![]), &child, None).unwrap();
    assert_eq!(c_normal.value_obj().unwrap().display(), "3");

    // `c` was only ever declared in the child; the frozen parent has never
    // heard of it.
    let res = ichor::tc::infer_type(&mk_const("c", vec![]), &env, None, &[]);
    assert!(matches!(res, Err(KernelErr::UnknownName(_))));
}

/// Universe cumulativity lets `f Int` through but rejects `f (Type w)` once
/// `w` strictly exceeds `u`.
#[test]
fn universe_cumulativity_scenario() {
    let env = Env::new();
    env.define_uvar(Name::from("u"), vec![]).unwrap();
    env.define_uvar(Name::from("w"), vec![(Name::from("u"), 1)]).unwrap();

    let u = mk_param(Name::from("u"));
    let w = mk_param(Name::from("w"));
    let type_u = mk_sort(u.clone());
    let type_w = mk_sort(w);

    env.add_var(Name::from("Int"), vec![], type_u.clone()).unwrap();
    env.add_var(Name::from("f"), vec![], mk_pi("_", type_u.clone(), type_u.clone())).unwrap();

    let applied_int = mk_app(mk_const("f", vec![]), vec![mk_const("Int", vec![])]);
    let ty = ichor::tc::infer_type(&applied_int, &env, None, &[]).unwrap();
    assert!(is_convertible(&ty, &type_u, &env, None).unwrap());

    let applied_type_w = mk_app(mk_const("f", vec![]), vec![type_w]);
    let res = ichor::tc::infer_type(&applied_type_w, &env, None, &[]);
    assert!(matches!(res, Err(KernelErr::AppTypeMismatch { .. })));
}

/// An opaque definition blocks delta-unfolding under `normalize`, and using
/// its (unreduced) value where a type is expected surfaces `type_expected`
/// rather than silently unfolding through it.
#[test]
fn opaque_definition_blocks_delta_and_type_use() {
    let env = Env::new();
    let int_sort = mk_sort(mk_zero());
    env.add_var(Name::from("Int"), vec![], int_sort).unwrap();
    let int = mk_const("Int", vec![]);
    env.add_var(Name::from("one"), vec![], int.clone()).unwrap();
    env.add_definition(Name::from("a"), vec![], int, mk_const("one", vec![]), true).unwrap();

    let a = mk_const("a", vec![]);
    let w = whnf(&a, &env, None).unwrap();
    assert!(w.ptr_eq(&a));

    // `a` is a value of type `Int`, not itself a `Sort`; using it in a type
    // position (as the domain of a function type) must fail with
    // `type_expected`, not unfold past the opacity boundary to find one.
    let bogus_pi = mk_pi("_", a, mk_const("Int", vec![]));
    let res = ichor::tc::check_type(&bogus_pi, &env, None, &[]);
    assert!(matches!(res, Err(KernelErr::TypeExpected(_))));
}

/// `infer(Sort(Max(u,v))) = Sort(Succ(Max(u,v)))`.
#[test]
fn sort_of_sort_is_its_successor() {
    let env = Env::new();
    let level = mk_succ(mk_zero());
    let sort = mk_sort(level.clone());
    let ty = ichor::tc::infer_type(&sort, &env, None, &[]).unwrap();
    let expected = mk_sort(mk_succ(level));
    assert!(is_convertible(&ty, &expected, &env, None).unwrap());
}

/// Beta-reducing an applied lambda agrees with directly instantiating its
/// body.
#[test]
fn beta_reduction_matches_direct_instantiation() {
    let env = Env::new();
    env.add_var(Name::from("A"), vec![], mk_sort(mk_succ(mk_zero()))).unwrap();
    let a = mk_const("A", vec![]);
    let lam = mk_lambda("x", a.clone(), mk_var(0));
    let arg = mk_const("A", vec![]);
    let applied = mk_app(lam.clone(), vec![arg.clone()]);

    let via_beta = ichor::subst::beta_reduce(&applied);
    let via_instantiate = ichor::subst::instantiate(lam.abst_body().unwrap(), 0, &[arg]);
    assert!(is_convertible(&via_beta, &via_instantiate, &env, None).unwrap());
}

/// A full CLI-style script exercising declarations, checking, evaluation,
/// and unification together end to end.
#[test]
fn cli_script_end_to_end() {
    let env = Env::new();
    let opts = KernelOptions::default();
    let script = "\
universe u
axiom A : Sort u
def id : Pi (x : A) => A := fun (x : A) => x
check id : Pi (x : A) => A
axiom a0 : A
eval id a0
unify id a0 =?= a0
";
    let checked = run_script(script, &env, &opts, false).unwrap();
    assert_eq!(checked, 7);
}
