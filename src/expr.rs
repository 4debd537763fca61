//! The hash-consed expression DAG: an `Arc`-wrapped enum plus a per-node
//! cache of derived properties (digest, free-variable range, weight, sharing
//! status). Binders use pure de Bruijn indices rather than a locally-nameless
//! scheme, since the substitution algebra this kernel needs is specified
//! directly in terms of de Bruijn indices. Name hints are kept only for
//! display and are never part of a node's identity.

use std::sync::{Arc, Weak};
use std::cmp::max;
use std::hash::{Hash, Hasher};

use fxhash::hash64;
use hashbrown::HashMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::name::Name;
use crate::level::Level;

use InnerExpr::*;

/// Constructor tags mixed into every digest so that, e.g., a `Lambda` and a
/// `Pi` over the same domain/body never collide.
const TAG_VAR: u64 = 0x9E3779B1;
const TAG_SORT: u64 = 0x9E3779B3;
const TAG_CONST: u64 = 0x9E3779B5;
const TAG_APP: u64 = 0x9E3779B9;
const TAG_LAMBDA: u64 = 0x9E3779BB;
const TAG_PI: u64 = 0x9E3779BF;
const TAG_SIGMA: u64 = 0x9E3779C1;
const TAG_PAIR: u64 = 0x9E3779C5;
const TAG_PROJ: u64 = 0x9E3779C7;
const TAG_LET: u64 = 0x9E3779CB;
const TAG_HEQ: u64 = 0x9E3779CD;
const TAG_METAVAR: u64 = 0x9E3779D1;
const TAG_VALUE: u64 = 0x9E3779D3;

/// An opaque host value embedded in a term.
///
/// Implementors provide their own notion of hashing/equality because the
/// kernel has no way to inspect the payload; the normalizer calls
/// `normalize` only when a `Value` is the head of an application.
pub trait ValueObj: std::fmt::Debug + Send + Sync {
    fn kind_tag(&self) -> &str;
    fn ty(&self) -> Expr;
    /// Attempt to reduce `self` applied to `args`. `None` means stuck (no
    /// rule fires for these particular arguments).
    fn normalize(&self, args: &[Expr]) -> Option<Expr>;
    fn value_hash(&self) -> u64;
    fn value_eq(&self, other: &dyn ValueObj) -> bool;
    fn display(&self) -> String;
}

/// One entry of a metavariable occurrence's pending substitution. These
/// accumulate as `lift`/`instantiate` descend past a `MetaVar` node instead
/// of being applied eagerly, and are finally resolved, right-to-left, by
/// `metavar::instantiate_metavars`.
#[derive(Clone, Debug)]
pub enum LocalEntry {
    Lift { start: u32, offset: u32 },
    /// One `instantiate(_, start, replacements)` call suspended at the point
    /// it reached this metavariable occurrence; `replacements` have already
    /// been lifted by the binder depth crossed to reach the occurrence, the
    /// same way the ordinary `Var` case of `instantiate` lifts its
    /// replacement (see `subst::instantiate_core`).
    Inst { start: u32, replacements: Vec<Expr> },
}

/// `Arc`-wrapped handle to a hash-consed [`InnerExpr`]. Two `Expr`s compare
/// equal (and hash equal) iff they are the same `Arc` allocation; the global
/// hash-cons table (see [`intern`]) guarantees that is the same thing as
/// "structurally equal modulo name hints".
#[derive(Clone)]
pub struct Expr(Arc<InnerExpr>);

impl PartialEq for Expr {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for Expr {}

impl Hash for Expr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.digest().hash(state);
    }
}

impl std::fmt::Debug for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self.as_ref())
    }
}

impl std::convert::AsRef<InnerExpr> for Expr {
    fn as_ref(&self) -> &InnerExpr {
        self.0.as_ref()
    }
}

impl Expr {
    pub fn ptr_eq(&self, other: &Expr) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Stable identity for the current call, for use as a memoization key
    /// (e.g. `normalize`'s per-call cache) — two `Expr`s with the same
    /// address are the same hash-consed node.
    pub fn as_ptr_key(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    pub fn digest(&self) -> u64 {
        self.as_ref().cache().digest
    }

    pub fn free_lo(&self) -> u32 {
        self.as_ref().cache().free_lo
    }

    pub fn free_hi(&self) -> u32 {
        self.as_ref().cache().free_hi
    }

    pub fn has_free_vars(&self) -> bool {
        self.free_hi() > 0
    }

    /// True iff no free variable of `self` has index `>= cutoff` — the
    /// closed-subterm shortcut that makes `lift`/`instantiate` linear in the
    /// size of the *non-closed* portion of a term.
    pub fn closed_below(&self, cutoff: u32) -> bool {
        self.free_hi() <= cutoff
    }

    pub fn has_metavar(&self) -> bool {
        self.as_ref().cache().has_metavar
    }

    pub fn weight(&self) -> u32 {
        self.as_ref().cache().weight
    }

    pub fn is_max_shared(&self) -> bool {
        self.as_ref().cache().max_shared
    }
}

/// A node in the DAG. Each variant carries an [`ExprCache`] computed once,
/// at construction time, by the `mk_*` smart constructors in this module —
/// never mutated afterward.
#[derive(Debug)]
pub enum InnerExpr {
    Var { cache: ExprCache, idx: u32 },
    Sort { cache: ExprCache, level: Level },
    Const { cache: ExprCache, name: Name, levels: Vec<Level> },
    App { cache: ExprCache, fun: Expr, args: Vec<Expr> },
    Lambda { cache: ExprCache, name_hint: Name, domain: Expr, body: Expr },
    Pi { cache: ExprCache, name_hint: Name, domain: Expr, body: Expr },
    Sigma { cache: ExprCache, name_hint: Name, domain: Expr, body: Expr },
    Pair { cache: ExprCache, fst: Expr, snd: Expr, ty: Expr },
    Proj { cache: ExprCache, is_fst: bool, arg: Expr },
    Let { cache: ExprCache, name_hint: Name, ty: Option<Expr>, val: Expr, body: Expr },
    HEq { cache: ExprCache, lhs: Expr, rhs: Expr },
    MetaVar { cache: ExprCache, name: Name, pending: Vec<LocalEntry> },
    Value { cache: ExprCache, val: Arc<dyn ValueObj> },
}

impl InnerExpr {
    pub fn cache(&self) -> ExprCache {
        match self {
            Var { cache, .. }
            | Sort { cache, .. }
            | Const { cache, .. }
            | App { cache, .. }
            | Lambda { cache, .. }
            | Pi { cache, .. }
            | Sigma { cache, .. }
            | Pair { cache, .. }
            | Proj { cache, .. }
            | Let { cache, .. }
            | HEq { cache, .. }
            | MetaVar { cache, .. }
            | Value { cache, .. } => *cache,
        }
    }
}

impl std::fmt::Debug for dyn ValueObj {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.display())
    }
}

/// Cached summary of a node's subtree: structural digest, the range of free
/// variable indices it might contain, whether any descendant is a metavar,
/// an approximate node count, and whether this node is known to be the
/// canonical (hash-consed) representative of its structure.
#[derive(Copy, Clone, Debug)]
pub struct ExprCache {
    pub digest: u64,
    /// Smallest possibly-free variable index, or `u32::MAX` if closed.
    pub free_lo: u32,
    /// One past the largest possibly-free variable index (0 if closed).
    pub free_hi: u32,
    pub has_metavar: bool,
    pub weight: u32,
    pub max_shared: bool,
}

impl ExprCache {
    fn leaf(digest: u64) -> Self {
        ExprCache { digest, free_lo: u32::MAX, free_hi: 0, has_metavar: false, weight: 1, max_shared: true }
    }
}

fn combine_free(a: (u32, u32), b: (u32, u32)) -> (u32, u32) {
    let lo = a.0.min(b.0);
    let hi = a.1.max(b.1);
    (lo, hi)
}

fn shift_under_binder(range: (u32, u32)) -> (u32, u32) {
    let (lo, hi) = range;
    if hi == 0 {
        (u32::MAX, 0)
    } else {
        // Var(0) is bound by this binder; everything else shifts down by one.
        let new_hi = hi - 1;
        let new_lo = if lo == 0 { 0 } else { lo.saturating_sub(1) };
        if new_hi == 0 {
            (u32::MAX, 0)
        } else {
            (new_lo.min(new_hi.saturating_sub(1)), new_hi)
        }
    }
}

fn free_range(e: &Expr) -> (u32, u32) {
    (e.free_lo(), e.free_hi())
}

// ---------------------------------------------------------------------
// Global hash-cons table: a process-wide weak-reference set keyed by
// structural digest. Writes take a short critical section; reads never block
// on anything but that same section, so there is no contention beyond
// ordinary mutex use.
// ---------------------------------------------------------------------

static HASHCONS: Lazy<Mutex<HashMap<u64, Vec<Weak<InnerExpr>>>>> =
    Lazy::new(|| Mutex::new(HashMap::with_capacity(4096)));

fn struct_eq_ignore_name(a: &InnerExpr, b: &InnerExpr) -> bool {
    match (a, b) {
        (Var { idx: i1, .. }, Var { idx: i2, .. }) => i1 == i2,
        (Sort { level: l1, .. }, Sort { level: l2, .. }) => l1 == l2,
        (Const { name: n1, levels: lv1, .. }, Const { name: n2, levels: lv2, .. }) => {
            n1 == n2 && lv1 == lv2
        }
        (App { fun: f1, args: a1, .. }, App { fun: f2, args: a2, .. }) => {
            f1.ptr_eq(f2) && a1.len() == a2.len() && a1.iter().zip(a2).all(|(x, y)| x.ptr_eq(y))
        }
        (
            Lambda { domain: d1, body: b1, .. },
            Lambda { domain: d2, body: b2, .. },
        )
        | (Pi { domain: d1, body: b1, .. }, Pi { domain: d2, body: b2, .. })
        | (Sigma { domain: d1, body: b1, .. }, Sigma { domain: d2, body: b2, .. }) => {
            d1.ptr_eq(d2) && b1.ptr_eq(b2)
        }
        (Pair { fst: f1, snd: s1, ty: t1, .. }, Pair { fst: f2, snd: s2, ty: t2, .. }) => {
            f1.ptr_eq(f2) && s1.ptr_eq(s2) && t1.ptr_eq(t2)
        }
        (Proj { is_fst: p1, arg: a1, .. }, Proj { is_fst: p2, arg: a2, .. }) => {
            p1 == p2 && a1.ptr_eq(a2)
        }
        (
            Let { ty: t1, val: v1, body: b1, .. },
            Let { ty: t2, val: v2, body: b2, .. },
        ) => {
            let ty_eq = match (t1, t2) {
                (Some(x), Some(y)) => x.ptr_eq(y),
                (None, None) => true,
                _ => false,
            };
            ty_eq && v1.ptr_eq(v2) && b1.ptr_eq(b2)
        }
        (HEq { lhs: l1, rhs: r1, .. }, HEq { lhs: l2, rhs: r2, .. }) => l1.ptr_eq(l2) && r1.ptr_eq(r2),
        (MetaVar { name: n1, pending: p1, .. }, MetaVar { name: n2, pending: p2, .. }) => {
            n1 == n2 && local_entries_eq(p1, p2)
        }
        (Value { val: v1, .. }, Value { val: v2, .. }) => v1.value_eq(v2.as_ref()),
        _ => false,
    }
}

fn local_entries_eq(a: &[LocalEntry], b: &[LocalEntry]) -> bool {
    a.len() == b.len()
        && a.iter().zip(b).all(|pair| match pair {
            (LocalEntry::Lift { start: s1, offset: o1 }, LocalEntry::Lift { start: s2, offset: o2 }) => {
                s1 == s2 && o1 == o2
            }
            (LocalEntry::Inst { start: s1, replacements: r1 }, LocalEntry::Inst { start: s2, replacements: r2 }) => {
                s1 == s2 && r1.len() == r2.len() && r1.iter().zip(r2).all(|(x, y)| x.ptr_eq(y))
            }
            _ => false,
        })
}

fn intern(inner: InnerExpr) -> Expr {
    let digest = inner.cache().digest;
    let mut table = HASHCONS.lock();
    let bucket = table.entry(digest).or_insert_with(Vec::new);
    for w in bucket.iter() {
        if let Some(arc) = w.upgrade() {
            if struct_eq_ignore_name(&arc, &inner) {
                return Expr(arc);
            }
        }
    }
    bucket.retain(|w| w.strong_count() > 0);
    let arc = Arc::new(inner);
    bucket.push(Arc::downgrade(&arc));
    Expr(arc)
}

/// Number of live buckets in the hash-cons table; exposed for tests that
/// want to observe sharing behavior.
pub fn hashcons_len() -> usize {
    HASHCONS.lock().values().map(|b| b.len()).sum()
}

// ---------------------------------------------------------------------
// Smart constructors. All total; invariant violations (mismatched Pair/
// Sigma shapes, out-of-range Proj, etc.) are caught later by the type
// checker, not here.
// ---------------------------------------------------------------------

pub fn mk_var(idx: u32) -> Expr {
    let digest = hash64(&(TAG_VAR, idx));
    intern(Var { cache: ExprCache { digest, free_lo: idx, free_hi: idx + 1, has_metavar: false, weight: 1, max_shared: true }, idx })
}

pub fn mk_sort(level: Level) -> Expr {
    let digest = hash64(&(TAG_SORT, &level));
    intern(Sort { cache: ExprCache::leaf(digest), level })
}

pub fn mk_const(name: impl Into<Name>, levels: impl Into<Vec<Level>>) -> Expr {
    let name = name.into();
    let levels = levels.into();
    let digest = hash64(&(TAG_CONST, &name, &levels));
    intern(Const { cache: ExprCache::leaf(digest), name, levels })
}

/// n-ary application, stored flat for sharing. If `fun` is itself an `App`,
/// its arguments are merged with `args` rather than nesting.
pub fn mk_app(fun: Expr, args: Vec<Expr>) -> Expr {
    if args.is_empty() {
        return fun;
    }
    let (fun, mut all_args) = match fun.as_ref() {
        App { fun: inner_fun, args: inner_args, .. } => (inner_fun.clone(), inner_args.clone()),
        _ => (fun, Vec::new()),
    };
    all_args.extend(args);

    let mut digest = hash64(&(TAG_APP, fun.digest()));
    let mut range = free_range(&fun);
    let mut has_metavar = fun.has_metavar();
    let mut weight: u32 = fun.weight();
    for a in &all_args {
        digest = hash64(&(digest, a.digest()));
        range = combine_free(range, free_range(a));
        has_metavar = has_metavar || a.has_metavar();
        weight = weight.saturating_add(a.weight());
    }
    let cache = ExprCache { digest, free_lo: range.0, free_hi: range.1, has_metavar, weight: weight + 1, max_shared: true };
    intern(App { cache, fun, args: all_args })
}

pub fn mk_lambda(name_hint: impl Into<Name>, domain: Expr, body: Expr) -> Expr {
    let name_hint = name_hint.into();
    let digest = hash64(&(TAG_LAMBDA, domain.digest(), body.digest()));
    let (dlo, dhi) = free_range(&domain);
    let (blo, bhi) = shift_under_binder(free_range(&body));
    let (lo, hi) = combine_free((dlo, dhi), (blo, bhi));
    let cache = ExprCache {
        digest,
        free_lo: lo,
        free_hi: hi,
        has_metavar: domain.has_metavar() || body.has_metavar(),
        weight: domain.weight() + body.weight() + 1,
        max_shared: true,
    };
    intern(Lambda { cache, name_hint, domain, body })
}

pub fn mk_pi(name_hint: impl Into<Name>, domain: Expr, body: Expr) -> Expr {
    let name_hint = name_hint.into();
    let digest = hash64(&(TAG_PI, domain.digest(), body.digest()));
    let (dlo, dhi) = free_range(&domain);
    let (blo, bhi) = shift_under_binder(free_range(&body));
    let (lo, hi) = combine_free((dlo, dhi), (blo, bhi));
    let cache = ExprCache {
        digest,
        free_lo: lo,
        free_hi: hi,
        has_metavar: domain.has_metavar() || body.has_metavar(),
        weight: domain.weight() + body.weight() + 1,
        max_shared: true,
    };
    intern(Pi { cache, name_hint, domain, body })
}

pub fn mk_sigma(name_hint: impl Into<Name>, domain: Expr, body: Expr) -> Expr {
    let name_hint = name_hint.into();
    let digest = hash64(&(TAG_SIGMA, domain.digest(), body.digest()));
    let (dlo, dhi) = free_range(&domain);
    let (blo, bhi) = shift_under_binder(free_range(&body));
    let (lo, hi) = combine_free((dlo, dhi), (blo, bhi));
    let cache = ExprCache {
        digest,
        free_lo: lo,
        free_hi: hi,
        has_metavar: domain.has_metavar() || body.has_metavar(),
        weight: domain.weight() + body.weight() + 1,
        max_shared: true,
    };
    intern(Sigma { cache, name_hint, domain, body })
}

pub fn mk_pair(fst: Expr, snd: Expr, ty: Expr) -> Expr {
    let digest = hash64(&(TAG_PAIR, fst.digest(), snd.digest(), ty.digest()));
    let range = combine_free(combine_free(free_range(&fst), free_range(&snd)), free_range(&ty));
    let cache = ExprCache {
        digest,
        free_lo: range.0,
        free_hi: range.1,
        has_metavar: fst.has_metavar() || snd.has_metavar() || ty.has_metavar(),
        weight: fst.weight() + snd.weight() + ty.weight() + 1,
        max_shared: true,
    };
    intern(Pair { cache, fst, snd, ty })
}

pub fn mk_proj(is_fst: bool, arg: Expr) -> Expr {
    let digest = hash64(&(TAG_PROJ, is_fst, arg.digest()));
    let (lo, hi) = free_range(&arg);
    let cache = ExprCache {
        digest,
        free_lo: lo,
        free_hi: hi,
        has_metavar: arg.has_metavar(),
        weight: arg.weight() + 1,
        max_shared: true,
    };
    intern(Proj { cache, is_fst, arg })
}

pub fn mk_let(name_hint: impl Into<Name>, ty: Option<Expr>, val: Expr, body: Expr) -> Expr {
    let name_hint = name_hint.into();
    let ty_digest = ty.as_ref().map(|t| t.digest()).unwrap_or(0);
    let digest = hash64(&(TAG_LET, ty_digest, val.digest(), body.digest()));
    let ty_range = ty.as_ref().map(free_range).unwrap_or((u32::MAX, 0));
    let (blo, bhi) = shift_under_binder(free_range(&body));
    let range = combine_free(combine_free(ty_range, free_range(&val)), (blo, bhi));
    let has_metavar = ty.as_ref().map(|t| t.has_metavar()).unwrap_or(false) || val.has_metavar() || body.has_metavar();
    let weight = ty.as_ref().map(|t| t.weight()).unwrap_or(0) + val.weight() + body.weight() + 1;
    let cache = ExprCache { digest, free_lo: range.0, free_hi: range.1, has_metavar, weight, max_shared: true };
    intern(Let { cache, name_hint, ty, val, body })
}

pub fn mk_heq(lhs: Expr, rhs: Expr) -> Expr {
    let digest = hash64(&(TAG_HEQ, lhs.digest(), rhs.digest()));
    let range = combine_free(free_range(&lhs), free_range(&rhs));
    let cache = ExprCache {
        digest,
        free_lo: range.0,
        free_hi: range.1,
        has_metavar: lhs.has_metavar() || rhs.has_metavar(),
        weight: lhs.weight() + rhs.weight() + 1,
        max_shared: true,
    };
    intern(HEq { cache, lhs, rhs })
}

/// Term-level constructor for a metavariable occurrence. Always starts with
/// an empty pending-substitution list; see [`LocalEntry`]. The allocation of
/// a fresh metavariable identity (and its introduction context) is
/// `metavar::MEnv::mk_metavar`'s job, not this one's — this constructor is
/// total and side-effect free, like every other `mk_*` here.
pub fn mk_metavar(name: impl Into<Name>) -> Expr {
    let name = name.into();
    let digest = hash64(&(TAG_METAVAR, &name));
    let cache = ExprCache { digest, free_lo: u32::MAX, free_hi: 0, has_metavar: true, weight: 1, max_shared: true };
    intern(MetaVar { cache, name, pending: Vec::new() })
}

/// Re-wraps a metavariable occurrence with an extra pending entry appended
/// (used by `subst.rs` when `lift`/`instantiate` descend past a `MetaVar`).
pub fn mk_metavar_with_pending(name: Name, pending: Vec<LocalEntry>) -> Expr {
    let digest = hash64(&(TAG_METAVAR, &name, pending.len() as u64));
    // Pending lift/inst entries can introduce arbitrary free variables once
    // resolved; conservatively treat the node as possibly-open at every
    // index so no caller ever treats it as closed prematurely.
    let (free_lo, free_hi) = if pending.is_empty() { (u32::MAX, 0) } else { (0, u32::MAX) };
    let cache = ExprCache { digest, free_lo, free_hi, has_metavar: true, weight: 1 + pending.len() as u32, max_shared: true };
    intern(MetaVar { cache, name, pending })
}

pub fn mk_value(val: Arc<dyn ValueObj>) -> Expr {
    let digest = hash64(&(TAG_VALUE, val.value_hash()));
    let cache = ExprCache::leaf(digest);
    intern(Value { cache, val })
}

// ---------------------------------------------------------------------
// Inspection API.
// ---------------------------------------------------------------------

impl Expr {
    pub fn is_var(&self) -> bool {
        matches!(self.as_ref(), Var { .. })
    }
    pub fn is_sort(&self) -> bool {
        matches!(self.as_ref(), Sort { .. })
    }
    pub fn is_const(&self) -> bool {
        matches!(self.as_ref(), Const { .. })
    }
    pub fn is_app(&self) -> bool {
        matches!(self.as_ref(), App { .. })
    }
    pub fn is_lambda(&self) -> bool {
        matches!(self.as_ref(), Lambda { .. })
    }
    pub fn is_pi(&self) -> bool {
        matches!(self.as_ref(), Pi { .. })
    }
    pub fn is_sigma(&self) -> bool {
        matches!(self.as_ref(), Sigma { .. })
    }
    pub fn is_pair(&self) -> bool {
        matches!(self.as_ref(), Pair { .. })
    }
    pub fn is_let(&self) -> bool {
        matches!(self.as_ref(), Let { .. })
    }
    pub fn is_metavar(&self) -> bool {
        matches!(self.as_ref(), MetaVar { .. })
    }
    pub fn is_value(&self) -> bool {
        matches!(self.as_ref(), Value { .. })
    }

    pub fn var_idx(&self) -> Option<u32> {
        match self.as_ref() {
            Var { idx, .. } => Some(*idx),
            _ => None,
        }
    }

    pub fn sort_level(&self) -> Option<&Level> {
        match self.as_ref() {
            Sort { level, .. } => Some(level),
            _ => None,
        }
    }

    pub fn const_name(&self) -> Option<&Name> {
        match self.as_ref() {
            Const { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn const_levels(&self) -> Option<&Vec<Level>> {
        match self.as_ref() {
            Const { levels, .. } => Some(levels),
            _ => None,
        }
    }

    pub fn app_fn(&self) -> Option<&Expr> {
        match self.as_ref() {
            App { fun, .. } => Some(fun),
            _ => None,
        }
    }

    pub fn app_args(&self) -> Option<&[Expr]> {
        match self.as_ref() {
            App { args, .. } => Some(args),
            _ => None,
        }
    }

    pub fn num_args(&self) -> usize {
        match self.as_ref() {
            App { args, .. } => args.len(),
            _ => 0,
        }
    }

    /// The domain of a `Lambda`/`Pi`/`Sigma` binder.
    pub fn abst_domain(&self) -> Option<&Expr> {
        match self.as_ref() {
            Lambda { domain, .. } | Pi { domain, .. } | Sigma { domain, .. } => Some(domain),
            _ => None,
        }
    }

    pub fn abst_body(&self) -> Option<&Expr> {
        match self.as_ref() {
            Lambda { body, .. } | Pi { body, .. } | Sigma { body, .. } => Some(body),
            _ => None,
        }
    }

    pub fn abst_name(&self) -> Option<&Name> {
        match self.as_ref() {
            Lambda { name_hint, .. } | Pi { name_hint, .. } | Sigma { name_hint, .. } => Some(name_hint),
            _ => None,
        }
    }

    pub fn pair_parts(&self) -> Option<(&Expr, &Expr, &Expr)> {
        match self.as_ref() {
            Pair { fst, snd, ty, .. } => Some((fst, snd, ty)),
            _ => None,
        }
    }

    pub fn proj_parts(&self) -> Option<(bool, &Expr)> {
        match self.as_ref() {
            Proj { is_fst, arg, .. } => Some((*is_fst, arg)),
            _ => None,
        }
    }

    pub fn let_parts(&self) -> Option<(&Option<Expr>, &Expr, &Expr)> {
        match self.as_ref() {
            Let { ty, val, body, .. } => Some((ty, val, body)),
            _ => None,
        }
    }

    pub fn heq_parts(&self) -> Option<(&Expr, &Expr)> {
        match self.as_ref() {
            HEq { lhs, rhs, .. } => Some((lhs, rhs)),
            _ => None,
        }
    }

    pub fn metavar_name(&self) -> Option<&Name> {
        match self.as_ref() {
            MetaVar { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn metavar_pending(&self) -> Option<&[LocalEntry]> {
        match self.as_ref() {
            MetaVar { pending, .. } => Some(pending),
            _ => None,
        }
    }

    pub fn value_obj(&self) -> Option<&Arc<dyn ValueObj>> {
        match self.as_ref() {
            Value { val, .. } => Some(val),
            _ => None,
        }
    }

    /// `has_free_var(e, low, high)` — does `e` possibly contain a free
    /// variable whose index lies in `[low, high)`? Conservative: may return
    /// `true` for a term that, on exact inspection, has none (the cache only
    /// tracks a range), but never `false` for one that does.
    pub fn has_free_var(&self, low: u32, high: u32) -> bool {
        self.free_hi() > low && self.free_lo() < high
    }
}

/// Alpha-equivalence: structural equality that ignores binder name hints,
/// short-circuits on pointer equality and digest inequality, and terminates
/// on shared sub-DAGs via a visited-pairs set.
pub fn expr_eq(a: &Expr, b: &Expr) -> bool {
    let mut visited = hashbrown::HashSet::new();
    expr_eq_core(a, b, &mut visited)
}

fn expr_eq_core(a: &Expr, b: &Expr, visited: &mut hashbrown::HashSet<(usize, usize)>) -> bool {
    if a.ptr_eq(b) {
        return true;
    }
    if a.digest() != b.digest() {
        return false;
    }
    let key = (Arc::as_ptr(&a.0) as usize, Arc::as_ptr(&b.0) as usize);
    if !visited.insert(key) {
        return true;
    }
    match (a.as_ref(), b.as_ref()) {
        (Var { idx: i1, .. }, Var { idx: i2, .. }) => i1 == i2,
        (Sort { level: l1, .. }, Sort { level: l2, .. }) => l1.eq_by_antisymm(l2),
        (Const { name: n1, levels: lv1, .. }, Const { name: n2, levels: lv2, .. }) => n1 == n2 && lv1 == lv2,
        (App { fun: f1, args: a1, .. }, App { fun: f2, args: a2, .. }) => {
            a1.len() == a2.len()
                && expr_eq_core(f1, f2, visited)
                && a1.iter().zip(a2).all(|(x, y)| expr_eq_core(x, y, visited))
        }
        (Lambda { domain: d1, body: b1, .. }, Lambda { domain: d2, body: b2, .. })
        | (Pi { domain: d1, body: b1, .. }, Pi { domain: d2, body: b2, .. })
        | (Sigma { domain: d1, body: b1, .. }, Sigma { domain: d2, body: b2, .. }) => {
            expr_eq_core(d1, d2, visited) && expr_eq_core(b1, b2, visited)
        }
        (Pair { fst: f1, snd: s1, ty: t1, .. }, Pair { fst: f2, snd: s2, ty: t2, .. }) => {
            expr_eq_core(f1, f2, visited) && expr_eq_core(s1, s2, visited) && expr_eq_core(t1, t2, visited)
        }
        (Proj { is_fst: p1, arg: a1, .. }, Proj { is_fst: p2, arg: a2, .. }) => p1 == p2 && expr_eq_core(a1, a2, visited),
        (Let { ty: t1, val: v1, body: b1, .. }, Let { ty: t2, val: v2, body: b2, .. }) => {
            let ty_eq = match (t1, t2) {
                (Some(x), Some(y)) => expr_eq_core(x, y, visited),
                (None, None) => true,
                _ => false,
            };
            ty_eq && expr_eq_core(v1, v2, visited) && expr_eq_core(b1, b2, visited)
        }
        (HEq { lhs: l1, rhs: r1, .. }, HEq { lhs: l2, rhs: r2, .. }) => {
            expr_eq_core(l1, l2, visited) && expr_eq_core(r1, r2, visited)
        }
        (MetaVar { name: n1, .. }, MetaVar { name: n2, .. }) => n1 == n2,
        (Value { val: v1, .. }, Value { val: v2, .. }) => v1.value_eq(v2.as_ref()),
        _ => false,
    }
}

/// Idempotent traversal that replaces each sub-expression by its canonical
/// hash-consed twin. Since every node in this crate is only ever produced by
/// the `mk_*` constructors — which always intern — a node is already
/// maximally shared the moment it's built; this traversal exists for terms
/// that arrive from less trusted sources (e.g. rebuilt by hand from
/// `InnerExpr` fields by a future collaborator) and recovers immediately via
/// the `max_shared` bit.
pub fn max_sharing(e: &Expr) -> Expr {
    if e.is_max_shared() {
        return e.clone();
    }
    match e.as_ref() {
        Var { idx, .. } => mk_var(*idx),
        Sort { level, .. } => mk_sort(level.clone()),
        Const { name, levels, .. } => mk_const(name.clone(), levels.clone()),
        App { fun, args, .. } => {
            let fun = max_sharing(fun);
            let args = args.iter().map(max_sharing).collect();
            mk_app(fun, args)
        }
        Lambda { name_hint, domain, body, .. } => mk_lambda(name_hint.clone(), max_sharing(domain), max_sharing(body)),
        Pi { name_hint, domain, body, .. } => mk_pi(name_hint.clone(), max_sharing(domain), max_sharing(body)),
        Sigma { name_hint, domain, body, .. } => mk_sigma(name_hint.clone(), max_sharing(domain), max_sharing(body)),
        Pair { fst, snd, ty, .. } => mk_pair(max_sharing(fst), max_sharing(snd), max_sharing(ty)),
        Proj { is_fst, arg, .. } => mk_proj(*is_fst, max_sharing(arg)),
        Let { name_hint, ty, val, body, .. } => {
            mk_let(name_hint.clone(), ty.as_ref().map(max_sharing), max_sharing(val), max_sharing(body))
        }
        HEq { lhs, rhs, .. } => mk_heq(max_sharing(lhs), max_sharing(rhs)),
        MetaVar { name, pending, .. } => mk_metavar_with_pending(name.clone(), pending.clone()),
        Value { val, .. } => mk_value(val.clone()),
    }
}

impl std::fmt::Display for InnerExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Var { idx, .. } => write!(f, "#{}", idx),
            Sort { level, .. } => write!(f, "Sort {:?}", level),
            Const { name, levels, .. } => {
                if levels.is_empty() {
                    write!(f, "{:?}", name)
                } else {
                    write!(f, "{:?}.{{{:?}}}", name, levels)
                }
            }
            App { fun, args, .. } => {
                write!(f, "({}", fun)?;
                for a in args {
                    write!(f, " {}", a)?;
                }
                write!(f, ")")
            }
            Lambda { name_hint, domain, body, .. } => write!(f, "(λ {}:{}. {})", name_hint, domain, body),
            Pi { name_hint, domain, body, .. } => write!(f, "(Π {}:{}. {})", name_hint, domain, body),
            Sigma { name_hint, domain, body, .. } => write!(f, "(Σ {}:{}. {})", name_hint, domain, body),
            Pair { fst, snd, ty, .. } => write!(f, "<{}, {}> : {}", fst, snd, ty),
            Proj { is_fst, arg, .. } => write!(f, "{}.{}", arg, if *is_fst { "1" } else { "2" }),
            Let { name_hint, val, body, .. } => write!(f, "let {} := {} in {}", name_hint, val, body),
            HEq { lhs, rhs, .. } => write!(f, "{} == {}", lhs, rhs),
            MetaVar { name, pending, .. } => write!(f, "?{}[{}]", name, pending.len()),
            Value { val, .. } => write!(f, "{}", val.display()),
        }
    }
}

impl std::fmt::Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::mk_zero;

    #[test]
    fn sharing_is_maximal() {
        let a = mk_app(mk_const("f", vec![]), vec![mk_var(0)]);
        let b = mk_app(mk_const("f", vec![]), vec![mk_var(0)]);
        assert!(a.ptr_eq(&b));
    }

    #[test]
    fn name_hints_dont_affect_identity() {
        let t = mk_sort(mk_zero());
        let l1 = mk_lambda("x", t.clone(), mk_var(0));
        let l2 = mk_lambda("y", t.clone(), mk_var(0));
        assert!(l1.ptr_eq(&l2));
        assert!(expr_eq(&l1, &l2));
    }

    #[test]
    fn free_var_range_shifts_under_binder() {
        let body = mk_app(mk_var(0), vec![mk_var(1)]);
        let lam = mk_lambda("x", mk_sort(mk_zero()), body);
        // Var(1) inside the body becomes Var(0) once the binder is crossed.
        assert_eq!(lam.free_hi(), 1);
    }

    #[test]
    fn app_flattens_nested_application() {
        let f = mk_const("f", vec![]);
        let a1 = mk_app(f.clone(), vec![mk_var(0)]);
        let a2 = mk_app(a1, vec![mk_var(1)]);
        assert_eq!(a2.num_args(), 2);
        assert!(a2.app_fn().unwrap().ptr_eq(&f));
    }

    #[test]
    fn max_sharing_is_idempotent() {
        let e = mk_app(mk_const("f", vec![]), vec![mk_var(0)]);
        let once = max_sharing(&e);
        let twice = max_sharing(&once);
        assert!(once.ptr_eq(&twice));
        assert!(expr_eq(&e, &once));
    }
}
