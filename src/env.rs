//! The environment: a hierarchical symbol table of named objects plus a
//! universe constraint graph, with parent/child forking for speculative
//! elaboration.
//!
//! An `Arc<RwLock<_>>`-shared table keyed by `Name`, `parking_lot` for the
//! lock, in the same sharing discipline used throughout this crate. Forking
//! adds a child scope that sees everything the parent does plus whatever it
//! adds itself, and freezes the parent for as long as any child is alive; the
//! universe constraint graph lets named universe variables be declared with
//! one or more `>=` bounds relative to other variables at once, which a flat
//! per-declaration universe parameter list can't express. `is_ge` queries
//! are memoized per `(u, v)` pair rather than re-walked on every call.

use std::sync::atomic::{AtomicUsize, Ordering::Relaxed};
use std::sync::Arc;

use hashbrown::HashSet;
use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::errors::{KernelErr, KernelResult};
use crate::expr::{Expr, ValueObj};
use crate::level::Level;
use crate::name::Name;

/// A host-extensible opaque payload for `Env::Neutral` objects — notations,
/// coercions, aliases, or anything else a collaborator wants to pass through
/// the environment without the kernel interpreting it.
pub trait NeutralPayload: std::fmt::Debug + Send + Sync {
    fn kind_tag(&self) -> &str;
}

/// One universe variable's declared bounds: `this >= bounds[i].0 +
/// bounds[i].1` for every edge in the list. A variable can carry several
/// simultaneous outgoing edges (e.g. `w >= u + 1` and `w >= v + 2` both in
/// force at once); an empty list is an unconstrained (free) universe
/// variable.
#[derive(Clone, Debug)]
struct UVarNode {
    bounds: Vec<(Name, i32)>,
}

/// A named object living in an `Env`.
#[derive(Clone)]
pub enum Object {
    /// An axiom/variable: a name with a type and no value.
    Postulate { univ_params: Vec<Name>, ty: Expr },
    /// A definition with a value; `opaque` definitions are never unfolded by
    /// `normalize::whnf`'s delta rule.
    Definition { univ_params: Vec<Name>, ty: Expr, value: Expr, opaque: bool },
    /// A builtin backed by a `Value` plugin.
    Builtin { ty: Expr, value: Arc<dyn ValueObj> },
    /// An opaque, kernel-uninterpreted object.
    Neutral { payload: Arc<dyn NeutralPayload> },
}

impl std::fmt::Debug for Object {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Object::Postulate { ty, .. } => write!(f, "Postulate({:?})", ty),
            Object::Definition { ty, opaque, .. } => write!(f, "Definition({:?}, opaque={})", ty, opaque),
            Object::Builtin { ty, .. } => write!(f, "Builtin({:?})", ty),
            Object::Neutral { payload } => write!(f, "Neutral({})", payload.kind_tag()),
        }
    }
}

impl Object {
    pub fn ty(&self) -> Option<&Expr> {
        match self {
            Object::Postulate { ty, .. } | Object::Definition { ty, .. } | Object::Builtin { ty, .. } => Some(ty),
            Object::Neutral { .. } => None,
        }
    }

    pub fn univ_params(&self) -> &[Name] {
        match self {
            Object::Postulate { univ_params, .. } | Object::Definition { univ_params, .. } => univ_params,
            Object::Builtin { .. } | Object::Neutral { .. } => &[],
        }
    }
}

struct EnvCore {
    parent: Option<Env>,
    /// Number of live children forked from this environment (see
    /// [`Env::mk_child`]); doubles as the "generation counter" the spec's
    /// state machine description calls for, since it can only decrease back
    /// to zero once every child handle has actually been dropped.
    children: AtomicUsize,
    objects: IndexMap<Name, Object>,
    uvars: hashbrown::HashMap<Name, UVarNode>,
    /// `is_ge` query cache, keyed by the exact `(u, v)` pair asked for.
    /// Cleared on every `define_uvar` call on this environment (the cache
    /// only ever needs to outlive a fixed uvar set, never a mutation of it).
    ge_memo: parking_lot::Mutex<hashbrown::HashMap<(Name, Name), bool>>,
}

/// Decrements the parent's live-child count exactly once, when the last
/// handle to a forked child environment is dropped (this type is always
/// wrapped in an `Arc`, so `Drop` runs once per fork regardless of how many
/// times the child `Env` itself was cloned).
struct DropGuard {
    parent: Option<Env>,
}

impl Drop for DropGuard {
    fn drop(&mut self) {
        if let Some(p) = &self.parent {
            p.core.read().children.fetch_sub(1, Relaxed);
        }
    }
}

/// A hierarchical symbol table. Cheap to clone: clones share the same
/// underlying table via `Arc<RwLock<_>>`.
#[derive(Clone)]
pub struct Env {
    core: Arc<RwLock<EnvCore>>,
    _guard: Arc<DropGuard>,
}

impl Env {
    pub fn new() -> Self {
        Env {
            core: Arc::new(RwLock::new(EnvCore {
                parent: None,
                children: AtomicUsize::new(0),
                objects: IndexMap::with_capacity(256),
                uvars: hashbrown::HashMap::with_capacity(32),
                ge_memo: parking_lot::Mutex::new(hashbrown::HashMap::new()),
            })),
            _guard: Arc::new(DropGuard { parent: None }),
        }
    }

    /// Forks a mutable child that sees every object/universe of `self` plus
    /// whatever it adds itself. Freezes `self` for the lifetime of the
    /// child.
    pub fn mk_child(&self) -> Env {
        tracing::debug!("environment forked, freezing parent");
        self.core.read().children.fetch_add(1, Relaxed);
        let child = Env {
            core: Arc::new(RwLock::new(EnvCore {
                parent: Some(self.clone()),
                children: AtomicUsize::new(0),
                objects: IndexMap::new(),
                uvars: hashbrown::HashMap::new(),
                ge_memo: parking_lot::Mutex::new(hashbrown::HashMap::new()),
            })),
            _guard: Arc::new(DropGuard { parent: Some(self.clone()) }),
        };
        child
    }

    /// The frozen ancestor this environment was forked from, if any.
    pub fn parent(&self) -> Option<Env> {
        self.core.read().parent.clone()
    }

    pub fn has_children(&self) -> bool {
        self.core.read().children.load(Relaxed) > 0
    }

    fn require_mutable(&self, offending: &Name) -> KernelResult<()> {
        if self.has_children() {
            Err(KernelErr::ReadOnlyEnvironment(offending.clone()))
        } else {
            Ok(())
        }
    }

    /// Walks child -> parent, returning the first object found under `name`.
    pub fn find_object(&self, name: &Name) -> Option<Object> {
        let core = self.core.read();
        if let Some(obj) = core.objects.get(name) {
            return Some(obj.clone());
        }
        match &core.parent {
            Some(p) => p.find_object(name),
            None => None,
        }
    }

    fn name_declared_anywhere(&self, name: &Name) -> bool {
        self.find_object(name).is_some() || self.find_uvar(name).is_some()
    }

    /// Registers a fresh axiom/variable after checking that `ty` itself is a
    /// well-formed type in the top-level (empty) context.
    pub fn add_var(&self, name: Name, univ_params: Vec<Name>, ty: Expr) -> KernelResult<()> {
        self.require_mutable(&name)?;
        if self.name_declared_anywhere(&name) {
            return Err(KernelErr::AlreadyDeclared(name));
        }
        crate::tc::infer_universe_of_type(&ty, self, None, &[])?;
        tracing::trace!(name = ?name, "postulate added");
        self.core.write().objects.insert(name, Object::Postulate { univ_params, ty });
        Ok(())
    }

    /// Registers a definition after checking that `ty` is a type and `value`
    /// checks against it.
    pub fn add_definition(&self, name: Name, univ_params: Vec<Name>, ty: Expr, value: Expr, opaque: bool) -> KernelResult<()> {
        self.require_mutable(&name)?;
        if self.name_declared_anywhere(&name) {
            tracing::debug!(name = ?name, "add_definition: already declared");
            return Err(KernelErr::AlreadyDeclared(name));
        }
        crate::tc::infer_universe_of_type(&ty, self, None, &[])?;
        let inferred = crate::tc::infer_type(&value, self, None, &[])?;
        if !crate::normalize::is_convertible(&ty, &inferred, self, None)? {
            tracing::warn!(name = ?name, "add_definition: declared type not convertible to inferred type");
            return Err(KernelErr::DefTypeMismatch { name, declared: ty, inferred });
        }
        #[cfg(feature = "tracing-trace")]
        crate::trace::record(crate::trace::TraceItem::AddDefinition { name: name.clone() });
        tracing::info!(name = ?name, opaque, "definition added");
        self.core.write().objects.insert(name, Object::Definition { univ_params, ty, value, opaque });
        Ok(())
    }

    pub fn add_builtin(&self, name: Name, ty: Expr, value: Arc<dyn ValueObj>) -> KernelResult<()> {
        self.require_mutable(&name)?;
        if self.name_declared_anywhere(&name) {
            return Err(KernelErr::AlreadyDeclared(name));
        }
        self.core.write().objects.insert(name, Object::Builtin { ty, value });
        Ok(())
    }

    pub fn add_neutral(&self, name: Name, payload: Arc<dyn NeutralPayload>) -> KernelResult<()> {
        self.require_mutable(&name)?;
        if self.name_declared_anywhere(&name) {
            return Err(KernelErr::AlreadyDeclared(name));
        }
        self.core.write().objects.insert(name, Object::Neutral { payload });
        Ok(())
    }

    fn find_uvar(&self, name: &Name) -> Option<UVarNode> {
        let core = self.core.read();
        if let Some(n) = core.uvars.get(name) {
            return Some(n.clone());
        }
        match &core.parent {
            Some(p) => p.find_uvar(name),
            None => None,
        }
    }

    /// Declares a universe variable with zero or more simultaneous bounds
    /// `this >= bounds[i].0 + bounds[i].1`. Rejects any bound that would
    /// close a cycle in the constraint graph: since `name` is brand new here
    /// (redeclaration is already rejected above), the only way a bound can
    /// cycle back to it is a direct or indirect self-reference among the
    /// bounds being declared in this same call.
    pub fn define_uvar(&self, name: Name, bounds: Vec<(Name, i32)>) -> KernelResult<()> {
        self.require_mutable(&name)?;
        if self.name_declared_anywhere(&name) {
            return Err(KernelErr::AlreadyDeclared(name));
        }
        for (target, _) in &bounds {
            if target == &name || self.uvar_chain_reaches(target, &name) {
                return Err(KernelErr::CyclicUniverseConstraint(name));
            }
        }
        self.core.write().uvars.insert(name, UVarNode { bounds });
        self.core.read().ge_memo.lock().clear();
        Ok(())
    }

    /// Plain reachability (ignoring edge offsets) over every outgoing edge of
    /// every node, used only for the cycle check above.
    fn uvar_chain_reaches(&self, start: &Name, target: &Name) -> bool {
        if start == target {
            return true;
        }
        let mut visited = HashSet::new();
        self.reaches_dfs(start, target, &mut visited)
    }

    fn reaches_dfs(&self, cur: &Name, target: &Name, visited: &mut HashSet<Name>) -> bool {
        if cur == target {
            return true;
        }
        if !visited.insert(cur.clone()) {
            return false;
        }
        match self.find_uvar(cur) {
            Some(node) => node.bounds.iter().any(|(next, _)| self.reaches_dfs(next, target, visited)),
            None => false,
        }
    }

    /// `u >= v` in the universe constraint graph: does some directed path
    /// from `u` to `v`, following any of the (possibly several) outgoing
    /// edges at each node, carry a non-negative total accumulated offset?
    /// The graph is acyclic (enforced by `define_uvar`), so this is a DAG
    /// reachability query; `best` tracks the largest offset reached at each
    /// node so far so a node already explored with an equal-or-better offset
    /// is never re-expanded, giving O(V+E) work per query. Results are
    /// memoized per `(u, v)` pair in `ge_memo`, invalidated whenever this
    /// environment declares a new universe variable.
    pub fn is_ge(&self, u: &Name, v: &Name) -> bool {
        if u == v {
            return true;
        }
        let key = (u.clone(), v.clone());
        if let Some(&cached) = self.core.read().ge_memo.lock().get(&key) {
            return cached;
        }
        let mut best = hashbrown::HashMap::new();
        let result = self.dfs_ge(u, 0, v, &mut best);
        self.core.read().ge_memo.lock().insert(key, result);
        result
    }

    fn dfs_ge(&self, cur: &Name, acc: i64, target: &Name, best: &mut hashbrown::HashMap<Name, i64>) -> bool {
        if cur == target && acc >= 0 {
            return true;
        }
        if let Some(&prev) = best.get(cur) {
            if prev >= acc {
                return false;
            }
        }
        best.insert(cur.clone(), acc);
        match self.find_uvar(cur) {
            Some(node) => node.bounds.iter().any(|(next, k)| self.dfs_ge(next, acc + *k as i64, target, best)),
            None => false,
        }
    }

    /// Declaration objects in insertion order, scoped to this one level (not
    /// including the parent chain's); callers that want the full chain walk
    /// `parent()`.
    pub fn iter_objects(&self) -> Vec<(Name, Object)> {
        self.core.read().objects.iter().map(|(n, o)| (n.clone(), o.clone())).collect()
    }

    pub fn num_objects(&self) -> usize {
        self.core.read().objects.len()
    }
}

impl Default for Env {
    fn default() -> Self {
        Env::new()
    }
}

/// Convenience for cumulativity: `Sort(u) <= Sort(v)`, resolving
/// `Level::Param` names through `is_ge` when both sides are plain params;
/// falls back to `Level::leq` for the level algebra itself (`Zero`/`Succ`/
/// `Max` reasoning that doesn't touch named environment universes).
pub fn sort_leq(env: &Env, lo: &Level, hi: &Level) -> bool {
    if lo.leq(hi) {
        return true;
    }
    if let (true, true) = (lo.is_param(), hi.is_param()) {
        return env.is_ge(hi.get_param_name(), lo.get_param_name());
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::mk_sort;
    use crate::level::mk_zero;

    #[test]
    fn child_freezes_parent() {
        let env = Env::new();
        let child = env.mk_child();
        assert!(env.has_children());
        let res = env.add_var(Name::from("x"), vec![], mk_sort(mk_zero()));
        assert!(matches!(res, Err(KernelErr::ReadOnlyEnvironment(_))));
        drop(child);
        assert!(!env.has_children());
        assert!(env.add_var(Name::from("x"), vec![], mk_sort(mk_zero())).is_ok());
    }

    #[test]
    fn child_sees_parent_objects() {
        let env = Env::new();
        env.add_var(Name::from("x"), vec![], mk_sort(mk_zero())).unwrap();
        let child = env.mk_child();
        assert!(child.find_object(&Name::from("x")).is_some());
    }

    #[test]
    fn redeclare_fails() {
        let env = Env::new();
        env.add_var(Name::from("x"), vec![], mk_sort(mk_zero())).unwrap();
        let res = env.add_var(Name::from("x"), vec![], mk_sort(mk_zero()));
        assert!(matches!(res, Err(KernelErr::AlreadyDeclared(_))));
    }

    #[test]
    fn universe_chain_is_ge() {
        let env = Env::new();
        env.define_uvar(Name::from("u"), vec![]).unwrap();
        env.define_uvar(Name::from("w"), vec![(Name::from("u"), 1)]).unwrap();
        assert!(env.is_ge(&Name::from("w"), &Name::from("u")));
        assert!(!env.is_ge(&Name::from("u"), &Name::from("w")));
    }

    #[test]
    fn cyclic_universe_bound_rejected() {
        let env = Env::new();
        env.define_uvar(Name::from("u"), vec![]).unwrap();
        env.define_uvar(Name::from("w"), vec![(Name::from("u"), 1)]).unwrap();
        let res = env.define_uvar(Name::from("u2"), vec![(Name::from("w"), 0)]);
        assert!(res.is_ok());
        // Attempting to redefine u's bound to point back through w would cycle;
        // redeclaration itself is rejected before the cycle check even runs.
        assert!(env.define_uvar(Name::from("u"), vec![(Name::from("w"), 0)]).is_err());
    }

    #[test]
    fn uvar_can_carry_multiple_simultaneous_bounds() {
        let env = Env::new();
        env.define_uvar(Name::from("u"), vec![]).unwrap();
        env.define_uvar(Name::from("v"), vec![]).unwrap();
        env.define_uvar(Name::from("w"), vec![(Name::from("u"), 1), (Name::from("v"), 2)]).unwrap();
        assert!(env.is_ge(&Name::from("w"), &Name::from("u")));
        assert!(env.is_ge(&Name::from("w"), &Name::from("v")));
        assert!(!env.is_ge(&Name::from("u"), &Name::from("w")));
        assert!(!env.is_ge(&Name::from("v"), &Name::from("u")));
    }

    #[test]
    fn is_ge_memo_survives_unrelated_queries() {
        let env = Env::new();
        env.define_uvar(Name::from("u"), vec![]).unwrap();
        env.define_uvar(Name::from("w"), vec![(Name::from("u"), 0)]).unwrap();
        assert!(env.is_ge(&Name::from("w"), &Name::from("u")));
        // Re-querying the same pair exercises the memo cache path, not just
        // the first (cold) DFS.
        assert!(env.is_ge(&Name::from("w"), &Name::from("u")));
        env.define_uvar(Name::from("z"), vec![]).unwrap();
        // Declaring an unrelated uvar clears the memo; the cached answer must
        // still be recomputed correctly rather than going stale.
        assert!(env.is_ge(&Name::from("w"), &Name::from("u")));
    }
}
