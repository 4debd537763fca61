//! `MEnv`: union-find over metavariables, with per-metavariable contexts,
//! deferred assignment, and `instantiate_metavars` to eagerly substitute
//! resolved ones back into a term.
//!
//! Each metavariable is a union-find cell with rank-based merging and path
//! compression, carrying its own local context and target type the way a
//! goal would in an elaborator (see DESIGN.md).

use std::cell::RefCell;

use hashbrown::{HashMap, HashSet};

use crate::env::Env;
use crate::errors::{KernelErr, KernelResult};
use crate::expr::{Expr, InnerExpr, LocalEntry};
use crate::interrupt::Interrupt;
use crate::name::Name;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetaState {
    Unprocessed,
    Processing,
    Processed,
}

struct Cell {
    name: Name,
    /// The binders visible at this metavariable's introduction site, in the
    /// same push-order convention `tc::Ctx` uses (last entry = `Var(0)`'s
    /// domain).
    ctx: Vec<Expr>,
    /// The type this metavariable's eventual assignment must have, expressed
    /// in terms of `ctx`: a metavariable carries a context *and* a target
    /// type, the same way a type-checking goal does.
    ty: Expr,
    find: usize,
    rank: u32,
    state: MetaState,
    expr: Option<Expr>,
}

/// The metavariable environment. Interior mutability (a `RefCell`-guarded
/// arena) lets `root`/`assign` path-compress and record assignments through a
/// shared `&MEnv`, while presenting the read-mostly API `normalize.rs`/`tc.rs`
/// need from an `Option<&MEnv>`.
pub struct MEnv {
    env: Env,
    cells: RefCell<Vec<Cell>>,
    index: RefCell<HashMap<Name, usize>>,
    next_id: RefCell<u64>,
    unfoldable: Option<HashSet<Name>>,
    max_depth: u32,
    interrupt: Interrupt,
}

impl MEnv {
    pub fn new_menv(env: Env, unfoldable: Option<HashSet<Name>>, max_depth: u32) -> Self {
        MEnv {
            env,
            cells: RefCell::new(Vec::new()),
            index: RefCell::new(HashMap::new()),
            next_id: RefCell::new(0),
            unfoldable,
            max_depth,
            interrupt: Interrupt::new(1_000_000),
        }
    }

    pub fn env(&self) -> &Env {
        &self.env
    }

    pub fn interrupt(&self) -> &Interrupt {
        &self.interrupt
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    pub fn is_unfoldable(&self, name: &Name) -> bool {
        match &self.unfoldable {
            Some(set) => set.contains(name),
            None => true,
        }
    }

    /// Allocates a fresh metavariable with the given local context and
    /// target type, and returns the term-level occurrence for it.
    pub fn mk_metavar(&self, ctx: Vec<Expr>, ty: Expr) -> Expr {
        let mut next_id = self.next_id.borrow_mut();
        let id = *next_id;
        *next_id += 1;
        let name = crate::name::mk_anon().extend_str("m").extend_num(id);
        let idx = {
            let mut cells = self.cells.borrow_mut();
            let idx = cells.len();
            cells.push(Cell { name: name.clone(), ctx, ty, find: idx, rank: 0, state: MetaState::Unprocessed, expr: None });
            idx
        };
        self.index.borrow_mut().insert(name.clone(), idx);
        crate::expr::mk_metavar(name)
    }

    fn id_of(&self, name: &Name) -> usize {
        *self.index.borrow().get(name).unwrap_or_else(|| panic!("unknown metavariable {:?}", name))
    }

    fn root_idx(&self, name: &Name) -> usize {
        let start = self.id_of(name);
        let mut cells = self.cells.borrow_mut();
        let mut cur = start;
        while cells[cur].find != cur {
            let grandparent = cells[cells[cur].find].find;
            cells[cur].find = grandparent;
            cur = grandparent;
        }
        cur
    }

    /// The canonical representative metavariable of `name`'s union-find
    /// class.
    pub fn root(&self, name: &Name) -> Name {
        let idx = self.root_idx(name);
        self.cells.borrow()[idx].name.clone()
    }

    pub fn ctx_of(&self, name: &Name) -> Vec<Expr> {
        let idx = self.root_idx(name);
        self.cells.borrow()[idx].ctx.clone()
    }

    pub fn ty_of(&self, name: &Name) -> Expr {
        let idx = self.root_idx(name);
        self.cells.borrow()[idx].ty.clone()
    }

    pub fn is_assigned(&self, name: &Name) -> bool {
        let idx = self.root_idx(name);
        self.cells.borrow()[idx].expr.is_some()
    }

    pub fn lookup_assignment(&self, name: &Name) -> Option<Expr> {
        let idx = self.root_idx(name);
        self.cells.borrow()[idx].expr.clone()
    }

    pub fn state(&self, name: &Name) -> MetaState {
        let idx = self.root_idx(name);
        self.cells.borrow()[idx].state
    }

    /// Merges two unassigned metavariable classes by rank, with the
    /// deeper-context root winning ties toward the shallower one being
    /// assignable into.
    pub fn union(&self, a: &Name, b: &Name) {
        let ia = self.root_idx(a);
        let ib = self.root_idx(b);
        if ia == ib {
            return;
        }
        let mut cells = self.cells.borrow_mut();
        let (deeper, shallower) = if cells[ia].ctx.len() >= cells[ib].ctx.len() { (ia, ib) } else { (ib, ia) };
        if cells[deeper].rank > cells[shallower].rank {
            cells[shallower].find = deeper;
        } else {
            cells[deeper].find = shallower;
            if cells[deeper].rank == cells[shallower].rank {
                cells[shallower].rank += 1;
            }
        }
    }

    /// Assigns `s` to (the root of) `?m`, after an occurs check and a
    /// context-escape check.
    pub fn assign(&self, m: &Name, s: &Expr) -> KernelResult<()> {
        let ridx = self.root_idx(m);
        let root_name = self.cells.borrow()[ridx].name.clone();
        let resolved = self.instantiate_metavars(s);
        if self.occurs(&root_name, &resolved) {
            return Err(KernelErr::OccursCheck { meta: root_name, assignment: resolved });
        }
        let ctx_len = self.cells.borrow()[ridx].ctx.len() as u32;
        if !resolved.closed_below(ctx_len) {
            return Err(KernelErr::EscapingLocal { meta: root_name, assignment: resolved });
        }
        tracing::debug!(meta = ?root_name, "metavariable assigned");
        #[cfg(feature = "tracing-trace")]
        crate::trace::record(crate::trace::TraceItem::Assign {
            meta: root_name.clone(),
            assignment_digest: resolved.digest(),
        });
        let mut cells = self.cells.borrow_mut();
        cells[ridx].expr = Some(resolved);
        cells[ridx].state = MetaState::Processed;
        Ok(())
    }

    fn occurs(&self, root_name: &Name, e: &Expr) -> bool {
        if !e.has_metavar() {
            return false;
        }
        use InnerExpr::*;
        match e.as_ref() {
            Var { .. } | Sort { .. } | Const { .. } | Value { .. } => false,
            MetaVar { name, pending, .. } => {
                if &self.root(name) == root_name {
                    return true;
                }
                pending.iter().any(|p| match p {
                    LocalEntry::Inst { replacements, .. } => replacements.iter().any(|r| self.occurs(root_name, r)),
                    LocalEntry::Lift { .. } => false,
                })
            }
            App { fun, args, .. } => self.occurs(root_name, fun) || args.iter().any(|a| self.occurs(root_name, a)),
            Lambda { domain, body, .. } | Pi { domain, body, .. } | Sigma { domain, body, .. } => {
                self.occurs(root_name, domain) || self.occurs(root_name, body)
            }
            Pair { fst, snd, ty, .. } => self.occurs(root_name, fst) || self.occurs(root_name, snd) || self.occurs(root_name, ty),
            Proj { arg, .. } => self.occurs(root_name, arg),
            Let { ty, val, body, .. } => ty.as_ref().map(|t| self.occurs(root_name, t)).unwrap_or(false) || self.occurs(root_name, val) || self.occurs(root_name, body),
            HEq { lhs, rhs, .. } => self.occurs(root_name, lhs) || self.occurs(root_name, rhs),
        }
    }

    /// Pure traversal replacing every assigned metavariable occurrence by
    /// its value, with the occurrence's pending `LocalEntry` list applied.
    /// Does not mutate `self`.
    pub fn instantiate_metavars(&self, e: &Expr) -> Expr {
        if !e.has_metavar() {
            return e.clone();
        }
        use InnerExpr::*;
        match e.as_ref() {
            Var { .. } | Sort { .. } | Const { .. } | Value { .. } => e.clone(),
            MetaVar { name, pending, .. } => match self.lookup_assignment(name) {
                Some(assigned) => {
                    let resolved = self.instantiate_metavars(&assigned);
                    apply_pending(&resolved, pending)
                }
                None => {
                    let canonical = self.root(name);
                    let new_pending: Vec<LocalEntry> = pending
                        .iter()
                        .map(|p| match p {
                            LocalEntry::Lift { start, offset } => LocalEntry::Lift { start: *start, offset: *offset },
                            LocalEntry::Inst { start, replacements } => LocalEntry::Inst {
                                start: *start,
                                replacements: replacements.iter().map(|r| self.instantiate_metavars(r)).collect(),
                            },
                        })
                        .collect();
                    crate::expr::mk_metavar_with_pending(canonical, new_pending)
                }
            },
            App { fun, args, .. } => crate::expr::mk_app(
                self.instantiate_metavars(fun),
                args.iter().map(|a| self.instantiate_metavars(a)).collect(),
            ),
            Lambda { name_hint, domain, body, .. } => {
                crate::expr::mk_lambda(name_hint.clone(), self.instantiate_metavars(domain), self.instantiate_metavars(body))
            }
            Pi { name_hint, domain, body, .. } => {
                crate::expr::mk_pi(name_hint.clone(), self.instantiate_metavars(domain), self.instantiate_metavars(body))
            }
            Sigma { name_hint, domain, body, .. } => {
                crate::expr::mk_sigma(name_hint.clone(), self.instantiate_metavars(domain), self.instantiate_metavars(body))
            }
            Pair { fst, snd, ty, .. } => {
                crate::expr::mk_pair(self.instantiate_metavars(fst), self.instantiate_metavars(snd), self.instantiate_metavars(ty))
            }
            Proj { is_fst, arg, .. } => crate::expr::mk_proj(*is_fst, self.instantiate_metavars(arg)),
            Let { name_hint, ty, val, body, .. } => crate::expr::mk_let(
                name_hint.clone(),
                ty.as_ref().map(|t| self.instantiate_metavars(t)),
                self.instantiate_metavars(val),
                self.instantiate_metavars(body),
            ),
            HEq { lhs, rhs, .. } => crate::expr::mk_heq(self.instantiate_metavars(lhs), self.instantiate_metavars(rhs)),
        }
    }
}

/// Applies a metavariable occurrence's pending `Lift`/`Inst` entries to its
/// (already-resolved) assignment, right-to-left: entries accumulate
/// outermost-first as `lift`/`instantiate` descend past a metavariable, so
/// the innermost — last-pushed — entry is the one that actually applies
/// closest to the occurrence and must run first.
pub fn apply_pending(base: &Expr, pending: &[LocalEntry]) -> Expr {
    let mut cur = base.clone();
    for entry in pending.iter().rev() {
        cur = match entry {
            LocalEntry::Lift { start, offset } => crate::subst::lift(&cur, *start, *offset),
            LocalEntry::Inst { start, replacements } => crate::subst::instantiate(&cur, *start, replacements),
        };
    }
    cur
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{mk_app, mk_const, mk_sort, mk_var};
    use crate::level::mk_zero;

    #[test]
    fn occurs_check_rejects_self_reference() {
        let env = Env::new();
        let menv = MEnv::new_menv(env, None, 64);
        let m = menv.mk_metavar(vec![mk_sort(mk_zero())], mk_sort(mk_zero()));
        let name = m.metavar_name().unwrap().clone();
        let self_app = mk_app(mk_const("plus", vec![]), vec![m.clone(), mk_var(0)]);
        let res = menv.assign(&name, &self_app);
        assert!(matches!(res, Err(KernelErr::OccursCheck { .. })));
    }

    #[test]
    fn assign_then_instantiate_round_trips() {
        let env = Env::new();
        let menv = MEnv::new_menv(env, None, 64);
        let m = menv.mk_metavar(vec![mk_sort(mk_zero())], mk_const("Int", vec![]));
        let name = m.metavar_name().unwrap().clone();
        let target = mk_const("a", vec![]);
        menv.assign(&name, &target).unwrap();
        let resolved = menv.instantiate_metavars(&m);
        assert!(resolved.ptr_eq(&target));
    }
}
