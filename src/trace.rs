//! Optional execution-trace recorder (`feature = "tracing-trace"`).
//!
//! A single global, insertion-ordered log of `infer`/`check`/`whnf`/`unify`/
//! `assign` calls, identified by their already-cached structural digests
//! rather than re-interning whole terms, so a test or a CLI run can replay a
//! single kernel call step by step after the fact.

use indexmap::IndexSet;
use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::name::Name;

/// One recorded kernel operation. Digests (not whole `Expr` clones) are
/// stored so that replaying a trace never itself pins hash-cons entries
/// alive past their natural lifetime.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TraceItem {
    Infer { expr_digest: u64 },
    Check { expr_digest: u64, expected_digest: u64 },
    Whnf { before_digest: u64, after_digest: u64 },
    Unify { lhs_digest: u64, rhs_digest: u64, ok: bool },
    Assign { meta: Name, assignment_digest: u64 },
    AddDefinition { name: Name },
}

static TRACE_LOG: Lazy<Mutex<IndexSet<TraceItem>>> = Lazy::new(|| Mutex::new(IndexSet::new()));

/// Appends `item` to the global trace log, deduplicating repeats.
pub fn record(item: TraceItem) {
    TRACE_LOG.lock().insert(item);
}

/// The trace log in recorded (insertion) order, for a test or CLI command to
/// replay or print.
pub fn snapshot() -> Vec<TraceItem> {
    TRACE_LOG.lock().iter().cloned().collect()
}

/// Clears the log; used between independent runs so one doesn't pollute the
/// next (tests, or successive CLI invocations within one process).
pub fn clear() {
    TRACE_LOG.lock().clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_are_insertion_ordered_and_deduped() {
        clear();
        record(TraceItem::Infer { expr_digest: 1 });
        record(TraceItem::Infer { expr_digest: 2 });
        record(TraceItem::Infer { expr_digest: 1 });
        let snap = snapshot();
        assert_eq!(snap, vec![TraceItem::Infer { expr_digest: 1 }, TraceItem::Infer { expr_digest: 2 }]);
    }
}
