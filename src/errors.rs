use crate::expr::Expr;
use crate::level::Level;
use crate::name::Name;

/// Structured kernel errors. Every variant carries the terms (and, where
/// relevant, the declaration name) that caused the failure rather than a
/// pre-formatted string; rendering those terms into something readable is a
/// job for an external pretty-printer, so `Display` below only gives a
/// programmer-facing rendering good enough for logs and test failures.
///
/// A flat enum, a hand-written `Display`, and `std::error::Error`
/// implemented by hand rather than via a derive macro — deliberately, since
/// structural payloads a caller can pattern-match on are the point, and a
/// derive macro wouldn't change that. `file!()`/`line!()` tagging on the
/// `Bug` variant below marks an internal invariant violation that should be
/// unreachable from any path the type checker has already validated.
pub type KernelResult<T> = Result<T, KernelErr>;

#[derive(Debug, Clone)]
pub enum KernelErr {
    /// `find_object` miss in a position where the name was required.
    UnknownName(Name),
    /// A `Level::Param` reference to a universe variable the environment
    /// never declared with `define_uvar`.
    UnknownUniverseVariable(Name),
    /// Name collision on `add_var`/`add_definition`/`define_uvar`.
    AlreadyDeclared(Name),
    /// Write attempt on a frozen (has-children) environment.
    ReadOnlyEnvironment(Name),
    /// Head of an `App` is not a `Pi` after `whnf`.
    FunctionExpected(Expr),
    /// A term used as a type does not have a `Sort` type.
    TypeExpected(Expr),
    /// Argument type is not convertible to the function's domain.
    AppTypeMismatch { expected: Expr, found: Expr },
    /// A definition's declared type is not convertible to its value's
    /// inferred type.
    DefTypeMismatch { name: Name, declared: Expr, inferred: Expr },
    /// A `Pair` component's type doesn't match the corresponding half of its
    /// `Sigma` annotation.
    PairTypeMismatch { component: Expr, expected: Expr },
    /// `MEnv::assign` would let a metavariable occur in its own assignment.
    OccursCheck { meta: Name, assignment: Expr },
    /// `MEnv::assign` would escape the metavariable's local context.
    EscapingLocal { meta: Name, assignment: Expr },
    /// Structural disagreement the unifier has no flexibility left to close.
    FailedToUnify { lhs: Expr, rhs: Expr },
    /// Unification recursion exceeded `MEnv::max_depth`.
    MaxDepthExceeded(u32),
    /// A long traversal (normalize/unify/max_sharing) exceeded its step budget.
    MaxStepsExceeded(u64),
    /// Cooperative cancellation observed via `interrupt::Interrupt`.
    Interrupted,
    /// A pretty-printer-visible but kernel-uninterpreted mismatch between two
    /// universes that cumulativity cannot bridge.
    UniverseMismatch { lhs: Level, rhs: Level },
    /// `define_uvar` would close a cycle in the universe constraint graph.
    CyclicUniverseConstraint(Name),
    /// An internal invariant was violated; this is always a kernel bug, not
    /// a malformed input, and is only reachable from code paths the type
    /// checker is supposed to rule out beforehand.
    Bug(&'static str, u32, String),
}

#[macro_export]
macro_rules! bug {
    ($msg:expr) => {
        $crate::errors::KernelErr::Bug(file!(), line!(), String::from($msg))
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::errors::KernelErr::Bug(file!(), line!(), format!($fmt, $($arg)*))
    };
}

impl std::fmt::Display for KernelErr {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            KernelErr::UnknownName(n) => write!(f, "unknown name: {:?}", n),
            KernelErr::UnknownUniverseVariable(n) => {
                write!(f, "unknown universe variable: {:?}", n)
            }
            KernelErr::AlreadyDeclared(n) => write!(f, "name already declared: {:?}", n),
            KernelErr::ReadOnlyEnvironment(n) => {
                write!(f, "cannot add {:?}: environment has live children", n)
            }
            KernelErr::FunctionExpected(e) => {
                write!(f, "function expected, found: {:?}", e)
            }
            KernelErr::TypeExpected(e) => write!(f, "type expected, found: {:?}", e),
            KernelErr::AppTypeMismatch { expected, found } => write!(
                f,
                "argument type mismatch: expected {:?}, found {:?}",
                expected, found
            ),
            KernelErr::DefTypeMismatch { name, declared, inferred } => write!(
                f,
                "definition {:?} has declared type {:?} but body has type {:?}",
                name, declared, inferred
            ),
            KernelErr::PairTypeMismatch { component, expected } => write!(
                f,
                "pair component {:?} does not match expected type {:?}",
                component, expected
            ),
            KernelErr::OccursCheck { meta, assignment } => write!(
                f,
                "occurs check failed: ?{:?} occurs in {:?}",
                meta, assignment
            ),
            KernelErr::EscapingLocal { meta, assignment } => write!(
                f,
                "assignment to ?{:?} escapes its local context: {:?}",
                meta, assignment
            ),
            KernelErr::FailedToUnify { lhs, rhs } => {
                write!(f, "failed to unify {:?} with {:?}", lhs, rhs)
            }
            KernelErr::MaxDepthExceeded(d) => {
                write!(f, "unification recursion exceeded max depth {}", d)
            }
            KernelErr::MaxStepsExceeded(n) => {
                write!(f, "traversal exceeded step budget {}", n)
            }
            KernelErr::Interrupted => write!(f, "interrupted"),
            KernelErr::UniverseMismatch { lhs, rhs } => {
                write!(f, "universe mismatch: {:?} is not <= {:?}", lhs, rhs)
            }
            KernelErr::CyclicUniverseConstraint(n) => {
                write!(f, "universe variable {:?} cannot be bound: would close a cycle", n)
            }
            KernelErr::Bug(file, line, msg) => {
                write!(f, "internal kernel error at {}:{}: {}", file, line, msg)
            }
        }
    }
}

impl std::error::Error for KernelErr {}
