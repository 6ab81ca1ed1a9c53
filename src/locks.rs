//! Access-control seam for attribute lock strings.
//!
//! The store treats lock evaluation as an opaque predicate supplied by the
//! surrounding engine; the session layer passes a requesting identity per
//! call and the evaluator decides. The built-in evaluator understands just
//! enough clause syntax for standalone use and tests; production wiring
//! injects the real engine's function through [`crate::WorldStoreBuilder`].

use std::sync::Arc;

use crate::world::EntityHandle;

/// Which side of an attribute operation a lock string is guarding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
}

impl AccessKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessKind::Read => "read",
            AccessKind::Write => "write",
        }
    }
}

/// Injected lock predicate: `(lockstring, requester, access) -> allowed`.
pub type LockEvaluator =
    Arc<dyn Fn(&str, Option<&EntityHandle>, AccessKind) -> bool + Send + Sync>;

/// The default evaluator: clause lists like `read:all();write:false()`.
///
/// Clauses are separated by `;`, each `access:funcs` with `funcs` a
/// comma-separated list that must all pass. Only the constant functions
/// `true()`/`all()` and `false()`/`none()` are understood; anything else
/// denies, and an access type with no clause is allowed.
pub fn basic_evaluator() -> LockEvaluator {
    Arc::new(eval_basic)
}

fn eval_basic(lockstring: &str, _requester: Option<&EntityHandle>, access: AccessKind) -> bool {
    for clause in lockstring.split(';') {
        let Some((kind, funcs)) = clause.split_once(':') else {
            continue;
        };
        if kind.trim() != access.as_str() {
            continue;
        }
        return funcs.split(',').all(|func| match func.trim() {
            "true()" | "all()" => true,
            // Unknown lock functions deny rather than silently allowing.
            _ => false,
        });
    }
    true
}
