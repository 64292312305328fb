//! Condition evaluation.
//!
//! A [`Condition`] tests one resolved value; a [`Gate`] combines an
//! operation's conditions with AND/OR. [`PruneRule`] reuses gates to decide
//! which array elements `prune_objects` removes.

mod condition;
mod gate;

pub use condition::Condition;
pub use gate::{Gate, PruneRule};

use crate::context::EvalScope;

/// Trait for predicates over a request.
pub trait Matcher: Send + Sync {
    /// Check if this matcher matches the given scope. Never fails: absent
    /// or mistyped values simply do not match.
    fn matches(&self, scope: &EvalScope<'_>) -> bool;

    /// Get the matcher name for debugging.
    fn name(&self) -> &'static str;
}

/// Errors that can occur during matcher compilation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MatcherError {
    #[error("conditions[{index}] is missing `path`")]
    MissingPath { index: usize },

    #[error("invalid prune rule: {0}")]
    InvalidPruneRule(String),
}
