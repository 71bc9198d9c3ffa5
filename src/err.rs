//! Error kinds (spec.md §7 "Error handling design"), split per module
//! boundary in the teacher's `thiserror`-enum idiom (`src/err.rs`).

use kube::runtime::controller::Action;
use std::time::Duration;

/// Errors raised by the probe target resolver (spec.md §4.A).
#[derive(Debug, thiserror::Error)]
pub enum ResolverError {
    #[error("no gateway pods available for visibility")]
    NoGatewayPods,
    #[error("gateway has no status addresses")]
    NoAddresses,
    #[error(transparent)]
    Kube(#[from] kube::Error),
}

/// Errors raised by the transition planner (spec.md §4.D).
#[derive(Debug, thiserror::Error)]
pub enum PlannerError {
    #[error("two rules share the longest host {0:?}; route name would collide")]
    DuplicateRouteName(String),
    #[error("rule has no hosts")]
    NoHosts,
}

/// Errors raised by the prober's public operations (spec.md §4.B).
#[derive(Debug, thiserror::Error)]
pub enum ProberError {
    #[error(transparent)]
    Resolver(#[from] ResolverError),
}

/// Top-level reconcile error (spec.md §7's error kind taxonomy).
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("child object not found: {0}")]
    NotFound(String),
    #[error("conflict updating {0}, will retry")]
    Conflict(String),
    #[error("invalid ingress configuration: {0}")]
    InvalidConfig(String),
    #[error("required gateway {0} does not exist")]
    GatewayMissing(String),
    #[error(transparent)]
    Planner(#[from] PlannerError),
    #[error(transparent)]
    Prober(#[from] ProberError),
    #[error(transparent)]
    Resolver(#[from] ResolverError),
    #[error("resource not owned by this controller: {0}")]
    NotOwned(String),
    #[error(transparent)]
    Kube(#[from] kube::Error),
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
    #[error(transparent)]
    Finalizer(#[from] Box<kube::runtime::finalizer::Error<ReconcileError>>),
}

impl ReconcileError {
    /// Whether this error should cause a short-horizon retry (spec.md §7
    /// "transient failures re-enqueue... with exponential backoff").
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ReconcileError::NotOwned(_))
    }
}

/// Maps a reconcile error to the next `Action`, following the teacher's
/// `on_error` (`src/main.rs`) but distinguishing terminal from transient
/// failures per spec.md §7.
pub fn error_policy(err: &ReconcileError) -> Action {
    if err.is_retryable() {
        Action::requeue(Duration::from_secs(10))
    } else {
        Action::requeue(Duration::from_secs(600))
    }
}
