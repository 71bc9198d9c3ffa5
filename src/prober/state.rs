//! Route/pod/work-item state (spec.md §3 "Route state (prober-owned)").

use crate::model::{CallbackKey, ProbeUrl, RouteKey};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Owned exclusively by the prober's registry. `pending_count` is the
/// number of pods with at least one outstanding URL probe.
pub struct RouteState {
    pub key: RouteKey,
    pub callback_key: CallbackKey,
    pub version: String,
    pub pending_count: AtomicUsize,
    pub last_accessed: Mutex<Instant>,
    pub cancel_token: CancellationToken,
}

impl RouteState {
    pub fn new(key: RouteKey, callback_key: CallbackKey, version: String) -> Self {
        Self {
            key,
            callback_key,
            version,
            pending_count: AtomicUsize::new(0),
            last_accessed: Mutex::new(Instant::now()),
            cancel_token: CancellationToken::new(),
        }
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    pub fn touch(&self) {
        *self.last_accessed.lock().unwrap() = Instant::now();
    }

    pub fn is_ready(&self) -> bool {
        self.pending_count.load(Ordering::Acquire) == 0
    }
}

/// Owned by exactly one `RouteState`; referenced by its `WorkItem`s.
/// `pending_count` is the number of URL probes still outstanding for this
/// `(route, pod)` pair.
pub struct PodState {
    pub pending_count: AtomicUsize,
    finished: AtomicBool,
    pub cancel_token: CancellationToken,
}

impl PodState {
    pub fn new(cancel_token: CancellationToken) -> Self {
        Self {
            pending_count: AtomicUsize::new(0),
            finished: AtomicBool::new(false),
            cancel_token,
        }
    }

    /// Drives this pod to a terminal state exactly once, returning `true`
    /// the first time it is called (spec.md §8 "on_success invoked exactly
    /// once per successful completion" and the CAS cancellation semantics
    /// of §5).
    pub fn finish_once(&self) -> bool {
        self.finished
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Owned by the work queue while enqueued, by a worker while processing.
#[derive(Clone)]
pub struct WorkItem {
    pub route: std::sync::Arc<RouteState>,
    pub pod: std::sync::Arc<PodState>,
    pub url: ProbeUrl,
    pub pod_ip: String,
    pub pod_port: u16,
    pub attempt: u32,
}
