//! The prober's shared registry: `{routes, pod_contexts}` guarded by one
//! read/write lock (spec.md §5 "Shared resources").

use super::state::RouteState;
use crate::model::{CallbackKey, RouteKey};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
pub struct Registry {
    routes: RwLock<HashMap<RouteKey, Arc<RouteState>>>,
    /// Process-wide cache of pod IP contexts, shared across ingresses
    /// (spec.md §9 "Global cache of pod IP contexts").
    ip_contexts: RwLock<HashMap<String, CancellationToken>>,
}

impl Registry {
    pub fn get(&self, key: &RouteKey) -> Option<Arc<RouteState>> {
        self.routes.read().unwrap().get(key).cloned()
    }

    /// Removes and cancels the existing entry for `key` if its version
    /// differs from `version`. Returns `Some` if an existing entry for
    /// `key` at the *same* version was found (caller should short-circuit).
    pub fn take_if_stale(&self, key: &RouteKey, version: &str) -> Option<Arc<RouteState>> {
        let mut routes = self.routes.write().unwrap();
        match routes.get(key) {
            Some(existing) if existing.version == version => Some(existing.clone()),
            Some(existing) => {
                existing.cancel();
                routes.remove(key);
                None
            }
            None => None,
        }
    }

    /// Installs a freshly built route_state. Must happen before any of its
    /// work items can complete (spec.md §9 "write-before-enqueue").
    pub fn insert(&self, route: Arc<RouteState>) {
        self.routes.write().unwrap().insert(route.key.clone(), route);
    }

    pub fn get_or_create_ip_token(&self, ip: &str) -> CancellationToken {
        if let Some(token) = self.ip_contexts.read().unwrap().get(ip) {
            return token.clone();
        }
        let mut contexts = self.ip_contexts.write().unwrap();
        contexts
            .entry(ip.to_string())
            .or_default()
            .clone()
    }

    /// Cancels and evicts the IP context for `ip`. A later `do_probes` call
    /// lazily recreates it (spec.md §9).
    pub fn cancel_ip(&self, ip: &str) -> Option<CancellationToken> {
        let mut contexts = self.ip_contexts.write().unwrap();
        if let Some(token) = contexts.remove(ip) {
            token.cancel();
            Some(token)
        } else {
            None
        }
    }

    pub fn cancel_callback_key(&self, callback_key: &CallbackKey) {
        let mut routes = self.routes.write().unwrap();
        let stale: Vec<RouteKey> = routes
            .iter()
            .filter(|(_, r)| &r.callback_key == callback_key)
            .map(|(k, _)| k.clone())
            .collect();
        for key in stale {
            if let Some(route) = routes.remove(&key) {
                route.cancel();
            }
        }
    }
}
