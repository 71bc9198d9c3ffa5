//! Shared data model spanning the resolver, prober, planner and reconciler
//! (spec.md §3 "Backends descriptor", "Route state").

use crate::crd::Visibility;
use std::collections::HashMap;

/// Identity of the route being probed: `(namespace, longest-host)`.
pub type RouteKey = (String, String);
/// Identity of the owning Ingress; the prober's ready callback fires on this.
pub type CallbackKey = (String, String);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProbeUrl {
    pub scheme: Scheme,
    pub host: String,
    pub path: String,
}

/// Everything the prober needs to verify one rule's data-plane state
/// (spec.md §3 "Backends descriptor").
#[derive(Debug, Clone)]
pub struct Backends {
    pub key: RouteKey,
    pub callback_key: CallbackKey,
    pub version: String,
    pub http_option: crate::crd::HttpOption,
    /// URLs to probe, grouped by visibility.
    pub urls: HashMap<Visibility, Vec<ProbeUrl>>,
}

/// Concrete dial targets produced by the resolver for one subset/visibility
/// (spec.md §4.A).
#[derive(Debug, Clone)]
pub struct ProbeTarget {
    pub pod_ips: Vec<String>,
    pub port: u16,
    pub urls: Vec<ProbeUrl>,
}

/// Readiness reported back to the reconciler by `do_probes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeState {
    pub ready: bool,
}
