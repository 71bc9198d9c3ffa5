//! The Knative `Ingress` custom resource (spec.md §3 "Ingress (input, external)").
//!
//! This is intentionally a different shape from core `networking.k8s.io/v1
//! Ingress`: hosts are grouped into rules with a visibility and an HTTP
//! option, paths carry header matches and weighted splits rather than a
//! single backend.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[kube(
    group = "networking.knative.dev",
    version = "v1alpha1",
    kind = "Ingress",
    plural = "ingresses",
    namespaced,
    status = "IngressStatus",
    derive = "PartialEq"
)]
pub struct IngressSpec {
    #[serde(default)]
    pub rules: Vec<IngressRule>,
    #[serde(default)]
    pub tls: Vec<IngressTLS>,
    /// If set, the rules are applied even if the revisions have not yet
    /// been observed ready. Mirrors upstream's `HTTPOption` carve-out for
    /// internal-only traffic during activation; not otherwise load-bearing
    /// for this core.
    #[serde(default)]
    pub http_option: Option<HttpOption>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "PascalCase")]
pub enum Visibility {
    #[default]
    External,
    ClusterLocal,
}

impl Visibility {
    pub fn label_value(self) -> &'static str {
        match self {
            Visibility::External => "",
            Visibility::ClusterLocal => crate::consts::VISIBILITY_LABEL_CLUSTER_LOCAL,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum HttpOption {
    #[default]
    Enabled,
    Redirected,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
pub struct IngressRule {
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub http_option: HttpOption,
    #[serde(default)]
    pub paths: Vec<HttpIngressPath>,
}

impl IngressRule {
    /// Lexicographically-largest host; route identity is stable across
    /// permutations of `hosts` (spec.md §8 "Route-name determinism").
    pub fn primary_host(&self) -> Option<&str> {
        self.hosts.iter().map(String::as_str).max()
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
pub struct HttpIngressPath {
    /// Defaults to "/" when unset.
    #[serde(default)]
    pub path_prefix: Option<String>,
    #[serde(default)]
    pub header_exact_matches: BTreeMap<String, String>,
    #[serde(default)]
    pub splits: Vec<IngressBackendSplit>,
    #[serde(default)]
    pub append_headers: BTreeMap<String, String>,
    #[serde(default)]
    pub rewrite_host: Option<String>,
}

impl HttpIngressPath {
    pub fn path_prefix_or_default(&self) -> &str {
        self.path_prefix.as_deref().filter(|p| !p.is_empty()).unwrap_or("/")
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
pub struct IngressBackendSplit {
    pub service_namespace: String,
    pub service_name: String,
    pub service_port: i32,
    /// 0..=100, must sum to 100 across splits in one path.
    pub weight_percent: i32,
    #[serde(default)]
    pub append_headers: BTreeMap<String, String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
pub struct IngressTLS {
    #[serde(default)]
    pub hosts: Vec<String>,
    pub secret_namespace: String,
    pub secret_name: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
pub struct IngressStatus {
    #[serde(default)]
    pub conditions: Vec<IngressCondition>,
    #[serde(default)]
    pub public_load_balancer: Vec<LoadBalancerIngress>,
    #[serde(default)]
    pub private_load_balancer: Vec<LoadBalancerIngress>,
    /// Observed generation, standard controller convergence bookkeeping.
    #[serde(default)]
    pub observed_generation: Option<i64>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
pub struct IngressCondition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
pub struct LoadBalancerIngress {
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
}

/// Condition type names (spec.md §7 "User-visible conditions").
pub mod condition_types {
    pub const NETWORK_CONFIGURED: &str = "NetworkConfigured";
    pub const LOAD_BALANCER_READY: &str = "LoadBalancerReady";
    pub const READY: &str = "Ready";
}
