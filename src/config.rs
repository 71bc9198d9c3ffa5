//! Typed configuration snapshot (spec.md §6 "Configuration").
//!
//! Loading this from a cluster ConfigMap with hot-reload is an external
//! collaborator per spec.md §1; here it is assembled once at process start
//! from CLI/env, matching the teacher's `Context::new()`.

use crate::crd::Visibility;
use std::collections::HashSet;

#[derive(Debug, Clone, Default)]
pub struct ObjectRef {
    pub namespace: String,
    pub name: String,
}

#[derive(Debug, Clone, Default)]
pub struct VisibilityConfig {
    /// Service-backed gateway: resolve endpoints through this Service.
    pub service: Option<ObjectRef>,
    /// Gateway object this visibility's routes parent to.
    pub gateway: ObjectRef,
    pub http_listener_name: Option<String>,
    pub supported_features: HashSet<String>,
}

#[derive(Debug, Clone, Default)]
pub struct GatewayConfig {
    pub external: VisibilityConfig,
    pub local: VisibilityConfig,
}

impl GatewayConfig {
    pub fn for_visibility(&self, visibility: Visibility) -> &VisibilityConfig {
        match visibility {
            Visibility::External => &self.external,
            Visibility::ClusterLocal => &self.local,
        }
    }

    pub fn external_gateway(&self) -> &ObjectRef {
        &self.external.gateway
    }

    pub fn local_gateway(&self) -> &ObjectRef {
        &self.local.gateway
    }

    pub fn supports_feature(&self, visibility: Visibility, feature: &str) -> bool {
        self.for_visibility(visibility)
            .supported_features
            .contains(feature)
    }
}

/// Capability name for the zero-timeout hint filter (spec.md §4.C).
pub const FEATURE_ZERO_TIMEOUT: &str = "zero-timeout";
