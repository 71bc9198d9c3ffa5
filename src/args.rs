#[derive(clap::Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
/// Knative Ingress to Gateway API controller.
///
/// Watches `networking.knative.dev/v1alpha1 Ingress` objects and
/// reconciles them into Gateway API `HTTPRoute`s, probing new backends
/// before cutting traffic over to them.
pub struct Args {
    /// Namespace of the external-visibility Gateway.
    #[arg(long, env = "GW_EXTERNAL_NAMESPACE")]
    pub external_gateway_namespace: String,

    /// Name of the external-visibility Gateway.
    #[arg(long, env = "GW_EXTERNAL_NAME")]
    pub external_gateway_name: String,

    /// Namespace of the external-visibility gateway's backing Service, if
    /// probing should resolve endpoints through a Service rather than the
    /// Gateway's own status addresses.
    #[arg(long, env = "GW_EXTERNAL_SERVICE_NAMESPACE")]
    pub external_gateway_service_namespace: Option<String>,

    /// Name of the external-visibility gateway's backing Service.
    #[arg(long, env = "GW_EXTERNAL_SERVICE_NAME")]
    pub external_gateway_service_name: Option<String>,

    /// Namespace of the local (cluster-local) visibility Gateway.
    #[arg(long, env = "GW_LOCAL_NAMESPACE")]
    pub local_gateway_namespace: String,

    /// Name of the local (cluster-local) visibility Gateway.
    #[arg(long, env = "GW_LOCAL_NAME")]
    pub local_gateway_name: String,

    /// Namespace of the local-visibility gateway's backing Service.
    #[arg(long, env = "GW_LOCAL_SERVICE_NAMESPACE")]
    pub local_gateway_service_namespace: Option<String>,

    /// Name of the local-visibility gateway's backing Service.
    #[arg(long, env = "GW_LOCAL_SERVICE_NAME")]
    pub local_gateway_service_name: Option<String>,

    /// Named HTTP listener on the external gateway that routes parent to.
    #[arg(long, env = "GW_EXTERNAL_HTTP_LISTENER")]
    pub external_http_listener_name: Option<String>,

    /// Named HTTP listener on the local gateway that routes parent to.
    #[arg(long, env = "GW_LOCAL_HTTP_LISTENER")]
    pub local_http_listener_name: Option<String>,

    /// Number of parallel probe workers.
    #[arg(long, env = "PROBE_CONCURRENCY", default_value_t = crate::consts::DEFAULT_PROBE_CONCURRENCY)]
    pub probe_concurrency: usize,

    /// Per-probe request deadline, in milliseconds.
    #[arg(long, env = "PROBE_TIMEOUT_MS", default_value_t = crate::consts::DEFAULT_PROBE_TIMEOUT_MS)]
    pub probe_timeout_ms: u64,

    /// Delay before a freshly enqueued probe is first attempted, in milliseconds.
    #[arg(long, env = "PROBE_INITIAL_DELAY_MS", default_value_t = crate::consts::DEFAULT_PROBE_INITIAL_DELAY_MS)]
    pub probe_initial_delay_ms: u64,

    /// Minimum per-item probe retry backoff, in milliseconds.
    #[arg(long, env = "PROBE_BACKOFF_MIN_MS", default_value_t = crate::consts::DEFAULT_PROBE_BACKOFF_MIN_MS)]
    pub probe_backoff_min_ms: u64,

    /// Maximum per-item probe retry backoff, in milliseconds.
    #[arg(long, env = "PROBE_BACKOFF_MAX_MS", default_value_t = crate::consts::DEFAULT_PROBE_BACKOFF_MAX_MS)]
    pub probe_backoff_max_ms: u64,

    /// Global probe rate limit, in requests per second.
    #[arg(long, env = "PROBE_RATE_LIMIT_RPS", default_value_t = crate::consts::DEFAULT_PROBE_RATE_LIMIT_RPS)]
    pub probe_rate_limit_rps: u32,

    /// Global probe rate limit burst size.
    #[arg(long, env = "PROBE_RATE_LIMIT_BURST", default_value_t = crate::consts::DEFAULT_PROBE_RATE_LIMIT_BURST)]
    pub probe_rate_limit_burst: u32,

    /// Log level for the operator.
    #[arg(long, env = "LOG_LEVEL", default_value_t = tracing::level_filters::LevelFilter::INFO)]
    pub log_level: tracing::level_filters::LevelFilter,
}

impl Args {
    pub fn gateway_config(&self) -> crate::config::GatewayConfig {
        use crate::config::{GatewayConfig, ObjectRef, VisibilityConfig};
        use std::collections::HashSet;

        let external_service = match (&self.external_gateway_service_namespace, &self.external_gateway_service_name) {
            (Some(ns), Some(name)) => Some(ObjectRef { namespace: ns.clone(), name: name.clone() }),
            _ => None,
        };
        let local_service = match (&self.local_gateway_service_namespace, &self.local_gateway_service_name) {
            (Some(ns), Some(name)) => Some(ObjectRef { namespace: ns.clone(), name: name.clone() }),
            _ => None,
        };

        GatewayConfig {
            external: VisibilityConfig {
                service: external_service,
                gateway: ObjectRef {
                    namespace: self.external_gateway_namespace.clone(),
                    name: self.external_gateway_name.clone(),
                },
                http_listener_name: self.external_http_listener_name.clone(),
                supported_features: HashSet::new(),
            },
            local: VisibilityConfig {
                service: local_service,
                gateway: ObjectRef {
                    namespace: self.local_gateway_namespace.clone(),
                    name: self.local_gateway_name.clone(),
                },
                http_listener_name: self.local_http_listener_name.clone(),
                supported_features: HashSet::new(),
            },
        }
    }

    pub fn prober_config(&self) -> crate::prober::ProberConfig {
        crate::prober::ProberConfig {
            concurrency: self.probe_concurrency,
            probe_timeout: std::time::Duration::from_millis(self.probe_timeout_ms),
            initial_delay: std::time::Duration::from_millis(self.probe_initial_delay_ms),
            backoff_min: std::time::Duration::from_millis(self.probe_backoff_min_ms),
            backoff_max: std::time::Duration::from_millis(self.probe_backoff_max_ms),
            rate_limit_rps: self.probe_rate_limit_rps,
            rate_limit_burst: self.probe_rate_limit_burst,
        }
    }
}
