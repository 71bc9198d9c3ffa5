/// Annotation that selects this controller as the Ingress's class.
pub const CLASS_ANNOTATION: &str = "networking.knative.dev/ingress.class";
pub const CLASS_ANNOTATION_VALUE: &str = "gateway-api.ingress.networking.knative.dev";

/// Annotation excluded when copying Ingress annotations onto a generated route.
pub const LAST_APPLIED_ANNOTATION: &str = "kubectl.kubernetes.io/last-applied-configuration";

/// Visibility label carried on generated routes.
pub const VISIBILITY_LABEL: &str = "networking.knative.dev/visibility";
pub const VISIBILITY_LABEL_CLUSTER_LOCAL: &str = "cluster-local";

/// Header used to identify a probe request, and its fixed marker value.
pub const PROBE_MARKER_HEADER: &str = "k-network-probe";
pub const PROBE_MARKER_VALUE: &str = "probe";

/// Header that carries the probe hash, set by the gateway data plane on
/// probe responses and by probe rule filters on the way in.
pub const PROBE_HASH_HEADER: &str = "k-network-hash";
pub const PROBE_HASH_OVERRIDE: &str = "override";

/// User-Agent sent by the prober's readiness requests.
pub const PROBE_USER_AGENT: &str = "knative-gateway-api-probe";

/// Health path substituted when a probe URL has an empty path.
pub const DEFAULT_HEALTH_PATH: &str = "/.well-known/knative/healthz";

/// Prefix of the synthetic path matched by probe-only rules, followed by
/// `<namespace>/<name>` of the backend under test.
pub const PROBE_PATH_PREFIX: &str = "/.well-known/knative/revision";

/// Probe-hash version prefixes (spec.md §3 "Probe version prefix discipline").
pub const HASH_PREFIX_ENDPOINT_PROBE: &str = "ep-";
pub const HASH_PREFIX_TRANSITION: &str = "tr-";

/// Prefix for TLS listener names patched into the external gateway, followed
/// by the owning Ingress's UID.
pub const TLS_LISTENER_NAME_PREFIX: &str = "kni-";

/// Suffix for the parallel HTTP->HTTPS redirect route created when TLS is configured.
pub const REDIRECT_ROUTE_SUFFIX: &str = "-redirect";

/// Field manager used for all server-side apply patches this controller issues.
pub const FIELD_MANAGER: &str = "gateway-api-ingress-controller";

/// Default probe worker fan-out (spec.md §5).
pub const DEFAULT_PROBE_CONCURRENCY: usize = 15;

/// Default per-probe request deadline.
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 1_000;

/// Initial delay before a freshly enqueued probe work item is first attempted.
pub const DEFAULT_PROBE_INITIAL_DELAY_MS: u64 = 200;

/// Per-item exponential backoff bounds.
pub const DEFAULT_PROBE_BACKOFF_MIN_MS: u64 = 50;
pub const DEFAULT_PROBE_BACKOFF_MAX_MS: u64 = 30_000;

/// Global token-bucket rate limit applied across all probe workers.
pub const DEFAULT_PROBE_RATE_LIMIT_RPS: u32 = 50;
pub const DEFAULT_PROBE_RATE_LIMIT_BURST: u32 = 100;
