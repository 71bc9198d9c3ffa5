//! [MODULE E] Reconciler (spec.md §4.E).
//!
//! The per-Ingress reconcile pass: defaults, per-rule route
//! materialization via the Route Builder/Transition Planner, TLS listener
//! patching, probing, and status publishing. Grounded on the teacher's
//! `reconcile()` shape (`src/main.rs`: class-annotation skip, leader
//! check, per-rule loop, server-side apply patches) generalized to the
//! spec's richer Ingress model, and on `coredb-operator`'s
//! `kube::runtime::finalizer::finalizer` wrapper for create/delete
//! symmetry, which the teacher has no equivalent for.

use crate::config::GatewayConfig;
use crate::consts;
use crate::crd::{HttpOption, Ingress, IngressStatus, LoadBalancerIngress, Visibility};
use crate::err::ReconcileError;
use crate::hash;
use crate::model::{Backends, ProbeUrl, Scheme};
use crate::planner::{self, Plan};
use crate::route_builder;
use crate::status;
use crate::utils::ObjectMetaI2GExt;
use gateway_api::gateways::{Gateway, GatewayListeners, GatewayListenersTls, GatewayListenersTlsCertificateRefs, GatewayListenersTlsMode};
use gateway_api::httproutes::HTTPRoute;
use gateway_api::referencegrants::{ReferenceGrant, ReferenceGrantFrom, ReferenceGrantSpec, ReferenceGrantTo};
use kube::api::{Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::finalizer::{finalizer, Event as FinalizerEvent};
use kube::{Api, Resource, ResourceExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

const FINALIZER_NAME: &str = "networking.knative.dev/gateway-api-ingress";

pub struct Context {
    pub client: kube::Client,
    pub gateway_config: GatewayConfig,
    pub prober: Arc<crate::prober::Prober>,
    pub is_leader: std::sync::atomic::AtomicBool,
}

#[tracing::instrument(skip(ingress, ctx), fields(ingress = ingress.name_any(), namespace = ingress.namespace()), err)]
pub async fn reconcile(ingress: Arc<Ingress>, ctx: Arc<Context>) -> Result<Action, ReconcileError> {
    if !ctx.is_leader.load(std::sync::atomic::Ordering::Relaxed) {
        tracing::debug!("not the leader, skipping reconciliation");
        return Ok(Action::requeue(Duration::from_secs(20)));
    }

    let class = ingress.annotations().get(consts::CLASS_ANNOTATION);
    if class.map(String::as_str) != Some(consts::CLASS_ANNOTATION_VALUE) {
        return Ok(Action::requeue(Duration::from_secs(300)));
    }

    let ns = ingress.namespace().ok_or_else(|| ReconcileError::InvalidConfig("Ingress has no namespace".into()))?;
    let api: Api<Ingress> = Api::namespaced(ctx.client.clone(), &ns);

    finalizer(&api, FINALIZER_NAME, ingress, |event| async {
        match event {
            FinalizerEvent::Apply(ingress) => reconcile_apply_with_status(&ingress, &ctx).await,
            FinalizerEvent::Cleanup(ingress) => reconcile_cleanup(&ingress, &ctx).await,
        }
    })
    .await
    .map_err(|e| ReconcileError::Finalizer(Box::new(e)))
}

/// Wraps `reconcile_apply`, publishing `ReconcileIngressFailed` on the
/// Ingress's status before propagating a terminal error (spec.md §4.F, §7
/// "MarkIngressNotReady(ReconcileIngressFailed) on reconcile error").
async fn reconcile_apply_with_status(ingress: &Ingress, ctx: &Context) -> Result<Action, ReconcileError> {
    match reconcile_apply(ingress, ctx).await {
        Ok(action) => Ok(action),
        Err(err) => {
            let mut status = ingress.status.clone().unwrap_or_default();
            status::mark_reconcile_failed(&mut status, &err.to_string());
            let _ = patch_status(ctx, ingress, status).await;
            Err(err)
        }
    }
}

/// Detects rules whose declared hosts collide on the same route name before
/// any object is written (spec.md §9 "route name collisions ... detect and
/// fail fast rather than silently overwrite").
fn check_no_route_name_collisions(ingress: &Ingress) -> Result<(), ReconcileError> {
    let mut seen = std::collections::HashSet::new();
    for rule in &ingress.spec.rules {
        let name = route_builder::route_name(rule)?;
        if !seen.insert(name.clone()) {
            return Err(ReconcileError::Planner(crate::err::PlannerError::DuplicateRouteName(name)));
        }
    }
    Ok(())
}

pub fn error_policy(_ingress: Arc<Ingress>, err: &ReconcileError, _ctx: Arc<Context>) -> Action {
    crate::err::error_policy(err)
}

async fn reconcile_apply(ingress: &Ingress, ctx: &Context) -> Result<Action, ReconcileError> {
    let ns = ingress.namespace().ok_or_else(|| ReconcileError::InvalidConfig("Ingress has no namespace".into()))?;
    let routes_api: Api<HTTPRoute> = Api::namespaced(ctx.client.clone(), &ns);
    let mut status = ingress.status.clone().unwrap_or_default();

    check_no_route_name_collisions(ingress)?;

    let mut all_ready = true;
    let mut any_gateway_missing: Option<String> = None;

    for rule in &ingress.spec.rules {
        let route_name = route_builder::route_name(rule)?;
        let desired_hash = hash::rule_hash(&route_name, rule);

        let existing = routes_api.get_opt(&route_name).await?;
        let route = match existing {
            None => {
                let mut built = route_builder::build_route(ingress, rule, &ctx.gateway_config)?;
                planner::set_probe_version(&mut built, &desired_hash);
                apply_route(&routes_api, built).await?
            }
            Some(current) => {
                if !owned_by(&current, ingress) {
                    return Err(ReconcileError::NotOwned(format!(
                        "HTTPRoute {route_name} already exists and is not owned by this Ingress"
                    )));
                }
                let probe_key = (ns.clone(), route_name.clone());
                let probe = ctx.prober.is_probe_active(&probe_key);
                match planner::plan(ingress, rule, &current, probe, &desired_hash, &ctx.gateway_config)? {
                    Plan::NoOp => current,
                    Plan::Apply(built) => apply_route(&routes_api, built).await?,
                }
            }
        };

        if route_builder::needs_redirect(ingress) {
            let redirect = route_builder::build_redirect_route(ingress, rule, &ctx.gateway_config)?;
            apply_route(&routes_api, redirect).await?;
        }

        if !route_accepted(&route) {
            all_ready = false;
            status::mark_http_route_not_ready(&mut status, &format!("route {route_name} not yet accepted by any parent"));
            continue;
        }

        let backends = build_backends(ingress, &ns, &route_name, rule, &desired_hash);
        match ctx.prober.do_probes(&backends).await {
            Ok(state) => {
                if !state.ready {
                    all_ready = false;
                }
            }
            Err(crate::err::ProberError::Resolver(crate::err::ResolverError::NoGatewayPods))
            | Err(crate::err::ProberError::Resolver(crate::err::ResolverError::NoAddresses)) => {
                all_ready = false;
                any_gateway_missing = Some(ctx.gateway_config.for_visibility(rule.visibility).gateway.name.clone());
            }
            Err(e) => return Err(ReconcileError::Prober(e)),
        }
    }

    for tls in &ingress.spec.tls {
        ensure_reference_grant(ctx, ingress, tls).await?;
        match patch_external_listener(ctx, ingress, tls).await {
            Ok(()) => {}
            Err(err @ ReconcileError::NotFound(_)) => {
                status::mark_load_balancer_failed(&mut status, &err.to_string());
                status.observed_generation = ingress.meta().generation;
                patch_status(ctx, ingress, status).await?;
                return Err(err);
            }
            Err(err) => return Err(err),
        }
    }

    if let Some(gateway) = any_gateway_missing {
        status::mark_load_balancer_failed(&mut status, &format!("gateway {gateway} does not exist"));
    } else if all_ready {
        status::mark_network_configured(&mut status);
        let public = load_balancer_addresses(ctx, Visibility::External).await?;
        let private = load_balancer_addresses(ctx, Visibility::ClusterLocal).await?;
        status::mark_load_balancer_ready(&mut status, public, private);
    }

    status.observed_generation = ingress.meta().generation;
    patch_status(ctx, ingress, status).await?;

    Ok(Action::requeue(Duration::from_secs(60)))
}

async fn reconcile_cleanup(ingress: &Ingress, ctx: &Context) -> Result<Action, ReconcileError> {
    let uid = ingress.meta().uid.clone().unwrap_or_default();
    let listener_prefix = format!("{}{uid}", consts::TLS_LISTENER_NAME_PREFIX);

    let gw_ref = ctx.gateway_config.external_gateway();
    let gw_api: Api<Gateway> = Api::namespaced(ctx.client.clone(), &gw_ref.namespace);
    if let Ok(mut gateway) = gw_api.get(&gw_ref.name).await {
        let before = gateway.spec.listeners.len();
        gateway.spec.listeners.retain(|l| !l.name.starts_with(&listener_prefix));
        if gateway.spec.listeners.len() != before {
            gw_api
                .replace(&gw_ref.name, &Default::default(), &gateway)
                .await?;
        }
    }

    for rule in &ingress.spec.rules {
        if let Ok(route_name) = route_builder::route_name(rule) {
            ctx.prober.cancel_ingress_probing(&(ingress.namespace().unwrap_or_default(), route_name));
        }
    }

    Ok(Action::await_change())
}

async fn apply_route(api: &Api<HTTPRoute>, route: HTTPRoute) -> Result<HTTPRoute, ReconcileError> {
    let name = route.name_any();
    api.patch(
        &name,
        &PatchParams::apply(consts::FIELD_MANAGER).force(),
        &Patch::Apply(&route),
    )
    .instrument(tracing::info_span!("apply_route", name))
    .await
    .map_err(ReconcileError::from)
}

/// Whether `route`'s owner references already name this Ingress by uid
/// (spec.md §9 "route name collisions ... detect and fail fast rather than
/// silently overwrite", extended to the cross-Ingress case).
fn owned_by(route: &HTTPRoute, ingress: &Ingress) -> bool {
    let Some(uid) = ingress.meta().uid.as_deref() else {
        return false;
    };
    route
        .metadata
        .owner_references
        .iter()
        .flatten()
        .any(|o| o.uid == uid)
}

fn route_accepted(route: &HTTPRoute) -> bool {
    route
        .status
        .as_ref()
        .map(|s| {
            s.parents
                .iter()
                .any(|p| p.conditions.iter().any(|c| c.type_ == "Accepted" && c.status == "True"))
        })
        .unwrap_or(false)
}

fn build_backends(ingress: &Ingress, ns: &str, route_name: &str, rule: &crate::crd::IngressRule, hash: &str) -> Backends {
    let mut urls: HashMap<Visibility, Vec<ProbeUrl>> = HashMap::new();
    let scheme = if rule.visibility == Visibility::External && rule.http_option == HttpOption::Redirected {
        Scheme::Https
    } else {
        Scheme::Http
    };
    let path_urls = rule
        .paths
        .iter()
        .map(|p| ProbeUrl {
            scheme: scheme.clone(),
            host: rule.primary_host().unwrap_or_default().to_string(),
            path: p.path_prefix_or_default().to_string(),
        })
        .collect();
    urls.insert(rule.visibility, path_urls);

    Backends {
        key: (ns.to_string(), route_name.to_string()),
        callback_key: (ns.to_string(), ingress.name_any()),
        version: hash.to_string(),
        http_option: rule.http_option,
        urls,
    }
}

async fn patch_status(ctx: &Context, ingress: &Ingress, status: IngressStatus) -> Result<(), ReconcileError> {
    let ns = ingress.namespace().unwrap_or_default();
    let api: Api<Ingress> = Api::namespaced(ctx.client.clone(), &ns);
    let mut patched = ingress.clone();
    patched.status = Some(status);
    api.patch_status(
        &ingress.name_any(),
        &PatchParams::apply(consts::FIELD_MANAGER).force(),
        &Patch::Merge(serde_json::json!({ "status": patched.status })),
    )
    .await?;
    Ok(())
}

fn reference_grant_name(ingress: &Ingress, tls: &crate::crd::IngressTLS) -> String {
    let raw = format!("{}-{}", ingress.name_any(), tls.secret_name);
    raw.chars().take(63).collect()
}

async fn ensure_reference_grant(ctx: &Context, ingress: &Ingress, tls: &crate::crd::IngressTLS) -> Result<(), ReconcileError> {
    let gw_ref = ctx.gateway_config.external_gateway();
    if tls.secret_namespace == gw_ref.namespace {
        return Ok(()); // same-namespace references need no grant.
    }
    let api: Api<ReferenceGrant> = Api::namespaced(ctx.client.clone(), &tls.secret_namespace);
    let name = reference_grant_name(ingress, tls);
    let mut meta = kube::api::ObjectMeta {
        name: Some(name.clone()),
        namespace: Some(tls.secret_namespace.clone()),
        ..Default::default()
    };
    meta.add_owner(ingress);
    let grant = ReferenceGrant {
        metadata: meta,
        spec: ReferenceGrantSpec {
            from: vec![ReferenceGrantFrom {
                group: <Gateway as Resource>::group(&()).to_string(),
                kind: <Gateway as Resource>::kind(&()).to_string(),
                namespace: gw_ref.namespace.clone(),
            }],
            to: vec![ReferenceGrantTo {
                group: String::new(),
                kind: "Secret".to_string(),
                name: Some(tls.secret_name.clone()),
            }],
        },
    };
    api.patch(&name, &PatchParams::apply(consts::FIELD_MANAGER).force(), &Patch::Apply(&grant))
        .await?;
    Ok(())
}

/// Classifies a `kube::Error` into the retry-relevant shape spec.md §7's
/// taxonomy distinguishes: a 404 means the child/parent object isn't there
/// yet (not fatal, retry will pick it up), a 409 means a concurrent writer
/// raced us (retry against the fresh object).
fn classify_kube_error(err: kube::Error, not_found: impl FnOnce() -> String) -> ReconcileError {
    match &err {
        kube::Error::Api(resp) if resp.code == 404 => ReconcileError::NotFound(not_found()),
        kube::Error::Api(resp) if resp.code == 409 => ReconcileError::Conflict(not_found()),
        _ => ReconcileError::Kube(err),
    }
}

async fn patch_external_listener(ctx: &Context, ingress: &Ingress, tls: &crate::crd::IngressTLS) -> Result<(), ReconcileError> {
    let uid = ingress.meta().uid.clone().unwrap_or_default();
    let gw_ref = ctx.gateway_config.external_gateway();
    let gw_api: Api<Gateway> = Api::namespaced(ctx.client.clone(), &gw_ref.namespace);
    let mut gateway = gw_api
        .get(&gw_ref.name)
        .await
        .map_err(|e| classify_kube_error(e, || format!("gateway {}/{}", gw_ref.namespace, gw_ref.name)))?;

    for host in &tls.hosts {
        let name = format!("{}{uid}-{}", consts::TLS_LISTENER_NAME_PREFIX, sanitize(host));
        if gateway.spec.listeners.iter().any(|l| l.name == name) {
            continue;
        }
        gateway.spec.listeners.push(GatewayListeners {
            name,
            hostname: Some(host.clone()),
            port: 443,
            protocol: "HTTPS".to_string(),
            tls: Some(GatewayListenersTls {
                mode: Some(GatewayListenersTlsMode::Terminate),
                certificate_refs: Some(vec![GatewayListenersTlsCertificateRefs {
                    group: None,
                    kind: Some("Secret".to_string()),
                    name: tls.secret_name.clone(),
                    namespace: Some(tls.secret_namespace.clone()),
                }]),
                options: None,
            }),
            allowed_routes: None,
        });
    }
    gw_api
        .replace(&gw_ref.name, &Default::default(), &gateway)
        .await
        .map_err(|e| classify_kube_error(e, || format!("gateway {}/{}", gw_ref.namespace, gw_ref.name)))?;
    Ok(())
}

fn sanitize(host: &str) -> String {
    host.chars().map(|c| if c.is_ascii_alphanumeric() { c } else { '-' }).collect()
}

async fn load_balancer_addresses(ctx: &Context, visibility: Visibility) -> Result<Vec<LoadBalancerIngress>, ReconcileError> {
    let vis_config = ctx.gateway_config.for_visibility(visibility);
    if let Some(service) = &vis_config.service {
        return Ok(vec![LoadBalancerIngress {
            domain: Some(format!("{}.{}.svc.cluster.local", service.name, service.namespace)),
            ip: None,
        }]);
    }
    let gw_ref = match visibility {
        Visibility::External => ctx.gateway_config.external_gateway(),
        Visibility::ClusterLocal => ctx.gateway_config.local_gateway(),
    };
    let gw_api: Api<Gateway> = Api::namespaced(ctx.client.clone(), &gw_ref.namespace);
    let gateway = gw_api
        .get(&gw_ref.name)
        .await
        .map_err(|_| ReconcileError::GatewayMissing(format!("{}/{}", gw_ref.namespace, gw_ref.name)))?;
    let address = gateway
        .status
        .as_ref()
        .and_then(|s| s.addresses.as_ref())
        .and_then(|a| a.first());
    match address {
        Some(addr) if addr.value.parse::<std::net::IpAddr>().is_ok() => Ok(vec![LoadBalancerIngress {
            domain: None,
            ip: Some(addr.value.clone()),
        }]),
        Some(addr) => Ok(vec![LoadBalancerIngress {
            domain: Some(addr.value.clone()),
            ip: None,
        }]),
        None => Ok(vec![]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_grant_name_is_length_capped() {
        let ingress = Ingress::new("a".repeat(80).as_str(), Default::default());
        let tls = crate::crd::IngressTLS {
            hosts: vec![],
            secret_namespace: "ns".into(),
            secret_name: "b".repeat(80),
        };
        assert!(reference_grant_name(&ingress, &tls).len() <= 63);
    }

    #[test]
    fn sanitize_replaces_non_alphanumeric() {
        assert_eq!(sanitize("a.b-c.com"), "a-b-c-com");
    }

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".into(),
            message: "boom".into(),
            reason: "boom".into(),
            code,
        })
    }

    #[test]
    fn classify_kube_error_maps_404_to_not_found() {
        assert!(matches!(classify_kube_error(api_error(404), || "x".into()), ReconcileError::NotFound(_)));
    }

    #[test]
    fn classify_kube_error_maps_409_to_conflict() {
        assert!(matches!(classify_kube_error(api_error(409), || "x".into()), ReconcileError::Conflict(_)));
    }

    #[test]
    fn classify_kube_error_passes_through_other_codes() {
        assert!(matches!(classify_kube_error(api_error(500), || "x".into()), ReconcileError::Kube(_)));
    }

    #[test]
    fn owned_by_is_true_only_for_matching_uid() {
        let mut ingress = Ingress::new("i", Default::default());
        ingress.metadata.uid = Some("uid-a".into());
        let mut route = HTTPRoute::new("r", Default::default());
        route.metadata.add_owner(&ingress);
        assert!(owned_by(&route, &ingress));

        let mut other = Ingress::new("o", Default::default());
        other.metadata.uid = Some("uid-b".into());
        assert!(!owned_by(&route, &other));
    }
}
