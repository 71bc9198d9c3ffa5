//! [MODULE D] Transition Planner (spec.md §4.D).
//!
//! Decides what to do with an existing route given its current probe
//! phase, the active probe state, and the desired hash, then emits the
//! route with the matching hash-prefix. Grounded on the route-assembly
//! style of `route_builder` (same crate), generalized from "always
//! rebuild" to the phased decision table spec.md §4.D requires.

use crate::config::GatewayConfig;
use crate::crd::{Ingress, IngressRule};
use crate::err::PlannerError;
use crate::hash::{self, Phase};
use crate::model::ProbeState;
use crate::route_builder;
use gateway_api::httproutes::{HTTPRoute, HTTPRouteRules, HTTPRouteRulesBackendRefs};
use std::collections::BTreeMap;

/// A backend identified the way the planner diffs them: by
/// `(namespace, service_name)` (spec.md §4.D "matched by (ns, service_name)").
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct BackendIdentity {
    pub namespace: String,
    pub name: String,
}

/// What the planner decided to do with a route this pass.
pub enum Plan {
    /// Route doesn't need to change; skip the update.
    NoOp,
    /// Route must be (re)written with this content.
    Apply(HTTPRoute),
}

fn desired_backends(rule: &IngressRule) -> Vec<BackendIdentity> {
    let mut ids: Vec<BackendIdentity> = rule
        .paths
        .iter()
        .flat_map(|p| &p.splits)
        .map(|s| BackendIdentity {
            namespace: s.service_namespace.clone(),
            name: s.service_name.clone(),
        })
        .collect();
    ids.sort();
    ids.dedup();
    ids
}

/// Current non-probe backends observed on `route`: every backend ref that
/// does not belong to a probe-only rule (spec.md §8 "Probe-rule invisibility").
fn current_backends(route: &HTTPRoute) -> Vec<BackendIdentity> {
    let mut ids: Vec<BackendIdentity> = route
        .spec
        .rules
        .iter()
        .flatten()
        .filter(|r| !is_probe_rule(r))
        .flat_map(|r| r.backend_refs.iter().flatten())
        .map(|b| BackendIdentity {
            namespace: b.namespace.clone().unwrap_or_default(),
            name: b.name.clone(),
        })
        .collect();
    ids.sort();
    ids.dedup();
    ids
}

fn is_probe_rule(rule: &HTTPRouteRules) -> bool {
    rule.matches
        .iter()
        .flatten()
        .any(|m| m.headers.iter().flatten().any(|h| h.name == crate::consts::PROBE_MARKER_HEADER))
}

/// Splits `current` into `(new_backends, old_backends)` against `desired`
/// (spec.md §4.D "diffing desired split set against current route's
/// non-probe backends").
fn diff_backends(
    desired: &[BackendIdentity],
    current: &[BackendIdentity],
) -> (Vec<BackendIdentity>, Vec<BackendIdentity>) {
    let new_backends: Vec<_> = desired.iter().filter(|d| !current.contains(d)).cloned().collect();
    let old_backends: Vec<_> = current.iter().filter(|c| !desired.contains(c)).cloned().collect();
    (new_backends, old_backends)
}

/// Builds the probe-only overlay rules for `backends` at `hash`, reusing the
/// splits' ports and append-headers from `rule` when they match by identity
/// (spec.md §4.D "Probe rule content").
fn probe_rules_for(backends: &[BackendIdentity], rule: &IngressRule, hash: &str) -> Vec<HTTPRouteRules> {
    backends
        .iter()
        .filter_map(|b| {
            let split = rule
                .paths
                .iter()
                .flat_map(|p| &p.splits)
                .find(|s| s.service_name == b.name && s.service_namespace == b.namespace)?;
            Some(route_builder::build_probe_rule(
                &b.namespace,
                &b.name,
                split.service_port,
                hash,
                &split.append_headers,
            ))
        })
        .collect()
}

/// The append-headers a non-probe backend ref carries, recovered from its
/// `RequestHeaderModifier` filter (mirrors `route_builder::backend_header_modifier`
/// in reverse).
fn backend_ref_append_headers(backend_ref: &HTTPRouteRulesBackendRefs) -> BTreeMap<String, String> {
    backend_ref
        .filters
        .iter()
        .flatten()
        .filter_map(|f| f.request_header_modifier.as_ref())
        .flat_map(|m| m.set.iter().flatten())
        .map(|set| (set.name.clone(), set.value.clone()))
        .collect()
}

/// Builds the probe-only overlay rules for backends that are leaving the
/// route (`old_backends`), sourcing port/header data from `existing`'s
/// current non-probe backend refs rather than the new rule's splits, since
/// a departing backend is by definition absent from `rule` (spec.md §4.D
/// "Probe rules for old backends reuse the old backend's namespace/name but
/// with current hash H ... their filters include the pre-existing header
/// modifiers").
fn probe_rules_for_old(backends: &[BackendIdentity], existing: &HTTPRoute, hash: &str) -> Vec<HTTPRouteRules> {
    let backend_refs: Vec<&HTTPRouteRulesBackendRefs> = existing
        .spec
        .rules
        .iter()
        .flatten()
        .filter(|r| !is_probe_rule(r))
        .flat_map(|r| r.backend_refs.iter().flatten())
        .collect();
    backends
        .iter()
        .filter_map(|b| {
            let backend_ref = backend_refs
                .iter()
                .find(|r| r.name == b.name && r.namespace.as_deref().unwrap_or_default() == b.namespace)?;
            let port = backend_ref.port?;
            Some(route_builder::build_probe_rule(
                &b.namespace,
                &b.name,
                port,
                hash,
                &backend_ref_append_headers(backend_ref),
            ))
        })
        .collect()
}

/// Plans the next action for one rule's route (spec.md §4.D decision table).
pub fn plan(
    ingress: &Ingress,
    rule: &IngressRule,
    existing: &HTTPRoute,
    probe: Option<ProbeState>,
    desired_hash: &str,
    config: &GatewayConfig,
) -> Result<Plan, PlannerError> {
    let current_version = probe_version(existing);
    let (phase, prev_hash) = hash::decode(&current_version);
    let hash_matches = prev_hash == desired_hash;
    let ready = probe.map(|p| p.ready).unwrap_or(false);

    let desired = desired_backends(rule);
    let current = current_backends(existing);
    let (new_backends, old_backends) = diff_backends(&desired, &current);

    // transition phase, hash matches, probe ready: publish final route.
    if phase == Phase::Transition && hash_matches && ready {
        let mut route = route_builder::build_route(ingress, rule, config)?;
        set_probe_version(&mut route, desired_hash);
        return Ok(Plan::Apply(route));
    }

    // endpoint-probe phase, hash matches, probe ready: rebuild + re-add
    // probe rules for new/old backends, tagged `tr-`.
    if phase == Phase::EndpointProbe && hash_matches && ready {
        let mut route = route_builder::build_route(ingress, rule, config)?;
        let mut rules = route.spec.rules.take().unwrap_or_default();
        rules.extend(probe_rules_for(&new_backends, rule, desired_hash));
        rules.extend(probe_rules_for_old(&old_backends, existing, desired_hash));
        route.spec.rules = Some(rules);
        set_probe_version(&mut route, &hash::transition(desired_hash));
        return Ok(Plan::Apply(route));
    }

    // any phase with new backends pending: overlay probe rules onto the
    // current route; add new-backend probes, retain old-backend probes
    // (spec.md §4.D decision table row 3), stay on `ep-`.
    if !new_backends.is_empty() {
        let mut route = existing.clone();
        let mut rules: Vec<HTTPRouteRules> = route
            .spec
            .rules
            .take()
            .unwrap_or_default()
            .into_iter()
            .filter(|r| !is_probe_rule(r))
            .collect();
        rules.extend(probe_rules_for(&new_backends, rule, desired_hash));
        rules.extend(probe_rules_for_old(&old_backends, existing, desired_hash));
        route.spec.rules = Some(rules);
        set_probe_version(&mut route, &hash::endpoint_probe(desired_hash));
        return Ok(Plan::Apply(route));
    }

    // no pending new backends, hash stale: rebuild clean.
    if !hash_matches {
        let mut route = route_builder::build_route(ingress, rule, config)?;
        set_probe_version(&mut route, desired_hash);
        return Ok(Plan::Apply(route));
    }

    // no pending new backends, hash matches: no-op.
    Ok(Plan::NoOp)
}

const PROBE_VERSION_ANNOTATION: &str = "networking.knative.dev/probe-hash";

fn probe_version(route: &HTTPRoute) -> String {
    route
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(PROBE_VERSION_ANNOTATION))
        .cloned()
        .unwrap_or_default()
}

/// Stamps `route`'s probe-version annotation (exposed for the reconciler's
/// first-write path, which has no prior route to diff against).
pub fn set_probe_version(route: &mut HTTPRoute, version: &str) {
    let annotations = route.metadata.annotations.get_or_insert_with(BTreeMap::new);
    annotations.insert(PROBE_VERSION_ANNOTATION.to_string(), version.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{HttpIngressPath, IngressBackendSplit, IngressSpec};

    fn rule_with(service: &str) -> IngressRule {
        IngressRule {
            hosts: vec!["example.com".into()],
            paths: vec![HttpIngressPath {
                splits: vec![IngressBackendSplit {
                    service_namespace: "ns".into(),
                    service_name: service.into(),
                    service_port: 80,
                    weight_percent: 100,
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn ingress() -> Ingress {
        let mut ingress = Ingress::new("i", IngressSpec::default());
        ingress.metadata.uid = Some("test-uid".into());
        ingress
    }

    #[test]
    fn steady_state_same_hash_is_noop() {
        let rule = rule_with("goo");
        let mut route = route_builder::build_route(&ingress(), &rule, &GatewayConfig::default()).unwrap();
        set_probe_version(&mut route, "H1");
        let plan = plan(&ingress(), &rule, &route, Some(ProbeState { ready: true }), "H1", &GatewayConfig::default()).unwrap();
        assert!(matches!(plan, Plan::NoOp));
    }

    #[test]
    fn new_backend_overlays_probe_rule_tagged_ep() {
        let rule_old = rule_with("goo");
        let route = route_builder::build_route(&ingress(), &rule_old, &GatewayConfig::default()).unwrap();
        let rule_new = rule_with("second-revision");
        let plan = plan(&ingress(), &rule_new, &route, None, "H2", &GatewayConfig::default()).unwrap();
        match plan {
            Plan::Apply(route) => {
                assert_eq!(probe_version(&route), "ep-H2");
                let has_probe_rule = route.spec.rules.iter().flatten().any(is_probe_rule);
                assert!(has_probe_rule);
            }
            Plan::NoOp => panic!("expected an update"),
        }
    }

    fn rule_with_two(a: &str, b: &str) -> IngressRule {
        IngressRule {
            hosts: vec!["example.com".into()],
            paths: vec![HttpIngressPath {
                splits: vec![
                    IngressBackendSplit {
                        service_namespace: "ns".into(),
                        service_name: a.into(),
                        service_port: 80,
                        weight_percent: 50,
                        ..Default::default()
                    },
                    IngressBackendSplit {
                        service_namespace: "ns".into(),
                        service_name: b.into(),
                        service_port: 80,
                        weight_percent: 50,
                        ..Default::default()
                    },
                ],
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn probe_rule_paths(route: &HTTPRoute) -> Vec<String> {
        route
            .spec
            .rules
            .iter()
            .flatten()
            .filter(|r| is_probe_rule(r))
            .filter_map(|r| r.matches.iter().flatten().next())
            .filter_map(|m| m.path.as_ref())
            .filter_map(|p| p.value.clone())
            .collect()
    }

    #[test]
    fn partial_split_retains_old_backend_probe_rule() {
        let rule_old = rule_with_two("goo", "bar");
        let route = route_builder::build_route(&ingress(), &rule_old, &GatewayConfig::default()).unwrap();
        let rule_new = rule_with_two("goo", "baz");
        let plan = plan(&ingress(), &rule_new, &route, None, "H2", &GatewayConfig::default()).unwrap();
        match plan {
            Plan::Apply(route) => {
                assert_eq!(probe_version(&route), "ep-H2");
                let paths = probe_rule_paths(&route);
                assert!(paths.iter().any(|p| p.ends_with("/ns/baz")), "missing new-backend probe: {paths:?}");
                assert!(paths.iter().any(|p| p.ends_with("/ns/bar")), "missing old-backend probe: {paths:?}");
            }
            Plan::NoOp => panic!("expected an update"),
        }
    }

    #[test]
    fn diff_backends_splits_new_and_old() {
        let desired = vec![BackendIdentity { namespace: "ns".into(), name: "b".into() }];
        let current = vec![BackendIdentity { namespace: "ns".into(), name: "a".into() }];
        let (new, old) = diff_backends(&desired, &current);
        assert_eq!(new, vec![BackendIdentity { namespace: "ns".into(), name: "b".into() }]);
        assert_eq!(old, vec![BackendIdentity { namespace: "ns".into(), name: "a".into() }]);
    }
}
