//! [MODULE C] Route Builder (spec.md §4.C).
//!
//! Builds the declarative `HTTPRoute` for one Ingress rule: hostnames,
//! header-matched probe rules, split backends, filters. Grounded on the
//! teacher's `create_http_routes` (`src/main.rs`), generalized from a raw
//! k8s `Ingress` path list to the spec's weighted-split/header-match model
//! and extended with owner references (teacher's `ObjectMetaI2GExt`,
//! `src/utils.rs`) and the redirect-route / probe-rule overlays the
//! teacher has no equivalent for.

use crate::config::GatewayConfig;
use crate::consts::{self, PROBE_HASH_OVERRIDE, PROBE_MARKER_HEADER};
use crate::crd::{HttpIngressPath, Ingress, IngressRule, Visibility};
use crate::err::PlannerError;
use crate::utils::ObjectMetaI2GExt;
use gateway_api::gateways::Gateway;
use gateway_api::httproutes::{
    HTTPRoute, HTTPRouteParentRefs, HTTPRouteRules, HTTPRouteRulesBackendRefs,
    HTTPRouteRulesBackendRefsFilters, HTTPRouteRulesBackendRefsFiltersRequestHeaderModifier,
    HTTPRouteRulesBackendRefsFiltersRequestHeaderModifierSet,
    HTTPRouteRulesBackendRefsFiltersType, HTTPRouteRulesFilters,
    HTTPRouteRulesFiltersRequestHeaderModifier, HTTPRouteRulesFiltersRequestHeaderModifierSet,
    HTTPRouteRulesFiltersRequestRedirect, HTTPRouteRulesFiltersRequestRedirectScheme,
    HTTPRouteRulesFiltersType,
    HTTPRouteRulesFiltersUrlRewrite, HTTPRouteRulesMatches, HTTPRouteRulesMatchesHeaders,
    HTTPRouteRulesMatchesHeadersType, HTTPRouteRulesMatchesPath, HTTPRouteRulesMatchesPathType,
    HTTPRouteRulesTimeouts, HTTPRouteSpec,
};
use kube::ResourceExt;
use kube::api::ObjectMeta;
use std::collections::BTreeMap;

/// Route name: the lexicographically-largest host (spec.md §3, §8
/// "Route-name determinism").
pub fn route_name(rule: &IngressRule) -> Result<String, PlannerError> {
    rule.primary_host()
        .map(str::to_string)
        .ok_or(PlannerError::NoHosts)
}

fn sorted_headers(headers: &BTreeMap<String, String>) -> Vec<(&String, &String)> {
    headers.iter().collect() // BTreeMap iterates in sorted key order already.
}

fn rule_header_modifier(headers: &BTreeMap<String, String>) -> Option<HTTPRouteRulesFilters> {
    if headers.is_empty() {
        return None;
    }
    Some(HTTPRouteRulesFilters {
        r#type: HTTPRouteRulesFiltersType::RequestHeaderModifier,
        request_header_modifier: Some(HTTPRouteRulesFiltersRequestHeaderModifier {
            set: Some(
                sorted_headers(headers)
                    .into_iter()
                    .map(|(k, v)| HTTPRouteRulesFiltersRequestHeaderModifierSet {
                        name: k.clone(),
                        value: v.clone(),
                    })
                    .collect(),
            ),
            add: None,
            remove: None,
        }),
        ..Default::default()
    })
}

fn backend_header_modifier(
    headers: &BTreeMap<String, String>,
) -> Option<HTTPRouteRulesBackendRefsFilters> {
    if headers.is_empty() {
        return None;
    }
    Some(HTTPRouteRulesBackendRefsFilters {
        r#type: HTTPRouteRulesBackendRefsFiltersType::RequestHeaderModifier,
        request_header_modifier: Some(HTTPRouteRulesBackendRefsFiltersRequestHeaderModifier {
            set: Some(
                sorted_headers(headers)
                    .into_iter()
                    .map(
                        |(k, v)| HTTPRouteRulesBackendRefsFiltersRequestHeaderModifierSet {
                            name: k.clone(),
                            value: v.clone(),
                        },
                    )
                    .collect(),
            ),
            add: None,
            remove: None,
        }),
        ..Default::default()
    })
}

fn path_match(path: &HttpIngressPath) -> HTTPRouteRulesMatches {
    let headers: Vec<_> = path
        .header_exact_matches
        .iter() // BTreeMap: already sorted by name (spec.md §4.C).
        .map(|(k, v)| HTTPRouteRulesMatchesHeaders {
            name: k.clone(),
            r#type: Some(HTTPRouteRulesMatchesHeadersType::Exact),
            value: v.clone(),
        })
        .collect();
    HTTPRouteRulesMatches {
        path: Some(HTTPRouteRulesMatchesPath {
            r#type: Some(HTTPRouteRulesMatchesPathType::PathPrefix),
            value: Some(path.path_prefix_or_default().to_string()),
        }),
        headers: if headers.is_empty() { None } else { Some(headers) },
        method: None,
        query_params: None,
    }
}

fn path_filters(path: &HttpIngressPath) -> Vec<HTTPRouteRulesFilters> {
    let mut filters = Vec::new();
    if let Some(f) = rule_header_modifier(&path.append_headers) {
        filters.push(f);
    }
    if let Some(rewrite) = &path.rewrite_host
        && !rewrite.is_empty()
    {
        filters.push(HTTPRouteRulesFilters {
            r#type: HTTPRouteRulesFiltersType::UrlRewrite,
            url_rewrite: Some(HTTPRouteRulesFiltersUrlRewrite {
                hostname: Some(rewrite.clone()),
                path: None,
            }),
            ..Default::default()
        });
    }
    filters
}

/// Zero-timeout hint for the gateway, when it advertises support for it
/// (spec.md §4.C "Optionally a zero-timeout hint if the gateway supports
/// it"). Disables the backend-request timeout per GEP-2257 rather than
/// silently inheriting the gateway's default.
fn rule_timeouts(config: &GatewayConfig, visibility: Visibility) -> Option<HTTPRouteRulesTimeouts> {
    if !config.supports_feature(visibility, crate::config::FEATURE_ZERO_TIMEOUT) {
        return None;
    }
    Some(HTTPRouteRulesTimeouts {
        backend_request: Some("0s".to_string()),
        request: None,
    })
}

fn path_backend_refs(path: &HttpIngressPath) -> Vec<HTTPRouteRulesBackendRefs> {
    path.splits
        .iter()
        .map(|split| HTTPRouteRulesBackendRefs {
            name: split.service_name.clone(),
            namespace: Some(split.service_namespace.clone()),
            port: Some(split.service_port),
            weight: Some(split.weight_percent),
            filters: backend_header_modifier(&split.append_headers).map(|f| vec![f]),
            group: None,
            kind: None,
        })
        .collect()
}

/// Builds the non-probe rule set for every path of `rule` (spec.md §4.C).
pub fn build_rules(rule: &IngressRule, config: &GatewayConfig) -> Vec<HTTPRouteRules> {
    rule.paths
        .iter()
        .map(|path| HTTPRouteRules {
            matches: Some(vec![path_match(path)]),
            filters: {
                let f = path_filters(path);
                if f.is_empty() { None } else { Some(f) }
            },
            backend_refs: Some(path_backend_refs(path)),
            name: None,
            timeouts: rule_timeouts(config, rule.visibility),
        })
        .collect()
}

/// Builds one probe-only rule for a candidate backend under test
/// (spec.md §4.D "Probe rule content").
pub fn build_probe_rule(
    ns: &str,
    name: &str,
    port: i32,
    hash: &str,
    append_headers: &BTreeMap<String, String>,
) -> HTTPRouteRules {
    HTTPRouteRules {
        matches: Some(vec![HTTPRouteRulesMatches {
            path: Some(HTTPRouteRulesMatchesPath {
                r#type: Some(HTTPRouteRulesMatchesPathType::PathPrefix),
                value: Some(format!("{}/{ns}/{name}", consts::PROBE_PATH_PREFIX)),
            }),
            headers: Some(vec![HTTPRouteRulesMatchesHeaders {
                name: PROBE_MARKER_HEADER.to_string(),
                r#type: Some(HTTPRouteRulesMatchesHeadersType::Exact),
                value: PROBE_HASH_OVERRIDE.to_string(),
            }]),
            method: None,
            query_params: None,
        }]),
        filters: Some(vec![HTTPRouteRulesFilters {
            r#type: HTTPRouteRulesFiltersType::RequestHeaderModifier,
            request_header_modifier: Some(HTTPRouteRulesFiltersRequestHeaderModifier {
                set: Some(vec![HTTPRouteRulesFiltersRequestHeaderModifierSet {
                    name: consts::PROBE_HASH_HEADER.to_string(),
                    value: hash.to_string(),
                }]),
                add: None,
                remove: None,
            }),
            ..Default::default()
        }]),
        backend_refs: Some(vec![HTTPRouteRulesBackendRefs {
            name: name.to_string(),
            namespace: Some(ns.to_string()),
            port: Some(port),
            weight: Some(100),
            filters: backend_header_modifier(append_headers).map(|f| vec![f]),
            group: None,
            kind: None,
        }]),
        name: None,
        timeouts: None,
    }
}

fn parent_ref(gateway: &crate::config::ObjectRef, section_name: Option<String>) -> HTTPRouteParentRefs {
    let group = <Gateway as kube::Resource>::group(&());
    let kind = <Gateway as kube::Resource>::kind(&());
    HTTPRouteParentRefs {
        group: Some(group.to_string()),
        kind: Some(kind.to_string()),
        name: gateway.name.clone(),
        namespace: Some(gateway.namespace.clone()),
        section_name,
        port: None,
    }
}

fn copied_annotations(ingress: &Ingress) -> Option<BTreeMap<String, String>> {
    let annotations = ingress.annotations();
    if annotations.is_empty() {
        return None;
    }
    let mut out = annotations.clone();
    out.remove(consts::LAST_APPLIED_ANNOTATION);
    if out.is_empty() { None } else { Some(out) }
}

/// Materializes the full declarative `HTTPRoute` for one Ingress rule,
/// without any probe overlay (the Transition Planner adds those).
pub fn build_route(ingress: &Ingress, rule: &IngressRule, config: &GatewayConfig) -> Result<HTTPRoute, PlannerError> {
    let name = route_name(rule)?;
    let vis_config = config.for_visibility(rule.visibility);

    let mut labels = BTreeMap::new();
    labels.insert(
        consts::VISIBILITY_LABEL.to_string(),
        rule.visibility.label_value().to_string(),
    );

    let mut meta = ObjectMeta {
        name: Some(name),
        namespace: ingress.namespace(),
        labels: Some(labels),
        annotations: copied_annotations(ingress),
        ..Default::default()
    };
    meta.add_owner(ingress);

    Ok(HTTPRoute {
        metadata: meta,
        spec: HTTPRouteSpec {
            hostnames: Some(rule.hosts.clone()),
            parent_refs: Some(vec![parent_ref(&vis_config.gateway, vis_config.http_listener_name.clone())]),
            rules: Some(build_rules(rule, config)),
        },
        status: None,
    })
}

/// Builds the parallel HTTP->HTTPS redirect route (spec.md §4.C "Redirect
/// route"), created once per rule whenever any TLS entry is configured on
/// the Ingress.
pub fn build_redirect_route(ingress: &Ingress, rule: &IngressRule, config: &GatewayConfig) -> Result<HTTPRoute, PlannerError> {
    let host = rule.primary_host().ok_or(PlannerError::NoHosts)?;
    let name = format!("{host}{}", consts::REDIRECT_ROUTE_SUFFIX);
    let mut meta = ObjectMeta {
        name: Some(name),
        namespace: ingress.namespace(),
        ..Default::default()
    };
    meta.add_owner(ingress);

    Ok(HTTPRoute {
        metadata: meta,
        spec: HTTPRouteSpec {
            hostnames: Some(rule.hosts.clone()),
            parent_refs: Some(vec![parent_ref(
                config.external_gateway(),
                config.external.http_listener_name.clone(),
            )]),
            rules: Some(vec![HTTPRouteRules {
                matches: Some(vec![HTTPRouteRulesMatches {
                    path: Some(HTTPRouteRulesMatchesPath {
                        r#type: Some(HTTPRouteRulesMatchesPathType::PathPrefix),
                        value: Some("/".to_string()),
                    }),
                    headers: None,
                    method: None,
                    query_params: None,
                }]),
                filters: Some(vec![HTTPRouteRulesFilters {
                    r#type: HTTPRouteRulesFiltersType::RequestRedirect,
                    request_redirect: Some(HTTPRouteRulesFiltersRequestRedirect {
                        scheme: Some(HTTPRouteRulesFiltersRequestRedirectScheme::Https),
                        port: Some(443),
                        status_code: Some(301),
                        hostname: None,
                        path: None,
                    }),
                    ..Default::default()
                }]),
                backend_refs: None,
                name: None,
                timeouts: None,
            }]),
        },
        status: None,
    })
}

pub fn needs_redirect(ingress: &Ingress) -> bool {
    !ingress.spec.tls.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{IngressBackendSplit, IngressSpec};

    fn ingress_with_rule(rule: IngressRule) -> Ingress {
        let mut ingress = Ingress::new(
            "test",
            IngressSpec {
                rules: vec![rule],
                ..Default::default()
            },
        );
        ingress.metadata.uid = Some("test-uid".into());
        ingress
    }

    fn cfg() -> GatewayConfig {
        GatewayConfig::default()
    }

    #[test]
    fn route_name_is_lexicographic_max_regardless_of_order() {
        let r1 = IngressRule {
            hosts: vec!["a.com".into(), "z.com".into(), "m.com".into()],
            ..Default::default()
        };
        let r2 = IngressRule {
            hosts: vec!["z.com".into(), "m.com".into(), "a.com".into()],
            ..Default::default()
        };
        assert_eq!(route_name(&r1).unwrap(), "z.com");
        assert_eq!(route_name(&r2).unwrap(), "z.com");
    }

    #[test]
    fn basic_rule_builds_one_backend_ref() {
        let rule = IngressRule {
            hosts: vec!["example.com".into()],
            paths: vec![HttpIngressPath {
                splits: vec![IngressBackendSplit {
                    service_namespace: "ns".into(),
                    service_name: "goo".into(),
                    service_port: 123,
                    weight_percent: 100,
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ..Default::default()
        };
        let ingress = ingress_with_rule(rule.clone());
        let route = build_route(&ingress, &rule, &cfg()).unwrap();
        assert_eq!(route.metadata.name.as_deref(), Some("example.com"));
        let rules = route.spec.rules.unwrap();
        assert_eq!(rules.len(), 1);
        let backend_refs = rules[0].backend_refs.as_ref().unwrap();
        assert_eq!(backend_refs.len(), 1);
        assert_eq!(backend_refs[0].name, "goo");
        assert_eq!(backend_refs[0].weight, Some(100));
    }

    #[test]
    fn probe_rule_matches_probe_marker_header() {
        let rule = build_probe_rule("ns", "second-revision", 80, "H2", &BTreeMap::new());
        let matches = &rule.matches.unwrap()[0];
        let headers = matches.headers.as_ref().unwrap();
        assert_eq!(headers[0].name, PROBE_MARKER_HEADER);
        assert_eq!(headers[0].value, PROBE_HASH_OVERRIDE);
        assert_eq!(
            matches.path.as_ref().unwrap().value.as_deref(),
            Some("/.well-known/knative/revision/ns/second-revision")
        );
    }

    #[test]
    fn duplicate_longest_host_is_rejected_by_caller() {
        let r1 = IngressRule {
            hosts: vec!["dup.example.com".into()],
            ..Default::default()
        };
        let r2 = IngressRule {
            hosts: vec!["dup.example.com".into()],
            ..Default::default()
        };
        assert_eq!(route_name(&r1).unwrap(), route_name(&r2).unwrap());
    }
}
