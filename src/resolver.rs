//! [MODULE A] Probe Target Resolver (spec.md §4.A).
//!
//! `resolve(ctx, backends) -> Vec<ProbeTarget>`. Two modes: service-backed
//! (read `Endpoints` subsets and pick a port per the scheme-specific name
//! rules) and gateway-status-backed (use the `Gateway`'s status addresses).
//! Grounded on the teacher's own `get_svc_port_number` (`src/main.rs`),
//! generalized from a single named port lookup to per-subset port
//! selection across a scheme-specific candidate name set.

use crate::config::GatewayConfig;
use crate::crd::{HttpOption, Visibility};
use crate::err::ResolverError;
use crate::model::{Backends, ProbeTarget, ProbeUrl, Scheme};
use gateway_api::gateways::Gateway;
use k8s_openapi::api::core::v1::{EndpointSubset, Endpoints};
use kube::{Api, Client};

fn scheme_names(scheme: &Scheme) -> &'static [&'static str] {
    match scheme {
        Scheme::Http => &["http", "http2", "http-80"],
        Scheme::Https => &["https", "https-443"],
    }
}

/// Effective scheme for a visibility's URLs: `https` only for external
/// traffic whose http option is `redirected` (spec.md §8 "Redirect phase").
fn effective_scheme(visibility: Visibility, http_option: HttpOption) -> Scheme {
    match (visibility, http_option) {
        (Visibility::External, HttpOption::Redirected) => Scheme::Https,
        _ => Scheme::Http,
    }
}

fn select_port(subset: &EndpointSubset, scheme: &Scheme) -> Option<i32> {
    let ports = subset.ports.as_ref()?;
    if ports.is_empty() {
        return None;
    }
    let names = scheme_names(scheme);
    if let Some(p) = ports
        .iter()
        .find(|p| p.name.as_deref().is_some_and(|n| names.contains(&n)))
    {
        return Some(p.port);
    }
    if let Some(p) = ports.iter().find(|p| {
        p.app_protocol
            .as_deref()
            .is_some_and(|ap| names.contains(&ap))
    }) {
        return Some(p.port);
    }
    Some(ports[0].port)
}

fn coerce_urls(urls: &[ProbeUrl], scheme: Scheme) -> Vec<ProbeUrl> {
    urls.iter()
        .map(|u| ProbeUrl {
            scheme: scheme.clone(),
            host: u.host.clone(),
            path: u.path.clone(),
        })
        .collect()
}

pub async fn resolve(
    client: &Client,
    config: &GatewayConfig,
    backends: &Backends,
) -> Result<Vec<ProbeTarget>, ResolverError> {
    let mut targets = Vec::new();

    for (&visibility, urls) in &backends.urls {
        if urls.is_empty() {
            continue;
        }
        let vis_config = config.for_visibility(visibility);
        let scheme = effective_scheme(visibility, backends.http_option);
        let coerced = coerce_urls(urls, scheme.clone());

        if let Some(service) = &vis_config.service {
            let api: Api<Endpoints> = Api::namespaced(client.clone(), &service.namespace);
            let endpoints = api.get(&service.name).await?;
            for subset in endpoints.subsets.unwrap_or_default() {
                let Some(addresses) = &subset.addresses else {
                    continue;
                };
                if addresses.is_empty() {
                    continue;
                }
                let Some(port) = select_port(&subset, &scheme) else {
                    continue;
                };
                targets.push(ProbeTarget {
                    pod_ips: addresses.iter().map(|a| a.ip.clone()).collect(),
                    port: port as u16,
                    urls: coerced.clone(),
                });
            }
        } else {
            let api: Api<Gateway> = Api::namespaced(client.clone(), &vis_config.gateway.namespace);
            let gw = api.get(&vis_config.gateway.name).await?;
            let addresses = gw
                .status
                .as_ref()
                .and_then(|s| s.addresses.as_ref())
                .filter(|a| !a.is_empty())
                .ok_or(ResolverError::NoAddresses)?;
            let port = match scheme {
                Scheme::Http => 80,
                Scheme::Https => 443,
            };
            targets.push(ProbeTarget {
                pod_ips: vec![addresses[0].value.clone()],
                port,
                urls: coerced,
            });
        }
    }

    if targets.iter().all(|t| t.urls.is_empty()) || targets.is_empty() {
        return Err(ResolverError::NoGatewayPods);
    }

    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_scheme_candidates() {
        assert_eq!(scheme_names(&Scheme::Http), &["http", "http2", "http-80"]);
    }

    #[test]
    fn https_scheme_candidates() {
        assert_eq!(scheme_names(&Scheme::Https), &["https", "https-443"]);
    }

    #[test]
    fn effective_scheme_is_https_only_for_redirected_external() {
        assert_eq!(
            effective_scheme(Visibility::External, HttpOption::Redirected),
            Scheme::Https
        );
        assert_eq!(
            effective_scheme(Visibility::External, HttpOption::Enabled),
            Scheme::Http
        );
        assert_eq!(
            effective_scheme(Visibility::ClusterLocal, HttpOption::Redirected),
            Scheme::Http
        );
    }

    fn port(name: Option<&str>, app_protocol: Option<&str>, number: i32) -> k8s_openapi::api::core::v1::EndpointPort {
        k8s_openapi::api::core::v1::EndpointPort {
            name: name.map(String::from),
            app_protocol: app_protocol.map(String::from),
            port: number,
            ..Default::default()
        }
    }

    #[test]
    fn select_port_prefers_exact_name_match() {
        let subset = EndpointSubset {
            ports: Some(vec![port(Some("metrics"), None, 9090), port(Some("http"), None, 8080)]),
            ..Default::default()
        };
        assert_eq!(select_port(&subset, &Scheme::Http), Some(8080));
    }

    #[test]
    fn select_port_falls_back_to_app_protocol() {
        let subset = EndpointSubset {
            ports: Some(vec![port(Some("web"), Some("https"), 8443)]),
            ..Default::default()
        };
        assert_eq!(select_port(&subset, &Scheme::Https), Some(8443));
    }

    #[test]
    fn select_port_falls_back_to_first_port() {
        let subset = EndpointSubset {
            ports: Some(vec![port(Some("admin"), None, 9999)]),
            ..Default::default()
        };
        assert_eq!(select_port(&subset, &Scheme::Http), Some(9999));
    }
}
