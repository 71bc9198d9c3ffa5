//! Probe hash computation (spec.md §3 "Probe hash").
//!
//! The hash is the version tag the prober and the data plane agree on; it
//! must change whenever the desired data-plane configuration for a rule
//! changes, and stay stable otherwise. Grounded on `ASoldo-rust_operator`'s
//! use of `sha2` for content hashing of reconciled spec state.

use crate::crd::IngressRule;
use sha2::{Digest, Sha256};

/// Hashes one rule's backend configuration plus its route identity (the
/// longest host) into the canonical hash string `H` referenced throughout
/// spec.md §3-4.
pub fn rule_hash(host: &str, rule: &IngressRule) -> String {
    let mut hasher = Sha256::new();
    hasher.update(host.as_bytes());
    hasher.update([0u8]);
    for path in &rule.paths {
        hasher.update(path.path_prefix_or_default().as_bytes());
        for (k, v) in &path.header_exact_matches {
            hasher.update(k.as_bytes());
            hasher.update(b"=");
            hasher.update(v.as_bytes());
        }
        for (k, v) in &path.append_headers {
            hasher.update(k.as_bytes());
            hasher.update(b"=");
            hasher.update(v.as_bytes());
        }
        if let Some(rewrite) = &path.rewrite_host {
            hasher.update(rewrite.as_bytes());
        }
        let mut splits: Vec<_> = path.splits.iter().collect();
        splits.sort_by(|a, b| a.service_name.cmp(&b.service_name));
        for split in splits {
            hasher.update(split.service_namespace.as_bytes());
            hasher.update(split.service_name.as_bytes());
            hasher.update(split.service_port.to_le_bytes());
            hasher.update(split.weight_percent.to_le_bytes());
        }
    }
    let digest = hasher.finalize();
    hex_encode(&digest)
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

/// The three phases a probe-hash prefix can encode (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Steady,
    EndpointProbe,
    Transition,
}

/// Decodes `(phase, bare_hash)` from a probe version string.
pub fn decode(version: &str) -> (Phase, &str) {
    if let Some(h) = version.strip_prefix(crate::consts::HASH_PREFIX_TRANSITION) {
        (Phase::Transition, h)
    } else if let Some(h) = version.strip_prefix(crate::consts::HASH_PREFIX_ENDPOINT_PROBE) {
        (Phase::EndpointProbe, h)
    } else {
        (Phase::Steady, version)
    }
}

pub fn endpoint_probe(hash: &str) -> String {
    format!("{}{hash}", crate::consts::HASH_PREFIX_ENDPOINT_PROBE)
}

pub fn transition(hash: &str) -> String {
    format!("{}{hash}", crate::consts::HASH_PREFIX_TRANSITION)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{HttpIngressPath, IngressBackendSplit};

    fn rule_with_split(port: i32) -> IngressRule {
        IngressRule {
            hosts: vec!["example.com".into()],
            paths: vec![HttpIngressPath {
                splits: vec![IngressBackendSplit {
                    service_namespace: "ns".into(),
                    service_name: "goo".into(),
                    service_port: port,
                    weight_percent: 100,
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn hash_changes_when_backend_changes() {
        let a = rule_hash("example.com", &rule_with_split(123));
        let b = rule_hash("example.com", &rule_with_split(124));
        assert_ne!(a, b);
    }

    #[test]
    fn hash_stable_for_same_input() {
        let a = rule_hash("example.com", &rule_with_split(123));
        let b = rule_hash("example.com", &rule_with_split(123));
        assert_eq!(a, b);
    }

    #[test]
    fn decode_prefixes() {
        assert_eq!(decode("abc"), (Phase::Steady, "abc"));
        assert_eq!(decode("ep-abc"), (Phase::EndpointProbe, "abc"));
        assert_eq!(decode("tr-abc"), (Phase::Transition, "abc"));
    }
}
