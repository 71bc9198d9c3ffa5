//! Response verifier (spec.md §4.B "Verifier").
//!
//! Preserves the asymmetry called out in spec.md §9: `404`/`503` continue
//! probing (treated as "configuration not yet applied"), while `3xx`/`403`
//! and anything else not explicitly handled are treated as success
//! (best-effort: a false-ready beats a probe that never converges).

use crate::consts::PROBE_HASH_HEADER;
use reqwest::{Response, StatusCode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Success,
    /// Keep probing; not a hard failure, just not-yet-applied.
    Continue,
}

pub fn classify(response: &Response, expected_version: &str) -> Verdict {
    let status = response.status();
    match status {
        StatusCode::OK => {
            let Some(got) = response
                .headers()
                .get(PROBE_HASH_HEADER)
                .and_then(|v| v.to_str().ok())
            else {
                // Legacy backend that doesn't echo the hash header.
                tracing::debug!("probe response missing {PROBE_HASH_HEADER}, treating as success");
                return Verdict::Success;
            };
            if got == expected_version {
                Verdict::Success
            } else {
                Verdict::Continue
            }
        }
        StatusCode::NOT_FOUND | StatusCode::SERVICE_UNAVAILABLE => Verdict::Continue,
        _ => Verdict::Success,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_only(code: u16) -> http::response::Builder {
        http::Response::builder().status(code)
    }

    fn to_response(builder: http::response::Builder, hash: Option<&str>) -> Response {
        let mut builder = builder;
        if let Some(h) = hash {
            builder = builder.header(PROBE_HASH_HEADER, h);
        }
        let response = builder.body(Vec::<u8>::new()).unwrap();
        Response::from(response)
    }

    #[test]
    fn matching_hash_is_success() {
        let r = to_response(status_only(200), Some("H1"));
        assert_eq!(classify(&r, "H1"), Verdict::Success);
    }

    #[test]
    fn mismatching_hash_continues() {
        let r = to_response(status_only(200), Some("H2"));
        assert_eq!(classify(&r, "H1"), Verdict::Continue);
    }

    #[test]
    fn missing_hash_header_is_success() {
        let r = to_response(status_only(200), None);
        assert_eq!(classify(&r, "H1"), Verdict::Success);
    }

    #[test]
    fn not_found_continues() {
        let r = to_response(status_only(404), None);
        assert_eq!(classify(&r, "H1"), Verdict::Continue);
    }

    #[test]
    fn service_unavailable_continues() {
        let r = to_response(status_only(503), None);
        assert_eq!(classify(&r, "H1"), Verdict::Continue);
    }

    #[test]
    fn redirect_is_success() {
        let r = to_response(status_only(302), None);
        assert_eq!(classify(&r, "H1"), Verdict::Success);
    }

    #[test]
    fn forbidden_is_success() {
        let r = to_response(status_only(403), None);
        assert_eq!(classify(&r, "H1"), Verdict::Success);
    }
}
