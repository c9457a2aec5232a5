//! Translation of inbound HTTP headers into outbound gRPC request metadata.
//!
//! Forwarded:
//!
//! - `authorization`, unchanged;
//! - `grpc-metadata-<key>`, as `<key>`.
//!
//! `grpc-timeout` becomes the outbound call deadline. Without it, the
//! gateway's default call timeout applies. Everything else is dropped.

use axum::http::{HeaderMap, header::AUTHORIZATION};
use core::time::Duration;
use greeter_core::{ClassifiedError, Condition, classify};
use tonic::metadata::{Ascii, MetadataKey, MetadataValue};

const METADATA_PREFIX: &str = "grpc-metadata-";
const GRPC_TIMEOUT: &str = "grpc-timeout";

/// Wraps `message` in a request carrying the forwarded metadata and deadline.
///
/// # Errors
///
/// `InvalidArgument` if `grpc-timeout` is present but malformed.
pub fn outbound<T>(
    message: T,
    headers: &HeaderMap,
    default_timeout: Option<Duration>,
) -> Result<tonic::Request<T>, ClassifiedError> {
    let mut request = tonic::Request::new(message);
    let metadata = request.metadata_mut();

    for (name, value) in headers {
        let key = if name == AUTHORIZATION {
            AUTHORIZATION.as_str()
        } else if let Some(key) = name.as_str().strip_prefix(METADATA_PREFIX) {
            key
        } else {
            continue;
        };

        let Ok(key) = MetadataKey::<Ascii>::from_bytes(key.as_bytes()) else {
            continue;
        };
        let Some(value) = value
            .to_str()
            .ok()
            .and_then(|v| v.parse::<MetadataValue<Ascii>>().ok())
        else {
            continue;
        };
        metadata.append(key, value);
    }

    let timeout = match headers.get(GRPC_TIMEOUT) {
        Some(raw) => Some(
            raw.to_str()
                .ok()
                .and_then(parse_grpc_timeout)
                .ok_or_else(|| classify(Condition::MalformedField { field: GRPC_TIMEOUT }))?,
        ),
        None => default_timeout,
    };
    if let Some(timeout) = timeout {
        request.set_timeout(timeout);
    }

    Ok(request)
}

/// Parses a `grpc-timeout` value: at most eight ASCII digits followed by one
/// of `H`, `M`, `S`, `m`, `u`, `n`.
pub fn parse_grpc_timeout(raw: &str) -> Option<Duration> {
    if !raw.is_ascii() || raw.len() < 2 {
        return None;
    }
    let (digits, unit) = raw.split_at(raw.len() - 1);
    if digits.len() > 8 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let value: u64 = digits.parse().ok()?;

    Some(match unit {
        "H" => Duration::from_secs(value * 3_600),
        "M" => Duration::from_secs(value * 60),
        "S" => Duration::from_secs(value),
        "m" => Duration::from_millis(value),
        "u" => Duration::from_micros(value),
        "n" => Duration::from_nanos(value),
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use greeter_core::ErrorCategory;

    #[test]
    fn parses_every_unit() {
        assert_eq!(parse_grpc_timeout("2H"), Some(Duration::from_secs(7_200)));
        assert_eq!(parse_grpc_timeout("3M"), Some(Duration::from_secs(180)));
        assert_eq!(parse_grpc_timeout("1S"), Some(Duration::from_secs(1)));
        assert_eq!(parse_grpc_timeout("250m"), Some(Duration::from_millis(250)));
        assert_eq!(parse_grpc_timeout("10u"), Some(Duration::from_micros(10)));
        assert_eq!(parse_grpc_timeout("99999999n"), Some(Duration::from_nanos(99_999_999)));
    }

    #[test]
    fn rejects_malformed_timeouts() {
        for raw in ["", "S", "10", "10x", "-1S", "123456789m", "1.5S", "10µ"] {
            assert_eq!(parse_grpc_timeout(raw), None, "{raw:?}");
        }
    }

    #[test]
    fn forwards_authorization_and_prefixed_metadata_only() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        headers.insert("grpc-metadata-tenant", HeaderValue::from_static("acme"));
        headers.insert("x-request-id", HeaderValue::from_static("r-1"));
        headers.insert("content-type", HeaderValue::from_static("application/json"));

        let request = outbound((), &headers, None).unwrap();
        let metadata = request.metadata();

        assert_eq!(metadata.get("authorization").unwrap(), "Bearer abc");
        assert_eq!(metadata.get("tenant").unwrap(), "acme");
        assert!(metadata.get("x-request-id").is_none());
        assert!(metadata.get("content-type").is_none());
    }

    #[test]
    fn timeout_header_overrides_default() {
        let mut headers = HeaderMap::new();
        headers.insert(GRPC_TIMEOUT, HeaderValue::from_static("500m"));

        let request = outbound((), &headers, Some(Duration::from_secs(10))).unwrap();
        assert_eq!(request.metadata().get(GRPC_TIMEOUT).unwrap(), "500000u");
    }

    #[test]
    fn default_timeout_applies_without_header() {
        let request = outbound((), &HeaderMap::new(), Some(Duration::from_secs(1))).unwrap();
        assert!(request.metadata().get(GRPC_TIMEOUT).is_some());

        let request = outbound((), &HeaderMap::new(), None).unwrap();
        assert!(request.metadata().get(GRPC_TIMEOUT).is_none());
    }

    #[test]
    fn malformed_timeout_is_invalid_argument() {
        let mut headers = HeaderMap::new();
        headers.insert(GRPC_TIMEOUT, HeaderValue::from_static("soon"));

        let err = outbound((), &headers, None).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::InvalidArgument);
        assert_eq!(err.message(), "grpc-timeout is malformed");
    }
}
