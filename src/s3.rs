//! Shared S3 plumbing for the lock and state backends.

use aws_sdk_s3::Client;
use aws_sdk_s3::error::SdkError;

/// Loads an S3 client from the environment, optionally pinned to a region.
pub(crate) async fn load_client(region: Option<&str>) -> Client {
    let config = if let Some(region_str) = region {
        aws_config::from_env()
            .region(aws_config::Region::new(region_str.to_string()))
            .load()
            .await
    } else {
        aws_config::load_from_env().await
    };

    Client::new(&config)
}

/// Normalises a key prefix to either `""` or `"segment/.../"`.
pub(crate) fn normalize_prefix(prefix: Option<&str>) -> String {
    prefix
        .map(|p| {
            let p = p.trim_matches('/');
            if p.is_empty() {
                String::new()
            } else {
                format!("{p}/")
            }
        })
        .unwrap_or_default()
}

/// Returns the HTTP status of a failed request, if a response was received.
pub(crate) fn http_status<E>(err: &SdkError<E>) -> Option<u16> {
    err.raw_response().map(|response| response.status().as_u16())
}

/// Returns true if the request was rejected by a conditional header.
///
/// S3 answers 412 when `If-None-Match`/`If-Match` fails and 409 when a
/// concurrent conditional write won the race.
pub(crate) fn is_precondition_failure<E>(err: &SdkError<E>) -> bool {
    matches!(http_status(err), Some(409 | 412))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_prefix() {
        assert_eq!(normalize_prefix(None), "");
        assert_eq!(normalize_prefix(Some("")), "");
        assert_eq!(normalize_prefix(Some("/")), "");
        assert_eq!(normalize_prefix(Some("locks")), "locks/");
        assert_eq!(normalize_prefix(Some("/team/locks/")), "team/locks/");
    }
}
