//! S3 lock backend.
//!
//! Lock records are JSON objects at `<prefix><scope>.lock`. Creation uses
//! `If-None-Match: *` so only one writer can create a record; release reads
//! the record, checks the token, then deletes with `If-Match: <etag>` so a
//! record replaced in between is never removed.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use tracing::{debug, info, warn};

use crate::config::Scope;
use crate::error::{LockError, Result, TerrascopeError};
use crate::s3::{http_status, is_precondition_failure, load_client, normalize_prefix};

use super::backend::{DeleteOutcome, LockBackend, PutOutcome};
use super::record::{LockRecord, LockToken};

/// S3-based lock backend.
#[derive(Debug, Clone)]
pub struct S3LockBackend {
    /// S3 client.
    client: Client,
    /// Bucket name.
    bucket: String,
    /// Key prefix.
    prefix: String,
}

fn unavailable(message: String) -> TerrascopeError {
    LockError::unavailable("s3", message).into()
}

impl S3LockBackend {
    /// Creates a new S3 lock backend from the environment's AWS settings.
    pub async fn new(bucket: &str, prefix: Option<&str>, region: Option<&str>) -> Self {
        Self::with_client(load_client(region).await, bucket, prefix)
    }

    /// Creates a new S3 lock backend with an existing client.
    #[must_use]
    pub fn with_client(client: Client, bucket: &str, prefix: Option<&str>) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            prefix: normalize_prefix(prefix),
        }
    }

    /// Gets the object key for a scope's record.
    fn key(&self, scope: &Scope) -> String {
        format!("{}{scope}.lock", self.prefix)
    }

    fn encode(record: &LockRecord) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(record).map_err(|e| unavailable(format!("Failed to serialize lock: {e}")))
    }

    /// Reads a record together with its ETag.
    async fn read(&self, scope: &Scope) -> Result<Option<(LockRecord, Option<String>)>> {
        let key = self.key(scope);
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await;

        let output = match result {
            Ok(output) => output,
            Err(sdk_err) => {
                if http_status(&sdk_err) == Some(404) {
                    return Ok(None);
                }
                let service_err = sdk_err.into_service_error();
                if service_err.is_no_such_key() {
                    return Ok(None);
                }
                return Err(unavailable(format!(
                    "S3 get error for s3://{}/{key}: {}",
                    self.bucket,
                    DisplayErrorContext(&service_err)
                )));
            }
        };

        let etag = output.e_tag().map(ToString::to_string);
        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| unavailable(format!("Failed to read S3 object: {e}")))?
            .into_bytes();

        let record = serde_json::from_slice(&bytes).map_err(|e| LockError::Corrupted {
            scope: scope.to_string(),
            message: format!("Failed to parse s3://{}/{key}: {e}", self.bucket),
        })?;

        Ok(Some((record, etag)))
    }
}

#[async_trait]
impl LockBackend for S3LockBackend {
    async fn put_if_absent(&self, scope: &Scope, record: &LockRecord) -> Result<PutOutcome> {
        let key = self.key(scope);
        let body = Self::encode(record)?;

        let result = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(body))
            .content_type("application/json")
            .if_none_match("*")
            .send()
            .await;

        match result {
            Ok(_) => {
                debug!("Created lock record s3://{}/{key}", self.bucket);
                Ok(PutOutcome::Created)
            }
            Err(err) if is_precondition_failure(&err) => Ok(PutOutcome::AlreadyExists),
            Err(err) => Err(unavailable(format!("S3 put error: {}", DisplayErrorContext(&err)))),
        }
    }

    async fn put_unconditional(&self, scope: &Scope, record: &LockRecord) -> Result<()> {
        let key = self.key(scope);
        let body = Self::encode(record)?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(body))
            .content_type("application/json")
            .send()
            .await
            .map_err(|e| unavailable(format!("S3 put error: {}", DisplayErrorContext(&e))))?;

        info!("Overwrote lock record s3://{}/{key}", self.bucket);
        Ok(())
    }

    async fn delete_if_matches(&self, scope: &Scope, token: &LockToken) -> Result<DeleteOutcome> {
        let Some((existing, etag)) = self.read(scope).await? else {
            return Ok(DeleteOutcome::Mismatch);
        };

        if existing.token != *token {
            return Ok(DeleteOutcome::Mismatch);
        }

        let key = self.key(scope);
        let Some(etag) = etag else {
            warn!("Lock record s3://{}/{key} has no ETag; leaving it in place", self.bucket);
            return Ok(DeleteOutcome::Mismatch);
        };

        let request = self.client.delete_object().bucket(&self.bucket).key(&key).if_match(etag);
        match request.send().await {
            Ok(_) => Ok(DeleteOutcome::Deleted),
            Err(err) if is_precondition_failure(&err) => {
                debug!("Lock record s3://{}/{key} changed before delete", self.bucket);
                Ok(DeleteOutcome::Mismatch)
            }
            Err(err) => Err(unavailable(format!("S3 delete error: {}", DisplayErrorContext(&err)))),
        }
    }

    async fn get(&self, scope: &Scope) -> Result<Option<LockRecord>> {
        Ok(self.read(scope).await?.map(|(record, _)| record))
    }

    fn backend_type(&self) -> &'static str {
        "s3"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(endpoint: &str) -> Client {
        let config = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .credentials_provider(Credentials::new("test", "test", None, None, "static"))
            .endpoint_url(endpoint)
            .force_path_style(true)
            .build();
        Client::from_conf(config)
    }

    fn scope() -> Scope {
        Scope::new("infra/network").expect("valid scope")
    }

    #[tokio::test]
    async fn test_put_if_absent_sends_conditional_header() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/tf-locks/locks/infra/network.lock"))
            .and(header("if-none-match", "*"))
            .respond_with(ResponseTemplate::new(200).insert_header("ETag", "\"abc\""))
            .expect(1)
            .mount(&server)
            .await;

        let backend = S3LockBackend::with_client(test_client(&server.uri()), "tf-locks", Some("locks"));
        let record = LockRecord::new(&scope(), "a", "apply");

        let outcome = backend.put_if_absent(&scope(), &record).await.expect("put");
        assert_eq!(outcome, PutOutcome::Created);
    }

    #[tokio::test]
    async fn test_put_if_absent_reports_existing_record() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/tf-locks/infra/network.lock"))
            .respond_with(ResponseTemplate::new(412).set_body_string(
                "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
                 <Error><Code>PreconditionFailed</Code><Message>At least one of the pre-conditions you specified did not hold</Message></Error>",
            ))
            .mount(&server)
            .await;

        let backend = S3LockBackend::with_client(test_client(&server.uri()), "tf-locks", None);
        let record = LockRecord::new(&scope(), "a", "apply");

        let outcome = backend.put_if_absent(&scope(), &record).await.expect("put");
        assert_eq!(outcome, PutOutcome::AlreadyExists);
    }

    #[tokio::test]
    async fn test_delete_with_foreign_token_is_mismatch() {
        let server = MockServer::start().await;
        let stored = LockRecord::new(&scope(), "someone-else", "apply");
        Mock::given(method("GET"))
            .and(path("/tf-locks/infra/network.lock"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("ETag", "\"abc\"")
                    .set_body_bytes(serde_json::to_vec(&stored).expect("serialize")),
            )
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(204))
            .expect(0)
            .mount(&server)
            .await;

        let backend = S3LockBackend::with_client(test_client(&server.uri()), "tf-locks", None);
        let outcome = backend
            .delete_if_matches(&scope(), &LockToken::generate())
            .await
            .expect("delete");
        assert_eq!(outcome, DeleteOutcome::Mismatch);
    }

    #[tokio::test]
    async fn test_delete_with_matching_token_uses_etag() {
        let server = MockServer::start().await;
        let stored = LockRecord::new(&scope(), "me", "apply");
        Mock::given(method("GET"))
            .and(path("/tf-locks/infra/network.lock"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("ETag", "\"abc\"")
                    .set_body_bytes(serde_json::to_vec(&stored).expect("serialize")),
            )
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/tf-locks/infra/network.lock"))
            .and(header("if-match", "\"abc\""))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let backend = S3LockBackend::with_client(test_client(&server.uri()), "tf-locks", None);
        let outcome = backend
            .delete_if_matches(&scope(), &stored.token)
            .await
            .expect("delete");
        assert_eq!(outcome, DeleteOutcome::Deleted);
    }

    #[tokio::test]
    async fn test_delete_without_etag_leaves_record() {
        let server = MockServer::start().await;
        let stored = LockRecord::new(&scope(), "me", "apply");
        Mock::given(method("GET"))
            .and(path("/tf-locks/infra/network.lock"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(serde_json::to_vec(&stored).expect("serialize")))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(204))
            .expect(0)
            .mount(&server)
            .await;

        let backend = S3LockBackend::with_client(test_client(&server.uri()), "tf-locks", None);
        let outcome = backend
            .delete_if_matches(&scope(), &stored.token)
            .await
            .expect("delete");
        assert_eq!(outcome, DeleteOutcome::Mismatch);
    }

    #[tokio::test]
    async fn test_get_missing_record() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_string(
                "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
                 <Error><Code>NoSuchKey</Code><Message>The specified key does not exist.</Message></Error>",
            ))
            .mount(&server)
            .await;

        let backend = S3LockBackend::with_client(test_client(&server.uri()), "tf-locks", None);
        assert!(backend.get(&scope()).await.expect("get").is_none());
    }
}
