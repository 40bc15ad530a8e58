//! S3-based remote state store.
//!
//! Each scope's document is stored at `<prefix><scope>/terraform.tfstate`,
//! so several configurations can share one bucket.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use tracing::{debug, info};

use crate::config::Scope;
use crate::error::{Result, StateError};
use crate::s3::{http_status, load_client, normalize_prefix};

use super::document::StateDocument;
use super::local::STATE_FILENAME;
use super::store::RemoteStateStore;

/// S3-based state store.
#[derive(Debug, Clone)]
pub struct S3StateStore {
    /// S3 client.
    client: Client,
    /// Bucket name.
    bucket: String,
    /// Key prefix.
    prefix: String,
}

impl S3StateStore {
    /// Creates a new S3 state store from the environment's AWS settings.
    pub async fn new(bucket: &str, prefix: Option<&str>, region: Option<&str>) -> Self {
        Self::with_client(load_client(region).await, bucket, prefix)
    }

    /// Creates a new S3 state store with an existing client.
    #[must_use]
    pub fn with_client(client: Client, bucket: &str, prefix: Option<&str>) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            prefix: normalize_prefix(prefix),
        }
    }

    /// Gets the full S3 key for a scope's document.
    fn key(&self, scope: &Scope) -> String {
        format!("{}{scope}/{STATE_FILENAME}", self.prefix)
    }
}

#[async_trait]
impl RemoteStateStore for S3StateStore {
    async fn get(&self, scope: &Scope) -> Result<Option<StateDocument>> {
        let key = self.key(scope);
        debug!("Loading state from s3://{}/{key}", self.bucket);

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
                return Err(StateError::read(
                    scope.as_str(),
                    "s3",
                    format!("s3://{}/{key}: {}", self.bucket, DisplayErrorContext(&service_err)),
                )
                .into());
            }
        };

        let bytes = output.body.collect().await.map_err(|e| {
            StateError::read(scope.as_str(), "s3", format!("Failed to read S3 object: {e}"))
        })?;

        Ok(Some(StateDocument::new(bytes.to_vec())))
    }

    async fn put(&self, scope: &Scope, doc: &StateDocument) -> Result<()> {
        let key = self.key(scope);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(doc.as_bytes().to_vec()))
            .content_type("application/json")
            .send()
            .await
            .map_err(|e| {
                StateError::write(
                    scope.as_str(),
                    "s3",
                    format!("s3://{}/{key}: {}", self.bucket, DisplayErrorContext(&e)),
                )
            })?;

        info!("Saved state to s3://{}/{key} ({})", self.bucket, doc.short_digest());
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "s3"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TerrascopeError;
    use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
    use wiremock::matchers::{method, path};
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
    async fn test_get_returns_document_bytes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tf-state/team/infra/network/terraform.tfstate"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"serial\": 7}"))
            .mount(&server)
            .await;

        let store = S3StateStore::with_client(test_client(&server.uri()), "tf-state", Some("/team/"));
        let doc = store.get(&scope()).await.expect("get");
        assert_eq!(doc, Some(StateDocument::from("{\"serial\": 7}")));
    }

    #[tokio::test]
    async fn test_put_writes_scope_key() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/tf-state/infra/network/terraform.tfstate"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let store = S3StateStore::with_client(test_client(&server.uri()), "tf-state", None);
        store.put(&scope(), &StateDocument::from("D")).await.expect("put");
    }

    #[tokio::test]
    async fn test_server_error_is_read_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_string(
                "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
                 <Error><Code>AccessDenied</Code><Message>Access Denied</Message></Error>",
            ))
            .mount(&server)
            .await;

        let store = S3StateStore::with_client(test_client(&server.uri()), "tf-state", None);
        let result = store.get(&scope()).await;
        assert!(matches!(result, Err(TerrascopeError::State(StateError::Read { .. }))));
    }
}
