//! Fetching content behind note pointers.
//!
//! Notes enrich the index with the metadata document their pointer names.
//! The fetch is best-effort: a miss or failure never blocks a projection.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;

use namegraph_core::Pointer;

use crate::error::{GraphError, Result};

/// Source of pointer content.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    /// Content for `ptr`, or `None` when the source has none.
    async fn fetch(&self, ptr: &Pointer) -> Result<Option<Vec<u8>>>;
}

/// Fetches `{cid}`-templated URLs from an HTTP gateway.
#[derive(Debug, Clone)]
pub struct GatewayFetcher {
    client: reqwest::Client,
    template: String,
}

impl GatewayFetcher {
    pub fn new(template: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GraphError::Content(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            template: template.into(),
        })
    }

    /// URL serving the content of `ptr`.
    pub fn url(&self, ptr: &Pointer) -> String {
        self.template.replace("{cid}", &ptr.to_string())
    }
}

#[async_trait]
impl ContentFetcher for GatewayFetcher {
    async fn fetch(&self, ptr: &Pointer) -> Result<Option<Vec<u8>>> {
        let url = self.url(ptr);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| GraphError::Content(format!("{url}: {e}")))?;

        if !resp.status().is_success() {
            tracing::debug!(%url, status = %resp.status(), "no content at gateway");
            return Ok(None);
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| GraphError::Content(format!("{url}: {e}")))?;
        Ok(Some(body.to_vec()))
    }
}

/// In-memory content for tests.
#[derive(Default)]
pub struct MemoryContent {
    items: RwLock<HashMap<String, Vec<u8>>>,
    failing: RwLock<bool>,
}

impl MemoryContent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, ptr: &Pointer, content: impl Into<Vec<u8>>) {
        if let Ok(mut items) = self.items.write() {
            items.insert(ptr.to_string(), content.into());
        }
    }

    /// Make every fetch fail until reset.
    pub fn set_failing(&self, failing: bool) {
        if let Ok(mut flag) = self.failing.write() {
            *flag = failing;
        }
    }
}

#[async_trait]
impl ContentFetcher for MemoryContent {
    async fn fetch(&self, ptr: &Pointer) -> Result<Option<Vec<u8>>> {
        let failing = self.failing.read().map(|f| *f).unwrap_or(false);
        if failing {
            return Err(GraphError::Content(format!("{ptr}: unavailable")));
        }
        let items = self
            .items
            .read()
            .map_err(|_| GraphError::Content("content lock poisoned".into()))?;
        Ok(items.get(&ptr.to_string()).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CID: &str = "bafybeihe67oiezjclcok2toyvbypldy4rhe4jybc6kydf75cnvvu2424zu";

    fn ptr() -> Pointer {
        Pointer::parse(CID).unwrap()
    }

    #[test]
    fn test_default_gateway_url() {
        let fetcher = GatewayFetcher::new(
            crate::config::GraphConfig::default().content_gateway,
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(
            fetcher.url(&ptr()),
            format!("https://{}.ipfs.w3s.link/metadata.json", CID)
        );
    }

    #[tokio::test]
    async fn test_gateway_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/{}/metadata.json", CID)))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"name":"x"}"#))
            .mount(&server)
            .await;

        let fetcher = GatewayFetcher::new(
            format!("{}/{{cid}}/metadata.json", server.uri()),
            Duration::from_secs(5),
        )
        .unwrap();
        let body = fetcher.fetch(&ptr()).await.unwrap().unwrap();
        assert_eq!(body, br#"{"name":"x"}"#.to_vec());
    }

    #[tokio::test]
    async fn test_gateway_miss_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fetcher = GatewayFetcher::new(
            format!("{}/{{cid}}", server.uri()),
            Duration::from_secs(5),
        )
        .unwrap();
        assert!(fetcher.fetch(&ptr()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_content() {
        let content = MemoryContent::new();
        assert!(content.fetch(&ptr()).await.unwrap().is_none());
        content.insert(&ptr(), b"{}".to_vec());
        assert_eq!(content.fetch(&ptr()).await.unwrap(), Some(b"{}".to_vec()));
        content.set_failing(true);
        assert!(content.fetch(&ptr()).await.is_err());
    }
}
