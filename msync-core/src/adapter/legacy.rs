//! Legacy workspace REST API adapter
//!
//! Endpoints: `{base}/workspace/{project_id}/{path}` for collections and
//! `{base}/workspace/{project_id}/{path}/{id}` for single records, with
//! GET / POST / PUT / DELETE. Records are camelCase JSON.

use super::http::{parse_json, send};
use super::SourceAdapter;
use crate::entity::{Entity, Record};
use crate::error::{SourceError, SyncError, SyncResult};
use crate::normalize::{normalize_collection, normalize_record};
use msync_common::ScopeKey;
use serde_json::Value;
use std::time::Duration;

const USER_AGENT: &str = concat!("msync/", env!("CARGO_PKG_VERSION"));

/// Source Adapter over the legacy REST API
pub struct LegacyAdapter {
    http_client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl LegacyAdapter {
    pub const NAME: &'static str = "legacy";

    pub fn new(base_url: impl Into<String>, token: Option<String>, timeout: Duration) -> SyncResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::InvalidInput(format!("HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.trim().is_empty()),
        })
    }

    fn collection_url(&self, key: &ScopeKey) -> String {
        format!(
            "{}/workspace/{}/{}",
            self.base_url,
            key.project_id,
            key.entity_type.legacy_path()
        )
    }

    fn record_url(&self, key: &ScopeKey, id: &str) -> String {
        format!("{}/{}", self.collection_url(key), id)
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        let request = self.http_client.request(method, url);
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait::async_trait]
impl SourceAdapter for LegacyAdapter {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn fetch(&self, key: &ScopeKey) -> Result<Vec<Entity>, SourceError> {
        let request = self.request(reqwest::Method::GET, self.collection_url(key));
        let (_, body) = send(Self::NAME, request).await?;

        // Empty workspaces answer `null` or an empty body; anything else
        // that is not JSON (a proxy error page) is Malformed
        normalize_collection(key, parse_json(Self::NAME, &body)?, Self::NAME)
    }

    async fn fetch_one(&self, key: &ScopeKey, id: &str) -> Result<Entity, SourceError> {
        let request = self.request(reqwest::Method::GET, self.record_url(key, id));
        let (_, body) = send(Self::NAME, request).await?;
        normalize_record(key, parse_json(Self::NAME, &body)?, Self::NAME)
    }

    async fn create(&self, key: &ScopeKey, payload: &Record) -> Result<Entity, SourceError> {
        let mut body = payload.clone();
        body.remove("id");

        let request = self
            .request(reqwest::Method::POST, self.collection_url(key))
            .json(&Value::Object(body));
        let (_, body) = send(Self::NAME, request).await?;
        normalize_record(key, parse_json(Self::NAME, &body)?, Self::NAME)
    }

    async fn update(&self, key: &ScopeKey, id: &str, patch: &Record) -> Result<Entity, SourceError> {
        let mut body = patch.clone();
        body.remove("id");

        let request = self
            .request(reqwest::Method::PUT, self.record_url(key, id))
            .json(&Value::Object(body));
        let (_, body) = send(Self::NAME, request).await?;
        normalize_record(key, parse_json(Self::NAME, &body)?, Self::NAME)
    }

    async fn remove(&self, key: &ScopeKey, id: &str) -> Result<(), SourceError> {
        let request = self.request(reqwest::Method::DELETE, self.record_url(key, id));
        send(Self::NAME, request).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use msync_common::EntityType;

    #[test]
    fn test_urls_use_legacy_path_segment() {
        let adapter = LegacyAdapter::new("http://localhost:3001/api/", None, Duration::from_secs(1)).unwrap();
        let key = ScopeKey::new("p1", EntityType::ImpactStory);
        assert_eq!(
            adapter.collection_url(&key),
            "http://localhost:3001/api/workspace/p1/impact-stories"
        );
        assert_eq!(
            adapter.record_url(&key, "s-9"),
            "http://localhost:3001/api/workspace/p1/impact-stories/s-9"
        );
    }

    #[test]
    fn test_blank_token_is_dropped() {
        let adapter = LegacyAdapter::new("http://x", Some("  ".to_string()), Duration::from_secs(1)).unwrap();
        assert!(adapter.token.is_none());
    }
}
