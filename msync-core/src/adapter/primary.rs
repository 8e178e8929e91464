//! Hosted database adapter
//!
//! Talks to the database's REST surface (`/rest/v1/{table}`) using
//! PostgREST-style filters. Column names are snake_case on the wire and are
//! normalized to the canonical camelCase shape on the way in.

use super::http::{parse_json, send};
use super::SourceAdapter;
use crate::entity::{Entity, Record};
use crate::error::{SourceError, SyncError, SyncResult};
use crate::normalize::{normalize_collection, normalize_record, to_snake_case_record};
use msync_common::{uuid_utils, ScopeKey};
use serde_json::Value;
use std::time::Duration;

const USER_AGENT: &str = concat!("msync/", env!("CARGO_PKG_VERSION"));

/// Source Adapter over the hosted database
pub struct PrimaryAdapter {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
    current_user_id: Option<String>,
}

impl PrimaryAdapter {
    pub const NAME: &'static str = "primary";

    /// Build the adapter
    ///
    /// `current_user_id` is stamped onto created records as `created_by`.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        current_user_id: Option<String>,
        timeout: Duration,
    ) -> SyncResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::InvalidInput(format!("HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            current_user_id,
        })
    }

    fn table_url(&self, key: &ScopeKey) -> String {
        format!("{}/rest/v1/{}", self.base_url, key.entity_type.table())
    }

    fn request(&self, method: reqwest::Method, key: &ScopeKey) -> reqwest::RequestBuilder {
        self.http_client
            .request(method, self.table_url(key))
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    /// The hosted database keys projects by UUID; anything else cannot match
    fn check_project(&self, key: &ScopeKey) -> Result<(), SourceError> {
        if uuid_utils::is_valid_uuid(&key.project_id) {
            Ok(())
        } else {
            Err(SourceError::rejected(
                Self::NAME,
                format!("Invalid project ID format: {}. Expected UUID.", key.project_id),
            ))
        }
    }

    /// Write endpoints answer with an array of affected rows
    fn single_row(&self, key: &ScopeKey, body: &str, what: &str) -> Result<Entity, SourceError> {
        match parse_json(Self::NAME, body)? {
            Value::Array(rows) => match rows.into_iter().next() {
                Some(row) => normalize_record(key, row, Self::NAME),
                None => Err(SourceError::rejected(
                    Self::NAME,
                    format!("{} {} matched no rows", key.entity_type, what),
                )),
            },
            row @ Value::Object(_) => normalize_record(key, row, Self::NAME),
            _ => Err(SourceError::malformed(
                Self::NAME,
                format!("{} {} returned no representation", key.entity_type, what),
            )),
        }
    }
}

#[async_trait::async_trait]
impl SourceAdapter for PrimaryAdapter {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn fetch(&self, key: &ScopeKey) -> Result<Vec<Entity>, SourceError> {
        self.check_project(key)?;
        let project_filter = format!("eq.{}", key.project_id);
        let request = self.request(reqwest::Method::GET, key).query(&[
            ("select", "*"),
            ("project_id", project_filter.as_str()),
            ("order", "created_at.desc"),
        ]);

        let (_, body) = send(Self::NAME, request).await?;
        normalize_collection(key, parse_json(Self::NAME, &body)?, Self::NAME)
    }

    async fn fetch_one(&self, key: &ScopeKey, id: &str) -> Result<Entity, SourceError> {
        self.check_project(key)?;
        let id_filter = format!("eq.{}", id);
        let project_filter = format!("eq.{}", key.project_id);
        let request = self.request(reqwest::Method::GET, key).query(&[
            ("select", "*"),
            ("id", id_filter.as_str()),
            ("project_id", project_filter.as_str()),
        ]);

        let (_, body) = send(Self::NAME, request).await?;
        self.single_row(key, &body, "lookup")
    }

    async fn create(&self, key: &ScopeKey, payload: &Record) -> Result<Entity, SourceError> {
        self.check_project(key)?;
        let mut row = to_snake_case_record(payload);
        row.remove("id");
        row.insert("project_id".to_string(), Value::String(key.project_id.clone()));
        if let Some(user) = &self.current_user_id {
            row.entry("created_by".to_string())
                .or_insert_with(|| Value::String(user.clone()));
        }

        tracing::debug!(scope = %key, "Inserting row");
        let request = self
            .request(reqwest::Method::POST, key)
            .header("Prefer", "return=representation")
            .json(&Value::Object(row));

        let (_, body) = send(Self::NAME, request).await?;
        self.single_row(key, &body, "insert")
    }

    async fn update(&self, key: &ScopeKey, id: &str, patch: &Record) -> Result<Entity, SourceError> {
        self.check_project(key)?;
        let mut row = to_snake_case_record(patch);
        row.remove("id");
        row.remove("project_id");
        row.insert(
            "updated_at".to_string(),
            Value::String(msync_common::time::now().to_rfc3339()),
        );

        let id_filter = format!("eq.{}", id);
        let project_filter = format!("eq.{}", key.project_id);
        let request = self
            .request(reqwest::Method::PATCH, key)
            .query(&[("id", id_filter.as_str()), ("project_id", project_filter.as_str())])
            .header("Prefer", "return=representation")
            .json(&Value::Object(row));

        let (_, body) = send(Self::NAME, request).await?;
        self.single_row(key, &body, "update")
    }

    async fn remove(&self, key: &ScopeKey, id: &str) -> Result<(), SourceError> {
        self.check_project(key)?;
        let id_filter = format!("eq.{}", id);
        let project_filter = format!("eq.{}", key.project_id);
        let request = self
            .request(reqwest::Method::DELETE, key)
            .query(&[("id", id_filter.as_str()), ("project_id", project_filter.as_str())]);

        send(Self::NAME, request).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use msync_common::EntityType;

    fn adapter() -> PrimaryAdapter {
        PrimaryAdapter::new(
            "https://db.example.co/",
            "anon-key",
            Some("user-1".to_string()),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_table_url_strips_trailing_slash() {
        let key = ScopeKey::new("p1", EntityType::VoiceNote);
        assert_eq!(adapter().table_url(&key), "https://db.example.co/rest/v1/voice_notes");
    }

    #[tokio::test]
    async fn test_non_uuid_project_rejected_without_network() {
        let key = ScopeKey::new("p1", EntityType::Task);
        let err = adapter().fetch(&key).await.unwrap_err();
        assert!(matches!(err, SourceError::Rejected { .. }));
    }
}
