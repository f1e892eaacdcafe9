//! HTTP client for the content-management collaborator.
//!
//! The CMS owns every durable record; the pipeline only calls the declared
//! internal operations. All POSTs are idempotent by payload
//! `idempotency_key`, all PATCHes by content id, so retries are safe.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::debug;

use inlet_core::{defaults, new_v7, CanonicalItem, ContentStatus, Error, Result};

/// Response of `create_or_get`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateContentResponse {
    pub id: String,
    pub status: ContentStatus,
    /// False when the idempotency key matched an existing record.
    pub created: bool,
}

/// Artifact URLs attached after the media stage.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ArtifactUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_sec: Option<i64>,
}

/// Request body for `create_transcript`.
#[derive(Debug, Clone, Serialize)]
pub struct CreateTranscriptRequest {
    pub content_item_id: String,
    pub full_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub word_timestamps: Option<JsonValue>,
    pub language: String,
}

/// Response of `create_transcript`.
#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptResponse {
    pub id: String,
    pub created_at: DateTime<Utc>,
}

/// Operations the pipeline performs against the CMS.
#[async_trait]
pub trait CmsClient: Send + Sync {
    /// Create a canonical record, or return the existing one for the same
    /// idempotency key.
    async fn create_or_get(&self, item: &CanonicalItem) -> Result<CreateContentResponse>;

    async fn update_status(
        &self,
        content_id: &str,
        status: ContentStatus,
        failure_reason: Option<&str>,
    ) -> Result<()>;

    async fn update_artifacts(&self, content_id: &str, update: &ArtifactUpdate) -> Result<()>;

    async fn create_transcript(
        &self,
        request: &CreateTranscriptRequest,
    ) -> Result<TranscriptResponse>;

    async fn link_transcript(&self, content_id: &str, transcript_id: &str) -> Result<()>;

    async fn update_embedding(
        &self,
        content_id: &str,
        embedding: &[f32],
        topic_tags: &[String],
    ) -> Result<()>;

    /// 2xx on `/health` means reachable.
    async fn health_check(&self) -> Result<bool>;
}

/// Wire shape of `POST /internal/content-items`.
#[derive(Serialize)]
struct CreateContentRequest<'a> {
    idempotency_key: &'a str,
    #[serde(rename = "type")]
    content_type: &'a str,
    source: &'a str,
    status: ContentStatus,
    title: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    body_text: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    excerpt: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    author: Option<&'a str>,
    source_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_feed_url: Option<&'a str>,
    original_url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    published_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    media_url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thumbnail_url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_sec: Option<i64>,
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    topic_tags: &'a [String],
    metadata: JsonValue,
}

/// Reqwest-based implementation of [`CmsClient`].
pub struct HttpCmsClient {
    base_url: String,
    service_token: String,
    client: reqwest::Client,
}

impl HttpCmsClient {
    pub fn new(base_url: impl Into<String>, service_token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            service_token: service_token.into(),
            client: reqwest::Client::builder()
                .timeout(defaults::CMS_TIMEOUT)
                .build()
                .expect("reqwest client construction is infallible with static config"),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let request_id = new_v7().to_string();
        debug!(request_id = %request_id, path, "CMS request");
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.service_token)
            .header("x-service-name", defaults::SERVICE_NAME)
            .header("x-request-id", request_id)
    }

    /// Map non-2xx responses onto the error taxonomy: 4xx is a rejection
    /// (never retried), everything else an outage.
    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = format!("CMS returned {}: {}", status, body);
        if status.is_client_error() {
            Err(Error::UpstreamRejected(message))
        } else {
            Err(Error::UpstreamUnavailable(message))
        }
    }
}

#[async_trait]
impl CmsClient for HttpCmsClient {
    async fn create_or_get(&self, item: &CanonicalItem) -> Result<CreateContentResponse> {
        let request = CreateContentRequest {
            idempotency_key: &item.idempotency_key,
            content_type: item.content_type.as_str(),
            source: item.source_kind.as_str(),
            status: item.status,
            title: &item.title,
            body_text: item.body_text.as_deref(),
            excerpt: item.excerpt.as_deref(),
            author: item.author.as_deref(),
            source_name: &item.source_name,
            source_feed_url: item.source_feed_url.as_deref(),
            original_url: &item.original_url,
            published_at: item.published_at,
            media_url: item.media_url.as_deref(),
            thumbnail_url: item.thumbnail_url.as_deref(),
            duration_sec: item.duration_seconds,
            topic_tags: &item.topic_tags,
            metadata: serde_json::to_value(&item.attributes)?,
        };

        let response = self
            .request(reqwest::Method::POST, "/internal/content-items")
            .json(&request)
            .send()
            .await?;
        let response = Self::check_status(response).await?;
        Ok(response.json().await?)
    }

    async fn update_status(
        &self,
        content_id: &str,
        status: ContentStatus,
        failure_reason: Option<&str>,
    ) -> Result<()> {
        let mut body = serde_json::json!({ "status": status });
        if let Some(reason) = failure_reason {
            body["failure_reason"] = serde_json::json!(reason);
        }
        let response = self
            .request(
                reqwest::Method::PATCH,
                &format!("/internal/content-items/{}/status", content_id),
            )
            .json(&body)
            .send()
            .await?;
        Self::check_status(response).await?;
        Ok(())
    }

    async fn update_artifacts(&self, content_id: &str, update: &ArtifactUpdate) -> Result<()> {
        let response = self
            .request(
                reqwest::Method::PATCH,
                &format!("/internal/content-items/{}/artifacts", content_id),
            )
            .json(update)
            .send()
            .await?;
        Self::check_status(response).await?;
        Ok(())
    }

    async fn create_transcript(
        &self,
        request: &CreateTranscriptRequest,
    ) -> Result<TranscriptResponse> {
        let response = self
            .request(reqwest::Method::POST, "/internal/transcripts")
            .json(request)
            .send()
            .await?;
        let response = Self::check_status(response).await?;
        Ok(response.json().await?)
    }

    async fn link_transcript(&self, content_id: &str, transcript_id: &str) -> Result<()> {
        let response = self
            .request(
                reqwest::Method::PATCH,
                &format!("/internal/content-items/{}/transcript", content_id),
            )
            .json(&serde_json::json!({ "transcript_id": transcript_id }))
            .send()
            .await?;
        Self::check_status(response).await?;
        Ok(())
    }

    async fn update_embedding(
        &self,
        content_id: &str,
        embedding: &[f32],
        topic_tags: &[String],
    ) -> Result<()> {
        let mut body = serde_json::json!({ "embedding": embedding });
        if !topic_tags.is_empty() {
            body["topic_tags"] = serde_json::json!(topic_tags);
        }
        let response = self
            .request(
                reqwest::Method::PATCH,
                &format!("/internal/content-items/{}/embedding", content_id),
            )
            .json(&body)
            .send()
            .await?;
        Self::check_status(response).await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        match self.request(reqwest::Method::GET, "/health").send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(_) => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_request_serialization_shape() {
        let request = CreateContentRequest {
            idempotency_key: "https://example.com/a",
            content_type: "article",
            source: "feed",
            status: ContentStatus::Ready,
            title: "A headline",
            body_text: None,
            excerpt: Some("short"),
            author: None,
            source_name: "example.com",
            source_feed_url: Some("https://example.com/rss"),
            original_url: "https://example.com/a",
            published_at: None,
            media_url: None,
            thumbnail_url: None,
            duration_sec: None,
            topic_tags: &[],
            metadata: serde_json::json!({"moderation": {"decision": "auto_approved"}}),
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["idempotency_key"], "https://example.com/a");
        assert_eq!(json["type"], "article");
        assert_eq!(json["source"], "feed");
        assert_eq!(json["status"], "ready");
        assert!(json.get("body_text").is_none());
        assert!(json.get("topic_tags").is_none(), "empty tags omitted");
        assert_eq!(json["metadata"]["moderation"]["decision"], "auto_approved");
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = HttpCmsClient::new("http://cms.test/", "tok");
        assert_eq!(client.base_url, "http://cms.test");
    }

    #[test]
    fn test_create_response_deserialization() {
        let json = r#"{"id": "c-1", "status": "pending", "created": true}"#;
        let response: CreateContentResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.id, "c-1");
        assert_eq!(response.status, ContentStatus::Pending);
        assert!(response.created);
    }
}
