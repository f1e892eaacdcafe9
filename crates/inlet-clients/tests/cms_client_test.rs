//! Integration tests for the CMS collaborator client against a mock server.
//!
//! Verifies the wire shapes of every internal operation, the service
//! headers, and the 4xx/5xx error mapping.

use std::collections::BTreeMap;

use wiremock::matchers::{body_partial_json, header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use inlet_clients::{ArtifactUpdate, CmsClient, CreateTranscriptRequest, HttpCmsClient};
use inlet_core::{CanonicalItem, ContentStatus, ContentType, Error, SourceKind};

fn article(key: &str) -> CanonicalItem {
    CanonicalItem {
        idempotency_key: key.to_string(),
        content_type: ContentType::Article,
        source_kind: SourceKind::Feed,
        status: ContentStatus::Ready,
        title: "SpaceX launches again".into(),
        body_text: Some("Full body".into()),
        excerpt: None,
        author: Some("jo".into()),
        source_name: "example.com".into(),
        source_feed_url: Some("https://example.com/rss".into()),
        media_url: None,
        thumbnail_url: None,
        original_url: key.to_string(),
        duration_seconds: None,
        topic_tags: vec!["space".into()],
        attributes: BTreeMap::new(),
        published_at: None,
    }
}

#[tokio::test]
async fn test_create_or_get_sends_idempotency_key_and_auth() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/internal/content-items"))
        .and(header("authorization", "Bearer svc-token"))
        .and(header("x-service-name", "inlet-pipeline"))
        .and(header_exists("x-request-id"))
        .and(body_partial_json(serde_json::json!({
            "idempotency_key": "https://example.com/a",
            "type": "article",
            "source": "feed",
            "status": "ready",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "c-1",
            "status": "ready",
            "created": true
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpCmsClient::new(server.uri(), "svc-token");
    let response = client
        .create_or_get(&article("https://example.com/a"))
        .await
        .unwrap();
    assert_eq!(response.id, "c-1");
    assert!(response.created);
}

#[tokio::test]
async fn test_repeat_create_returns_same_id() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/internal/content-items"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "c-7",
            "status": "ready",
            "created": false
        })))
        .expect(2)
        .mount(&server)
        .await;

    let client = HttpCmsClient::new(server.uri(), "tok");
    let a = client.create_or_get(&article("k")).await.unwrap();
    let b = client.create_or_get(&article("k")).await.unwrap();
    assert_eq!(a.id, b.id);
    assert!(!b.created);
}

#[tokio::test]
async fn test_update_status_patch_shape() {
    let server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path("/internal/content-items/c-1/status"))
        .and(body_partial_json(serde_json::json!({
            "status": "failed",
            "failure_reason": "transcode timed out"
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpCmsClient::new(server.uri(), "tok");
    client
        .update_status("c-1", ContentStatus::Failed, Some("transcode timed out"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_update_artifacts_and_embedding() {
    let server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path("/internal/content-items/c-2/artifacts"))
        .and(body_partial_json(serde_json::json!({
            "media_url": "http://objects.test/b/content/c-2/processed.mp4",
            "duration_sec": 93
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/internal/content-items/c-2/embedding"))
        .and(body_partial_json(serde_json::json!({
            "embedding": [0.6, 0.8],
            "topic_tags": ["space"]
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpCmsClient::new(server.uri(), "tok");
    client
        .update_artifacts(
            "c-2",
            &ArtifactUpdate {
                media_url: Some("http://objects.test/b/content/c-2/processed.mp4".into()),
                thumbnail_url: None,
                duration_sec: Some(93),
            },
        )
        .await
        .unwrap();
    client
        .update_embedding("c-2", &[0.6, 0.8], &["space".to_string()])
        .await
        .unwrap();
}

#[tokio::test]
async fn test_transcript_create_and_link() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/internal/transcripts"))
        .and(body_partial_json(serde_json::json!({
            "content_item_id": "c-3",
            "full_text": "hello world",
            "language": "en"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "t-1",
            "created_at": "2025-01-01T00:00:00Z"
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/internal/content-items/c-3/transcript"))
        .and(body_partial_json(serde_json::json!({ "transcript_id": "t-1" })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpCmsClient::new(server.uri(), "tok");
    let transcript = client
        .create_transcript(&CreateTranscriptRequest {
            content_item_id: "c-3".into(),
            full_text: "hello world".into(),
            summary: None,
            word_timestamps: None,
            language: "en".into(),
        })
        .await
        .unwrap();
    client.link_transcript("c-3", &transcript.id).await.unwrap();
}

#[tokio::test]
async fn test_4xx_maps_to_rejected_5xx_to_unavailable() {
    let server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path("/internal/content-items/bad/status"))
        .respond_with(ResponseTemplate::new(422).set_body_string("unknown id"))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/internal/content-items/down/status"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = HttpCmsClient::new(server.uri(), "tok");

    let rejected = client
        .update_status("bad", ContentStatus::Ready, None)
        .await
        .unwrap_err();
    assert!(matches!(rejected, Error::UpstreamRejected(_)), "{rejected}");

    let outage = client
        .update_status("down", ContentStatus::Ready, None)
        .await
        .unwrap_err();
    assert!(matches!(outage, Error::UpstreamUnavailable(_)), "{outage}");
}

#[tokio::test]
async fn test_health_check() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = HttpCmsClient::new(server.uri(), "tok");
    assert!(client.health_check().await.unwrap());

    let dead = HttpCmsClient::new("http://127.0.0.1:1", "tok");
    assert!(!dead.health_check().await.unwrap());
}
