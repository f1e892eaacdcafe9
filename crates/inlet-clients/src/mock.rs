//! Mock collaborator implementations for tests.
//!
//! Every mock records its calls for assertions and supports scripted
//! failures, so pipeline tests can exercise retry, breaker and degradation
//! paths without a network.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use inlet_core::{CanonicalItem, ContentStatus, Error, Result};

use crate::cms::{
    ArtifactUpdate, CmsClient, CreateContentResponse, CreateTranscriptRequest, TranscriptResponse,
};
use crate::embedder::{l2_normalize, EmbeddingBackend};
use crate::object_store::ObjectStore;
use crate::transcriber::{TranscriberBackend, Transcription};

/// Recorded state of the mock CMS.
#[derive(Default)]
pub struct MockCmsState {
    next_id: u64,
    by_key: HashMap<String, String>,
    pub created: Vec<CanonicalItem>,
    pub create_calls: u64,
    pub status_updates: Vec<(String, ContentStatus, Option<String>)>,
    pub artifact_updates: Vec<(String, ArtifactUpdate)>,
    pub transcripts: Vec<CreateTranscriptRequest>,
    pub transcript_links: Vec<(String, String)>,
    pub embeddings: Vec<(String, Vec<f32>, Vec<String>)>,
    fail_remaining: u32,
}

/// In-memory CMS honoring idempotency-key semantics: equal keys always map
/// to the same content id.
#[derive(Default)]
pub struct MockCmsClient {
    state: Mutex<MockCmsState>,
}

impl MockCmsClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` calls fail with a 5xx-style outage.
    pub fn fail_next(&self, n: u32) {
        self.state().fail_remaining = n;
    }

    pub fn state(&self) -> MutexGuard<'_, MockCmsState> {
        self.state.lock().expect("mock cms mutex poisoned")
    }

    fn take_failure(&self) -> Option<Error> {
        let mut state = self.state();
        if state.fail_remaining > 0 {
            state.fail_remaining -= 1;
            Some(Error::UpstreamUnavailable("CMS returned 503".into()))
        } else {
            None
        }
    }
}

#[async_trait]
impl CmsClient for MockCmsClient {
    async fn create_or_get(&self, item: &CanonicalItem) -> Result<CreateContentResponse> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        let mut state = self.state();
        state.create_calls += 1;
        if let Some(existing) = state.by_key.get(&item.idempotency_key).cloned() {
            return Ok(CreateContentResponse {
                id: existing,
                status: item.status,
                created: false,
            });
        }
        state.next_id += 1;
        let id = format!("content-{}", state.next_id);
        state.by_key.insert(item.idempotency_key.clone(), id.clone());
        state.created.push(item.clone());
        Ok(CreateContentResponse {
            id,
            status: item.status,
            created: true,
        })
    }

    async fn update_status(
        &self,
        content_id: &str,
        status: ContentStatus,
        failure_reason: Option<&str>,
    ) -> Result<()> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        self.state().status_updates.push((
            content_id.to_string(),
            status,
            failure_reason.map(String::from),
        ));
        Ok(())
    }

    async fn update_artifacts(&self, content_id: &str, update: &ArtifactUpdate) -> Result<()> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        self.state()
            .artifact_updates
            .push((content_id.to_string(), update.clone()));
        Ok(())
    }

    async fn create_transcript(
        &self,
        request: &CreateTranscriptRequest,
    ) -> Result<TranscriptResponse> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        let mut state = self.state();
        state.transcripts.push(request.clone());
        Ok(TranscriptResponse {
            id: format!("transcript-{}", state.transcripts.len()),
            created_at: Utc::now(),
        })
    }

    async fn link_transcript(&self, content_id: &str, transcript_id: &str) -> Result<()> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        self.state()
            .transcript_links
            .push((content_id.to_string(), transcript_id.to_string()));
        Ok(())
    }

    async fn update_embedding(
        &self,
        content_id: &str,
        embedding: &[f32],
        topic_tags: &[String],
    ) -> Result<()> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        self.state().embeddings.push((
            content_id.to_string(),
            embedding.to_vec(),
            topic_tags.to_vec(),
        ));
        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

/// Transcriber returning a fixed text; empty text exercises the discard path.
pub struct MockTranscriber {
    text: String,
    language: Option<String>,
    fail: bool,
    pub calls: Mutex<u64>,
}

impl MockTranscriber {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            language: Some("en".into()),
            fail: false,
            calls: Mutex::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            text: String::new(),
            language: None,
            fail: true,
            calls: Mutex::new(0),
        }
    }

    pub fn call_count(&self) -> u64 {
        *self.calls.lock().expect("mock transcriber mutex poisoned")
    }
}

#[async_trait]
impl TranscriberBackend for MockTranscriber {
    async fn transcribe(
        &self,
        _audio: &[u8],
        _mime_type: &str,
        _language: Option<&str>,
    ) -> Result<Transcription> {
        *self.calls.lock().expect("mock transcriber mutex poisoned") += 1;
        if self.fail {
            return Err(Error::UpstreamUnavailable("transcriber down".into()));
        }
        Ok(Transcription {
            full_text: self.text.clone(),
            segments: Vec::new(),
            language: self.language.clone(),
        })
    }

    async fn detect_language(&self, _audio: &[u8], _mime_type: &str) -> Result<Option<String>> {
        Ok(self.language.clone())
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(!self.fail)
    }
}

/// Deterministic embedder: a unit vector derived from the text bytes.
pub struct MockEmbedder {
    dimension: usize,
    fail: bool,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            fail: false,
        }
    }

    pub fn failing(dimension: usize) -> Self {
        Self {
            dimension,
            fail: true,
        }
    }
}

#[async_trait]
impl EmbeddingBackend for MockEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if self.fail {
            return Err(Error::UpstreamUnavailable("embedder down".into()));
        }
        Ok(texts
            .iter()
            .map(|text| {
                let mut vector: Vec<f32> = (0..self.dimension)
                    .map(|i| {
                        let byte = text.as_bytes().get(i % text.len().max(1)).copied().unwrap_or(1);
                        (byte as f32 + i as f32).sin()
                    })
                    .collect();
                l2_normalize(&mut vector);
                vector
            })
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "mock-embedder"
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(!self.fail)
    }
}

/// Object store holding blobs in a map.
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    public_base: String,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            public_base: "http://objects.test/bucket".to_string(),
        }
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .expect("mock object store mutex poisoned")
            .get(key)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.objects
            .lock()
            .expect("mock object store mutex poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pre-seed an object, e.g. an already-processed artifact.
    pub fn insert(&self, key: &str, data: Vec<u8>) {
        self.objects
            .lock()
            .expect("mock object store mutex poisoned")
            .insert(key.to_string(), data);
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, data: Vec<u8>, _content_type: &str) -> Result<String> {
        self.insert(key, data);
        Ok(self.public_url(key))
    }

    async fn put_file(&self, key: &str, path: &Path, content_type: &str) -> Result<String> {
        let data = tokio::fs::read(path).await?;
        self.put(key, data, content_type).await
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.object(key))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self
            .objects
            .lock()
            .expect("mock object store mutex poisoned")
            .contains_key(key))
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inlet_core::{ContentType, SourceKind};
    use std::collections::BTreeMap;

    fn item(key: &str) -> CanonicalItem {
        CanonicalItem {
            idempotency_key: key.to_string(),
            content_type: ContentType::Article,
            source_kind: SourceKind::Feed,
            status: ContentStatus::Ready,
            title: "t".into(),
            body_text: None,
            excerpt: None,
            author: None,
            source_name: "example.com".into(),
            source_feed_url: None,
            media_url: None,
            thumbnail_url: None,
            original_url: key.to_string(),
            duration_seconds: None,
            topic_tags: vec![],
            attributes: BTreeMap::new(),
            published_at: None,
        }
    }

    #[tokio::test]
    async fn test_mock_cms_same_key_same_id() {
        let cms = MockCmsClient::new();
        let a = cms.create_or_get(&item("k1")).await.unwrap();
        let b = cms.create_or_get(&item("k1")).await.unwrap();
        let c = cms.create_or_get(&item("k2")).await.unwrap();

        assert!(a.created);
        assert!(!b.created);
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert_eq!(cms.state().created.len(), 2);
        assert_eq!(cms.state().create_calls, 3);
    }

    #[tokio::test]
    async fn test_mock_cms_scripted_failures() {
        let cms = MockCmsClient::new();
        cms.fail_next(2);
        assert!(cms.create_or_get(&item("k")).await.is_err());
        assert!(cms.create_or_get(&item("k")).await.is_err());
        assert!(cms.create_or_get(&item("k")).await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_embedder_unit_vectors() {
        let embedder = MockEmbedder::new(8);
        let vectors = embedder.embed(&["hello".into(), "world".into()]).await.unwrap();
        assert_eq!(vectors.len(), 2);
        for v in &vectors {
            assert_eq!(v.len(), 8);
            let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-5);
        }
        // Deterministic.
        let again = embedder.embed(&["hello".into()]).await.unwrap();
        assert_eq!(again[0], vectors[0]);
    }

    #[tokio::test]
    async fn test_memory_object_store_round_trip() {
        let store = MemoryObjectStore::new();
        let url = store.put("content/c/processed.mp4", b"x".to_vec(), "video/mp4").await.unwrap();
        assert_eq!(url, "http://objects.test/bucket/content/c/processed.mp4");
        assert!(store.exists("content/c/processed.mp4").await.unwrap());
        assert_eq!(store.object("content/c/processed.mp4").unwrap(), b"x");
    }
}
