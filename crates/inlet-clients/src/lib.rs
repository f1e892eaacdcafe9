//! # inlet-clients
//!
//! Clients for the pipeline's external collaborators: the CMS HTTP surface,
//! the object store, the Whisper-compatible transcriber and the embedding
//! service. Each collaborator is a trait with a production implementation
//! and a recording mock for tests.

pub mod cms;
pub mod embedder;
pub mod mock;
pub mod object_store;
pub mod transcriber;

pub use cms::{
    ArtifactUpdate, CmsClient, CreateContentResponse, CreateTranscriptRequest, HttpCmsClient,
    TranscriptResponse,
};
pub use embedder::{l2_normalize, mean_pool, zero_vector, EmbeddingBackend, HttpEmbedder};
pub use mock::{MemoryObjectStore, MockCmsClient, MockEmbedder, MockTranscriber};
pub use object_store::{
    original_key, processed_key, thumbnail_key, FsObjectStore, ObjectStore,
};
pub use transcriber::{TranscriberBackend, TranscriptSegment, Transcription, WhisperClient};
