//! # inlet-pipeline
//!
//! The multi-stage job pipeline: the worker runtime and the four stage
//! handlers (fetch → normalize → media → enrichment) wired over the queue
//! store, the resilience primitives and the external collaborators.
//!
//! ## Example
//!
//! ```ignore
//! use inlet_pipeline::{PipelineDeps, PipelineRuntime};
//! use inlet_core::ConcurrencyConfig;
//!
//! let deps = Arc::new(PipelineDeps { /* stores, clients, adapters */ });
//! let mut runtime = PipelineRuntime::new(deps, ConcurrencyConfig::default());
//! runtime.start();
//! // ...
//! runtime.shutdown().await;
//! ```

pub mod deps;
pub mod enrich;
pub mod fetch;
pub mod handler;
pub mod media;
pub mod normalize;
pub mod runtime;
pub mod worker;

pub use deps::{PipelineDeps, PipelineSettings};
pub use enrich::EnrichmentHandler;
pub use fetch::FetchHandler;
pub use handler::{JobContext, JobHandler, JobOutcome};
pub use media::MediaHandler;
pub use normalize::{BatchCounters, NormalizeHandler};
pub use runtime::PipelineRuntime;
pub use worker::{QueueWorker, WorkerConfig};
