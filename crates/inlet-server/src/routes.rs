//! Health and queue-inspection endpoints for the daemon.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use inlet_clients::CmsClient;
use inlet_core::QueueName;
use inlet_pipeline::PipelineDeps;
use inlet_sources::SourceRegistry;
use inlet_store::{JobStore, RedisJobStore};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub deps: Arc<PipelineDeps>,
    pub job_store: Arc<RedisJobStore>,
    pub registry: Arc<SourceRegistry>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    queue_store: bool,
    cms: bool,
    breakers: HashMap<String, String>,
    sources: usize,
}

/// `GET /health`: 200 when the queue store is reachable, 503 otherwise.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let queue_store = state.job_store.ping().await.is_ok();
    let cms = state.deps.cms.health_check().await.unwrap_or(false);
    let breakers = state
        .deps
        .breakers
        .states()
        .into_iter()
        .map(|(dep, st)| (dep.as_str().to_string(), st.as_str().to_string()))
        .collect();

    let code = if queue_store {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        code,
        Json(HealthResponse {
            status: if queue_store { "ok" } else { "degraded" },
            queue_store,
            cms,
            breakers,
            sources: state.registry.list().len(),
        }),
    )
}

#[derive(Serialize)]
struct QueuesResponse {
    queues: HashMap<String, inlet_core::QueueCounts>,
    dead_letters: usize,
}

/// `GET /queues`: per-queue state counts and DLQ depth.
pub async fn queues(State(state): State<AppState>) -> impl IntoResponse {
    let mut queues = HashMap::new();
    for queue in QueueName::work_queues() {
        match state.deps.store.counts(queue).await {
            Ok(counts) => {
                queues.insert(queue.as_str().to_string(), counts);
            }
            Err(e) => {
                return (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(serde_json::json!({ "error": e.to_string() })),
                )
                    .into_response();
            }
        }
    }
    let dead_letters = state
        .deps
        .store
        .dead_letters(1000)
        .await
        .map(|d| d.len())
        .unwrap_or(0);
    Json(QueuesResponse {
        queues,
        dead_letters,
    })
    .into_response()
}
