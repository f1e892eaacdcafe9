//! Embedding backend and vector post-processing.
//!
//! Stored vectors are always mean-pooled and L2-normalized at the configured
//! dimension; the enrichment stage refuses to store anything else. An
//! all-zero vector stands in for empty input text.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use inlet_core::{defaults, Error, Result};

/// Backend producing one vector per input text.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Vector length this backend produces.
    fn dimension(&self) -> usize;

    fn model_name(&self) -> &str;

    async fn health_check(&self) -> Result<bool>;
}

/// Mean-pool a set of row vectors into one vector.
///
/// Returns a zero vector of `dimension` when `rows` is empty.
pub fn mean_pool(rows: &[Vec<f32>], dimension: usize) -> Vec<f32> {
    if rows.is_empty() {
        return vec![0.0; dimension];
    }
    let mut pooled = vec![0.0f32; dimension];
    for row in rows {
        for (acc, value) in pooled.iter_mut().zip(row.iter()) {
            *acc += value;
        }
    }
    let count = rows.len() as f32;
    for value in pooled.iter_mut() {
        *value /= count;
    }
    pooled
}

/// L2-normalize in place. A zero vector stays zero.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

/// The all-zero vector stored for empty input text.
pub fn zero_vector(dimension: usize) -> Vec<f32> {
    vec![0.0; dimension]
}

/// Request shape for the embedding service.
#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// HTTP embedding service client.
///
/// The model behind the service is a heavy process-wide resource; the first
/// caller warms it up through a single-flight readiness check so concurrent
/// workers never trigger parallel initialization.
pub struct HttpEmbedder {
    base_url: String,
    model: String,
    dimension: usize,
    client: reqwest::Client,
    ready: OnceCell<()>,
}

impl HttpEmbedder {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, dimension: usize) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            dimension,
            client: reqwest::Client::builder()
                .timeout(defaults::EMBED_TIMEOUT)
                .build()
                .expect("reqwest client construction is infallible with static config"),
            ready: OnceCell::new(),
        }
    }

    /// One warmup request per process; concurrent callers wait on the same
    /// in-flight initialization.
    async fn ensure_ready(&self) -> Result<()> {
        self.ready
            .get_or_try_init(|| async {
                info!(model = %self.model, "Warming up embedding model");
                let warmup = vec!["warmup".to_string()];
                let request = EmbedRequest {
                    model: &self.model,
                    input: &warmup,
                };
                let response = self
                    .client
                    .post(format!("{}/embed", self.base_url))
                    .json(&request)
                    .send()
                    .await?;
                if !response.status().is_success() {
                    return Err(Error::UpstreamUnavailable(format!(
                        "embedding warmup returned {}",
                        response.status()
                    )));
                }
                Ok(())
            })
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl EmbeddingBackend for HttpEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.ensure_ready().await?;

        let request = EmbedRequest {
            model: &self.model,
            input: texts,
        };
        let response = self
            .client
            .post(format!("{}/embed", self.base_url))
            .json(&request)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("embedding service returned {}: {}", status, body);
            return if status.is_client_error() {
                Err(Error::UpstreamRejected(message))
            } else {
                Err(Error::UpstreamUnavailable(message))
            };
        }

        let parsed: EmbedResponse = response.json().await?;
        for vector in &parsed.embeddings {
            if vector.len() != self.dimension {
                return Err(Error::InvalidData(format!(
                    "embedding service returned dimension {} (expected {})",
                    vector.len(),
                    self.dimension
                )));
            }
        }
        debug!(count = parsed.embeddings.len(), "Embedded texts");
        Ok(parsed.embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn health_check(&self) -> Result<bool> {
        match self
            .client
            .get(format!("{}/health", self.base_url))
            .timeout(std::time::Duration::from_secs(5))
            .send()
            .await
        {
            Ok(response) => Ok(response.status().is_success()),
            Err(_) => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn norm(v: &[f32]) -> f32 {
        v.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    #[test]
    fn test_mean_pool_averages_rows() {
        let rows = vec![vec![1.0, 0.0, 3.0], vec![3.0, 2.0, 1.0]];
        assert_eq!(mean_pool(&rows, 3), vec![2.0, 1.0, 2.0]);
    }

    #[test]
    fn test_mean_pool_empty_is_zero() {
        let pooled = mean_pool(&[], 4);
        assert_eq!(pooled, vec![0.0; 4]);
    }

    #[test]
    fn test_l2_normalize_unit_norm() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert!((norm(&v) - 1.0).abs() < 1e-6);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize_zero_stays_zero() {
        let mut v = zero_vector(5);
        l2_normalize(&mut v);
        assert_eq!(v, vec![0.0; 5]);
    }

    #[test]
    fn test_normalized_mean_pool_in_tolerance() {
        let rows = vec![vec![0.2, -0.7, 0.1], vec![0.9, 0.3, -0.4]];
        let mut pooled = mean_pool(&rows, 3);
        l2_normalize(&mut pooled);
        let n = norm(&pooled);
        assert!((0.99..=1.01).contains(&n));
    }

    #[test]
    fn test_embed_response_shape() {
        let json = r#"{"embeddings": [[0.1, 0.2], [0.3, 0.4]]}"#;
        let parsed: EmbedResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.embeddings.len(), 2);
        assert_eq!(parsed.embeddings[0], vec![0.1, 0.2]);
    }
}
