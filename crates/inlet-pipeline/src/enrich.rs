//! Enrichment stage: transcript and embedding, then finalization.
//!
//! Both enrichment steps are best-effort: a failed transcript or embedding
//! is logged and the item still becomes READY. Only the CMS writes that
//! would corrupt the record on loss (embedding, final status) propagate to
//! the job store.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use inlet_clients::{
    l2_normalize, mean_pool, processed_key, zero_vector, CmsClient, CreateTranscriptRequest,
    EmbeddingBackend, ObjectStore, TranscriberBackend,
};
use inlet_core::{
    defaults, ContentStatus, Dependency, EnrichmentJob, EnrichmentOperation, Error, QueueName,
    Result,
};

use crate::deps::PipelineDeps;
use crate::handler::{JobContext, JobHandler, JobOutcome};
use crate::media::run_command;

/// Truncate to a character limit.
fn take_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Compose the embedding input text:
/// `title + " " + (transcript | body, first 2000 chars) + " " + excerpt`
/// (excerpt only when distinct), hard-capped at 8192 characters.
pub fn build_embedding_input(
    title: &str,
    transcript: Option<&str>,
    body: Option<&str>,
    excerpt: Option<&str>,
) -> String {
    let snippet = transcript
        .filter(|t| !t.trim().is_empty())
        .or(body.filter(|b| !b.trim().is_empty()))
        .map(|text| take_chars(text, defaults::EMBED_SNIPPET_CHARS))
        .unwrap_or("");

    let mut input = format!("{} {}", title.trim(), snippet.trim());
    if let Some(excerpt) = excerpt {
        let excerpt = excerpt.trim();
        if !excerpt.is_empty() && excerpt != title.trim() && !snippet.contains(excerpt) {
            input.push(' ');
            input.push_str(excerpt);
        }
    }
    take_chars(input.trim(), defaults::EMBED_INPUT_MAX_CHARS).to_string()
}

fn mime_for_url(url: &str) -> &'static str {
    let path = url.split('?').next().unwrap_or(url);
    if path.ends_with(".mp3") {
        "audio/mpeg"
    } else if path.ends_with(".wav") {
        "audio/wav"
    } else if path.ends_with(".m4a") {
        "audio/mp4"
    } else if path.ends_with(".ogg") {
        "audio/ogg"
    } else if path.ends_with(".flac") {
        "audio/flac"
    } else {
        "video/mp4"
    }
}

/// Video containers get their audio track extracted before transcription.
fn is_video_container(mime: &str) -> bool {
    mime.starts_with("video/")
}

/// Split text into character-bounded chunks for embedding.
fn chunk_text(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(size.max(1))
        .map(|chunk| chunk.iter().collect())
        .collect()
}

pub struct EnrichmentHandler {
    deps: Arc<PipelineDeps>,
    http: reqwest::Client,
}

impl EnrichmentHandler {
    pub fn new(deps: Arc<PipelineDeps>) -> Self {
        Self {
            deps,
            http: reqwest::Client::new(),
        }
    }

    /// Locate the media payload for transcription: local path from a prior
    /// media run, the processed artifact in the object store, or the remote
    /// URL for media-ready sources.
    async fn resolve_media(&self, job: &EnrichmentJob) -> Option<(Vec<u8>, &'static str)> {
        if let Some(path) = &job.media_path {
            match tokio::fs::read(path).await {
                Ok(bytes) => return Some((bytes, mime_for_url(path))),
                Err(e) => {
                    warn!(content_id = %job.content_id, error = %e, "Local media path unreadable")
                }
            }
        }

        match self.deps.objects.get(&processed_key(&job.content_id)).await {
            Ok(Some(bytes)) => return Some((bytes, "video/mp4")),
            Ok(None) => {}
            Err(e) => warn!(content_id = %job.content_id, error = %e, "Object store read failed"),
        }

        if let Some(url) = &job.media_url {
            match self.fetch_url(url).await {
                Ok(bytes) => return Some((bytes, mime_for_url(url))),
                Err(e) => {
                    warn!(content_id = %job.content_id, error = %e, "Media URL fetch failed")
                }
            }
        }
        None
    }

    async fn fetch_url(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(url)
            .timeout(self.deps.settings.download_timeout)
            .send()
            .await?
            .error_for_status()
            .map_err(Error::from)?;
        Ok(response.bytes().await?.to_vec())
    }

    /// Extract a mono 16 kHz WAV audio track from a video container so the
    /// transcriber receives plain audio.
    async fn extract_audio(&self, content_id: &str, bytes: &[u8]) -> Result<Vec<u8>> {
        tokio::fs::create_dir_all(&self.deps.settings.media_temp_dir).await?;
        let workdir = tempfile::Builder::new()
            .prefix(&format!("{}_asr_", content_id))
            .tempdir_in(&self.deps.settings.media_temp_dir)?;
        let input = workdir.path().join("input.mp4");
        let output = workdir.path().join("audio.wav");
        tokio::fs::write(&input, bytes).await?;

        let mut cmd = Command::new("ffmpeg");
        cmd.arg("-y")
            .arg("-i")
            .arg(&input)
            .arg("-vn")
            .arg("-acodec")
            .arg("pcm_s16le")
            .arg("-ar")
            .arg("16000")
            .arg("-ac")
            .arg("1")
            .arg(&output);
        run_command(
            &mut cmd,
            self.deps.settings.transcode_timeout,
            "ffmpeg audio extract",
            true,
        )
        .await?;
        Ok(tokio::fs::read(&output).await?)
    }

    /// Best-effort transcript. Returns the text for embedding composition.
    async fn transcript_step(&self, ctx: &JobContext, job: &EnrichmentJob) -> Option<String> {
        let transcriber = self.deps.transcriber.as_ref()?;
        if ctx.cancel.is_cancelled() {
            return None;
        }

        let (bytes, mime) = self.resolve_media(job).await?;
        let (bytes, mime) = if is_video_container(mime) {
            match self.extract_audio(&job.content_id, &bytes).await {
                Ok(wav) => (wav, "audio/wav"),
                Err(e) => {
                    // The transcriber copes with most containers directly.
                    warn!(
                        content_id = %job.content_id,
                        error = %e,
                        "Audio extraction failed, sending container as-is"
                    );
                    (bytes, mime)
                }
            }
        } else {
            (bytes, mime)
        };

        let breaker = self.deps.breakers.get(Dependency::Transcriber);
        let transcription = match breaker
            .execute(|| transcriber.transcribe(&bytes, mime, None))
            .await
        {
            Ok(t) => t,
            Err(e) => {
                warn!(content_id = %job.content_id, error = %e, "Transcription failed");
                return None;
            }
        };

        let text = transcription.full_text.trim().to_string();
        if text.is_empty() {
            debug!(content_id = %job.content_id, "Empty transcript discarded");
            return None;
        }

        let cms_breaker = self.deps.breakers.get(Dependency::Cms);
        let request = CreateTranscriptRequest {
            content_item_id: job.content_id.clone(),
            full_text: text.clone(),
            summary: None,
            word_timestamps: (!transcription.segments.is_empty())
                .then(|| serde_json::to_value(&transcription.segments).unwrap_or_default()),
            language: transcription.language.clone().unwrap_or_else(|| "en".into()),
        };
        match cms_breaker
            .execute(|| self.deps.cms.create_transcript(&request))
            .await
        {
            Ok(created) => {
                if let Err(e) = cms_breaker
                    .execute(|| self.deps.cms.link_transcript(&job.content_id, &created.id))
                    .await
                {
                    warn!(content_id = %job.content_id, error = %e, "Transcript link failed");
                }
            }
            Err(e) => {
                warn!(content_id = %job.content_id, error = %e, "Transcript create failed")
            }
        }
        Some(text)
    }

    /// Best-effort embedding; only the final CMS write propagates.
    async fn embedding_step(
        &self,
        job: &EnrichmentJob,
        transcript: Option<&str>,
    ) -> Result<()> {
        let Some(embedder) = self.deps.embedder.as_ref() else {
            return Ok(());
        };
        let dimension = self.deps.settings.embedding_dimension;

        let input = build_embedding_input(
            &job.text_fields.title,
            transcript,
            job.text_fields.body.as_deref(),
            job.text_fields.excerpt.as_deref(),
        );

        // Long inputs are embedded in chunks and mean-pooled into the
        // stored vector.
        let vector = if input.is_empty() {
            zero_vector(dimension)
        } else {
            let chunks = chunk_text(&input, defaults::EMBED_CHUNK_CHARS);
            match embedder.embed(&chunks).await {
                Ok(vectors) if !vectors.is_empty() => {
                    // Refuse to store anything of the wrong shape.
                    if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
                        warn!(
                            content_id = %job.content_id,
                            got = bad.len(),
                            expected = dimension,
                            "Embedding dimension mismatch, not stored"
                        );
                        return Ok(());
                    }
                    let mut vector = mean_pool(&vectors, dimension);
                    l2_normalize(&mut vector);
                    vector
                }
                Ok(_) => {
                    warn!(content_id = %job.content_id, "Embedder returned no vector");
                    return Ok(());
                }
                Err(e) => {
                    warn!(content_id = %job.content_id, error = %e, "Embedding failed");
                    return Ok(());
                }
            }
        };

        let cms_breaker = self.deps.breakers.get(Dependency::Cms);
        cms_breaker
            .execute(|| {
                self.deps
                    .cms
                    .update_embedding(&job.content_id, &vector, &job.topic_tags)
            })
            .await
    }

    async fn run(&self, ctx: &JobContext, job: &EnrichmentJob) -> Result<serde_json::Value> {
        let transcript = if job.operations.contains(&EnrichmentOperation::Transcript) {
            self.transcript_step(ctx, job).await
        } else {
            None
        };

        if ctx.cancel.is_cancelled() {
            return Err(ctx.cancelled_err());
        }

        if job.operations.contains(&EnrichmentOperation::Embedding) {
            self.embedding_step(job, transcript.as_deref()).await?;
        }

        // Finalization: the record leaves the pipeline READY.
        let cms_breaker = self.deps.breakers.get(Dependency::Cms);
        cms_breaker
            .execute(|| {
                self.deps
                    .cms
                    .update_status(&job.content_id, ContentStatus::Ready, None)
            })
            .await?;

        info!(
            content_id = %job.content_id,
            content_type = job.content_type.as_str(),
            transcript = transcript.is_some(),
            "Enrichment finished"
        );
        Ok(serde_json::json!({ "transcript": transcript.is_some() }))
    }
}

#[async_trait]
impl JobHandler for EnrichmentHandler {
    fn queue(&self) -> QueueName {
        QueueName::Enrichment
    }

    async fn execute(&self, ctx: JobContext) -> JobOutcome {
        let job: EnrichmentJob = match ctx.decode() {
            Ok(job) => job,
            Err(e) => return JobOutcome::Discard(format!("unparsable enrichment payload: {}", e)),
        };

        match self.run(&ctx, &job).await {
            Ok(result) => JobOutcome::Success(Some(result)),
            Err(Error::Cancelled(_)) => JobOutcome::Cancelled,
            Err(e) if e.is_retryable() => JobOutcome::Retry(e.to_string()),
            Err(e) => {
                let reason = e.to_string();
                if let Err(status_err) = self
                    .deps
                    .cms
                    .update_status(&job.content_id, ContentStatus::Failed, Some(&reason))
                    .await
                {
                    warn!(
                        content_id = %job.content_id,
                        error = %status_err,
                        "Failed to record FAILED status"
                    );
                }
                JobOutcome::Discard(reason)
            }
        }
    }
}
