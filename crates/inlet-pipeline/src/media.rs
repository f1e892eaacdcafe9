//! Media stage: download, transcode, thumbnail, publish.
//!
//! Artifact keys are deterministic per content id, so a re-driven job finds
//! its processed MP4 already in the object store and short-circuits straight
//! to enrichment. Temporary files live in a per-job scoped directory that is
//! removed on every exit path.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use inlet_clients::{processed_key, thumbnail_key, ArtifactUpdate, CmsClient, ObjectStore};
use inlet_core::{
    defaults, jobs::priority, Dependency, EnqueueOptions, EnrichmentJob, EnrichmentOperation,
    Error, MediaJob, QueueName, Result,
};
use inlet_store::JobStore;

use crate::deps::PipelineDeps;
use crate::handler::{JobContext, JobHandler, JobOutcome};

/// Hosts whose URLs go through the specialized downloader instead of a
/// plain HTTP GET.
const PLATFORM_HOSTS: [&str; 5] = [
    "youtube.com",
    "youtu.be",
    "m.youtube.com",
    "vimeo.com",
    "video.example",
];

fn is_platform_url(url: &str) -> bool {
    inlet_core::idempotency::hostname(url)
        .map(|host| {
            PLATFORM_HOSTS
                .iter()
                .any(|p| host == *p || host.ends_with(&format!(".{}", p)))
        })
        .unwrap_or(false)
}

/// Media properties reported by ffprobe.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaProbe {
    pub duration_secs: Option<f64>,
    pub has_video: bool,
    pub has_audio: bool,
}

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    format: Option<ProbeFormat>,
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Deserialize)]
struct ProbeFormat {
    #[serde(default)]
    duration: Option<String>,
}

#[derive(Deserialize)]
struct ProbeStream {
    #[serde(default)]
    codec_type: Option<String>,
}

fn parse_probe(json: &str) -> Result<MediaProbe> {
    let parsed: ProbeOutput =
        serde_json::from_str(json).map_err(|e| Error::InvalidData(format!("ffprobe output: {}", e)))?;
    Ok(MediaProbe {
        duration_secs: parsed
            .format
            .and_then(|f| f.duration)
            .and_then(|d| d.parse::<f64>().ok()),
        has_video: parsed
            .streams
            .iter()
            .any(|s| s.codec_type.as_deref() == Some("video")),
        has_audio: parsed
            .streams
            .iter()
            .any(|s| s.codec_type.as_deref() == Some("audio")),
    })
}

/// Run a subprocess under a hard timeout. Exceeding the cap is a resource
/// exhaustion; a non-zero exit is permanent (bad input) or transient
/// (flaky tool) per the caller's judgement. Shared with the enrichment
/// stage's audio extraction.
pub(crate) async fn run_command(
    cmd: &mut Command,
    timeout: Duration,
    what: &str,
    permanent: bool,
) -> Result<Vec<u8>> {
    let output = tokio::time::timeout(timeout, cmd.kill_on_drop(true).output())
        .await
        .map_err(|_| {
            Error::ResourceExhausted(format!("{} exceeded {}s cap", what, timeout.as_secs()))
        })?
        .map_err(|e| Error::Internal(format!("{} failed to start: {}", what, e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: String = stderr.chars().rev().take(400).collect::<Vec<_>>().into_iter().rev().collect();
        let message = format!("{} failed ({}): {}", what, output.status, tail.trim());
        return if permanent {
            Err(Error::InvalidData(message))
        } else {
            Err(Error::Internal(message))
        };
    }
    Ok(output.stdout)
}

/// Bounded exponential retries for artifact uploads (1s/2s/4s).
async fn upload_with_retry(
    objects: &dyn ObjectStore,
    key: &str,
    path: &Path,
    content_type: &str,
) -> Result<String> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match objects.put_file(key, path, content_type).await {
            Ok(url) => return Ok(url),
            Err(e) if attempt < defaults::UPLOAD_MAX_ATTEMPTS => {
                let delay = defaults::UPLOAD_RETRY_BASE * 2u32.pow(attempt - 1);
                warn!(key, attempt, error = %e, "Upload failed, retrying");
                sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

pub struct MediaHandler {
    deps: Arc<PipelineDeps>,
    http: reqwest::Client,
}

impl MediaHandler {
    pub fn new(deps: Arc<PipelineDeps>) -> Self {
        Self {
            deps,
            http: reqwest::Client::new(),
        }
    }

    /// Plain HTTP download streamed to a file, aborting over the size cap.
    async fn download_http(&self, ctx: &JobContext, url: &str, target: &Path) -> Result<()> {
        let response = self
            .http
            .get(url)
            .timeout(self.deps.settings.download_timeout)
            .send()
            .await?
            .error_for_status()
            .map_err(Error::from)?;

        let mut file = tokio::fs::File::create(target).await?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;
        loop {
            let chunk = tokio::select! {
                _ = ctx.cancel.cancelled() => return Err(ctx.cancelled_err()),
                chunk = stream.next() => chunk,
            };
            let Some(chunk) = chunk else { break };
            let chunk = chunk.map_err(|e| Error::UpstreamUnavailable(e.to_string()))?;
            written += chunk.len() as u64;
            if written > self.deps.settings.download_max_bytes {
                return Err(Error::ResourceExhausted(format!(
                    "download exceeded {} byte cap",
                    self.deps.settings.download_max_bytes
                )));
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }

    /// Platform downloader: muxed MP4, or best video + audio merged to MP4.
    async fn download_platform(&self, url: &str, target: &Path) -> Result<()> {
        let mut cmd = Command::new("yt-dlp");
        cmd.arg("-f")
            .arg("mp4/bestvideo+bestaudio")
            .arg("--merge-output-format")
            .arg("mp4")
            .arg("--no-playlist")
            .arg("-o")
            .arg(target)
            .arg(url);
        run_command(&mut cmd, self.deps.settings.download_timeout, "yt-dlp", false).await?;
        Ok(())
    }

    async fn probe(&self, path: &Path) -> Result<MediaProbe> {
        let mut cmd = Command::new("ffprobe");
        cmd.arg("-v")
            .arg("error")
            .arg("-print_format")
            .arg("json")
            .arg("-show_format")
            .arg("-show_streams")
            .arg(path);
        let stdout = run_command(&mut cmd, Duration::from_secs(30), "ffprobe", true).await?;
        parse_probe(&String::from_utf8_lossy(&stdout))
    }

    /// Transcode to H.264 baseline + AAC MP4 with faststart and yuv420p.
    /// Audio-only inputs are muxed under a still black frame so the artifact
    /// satisfies video consumers.
    async fn transcode(&self, input: &Path, output: &Path, probe: &MediaProbe) -> Result<()> {
        let mut cmd = Command::new("ffmpeg");
        cmd.arg("-y");
        if probe.has_video {
            cmd.arg("-i").arg(input);
        } else {
            cmd.arg("-f")
                .arg("lavfi")
                .arg("-i")
                .arg("color=c=black:s=1280x720:r=2")
                .arg("-i")
                .arg(input)
                .arg("-shortest");
        }
        cmd.arg("-c:v")
            .arg("libx264")
            .arg("-profile:v")
            .arg("baseline")
            .arg("-pix_fmt")
            .arg("yuv420p")
            .arg("-c:a")
            .arg("aac")
            .arg("-movflags")
            .arg("+faststart")
            .arg(output);
        run_command(&mut cmd, self.deps.settings.transcode_timeout, "ffmpeg transcode", true)
            .await?;
        Ok(())
    }

    /// Best-effort frame grab at the configured offset.
    async fn thumbnail(&self, input: &Path, output: &Path) -> Result<()> {
        let mut cmd = Command::new("ffmpeg");
        cmd.arg("-y")
            .arg("-ss")
            .arg(defaults::THUMBNAIL_OFFSET_SECS.to_string())
            .arg("-i")
            .arg(input)
            .arg("-frames:v")
            .arg("1")
            .arg("-q:v")
            .arg("3")
            .arg(output);
        run_command(&mut cmd, Duration::from_secs(30), "ffmpeg thumbnail", true).await?;
        Ok(())
    }

    async fn enqueue_enrichment(&self, job: &MediaJob, media_url: String) -> Result<()> {
        let enrich = EnrichmentJob {
            content_id: job.content_id.clone(),
            content_type: job.content_type,
            operations: vec![
                EnrichmentOperation::Transcript,
                EnrichmentOperation::Embedding,
            ],
            text_fields: job.text_fields.clone(),
            media_path: None,
            media_url: Some(media_url),
            topic_tags: job.topic_tags.clone(),
        };
        self.deps
            .store
            .enqueue(
                QueueName::Enrichment,
                serde_json::to_value(&enrich)?,
                EnqueueOptions::default()
                    .with_job_id(format!("enrich:{}", job.content_id))
                    .with_priority(priority::ENRICHMENT),
            )
            .await?;
        Ok(())
    }

    async fn run(&self, ctx: &JobContext, job: &MediaJob) -> Result<serde_json::Value> {
        let cms_breaker = self.deps.breakers.get(Dependency::Cms);
        let store_breaker = self.deps.breakers.get(Dependency::ObjectStore);

        cms_breaker
            .execute(|| {
                self.deps
                    .cms
                    .update_status(&job.content_id, inlet_core::ContentStatus::Processing, None)
            })
            .await?;

        // Idempotent re-drive: an existing processed artifact means all the
        // expensive work already happened.
        let processed = processed_key(&job.content_id);
        let already = store_breaker
            .execute(|| self.deps.objects.exists(&processed))
            .await?;
        if already {
            let media_url = self.deps.objects.public_url(&processed);
            info!(
                content_id = %job.content_id,
                "Processed artifact already present, skipping to enrichment"
            );
            self.enqueue_enrichment(job, media_url.clone()).await?;
            return Ok(serde_json::json!({ "media_url": media_url, "short_circuit": true }));
        }

        tokio::fs::create_dir_all(&self.deps.settings.media_temp_dir).await?;
        // Scoped per-job scratch space, removed on drop on every exit path.
        let workdir = tempfile::Builder::new()
            .prefix(&format!("{}_", job.content_id))
            .tempdir_in(&self.deps.settings.media_temp_dir)?;

        if ctx.cancel.is_cancelled() {
            return Err(ctx.cancelled_err());
        }

        // 1. Download.
        let original: PathBuf = workdir.path().join("original");
        if is_platform_url(&job.source_url) {
            debug!(content_id = %job.content_id, "Downloading via platform downloader");
            self.download_platform(&job.source_url, &original).await?;
        } else {
            debug!(content_id = %job.content_id, "Downloading via HTTP");
            self.download_http(ctx, &job.source_url, &original).await?;
        }

        if ctx.cancel.is_cancelled() {
            return Err(ctx.cancelled_err());
        }

        // 2. Probe.
        let probe = self.probe(&original).await?;
        if !probe.has_video && !probe.has_audio {
            return Err(Error::InvalidData(format!(
                "{} has neither audio nor video",
                job.source_url
            )));
        }

        // 3. Transcode.
        let processed_path = workdir.path().join("processed.mp4");
        self.transcode(&original, &processed_path, &probe).await?;

        if ctx.cancel.is_cancelled() {
            return Err(ctx.cancelled_err());
        }

        // 4. Thumbnail, best-effort with the platform image as fallback.
        let thumb_path = workdir.path().join("thumbnail.jpg");
        let local_thumb = match self.thumbnail(&processed_path, &thumb_path).await {
            Ok(()) => true,
            Err(e) => {
                warn!(content_id = %job.content_id, error = %e, "Thumbnail extraction failed");
                false
            }
        };

        // 5. Upload under deterministic keys.
        let media_url = store_breaker
            .execute(|| {
                upload_with_retry(
                    self.deps.objects.as_ref(),
                    &processed,
                    &processed_path,
                    "video/mp4",
                )
            })
            .await?;
        let thumbnail_key = thumbnail_key(&job.content_id);
        let thumbnail_url = if local_thumb {
            match store_breaker
                .execute(|| {
                    upload_with_retry(
                        self.deps.objects.as_ref(),
                        &thumbnail_key,
                        &thumb_path,
                        "image/jpeg",
                    )
                })
                .await
            {
                Ok(url) => Some(url),
                Err(e) => {
                    warn!(content_id = %job.content_id, error = %e, "Thumbnail upload failed");
                    job.fallback_thumbnail_url.clone()
                }
            }
        } else {
            job.fallback_thumbnail_url.clone()
        };

        let duration_sec = probe.duration_secs.map(|d| d.round() as i64);

        // 6. Publish artifact URLs on the record.
        let artifact_update = ArtifactUpdate {
            media_url: Some(media_url.clone()),
            thumbnail_url: thumbnail_url.clone(),
            duration_sec,
        };
        cms_breaker
            .execute(|| self.deps.cms.update_artifacts(&job.content_id, &artifact_update))
            .await?;

        // 7. Hand over to enrichment.
        self.enqueue_enrichment(job, media_url.clone()).await?;

        info!(
            content_id = %job.content_id,
            media_url = %media_url,
            duration_sec = duration_sec.unwrap_or(0),
            has_video = probe.has_video,
            "Media processing finished"
        );
        Ok(serde_json::json!({
            "media_url": media_url,
            "thumbnail_url": thumbnail_url,
            "duration_sec": duration_sec,
        }))
    }
}

#[async_trait]
impl JobHandler for MediaHandler {
    fn queue(&self) -> QueueName {
        QueueName::Media
    }

    async fn execute(&self, ctx: JobContext) -> JobOutcome {
        let job: MediaJob = match ctx.decode() {
            Ok(job) => job,
            Err(e) => return JobOutcome::Discard(format!("unparsable media payload: {}", e)),
        };

        match self.run(&ctx, &job).await {
            Ok(result) => JobOutcome::Success(Some(result)),
            Err(Error::Cancelled(reason)) => {
                debug!(content_id = %job.content_id, reason = %reason, "Media job cancelled");
                JobOutcome::Cancelled
            }
            Err(e) => {
                // The failure belongs on the record; losing it would leave
                // the item stuck in PROCESSING.
                let reason = e.to_string();
                if let Err(status_err) = self
                    .deps
                    .cms
                    .update_status(
                        &job.content_id,
                        inlet_core::ContentStatus::Failed,
                        Some(&reason),
                    )
                    .await
                {
                    warn!(
                        content_id = %job.content_id,
                        error = %status_err,
                        "Failed to record FAILED status"
                    );
                }
                JobOutcome::from_error(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_url_detection() {
        assert!(is_platform_url("https://www.youtube.com/watch?v=abc"));
        assert!(is_platform_url("https://youtu.be/abc"));
        assert!(is_platform_url("https://vimeo.com/123"));
        assert!(is_platform_url("https://video.example/watch?v=v1"));
        assert!(!is_platform_url("https://cdn.example.com/file.mp4"));
        assert!(!is_platform_url("not a url"));
    }

    #[test]
    fn test_probe_parsing_video_with_audio() {
        let json = r#"{
            "format": {"duration": "93.4"},
            "streams": [
                {"codec_type": "video"},
                {"codec_type": "audio"}
            ]
        }"#;
        let probe = parse_probe(json).unwrap();
        assert_eq!(probe.duration_secs, Some(93.4));
        assert!(probe.has_video);
        assert!(probe.has_audio);
    }

    #[test]
    fn test_probe_parsing_audio_only() {
        let json = r#"{"format": {"duration": "120.0"}, "streams": [{"codec_type": "audio"}]}"#;
        let probe = parse_probe(json).unwrap();
        assert!(!probe.has_video);
        assert!(probe.has_audio);
    }

    #[test]
    fn test_probe_parsing_garbage() {
        assert!(parse_probe("nope").is_err());
    }

    #[tokio::test]
    async fn test_upload_with_retry_eventually_succeeds() {
        use std::path::Path;
        use std::sync::atomic::{AtomicU32, Ordering};

        struct FlakyStore {
            failures: AtomicU32,
        }

        #[async_trait]
        impl ObjectStore for FlakyStore {
            async fn put(&self, _k: &str, _d: Vec<u8>, _c: &str) -> Result<String> {
                unreachable!()
            }
            async fn put_file(&self, key: &str, _p: &Path, _c: &str) -> Result<String> {
                if self.failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |f| {
                    f.checked_sub(1)
                }).is_ok()
                {
                    Err(Error::UpstreamUnavailable("store flake".into()))
                } else {
                    Ok(format!("http://objects.test/{}", key))
                }
            }
            async fn get(&self, _k: &str) -> Result<Option<Vec<u8>>> {
                Ok(None)
            }
            async fn exists(&self, _k: &str) -> Result<bool> {
                Ok(false)
            }
            fn public_url(&self, key: &str) -> String {
                format!("http://objects.test/{}", key)
            }
        }

        let store = FlakyStore {
            failures: AtomicU32::new(2),
        };
        let url = upload_with_retry(&store, "content/c/processed.mp4", Path::new("/dev/null"), "video/mp4")
            .await
            .unwrap();
        assert_eq!(url, "http://objects.test/content/c/processed.mp4");
    }

    #[tokio::test]
    async fn test_upload_with_retry_gives_up() {
        use std::path::Path;

        struct DeadStore;

        #[async_trait]
        impl ObjectStore for DeadStore {
            async fn put(&self, _k: &str, _d: Vec<u8>, _c: &str) -> Result<String> {
                Err(Error::UpstreamUnavailable("down".into()))
            }
            async fn put_file(&self, _k: &str, _p: &Path, _c: &str) -> Result<String> {
                Err(Error::UpstreamUnavailable("down".into()))
            }
            async fn get(&self, _k: &str) -> Result<Option<Vec<u8>>> {
                Ok(None)
            }
            async fn exists(&self, _k: &str) -> Result<bool> {
                Ok(false)
            }
            fn public_url(&self, _key: &str) -> String {
                String::new()
            }
        }

        let err = upload_with_retry(&DeadStore, "k", Path::new("/dev/null"), "video/mp4")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UpstreamUnavailable(_)));
    }
}
