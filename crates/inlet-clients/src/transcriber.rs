//! Transcription backend for audio-to-text.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use inlet_core::{defaults, Error, Result};

/// A transcribed segment with timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub start_secs: f64,
    pub end_secs: f64,
    pub text: String,
}

/// Result of a transcription request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcription {
    pub full_text: String,
    #[serde(default)]
    pub segments: Vec<TranscriptSegment>,
    /// ISO 639-1 code when the service reports one.
    #[serde(default)]
    pub language: Option<String>,
}

/// Backend for transcribing audio payloads.
#[async_trait]
pub trait TranscriberBackend: Send + Sync {
    async fn transcribe(
        &self,
        audio: &[u8],
        mime_type: &str,
        language: Option<&str>,
    ) -> Result<Transcription>;

    async fn detect_language(&self, audio: &[u8], mime_type: &str) -> Result<Option<String>>;

    async fn health_check(&self) -> Result<bool>;
}

/// Whisper-compatible ASR service over HTTP.
///
/// `POST /asr?output=json&word_timestamps=true` answers either a JSON body
/// (`{text, segments?, language?}`) or a plain-text transcript depending on
/// deployment; both shapes are handled explicitly.
pub struct WhisperClient {
    base_url: String,
    client: reqwest::Client,
}

/// JSON shape of the ASR endpoint.
#[derive(Deserialize)]
struct AsrResponse {
    text: String,
    #[serde(default)]
    segments: Option<Vec<AsrSegment>>,
    #[serde(default)]
    language: Option<String>,
}

#[derive(Deserialize)]
struct AsrSegment {
    start: f64,
    end: f64,
    text: String,
}

#[derive(Deserialize)]
struct DetectLanguageResponse {
    #[serde(alias = "detected_language", alias = "language_code")]
    language: Option<String>,
}

fn extension_for(mime_type: &str) -> &'static str {
    match mime_type {
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/wav" | "audio/x-wav" => "wav",
        "audio/ogg" => "ogg",
        "audio/flac" => "flac",
        "audio/aac" | "audio/mp4" => "m4a",
        "audio/webm" => "webm",
        _ => "wav",
    }
}

impl WhisperClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::builder()
                .timeout(defaults::TRANSCRIBE_TIMEOUT)
                .build()
                .expect("reqwest client construction is infallible with static config"),
        }
    }

    fn audio_form(audio: &[u8], mime_type: &str, language: Option<&str>) -> Result<reqwest::multipart::Form> {
        let part = reqwest::multipart::Part::bytes(audio.to_vec())
            .file_name(format!("audio.{}", extension_for(mime_type)))
            .mime_str(mime_type)
            .map_err(|e| Error::Internal(format!("failed to build multipart: {}", e)))?;
        let mut form = reqwest::multipart::Form::new().part("audio_file", part);
        if let Some(lang) = language {
            form = form.text("language", lang.to_string());
        }
        Ok(form)
    }
}

#[async_trait]
impl TranscriberBackend for WhisperClient {
    async fn transcribe(
        &self,
        audio: &[u8],
        mime_type: &str,
        language: Option<&str>,
    ) -> Result<Transcription> {
        let url = format!("{}/asr?output=json&word_timestamps=true", self.base_url);
        let form = Self::audio_form(audio, mime_type, language)?;

        let response = self.client.post(&url).multipart(form).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("transcriber returned {}: {}", status, body);
            return if status.is_client_error() {
                Err(Error::UpstreamRejected(message))
            } else {
                Err(Error::UpstreamUnavailable(message))
            };
        }

        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.contains("json"))
            .unwrap_or(false);
        let body = response.text().await?;

        // Some deployments answer plain text regardless of `output=json`.
        if is_json {
            if let Ok(parsed) = serde_json::from_str::<AsrResponse>(&body) {
                let segments = parsed
                    .segments
                    .unwrap_or_default()
                    .into_iter()
                    .map(|s| TranscriptSegment {
                        start_secs: s.start,
                        end_secs: s.end,
                        text: s.text,
                    })
                    .collect();
                return Ok(Transcription {
                    full_text: parsed.text,
                    segments,
                    language: parsed.language,
                });
            }
        }
        debug!("Transcriber answered non-JSON body, using it as plain text");
        Ok(Transcription {
            full_text: body.trim().to_string(),
            segments: Vec::new(),
            language: None,
        })
    }

    async fn detect_language(&self, audio: &[u8], mime_type: &str) -> Result<Option<String>> {
        let url = format!("{}/detect-language", self.base_url);
        let form = Self::audio_form(audio, mime_type, None)?;
        let response = self.client.post(&url).multipart(form).send().await?;
        if !response.status().is_success() {
            return Ok(None);
        }
        let parsed: DetectLanguageResponse = response.json().await.unwrap_or(DetectLanguageResponse {
            language: None,
        });
        Ok(parsed.language)
    }

    async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/health", self.base_url);
        match self
            .client
            .get(&url)
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

    #[test]
    fn test_asr_json_deserialization() {
        let json = r#"{
            "text": "Hello world",
            "segments": [
                {"start": 0.0, "end": 2.5, "text": "Hello"},
                {"start": 2.5, "end": 5.0, "text": "world"}
            ],
            "language": "en"
        }"#;
        let parsed: AsrResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.text, "Hello world");
        assert_eq!(parsed.segments.as_ref().unwrap().len(), 2);
        assert_eq!(parsed.language.as_deref(), Some("en"));
    }

    #[test]
    fn test_asr_json_minimal() {
        let parsed: AsrResponse = serde_json::from_str(r#"{"text": "hi"}"#).unwrap();
        assert_eq!(parsed.text, "hi");
        assert!(parsed.segments.is_none());
        assert!(parsed.language.is_none());
    }

    #[test]
    fn test_mime_extension_mapping() {
        assert_eq!(extension_for("audio/mpeg"), "mp3");
        assert_eq!(extension_for("audio/flac"), "flac");
        assert_eq!(extension_for("audio/mp4"), "m4a");
        assert_eq!(extension_for("application/octet-stream"), "wav");
    }

    #[test]
    fn test_detect_language_aliases() {
        let a: DetectLanguageResponse =
            serde_json::from_str(r#"{"detected_language": "de"}"#).unwrap();
        assert_eq!(a.language.as_deref(), Some("de"));
        let b: DetectLanguageResponse = serde_json::from_str(r#"{"language_code": "fr"}"#).unwrap();
        assert_eq!(b.language.as_deref(), Some("fr"));
    }
}
