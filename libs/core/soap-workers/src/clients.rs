//! HTTP clients for the two upstream AI microservices (§6): the
//! transcription service and the agent (note-structuring) service.
//!
//! Both clients classify failures into `job_core::ErrorCategory` so the
//! retry policy engine can act on them without ever seeing a raw
//! `reqwest::Error`.

use std::time::Duration;

use job_core::{CircuitBreakerConfig, ErrorCategory, ResilienceLayer};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub struct UpstreamError {
    pub category: ErrorCategory,
    pub message: String,
}

impl std::fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.category.as_str(), self.message)
    }
}

impl std::error::Error for UpstreamError {}

fn classify_reqwest_error(err: &reqwest::Error) -> ErrorCategory {
    if err.is_timeout() {
        ErrorCategory::TransientNetwork
    } else if err.is_connect() {
        ErrorCategory::TransientNetwork
    } else if let Some(status) = err.status() {
        ErrorCategory::from_upstream_status(Some(status.as_u16()))
    } else {
        ErrorCategory::TransientNetwork
    }
}

/// Health probe status reported by either upstream (§6).
#[derive(Debug, Clone, Deserialize)]
pub struct ProbeHealth {
    pub status: String,
    #[serde(default)]
    pub model_available: Option<bool>,
    #[serde(default)]
    pub model_loaded: Option<bool>,
}

impl ProbeHealth {
    /// The agent service's "healthy but no model loaded" state maps to a
    /// degraded (not fully down) signal per §6.
    pub fn is_fully_healthy(&self) -> bool {
        matches!(self.status.as_str(), "healthy" | "ok") && self.model_available != Some(false)
    }

    pub fn is_reachable(&self) -> bool {
        matches!(self.status.as_str(), "healthy" | "ok" | "degraded")
    }
}

#[derive(Clone)]
pub struct TranscriptionClient {
    http: reqwest::Client,
    base_url: String,
    resilience: std::sync::Arc<ResilienceLayer>,
}

#[derive(Debug, Deserialize)]
struct TranscribeResponse {
    transcript: String,
    #[serde(default)]
    transcript_id: Option<String>,
}

impl TranscriptionClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .expect("failed to build transcription HTTP client"),
            base_url: base_url.into(),
            resilience: std::sync::Arc::new(ResilienceLayer::new(CircuitBreakerConfig::default())),
        }
    }

    fn check_resilience(&self) -> Result<(), UpstreamError> {
        self.resilience.check().map_err(|e| UpstreamError {
            category: ErrorCategory::TransientNetwork,
            message: e.to_string(),
        })
    }

    pub async fn probe_health(&self) -> Result<ProbeHealth, UpstreamError> {
        self.check_resilience()?;

        let result = self
            .http
            .get(format!("{}/health", self.base_url))
            .send()
            .await;

        let resp = match result {
            Ok(r) => r,
            Err(e) => {
                self.resilience.record_failure();
                return Err(UpstreamError {
                    category: classify_reqwest_error(&e),
                    message: e.to_string(),
                });
            }
        };

        match resp.json::<ProbeHealth>().await {
            Ok(health) => {
                self.resilience.record_success();
                Ok(health)
            }
            Err(e) => {
                self.resilience.record_failure();
                Err(UpstreamError {
                    category: ErrorCategory::Internal,
                    message: e.to_string(),
                })
            }
        }
    }

    /// Transcribe an audio blob. `base_media_type` should already be the
    /// parsed, lowercased base type (§6, mime parsing).
    ///
    /// Calls are gated by a circuit breaker (§4.D's degradation controller
    /// acts on repeated `TransientNetwork` classifications upstream of
    /// this, but the breaker here also fails fast locally once the
    /// transcription service is clearly down, instead of letting every
    /// worker attempt hang out to the configured timeout).
    pub async fn transcribe(
        &self,
        audio_bytes: Vec<u8>,
        original_filename: &str,
        base_media_type: &str,
    ) -> Result<(String, Option<String>), UpstreamError> {
        self.check_resilience()?;

        let part = match reqwest::multipart::Part::bytes(audio_bytes)
            .file_name(original_filename.to_string())
            .mime_str(base_media_type)
        {
            Ok(p) => p,
            Err(e) => {
                return Err(UpstreamError {
                    category: ErrorCategory::InvalidInput,
                    message: e.to_string(),
                });
            }
        };
        let form = reqwest::multipart::Form::new().part("file", part);

        let result = self
            .http
            .post(format!("{}/transcribe", self.base_url))
            .multipart(form)
            .send()
            .await;

        let resp = match result {
            Ok(r) => r,
            Err(e) => {
                self.resilience.record_failure();
                return Err(UpstreamError {
                    category: classify_reqwest_error(&e),
                    message: e.to_string(),
                });
            }
        };

        if !resp.status().is_success() {
            self.resilience.record_failure();
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(UpstreamError {
                category: ErrorCategory::from_upstream_status(Some(status)),
                message: body,
            });
        }

        match resp.json::<TranscribeResponse>().await {
            Ok(parsed) => {
                self.resilience.record_success();
                Ok((parsed.transcript, parsed.transcript_id))
            }
            Err(e) => {
                self.resilience.record_failure();
                Err(UpstreamError {
                    category: ErrorCategory::Internal,
                    message: e.to_string(),
                })
            }
        }
    }
}

#[derive(Clone)]
pub struct AgentClient {
    http: reqwest::Client,
    base_url: String,
    resilience: std::sync::Arc<ResilienceLayer>,
}

#[derive(Debug, Serialize)]
struct FormatNoteRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct FormatNoteResponse {
    structured_text: String,
}

impl AgentClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .expect("failed to build agent HTTP client"),
            base_url: base_url.into(),
            resilience: std::sync::Arc::new(ResilienceLayer::new(CircuitBreakerConfig::default())),
        }
    }

    fn check_resilience(&self) -> Result<(), UpstreamError> {
        self.resilience.check().map_err(|e| UpstreamError {
            category: ErrorCategory::TransientNetwork,
            message: e.to_string(),
        })
    }

    pub async fn probe_health(&self) -> Result<ProbeHealth, UpstreamError> {
        self.check_resilience()?;

        let result = self
            .http
            .get(format!("{}/health", self.base_url))
            .send()
            .await;

        let resp = match result {
            Ok(r) => r,
            Err(e) => {
                self.resilience.record_failure();
                return Err(UpstreamError {
                    category: classify_reqwest_error(&e),
                    message: e.to_string(),
                });
            }
        };

        match resp.json::<ProbeHealth>().await {
            Ok(health) => {
                self.resilience.record_success();
                Ok(health)
            }
            Err(e) => {
                self.resilience.record_failure();
                Err(UpstreamError {
                    category: ErrorCategory::Internal,
                    message: e.to_string(),
                })
            }
        }
    }

    pub async fn format_note(&self, text: &str) -> Result<String, UpstreamError> {
        self.check_resilience()?;

        let result = self
            .http
            .post(format!("{}/format_note", self.base_url))
            .json(&FormatNoteRequest { text })
            .send()
            .await;

        let resp = match result {
            Ok(r) => r,
            Err(e) => {
                self.resilience.record_failure();
                return Err(UpstreamError {
                    category: classify_reqwest_error(&e),
                    message: e.to_string(),
                });
            }
        };

        if !resp.status().is_success() {
            self.resilience.record_failure();
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(UpstreamError {
                category: ErrorCategory::from_upstream_status(Some(status)),
                message: body,
            });
        }

        match resp.json::<FormatNoteResponse>().await {
            Ok(parsed) => {
                self.resilience.record_success();
                Ok(parsed.structured_text)
            }
            Err(e) => {
                self.resilience.record_failure();
                Err(UpstreamError {
                    category: ErrorCategory::Internal,
                    message: e.to_string(),
                })
            }
        }
    }
}
