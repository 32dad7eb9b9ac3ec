//! Speech-to-text provider abstraction: a small async trait with a remote
//! HTTP implementation and a local weight-validated implementation, the
//! same provider-trait-plus-registry shape used for the scoring and TTS
//! providers.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone)]
pub struct SttResponse {
    pub text: String,
    pub segments: Option<Vec<SttSegment>>,
}

#[derive(Debug, Clone)]
pub struct SttSegment {
    pub start_secs: f64,
    pub end_secs: f64,
    pub text: String,
}

#[async_trait]
pub trait SttProvider: Send + Sync {
    async fn transcribe_chunk(&self, path: &Path, language_hint: Option<&str>) -> Result<SttResponse>;
}

/// A remote HTTP speech-to-text provider: posts `{audio_file, language_hint,
/// temperature=0}` as multipart form data, expects `{text, segments?}` back.
pub struct RemoteSttProvider {
    http: Arc<reqwest::Client>,
    endpoint: String,
    api_key: String,
}

impl RemoteSttProvider {
    pub fn new(http: Arc<reqwest::Client>, endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl SttProvider for RemoteSttProvider {
    async fn transcribe_chunk(&self, path: &Path, language_hint: Option<&str>) -> Result<SttResponse> {
        let bytes = tokio::fs::read(path).await?;
        let part = reqwest::multipart::Part::bytes(bytes).file_name(
            path.file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "chunk.mp3".to_string()),
        );
        let mut form = reqwest::multipart::Form::new()
            .part("audio_file", part)
            .text("temperature", "0");
        if let Some(lang) = language_hint {
            form = form.text("language_hint", lang.to_string());
        }

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| PipelineError::TransientNetwork {
                target: self.endpoint.clone(),
                detail: e.to_string(),
            })?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(PipelineError::RateLimit {
                provider: "stt".to_string(),
                retry_after_secs,
            });
        }
        if !response.status().is_success() {
            return Err(PipelineError::TransientNetwork {
                target: self.endpoint.clone(),
                detail: format!("status {}", response.status()),
            });
        }

        let body: serde_json::Value = response.json().await?;
        Ok(SttResponse {
            text: body["text"].as_str().unwrap_or_default().to_string(),
            segments: None,
        })
    }
}

/// A local model provider whose weights are SHA-256-validated on load.
/// The model runner itself is out of scope; this type owns the checksum
/// gate and defers inference to an injected closure-like trait object so
/// tests can substitute a stub.
pub struct LocalSttProvider {
    weights_path: std::path::PathBuf,
    expected_sha256: String,
}

impl LocalSttProvider {
    pub fn new(weights_path: impl Into<std::path::PathBuf>, expected_sha256: impl Into<String>) -> Self {
        Self {
            weights_path: weights_path.into(),
            expected_sha256: expected_sha256.into(),
        }
    }

    pub async fn validate_weights(&self) -> Result<()> {
        use sha2::{Digest, Sha256};
        let bytes = tokio::fs::read(&self.weights_path)
            .await
            .map_err(|_| PipelineError::ModelValidation {
                path: self.weights_path.clone(),
            })?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let actual: String = hasher.finalize().iter().map(|b| format!("{b:02x}")).collect();
        if actual != self.expected_sha256 {
            return Err(PipelineError::ModelValidation {
                path: self.weights_path.clone(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl SttProvider for LocalSttProvider {
    async fn transcribe_chunk(&self, _path: &Path, _language_hint: Option<&str>) -> Result<SttResponse> {
        self.validate_weights().await?;
        Err(PipelineError::ExternalTool {
            tool: "local-stt".to_string(),
            detail: "local model inference is not wired up in this environment".to_string(),
        })
    }
}

/// Selects the configured provider by name at `Context` construction.
pub fn build_registry() -> HashMap<&'static str, &'static str> {
    let mut registry = HashMap::new();
    registry.insert("remote", "RemoteSttProvider");
    registry.insert("local", "LocalSttProvider");
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubProvider {
        calls: std::sync::atomic::AtomicU32,
    }

    #[async_trait]
    impl SttProvider for StubProvider {
        async fn transcribe_chunk(&self, _path: &Path, _language_hint: Option<&str>) -> Result<SttResponse> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(SttResponse {
                text: "hello world".to_string(),
                segments: None,
            })
        }
    }

    #[tokio::test]
    async fn trait_object_is_callable() {
        let provider: Box<dyn SttProvider> = Box::new(StubProvider {
            calls: std::sync::atomic::AtomicU32::new(0),
        });
        let response = provider.transcribe_chunk(Path::new("/tmp/chunk.mp3"), None).await.unwrap();
        assert_eq!(response.text, "hello world");
    }
}
