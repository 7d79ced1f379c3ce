//! Vision-language model client
//!
//! The model runs in a separate inference server; this module is the
//! typed boundary to it. Everything that talks to the model goes
//! through the `InferenceEngine` trait so tests can script outputs
//! without a server.

use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

/// Prompt for per-frame analysis
///
/// The extraction layer depends on the label set named here; change
/// them together.
pub const ANALYSIS_PROMPT: &str = "\
You are MedVisor assisting an endoscopist.

Analyze this medical procedure snapshot.

Return ONLY structured output:

Finding:
Location:
Risk Level (Low/Medium/High):
Suggested Next Step:

Do NOT provide definitive diagnosis.
Be cautious and clinician-supportive.
";

/// Prompt for clarification questions against the latest snapshot
pub fn clarify_prompt(question: &str) -> String {
    format!(
        "\
You are MedVisor.

The medical professional asked:

\"{}\"

Look again at the snapshot and answer ONLY based on visible evidence.

Return structured output:

Clarification:
Confidence:
Suggested Action:
",
        question
    )
}

/// Inference boundary errors
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("Model server request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Model server returned error: {0}")]
    Server(String),

    #[error("Inference timed out after {0}s")]
    Timeout(u64),
}

/// Seam between the pipeline and the model server
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// Analyze one JPEG frame with the given prompt, returning the raw
    /// model text
    async fn analyze(&self, jpeg: &[u8], prompt: &str) -> Result<String, InferenceError>;

    /// Release accelerator caches between batches; failures here are
    /// not actionable and are swallowed by implementations
    async fn reset(&self);

    fn model_name(&self) -> &str;
}

#[derive(Debug, Deserialize)]
struct AnalyzeResponse {
    output: String,
}

/// HTTP client for the model server
pub struct HttpInferenceEngine {
    client: reqwest::Client,
    base_url: String,
    model_name: String,
}

impl HttpInferenceEngine {
    pub fn new(base_url: String, model_name: String, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model_name,
        }
    }
}

#[async_trait]
impl InferenceEngine for HttpInferenceEngine {
    async fn analyze(&self, jpeg: &[u8], prompt: &str) -> Result<String, InferenceError> {
        let image_b64 = base64::engine::general_purpose::STANDARD.encode(jpeg);

        let response = self
            .client
            .post(format!("{}/analyze", self.base_url))
            .json(&json!({
                "model": self.model_name,
                "prompt": prompt,
                "image": image_b64,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::Server(format!("{}: {}", status, body)));
        }

        let parsed: AnalyzeResponse = response.json().await?;
        Ok(parsed.output)
    }

    async fn reset(&self) {
        // Cache release between batches. The server may not implement
        // this; a failed call costs nothing but the next batch running
        // with a warm cache.
        let result = self
            .client
            .post(format!("{}/reset", self.base_url))
            .send()
            .await;

        if let Err(e) = result {
            tracing::debug!("Model server reset not available: {}", e);
        }
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}
