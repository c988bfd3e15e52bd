use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::intent::Inference;
use crate::kernel::request::{Message, Request};
use crate::kernel::response::ResponseBuilder;
use crate::kernel::session::Session;
use crate::services::recognizer::Recognizer;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpRecognizerConfig {
    pub base_url: String,
    #[serde(default = "HttpRecognizerConfig::default_timeout_ms")]
    pub timeout_ms: u64,
}

impl HttpRecognizerConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout_ms: Self::default_timeout_ms(),
        }
    }

    fn default_timeout_ms() -> u64 {
        DEFAULT_TIMEOUT.as_millis() as u64
    }
}

#[derive(Serialize)]
struct InferenceRequest<'a> {
    message: &'a Message,
    #[serde(skip_serializing_if = "Option::is_none")]
    action: Option<&'a str>,
    voice: bool,
    raw: &'a Value,
}

/// Remote NLU engine reached over HTTP.
#[derive(Clone)]
pub struct HttpRecognizer {
    client: Client,
    base_url: String,
}

impl HttpRecognizer {
    pub fn new(config: HttpRecognizerConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms)) // hard timeout at the network level
            .build()
            .context("building NLU http client")?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Recognizer for HttpRecognizer {
    async fn inference(&self, req: &Request, _res: &ResponseBuilder, _session: &Session) -> Result<Inference> {
        let body = InferenceRequest {
            message: &req.message,
            action: req.action_type(),
            voice: req.voice_action,
            raw: &req.raw,
        };

        let response = self
            .client
            .post(format!("{}/inference", self.base_url))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!("NLU server error: {}", response.status()));
        }

        let inference: Inference = response.json().await.context("decoding NLU inference")?;
        debug!(variants = inference.variants.len(), "Remote inference received");
        Ok(inference)
    }
}
