//! Hosted generative-language responder speaking the `generateContent` REST call.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use shared::{
    domain::ChatMessage,
    protocol::{ApiErrorEnvelope, Content, GenerateContentRequest, GenerateContentResponse},
};
use tokio::sync::Mutex;
use tracing::{info, warn};
use url::Url;

use crate::{MissingResponder, Responder, ResponderError};

pub const DEFAULT_API_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const API_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Debug, Clone)]
pub struct GeminiOptions {
    pub api_base_url: String,
    pub model: String,
    pub system_instruction: Option<String>,
    pub request_timeout: Duration,
}

impl Default for GeminiOptions {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.into(),
            model: DEFAULT_MODEL.into(),
            system_instruction: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Keeps the conversation so far and replays it with every request. Only
/// exchanges that produced a reply are recorded.
pub struct GeminiResponder {
    http: Client,
    endpoint: Url,
    api_key: String,
    system_instruction: Option<String>,
    history: Mutex<Vec<ChatMessage>>,
}

impl GeminiResponder {
    pub fn new(api_key: impl Into<String>, options: GeminiOptions) -> Result<Self> {
        let endpoint = generate_content_url(&options.api_base_url, &options.model)?;
        let http = Client::builder()
            .timeout(options.request_timeout)
            .build()
            .context("failed to build responder http client")?;

        Ok(Self {
            http,
            endpoint,
            api_key: api_key.into(),
            system_instruction: options
                .system_instruction
                .filter(|instruction| !instruction.trim().is_empty()),
            history: Mutex::new(Vec::new()),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub async fn history_len(&self) -> usize {
        self.history.lock().await.len()
    }

    pub async fn reset_history(&self) {
        self.history.lock().await.clear();
    }
}

#[async_trait]
impl Responder for GeminiResponder {
    async fn generate(&self, prompt: &str) -> Result<String, ResponderError> {
        if !self.has_credential() {
            return Err(ResponderError::MissingCredential);
        }

        let user_turn = ChatMessage::user(prompt);
        let mut contents: Vec<Content> = self
            .history
            .lock()
            .await
            .iter()
            .map(Content::from)
            .collect();
        contents.push(Content::from(&user_turn));

        let request = GenerateContentRequest {
            system_instruction: self
                .system_instruction
                .as_ref()
                .map(|instruction| Content::text(None, instruction.clone())),
            contents,
        };

        let res = self
            .http
            .post(self.endpoint.clone())
            .header(API_KEY_HEADER, &self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorEnvelope>(&body)
                .map(|envelope| envelope.error.message)
                .unwrap_or(body);
            warn!("gemini: request rejected status={} message={message}", status.as_u16());
            return Err(ResponderError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let raw = res.bytes().await?;
        let body: GenerateContentResponse = serde_json::from_slice(&raw)
            .map_err(|err| ResponderError::Malformed(err.to_string()))?;
        let text = body.text();

        // Blank turns are rejected by the API when replayed.
        if text.trim().is_empty() {
            info!(
                "gemini: blank reply not recorded finish_reason={}",
                body.finish_reason().unwrap_or("unknown")
            );
            return Ok(text);
        }

        let mut history = self.history.lock().await;
        history.push(user_turn);
        history.push(ChatMessage::assistant(text.clone()));
        info!("gemini: exchange recorded turns={}", history.len());

        Ok(text)
    }

    fn has_credential(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

/// Picks the hosted responder when a non-blank key is present, otherwise a
/// [`MissingResponder`] so callers can detect the gap before any request.
pub fn build_responder(
    api_key: Option<&str>,
    options: GeminiOptions,
) -> Result<Arc<dyn Responder>> {
    match api_key.map(str::trim).filter(|key| !key.is_empty()) {
        Some(key) => Ok(Arc::new(GeminiResponder::new(key, options)?)),
        None => {
            warn!("gemini: no api key configured; chat replies will use the fallback message");
            Ok(Arc::new(MissingResponder))
        }
    }
}

fn generate_content_url(api_base_url: &str, model: &str) -> Result<Url> {
    let model = model.trim();
    if model.is_empty() {
        anyhow::bail!("model name must not be empty");
    }
    let raw = format!(
        "{}/v1beta/models/{model}:generateContent",
        api_base_url.trim().trim_end_matches('/')
    );
    Url::parse(&raw).with_context(|| format!("invalid responder endpoint '{raw}'"))
}
