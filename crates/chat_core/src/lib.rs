use std::{
    panic::AssertUnwindSafe,
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use futures::FutureExt;
use shared::{
    domain::ChatMessage,
    error::{ChatError, ErrorCode},
};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

pub mod gemini;

pub use gemini::{build_responder, GeminiOptions, GeminiResponder};

pub const DEFAULT_GREETING: &str =
    "Hi. I'm the site's assistant. Looking for organic search growth or process automation?";
pub const MISSING_CREDENTIAL_REPLY: &str =
    "I can't reach my knowledge base right now (missing API key).";
pub const RESPONDER_FAILURE_REPLY: &str = "Connection error. Please try again.";
/// Shown when the responder succeeds with an empty reply.
pub const EMPTY_REPLY_PLACEHOLDER: &str = "Processing...";

#[derive(Debug, Error)]
pub enum ResponderError {
    #[error("responder credential is not configured")]
    MissingCredential,
    #[error("responder transport failed: {0}")]
    Transport(String),
    #[error("responder returned status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("malformed responder payload: {0}")]
    Malformed(String),
}

impl ResponderError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ResponderError::MissingCredential => ErrorCode::MissingCredential,
            ResponderError::Transport(_)
            | ResponderError::Status { .. }
            | ResponderError::Malformed(_) => ErrorCode::ResponderFailure,
        }
    }
}

impl From<reqwest::Error> for ResponderError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_decode() {
            ResponderError::Malformed(value.to_string())
        } else {
            ResponderError::Transport(value.to_string())
        }
    }
}

/// External text generator. Session continuity, if any, belongs to the implementation.
#[async_trait]
pub trait Responder: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, ResponderError>;

    /// Whether the responder can be called at all. Checked before every request.
    fn has_credential(&self) -> bool {
        true
    }
}

pub struct MissingResponder;

#[async_trait]
impl Responder for MissingResponder {
    async fn generate(&self, _prompt: &str) -> Result<String, ResponderError> {
        Err(ResponderError::MissingCredential)
    }

    fn has_credential(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// A view should scroll to the newest message on every append.
    MessageAppended { index: usize, message: ChatMessage },
    PendingChanged(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Nothing was appended and no request was made.
    Ignored(ErrorCode),
    Replied,
    /// The responder was unavailable or failed; an apology was appended instead.
    Degraded(ErrorCode),
}

struct ChatState {
    transcript: Vec<ChatMessage>,
    pending: bool,
}

/// Append-only transcript with a one-request-at-a-time gate in front of a [`Responder`].
pub struct ChatController {
    responder: Arc<dyn Responder>,
    inner: Mutex<ChatState>,
    events: broadcast::Sender<ChatEvent>,
}

impl ChatController {
    pub fn new(responder: Arc<dyn Responder>) -> Self {
        Self::with_greeting(responder, DEFAULT_GREETING)
    }

    pub fn with_greeting(responder: Arc<dyn Responder>, greeting: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            responder,
            inner: Mutex::new(ChatState {
                transcript: vec![ChatMessage::assistant(greeting)],
                pending: false,
            }),
            events,
        }
    }

    pub fn transcript(&self) -> Vec<ChatMessage> {
        self.lock_state().transcript.clone()
    }

    pub fn is_pending(&self) -> bool {
        self.lock_state().pending
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    /// Sends `user_text` to the responder and appends the reply. Never fails:
    /// responder problems become an assistant apology in the transcript. If
    /// the returned future is dropped mid-reply, the apology is appended and
    /// the pending gate reopens.
    pub async fn submit(&self, user_text: &str) -> SubmitOutcome {
        if user_text.trim().is_empty() {
            debug!("chat: ignored empty submit");
            return SubmitOutcome::Ignored(ErrorCode::EmptyInput);
        }

        {
            let mut guard = self.lock_state();
            if guard.pending {
                debug!("chat: ignored submit while a reply is pending");
                return SubmitOutcome::Ignored(ErrorCode::ConcurrentSubmit);
            }
            guard.pending = true;
            self.append(&mut guard, ChatMessage::user(user_text));
            let _ = self.events.send(ChatEvent::PendingChanged(true));
        }

        let exchange = PendingExchange {
            controller: self,
            settled: false,
        };
        let (reply, outcome) = self.request_reply(user_text).await;
        exchange.settle(reply);

        outcome
    }

    fn finish_exchange(&self, reply: String) {
        let mut guard = self.lock_state();
        self.append(&mut guard, ChatMessage::assistant(reply));
        guard.pending = false;
        let _ = self.events.send(ChatEvent::PendingChanged(false));
    }

    fn lock_state(&self) -> MutexGuard<'_, ChatState> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn request_reply(&self, user_text: &str) -> (String, SubmitOutcome) {
        if !self.responder.has_credential() {
            return degrade(ChatError::new(
                ErrorCode::MissingCredential,
                "responder credential is not configured",
            ));
        }

        let result = AssertUnwindSafe(self.responder.generate(user_text))
            .catch_unwind()
            .await;

        match result {
            Ok(Ok(text)) if text.trim().is_empty() => {
                info!("chat: responder returned an empty reply");
                (EMPTY_REPLY_PLACEHOLDER.to_string(), SubmitOutcome::Replied)
            }
            Ok(Ok(text)) => {
                info!("chat: reply received chars={}", text.chars().count());
                (text, SubmitOutcome::Replied)
            }
            Ok(Err(err)) => degrade(ChatError::new(err.code(), err.to_string())),
            Err(_) => degrade(ChatError::new(
                ErrorCode::ResponderFailure,
                "responder panicked",
            )),
        }
    }

    fn append(&self, state: &mut ChatState, message: ChatMessage) {
        state.transcript.push(message.clone());
        let index = state.transcript.len() - 1;
        let _ = self
            .events
            .send(ChatEvent::MessageAppended { index, message });
    }
}

/// Closes the exchange opened by `submit`, including when its future is dropped.
struct PendingExchange<'a> {
    controller: &'a ChatController,
    settled: bool,
}

impl PendingExchange<'_> {
    fn settle(mut self, reply: String) {
        self.settled = true;
        self.controller.finish_exchange(reply);
    }
}

impl Drop for PendingExchange<'_> {
    fn drop(&mut self) {
        if !self.settled {
            warn!("chat: submit abandoned before the reply arrived");
            self.controller
                .finish_exchange(RESPONDER_FAILURE_REPLY.to_string());
        }
    }
}

fn degrade(err: ChatError) -> (String, SubmitOutcome) {
    let reply = match err.code {
        ErrorCode::MissingCredential => {
            warn!("chat: responder unavailable err={err}");
            MISSING_CREDENTIAL_REPLY
        }
        _ => {
            error!("chat: responder failed err={err}");
            RESPONDER_FAILURE_REPLY
        }
    };
    (reply.to_string(), SubmitOutcome::Degraded(err.code))
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;

#[cfg(test)]
#[path = "tests/gemini_tests.rs"]
mod gemini_tests;
