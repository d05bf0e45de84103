use super::*;
use shared::domain::Role;
use tokio::{
    sync::{oneshot, Mutex},
    time::{self, Duration},
};

struct StubResponder {
    reply: std::result::Result<String, String>,
    has_credential: bool,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl StubResponder {
    fn ok(reply: impl Into<String>) -> Self {
        Self {
            reply: Ok(reply.into()),
            has_credential: true,
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn failing(err: impl Into<String>) -> Self {
        Self {
            reply: Err(err.into()),
            has_credential: true,
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn without_credential() -> Self {
        let mut responder = Self::ok("should never be used");
        responder.has_credential = false;
        responder
    }
}

#[async_trait]
impl Responder for StubResponder {
    async fn generate(&self, prompt: &str) -> Result<String, ResponderError> {
        self.prompts.lock().await.push(prompt.to_string());
        match &self.reply {
            Ok(text) => Ok(text.clone()),
            Err(err) => Err(ResponderError::Transport(err.clone())),
        }
    }

    fn has_credential(&self) -> bool {
        self.has_credential
    }
}

/// Holds every request open until the test releases it.
struct GatedResponder {
    gate: Mutex<Option<oneshot::Receiver<String>>>,
}

#[async_trait]
impl Responder for GatedResponder {
    async fn generate(&self, _prompt: &str) -> Result<String, ResponderError> {
        let gate = self.gate.lock().await.take();
        match gate {
            Some(rx) => rx
                .await
                .map_err(|_| ResponderError::Transport("gate dropped".into())),
            None => Err(ResponderError::Transport("gate already used".into())),
        }
    }
}

struct PanickingResponder;

#[async_trait]
impl Responder for PanickingResponder {
    async fn generate(&self, _prompt: &str) -> Result<String, ResponderError> {
        panic!("backend exploded");
    }
}

fn greeting() -> ChatMessage {
    ChatMessage::assistant(DEFAULT_GREETING)
}

#[tokio::test]
async fn starts_with_single_greeting_and_idle() {
    let controller = ChatController::new(Arc::new(StubResponder::ok("OK")));

    assert_eq!(controller.transcript(), vec![greeting()]);
    assert!(!controller.is_pending());
}

#[tokio::test]
async fn custom_greeting_is_seeded() {
    let controller = ChatController::with_greeting(Arc::new(MissingResponder), "Hola.");
    let transcript = controller.transcript();

    assert_eq!(transcript.len(), 1);
    assert_eq!(transcript[0].role, Role::Assistant);
    assert_eq!(transcript[0].text, "Hola.");
}

#[tokio::test]
async fn blank_submits_change_nothing() {
    let responder = StubResponder::ok("OK");
    let prompts = Arc::clone(&responder.prompts);
    let controller = ChatController::new(Arc::new(responder));

    assert_eq!(
        controller.submit("").await,
        SubmitOutcome::Ignored(ErrorCode::EmptyInput)
    );
    assert_eq!(
        controller.submit("   ").await,
        SubmitOutcome::Ignored(ErrorCode::EmptyInput)
    );

    assert_eq!(controller.transcript(), vec![greeting()]);
    assert!(prompts.lock().await.is_empty());
}

#[tokio::test]
async fn successful_reply_is_appended() {
    let responder = StubResponder::ok("OK");
    let prompts = Arc::clone(&responder.prompts);
    let controller = ChatController::new(Arc::new(responder));

    assert_eq!(controller.submit("ping").await, SubmitOutcome::Replied);

    assert_eq!(
        controller.transcript(),
        vec![
            greeting(),
            ChatMessage::user("ping"),
            ChatMessage::assistant("OK")
        ]
    );
    assert!(!controller.is_pending());
    assert_eq!(*prompts.lock().await, vec!["ping".to_string()]);
}

#[tokio::test]
async fn user_text_is_kept_verbatim() {
    let responder = StubResponder::ok("OK");
    let prompts = Arc::clone(&responder.prompts);
    let controller = ChatController::new(Arc::new(responder));

    controller.submit("  padded  ").await;

    assert_eq!(controller.transcript()[1], ChatMessage::user("  padded  "));
    assert_eq!(*prompts.lock().await, vec!["  padded  ".to_string()]);
}

#[tokio::test]
async fn failing_responder_degrades_to_apology() {
    let controller = ChatController::new(Arc::new(StubResponder::failing("connection reset")));

    assert_eq!(
        controller.submit("x").await,
        SubmitOutcome::Degraded(ErrorCode::ResponderFailure)
    );

    assert_eq!(
        controller.transcript(),
        vec![
            greeting(),
            ChatMessage::user("x"),
            ChatMessage::assistant(RESPONDER_FAILURE_REPLY)
        ]
    );
    assert!(!controller.is_pending());
}

#[tokio::test]
async fn missing_credential_skips_the_request() {
    let responder = StubResponder::without_credential();
    let prompts = Arc::clone(&responder.prompts);
    let controller = ChatController::new(Arc::new(responder));

    assert_eq!(
        controller.submit("precio?").await,
        SubmitOutcome::Degraded(ErrorCode::MissingCredential)
    );

    let transcript = controller.transcript();
    assert_eq!(
        transcript.last(),
        Some(&ChatMessage::assistant(MISSING_CREDENTIAL_REPLY))
    );
    assert!(prompts.lock().await.is_empty());
    assert!(!controller.is_pending());
}

#[tokio::test]
async fn missing_responder_uses_credential_fallback() {
    let controller = ChatController::new(Arc::new(MissingResponder));

    controller.submit("hello").await;

    assert_eq!(
        controller.transcript().last(),
        Some(&ChatMessage::assistant(MISSING_CREDENTIAL_REPLY))
    );
}

#[tokio::test]
async fn empty_reply_uses_placeholder() {
    let controller = ChatController::new(Arc::new(StubResponder::ok("  ")));

    assert_eq!(controller.submit("hi").await, SubmitOutcome::Replied);
    assert_eq!(
        controller.transcript().last(),
        Some(&ChatMessage::assistant(EMPTY_REPLY_PLACEHOLDER))
    );
}

#[tokio::test]
async fn panicking_responder_is_contained() {
    let controller = ChatController::new(Arc::new(PanickingResponder));

    assert_eq!(
        controller.submit("boom").await,
        SubmitOutcome::Degraded(ErrorCode::ResponderFailure)
    );
    assert!(!controller.is_pending());
    assert_eq!(controller.transcript().len(), 3);
}

#[tokio::test]
async fn second_submit_while_pending_is_ignored() {
    let (release, gate) = oneshot::channel();
    let controller = Arc::new(ChatController::new(Arc::new(GatedResponder {
        gate: Mutex::new(Some(gate)),
    })));
    let mut events = controller.subscribe_events();

    let first = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move { controller.submit("hello").await })
    };

    loop {
        match events.recv().await.expect("event") {
            ChatEvent::PendingChanged(true) => break,
            _ => continue,
        }
    }
    assert!(controller.is_pending());

    assert_eq!(
        controller.submit("world").await,
        SubmitOutcome::Ignored(ErrorCode::ConcurrentSubmit)
    );
    assert_eq!(
        controller.transcript(),
        vec![greeting(), ChatMessage::user("hello")]
    );

    release.send("reply".to_string()).expect("release gate");
    assert_eq!(first.await.expect("join"), SubmitOutcome::Replied);

    assert_eq!(
        controller.transcript(),
        vec![
            greeting(),
            ChatMessage::user("hello"),
            ChatMessage::assistant("reply")
        ]
    );
    assert!(!controller.is_pending());
}

#[tokio::test]
async fn abandoned_submit_reopens_the_gate() {
    let (_release, gate) = oneshot::channel::<String>();
    let controller = ChatController::new(Arc::new(GatedResponder {
        gate: Mutex::new(Some(gate)),
    }));
    let mut events = controller.subscribe_events();

    let timed_out = time::timeout(Duration::from_millis(50), controller.submit("hello")).await;
    assert!(timed_out.is_err(), "gated reply should not resolve");

    assert!(!controller.is_pending());
    assert_eq!(
        controller.transcript(),
        vec![
            greeting(),
            ChatMessage::user("hello"),
            ChatMessage::assistant(RESPONDER_FAILURE_REPLY)
        ]
    );

    let mut last_pending = None;
    while let Ok(event) = events.try_recv() {
        if let ChatEvent::PendingChanged(pending) = event {
            last_pending = Some(pending);
        }
    }
    assert_eq!(last_pending, Some(false));

    // The gate was consumed by the abandoned call, so this one fails, but it is sent.
    assert_eq!(
        controller.submit("again").await,
        SubmitOutcome::Degraded(ErrorCode::ResponderFailure)
    );
    assert_eq!(controller.transcript().len(), 5);
}

#[tokio::test]
async fn submit_publishes_appends_and_pending_changes_in_order() {
    let controller = ChatController::new(Arc::new(StubResponder::ok("OK")));
    let mut events = controller.subscribe_events();

    controller.submit("ping").await;

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert_eq!(
        seen,
        vec![
            ChatEvent::MessageAppended {
                index: 1,
                message: ChatMessage::user("ping")
            },
            ChatEvent::PendingChanged(true),
            ChatEvent::MessageAppended {
                index: 2,
                message: ChatMessage::assistant("OK")
            },
            ChatEvent::PendingChanged(false),
        ]
    );
}

#[tokio::test]
async fn ignored_submits_publish_nothing() {
    let controller = ChatController::new(Arc::new(StubResponder::ok("OK")));
    let mut events = controller.subscribe_events();

    controller.submit(" \t ").await;

    assert!(events.try_recv().is_err());
}

#[test]
fn responder_errors_map_to_codes() {
    assert_eq!(
        ResponderError::MissingCredential.code(),
        ErrorCode::MissingCredential
    );
    assert_eq!(
        ResponderError::Status {
            status: 503,
            message: "overloaded".into()
        }
        .code(),
        ErrorCode::ResponderFailure
    );
    assert_eq!(
        ResponderError::Malformed("eof".into()).code(),
        ErrorCode::ResponderFailure
    );
}
