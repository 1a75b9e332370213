//! Client side of the chat widget: conversation state, turn gating, and
//! paced playback of the gateway's reply.

pub mod conversation;
pub mod pacing;
pub mod terminal;
pub mod transport;

use futures::StreamExt;
use log::{ info, warn };
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

use crate::config::persona::{ FALLBACK_REPLY, GREETING };
use crate::models::chat::ChatMessage;
use conversation::Conversation;
use pacing::{ Pacer, PacingProfile };
use transport::{ ConsumerError, GatewayTransport, TextDecoder };

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    AwaitingResponse,
    Replaying,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum RenderMode {
    /// Drain the whole reply, then type it out word by word.
    #[default]
    Buffered,
    /// Show bytes as they arrive.
    Incremental,
}

impl fmt::Display for RenderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderMode::Buffered => write!(f, "buffered"),
            RenderMode::Incremental => write!(f, "incremental"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionState {
    pub conversation: Conversation,
    pub phase: TurnPhase,
}

impl SessionState {
    pub fn awaiting_response(&self) -> bool {
        self.phase == TurnPhase::AwaitingResponse
    }

    pub fn replaying(&self) -> bool {
        self.phase == TurnPhase::Replaying
    }

    pub fn is_busy(&self) -> bool {
        self.phase != TurnPhase::Idle
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitRejection {
    #[error("message is empty")]
    EmptyInput,
    #[error("a reply is still in progress ({0:?})")]
    Busy(TurnPhase),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed {
        reply_id: u64,
    },
    /// The reply entry holds the fallback text.
    Failed {
        reply_id: u64,
        error: String,
    },
}

impl TurnOutcome {
    pub fn reply_id(&self) -> u64 {
        match self {
            TurnOutcome::Completed { reply_id } | TurnOutcome::Failed { reply_id, .. } => *reply_id,
        }
    }
}

/// One chat widget. Clones share the same conversation and turn gate.
#[derive(Clone)]
pub struct ChatSession {
    transport: Arc<dyn GatewayTransport>,
    state: Arc<watch::Sender<SessionState>>,
    pacing: PacingProfile,
    render_mode: RenderMode,
}

impl ChatSession {
    pub fn new(transport: Arc<dyn GatewayTransport>) -> Self {
        let (tx, _rx) = watch::channel(SessionState {
            conversation: Conversation::with_greeting(GREETING),
            phase: TurnPhase::Idle,
        });
        Self {
            transport,
            state: Arc::new(tx),
            pacing: PacingProfile::default(),
            render_mode: RenderMode::default(),
        }
    }

    pub fn with_pacing(mut self, pacing: PacingProfile) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn with_render_mode(mut self, render_mode: RenderMode) -> Self {
        self.render_mode = render_mode;
        self
    }

    /// Receives a fresh snapshot after every change, for re-rendering.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn phase(&self) -> TurnPhase {
        self.state.borrow().phase
    }

    /// Runs one turn to completion. Rejected without side effects while another
    /// turn is in flight or when `input` is blank.
    pub async fn submit(&self, input: &str) -> Result<TurnOutcome, SubmitRejection> {
        let text = input.trim();
        let mut rejection = None;
        let mut payload = Vec::new();
        let mut reply_id = 0;

        // Check and claim the gate in one update so two callers cannot both pass.
        self.state.send_if_modified(|state| {
            if state.is_busy() {
                rejection = Some(SubmitRejection::Busy(state.phase));
                return false;
            }
            if text.is_empty() {
                rejection = Some(SubmitRejection::EmptyInput);
                return false;
            }
            payload = state.conversation.to_messages();
            payload.push(ChatMessage::user(text));
            state.conversation.push_user(text);
            reply_id = state.conversation.reserve_id();
            state.phase = TurnPhase::AwaitingResponse;
            true
        });
        if let Some(rejection) = rejection {
            return Err(rejection);
        }
        let mut guard = TurnGuard { state: &self.state, reply_id, armed: true };

        let result = match self.render_mode {
            RenderMode::Buffered => self.play_buffered(reply_id, payload).await,
            RenderMode::Incremental => self.play_incremental(reply_id, payload).await,
        };
        guard.armed = false;

        let outcome = match result {
            Ok(()) => {
                self.state.send_modify(|state| state.phase = TurnPhase::Idle);
                info!("Turn {} complete", reply_id);
                TurnOutcome::Completed { reply_id }
            }
            Err(e) => {
                warn!("Turn {} failed, showing fallback: {}", reply_id, e);
                release_with_fallback(&self.state, reply_id);
                TurnOutcome::Failed { reply_id, error: e.to_string() }
            }
        };

        Ok(outcome)
    }

    async fn play_buffered(
        &self,
        reply_id: u64,
        payload: Vec<ChatMessage>
    ) -> Result<(), ConsumerError> {
        let mut body = self.transport.post_chat(payload).await?;
        let mut decoder = TextDecoder::default();
        let mut full = String::new();
        while let Some(chunk) = body.next().await {
            full.push_str(&decoder.push(&chunk?));
        }
        full.push_str(&decoder.finish());

        self.begin_reply(reply_id);

        let mut pacer = Pacer::new(full);
        while let Some(token) = pacer.advance() {
            let delay = self.pacing.delay_for(token);
            self.state.send_modify(|state| {
                state.conversation.append_text(reply_id, token);
            });
            if delay.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(delay).await;
            }
        }

        Ok(())
    }

    async fn play_incremental(
        &self,
        reply_id: u64,
        payload: Vec<ChatMessage>
    ) -> Result<(), ConsumerError> {
        let mut body = self.transport.post_chat(payload).await?;
        let mut decoder = TextDecoder::default();
        let mut started = false;

        while let Some(chunk) = body.next().await {
            let text = decoder.push(&chunk?);
            if !started {
                self.begin_reply(reply_id);
                started = true;
            }
            self.append_reply(reply_id, &text);
        }

        if !started {
            self.begin_reply(reply_id);
        }
        let tail = decoder.finish();
        self.append_reply(reply_id, &tail);

        Ok(())
    }

    fn begin_reply(&self, reply_id: u64) {
        self.state.send_modify(|state| {
            state.phase = TurnPhase::Replaying;
            state.conversation.upsert_assistant(reply_id, "");
        });
    }

    fn append_reply(&self, reply_id: u64, text: &str) {
        if text.is_empty() {
            return;
        }
        self.state.send_modify(|state| {
            state.conversation.append_text(reply_id, text);
        });
    }
}

fn release_with_fallback(state: &watch::Sender<SessionState>, reply_id: u64) {
    state.send_modify(|state| {
        state.conversation.upsert_assistant(reply_id, FALLBACK_REPLY);
        state.phase = TurnPhase::Idle;
    });
}

/// Reopens the gate if a claimed turn is dropped before it finishes.
struct TurnGuard<'a> {
    state: &'a watch::Sender<SessionState>,
    reply_id: u64,
    armed: bool,
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!("Turn {} cancelled, showing fallback", self.reply_id);
            release_with_fallback(self.state, self.reply_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chat::Role;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::Mutex;
    use std::sync::atomic::{ AtomicUsize, Ordering };
    use std::time::Duration;
    use tokio::sync::Notify;
    use transport::ByteStream;

    enum Script {
        Chunks(Vec<Vec<u8>>),
        Reject,
        Status(u16),
        BreakAfter(Vec<Vec<u8>>),
        /// Never answers the first call.
        HangOnce(Vec<Vec<u8>>),
    }

    fn text_chunks(parts: &[&str]) -> Vec<Vec<u8>> {
        parts.iter().map(|p| p.as_bytes().to_vec()).collect()
    }

    struct ScriptedTransport {
        script: Script,
        calls: AtomicUsize,
        payloads: Mutex<Vec<Vec<ChatMessage>>>,
        gate: Option<Arc<Notify>>,
    }

    impl ScriptedTransport {
        fn new(script: Script) -> Self {
            Self { script, calls: AtomicUsize::new(0), payloads: Mutex::new(Vec::new()), gate: None }
        }

        fn gated(script: Script, gate: Arc<Notify>) -> Self {
            Self { gate: Some(gate), ..Self::new(script) }
        }
    }

    #[async_trait]
    impl GatewayTransport for ScriptedTransport {
        async fn post_chat(&self, messages: Vec<ChatMessage>) -> Result<ByteStream, ConsumerError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.payloads.lock().unwrap().push(messages);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            let items: Vec<Result<Bytes, ConsumerError>> = match &self.script {
                Script::Chunks(chunks) =>
                    chunks.iter().map(|c| Ok(Bytes::from(c.clone()))).collect(),
                Script::Reject => {
                    return Err(ConsumerError::Body("connection refused".into()));
                }
                Script::Status(code) => {
                    return Err(ConsumerError::Status(*code));
                }
                Script::BreakAfter(chunks) => {
                    let mut items: Vec<_> = chunks
                        .iter()
                        .map(|c| Ok(Bytes::from(c.clone())))
                        .collect();
                    items.push(Err(ConsumerError::Body("connection reset".into())));
                    items
                }
                Script::HangOnce(chunks) => {
                    if call == 0 {
                        futures::future::pending::<()>().await;
                    }
                    chunks.iter().map(|c| Ok(Bytes::from(c.clone()))).collect()
                }
            };
            Ok(Box::pin(futures::stream::iter(items)))
        }
    }

    fn session(transport: Arc<ScriptedTransport>) -> ChatSession {
        ChatSession::new(transport)
    }

    fn assistant_entries_after(state: &SessionState, skip: usize) -> Vec<String> {
        state.conversation
            .entries()
            .iter()
            .skip(skip)
            .filter(|e| e.role == Role::Assistant)
            .map(|e| e.text.clone())
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn buffered_turn_reveals_the_whole_reply() {
        let transport = Arc::new(
            ScriptedTransport::new(Script::Chunks(text_chunks(&["I'm ", "a student ", "at WPI."])))
        );
        let chat = session(transport.clone());

        let outcome = chat.submit("  What's your background?  ").await.unwrap();
        assert!(matches!(outcome, TurnOutcome::Completed { .. }));

        let state = chat.snapshot();
        assert_eq!(state.phase, TurnPhase::Idle);
        assert_eq!(state.conversation.len(), 3);
        assert_eq!(state.conversation.entries()[1].text, "What's your background?");
        assert_eq!(assistant_entries_after(&state, 1), vec!["I'm a student at WPI.".to_string()]);
        assert_eq!(state.conversation.get(outcome.reply_id()).unwrap().text, "I'm a student at WPI.");

        let payloads = transport.payloads.lock().unwrap();
        assert_eq!(payloads[0], vec![ChatMessage::user("What's your background?")]);
    }

    #[tokio::test(start_paused = true)]
    async fn history_excludes_the_greeting_and_keeps_prior_turns() {
        let transport = Arc::new(ScriptedTransport::new(Script::Chunks(text_chunks(&["ok"]))));
        let chat = session(transport.clone());

        chat.submit("first").await.unwrap();
        chat.submit("second").await.unwrap();

        let payloads = transport.payloads.lock().unwrap();
        assert_eq!(payloads[1], vec![
            ChatMessage::user("first"),
            ChatMessage::assistant("ok"),
            ChatMessage::user("second"),
        ]);
    }

    #[tokio::test(start_paused = true)]
    async fn replay_grows_the_placeholder_token_by_token() {
        let transport = Arc::new(ScriptedTransport::new(Script::Chunks(text_chunks(&["one two  three"]))));
        let chat = session(transport);
        let mut rx = chat.subscribe();

        let runner = tokio::spawn({
            let chat = chat.clone();
            async move { chat.submit("count").await }
        });

        let mut seen = Vec::new();
        loop {
            if rx.changed().await.is_err() {
                break;
            }
            let state = rx.borrow_and_update().clone();
            if state.replaying() {
                if let Some(last) = state.conversation.last() {
                    seen.push(last.text.clone());
                }
            }
            if state.phase == TurnPhase::Idle && !seen.is_empty() {
                break;
            }
        }
        runner.await.unwrap().unwrap();

        assert!(seen.len() > 1, "reply appeared in one step: {:?}", seen);
        assert_eq!(seen.last().map(String::as_str), Some("one two  three"));
        for pair in seen.windows(2) {
            assert!(pair[1].starts_with(&pair[0]));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn submissions_are_rejected_while_a_turn_is_in_flight() {
        let gate = Arc::new(Notify::new());
        let transport = Arc::new(
            ScriptedTransport::gated(Script::Chunks(text_chunks(&["slow reply here"])), gate.clone())
        );
        let chat = session(transport.clone());

        let runner = tokio::spawn({
            let chat = chat.clone();
            async move { chat.submit("hello").await }
        });
        while transport.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        assert!(chat.snapshot().awaiting_response());
        assert_eq!(chat.submit("again").await, Err(SubmitRejection::Busy(TurnPhase::AwaitingResponse)));
        assert_eq!(chat.submit("").await, Err(SubmitRejection::Busy(TurnPhase::AwaitingResponse)));
        assert_eq!(chat.snapshot().conversation.len(), 2);

        gate.notify_one();
        let mut rx = chat.subscribe();
        while !rx.borrow_and_update().replaying() {
            rx.changed().await.unwrap();
        }
        assert_eq!(chat.submit("during replay").await, Err(SubmitRejection::Busy(TurnPhase::Replaying)));

        runner.await.unwrap().unwrap();
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        assert_eq!(chat.snapshot().conversation.len(), 3);
        assert_eq!(chat.phase(), TurnPhase::Idle);
    }

    #[tokio::test]
    async fn blank_input_is_rejected_without_a_call() {
        let transport = Arc::new(ScriptedTransport::new(Script::Chunks(vec![])));
        let chat = session(transport.clone());

        assert_eq!(chat.submit("   \n").await, Err(SubmitRejection::EmptyInput));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
        assert_eq!(chat.snapshot().conversation.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_leave_exactly_one_fallback_reply() {
        for script in [
            Script::Reject,
            Script::Status(500),
            Script::BreakAfter(text_chunks(&["partial "])),
        ] {
            let chat = session(Arc::new(ScriptedTransport::new(script)));
            let outcome = chat.submit("hi").await.unwrap();
            assert!(matches!(outcome, TurnOutcome::Failed { .. }));

            let state = chat.snapshot();
            assert_eq!(state.phase, TurnPhase::Idle);
            assert_eq!(assistant_entries_after(&state, 1), vec![FALLBACK_REPLY.to_string()]);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_turn_reopens_the_gate() {
        let transport = Arc::new(ScriptedTransport::new(Script::HangOnce(text_chunks(&["back"]))));
        let chat = session(transport.clone());

        let timed_out = tokio::time::timeout(Duration::from_secs(1), chat.submit("hi")).await;
        assert!(timed_out.is_err());

        let state = chat.snapshot();
        assert_eq!(state.phase, TurnPhase::Idle);
        assert_eq!(assistant_entries_after(&state, 1), vec![FALLBACK_REPLY.to_string()]);

        let outcome = chat.submit("again").await.unwrap();
        assert!(matches!(outcome, TurnOutcome::Completed { .. }));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
        assert_eq!(chat.snapshot().conversation.last().unwrap().text, "back");
    }

    #[tokio::test(start_paused = true)]
    async fn aborted_task_reopens_the_gate() {
        let transport = Arc::new(ScriptedTransport::new(Script::HangOnce(vec![])));
        let chat = session(transport.clone());

        let runner = tokio::spawn({
            let chat = chat.clone();
            async move { chat.submit("hi").await }
        });
        while transport.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        assert!(chat.snapshot().awaiting_response());

        runner.abort();
        assert!(runner.await.unwrap_err().is_cancelled());
        assert_eq!(chat.phase(), TurnPhase::Idle);
        assert!(chat.submit("again").await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn incremental_failure_overwrites_the_started_reply() {
        let chat = session(Arc::new(ScriptedTransport::new(Script::BreakAfter(text_chunks(&["I'm ", "a "])))))
            .with_render_mode(RenderMode::Incremental);

        let outcome = chat.submit("hi").await.unwrap();
        assert!(matches!(outcome, TurnOutcome::Failed { .. }));
        let state = chat.snapshot();
        assert_eq!(assistant_entries_after(&state, 1), vec![FALLBACK_REPLY.to_string()]);
    }

    #[tokio::test]
    async fn incremental_mode_shows_text_as_it_arrives() {
        let chat = session(
            Arc::new(ScriptedTransport::new(Script::Chunks(vec![b"caf\xC3".to_vec(), b"\xA9 ".to_vec(), b"ok".to_vec()])))
        ).with_render_mode(RenderMode::Incremental);

        chat.submit("hi").await.unwrap();
        let state = chat.snapshot();
        assert_eq!(assistant_entries_after(&state, 1), vec!["café ok".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_reply_still_closes_the_turn() {
        let chat = session(Arc::new(ScriptedTransport::new(Script::Chunks(vec![]))))
            .with_pacing(PacingProfile::instant());

        let outcome = chat.submit("hi").await.unwrap();
        assert!(matches!(outcome, TurnOutcome::Completed { .. }));
        let state = chat.snapshot();
        assert_eq!(state.phase, TurnPhase::Idle);
        assert_eq!(assistant_entries_after(&state, 1), vec![String::new()]);
    }
}
