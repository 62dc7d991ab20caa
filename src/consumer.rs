//! Client side of the relay: opens a stream for one model column, decodes the
//! relay events and appends them to that column's text.
//!
//! Each [`ColumnSession`] owns its own [`StreamState`] (published through a
//! `watch` channel) and its own cancellation token; two sessions never share
//! mutable state.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::Stream;
use reqwest::Client;
use tokio::sync::{watch, Barrier};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ConsumerError;
use crate::providers::{DeltaEvent, ModelSelector, RelayRequest};
use crate::sse::{classify, parse_delta_payload, LineBuffer, SseLine};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Streaming,
    Completed,
    Cancelled,
    Failed,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Completed | Phase::Cancelled | Phase::Failed)
    }
}

/// What a column shows: the text so far, whether it is still streaming, and
/// the last failure message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamState {
    pub accumulated_text: String,
    pub is_active: bool,
    pub last_error: Option<String>,
    pub phase: Phase,
}

impl Default for StreamState {
    fn default() -> Self {
        Self {
            accumulated_text: String::new(),
            is_active: false,
            last_error: None,
            phase: Phase::Idle,
        }
    }
}

impl StreamState {
    fn streaming() -> Self {
        Self {
            is_active: true,
            phase: Phase::Streaming,
            ..Self::default()
        }
    }
}

/// Apply `f` unless `cancel` has fired. The check runs under the watch
/// channel's write lock, so nothing lands after a stop has been recorded.
fn apply<F>(state: &watch::Sender<StreamState>, cancel: &CancellationToken, f: F) -> bool
where
    F: FnOnce(&mut StreamState),
{
    state.send_if_modified(|s| {
        if cancel.is_cancelled() {
            return false;
        }
        f(s);
        true
    })
}

fn complete(state: &watch::Sender<StreamState>, cancel: &CancellationToken) -> Phase {
    let done = apply(state, cancel, |s| {
        s.is_active = false;
        s.phase = Phase::Completed;
    });
    if done {
        Phase::Completed
    } else {
        Phase::Cancelled
    }
}

/// Failure discards partial output; cancellation (see [`mark_stopped`]) keeps it.
fn fail(state: &watch::Sender<StreamState>, cancel: &CancellationToken, err: ConsumerError) -> Phase {
    warn!(error = %err, "stream failed");
    let message = err.to_string();
    let failed = apply(state, cancel, |s| {
        s.accumulated_text.clear();
        s.is_active = false;
        s.last_error = Some(message);
        s.phase = Phase::Failed;
    });
    if failed {
        Phase::Failed
    } else {
        Phase::Cancelled
    }
}

/// Expire the stream owned by `cancel`. A token that already fired belongs
/// to a stream that was stopped or replaced, so the state is left alone; the
/// check and the cancel happen under the write lock, ordered against
/// `launch`.
fn expire(state: &watch::Sender<StreamState>, cancel: &CancellationToken) -> bool {
    state.send_if_modified(|s| {
        if cancel.is_cancelled() {
            return false;
        }
        cancel.cancel();
        s.is_active = false;
        if s.phase == Phase::Streaming {
            s.phase = Phase::Cancelled;
        }
        true
    })
}

/// Record a stop requested by the owner of the token.
fn mark_stopped(state: &watch::Sender<StreamState>) {
    state.send_if_modified(|s| {
        if s.phase != Phase::Streaming && !s.is_active {
            return false;
        }
        s.is_active = false;
        if s.phase == Phase::Streaming {
            s.phase = Phase::Cancelled;
        }
        true
    });
}

/// Read a relay event stream to its end.
///
/// Every chunk is framed first and its deltas applied together, so a chunk
/// is either applied whole or, if cancellation wins, not at all. Closure of
/// the stream completes it; an unterminated trailing line is dropped.
pub async fn consume_body<S, B, E>(
    body: S,
    cancel: &CancellationToken,
    state: &watch::Sender<StreamState>,
) -> Phase
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut body = std::pin::pin!(body);
    let mut lines = LineBuffer::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Phase::Cancelled,
            next = body.next() => next,
        };
        let chunk = match next {
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => return fail(state, cancel, ConsumerError::Interrupted(e.to_string())),
            None => {
                if lines.pending_len() > 0 {
                    debug!(bytes = lines.pending_len(), "dropping unterminated trailing line");
                }
                return complete(state, cancel);
            }
        };

        let mut deltas = Vec::new();
        let mut done = false;
        for line in lines.push(chunk.as_ref()) {
            match classify(&line) {
                SseLine::Done => {
                    done = true;
                    break;
                }
                SseLine::Data(payload) => match parse_delta_payload(payload) {
                    Ok(DeltaEvent { content: Some(text) }) => deltas.push(text),
                    Ok(DeltaEvent { content: None }) => {}
                    Err(e) => debug!(error = %e, "skipping malformed relay event"),
                },
                SseLine::Ignored => {}
            }
        }

        if !deltas.is_empty() {
            let applied = apply(state, cancel, |s| {
                for text in &deltas {
                    s.accumulated_text.push_str(text);
                }
            });
            if !applied {
                return Phase::Cancelled;
            }
        }
        if done {
            return complete(state, cancel);
        }
    }
}

/// Extract `{"error": ...}` from a rejected relay response, falling back to
/// the status reason.
async fn rejection_message(response: reqwest::Response) -> String {
    let status = response.status();
    let fallback = status.canonical_reason().unwrap_or("request failed").to_string();
    match response.json::<serde_json::Value>().await {
        Ok(v) => v
            .get("error")
            .and_then(|e| e.as_str())
            .map(str::to_string)
            .unwrap_or(fallback),
        Err(_) => fallback,
    }
}

async fn run_stream(
    client: Client,
    endpoint: String,
    request: RelayRequest,
    cancel: CancellationToken,
    state: Arc<watch::Sender<StreamState>>,
    timeout: Option<Duration>,
    gate: Option<Arc<Barrier>>,
) -> Phase {
    if let Some(gate) = gate {
        gate.wait().await;
    }

    let work = async {
        let send = client.post(&endpoint).json(&request).send();
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Phase::Cancelled,
            r = send => r,
        };
        let response = match response {
            Ok(r) => r,
            Err(e) => return fail(&state, &cancel, ConsumerError::Network(e.to_string())),
        };
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Phase::Cancelled,
                m = rejection_message(response) => m,
            };
            return fail(&state, &cancel, ConsumerError::Rejected { status, message });
        }
        consume_body(response.bytes_stream(), &cancel, &state).await
    };

    match timeout {
        Some(limit) => match tokio::time::timeout(limit, work).await {
            Ok(phase) => phase,
            Err(_) => {
                if expire(&state, &cancel) {
                    info!(?limit, "stream timed out; cancelled");
                }
                Phase::Cancelled
            }
        },
        None => work.await,
    }
}

/// One comparison column: a relay endpoint, a model selector and the state
/// of the most recent submission.
pub struct ColumnSession {
    model: ModelSelector,
    client: Client,
    endpoint: String,
    timeout: Option<Duration>,
    state: Arc<watch::Sender<StreamState>>,
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<Phase>>,
}

impl ColumnSession {
    pub fn new(model: ModelSelector, client: Client, endpoint: impl Into<String>) -> Self {
        let (state, _) = watch::channel(StreamState::default());
        Self {
            model,
            client,
            endpoint: endpoint.into(),
            timeout: None,
            state: Arc::new(state),
            cancel: None,
            task: None,
        }
    }

    /// Cancel each stream after `limit` of total wall time.
    pub fn with_timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }

    pub fn model(&self) -> ModelSelector {
        self.model
    }

    pub fn subscribe(&self) -> watch::Receiver<StreamState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> StreamState {
        self.state.borrow().clone()
    }

    pub fn is_active(&self) -> bool {
        self.state.borrow().is_active
    }

    /// Start a new stream, replacing any stream still in flight.
    pub fn start(&mut self, prompt: &str) {
        self.launch(prompt, None);
    }

    pub(crate) fn launch(&mut self, prompt: &str, gate: Option<Arc<Barrier>>) {
        if let Some(previous) = self.cancel.take() {
            previous.cancel();
        }
        let cancel = CancellationToken::new();
        self.cancel = Some(cancel.clone());
        self.state.send_replace(StreamState::streaming());

        debug!(model = %self.model, "starting stream");
        let request = RelayRequest::new(prompt, self.model);
        self.task = Some(tokio::spawn(run_stream(
            self.client.clone(),
            self.endpoint.clone(),
            request,
            cancel,
            Arc::clone(&self.state),
            self.timeout,
            gate,
        )));
    }

    /// Abort the stream in flight. Text received so far is kept.
    pub fn stop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        mark_stopped(&self.state);
    }

    /// Stop and return to an empty, idle column.
    pub fn reset(&mut self) {
        self.stop();
        self.state.send_replace(StreamState::default());
    }

    /// Wait for the current stream task to finish and return its final phase.
    pub async fn wait(&mut self) -> Phase {
        match self.task.take() {
            Some(task) => match task.await {
                Ok(phase) => phase,
                Err(e) => {
                    warn!(model = %self.model, error = %e, "stream task ended abnormally");
                    Phase::Failed
                }
            },
            None => self.state.borrow().phase,
        }
    }
}

impl Drop for ColumnSession {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(text: &str) -> String {
        crate::sse::format_delta_event(text)
    }

    fn chunks(items: &[&str]) -> Vec<Result<Vec<u8>, std::io::Error>> {
        items.iter().map(|c| Ok(c.as_bytes().to_vec())).collect()
    }

    fn fresh() -> (CancellationToken, watch::Sender<StreamState>) {
        let (tx, _) = watch::channel(StreamState::streaming());
        (CancellationToken::new(), tx)
    }

    #[tokio::test]
    async fn test_hi_there_completes_on_done() {
        let (cancel, state) = fresh();
        let a = event("Hi");
        let b = event(" there");
        let body = tokio_stream::iter(chunks(&[a.as_str(), b.as_str(), "data: [DONE]\n\n"]));
        let phase = consume_body(body, &cancel, &state).await;
        assert_eq!(phase, Phase::Completed);
        let s = state.borrow().clone();
        assert_eq!(s.accumulated_text, "Hi there");
        assert!(!s.is_active);
        assert!(s.last_error.is_none());
    }

    #[tokio::test]
    async fn test_closure_completes() {
        let (cancel, state) = fresh();
        let a = event("only");
        let phase = consume_body(tokio_stream::iter(chunks(&[a.as_str()])), &cancel, &state).await;
        assert_eq!(phase, Phase::Completed);
        assert_eq!(state.borrow().accumulated_text, "only");
        assert_eq!(state.borrow().phase, Phase::Completed);
    }

    #[tokio::test]
    async fn test_last_chunk_processed_before_closure() {
        let (cancel, state) = fresh();
        let body = format!("{}{}", event("a"), event("b"));
        let phase = consume_body(tokio_stream::iter(chunks(&[body.as_str()])), &cancel, &state).await;
        assert_eq!(phase, Phase::Completed);
        assert_eq!(state.borrow().accumulated_text, "ab");
    }

    #[tokio::test]
    async fn test_unterminated_tail_dropped_at_closure() {
        let (cancel, state) = fresh();
        let a = event("kept");
        let body = chunks(&[a.as_str(), "data: {\"content\":\"lost\"}"]);
        consume_body(tokio_stream::iter(body), &cancel, &state).await;
        assert_eq!(state.borrow().accumulated_text, "kept");
    }

    #[tokio::test]
    async fn test_event_split_across_chunks() {
        let (cancel, state) = fresh();
        let e = event("joined");
        let (x, y) = e.split_at(9);
        consume_body(tokio_stream::iter(chunks(&[x, y])), &cancel, &state).await;
        assert_eq!(state.borrow().accumulated_text, "joined");
    }

    #[tokio::test]
    async fn test_done_ignores_following_bytes() {
        let (cancel, state) = fresh();
        let body = format!("{}data: [DONE]\n\n{}", event("a"), event("b"));
        let phase = consume_body(tokio_stream::iter(chunks(&[body.as_str()])), &cancel, &state).await;
        assert_eq!(phase, Phase::Completed);
        assert_eq!(state.borrow().accumulated_text, "a");
    }

    #[tokio::test]
    async fn test_malformed_event_skipped() {
        let (cancel, state) = fresh();
        let a = event("x");
        let body = chunks(&["data: {nope\n\n", a.as_str()]);
        let phase = consume_body(tokio_stream::iter(body), &cancel, &state).await;
        assert_eq!(phase, Phase::Completed);
        assert_eq!(state.borrow().accumulated_text, "x");
    }

    #[tokio::test]
    async fn test_read_error_clears_text() {
        let (cancel, state) = fresh();
        let mut body = chunks(&[event("partial").as_str()]);
        body.push(Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer")));
        let phase = consume_body(tokio_stream::iter(body), &cancel, &state).await;
        assert_eq!(phase, Phase::Failed);
        let s = state.borrow().clone();
        assert_eq!(s.accumulated_text, "");
        assert!(!s.is_active);
        assert_eq!(s.last_error.as_deref(), Some("stream interrupted: reset by peer"));
        assert_eq!(s.phase, Phase::Failed);
    }

    #[tokio::test]
    async fn test_cancel_keeps_applied_text_and_blocks_more() {
        let (cancel, state) = fresh();
        let (tx, rx) = tokio::sync::mpsc::channel::<Result<Vec<u8>, std::io::Error>>(8);
        let body = tokio_stream::wrappers::ReceiverStream::new(rx);

        let task_cancel = cancel.clone();
        let task_state = Arc::new(state);
        let observed = Arc::clone(&task_state);
        let mut watcher = observed.subscribe();
        let task = tokio::spawn(async move { consume_body(body, &task_cancel, &task_state).await });

        tx.send(Ok(event("one").into_bytes())).await.unwrap();
        tx.send(Ok(event(" two").into_bytes())).await.unwrap();
        watcher
            .wait_for(|s| s.accumulated_text == "one two")
            .await
            .unwrap();

        cancel.cancel();
        mark_stopped(&observed);
        // bytes still arriving after the stop must not be applied
        let _ = tx.send(Ok(event(" three").into_bytes())).await;

        assert_eq!(task.await.unwrap(), Phase::Cancelled);
        let s = observed.borrow().clone();
        assert_eq!(s.accumulated_text, "one two");
        assert!(!s.is_active);
        assert!(s.last_error.is_none());
        assert_eq!(s.phase, Phase::Cancelled);
    }

    #[tokio::test]
    async fn test_events_in_one_chunk_append_in_order() {
        let (cancel, state) = fresh();
        let rx = state.subscribe();
        let chunk = format!("{}{}{}", event("x"), event("x"), event("y"));
        let body = tokio_stream::iter(chunks(&[chunk.as_str()]));
        consume_body(body, &cancel, &state).await;
        assert!(rx.has_changed().unwrap());
        // repeated text is two appends, not one
        assert_eq!(state.borrow().accumulated_text, "xxy");
    }

    #[tokio::test]
    async fn test_cancelled_before_first_chunk() {
        let (cancel, state) = fresh();
        cancel.cancel();
        let a = event("late");
        let phase = consume_body(tokio_stream::iter(chunks(&[a.as_str()])), &cancel, &state).await;
        assert_eq!(phase, Phase::Cancelled);
        assert_eq!(state.borrow().accumulated_text, "");
    }

    #[test]
    fn test_fail_after_cancel_is_noop() {
        let (cancel, state) = fresh();
        state.send_modify(|s| s.accumulated_text.push_str("kept"));
        cancel.cancel();
        let phase = fail(&state, &cancel, ConsumerError::Network("down".into()));
        assert_eq!(phase, Phase::Cancelled);
        assert_eq!(state.borrow().accumulated_text, "kept");
        assert!(state.borrow().last_error.is_none());
    }

    #[test]
    fn test_expire_cancels_own_stream_and_keeps_text() {
        let (cancel, state) = fresh();
        state.send_modify(|s| s.accumulated_text.push_str("part"));
        assert!(expire(&state, &cancel));
        assert!(cancel.is_cancelled());
        let s = state.borrow().clone();
        assert_eq!(s.accumulated_text, "part");
        assert!(!s.is_active);
        assert_eq!(s.phase, Phase::Cancelled);
    }

    #[test]
    fn test_expire_of_replaced_stream_leaves_new_state() {
        let (stale, state) = fresh();
        // restart: the old token fires, then the new stream takes the state
        stale.cancel();
        state.send_replace(StreamState::streaming());
        state.send_modify(|s| s.accumulated_text.push_str("a"));

        assert!(!expire(&state, &stale));
        let s = state.borrow().clone();
        assert_eq!(s.accumulated_text, "a");
        assert!(s.is_active);
        assert_eq!(s.phase, Phase::Streaming);
    }

    #[test]
    fn test_mark_stopped_on_idle_is_noop() {
        let (state, _) = watch::channel(StreamState::default());
        mark_stopped(&state);
        assert_eq!(*state.borrow(), StreamState::default());
    }

    #[test]
    fn test_phase_terminal() {
        assert!(!Phase::Idle.is_terminal());
        assert!(!Phase::Streaming.is_terminal());
        assert!(Phase::Completed.is_terminal());
        assert!(Phase::Cancelled.is_terminal());
        assert!(Phase::Failed.is_terminal());
    }

    #[tokio::test]
    async fn test_session_network_error_fails() {
        // port 9 (discard) on localhost is expected to refuse connections
        let mut session = ColumnSession::new(ModelSelector::Gpt, Client::new(), "http://127.0.0.1:9/api/chat");
        session.start("hello");
        assert!(session.is_active());
        let phase = session.wait().await;
        assert_eq!(phase, Phase::Failed);
        let s = session.snapshot();
        assert!(s.last_error.unwrap().starts_with("network error"));
        assert!(!s.is_active);
    }

    #[tokio::test]
    async fn test_session_reset_returns_to_idle() {
        let mut session = ColumnSession::new(ModelSelector::Gemini, Client::new(), "http://127.0.0.1:9/api/chat");
        session.start("hello");
        session.reset();
        assert_eq!(session.snapshot(), StreamState::default());
        assert_eq!(session.model(), ModelSelector::Gemini);
    }
}
