//! Re-encodes the upstream SSE byte stream into the relay's own event format.

use futures_util::stream::Stream;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tracing::debug;

use crate::error::RelayError;
use crate::sse::{classify, format_delta_event, parse_upstream_payload, LineBuffer, SseLine};

/// How a relay pump ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// The upstream sent `data: [DONE]`.
    Done,
    /// The upstream closed its stream without the sentinel.
    Closed,
    /// The downstream receiver went away first.
    ClientGone,
}

/// Incremental, push-driven re-encoder. Feed it upstream bytes in arrival
/// order; it returns the encoded relay events those bytes complete.
#[derive(Debug, Default)]
pub struct Reencoder {
    lines: LineBuffer,
    finished: bool,
    discarded: usize,
}

impl Reencoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns encoded `data: {"content":...}\n\n` events. Once the sentinel
    /// has been seen, the rest of that read and any later read is ignored.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        if self.finished {
            return Vec::new();
        }
        let mut events = Vec::new();
        for line in self.lines.push(bytes) {
            match classify(&line) {
                SseLine::Done => {
                    self.finished = true;
                    self.lines.clear();
                    break;
                }
                SseLine::Data(payload) => match parse_upstream_payload(payload) {
                    Ok(Some(text)) => events.push(format_delta_event(&text)),
                    Ok(None) => {}
                    Err(e) => {
                        self.discarded += 1;
                        debug!(error = %e, "discarding malformed upstream fragment");
                    }
                },
                SseLine::Ignored => {}
            }
        }
        events
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Number of `data: ` lines dropped as unparseable.
    pub fn discarded(&self) -> usize {
        self.discarded
    }
}

/// Drive `upstream` to completion, sending each encoded event to `tx`.
///
/// A read error is returned as [`RelayError::Transport`]; the caller is
/// expected to abort the downstream response. The upstream stream is
/// dropped on every return path, which releases its connection.
pub async fn pump<S, B, E>(upstream: S, tx: mpsc::Sender<String>) -> Result<RelayOutcome, RelayError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut upstream = std::pin::pin!(upstream);
    let mut encoder = Reencoder::new();

    let outcome = loop {
        let next = tokio::select! {
            next = upstream.next() => next,
            _ = tx.closed() => break Ok(RelayOutcome::ClientGone),
        };
        let chunk = match next {
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => break Err(RelayError::Transport(e.to_string())),
            None => break Ok(RelayOutcome::Closed),
        };

        let mut client_gone = false;
        for event in encoder.feed(chunk.as_ref()) {
            if tx.send(event).await.is_err() {
                client_gone = true;
                break;
            }
        }
        if client_gone {
            break Ok(RelayOutcome::ClientGone);
        }
        if encoder.is_finished() {
            break Ok(RelayOutcome::Done);
        }
    };

    if encoder.discarded() > 0 {
        debug!(discarded = encoder.discarded(), "upstream fragments dropped as malformed");
    }
    outcome
}
