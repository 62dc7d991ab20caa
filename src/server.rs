//! The relay HTTP server: one accept loop, one task per connection.

use std::sync::Arc;

use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::http::{
    json_response, preflight_response, read_request, write_chunk, HttpRequest, CHUNKED_TERMINATOR,
    SSE_HEADERS,
};
use crate::providers::{ChatRequest, ModelSelector, RelayRequest};
use crate::relay::{pump, RelayOutcome};
use crate::upstream::UpstreamClient;

pub const CHAT_PATH: &str = "/api/chat";

/// Relay events buffered between the upstream pump and the socket writer.
const EVENT_BUFFER: usize = 64;

/// Shared, read-only state handed to every connection.
pub struct RelayState {
    pub config: Arc<RelayConfig>,
    pub upstream: UpstreamClient,
}

impl RelayState {
    pub fn new(config: Arc<RelayConfig>) -> Result<Self, RelayError> {
        let upstream = UpstreamClient::new(Arc::clone(&config))?;
        Ok(Self { config, upstream })
    }
}

/// Check a decoded request body in the relay's fixed order: required fields,
/// then upstream configuration, then the model name.
pub fn prepare(config: &RelayConfig, req: RelayRequest) -> Result<ChatRequest, RelayError> {
    let prompt = req.prompt.filter(|p| !p.is_empty());
    let model = req.model.filter(|m| !m.is_empty());
    let (prompt, model) = match (prompt, model) {
        (Some(p), Some(m)) => (p, m),
        _ => return Err(RelayError::Validation("Missing prompt or model".to_string())),
    };

    config.upstream.credentials()?;

    let model = ModelSelector::from_wire(&model)
        .ok_or_else(|| RelayError::Validation("Invalid model".to_string()))?;

    Ok(ChatRequest { prompt, model })
}

/// Bind the configured address and serve until the listener fails.
pub async fn serve(config: RelayConfig) -> Result<(), RelayError> {
    let listener = TcpListener::bind(config.bind_addr()).await?;
    serve_listener(listener, Arc::new(config)).await
}

/// Serve on an already-bound listener.
pub async fn serve_listener(listener: TcpListener, config: Arc<RelayConfig>) -> Result<(), RelayError> {
    let state = Arc::new(RelayState::new(config)?);
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "relay listening");
    }

    loop {
        let (stream, peer) = listener.accept().await?;
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, state).await {
                warn!(%peer, error = %e, "connection error");
            }
        });
    }
}

async fn handle_connection(mut stream: TcpStream, state: Arc<RelayState>) -> Result<(), RelayError> {
    let request = match read_request(&mut stream).await {
        Ok(Some(r)) => r,
        Ok(None) => return Ok(()),
        Err(e) => {
            let body = e.to_json_body();
            stream.write_all(json_response(e.status_code(), &body).as_bytes()).await?;
            return Err(e);
        }
    };

    match (request.method.as_str(), request.path.as_str()) {
        ("POST", CHAT_PATH) => {
            let request_id = Uuid::new_v4();
            let span = tracing::info_span!("relay", %request_id);
            handle_chat(stream, state, request).instrument(span).await
        }
        ("OPTIONS", CHAT_PATH) => {
            stream.write_all(preflight_response().as_bytes()).await?;
            Ok(())
        }
        (_, CHAT_PATH) => {
            let body = json!({ "error": "Method not allowed" }).to_string();
            stream.write_all(json_response(405, &body).as_bytes()).await?;
            Ok(())
        }
        ("GET", "/health") => {
            let body = json!({ "status": "ok" }).to_string();
            stream.write_all(json_response(200, &body).as_bytes()).await?;
            Ok(())
        }
        _ => {
            let body = json!({ "error": "Not found" }).to_string();
            stream.write_all(json_response(404, &body).as_bytes()).await?;
            Ok(())
        }
    }
}

async fn handle_chat(
    mut stream: TcpStream,
    state: Arc<RelayState>,
    request: HttpRequest,
) -> Result<(), RelayError> {
    let prepared = serde_json::from_slice::<RelayRequest>(&request.body)
        .map_err(|e| RelayError::MalformedRequest(e.to_string()))
        .and_then(|body| prepare(&state.config, body));
    let chat = match prepared {
        Ok(chat) => chat,
        Err(e) => {
            warn!(status = e.status_code(), error = %e, "rejecting relay request");
            let body = e.to_json_body();
            stream.write_all(json_response(e.status_code(), &body).as_bytes()).await?;
            return Ok(());
        }
    };

    let upstream_model = chat.model.upstream_model(&state.config.models);
    info!(model = %chat.model, upstream_model, "dispatching to upstream");

    let response = match state.upstream.open_stream(&chat.prompt, upstream_model).await {
        Ok(r) => r,
        Err(e) => {
            warn!(status = e.status_code(), error = %e, "upstream request failed");
            let body = e.to_json_body();
            stream.write_all(json_response(e.status_code(), &body).as_bytes()).await?;
            return Ok(());
        }
    };

    // Headers are committed from here on; failures can only abort the body.
    stream.write_all(SSE_HEADERS.as_bytes()).await?;

    let (tx, mut rx) = mpsc::channel::<String>(EVENT_BUFFER);
    let pump_task = tokio::spawn(pump(response.bytes_stream(), tx).in_current_span());

    let mut client_gone = false;
    while let Some(event) = rx.recv().await {
        if write_chunk(&mut stream, event.as_bytes()).await.is_err() {
            client_gone = true;
            break;
        }
    }
    drop(rx);

    match pump_task.await {
        Ok(Ok(outcome)) => {
            if !client_gone && outcome != RelayOutcome::ClientGone {
                stream.write_all(CHUNKED_TERMINATOR).await?;
                stream.flush().await?;
            }
            info!(?outcome, "relay stream finished");
            Ok(())
        }
        Ok(Err(e)) => {
            // No terminating chunk: the client sees an incomplete body.
            error!(error = %e, "upstream stream failed mid-relay");
            let _ = stream.shutdown().await;
            Err(e)
        }
        Err(join) => {
            error!(error = %join, "relay pump task failed");
            let _ = stream.shutdown().await;
            Err(RelayError::Transport(join.to_string()))
        }
    }
}
