//! WebSocket upgrade handlers and the axum socket bridge.
//!
//! Each endpoint upgrades the request, then hands the socket to an
//! [`EndpointSession`]: the read half feeds the session through
//! [`AxumFrameSource`], the write half drains the connection's outbound
//! queue until the session asks for the socket to be closed.

use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::http::header::ORIGIN;
use axum::response::Response;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, warn};

use tableside_core::error::{AppError, ErrorKind};
use tableside_core::result::AppResult;
use tableside_realtime::connection::handle::Outbound;
use tableside_realtime::message::CloseCode;
use tableside_realtime::metrics::RejectReason;
use tableside_realtime::metrics::connections::record_reject;
use tableside_realtime::session::{ClientFrame, EndpointKind, FrameSource};

use crate::error::ApiError;
use crate::state::AppState;

/// How long the writer gets to flush and send the close frame.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Credentials accepted on the upgrade URL.
#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    /// Staff JWT (`/ws/waiter`, `/ws/kitchen`, `/ws/admin`).
    pub token: Option<String>,
    /// Diner table token (`/ws/diner`).
    pub table_token: Option<String>,
}

impl WsQuery {
    fn credential_for(self, kind: EndpointKind) -> Option<String> {
        match kind {
            EndpointKind::Diner => self.table_token,
            EndpointKind::Waiter | EndpointKind::Kitchen | EndpointKind::Admin => self.token,
        }
    }
}

/// GET /ws/waiter?token={jwt}
pub async fn waiter_ws(
    state: State<AppState>,
    ws: WebSocketUpgrade,
    query: Query<WsQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    upgrade(EndpointKind::Waiter, state, ws, query, headers)
}

/// GET /ws/kitchen?token={jwt}
pub async fn kitchen_ws(
    state: State<AppState>,
    ws: WebSocketUpgrade,
    query: Query<WsQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    upgrade(EndpointKind::Kitchen, state, ws, query, headers)
}

/// GET /ws/admin?token={jwt}
pub async fn admin_ws(
    state: State<AppState>,
    ws: WebSocketUpgrade,
    query: Query<WsQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    upgrade(EndpointKind::Admin, state, ws, query, headers)
}

/// GET /ws/diner?table_token={token}
pub async fn diner_ws(
    state: State<AppState>,
    ws: WebSocketUpgrade,
    query: Query<WsQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    upgrade(EndpointKind::Diner, state, ws, query, headers)
}

fn upgrade(
    kind: EndpointKind,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    if !state.engine.is_accepting() {
        record_reject(state.engine.metrics(), RejectReason::Unavailable);
        return Err(AppError::service_unavailable("Gateway is shutting down").into());
    }

    let origin = headers.get(ORIGIN).and_then(|value| value.to_str().ok());
    let origin_allowed = state.config.server.origin_allowed(origin);
    if !origin_allowed {
        debug!(endpoint = %kind, origin = origin.unwrap_or_default(), "Origin not allowed");
    }

    let credentials = query.credential_for(kind);
    // Frames past the protocol cap fail the read and surface as
    // `ClientFrame::TooLarge`; anything between the two limits reaches the
    // session as text. Both close with 1008.
    let protocol_cap = state.config.realtime.max_message_bytes.saturating_mul(4);

    Ok(ws
        .max_message_size(protocol_cap)
        .on_upgrade(move |socket| {
            let tracker = state.sockets.clone();
            tracker.track_future(serve_socket(state, kind, origin_allowed, credentials, socket))
        }))
}

async fn serve_socket(
    state: AppState,
    kind: EndpointKind,
    origin_allowed: bool,
    credentials: Option<String>,
    socket: WebSocket,
) {
    let (session, outbound) = state.engine.open_session(kind);
    let (sink, stream) = socket.split();
    let writer = tokio::spawn(write_outbound(sink, outbound));

    let outcome = if origin_allowed {
        session.run(AxumFrameSource { stream }, credentials).await
    } else {
        session.reject(CloseCode::Forbidden, "origin not allowed")
    };

    if tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, writer).await.is_err() {
        warn!(
            endpoint = %kind,
            close_code = outcome.close_code.code(),
            "Socket writer did not finish closing"
        );
    }
}

/// Write queued frames until the close signal fires, then flush what is
/// already queued and send the close frame.
async fn write_outbound(mut sink: SplitSink<WebSocket, Message>, outbound: Outbound) {
    let Outbound { mut frames, close } = outbound;

    loop {
        tokio::select! {
            biased;
            () = close.closed() => break,
            frame = frames.recv() => match frame {
                Some(frame) => {
                    if sink.send(Message::Text(Utf8Bytes::from(&*frame))).await.is_err() {
                        return;
                    }
                }
                None => break,
            },
        }
    }

    while let Ok(frame) = frames.try_recv() {
        if sink.send(Message::Text(Utf8Bytes::from(&*frame))).await.is_err() {
            return;
        }
    }

    let (code, reason) = close.frame();
    let frame = CloseFrame {
        code: code.code(),
        reason: Utf8Bytes::from(reason),
    };
    if sink.send(Message::Close(Some(frame))).await.is_ok() {
        let _ = sink.close().await;
    }
}

/// Read half of an axum socket as a session [`FrameSource`].
///
/// Protocol-level ping and pong frames are answered by axum and skipped. A
/// read that fails on the protocol size cap is reported as
/// [`ClientFrame::TooLarge`] so the session can close with 1008.
pub struct AxumFrameSource {
    stream: SplitStream<WebSocket>,
}

#[async_trait]
impl FrameSource for AxumFrameSource {
    async fn next_frame(&mut self) -> Option<AppResult<ClientFrame>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) if is_capacity_error(&e) => return Some(Ok(ClientFrame::TooLarge)),
                Err(e) => {
                    return Some(Err(AppError::with_source(
                        ErrorKind::Internal,
                        "WebSocket read failed",
                        e,
                    )));
                }
            };
            let frame = match message {
                Message::Text(text) => ClientFrame::Text(text.as_str().to_owned()),
                Message::Binary(bytes) => ClientFrame::Binary(bytes.len()),
                Message::Close(_) => ClientFrame::Close,
                Message::Ping(_) | Message::Pong(_) => continue,
            };
            return Some(Ok(frame));
        }
    }
}

/// Whether a read failed because the frame exceeded the configured cap.
///
/// axum hides the tungstenite error behind a boxed source, and the
/// tungstenite version it links may differ from ours, so the check goes by
/// the capacity error's message rather than a downcast.
fn is_capacity_error(err: &axum::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = source {
        let message = e.to_string();
        if message.starts_with("Space limit exceeded") || message.contains("Message too long") {
            return true;
        }
        source = e.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("Space limit exceeded: Message too long: 300000 > 262144")]
    struct Capacity;

    #[derive(Debug, thiserror::Error)]
    #[error("Connection reset without closing handshake")]
    struct Reset;

    #[test]
    fn test_capacity_error_detected() {
        assert!(is_capacity_error(&axum::Error::new(Capacity)));
        assert!(!is_capacity_error(&axum::Error::new(Reset)));
    }
}
