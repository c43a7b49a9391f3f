//! The lifecycle of one endpoint connection.
//!
//! A session moves through `Authenticating → Registered → Receiving →
//! Closing → Closed`. A connection that fails authentication, role gating
//! or scope resolution is closed without ever being registered. Once
//! registered, the connection is always unregistered before its socket is
//! closed, whatever ends the session: client close, rate or size
//! violation, failed revalidation, eviction, shutdown or a panic.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::time::{Instant, interval_at};
use tracing::{debug, error, info, warn};

use tableside_auth::{AuthFailure, AuthStrategy, Principal};
use tableside_core::error::{AppError, ErrorKind};
use tableside_core::result::AppResult;
use tableside_core::types::{ConnectionId, Role, SectorId};

use super::endpoint::EndpointKind;
use super::guard::RegistrationGuard;
use crate::connection::handle::{ConnectionHandle, ConnectionIdentity, ConnectionScopes, OutboundLink};
use crate::message::close_code::CloseCode;
use crate::message::types::{ClientMessage, ServerMessage};
use crate::message::validator::validate_frame_size;
use crate::metrics::RejectReason;
use crate::metrics::connections::{record_connect, record_reject};
use crate::server::RealtimeEngine;

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Verifying the credential and resolving scopes.
    Authenticating,
    /// Entered into the registry.
    Registered,
    /// Processing client frames.
    Receiving,
    /// Tearing down.
    Closing,
    /// Done.
    Closed,
}

/// A frame read from the client, reduced to what the session acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    /// A text frame.
    Text(String),
    /// A binary frame of the given length. Binary payloads are not used.
    Binary(usize),
    /// A frame the transport refused to buffer because it exceeded the
    /// transport's own size cap.
    TooLarge,
    /// The client sent a close frame.
    Close,
}

/// Source of client frames, implemented by the WebSocket transport.
///
/// Transport-level ping/pong frames are answered by the transport and never
/// surface here.
#[async_trait]
pub trait FrameSource: Send {
    /// Next frame; `None` once the socket is gone.
    async fn next_frame(&mut self) -> Option<AppResult<ClientFrame>>;
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    /// Connection id, if the session got as far as registering.
    pub connection_id: Option<ConnectionId>,
    /// Close code sent to the client.
    pub close_code: CloseCode,
    /// Close reason sent to the client.
    pub reason: String,
}

/// Drives one connection from handshake to close.
pub struct EndpointSession {
    engine: Arc<RealtimeEngine>,
    kind: EndpointKind,
    link: OutboundLink,
    state: SessionState,
}

impl std::fmt::Debug for EndpointSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointSession")
            .field("kind", &self.kind)
            .field("state", &self.state)
            .finish()
    }
}

impl EndpointSession {
    pub(crate) fn new(engine: Arc<RealtimeEngine>, kind: EndpointKind, link: OutboundLink) -> Self {
        Self {
            engine,
            kind,
            link,
            state: SessionState::Authenticating,
        }
    }

    /// Endpoint this session serves.
    pub fn kind(&self) -> EndpointKind {
        self.kind
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        debug!(endpoint = %self.kind, from = ?self.state, to = ?next, "Session state change");
        self.state = next;
    }

    /// Close before authentication, e.g. for a rejected origin.
    pub fn reject(mut self, code: CloseCode, reason: &str) -> SessionOutcome {
        let metric = match code {
            CloseCode::Forbidden => RejectReason::Forbidden,
            CloseCode::GoingAway => RejectReason::Unavailable,
            _ => RejectReason::Auth,
        };
        self.refuse(code, reason, metric)
    }

    fn refuse(&mut self, code: CloseCode, reason: &str, metric: RejectReason) -> SessionOutcome {
        record_reject(self.engine.metrics(), metric);
        info!(endpoint = %self.kind, code = code.code(), reason, "Connection refused");
        self.link.close(code, reason);
        self.transition(SessionState::Closed);
        SessionOutcome {
            connection_id: None,
            close_code: code,
            reason: reason.to_string(),
        }
    }

    /// Run the session to completion.
    ///
    /// `credentials` is the raw token from the endpoint's query parameter.
    pub async fn run<S: FrameSource>(mut self, mut source: S, credentials: Option<String>) -> SessionOutcome {
        let credentials = credentials.unwrap_or_default();
        let strategy = self.engine.strategy_for(self.kind);

        let principal = match strategy.authenticate(&credentials).await {
            Ok(principal) => principal,
            Err(failure) => {
                let (code, metric) = failure_close(&failure);
                return self.refuse(code, failure.reason(), metric);
            }
        };

        if !self.kind.allows(principal.role) {
            return self.refuse(
                CloseCode::Forbidden,
                "role not allowed on this endpoint",
                RejectReason::Forbidden,
            );
        }

        let scopes = match self.initial_scopes(&principal).await {
            Ok(scopes) => scopes,
            Err(e) => {
                warn!(endpoint = %self.kind, error = %e, "Sector lookup failed");
                return self.refuse(CloseCode::InternalError, "sector lookup failed", RejectReason::Lookup);
            }
        };

        let handle = Arc::new(ConnectionHandle::new(
            identity_of(&principal),
            scopes,
            self.link.clone(),
        ));

        if let Err(e) = self.engine.registry().register(Arc::clone(&handle)).await {
            let (code, reason, metric) = match e.kind {
                ErrorKind::ResourceExhausted => {
                    (CloseCode::PolicyViolation, "too many connections", RejectReason::Capacity)
                }
                ErrorKind::ServiceUnavailable => {
                    (CloseCode::GoingAway, "server shutting down", RejectReason::Unavailable)
                }
                _ => (CloseCode::InternalError, "registration failed", RejectReason::Lookup),
            };
            warn!(endpoint = %self.kind, error = %e, "Registration failed");
            return self.refuse(code, reason, metric);
        }
        self.transition(SessionState::Registered);

        let id = handle.id;
        let guard = RegistrationGuard::new(Arc::clone(&self.engine), id);
        self.engine.heartbeat().record(id);
        record_connect(self.engine.metrics());

        reply(
            &handle,
            &ServerMessage::Connected {
                connection_id: id,
                role: principal.role,
                heartbeat_interval: self.engine.config().heartbeat_interval_seconds,
            },
        );

        self.transition(SessionState::Receiving);
        let exit = AssertUnwindSafe(self.receive(&handle, &mut source, strategy.as_ref(), &credentials))
            .catch_unwind()
            .await;
        let (code, reason) = match exit {
            Ok(exit) => exit,
            Err(_) => {
                error!(conn_id = %id, "Session panicked");
                (CloseCode::InternalError, CloseCode::InternalError.reason().to_string())
            }
        };

        self.transition(SessionState::Closing);
        self.engine.release_connection(&id).await;
        guard.disarm();
        handle.close(code, reason);
        let (close_code, reason) = handle.close_signal().frame();
        self.transition(SessionState::Closed);

        info!(conn_id = %id, code = close_code.code(), reason = %reason, "Connection closed");
        SessionOutcome {
            connection_id: Some(id),
            close_code,
            reason,
        }
    }

    async fn initial_scopes(&self, principal: &Principal) -> AppResult<ConnectionScopes> {
        match principal.role {
            Role::Diner => Ok(ConnectionScopes::default()),
            role if role.uses_sectors() => {
                let sectors = self.lookup_sectors(principal).await?;
                Ok(ConnectionScopes::new(principal.branch_ids.iter().copied(), sectors))
            }
            _ => Ok(ConnectionScopes::new(principal.branch_ids.iter().copied(), [])),
        }
    }

    async fn lookup_sectors(&self, principal: &Principal) -> AppResult<Vec<SectorId>> {
        let user_id = principal
            .user_id
            .ok_or_else(|| AppError::validation("Sector lookup needs a user id"))?;
        let lookup = self.engine.sector_lookup();
        tokio::time::timeout(
            self.engine.config().sector_lookup_timeout(),
            lookup.get_sectors(user_id, principal.tenant_id),
        )
        .await?
    }

    async fn receive<S: FrameSource>(
        &self,
        handle: &Arc<ConnectionHandle>,
        source: &mut S,
        strategy: &dyn AuthStrategy,
        credentials: &str,
    ) -> (CloseCode, String) {
        let config = self.engine.config();
        let period = config.revalidate_interval();
        let mut revalidate = interval_at(Instant::now() + period, period);

        loop {
            let frame = tokio::select! {
                () = handle.close_signal().closed() => return handle.close_signal().frame(),
                _ = revalidate.tick() => {
                    if let Err(failure) = strategy.revalidate(credentials).await {
                        record_reject(self.engine.metrics(), RejectReason::Revoked);
                        info!(conn_id = %handle.id, reason = failure.reason(), "Credential no longer valid");
                        return (CloseCode::AuthFailed, failure.reason().to_string());
                    }
                    continue;
                }
                frame = source.next_frame() => frame,
            };

            let (len, text) = match frame {
                None => return (CloseCode::Normal, "connection lost".to_string()),
                Some(Err(e)) => {
                    debug!(conn_id = %handle.id, error = %e, "Transport error");
                    return (CloseCode::Normal, "connection lost".to_string());
                }
                Some(Ok(ClientFrame::Close)) => {
                    return (CloseCode::Normal, CloseCode::Normal.reason().to_string());
                }
                Some(Ok(ClientFrame::TooLarge)) => {
                    return self.too_large(handle);
                }
                Some(Ok(ClientFrame::Binary(len))) => (len, None),
                Some(Ok(ClientFrame::Text(text))) => (text.len(), Some(text)),
            };

            if validate_frame_size(len, config.max_message_bytes).is_err() {
                return self.too_large(handle);
            }
            if !self.engine.rate_limiter().is_allowed(handle.id) {
                record_reject(self.engine.metrics(), RejectReason::RateLimited);
                return (CloseCode::RateLimited, CloseCode::RateLimited.reason().to_string());
            }
            self.engine.metrics().inc_received();

            match text {
                Some(text) => self.handle_text(handle, &text).await,
                None => debug!(conn_id = %handle.id, "Ignoring binary frame"),
            }
        }
    }

    fn too_large(&self, handle: &ConnectionHandle) -> (CloseCode, String) {
        record_reject(self.engine.metrics(), RejectReason::TooLarge);
        debug!(conn_id = %handle.id, "Frame over size limit");
        (CloseCode::PolicyViolation, "message too large".to_string())
    }

    async fn handle_text(&self, handle: &Arc<ConnectionHandle>, text: &str) {
        match ClientMessage::parse(text) {
            Ok(ClientMessage::Ping) => {
                self.engine.heartbeat().record(handle.id);
                reply(handle, &ServerMessage::Pong);
            }
            Ok(ClientMessage::Pong) => self.engine.heartbeat().record(handle.id),
            Ok(ClientMessage::RefreshSectors) => self.refresh_sectors(handle).await,
            Err(e) => reply(handle, &ServerMessage::error("INVALID_MESSAGE", e.message)),
        }
    }

    async fn refresh_sectors(&self, handle: &Arc<ConnectionHandle>) {
        let Some(user_id) = handle.identity.user_id.filter(|_| handle.role().uses_sectors()) else {
            reply(
                handle,
                &ServerMessage::error("NOT_SUPPORTED", "Sector refresh is only available to waiters"),
            );
            return;
        };
        let tenant_id = handle.tenant_id();
        let lookup = self.engine.sector_lookup();
        lookup.invalidate(user_id, tenant_id).await;

        let fetched = tokio::time::timeout(
            self.engine.config().sector_lookup_timeout(),
            lookup.get_sectors(user_id, tenant_id),
        )
        .await
        .unwrap_or_else(|elapsed| Err(AppError::from(elapsed)));

        let result = match fetched {
            Ok(sectors) => {
                let branches = handle.scopes().await.branch_ids;
                self.engine
                    .registry()
                    .update_scopes(&handle.id, branches, sectors)
                    .await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(scopes) => reply(
                handle,
                &ServerMessage::SectorsUpdated {
                    sector_ids: scopes.sector_ids.into_iter().collect(),
                },
            ),
            Err(e) => {
                warn!(conn_id = %handle.id, error = %e, "Sector refresh failed");
                reply(
                    handle,
                    &ServerMessage::error("SECTOR_REFRESH_FAILED", "Could not refresh sector assignments"),
                );
            }
        }
    }
}

fn failure_close(failure: &AuthFailure) -> (CloseCode, RejectReason) {
    if failure.is_forbidden() {
        (CloseCode::Forbidden, RejectReason::Forbidden)
    } else {
        (CloseCode::AuthFailed, RejectReason::Auth)
    }
}

fn identity_of(principal: &Principal) -> ConnectionIdentity {
    ConnectionIdentity {
        user_id: principal.user_id,
        tenant_id: principal.tenant_id,
        role: principal.role,
        session_id: principal.session_id,
        table_id: principal.table_id,
        home_branch: if principal.role == Role::Diner {
            principal.branch_ids.first().copied()
        } else {
            None
        },
    }
}

fn reply(handle: &ConnectionHandle, message: &ServerMessage) {
    match message.to_json() {
        Ok(json) => {
            if let Err(e) = handle.try_send(Arc::from(json)) {
                debug!(conn_id = %handle.id, error = %e, "Reply dropped");
            }
        }
        Err(e) => error!(error = %e, "Failed to serialize reply"),
    }
}
