//! Individual WebSocket connection handle.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::CancellationToken;

use tableside_core::types::{BranchId, ConnectionId, Role, SectorId, SessionId, TableId, TenantId, UserId};

use crate::message::close_code::CloseCode;

/// A serialized text frame queued for the socket writer.
pub type OutboundFrame = Arc<str>;

/// Why a delivery to a single connection failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The connection has been closed or its writer is gone.
    #[error("connection closed")]
    Closed,
    /// The outbound buffer stayed full for the whole send timeout.
    #[error("send timed out")]
    Timeout,
}

/// One-shot close request shared between a connection and its socket writer.
///
/// The first close wins; later calls keep the original code and reason.
#[derive(Debug, Default)]
pub struct CloseSignal {
    token: CancellationToken,
    frame: OnceLock<(CloseCode, String)>,
}

impl CloseSignal {
    /// Create an untriggered signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request the socket be closed with `code`.
    pub fn close(&self, code: CloseCode, reason: impl Into<String>) {
        let _ = self.frame.set((code, reason.into()));
        self.token.cancel();
    }

    /// Whether a close has been requested.
    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once a close has been requested.
    pub async fn closed(&self) {
        self.token.cancelled().await;
    }

    /// The close frame to send. Defaults to a normal closure.
    pub fn frame(&self) -> (CloseCode, String) {
        self.frame
            .get()
            .cloned()
            .unwrap_or((CloseCode::Normal, CloseCode::Normal.reason().to_string()))
    }
}

/// The writer-side half of a connection: queued frames plus the close request.
#[derive(Debug)]
pub struct Outbound {
    /// Frames to write to the socket, in order.
    pub frames: mpsc::Receiver<OutboundFrame>,
    /// Fires when the socket should be closed.
    pub close: Arc<CloseSignal>,
}

/// The session-side half: where frames and close requests are sent.
#[derive(Debug, Clone)]
pub struct OutboundLink {
    sender: mpsc::Sender<OutboundFrame>,
    close: Arc<CloseSignal>,
}

impl OutboundLink {
    /// Create a linked pair with a bounded buffer of `capacity` frames.
    pub fn channel(capacity: usize) -> (Self, Outbound) {
        let (sender, frames) = mpsc::channel(capacity.max(1));
        let close = Arc::new(CloseSignal::new());
        (
            Self {
                sender,
                close: Arc::clone(&close),
            },
            Outbound { frames, close },
        )
    }

    /// The shared close signal.
    pub fn close_signal(&self) -> &Arc<CloseSignal> {
        &self.close
    }

    /// Queue a frame without waiting.
    pub fn try_send(&self, frame: OutboundFrame) -> Result<(), DeliveryError> {
        self.sender.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Timeout,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Request the socket be closed.
    pub fn close(&self, code: CloseCode, reason: impl Into<String>) {
        self.close.close(code, reason);
    }
}

/// Who is on the other end of a connection. Fixed for its lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionIdentity {
    /// Authenticated staff user (absent for diners).
    pub user_id: Option<UserId>,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Role from the credential.
    pub role: Role,
    /// Table session (diners only).
    pub session_id: Option<SessionId>,
    /// Table (diners only).
    pub table_id: Option<TableId>,
    /// Branch the diner's table belongs to. Metadata only, not indexed.
    pub home_branch: Option<BranchId>,
}

/// The scopes a connection is indexed under. Mutable through the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionScopes {
    /// Branches the connection receives branch-wide events for.
    pub branch_ids: BTreeSet<BranchId>,
    /// Sectors the connection is assigned to.
    pub sector_ids: BTreeSet<SectorId>,
}

impl ConnectionScopes {
    /// Build scopes from any branch and sector iterators.
    pub fn new(
        branch_ids: impl IntoIterator<Item = BranchId>,
        sector_ids: impl IntoIterator<Item = SectorId>,
    ) -> Self {
        Self {
            branch_ids: branch_ids.into_iter().collect(),
            sector_ids: sector_ids.into_iter().collect(),
        }
    }
}

/// A handle to a single live WebSocket connection.
///
/// Holds the sender channel for pushing frames to the client plus the
/// identity and scopes the registry indexes it under.
#[derive(Debug)]
pub struct ConnectionHandle {
    /// Unique connection ID
    pub id: ConnectionId,
    /// Identity established at authentication
    pub identity: ConnectionIdentity,
    /// When the connection was established
    pub connected_at: DateTime<Utc>,
    /// Current scopes. Only the registry writes these, under scope locks.
    scopes: RwLock<ConnectionScopes>,
    /// Outbound link to the socket writer
    link: OutboundLink,
    /// Whether the connection is still alive
    alive: AtomicBool,
}

impl ConnectionHandle {
    /// Create a new connection handle with a fresh id.
    pub fn new(identity: ConnectionIdentity, scopes: ConnectionScopes, link: OutboundLink) -> Self {
        Self::with_id(ConnectionId::new(), identity, scopes, link)
    }

    /// Create a handle with a caller-chosen id.
    pub fn with_id(
        id: ConnectionId,
        identity: ConnectionIdentity,
        scopes: ConnectionScopes,
        link: OutboundLink,
    ) -> Self {
        Self {
            id,
            identity,
            connected_at: Utc::now(),
            scopes: RwLock::new(scopes),
            link,
            alive: AtomicBool::new(true),
        }
    }

    /// Tenant this connection belongs to.
    pub fn tenant_id(&self) -> TenantId {
        self.identity.tenant_id
    }

    /// Role of the connected principal.
    pub fn role(&self) -> Role {
        self.identity.role
    }

    /// Snapshot of the current scopes.
    pub async fn scopes(&self) -> ConnectionScopes {
        self.scopes.read().await.clone()
    }

    pub(crate) async fn replace_scopes(&self, scopes: ConnectionScopes) {
        *self.scopes.write().await = scopes;
    }

    /// Queue a frame, waiting up to `timeout` for buffer space.
    pub async fn send(&self, frame: OutboundFrame, timeout: Duration) -> Result<(), DeliveryError> {
        if !self.is_alive() {
            return Err(DeliveryError::Closed);
        }
        match self.link.sender.send_timeout(frame, timeout).await {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendTimeoutError::Timeout(_)) => Err(DeliveryError::Timeout),
            Err(mpsc::error::SendTimeoutError::Closed(_)) => {
                self.mark_dead();
                Err(DeliveryError::Closed)
            }
        }
    }

    /// Queue a frame without waiting; used for direct replies.
    pub fn try_send(&self, frame: OutboundFrame) -> Result<(), DeliveryError> {
        if !self.is_alive() {
            return Err(DeliveryError::Closed);
        }
        self.link.try_send(frame)
    }

    /// Ask the writer to close the socket. Marks the connection dead.
    pub fn close(&self, code: CloseCode, reason: impl Into<String>) {
        self.mark_dead();
        self.link.close(code, reason);
    }

    /// The shared close signal.
    pub fn close_signal(&self) -> &Arc<CloseSignal> {
        self.link.close_signal()
    }

    /// Check if connection is alive
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && !self.link.close.is_closed()
    }

    /// Mark connection as dead
    pub fn mark_dead(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// A waiter handle scoped to `branches`/`sectors`, plus its writer half.
    pub fn staff_handle(
        user_id: UserId,
        tenant_id: TenantId,
        role: Role,
        branches: &[BranchId],
        sectors: &[SectorId],
    ) -> (Arc<ConnectionHandle>, Outbound) {
        let (link, outbound) = OutboundLink::channel(16);
        let identity = ConnectionIdentity {
            user_id: Some(user_id),
            tenant_id,
            role,
            session_id: None,
            table_id: None,
            home_branch: None,
        };
        let scopes = ConnectionScopes::new(branches.iter().copied(), sectors.iter().copied());
        (Arc::new(ConnectionHandle::new(identity, scopes, link)), outbound)
    }

    /// A diner handle bound to `session_id`, plus its writer half.
    pub fn diner_handle(
        tenant_id: TenantId,
        branch_id: BranchId,
        session_id: SessionId,
    ) -> (Arc<ConnectionHandle>, Outbound) {
        let (link, outbound) = OutboundLink::channel(16);
        let identity = ConnectionIdentity {
            user_id: None,
            tenant_id,
            role: Role::Diner,
            session_id: Some(session_id),
            table_id: Some(1),
            home_branch: Some(branch_id),
        };
        (
            Arc::new(ConnectionHandle::new(identity, ConnectionScopes::default(), link)),
            outbound,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::staff_handle;
    use super::*;

    #[tokio::test]
    async fn test_send_reaches_writer() {
        let (handle, mut outbound) = staff_handle(1, 1, Role::Waiter, &[10], &[]);
        handle
            .send(Arc::from("hello"), Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(outbound.frames.recv().await.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_send_after_writer_dropped_marks_dead() {
        let (handle, outbound) = staff_handle(1, 1, Role::Waiter, &[10], &[]);
        drop(outbound);
        let err = handle
            .send(Arc::from("x"), Duration::from_millis(10))
            .await
            .unwrap_err();
        assert_eq!(err, DeliveryError::Closed);
        assert!(!handle.is_alive());
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_buffer_times_out() {
        let (link, _outbound) = OutboundLink::channel(1);
        let identity = ConnectionIdentity {
            user_id: Some(1),
            tenant_id: 1,
            role: Role::Kitchen,
            session_id: None,
            table_id: None,
            home_branch: None,
        };
        let handle = ConnectionHandle::new(identity, ConnectionScopes::default(), link);
        handle.try_send(Arc::from("one")).unwrap();
        let err = handle
            .send(Arc::from("two"), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(err, DeliveryError::Timeout);
        assert!(handle.is_alive());
    }

    #[test]
    fn test_first_close_wins() {
        let (handle, outbound) = staff_handle(1, 1, Role::Admin, &[], &[]);
        handle.close(CloseCode::RateLimited, "slow down");
        handle.close(CloseCode::Normal, "bye");
        assert!(!handle.is_alive());
        assert!(outbound.close.is_closed());
        assert_eq!(
            outbound.close.frame(),
            (CloseCode::RateLimited, "slow down".to_string())
        );
    }
}
