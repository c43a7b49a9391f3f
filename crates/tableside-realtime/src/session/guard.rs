//! Scope guard that releases a registration if its session is dropped.

use std::sync::Arc;

use tracing::warn;

use tableside_core::types::ConnectionId;

use crate::server::RealtimeEngine;

/// Unregisters a connection on drop unless disarmed.
///
/// The session disarms it after an orderly teardown. If the session future
/// is dropped early (task aborted, runtime shutting down), the drop spawns
/// the release so the registry never keeps a dead connection.
pub(crate) struct RegistrationGuard {
    engine: Option<Arc<RealtimeEngine>>,
    id: ConnectionId,
}

impl RegistrationGuard {
    pub(crate) fn new(engine: Arc<RealtimeEngine>, id: ConnectionId) -> Self {
        Self {
            engine: Some(engine),
            id,
        }
    }

    pub(crate) fn disarm(mut self) {
        self.engine = None;
    }
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        let Some(engine) = self.engine.take() else {
            return;
        };
        let id = self.id;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    engine.release_connection(&id).await;
                });
            }
            Err(_) => warn!(conn_id = %id, "No runtime to release dropped connection"),
        }
    }
}
