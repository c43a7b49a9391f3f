//! Shared test helpers for integration tests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use tableside_api::AppState;
use tableside_auth::{
    JwtStrategy, MemoryRevocationList, RevocationList, StaffClaims, TableTokenClaims,
    TableTokenStrategy, TokenType,
};
use tableside_core::config::AppConfig;
use tableside_core::error::AppError;
use tableside_core::types::{BranchId, Role, SessionId};
use tableside_realtime::bridge::MemoryPubSub;
use tableside_realtime::sector::StaticSectorLookup;
use tableside_realtime::{EngineDeps, RealtimeEngine};

pub type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A gateway running on an ephemeral port.
pub struct TestApp {
    pub addr: SocketAddr,
    pub config: AppConfig,
    pub bus: Arc<MemoryPubSub>,
    pub sectors: Arc<StaticSectorLookup>,
    pub engine: Arc<RealtimeEngine>,
    shutdown: Option<oneshot::Sender<()>>,
    server: JoinHandle<Result<(), AppError>>,
}

impl TestApp {
    /// Start a gateway with default settings.
    pub async fn spawn() -> Self {
        Self::spawn_with(|_| {}).await
    }

    /// Start a gateway after adjusting the default configuration.
    pub async fn spawn_with(adjust: impl FnOnce(&mut AppConfig)) -> Self {
        let mut config = AppConfig::default();
        config.auth.jwt_secret = "integration-staff-secret".to_string();
        config.auth.table_token_secret = "integration-table-secret".to_string();
        adjust(&mut config);

        let bus = Arc::new(MemoryPubSub::default());
        let sectors = Arc::new(StaticSectorLookup::new());
        let revocations: Arc<dyn RevocationList> =
            Arc::new(MemoryRevocationList::new(1_000, Duration::from_secs(3600)));

        let engine = Arc::new(RealtimeEngine::new(
            config.realtime.clone(),
            config.bus.clone(),
            EngineDeps {
                bus: bus.clone(),
                sector_lookup: sectors.clone(),
                staff_auth: Arc::new(JwtStrategy::new(&config.auth, Arc::clone(&revocations))),
                diner_auth: Arc::new(TableTokenStrategy::new(&config.auth, revocations)),
            },
        ));
        engine.start();

        let channel = config.bus.channels[0].clone();
        tokio::time::timeout(Duration::from_secs(5), async {
            while bus.subscriber_count(&channel).await == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("subscriber never attached to the bus");

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let state = AppState::new(Arc::new(config.clone()), Arc::clone(&engine));
        let server = tokio::spawn(tableside_api::serve(listener, state, async move {
            let _ = shutdown_rx.await;
        }));

        Self {
            addr,
            config,
            bus,
            sectors,
            engine,
            shutdown: Some(shutdown_tx),
            server,
        }
    }

    /// Mint a staff access token.
    pub fn staff_token(&self, user_id: i64, role: Role, branches: &[BranchId]) -> String {
        self.staff_token_of_type(user_id, role, branches, TokenType::Access)
    }

    pub fn staff_token_of_type(
        &self,
        user_id: i64,
        role: Role,
        branches: &[BranchId],
        token_type: TokenType,
    ) -> String {
        let now = chrono::Utc::now().timestamp();
        let claims = StaffClaims {
            sub: user_id.to_string(),
            tenant_id: 1,
            branch_ids: branches.to_vec(),
            role,
            iat: now,
            exp: now + 3600,
            jti: None,
            token_type,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.config.auth.jwt_secret.as_bytes()),
        )
        .unwrap()
    }

    /// Mint a diner table token.
    pub fn table_token(&self, branch_id: BranchId, session_id: SessionId) -> String {
        let now = chrono::Utc::now().timestamp();
        let claims = TableTokenClaims {
            tenant_id: 1,
            branch_id,
            table_id: 4,
            session_id,
            iat: now,
            exp: now + 3600,
            jti: None,
            token_type: TokenType::Table,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.config.auth.table_token_secret.as_bytes()),
        )
        .unwrap()
    }

    pub fn url(&self, path_and_query: &str) -> String {
        format!("ws://{}{}", self.addr, path_and_query)
    }

    /// Open a socket on `path_and_query`.
    pub async fn connect(&self, path_and_query: &str) -> Socket {
        let (socket, _) = tokio_tungstenite::connect_async(self.url(path_and_query))
            .await
            .expect("WebSocket handshake failed");
        socket
    }

    /// Open a socket carrying an `Origin` header.
    pub async fn connect_with_origin(&self, path_and_query: &str, origin: &'static str) -> Socket {
        let mut request = self.url(path_and_query).into_client_request().unwrap();
        request
            .headers_mut()
            .insert("origin", HeaderValue::from_static(origin));
        let (socket, _) = tokio_tungstenite::connect_async(request)
            .await
            .expect("WebSocket handshake failed");
        socket
    }

    /// Trigger graceful shutdown and wait for the server to exit.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        tokio::time::timeout(Duration::from_secs(15), &mut self.server)
            .await
            .expect("server did not stop")
            .unwrap()
            .unwrap();
    }
}

/// Next text frame as JSON, skipping protocol frames.
pub async fn next_json(socket: &mut Socket) -> Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket ended")
            .expect("socket error");
        match message {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Close(frame) => panic!("unexpected close: {frame:?}"),
            _ => continue,
        }
    }
}

/// Read until the close frame and return its code.
pub async fn close_code(socket: &mut Socket) -> u16 {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("timed out waiting for close");
        match message {
            Some(Ok(Message::Close(Some(frame)))) => return u16::from(frame.code),
            Some(Ok(Message::Close(None))) => return 1005,
            Some(Ok(_)) => continue,
            Some(Err(e)) => panic!("socket error before close: {e}"),
            None => panic!("socket ended without a close frame"),
        }
    }
}
