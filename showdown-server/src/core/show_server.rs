//! Axum server exposing the admin mutations and the three live channels.
//!
//! Binds on `0.0.0.0` so phones on the venue network can reach the voter
//! page. Every WebSocket upgrade must come from the configured origin; the
//! admin channel additionally requires the admin password.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        DefaultBodyLimit, State, WebSocketUpgrade,
    },
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post, put},
    Router,
};
use futures_util::{SinkExt, StreamExt};
use tower_http::services::ServeDir;

use super::broadcast_router::{BroadcastRouter, ConnectionHandle, Outbound, RouterHandle};
use super::channels::Channel;
use super::config::ServerConfig;
use super::error::ServerError;
use super::event_bus::ChangeBus;
use super::identity::{self, VoterIdentity};
use super::liveness::LivenessMonitor;
use super::persistence::{self, Persistence};
use super::state_store::StateStore;
use super::web_dispatch::{self, Inbound};
use crate::commands::admin;

/// Request bodies carry whole show states, never media.
const MAX_BODY_BYTES: usize = 500 * 1024;

/// Shared state for every handler.
pub struct AppState {
    pub config: ServerConfig,
    pub store: Arc<StateStore>,
    pub admin: RouterHandle,
    pub big_screen: RouterHandle,
    pub voters: RouterHandle,
}

impl AppState {
    /// Start one router per channel, each following `store` from its
    /// current snapshot.
    pub async fn start(config: ServerConfig, store: Arc<StateStore>) -> Arc<Self> {
        let admin = spawn_router(&store, Channel::admin()).await;
        let big_screen = spawn_router(&store, Channel::big_screen()).await;
        let voters = spawn_router(&store, Channel::voter()).await;
        Arc::new(Self {
            config,
            store,
            admin,
            big_screen,
            voters,
        })
    }

    pub fn routers(&self) -> Vec<RouterHandle> {
        vec![self.admin.clone(), self.big_screen.clone(), self.voters.clone()]
    }
}

async fn spawn_router(store: &StateStore, channel: Channel) -> RouterHandle {
    let (snapshot, changes) = store.subscribe().await;
    BroadcastRouter::spawn(channel, snapshot, changes)
}

pub fn app(state: Arc<AppState>) -> Router {
    let mut app = Router::new()
        .route("/ping", get(admin::ping))
        .route("/admin/patch", patch(admin::patch_state))
        .route("/admin/generate-bracket", post(admin::generate_bracket))
        .route("/admin/state", put(admin::replace_state))
        .route("/admin/ws", get(admin_ws))
        .route("/big-screen/ws", get(big_screen_ws))
        .route("/ws", get(voter_ws))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES));

    let assets = &state.config.assets_dir;
    if assets.is_dir() {
        log::info!("Serving assets from {}", assets.display());
        app = app.nest_service("/assets", ServeDir::new(assets));
    } else {
        log::warn!("Assets directory {} not found, /assets disabled", assets.display());
    }
    app.with_state(state)
}

/// Load the saved show, start the engine and serve until the listener fails.
pub async fn run(config: ServerConfig) -> Result<(), ServerError> {
    let state_path = config.state_path();
    let initial = persistence::load_state(&state_path);
    let store = Arc::new(StateStore::new(
        initial,
        Arc::new(ChangeBus::new()),
        Some(Persistence::spawn(state_path)),
    ));

    let state = AppState::start(config, store).await;
    LivenessMonitor::new(state.routers()).spawn();

    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        })?;

    let ip = local_ip_address::local_ip()
        .map(|ip| ip.to_string())
        .unwrap_or_else(|_| "0.0.0.0".to_string());
    log::info!(
        "Show server listening on {} (LAN: http://{}:{})",
        addr,
        ip,
        state.config.port
    );

    axum::serve(listener, app(state)).await?;
    Ok(())
}

// ============================================================================
// WebSocket channels
// ============================================================================

async fn admin_ws(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    if !identity::same_origin(&headers, &state.config.origin)
        || !identity::is_admin(&headers, &state.config.admin_password)
    {
        log::warn!("Rejected admin channel upgrade");
        return StatusCode::FORBIDDEN.into_response();
    }
    let router = state.admin.clone();
    let inbound = Inbound::Admin {
        big_screen: state.big_screen.clone(),
    };
    ws.on_upgrade(move |socket| handle_ws(socket, router, inbound))
}

async fn big_screen_ws(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    if !identity::same_origin(&headers, &state.config.origin) {
        log::warn!("Rejected big-screen upgrade from foreign origin");
        return StatusCode::FORBIDDEN.into_response();
    }
    let router = state.big_screen.clone();
    ws.on_upgrade(move |socket| handle_ws(socket, router, Inbound::BigScreen))
}

async fn voter_ws(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    if !identity::same_origin(&headers, &state.config.origin) {
        log::warn!("Rejected voter upgrade from foreign origin");
        return StatusCode::FORBIDDEN.into_response();
    }
    let voter = VoterIdentity::from_headers(&headers);
    let set_cookie = voter.set_cookie();

    let router = state.voters.clone();
    let inbound = Inbound::Voter {
        store: state.store.clone(),
        voter_id: voter.id,
    };
    let mut response = ws.on_upgrade(move |socket| handle_ws(socket, router, inbound));
    if let Some(cookie) = set_cookie {
        response.headers_mut().append(SET_COOKIE, cookie);
    }
    response
}

/// Pump one socket: router frames out, inbound commands in.
async fn handle_ws(socket: WebSocket, router: RouterHandle, inbound: Inbound) {
    let Some(ConnectionHandle {
        id,
        mut outbound,
        heartbeat,
        mut terminated,
    }) = router.connect().await
    else {
        log::warn!("{} router unavailable, closing socket", router.kind());
        return;
    };
    let (mut sender, mut receiver) = socket.split();

    // Task: forward queued frames to the socket
    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            let message = match frame {
                Outbound::Text(text) => Message::Text(text.into()),
                Outbound::Ping => Message::Ping(Default::default()),
            };
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            received = receiver.next() => match received {
                Some(Ok(message)) => {
                    heartbeat.beat();
                    match message {
                        Message::Text(text) => web_dispatch::dispatch(&inbound, text.as_str()).await,
                        Message::Close(_) => break,
                        _ => {}
                    }
                }
                _ => break,
            },
            _ = &mut send_task => break,
            _ = &mut terminated => {
                log::debug!("{} client {} terminated", router.kind(), id);
                break;
            }
        }
    }

    router.disconnect(id);
    send_task.abort();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::show_state::ShowState;
    use std::path::PathBuf;

    fn test_config() -> ServerConfig {
        ServerConfig {
            port: 0,
            origin: "http://localhost:8081".into(),
            storage_root: PathBuf::from("/nonexistent"),
            admin_password: "pw".into(),
            assets_dir: PathBuf::from("/nonexistent/assets"),
        }
    }

    #[tokio::test]
    async fn routers_follow_the_store() {
        let store = Arc::new(StateStore::new(
            ShowState::default(),
            Arc::new(ChangeBus::new()),
            None,
        ));
        let state = AppState::start(test_config(), store).await;
        assert_eq!(state.routers().len(), 3);

        let mut conn = state.admin.connect().await.unwrap();
        let Some(Outbound::Text(initial)) = conn.outbound.recv().await else {
            panic!("expected full projection");
        };
        let initial: serde_json::Value = serde_json::from_str(&initial).unwrap();
        assert!(initial["state"].get("presentationMode").is_some());

        state.store.regenerate_bracket(4).await.unwrap();
        let Some(Outbound::Text(push)) = conn.outbound.recv().await else {
            panic!("expected bracket push");
        };
        let push: serde_json::Value = serde_json::from_str(&push).unwrap();
        assert!(push["state"].get("bracket").is_some());
    }

    #[tokio::test]
    async fn app_builds_without_assets() {
        let store = Arc::new(StateStore::new(
            ShowState::default(),
            Arc::new(ChangeBus::new()),
            None,
        ));
        let state = AppState::start(test_config(), store).await;
        let _router: Router = app(state);
    }
}
