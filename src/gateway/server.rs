use axum::{
    Json, Router,
    body::Bytes,
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use futures::SinkExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use super::auth;
use crate::config::BabblerConfig;
use crate::engine::{Engine, Outcome};
use crate::sampling::{Randomness, StdRandomness};
use crate::store::{self, StoreError, Stores};
use crate::types::{ChainStats, Conversation, ConversationId, IncomingMessage};

pub struct AppState {
    pub token: Option<String>,
    pub engine: Engine,
    pub stores: Stores,
    pub config: BabblerConfig,
    processed: AtomicU64,
}

/// Conversation settings plus the size of its learned chain.
#[derive(Debug, Serialize)]
pub struct ConversationView {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub chain: ChainStats,
}

#[derive(Debug, Deserialize)]
struct ReplyChanceBody {
    reply_chance: u8,
}

impl AppState {
    pub fn new(
        config: BabblerConfig,
        stores: Stores,
        token: Option<String>,
        rng: Arc<dyn Randomness>,
    ) -> Self {
        let engine = Engine::from_config(&config, &stores, rng);
        Self {
            token,
            engine,
            stores,
            config,
            processed: AtomicU64::new(0),
        }
    }

    /// Run one message through the engine.
    pub async fn process(&self, message: &IncomingMessage) -> Result<Outcome, StoreError> {
        let outcome = self.engine.handle(message).await?;
        self.processed.fetch_add(1, Ordering::Relaxed);
        Ok(outcome)
    }

    pub async fn conversation_view(
        &self,
        id: ConversationId,
    ) -> Result<ConversationView, StoreError> {
        let conversation = self.stores.conversations.get_or_create(id).await?;
        let chain = self.stores.chain.stats(id).await?;
        Ok(ConversationView {
            conversation,
            chain,
        })
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        let header = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
        auth::verify_bearer(header, &self.token)
    }
}

pub async fn run(config: BabblerConfig, token: Option<String>) -> anyhow::Result<()> {
    let is_loopback = config.gateway.bind == "127.0.0.1" || config.gateway.bind == "::1";

    if !is_loopback && token.is_none() {
        anyhow::bail!(
            "Auth token required when binding to non-loopback address. \
             Set --token or BABBLER_TOKEN env var."
        );
    }

    let stores = store::open(&config.store, config.policy.default_reply_chance).await?;
    let addr = format!("{}:{}", config.gateway.bind, config.gateway.port);
    let state = Arc::new(AppState::new(
        config,
        stores,
        token,
        Arc::new(StdRandomness::from_os()),
    ));

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("babbler gateway listening on {addr}");
    if is_loopback {
        info!("bound to loopback, local access only");
    } else {
        warn!("bound to {addr}, bearer token required");
    }

    axum::serve(listener, router(state)).await?;
    Ok(())
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws_handler))
        .route("/messages", post(message_handler))
        .route("/conversations/{id}", get(conversation_handler))
        .route("/conversations/{id}/reply-chance", put(reply_chance_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

fn error_response(e: StoreError) -> Response {
    let status = match e {
        StoreError::InvalidReplyChance(_) => StatusCode::BAD_REQUEST,
        StoreError::NotFound { .. } => StatusCode::NOT_FOUND,
        StoreError::Conflict { .. } => StatusCode::CONFLICT,
        StoreError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, e.to_string()).into_response()
}

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, "missing or invalid bearer token").into_response()
}

/// Learn from a transport message and return the reply, if any.
///
/// Bodies are parsed only after the token check.
async fn message_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !state.authorized(&headers) {
        return unauthorized();
    }
    let message: IncomingMessage = match Json::from_bytes(&body) {
        Ok(Json(message)) => message,
        Err(rejection) => return rejection.into_response(),
    };
    match state.process(&message).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => {
            warn!(conversation = message.conversation_id, "message dropped: {e}");
            error_response(e)
        }
    }
}

async fn conversation_handler(
    Path(id): Path<ConversationId>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    if !state.authorized(&headers) {
        return unauthorized();
    }
    match state.conversation_view(id).await {
        Ok(view) => Json(view).into_response(),
        Err(e) => error_response(e),
    }
}

async fn reply_chance_handler(
    Path(id): Path<ConversationId>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !state.authorized(&headers) {
        return unauthorized();
    }
    let body: ReplyChanceBody = match Json::from_bytes(&body) {
        Ok(Json(body)) => body,
        Err(rejection) => return rejection.into_response(),
    };
    match state
        .stores
        .conversations
        .set_reply_chance(id, body.reply_chance)
        .await
    {
        Ok(conversation) => {
            info!(conversation = id, reply_chance = body.reply_chance, "reply chance updated");
            Json(conversation).into_response()
        }
        Err(e) => error_response(e),
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(mut socket: WebSocket, state: Arc<AppState>) {
    if state.token.is_some() {
        // First message must be auth when token auth is enabled.
        let authed = match socket.recv().await {
            Some(Ok(Message::Text(msg))) => auth::verify_connect(&msg, &state.token),
            _ => false,
        };

        if !authed {
            let _ = socket
                .send(Message::Text(
                    r#"{"error":"auth_failed","code":4001}"#.into(),
                ))
                .await;
            let _ = socket.close().await;
            return;
        }
    }

    let hello = serde_json::json!({ "ok": true, "version": env!("CARGO_PKG_VERSION") });
    let _ = socket.send(Message::Text(hello.to_string().into())).await;

    info!("client connected");

    while let Some(Ok(msg)) = socket.recv().await {
        match msg {
            Message::Text(text) => {
                let resp = super::protocol::handle_rpc(&text, &state).await;
                if socket.send(Message::Text(resp.into())).await.is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    info!("client disconnected");
}
