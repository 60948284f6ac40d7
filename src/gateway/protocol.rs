use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use super::server::AppState;
use crate::types::{ConversationId, IncomingMessage};

#[derive(Deserialize)]
struct RpcRequest {
    id: String,
    method: String,
    #[serde(default)]
    params: serde_json::Value,
}

/// Parameters for `conversation.get`.
#[derive(Debug, Deserialize)]
pub struct ConversationParams {
    pub conversation_id: ConversationId,
}

/// Parameters for `conversation.set_reply_chance`.
#[derive(Debug, Deserialize)]
pub struct SetReplyChanceParams {
    pub conversation_id: ConversationId,
    pub reply_chance: u8,
}

#[derive(Serialize)]
struct RpcResponse {
    id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Handle an incoming JSON-RPC-style frame and return the response frame.
///
/// Methods: `ping`, `status`, `message.process`, `conversation.get`,
/// `conversation.set_reply_chance`.
pub async fn handle_rpc(msg: &str, state: &Arc<AppState>) -> String {
    let req: RpcRequest = match serde_json::from_str(msg) {
        Ok(r) => r,
        Err(e) => {
            warn!("malformed rpc: {e}");
            return respond("0".into(), Err(format!("parse error: {e}")));
        }
    };

    let result = dispatch(&req.method, req.params, state).await;
    respond(req.id, result)
}

async fn dispatch(
    method: &str,
    params: serde_json::Value,
    state: &Arc<AppState>,
) -> Result<serde_json::Value, String> {
    match method {
        "ping" => Ok(serde_json::json!("pong")),

        "status" => {
            let conversations = state
                .stores
                .conversations
                .count()
                .await
                .map_err(|e| e.to_string())?;
            Ok(serde_json::json!({
                "version": env!("CARGO_PKG_VERSION"),
                "backend": state.config.store.backend,
                "conversations": conversations,
                "processed": state.processed(),
            }))
        }

        "message.process" => {
            let message: IncomingMessage = parse_params(method, params)?;
            let outcome = state.process(&message).await.map_err(|e| e.to_string())?;
            serde_json::to_value(outcome).map_err(|e| e.to_string())
        }

        "conversation.get" => {
            let params: ConversationParams = parse_params(method, params)?;
            let view = state
                .conversation_view(params.conversation_id)
                .await
                .map_err(|e| e.to_string())?;
            serde_json::to_value(view).map_err(|e| e.to_string())
        }

        "conversation.set_reply_chance" => {
            let params: SetReplyChanceParams = parse_params(method, params)?;
            let conversation = state
                .stores
                .conversations
                .set_reply_chance(params.conversation_id, params.reply_chance)
                .await
                .map_err(|e| e.to_string())?;
            serde_json::to_value(conversation).map_err(|e| e.to_string())
        }

        other => Err(format!("unknown method: {other}")),
    }
}

fn parse_params<T: DeserializeOwned>(method: &str, params: serde_json::Value) -> Result<T, String> {
    serde_json::from_value(params).map_err(|e| format!("invalid {method} params: {e}"))
}

fn respond(id: String, result: Result<serde_json::Value, String>) -> String {
    let resp = match result {
        Ok(value) => RpcResponse {
            id,
            result: Some(value),
            error: None,
        },
        Err(error) => RpcResponse {
            id,
            result: None,
            error: Some(error),
        },
    };
    serde_json::to_string(&resp).unwrap_or_default()
}
