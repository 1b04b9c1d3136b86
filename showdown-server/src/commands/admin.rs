//! HTTP commands the admin console calls to mutate the show.
//!
//! All mutations require the configured origin and the admin password.
//! Failures answer `{"err": "..."}`; successes answer `{"ok": true}`.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;

use crate::core::bracket::MAX_BRACKET_SLOTS;
use crate::core::identity;
use crate::core::patch::PatchOperation;
use crate::core::show_server::AppState;
use crate::core::show_state::ShowState;

/// Bracket size used when the request does not name one.
pub const DEFAULT_BRACKET_SIZE: i64 = 16;

#[derive(Debug, Deserialize)]
pub struct GenerateBracketRequest {
    #[serde(default = "default_bracket_size")]
    pub num: i64,
}

fn default_bracket_size() -> i64 {
    DEFAULT_BRACKET_SIZE
}

/// Keep-alive check.
pub async fn ping() -> &'static str {
    "pong"
}

/// Apply an ordered patch array as one commit.
pub async fn patch_state(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<Vec<PatchOperation>>, JsonRejection>,
) -> Response {
    if let Err(denied) = authorize(&state, &headers) {
        return denied;
    }
    let Json(ops) = match body {
        Ok(body) => body,
        Err(e) => return reject(StatusCode::BAD_REQUEST, e.body_text()),
    };

    match state.store.apply_patches(&ops).await {
        Ok(changed) => {
            log::debug!("Applied {} patch operation(s), changed {:?}", ops.len(), changed);
            ok()
        }
        Err(e) => {
            log::warn!("Rejected patch of {} operation(s): {}", ops.len(), e);
            reject(StatusCode::BAD_REQUEST, e.to_string())
        }
    }
}

/// Replace the bracket with a fresh tree of `num` slots.
pub async fn generate_bracket(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<GenerateBracketRequest>, JsonRejection>,
) -> Response {
    if let Err(denied) = authorize(&state, &headers) {
        return denied;
    }
    let num = match body {
        Ok(Json(request)) => request.num,
        Err(e) => return reject(StatusCode::BAD_REQUEST, e.body_text()),
    };
    let slots = match usize::try_from(num) {
        Ok(slots) if slots <= MAX_BRACKET_SLOTS => slots,
        _ => {
            log::warn!("Rejected bracket size {}", num);
            return reject(
                StatusCode::BAD_REQUEST,
                format!("invalid bracket size {} (at most {})", num, MAX_BRACKET_SLOTS),
            );
        }
    };

    match state.store.regenerate_bracket(slots).await {
        Ok(_) => {
            log::info!("Generated a {}-slot bracket", slots);
            ok()
        }
        Err(e) => {
            log::warn!("Rejected bracket generation: {}", e);
            reject(StatusCode::BAD_REQUEST, e.to_string())
        }
    }
}

/// Swap in a complete show state.
pub async fn replace_state(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<ShowState>, JsonRejection>,
) -> Response {
    if let Err(denied) = authorize(&state, &headers) {
        return denied;
    }
    let Json(next) = match body {
        Ok(body) => body,
        Err(e) => return reject(StatusCode::BAD_REQUEST, e.body_text()),
    };

    match state.store.replace_state(next).await {
        Ok(changed) => {
            log::info!("Replaced show state, changed {:?}", changed);
            ok()
        }
        Err(e) => {
            log::warn!("Rejected state replacement: {}", e);
            reject(StatusCode::BAD_REQUEST, e.to_string())
        }
    }
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    if !identity::same_origin(headers, &state.config.origin) {
        log::warn!("Rejected admin request from foreign origin");
        return Err(reject(StatusCode::FORBIDDEN, "origin not allowed"));
    }
    if !identity::is_admin(headers, &state.config.admin_password) {
        log::warn!("Rejected admin request without credentials");
        return Err(reject(StatusCode::FORBIDDEN, "admin credentials required"));
    }
    Ok(())
}

fn ok() -> Response {
    Json(json!({ "ok": true })).into_response()
}

fn reject(status: StatusCode, err: impl Into<String>) -> Response {
    (status, Json(json!({ "err": err.into() }))).into_response()
}
