use axum::{
    extract::{Json, Query, State},
    routing::post,
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::{bad_request, to_api_error, ApiResult};
use crate::error::{BookingError, RetryAction};
use crate::middleware::ClientContext;
use crate::services::session::PageTier;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route(
        "/api/session",
        post(login).delete(logout).get(session_status),
    )
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub token: String,
}

/// Страница, которую сейчас показывает вкладка.
#[derive(Debug, Default, Deserialize)]
pub struct SessionQuery {
    #[serde(default)]
    pub tier: PageTier,
    pub path: Option<String>,
}

/// POST /api/session
pub async fn login(
    State(state): State<Arc<AppState>>,
    client: ClientContext,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<Value>> {
    let token = req.token.trim();
    if token.is_empty() {
        return Err(bad_request("Token is required", RetryAction::Login));
    }

    let login_path = &state.config.booking.login_path;
    let guard = state.guard_for(&client);
    guard
        .store_token(token)
        .await
        .map_err(|e| to_api_error(BookingError::from(e), login_path))?;
    let return_path = guard
        .take_return_path()
        .await
        .map_err(|e| to_api_error(BookingError::from(e), login_path))?;

    // Экран выбора мест продолжает работу с новым токеном.
    state.existing_seat_session(&client, |session| session.resume()).await;

    tracing::info!("Client {} logged in", client.client_id);
    Ok(Json(json!({
        "success": true,
        "returnPath": return_path,
    })))
}

/// DELETE /api/session
pub async fn logout(
    State(state): State<Arc<AppState>>,
    client: ClientContext,
) -> ApiResult<Json<Value>> {
    state
        .guard_for(&client)
        .logout()
        .await
        .map_err(|e| to_api_error(BookingError::from(e), &state.config.booking.login_path))?;
    state.close_seat_session(&client).await;

    Ok(Json(json!({
        "success": true,
        "redirect": state.config.booking.login_path,
    })))
}

/// GET /api/session?tier=protected&path=/booking/seats
///
/// Запрос заодно запускает наблюдение за сессией для этой страницы; редирект,
/// найденный между запросами, отдаётся в поле `redirect`.
pub async fn session_status(
    State(state): State<Arc<AppState>>,
    client: ClientContext,
    Query(query): Query<SessionQuery>,
) -> ApiResult<Json<Value>> {
    let login_path = &state.config.booking.login_path;
    let path = query
        .path
        .unwrap_or_else(|| state.config.booking.landing_path.clone());
    let redirect = state.watch_session(&client, query.tier, &path).await;

    let guard = state.guard_for(&client);
    let authenticated = guard
        .is_authenticated()
        .await
        .map_err(|e| to_api_error(BookingError::from(e), login_path))?;
    let logged_in_at = if authenticated {
        guard
            .logged_in_at()
            .await
            .map_err(|e| to_api_error(BookingError::from(e), login_path))?
    } else {
        None
    };

    Ok(Json(json!({
        "success": true,
        "authenticated": authenticated,
        "loggedInAt": logged_in_at,
        "tier": query.tier,
        "redirect": redirect,
    })))
}
