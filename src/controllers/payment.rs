use axum::{
    extract::{Json, RawQuery, State},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use super::{bad_request, to_api_error, ApiResult};
use crate::error::RetryAction;
use crate::middleware::ClientContext;
use crate::models::CallbackParams;
use crate::{AppState, CALLBACK_PATH};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(CALLBACK_PATH, get(payment_callback))
        .route("/payment/retry", post(retry_payment))
}

#[derive(Debug, Deserialize)]
pub struct RetryRequest {
    pub merchant_txn_id: String,
}

/// GET /payment/callback?MerchantTxnId=...&GatewayTxnId=...
///
/// Без обоих идентификаторов пользователь отправляется на стартовую страницу.
pub async fn payment_callback(
    State(state): State<Arc<AppState>>,
    client: ClientContext,
    RawQuery(query): RawQuery,
) -> Response {
    let Some(params) = query.as_deref().and_then(CallbackParams::from_query) else {
        tracing::warn!("Payment callback without transaction ids, redirecting to landing");
        return Redirect::to(&state.config.booking.landing_path).into_response();
    };

    let mut coordinator = state.coordinator_for(&client);
    match coordinator.reconcile(&params).await {
        Ok(receipt) => {
            // Выбор мест исчерпан успешным бронированием.
            state.close_seat_session(&client).await;
            Json(json!({
                "success": true,
                "phase": coordinator.phase(),
                "data": receipt,
            }))
            .into_response()
        }
        Err(e) => to_api_error(e, &state.config.booking.login_path).into_response(),
    }
}

/// POST /payment/retry
pub async fn retry_payment(
    State(state): State<Arc<AppState>>,
    client: ClientContext,
    Json(req): Json<RetryRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let merchant_txn_id = req.merchant_txn_id.trim();
    if merchant_txn_id.is_empty() {
        return Err(bad_request("merchant_txn_id is required", RetryAction::RestartSearch));
    }

    let handoff = state
        .coordinator_for(&client)
        .retry_payment(merchant_txn_id)
        .await
        .map_err(|e| to_api_error(e, &state.config.booking.login_path))?;

    Ok(Json(json!({ "success": true, "data": handoff })))
}
