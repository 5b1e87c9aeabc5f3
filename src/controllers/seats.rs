use axum::{
    extract::{Json, Query, State},
    routing::{get, patch, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::{bad_request, to_api_error, ApiResult};
use crate::error::{BookingError, RetryAction};
use crate::middleware::ClientContext;
use crate::models::{BusId, PassengerDraft, TripDetails};
use crate::services::availability::AvailabilityKey;
use crate::services::debounce::Trigger;
use crate::{AppState, CHECKOUT_PATH};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/seats", get(get_seats).delete(leave_seats))
        .route("/api/seats/toggle", patch(toggle_seat))
        .route("/api/bookings/checkout", post(checkout))
}

#[derive(Debug, Deserialize)]
pub struct SeatsQuery {
    pub travel_date: String,
    pub destination: String,
    pub bus_id: String,
    pub fare: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ToggleRequest {
    pub seat_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub origin: String,
    #[serde(default)]
    pub bus_name: Option<String>,
    #[serde(default)]
    pub passengers: Vec<PassengerDraft>,
}

fn no_seat_session() -> (axum::http::StatusCode, Json<super::ApiError>) {
    bad_request("Open the seat selection first", RetryAction::RestartSearch)
}

/// GET /api/seats?travel_date=...&destination=...&bus_id=...
pub async fn get_seats(
    State(state): State<Arc<AppState>>,
    client: ClientContext,
    Query(params): Query<SeatsQuery>,
) -> ApiResult<Json<Value>> {
    let key = AvailabilityKey::normalize(&params.travel_date, &params.destination, &params.bus_id)
        .ok_or_else(|| bad_request("Invalid travel date", RetryAction::RestartSearch))?;
    let poll_interval = state.config.booking.poll_interval();

    let (view, trigger) = state
        .with_seat_session(&client, &params.bus_id, params.fare, |session| {
            let trigger = session.set_trip(key);
            session.start_polling(poll_interval);
            (session.view(), trigger)
        })
        .await;

    Ok(Json(json!({
        "success": true,
        "data": view,
        "refreshScheduled": matches!(trigger, Trigger::Scheduled(_)),
    })))
}

/// DELETE /api/seats (уход со страницы)
pub async fn leave_seats(
    State(state): State<Arc<AppState>>,
    client: ClientContext,
) -> Json<Value> {
    let closed = state.close_seat_session(&client).await;
    Json(json!({ "success": true, "closed": closed }))
}

/// PATCH /api/seats/toggle
pub async fn toggle_seat(
    State(state): State<Arc<AppState>>,
    client: ClientContext,
    Json(req): Json<ToggleRequest>,
) -> ApiResult<Json<Value>> {
    let seat_id = req.seat_id.trim().to_uppercase();
    let result = state
        .existing_seat_session(&client, |session| {
            session.toggle(&seat_id).map(|_| ())?;
            Ok::<_, BookingError>(session.view())
        })
        .await
        .ok_or_else(no_seat_session)?;

    let view = result.map_err(|e| to_api_error(e, &state.config.booking.login_path))?;
    Ok(Json(json!({ "success": true, "data": view })))
}

/// POST /api/bookings/checkout
pub async fn checkout(
    State(state): State<Arc<AppState>>,
    client: ClientContext,
    Json(req): Json<CheckoutRequest>,
) -> ApiResult<Json<Value>> {
    let login_path = &state.config.booking.login_path;
    state
        .guard_for(&client)
        .require_token(CHECKOUT_PATH)
        .await
        .map_err(|e| to_api_error(e, login_path))?;

    // Состояние копируется под блокировкой, сетевые вызовы идут без неё.
    let (selection, layout, price, bus_id, key) = state
        .existing_seat_session(&client, |session| {
            session.sync();
            (
                session.selection().clone(),
                session.layout().clone(),
                session.price_per_seat(),
                session.bus().bus_id.clone(),
                session.trip().cloned(),
            )
        })
        .await
        .ok_or_else(no_seat_session)?;
    let key = key.ok_or_else(no_seat_session)?;

    let trip = TripDetails {
        travel_date: key.travel_date,
        origin: req.origin,
        destination: key.destination,
        bus_id: BusId::Text(bus_id),
        bus_name: req.bus_name,
        fare: Some(price),
    };

    let handoff = state
        .coordinator_for(&client)
        .begin_checkout(trip, &selection, &layout, price, req.passengers)
        .await
        .map_err(|e| to_api_error(e, login_path))?;

    Ok(Json(json!({ "success": true, "data": handoff })))
}
