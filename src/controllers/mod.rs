pub mod payment;
pub mod seats;
pub mod session;

use axum::{http::StatusCode, Json, Router};
use serde::Serialize;
use std::sync::Arc;

use crate::error::{BookingError, RetryAction};
use crate::models::BookingPhase;
use crate::services::session::AuthRedirect;

pub fn routes() -> Router<Arc<crate::AppState>> {
    Router::new()
        .merge(session::routes())
        .merge(seats::routes())
        .merge(payment::routes())
}

// --- Общий формат ответа с ошибкой ---
#[derive(Debug, Serialize)]
pub struct ApiError {
    success: bool,
    message: String,
    retry: RetryAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    phase: Option<BookingPhase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    redirect: Option<AuthRedirect>,
}

pub type ApiResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

pub fn status_for(err: &BookingError) -> StatusCode {
    match err {
        BookingError::AuthenticationRequired { .. } => StatusCode::UNAUTHORIZED,
        BookingError::EmptySelection => StatusCode::BAD_REQUEST,
        BookingError::MissingBookingContext => StatusCode::NOT_FOUND,
        BookingError::SeatUnavailable { .. }
        | BookingError::DuplicateTransaction { .. }
        | BookingError::AlreadyAttempted { .. }
        | BookingError::SeatConflict { .. } => StatusCode::CONFLICT,
        BookingError::PaymentFailed { .. } | BookingError::BookingPaymentFailed { .. } => {
            StatusCode::PAYMENT_REQUIRED
        }
        BookingError::AvailabilityFetchFailed(_) | BookingError::BookingFailedOther(_) => {
            StatusCode::BAD_GATEWAY
        }
        BookingError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn to_api_error(err: BookingError, login_path: &str) -> (StatusCode, Json<ApiError>) {
    let status = status_for(&err);
    if status.is_server_error() {
        tracing::error!("Request failed: {}", err);
    } else {
        tracing::warn!("Request rejected: {}", err);
    }

    let redirect = match &err {
        BookingError::AuthenticationRequired { return_path } => Some(AuthRedirect {
            login_path: login_path.to_string(),
            return_path: return_path.clone(),
            notice: err.user_message(),
        }),
        _ => None,
    };

    (
        status,
        Json(ApiError {
            success: false,
            message: err.user_message(),
            retry: err.retry_action(),
            phase: err.terminal_phase(),
            redirect,
        }),
    )
}

pub fn bad_request(message: &str, retry: RetryAction) -> (StatusCode, Json<ApiError>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ApiError {
            success: false,
            message: message.to_string(),
            retry,
            phase: None,
            redirect: None,
        }),
    )
}
