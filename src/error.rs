//! Таксономия ошибок процесса бронирования.
//!
//! Каждая асинхронная ошибка перехватывается в точке `await` и переводится в один из
//! вариантов [`BookingError`] с фиксированным сообщением для пользователя.
//! Автоматических повторов нет: допустимое действие пользователя описывает [`RetryAction`].

use serde::Serialize;

use crate::models::BookingPhase;
use crate::storage::StorageError;

pub const PAYMENT_FAILED_MESSAGE: &str = "Payment got failed. Please try again.";
pub const ALREADY_ATTEMPTED_MESSAGE: &str =
    "A booking for this payment was already attempted. Please contact support.";
pub const MISSING_CONTEXT_MESSAGE: &str =
    "Payment context not found. Please retry the payment from seat selection.";
pub const SEAT_CONFLICT_MESSAGE: &str =
    "The selected seat was already booked by someone else. Please choose alternative seats or contact support for a refund.";
pub const DUPLICATE_TRANSACTION_MESSAGE: &str =
    "This transaction has already been used. Please start a new payment.";
pub const BOOKING_PAYMENT_FAILED_MESSAGE: &str =
    "The payment for this booking could not be confirmed. Please try the payment again.";
pub const AVAILABILITY_WARNING: &str =
    "Could not refresh seat availability. Seats are shown as available and will be verified when you book.";

/// Что пользователь может сделать после ошибки.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryAction {
    None,
    Login,
    PickAnotherSeat,
    RetryPayment,
    StartNewPayment,
    FindAlternativeSeats,
    RestartSearch,
    ContactSupport,
}

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("authentication required")]
    AuthenticationRequired { return_path: String },

    #[error("seat {seat_id} is not available")]
    SeatUnavailable { seat_id: String },

    #[error("no seats selected")]
    EmptySelection,

    #[error("seat availability fetch failed: {0}")]
    AvailabilityFetchFailed(String),

    #[error("transaction {merchant_txn_id} was already used")]
    DuplicateTransaction { merchant_txn_id: String },

    #[error("payment failed: {reason}")]
    PaymentFailed { reason: String },

    #[error("pending booking context not found")]
    MissingBookingContext,

    #[error("booking already attempted for transaction {merchant_txn_id}")]
    AlreadyAttempted { merchant_txn_id: String },

    #[error("seat conflict: {detail}")]
    SeatConflict { detail: String },

    #[error("payment reported as failed at booking time: {detail}")]
    BookingPaymentFailed { detail: String },

    #[error("booking failed: {0}")]
    BookingFailedOther(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl BookingError {
    pub fn user_message(&self) -> String {
        match self {
            BookingError::AuthenticationRequired { .. } => {
                "Your session has expired. Please log in again.".to_string()
            }
            BookingError::SeatUnavailable { seat_id } => {
                format!("Seat {} is already booked.", seat_id)
            }
            BookingError::EmptySelection => "Please select at least one seat.".to_string(),
            BookingError::AvailabilityFetchFailed(_) => AVAILABILITY_WARNING.to_string(),
            BookingError::DuplicateTransaction { .. } => DUPLICATE_TRANSACTION_MESSAGE.to_string(),
            BookingError::PaymentFailed { .. } => PAYMENT_FAILED_MESSAGE.to_string(),
            BookingError::MissingBookingContext => MISSING_CONTEXT_MESSAGE.to_string(),
            BookingError::AlreadyAttempted { .. } => ALREADY_ATTEMPTED_MESSAGE.to_string(),
            BookingError::SeatConflict { .. } => SEAT_CONFLICT_MESSAGE.to_string(),
            BookingError::BookingPaymentFailed { .. } => {
                BOOKING_PAYMENT_FAILED_MESSAGE.to_string()
            }
            BookingError::BookingFailedOther(_) => {
                "Booking failed after payment. Please retry the payment process or contact support."
                    .to_string()
            }
            BookingError::Storage(_) => {
                "Could not access saved booking data. Please try again.".to_string()
            }
        }
    }

    pub fn retry_action(&self) -> RetryAction {
        match self {
            BookingError::AuthenticationRequired { .. } => RetryAction::Login,
            BookingError::SeatUnavailable { .. } => RetryAction::PickAnotherSeat,
            BookingError::EmptySelection => RetryAction::PickAnotherSeat,
            BookingError::AvailabilityFetchFailed(_) => RetryAction::None,
            BookingError::DuplicateTransaction { .. } => RetryAction::StartNewPayment,
            BookingError::PaymentFailed { .. } => RetryAction::RetryPayment,
            BookingError::MissingBookingContext => RetryAction::RestartSearch,
            BookingError::AlreadyAttempted { .. } => RetryAction::ContactSupport,
            BookingError::SeatConflict { .. } => RetryAction::FindAlternativeSeats,
            BookingError::BookingPaymentFailed { .. } => RetryAction::RetryPayment,
            BookingError::BookingFailedOther(_) => RetryAction::RetryPayment,
            BookingError::Storage(_) => RetryAction::RetryPayment,
        }
    }

    /// Фаза, в которой останавливается попытка бронирования с этой ошибкой.
    pub fn terminal_phase(&self) -> Option<BookingPhase> {
        match self {
            BookingError::PaymentFailed { .. } => Some(BookingPhase::PaymentFailed),
            BookingError::BookingPaymentFailed { .. } => Some(BookingPhase::BookingFailed),
            BookingError::AlreadyAttempted { .. }
            | BookingError::MissingBookingContext
            | BookingError::SeatConflict { .. }
            | BookingError::BookingFailedOther(_) => Some(BookingPhase::BookingError),
            _ => None,
        }
    }

    pub fn is_seat_conflict(&self) -> bool {
        matches!(self, BookingError::SeatConflict { .. })
    }
}

pub type BookingResult<T> = Result<T, BookingError>;
