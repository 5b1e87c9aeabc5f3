//! Построение запроса на бронирование из сохранённого контекста.
//!
//! Все правила подстановки значений по умолчанию собраны здесь: на выходе запрос
//! всегда структурно полный, даже если данные формы были неполными.

use validator::{Validate, ValidateEmail};

use super::normalize::{normalize_date, normalize_place};
use crate::models::booking::{PaymentInfo, SeatInfo};
use crate::models::{BookingSubmission, Gender, PassengerDraft, PassengerRecord, PendingBookingContext};

pub const DEFAULT_CONTACT_NUMBER: &str = "9800000000";
pub const DEFAULT_BOARDING_POINT: &str = "main bus park";
pub const DEFAULT_RESIDENCE: &str = "not provided";
pub const DEFAULT_EMAIL: &str = "guest@example.com";

const MIN_CONTACT_DIGITS: usize = 7;

#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("travel date '{0}' is not a valid date")]
    InvalidTravelDate(String),
    #[error("bus id '{0}' is not numeric")]
    InvalidBusId(String),
    #[error("booking has neither passengers nor seats")]
    NoPassengers,
    #[error("booking payload is invalid: {0}")]
    Invalid(#[from] validator::ValidationErrors),
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn contact_number(draft: &PassengerDraft) -> String {
    present(&draft.contact)
        .map(|c| c.chars().filter(|ch| ch.is_ascii_digit() || *ch == '+').collect::<String>())
        .filter(|c| c.chars().filter(char::is_ascii_digit).count() >= MIN_CONTACT_DIGITS)
        .unwrap_or_else(|| DEFAULT_CONTACT_NUMBER.to_string())
}

fn email(draft: &PassengerDraft) -> String {
    present(&draft.email)
        .filter(|e| e.validate_email())
        .map(str::to_string)
        .unwrap_or_else(|| DEFAULT_EMAIL.to_string())
}

fn passenger_record(
    index: usize,
    draft: &PassengerDraft,
    context: &PendingBookingContext,
) -> PassengerRecord {
    let trip = &context.trip;
    let source = normalize_place(present(&draft.origin).unwrap_or(trip.origin.as_str()));
    let destination = normalize_place(present(&draft.destination).unwrap_or(trip.destination.as_str()));

    let seat_number = present(&draft.seat_number)
        .map(|s| s.to_uppercase())
        .or_else(|| context.selected_seats.get(index).cloned())
        .unwrap_or_else(|| format!("A{}", index + 1));

    let boarding_location = present(&draft.boarding_location)
        .map(str::to_string)
        .or_else(|| Some(trip.origin.trim().to_string()).filter(|o| !o.is_empty()))
        .unwrap_or_else(|| DEFAULT_BOARDING_POINT.to_string());
    let deboarding_location = present(&draft.deboarding_location)
        .map(str::to_string)
        .or_else(|| Some(trip.destination.trim().to_string()).filter(|d| !d.is_empty()))
        .unwrap_or_else(|| DEFAULT_BOARDING_POINT.to_string());

    PassengerRecord {
        passenger_name: present(&draft.name)
            .map(str::to_string)
            .unwrap_or_else(|| format!("Passenger {}", index + 1)),
        contact_number: contact_number(draft),
        seat_number,
        source,
        destination,
        gender: Gender::normalize(draft.gender.as_deref()),
        boarding_location,
        deboarding_location,
        residence: present(&draft.residence)
            .map(str::to_string)
            .unwrap_or_else(|| DEFAULT_RESIDENCE.to_string()),
        email: email(draft),
    }
}

/// Строит проверенный запрос `POST /seat/payment`.
pub fn build_submission(
    context: &PendingBookingContext,
    merchant_txn_id: &str,
) -> Result<BookingSubmission, PayloadError> {
    let date_of_travel = normalize_date(&context.trip.travel_date)
        .ok_or_else(|| PayloadError::InvalidTravelDate(context.trip.travel_date.clone()))?;
    let bus_id = context
        .trip
        .bus_id
        .as_integer()
        .ok_or_else(|| PayloadError::InvalidBusId(context.trip.bus_id.to_string()))?;

    // Пассажиров не меньше, чем выбранных мест: недостающие заполняются значениями по умолчанию.
    let count = context.passengers.len().max(context.selected_seats.len());
    if count == 0 {
        return Err(PayloadError::NoPassengers);
    }
    let empty = PassengerDraft::default();
    let passengers_list = (0..count)
        .map(|i| passenger_record(i, context.passengers.get(i).unwrap_or(&empty), context))
        .collect();

    let submission = BookingSubmission {
        seat_info: SeatInfo {
            date_of_travel,
            bus_id,
            passengers_list,
        },
        payment_info: PaymentInfo {
            merchant_transaction_id: merchant_txn_id.to_string(),
        },
    };
    submission.validate()?;
    Ok(submission)
}
