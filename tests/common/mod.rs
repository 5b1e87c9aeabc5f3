#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bus_ticketing::clock::ManualClock;
use bus_ticketing::models::{BookingSubmission, BusId, PassengerDraft, PendingBookingContext, TripDetails};
use bus_ticketing::services::api_client::{
    ApiError, BookingDetails, BookingResponse, BookingResponseData, PaymentInitData, PaymentInitRequest,
    PaymentInitResponse, PaymentStatusResponse, SeatApi, SeatDetailEntry, SeatDetailsRequest,
    SeatDetailsResponse,
};
use chrono::{TimeZone, Utc};

pub fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()))
}

pub fn trip() -> TripDetails {
    TripDetails {
        travel_date: "2025-03-07".to_string(),
        origin: "Kathmandu".to_string(),
        destination: "Pokhara".to_string(),
        bus_id: BusId::Number(42),
        bus_name: Some("Sona Deluxe".to_string()),
        fare: Some(1000),
    }
}

pub fn pending_context(merchant_txn_id: &str) -> PendingBookingContext {
    PendingBookingContext {
        trip: trip(),
        selected_seats: vec!["A1".to_string()],
        passengers: vec![PassengerDraft {
            name: Some("Sita".to_string()),
            ..Default::default()
        }],
        merchant_txn_id: Some(merchant_txn_id.to_string()),
        total_amount: 1000,
        created_at: 0,
    }
}

pub fn booked(seats: &[&str]) -> SeatDetailsResponse {
    SeatDetailsResponse {
        success: true,
        data: Some(
            seats
                .iter()
                .map(|s| SeatDetailEntry { seat_number: Some(s.to_string()) })
                .collect(),
        ),
    }
}

pub fn booking_ok(ticket: &str) -> BookingResponse {
    BookingResponse {
        success: true,
        data: Some(BookingResponseData {
            booking_details: Some(BookingDetails {
                ticket_number: Some(ticket.to_string()),
                pnr: Some(format!("PNR-{}", ticket)),
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn booking_failed(message: &str) -> BookingResponse {
    BookingResponse {
        success: false,
        message: Some(message.to_string()),
        ..Default::default()
    }
}

type Scripted<T> = Mutex<VecDeque<Result<T, ApiError>>>;

/// Фейковый Seat API: заранее заданные ответы и счётчики вызовов.
#[derive(Default)]
pub struct FakeSeatApi {
    pub details_calls: AtomicUsize,
    pub status_calls: AtomicUsize,
    pub booking_calls: AtomicUsize,
    pub init_calls: AtomicUsize,
    pub details_requests: Mutex<Vec<SeatDetailsRequest>>,
    pub submissions: Mutex<Vec<BookingSubmission>>,
    details: Scripted<SeatDetailsResponse>,
    payment_ok: Mutex<Option<bool>>,
    bookings: Scripted<BookingResponse>,
    details_delay: Mutex<Option<Duration>>,
    unauthorized_init: AtomicBool,
    unauthorized_status: AtomicBool,
}

impl FakeSeatApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_details(&self, response: Result<SeatDetailsResponse, ApiError>) {
        self.details.lock().unwrap().push_back(response);
    }

    pub fn set_payment_ok(&self, ok: bool) {
        *self.payment_ok.lock().unwrap() = Some(ok);
    }

    pub fn push_booking(&self, response: Result<BookingResponse, ApiError>) {
        self.bookings.lock().unwrap().push_back(response);
    }

    pub fn set_details_delay(&self, delay: Duration) {
        *self.details_delay.lock().unwrap() = Some(delay);
    }

    /// Шлюз отвечает 401 на создание платежа.
    pub fn set_unauthorized_init(&self, unauthorized: bool) {
        self.unauthorized_init.store(unauthorized, Ordering::SeqCst);
    }

    /// Проверка статуса платежа отвечает 401.
    pub fn set_unauthorized_status(&self, unauthorized: bool) {
        self.unauthorized_status.store(unauthorized, Ordering::SeqCst);
    }

    pub fn network_calls(&self) -> usize {
        self.details_calls.load(Ordering::SeqCst)
            + self.status_calls.load(Ordering::SeqCst)
            + self.booking_calls.load(Ordering::SeqCst)
            + self.init_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SeatApi for FakeSeatApi {
    async fn fetch_seat_details(&self, request: &SeatDetailsRequest) -> Result<SeatDetailsResponse, ApiError> {
        self.details_calls.fetch_add(1, Ordering::SeqCst);
        self.details_requests.lock().unwrap().push(request.clone());
        let delay = *self.details_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.details
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(booked(&[])))
    }

    async fn check_payment_status(
        &self,
        _merchant_txn_id: &str,
        _gateway_txn_id: &str,
    ) -> Result<PaymentStatusResponse, ApiError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        if self.unauthorized_status.load(Ordering::SeqCst) {
            return Err(ApiError::Unauthorized);
        }
        let ok = self.payment_ok.lock().unwrap().unwrap_or(true);
        Ok(PaymentStatusResponse {
            success: ok,
            data: None,
            message: (!ok).then(|| "payment declined".to_string()),
        })
    }

    async fn submit_booking(&self, submission: &BookingSubmission) -> Result<BookingResponse, ApiError> {
        self.booking_calls.fetch_add(1, Ordering::SeqCst);
        self.submissions.lock().unwrap().push(submission.clone());
        self.bookings
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(booking_ok("SONA-1")))
    }

    async fn initiate_payment(&self, request: &PaymentInitRequest) -> Result<PaymentInitResponse, ApiError> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        if self.unauthorized_init.load(Ordering::SeqCst) {
            return Err(ApiError::Unauthorized);
        }
        Ok(PaymentInitResponse {
            success: true,
            data: Some(PaymentInitData {
                redirect_url: Some(format!("https://gateway.test/pay/{}", request.merchant_txn_id)),
            }),
            message: None,
        })
    }
}
