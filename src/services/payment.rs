//! payment.rs
//!
//! Координатор оплаты и бронирования.
//!
//! Ключевые компоненты:
//! 1.  **Передача на шлюз** (`begin_checkout`): сохранение контекста бронирования в
//!     хранилище и получение ссылки на платёжный шлюз.
//! 2.  **Сверка колбэка** (`reconcile`): после возврата со шлюза проверяет транзакцию
//!     по журналу использованных идентификаторов, статус платежа и ровно один раз
//!     отправляет бронирование мест.
//! 3.  **Повтор оплаты** (`retry_payment`): для неудавшегося платежа освобождает
//!     идентификатор в журнале и заново отправляет пользователя на шлюз с сохранённым
//!     контекстом. Транзакция, по которой уже отправлялось бронирование, не освобождается.
//!
//! 401 от любого вызова очищает токен и сохраняет путь возврата через [`SessionGuard`].

use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::api_client::{ApiError, BookingResponse, PaymentInitRequest, SeatApi};
use super::payload::build_submission;
use super::selection::compute_total;
use super::session::SessionGuard;
use crate::clock::Clock;
use crate::error::{BookingError, BookingResult};
use crate::models::{
    BookingPhase, CallbackParams, PassengerDraft, PaymentHandoff, PendingBookingContext, Receipt,
    SeatLayout, SelectionState, TripDetails,
};
use crate::storage::ledger::ClaimOutcome;
use crate::storage::{AttemptedBookings, BookingStorage, KeyValueStore, UsedTransactionLedger};

/// Признаки нарушения уникальности места в ответе бэкенда.
const SEAT_CONFLICT_SIGNATURES: [&str; 6] = [
    "duplicate key",
    "unique constraint",
    "e11000",
    "already booked",
    "seat already taken",
    "uniqueconstraint",
];

/// Признаки того, что сам платёж не прошёл, обнаруженные только при бронировании.
const PAYMENT_FAILURE_SIGNATURES: [&str; 4] = [
    "payment failed",
    "payment not successful",
    "payment verification failed",
    "transaction failed",
];

pub const DEFAULT_PAYMENT_METHOD: &str = "Online Payment";

#[derive(Debug, Clone, PartialEq, Eq)]
enum FailureKind {
    SeatConflict,
    PaymentFailed,
    Other,
}

fn classify_failure(text: &str) -> FailureKind {
    let lower = text.to_lowercase();
    if SEAT_CONFLICT_SIGNATURES.iter().any(|sig| lower.contains(sig)) {
        FailureKind::SeatConflict
    } else if PAYMENT_FAILURE_SIGNATURES.iter().any(|sig| lower.contains(sig)) {
        FailureKind::PaymentFailed
    } else {
        FailureKind::Other
    }
}

fn failure_error(text: String) -> BookingError {
    match classify_failure(&text) {
        FailureKind::SeatConflict => BookingError::SeatConflict { detail: text },
        FailureKind::PaymentFailed => BookingError::BookingPaymentFailed { detail: text },
        FailureKind::Other => BookingError::BookingFailedOther(text),
    }
}

fn new_merchant_txn_id() -> String {
    let id = Uuid::new_v4().simple().to_string().to_uppercase();
    format!("BT{}", &id[..18])
}

fn txn_suffix(merchant_txn_id: &str) -> String {
    let chars: Vec<char> = merchant_txn_id.chars().collect();
    let start = chars.len().saturating_sub(8);
    chars[start..].iter().collect::<String>().to_uppercase()
}

fn round_amount(amount: Option<f64>) -> Option<i64> {
    amount.filter(|a| a.is_finite()).map(|a| a.round() as i64)
}

/// Квитанция из ответа бронирования; отсутствующие поля заменяются синтетическими значениями.
pub fn build_receipt(
    params: &CallbackParams,
    context: &PendingBookingContext,
    response: &BookingResponse,
) -> Receipt {
    let data = response.data.as_ref();
    let booking = data.and_then(|d| d.booking_details.as_ref());
    let receipt = data.and_then(|d| d.receipt.as_ref());
    let payment = data.and_then(|d| d.payment_details.as_ref());
    let suffix = txn_suffix(&params.merchant_txn_id);

    let total_amount = round_amount(receipt.and_then(|r| r.total_amount)).unwrap_or(context.total_amount);
    let amount_paid = round_amount(receipt.and_then(|r| r.amount_paid))
        .or_else(|| round_amount(payment.and_then(|p| p.amount)))
        .unwrap_or(total_amount);

    Receipt {
        transaction_id: params.merchant_txn_id.clone(),
        gateway_transaction_id: params.gateway_txn_id.clone(),
        ticket_number: booking
            .and_then(|b| b.ticket_number.clone())
            .unwrap_or_else(|| format!("TKT-{}", suffix)),
        pnr: booking
            .and_then(|b| b.pnr.clone())
            .unwrap_or_else(|| format!("PNR-{}", suffix)),
        payment_method: receipt
            .and_then(|r| r.payment_method.clone())
            .or_else(|| payment.and_then(|p| p.payment_method.clone()))
            .unwrap_or_else(|| DEFAULT_PAYMENT_METHOD.to_string()),
        amount_paid,
        total_amount,
        seats: context.selected_seats.clone(),
        travel_date: context.trip.travel_date.clone(),
        passenger_names: context
            .passengers
            .iter()
            .filter_map(|p| p.name.clone())
            .collect(),
    }
}

pub struct PaymentCoordinator {
    api: Arc<dyn SeatApi>,
    storage: BookingStorage,
    ledger: UsedTransactionLedger,
    attempted: AttemptedBookings,
    clock: Arc<dyn Clock>,
    guard: SessionGuard,
    phase: BookingPhase,
}

impl PaymentCoordinator {
    pub fn new(
        api: Arc<dyn SeatApi>,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        guard: SessionGuard,
    ) -> Self {
        Self {
            api,
            storage: BookingStorage::new(store.clone()),
            ledger: UsedTransactionLedger::new(store.clone(), clock.clone()),
            attempted: AttemptedBookings::new(store),
            clock,
            guard,
            phase: BookingPhase::Idle,
        }
    }

    /// Ответ 401: токен очищается, путь возврата сохраняется.
    async fn unauthorized(&self, return_path: String) -> BookingError {
        match self.guard.handle_unauthorized(&return_path).await {
            Ok(_) => BookingError::AuthenticationRequired { return_path },
            Err(e) => e.into(),
        }
    }

    pub fn phase(&self) -> BookingPhase {
        self.phase
    }

    fn transition(&mut self, next: BookingPhase) {
        info!("Booking phase {:?} -> {:?}", self.phase, next);
        self.phase = next;
    }

    fn halt(&mut self, err: BookingError) -> BookingError {
        if let Some(phase) = err.terminal_phase() {
            self.transition(phase);
        }
        warn!("Booking attempt halted: {}", err);
        err
    }

    /// IDLE -> AWAITING_GATEWAY: сохраняет контекст и возвращает ссылку на шлюз.
    pub async fn begin_checkout(
        &mut self,
        trip: TripDetails,
        selection: &SelectionState,
        layout: &SeatLayout,
        price_per_seat: i64,
        passengers: Vec<PassengerDraft>,
    ) -> BookingResult<PaymentHandoff> {
        if !selection.can_submit() {
            return Err(BookingError::EmptySelection);
        }
        if let Some(seat_id) = selection
            .selected_seat_ids()
            .iter()
            .find(|id| layout.is_booked(id))
        {
            return Err(BookingError::SeatUnavailable {
                seat_id: seat_id.clone(),
            });
        }

        let context = PendingBookingContext {
            trip,
            selected_seats: selection.selected_seat_ids().to_vec(),
            passengers,
            merchant_txn_id: None,
            total_amount: compute_total(selection, price_per_seat),
            created_at: self.clock.now_millis(),
        };
        self.hand_off(context).await
    }

    async fn hand_off(&mut self, mut context: PendingBookingContext) -> BookingResult<PaymentHandoff> {
        let merchant_txn_id = new_merchant_txn_id();
        context.merchant_txn_id = Some(merchant_txn_id.clone());
        self.storage.save_pending(&context).await?;

        let request = PaymentInitRequest {
            merchant_txn_id: merchant_txn_id.clone(),
            amount: context.total_amount,
            remarks: format!(
                "Bus {} seats {}",
                context.trip.bus_id,
                context.selected_seats.join(",")
            ),
        };

        let response = match self.api.initiate_payment(&request).await {
            Ok(response) => response,
            Err(ApiError::Unauthorized) => {
                return Err(self.unauthorized(crate::CHECKOUT_PATH.to_string()).await);
            }
            Err(e) => {
                error!("Payment initiation failed: {}", e);
                return Err(BookingError::PaymentFailed { reason: e.to_string() });
            }
        };

        let redirect_url = response
            .data
            .and_then(|d| d.redirect_url)
            .filter(|url| response.success && !url.is_empty())
            .ok_or_else(|| BookingError::PaymentFailed {
                reason: response
                    .message
                    .unwrap_or_else(|| "payment gateway did not return a redirect".to_string()),
            })?;

        self.transition(BookingPhase::AwaitingGateway);
        info!("Handing off {} to payment gateway", merchant_txn_id);
        Ok(PaymentHandoff {
            merchant_txn_id,
            redirect_url,
            amount: context.total_amount,
        })
    }

    /// Сверка возврата со шлюза. Бронирование по одной транзакции отправляется не более одного раза.
    pub async fn reconcile(&mut self, params: &CallbackParams) -> BookingResult<Receipt> {
        self.phase = BookingPhase::AwaitingGateway;
        let merchant_txn_id = params.merchant_txn_id.as_str();

        // Журнал проверяется до любых сетевых вызовов; идентификатор занимается сразу.
        if let ClaimOutcome::AlreadyUsed { first_used_at } =
            self.ledger.check_and_claim(merchant_txn_id).await?
        {
            warn!("Transaction {} already used at {}", merchant_txn_id, first_used_at);
            return Err(BookingError::DuplicateTransaction {
                merchant_txn_id: merchant_txn_id.to_string(),
            });
        }

        self.transition(BookingPhase::CheckingPayment);
        match self
            .api
            .check_payment_status(merchant_txn_id, &params.gateway_txn_id)
            .await
        {
            Ok(status) if status.success => {
                info!("Payment {} confirmed by gateway", merchant_txn_id);
            }
            Ok(status) => {
                let reason = status.message.unwrap_or_else(|| "payment not successful".to_string());
                return Err(self.halt(BookingError::PaymentFailed { reason }));
            }
            Err(ApiError::Unauthorized) => {
                // Статус не получен: после входа та же транзакция сверяется заново.
                self.ledger.release(merchant_txn_id).await?;
                self.transition(BookingPhase::AwaitingGateway);
                return Err(self.unauthorized(params.callback_path(crate::CALLBACK_PATH)).await);
            }
            Err(e) => {
                error!("Payment status check for {} failed: {}", merchant_txn_id, e);
                return Err(self.halt(BookingError::PaymentFailed {
                    reason: e.to_string(),
                }));
            }
        }

        self.transition(BookingPhase::Booking);
        if !self.attempted.check_and_record(merchant_txn_id).await? {
            return Err(self.halt(BookingError::AlreadyAttempted {
                merchant_txn_id: merchant_txn_id.to_string(),
            }));
        }

        let Some(context) = self.storage.load_pending().await? else {
            return Err(self.halt(BookingError::MissingBookingContext));
        };
        // Контекст другой вкладки или другой попытки к этой транзакции не относится.
        if context
            .merchant_txn_id
            .as_deref()
            .is_some_and(|stored| stored != merchant_txn_id)
        {
            warn!(
                "Stored booking context belongs to {:?}, not {}",
                context.merchant_txn_id, merchant_txn_id
            );
            return Err(self.halt(BookingError::MissingBookingContext));
        }

        let submission = match build_submission(&context, merchant_txn_id) {
            Ok(submission) => submission,
            Err(e) => return Err(self.halt(BookingError::BookingFailedOther(e.to_string()))),
        };

        let response = match self.api.submit_booking(&submission).await {
            Ok(response) if response.success => response,
            Ok(response) => return Err(self.halt(failure_error(response.error_text()))),
            Err(ApiError::Status { status, body }) => {
                error!("Booking submission returned {}: {}", status, body);
                return Err(self.halt(failure_error(body)));
            }
            Err(ApiError::Unauthorized) => {
                let err = self.unauthorized(params.callback_path(crate::CALLBACK_PATH)).await;
                return Err(self.halt(err));
            }
            Err(e) => return Err(self.halt(BookingError::BookingFailedOther(e.to_string()))),
        };

        // Повторная загрузка страницы не должна снова отправить бронирование.
        self.storage.clear_pending().await?;
        let receipt = build_receipt(params, &context, &response);
        self.transition(BookingPhase::Success);
        info!(
            "Booking {} completed: ticket={}, pnr={}",
            merchant_txn_id, receipt.ticket_number, receipt.pnr
        );
        Ok(receipt)
    }

    /// PAYMENT_FAILED -> AWAITING_GATEWAY с сохранённым контекстом и новым идентификатором.
    /// Без контекста этой транзакции журнал не трогается.
    pub async fn retry_payment(&mut self, merchant_txn_id: &str) -> BookingResult<PaymentHandoff> {
        let context = match self.storage.load_pending().await? {
            Some(context) if context.merchant_txn_id.as_deref() == Some(merchant_txn_id) => context,
            Some(context) => {
                warn!(
                    "Retry for {} but stored context belongs to {:?}",
                    merchant_txn_id, context.merchant_txn_id
                );
                return Err(BookingError::MissingBookingContext);
            }
            None => {
                warn!("Retry for {} without stored booking context", merchant_txn_id);
                return Err(BookingError::MissingBookingContext);
            }
        };

        if self.attempted.contains(merchant_txn_id).await? {
            // Бронирование по этой транзакции уже уходило на бэкенд.
            info!("Keeping {} in ledger, booking was already submitted", merchant_txn_id);
        } else {
            self.ledger.release(merchant_txn_id).await?;
        }
        info!("Retrying payment for {} with stored context", merchant_txn_id);
        self.hand_off(context).await
    }
}
