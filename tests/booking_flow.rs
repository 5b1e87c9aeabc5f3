mod common;

use chrono::Duration as ChronoDuration;
use std::collections::BTreeSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use bus_ticketing::clock::{Clock, ManualClock};
use bus_ticketing::config::SessionConfig;
use bus_ticketing::error::{BookingError, RetryAction, SEAT_CONFLICT_MESSAGE};
use bus_ticketing::models::{BookingPhase, BusConfig, CallbackParams, PassengerDraft, SelectionState};
use bus_ticketing::services::api_client::ApiError;
use bus_ticketing::services::payment::PaymentCoordinator;
use bus_ticketing::services::selection::{apply_booked_seats, initialize_layout};
use bus_ticketing::services::session::SessionGuard;
use bus_ticketing::storage::{keys, BookingStorage, KeyValueStore, MemoryStore, StorageScope};
use common::{booking_failed, clock, pending_context, trip, FakeSeatApi};

fn callback(merchant: &str) -> CallbackParams {
    CallbackParams::from_query(&format!("MerchantTxnId={}&GatewayTxnId=GW1", merchant)).unwrap()
}

fn guard(store: &MemoryStore, clock: Arc<ManualClock>) -> SessionGuard {
    SessionGuard::new(Arc::new(store.clone()), clock, SessionConfig::default(), "/login")
}

fn new_coordinator(api: Arc<FakeSeatApi>, store: &MemoryStore, clock: Arc<ManualClock>) -> PaymentCoordinator {
    PaymentCoordinator::new(api, Arc::new(store.clone()), clock.clone(), guard(store, clock))
}

async fn used_ids(store: &MemoryStore) -> serde_json::Value {
    let raw = store
        .get(StorageScope::Local, keys::USED_TRANSACTION_IDS)
        .await
        .unwrap()
        .unwrap_or_else(|| "{}".to_string());
    serde_json::from_str(&raw).unwrap()
}

async fn with_pending(store: &MemoryStore, merchant: &str) {
    BookingStorage::new(Arc::new(store.clone()))
        .save_pending(&pending_context(merchant))
        .await
        .unwrap();
}

#[tokio::test]
async fn successful_callback_books_once_and_clears_context() {
    let store = MemoryStore::new();
    let api = FakeSeatApi::new();
    with_pending(&store, "TXN1").await;
    // Следы старых клиентов тоже должны исчезнуть.
    store
        .set(StorageScope::Local, keys::CURRENT_BOOKING_DATA, "{\"selectedSeats\":[\"A1\"]}")
        .await
        .unwrap();

    let mut coordinator = new_coordinator(api.clone(), &store, clock());
    let receipt = coordinator.reconcile(&callback("TXN1")).await.unwrap();

    assert_eq!(coordinator.phase(), BookingPhase::Success);
    assert_eq!(receipt.transaction_id, "TXN1");
    assert_eq!(receipt.gateway_transaction_id, "GW1");
    assert_eq!(receipt.ticket_number, "SONA-1");
    assert!(!receipt.pnr.is_empty());
    assert_eq!(receipt.seats, vec!["A1"]);

    for (scope, key) in [
        (StorageScope::Session, keys::PENDING_BOOKING),
        (StorageScope::Local, keys::CURRENT_BOOKING_DATA),
        (StorageScope::Local, keys::REDIRECT_AFTER_LOGIN),
    ] {
        assert_eq!(store.get(scope, key).await.unwrap(), None, "{} not cleared", key);
    }
    assert!(used_ids(&store).await.get("TXN1").is_some());
    assert_eq!(api.booking_calls.load(Ordering::SeqCst), 1);

    let submission = &api.submissions.lock().unwrap()[0];
    assert_eq!(submission.seat_info.bus_id, 42);
    assert_eq!(submission.payment_info.merchant_transaction_id, "TXN1");
}

#[tokio::test]
async fn failed_payment_never_submits_booking() {
    let store = MemoryStore::new();
    let api = FakeSeatApi::new();
    api.set_payment_ok(false);
    with_pending(&store, "TXN1").await;

    let mut coordinator = new_coordinator(api.clone(), &store, clock());
    let err = coordinator.reconcile(&callback("TXN1")).await.unwrap_err();

    assert!(matches!(err, BookingError::PaymentFailed { .. }));
    assert_eq!(err.user_message(), "Payment got failed. Please try again.");
    assert_eq!(err.retry_action(), RetryAction::RetryPayment);
    assert_eq!(coordinator.phase(), BookingPhase::PaymentFailed);
    assert_eq!(api.booking_calls.load(Ordering::SeqCst), 0);
    assert_eq!(
        store.get(StorageScope::Session, keys::ATTEMPTED_BOOKINGS).await.unwrap(),
        None
    );
}

#[tokio::test]
async fn recently_used_transaction_short_circuits_without_network() {
    let store = MemoryStore::new();
    let api = FakeSeatApi::new();
    let clock = clock();
    let hour_ago = clock.now_millis() - ChronoDuration::hours(1).num_milliseconds();
    store
        .set(
            StorageScope::Local,
            keys::USED_TRANSACTION_IDS,
            &format!("{{\"TXN1\":{}}}", hour_ago),
        )
        .await
        .unwrap();
    with_pending(&store, "TXN1").await;

    let mut coordinator = new_coordinator(api.clone(), &store, clock);
    let err = coordinator.reconcile(&callback("TXN1")).await.unwrap_err();

    assert!(matches!(err, BookingError::DuplicateTransaction { .. }));
    assert_eq!(err.retry_action(), RetryAction::StartNewPayment);
    assert_eq!(api.network_calls(), 0);
}

#[tokio::test]
async fn expired_ledger_entry_is_pruned_and_reused() {
    let store = MemoryStore::new();
    let api = FakeSeatApi::new();
    let clock = clock();
    let long_ago = clock.now_millis() - ChronoDuration::hours(25).num_milliseconds();
    store
        .set(
            StorageScope::Local,
            keys::USED_TRANSACTION_IDS,
            &format!("{{\"TXN1\":{}}}", long_ago),
        )
        .await
        .unwrap();
    with_pending(&store, "TXN1").await;

    let mut coordinator = new_coordinator(api.clone(), &store, clock.clone());
    coordinator.reconcile(&callback("TXN1")).await.unwrap();

    assert_eq!(api.status_calls.load(Ordering::SeqCst), 1);
    assert_eq!(used_ids(&store).await["TXN1"], serde_json::json!(clock.now_millis()));
}

#[tokio::test]
async fn uniqueness_violation_is_reported_as_seat_taken() {
    let store = MemoryStore::new();
    let api = FakeSeatApi::new();
    api.push_booking(Ok(booking_failed(
        "E11000 duplicate key error collection: bookings index: seat_1",
    )));
    with_pending(&store, "TXN1").await;

    let mut coordinator = new_coordinator(api.clone(), &store, clock());
    let err = coordinator.reconcile(&callback("TXN1")).await.unwrap_err();

    assert!(err.is_seat_conflict());
    assert_eq!(err.user_message(), SEAT_CONFLICT_MESSAGE);
    assert_eq!(err.retry_action(), RetryAction::FindAlternativeSeats);
    assert_eq!(coordinator.phase(), BookingPhase::BookingError);
    // Контекст остаётся для разбора.
    assert!(store.get(StorageScope::Session, keys::PENDING_BOOKING).await.unwrap().is_some());
}

#[tokio::test]
async fn conflict_in_error_status_body_is_classified_too() {
    let store = MemoryStore::new();
    let api = FakeSeatApi::new();
    api.push_booking(Err(ApiError::Status {
        status: 500,
        body: "{\"error\":\"violates unique constraint \\\"seat_trip_key\\\"\"}".to_string(),
    }));
    with_pending(&store, "TXN1").await;

    let mut coordinator = new_coordinator(api, &store, clock());
    let err = coordinator.reconcile(&callback("TXN1")).await.unwrap_err();
    assert!(err.is_seat_conflict());
}

#[tokio::test]
async fn payment_failure_at_booking_time_is_distinct_from_booking_error() {
    let store = MemoryStore::new();
    let api = FakeSeatApi::new();
    api.push_booking(Ok(booking_failed("Payment verification failed")));
    with_pending(&store, "TXN1").await;

    let mut coordinator = new_coordinator(api, &store, clock());
    let err = coordinator.reconcile(&callback("TXN1")).await.unwrap_err();
    assert!(matches!(err, BookingError::BookingPaymentFailed { .. }));
    assert_eq!(coordinator.phase(), BookingPhase::BookingFailed);

    let store = MemoryStore::new();
    let api = FakeSeatApi::new();
    api.push_booking(Ok(booking_failed("bus not found")));
    with_pending(&store, "TXN2").await;
    let mut coordinator = new_coordinator(api, &store, clock());
    let err = coordinator.reconcile(&callback("TXN2")).await.unwrap_err();
    assert!(matches!(err, BookingError::BookingFailedOther(_)));
    assert_eq!(err.retry_action(), RetryAction::RetryPayment);
}

#[tokio::test]
async fn second_attempt_in_same_tab_is_refused() {
    let store = MemoryStore::new();
    let api = FakeSeatApi::new();
    api.push_booking(Ok(booking_failed("temporary failure")));
    with_pending(&store, "TXN1").await;

    let mut coordinator = new_coordinator(api.clone(), &store, clock());
    coordinator.reconcile(&callback("TXN1")).await.unwrap_err();

    // Ручной сброс журнала не обходит список попыток вкладки.
    store.remove(StorageScope::Local, keys::USED_TRANSACTION_IDS).await.unwrap();
    let err = coordinator.reconcile(&callback("TXN1")).await.unwrap_err();
    assert!(matches!(err, BookingError::AlreadyAttempted { .. }));
    assert_eq!(coordinator.phase(), BookingPhase::BookingError);
    assert_eq!(api.booking_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn missing_context_halts_after_payment_check() {
    let store = MemoryStore::new();
    let api = FakeSeatApi::new();

    let mut coordinator = new_coordinator(api.clone(), &store, clock());
    let err = coordinator.reconcile(&callback("TXN1")).await.unwrap_err();

    assert!(matches!(err, BookingError::MissingBookingContext));
    assert_eq!(coordinator.phase(), BookingPhase::BookingError);
    assert_eq!(api.booking_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn legacy_context_is_migrated_before_booking() {
    let store = MemoryStore::new();
    let api = FakeSeatApi::new();
    let legacy = serde_json::to_string(&pending_context("TXN1")).unwrap();
    store
        .set(StorageScope::Local, keys::CURRENT_BOOKING_DATA, &legacy)
        .await
        .unwrap();

    let mut coordinator = new_coordinator(api.clone(), &store, clock());
    coordinator.reconcile(&callback("TXN1")).await.unwrap();

    assert_eq!(api.booking_calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.get(StorageScope::Local, keys::CURRENT_BOOKING_DATA).await.unwrap(), None);
}

#[tokio::test]
async fn checkout_persists_context_and_returns_gateway_link() {
    let store = MemoryStore::new();
    let api = FakeSeatApi::new();
    let bus = BusConfig {
        bus_id: "42".to_string(),
        rows: 1,
        seats_per_row: 3,
        aisle_after: None,
        special_seats: 0,
        fare: None,
    };
    let layout = initialize_layout(&bus);
    let selection = SelectionState::from_ids(["A1", "A3"]);

    let mut coordinator = new_coordinator(api.clone(), &store, clock());
    let handoff = coordinator
        .begin_checkout(
            trip(),
            &selection,
            &layout,
            bus.price_per_seat(),
            vec![PassengerDraft::default()],
        )
        .await
        .unwrap();

    assert_eq!(coordinator.phase(), BookingPhase::AwaitingGateway);
    assert_eq!(handoff.amount, 2000);
    assert!(handoff.redirect_url.ends_with(&handoff.merchant_txn_id));

    let stored = BookingStorage::new(Arc::new(store.clone()))
        .load_pending()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.selected_seats, vec!["A1", "A3"]);
    assert_eq!(stored.merchant_txn_id.as_deref(), Some(handoff.merchant_txn_id.as_str()));
    assert_eq!(stored.total_amount, 2000);
}

#[tokio::test]
async fn checkout_refuses_empty_or_booked_selection() {
    let store = MemoryStore::new();
    let api = FakeSeatApi::new();
    let bus = BusConfig {
        bus_id: "42".to_string(),
        rows: 1,
        seats_per_row: 3,
        aisle_after: None,
        special_seats: 0,
        fare: Some(1500),
    };
    let selection = SelectionState::from_ids(["A2"]);
    let layout = apply_booked_seats(
        &initialize_layout(&bus),
        &BTreeSet::from(["A2".to_string()]),
        &selection,
    );

    let mut coordinator = new_coordinator(api.clone(), &store, clock());
    let err = coordinator
        .begin_checkout(trip(), &SelectionState::new(), &layout, 1500, vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::EmptySelection));

    let err = coordinator
        .begin_checkout(trip(), &selection, &layout, 1500, vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::SeatUnavailable { ref seat_id } if seat_id == "A2"));
    assert_eq!(api.init_calls.load(Ordering::SeqCst), 0);
    assert_eq!(coordinator.phase(), BookingPhase::Idle);
}

#[tokio::test]
async fn retry_releases_ledger_and_reuses_stored_context() {
    let store = MemoryStore::new();
    let api = FakeSeatApi::new();
    api.set_payment_ok(false);
    with_pending(&store, "TXN1").await;

    let mut coordinator = new_coordinator(api.clone(), &store, clock());
    coordinator.reconcile(&callback("TXN1")).await.unwrap_err();
    assert!(used_ids(&store).await.get("TXN1").is_some());

    let handoff = coordinator.retry_payment("TXN1").await.unwrap();
    assert_ne!(handoff.merchant_txn_id, "TXN1");
    assert_eq!(handoff.amount, 1000);
    assert_eq!(coordinator.phase(), BookingPhase::AwaitingGateway);
    assert!(used_ids(&store).await.get("TXN1").is_none());

    let stored = BookingStorage::new(Arc::new(store.clone()))
        .load_pending()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.merchant_txn_id.as_deref(), Some(handoff.merchant_txn_id.as_str()));
}

#[tokio::test]
async fn retry_without_context_asks_to_restart() {
    let store = MemoryStore::new();
    let mut coordinator = new_coordinator(FakeSeatApi::new(), &store, clock());
    let err = coordinator.retry_payment("TXN1").await.unwrap_err();
    assert!(matches!(err, BookingError::MissingBookingContext));
    assert_eq!(err.retry_action(), RetryAction::RestartSearch);
}

#[tokio::test]
async fn retry_after_success_keeps_transaction_used() {
    let store = MemoryStore::new();
    let api = FakeSeatApi::new();
    with_pending(&store, "TXN1").await;

    let mut coordinator = new_coordinator(api.clone(), &store, clock());
    coordinator.reconcile(&callback("TXN1")).await.unwrap();

    let err = coordinator.retry_payment("TXN1").await.unwrap_err();
    assert!(matches!(err, BookingError::MissingBookingContext));
    assert!(used_ids(&store).await.get("TXN1").is_some());

    // Повторный колбэк с тем же идентификатором отсекается журналом.
    let err = coordinator.reconcile(&callback("TXN1")).await.unwrap_err();
    assert!(matches!(err, BookingError::DuplicateTransaction { .. }));
    assert_eq!(api.booking_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn retry_for_foreign_transaction_leaves_ledger_alone() {
    let store = MemoryStore::new();
    let api = FakeSeatApi::new();
    api.set_payment_ok(false);
    with_pending(&store, "TXN2").await;
    let now = clock().now_millis();
    store
        .set(StorageScope::Local, keys::USED_TRANSACTION_IDS, &format!("{{\"TXN1\":{}}}", now))
        .await
        .unwrap();

    let mut coordinator = new_coordinator(api.clone(), &store, clock());
    let err = coordinator.retry_payment("TXN1").await.unwrap_err();

    assert!(matches!(err, BookingError::MissingBookingContext));
    assert!(used_ids(&store).await.get("TXN1").is_some());
    assert_eq!(api.init_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn retry_after_submitted_booking_keeps_ledger_entry() {
    let store = MemoryStore::new();
    let api = FakeSeatApi::new();
    api.push_booking(Ok(booking_failed("bus not found")));
    with_pending(&store, "TXN1").await;

    let mut coordinator = new_coordinator(api.clone(), &store, clock());
    let err = coordinator.reconcile(&callback("TXN1")).await.unwrap_err();
    assert_eq!(err.retry_action(), RetryAction::RetryPayment);

    let handoff = coordinator.retry_payment("TXN1").await.unwrap();
    assert_ne!(handoff.merchant_txn_id, "TXN1");
    assert!(used_ids(&store).await.get("TXN1").is_some());

    let err = coordinator.reconcile(&callback("TXN1")).await.unwrap_err();
    assert!(matches!(err, BookingError::DuplicateTransaction { .. }));
    assert_eq!(api.booking_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn callback_from_other_tab_does_not_book_its_context() {
    let store = MemoryStore::new();
    let api = FakeSeatApi::new();
    // Во второй вкладке ждёт оплаты другая транзакция.
    let other_tab = store.new_tab();
    with_pending(&other_tab, "TXN2").await;

    let mut coordinator = new_coordinator(api.clone(), &other_tab, clock());
    let err = coordinator.reconcile(&callback("TXN1")).await.unwrap_err();

    assert!(matches!(err, BookingError::MissingBookingContext));
    assert_eq!(coordinator.phase(), BookingPhase::BookingError);
    assert_eq!(api.booking_calls.load(Ordering::SeqCst), 0);
    assert!(other_tab
        .get(StorageScope::Session, keys::PENDING_BOOKING)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn unauthorized_payment_initiation_redirects_to_login() {
    let store = MemoryStore::new();
    let api = FakeSeatApi::new();
    api.set_unauthorized_init(true);
    let clock = clock();
    guard(&store, clock.clone()).store_token("token-1").await.unwrap();
    let bus = BusConfig {
        bus_id: "42".to_string(),
        rows: 1,
        seats_per_row: 3,
        aisle_after: None,
        special_seats: 0,
        fare: Some(1000),
    };

    let mut coordinator = new_coordinator(api.clone(), &store, clock.clone());
    let err = coordinator
        .begin_checkout(
            trip(),
            &SelectionState::from_ids(["A1"]),
            &initialize_layout(&bus),
            1000,
            vec![PassengerDraft::default()],
        )
        .await
        .unwrap_err();

    assert!(matches!(err, BookingError::AuthenticationRequired { ref return_path } if return_path == "/booking/checkout"));
    assert!(!guard(&store, clock).is_authenticated().await.unwrap());
    assert_eq!(
        store.get(StorageScope::Local, keys::RETURN_PATH).await.unwrap().as_deref(),
        Some("/booking/checkout")
    );
}

#[tokio::test]
async fn unauthorized_status_check_can_be_reconciled_after_login() {
    let store = MemoryStore::new();
    let api = FakeSeatApi::new();
    api.set_unauthorized_status(true);
    let clock = clock();
    let session = guard(&store, clock.clone());
    session.store_token("token-1").await.unwrap();
    with_pending(&store, "TXN1").await;

    let mut coordinator = new_coordinator(api.clone(), &store, clock);
    let err = coordinator.reconcile(&callback("TXN1")).await.unwrap_err();

    let BookingError::AuthenticationRequired { return_path } = err else {
        panic!("expected login redirect");
    };
    assert_eq!(return_path, "/payment/callback?MerchantTxnId=TXN1&GatewayTxnId=GW1");
    assert_eq!(CallbackParams::from_query(return_path.split_once('?').unwrap().1), Some(callback("TXN1")));
    assert!(!session.is_authenticated().await.unwrap());
    assert!(used_ids(&store).await.get("TXN1").is_none());
    assert_eq!(api.booking_calls.load(Ordering::SeqCst), 0);

    session.store_token("token-2").await.unwrap();
    api.set_unauthorized_status(false);
    let receipt = coordinator.reconcile(&callback("TXN1")).await.unwrap();
    assert_eq!(receipt.transaction_id, "TXN1");
    assert_eq!(api.booking_calls.load(Ordering::SeqCst), 1);
}
