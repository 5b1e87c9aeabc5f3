//! Защита от повторного использования платёжной транзакции.
//!
//! Хранилище браузера не даёт атомарного compare-and-set, поэтому обе структуры работают
//! по принципу "сначала занять, потом использовать" и закрывают гонку только в пределах
//! одной вкладки. Две вкладки, одновременно обрабатывающие один и тот же редирект,
//! теоретически могут обе пройти проверку.

use chrono::Duration;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{get_json, keys, set_json, KeyValueStore, StorageError, StorageScope};
use crate::clock::Clock;

/// Окно, в течение которого идентификатор транзакции считается использованным.
pub fn reuse_window() -> Duration {
    Duration::hours(24)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed,
    AlreadyUsed { first_used_at: i64 },
}

/// `merchantTxnId -> epoch-ms первого использования`, ключ `usedTransactionIds` (local).
#[derive(Clone)]
pub struct UsedTransactionLedger {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
}

impl UsedTransactionLedger {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    async fn load(&self) -> Result<BTreeMap<String, i64>, StorageError> {
        match get_json(self.store.as_ref(), StorageScope::Local, keys::USED_TRANSACTION_IDS).await {
            Ok(map) => Ok(map.unwrap_or_default()),
            Err(StorageError::Malformed { .. }) => {
                warn!("usedTransactionIds is malformed, starting a fresh ledger");
                Ok(BTreeMap::new())
            }
            Err(e) => Err(e),
        }
    }

    async fn save(&self, entries: &BTreeMap<String, i64>) -> Result<(), StorageError> {
        set_json(self.store.as_ref(), StorageScope::Local, keys::USED_TRANSACTION_IDS, entries).await
    }

    /// Загружает журнал, удаляя записи старше 24 часов.
    async fn load_pruned(&self) -> Result<BTreeMap<String, i64>, StorageError> {
        let mut entries = self.load().await?;
        let cutoff = self.clock.now_millis() - reuse_window().num_milliseconds();
        let before = entries.len();
        entries.retain(|_, used_at| *used_at >= cutoff);

        if entries.len() != before {
            debug!("Pruned {} expired transaction ids", before - entries.len());
            self.save(&entries).await?;
        }
        Ok(entries)
    }

    /// Проверяет идентификатор и сразу же занимает его, если он свободен.
    pub async fn check_and_claim(&self, merchant_txn_id: &str) -> Result<ClaimOutcome, StorageError> {
        let mut entries = self.load_pruned().await?;

        if let Some(first_used_at) = entries.get(merchant_txn_id) {
            return Ok(ClaimOutcome::AlreadyUsed { first_used_at: *first_used_at });
        }

        entries.insert(merchant_txn_id.to_string(), self.clock.now_millis());
        self.save(&entries).await?;
        Ok(ClaimOutcome::Claimed)
    }

    pub async fn contains(&self, merchant_txn_id: &str) -> Result<bool, StorageError> {
        Ok(self.load_pruned().await?.contains_key(merchant_txn_id))
    }

    /// Освобождает идентификатор перед повторной попыткой оплаты.
    pub async fn release(&self, merchant_txn_id: &str) -> Result<(), StorageError> {
        let mut entries = self.load().await?;
        if entries.remove(merchant_txn_id).is_some() {
            self.save(&entries).await?;
        }
        Ok(())
    }
}

/// Транзакции, по которым в этой вкладке уже отправлялось бронирование (`attemptedBookings`, session).
#[derive(Clone)]
pub struct AttemptedBookings {
    store: Arc<dyn KeyValueStore>,
}

impl AttemptedBookings {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    async fn load(&self) -> Result<Vec<String>, StorageError> {
        match get_json(self.store.as_ref(), StorageScope::Session, keys::ATTEMPTED_BOOKINGS).await {
            Ok(ids) => Ok(ids.unwrap_or_default()),
            Err(StorageError::Malformed { .. }) => {
                warn!("attemptedBookings is malformed, resetting");
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn contains(&self, merchant_txn_id: &str) -> Result<bool, StorageError> {
        Ok(self.load().await?.iter().any(|id| id == merchant_txn_id))
    }

    /// Возвращает `false`, если попытка по этой транзакции уже была.
    pub async fn check_and_record(&self, merchant_txn_id: &str) -> Result<bool, StorageError> {
        let mut ids = self.load().await?;
        if ids.iter().any(|id| id == merchant_txn_id) {
            return Ok(false);
        }
        ids.push(merchant_txn_id.to_string());
        set_json(self.store.as_ref(), StorageScope::Session, keys::ATTEMPTED_BOOKINGS, &ids).await?;
        Ok(true)
    }
}
