//! Версионированная схема хранения контекста бронирования.
//!
//! Каноническое место - `pendingBooking` в session-области, значение обёрнуто в
//! конверт с номером версии. Старые клиенты писали контекст без конверта и в разные
//! ключи (`pendingBooking`, `currentBookingData`, `redirectAfterLogin`); при первой
//! загрузке выполняется однократная миграция в канонический ключ.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{get_json, keys, set_json, KeyValueStore, StorageError, StorageScope};
use crate::models::PendingBookingContext;

pub const SCHEMA_VERSION: u32 = 2;

/// Старые ключи в порядке приоритета поиска.
const LEGACY_KEYS: [(StorageScope, &str); 3] = [
    (StorageScope::Session, keys::PENDING_BOOKING),
    (StorageScope::Local, keys::CURRENT_BOOKING_DATA),
    (StorageScope::Local, keys::REDIRECT_AFTER_LOGIN),
];

#[derive(Debug, Serialize, Deserialize)]
struct PendingEnvelope {
    version: u32,
    context: PendingBookingContext,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StoredPending {
    Envelope(PendingEnvelope),
    Legacy(PendingBookingContext),
}

impl StoredPending {
    fn into_context(self) -> Option<PendingBookingContext> {
        let context = match self {
            StoredPending::Envelope(envelope) => envelope.context,
            StoredPending::Legacy(context) => context,
        };
        // `redirectAfterLogin` иногда хранит не бронирование, а произвольный объект.
        if context.selected_seats.is_empty() && context.passengers.is_empty() {
            return None;
        }
        Some(context)
    }
}

#[derive(Clone)]
pub struct BookingStorage {
    store: Arc<dyn KeyValueStore>,
}

impl BookingStorage {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    async fn read_context(&self, scope: StorageScope, key: &str) -> Option<PendingBookingContext> {
        match get_json::<StoredPending, _>(self.store.as_ref(), scope, key).await {
            Ok(stored) => stored.and_then(StoredPending::into_context),
            Err(e) => {
                debug!("Ignoring unreadable booking context under '{}': {}", key, e);
                None
            }
        }
    }

    /// Однократный перенос контекста из старых ключей. Возвращает `true`, если миграция выполнялась.
    pub async fn migrate(&self) -> Result<bool, StorageError> {
        let version: Option<u32> = get_json(self.store.as_ref(), StorageScope::Local, keys::SCHEMA_VERSION)
            .await
            .unwrap_or(None);
        if version.unwrap_or(0) >= SCHEMA_VERSION {
            return Ok(false);
        }

        let mut migrated = None;
        for (scope, key) in LEGACY_KEYS {
            if let Some(context) = self.read_context(scope, key).await {
                info!("Migrating pending booking context from {:?}/{}", scope, key);
                migrated = Some(context);
                break;
            }
        }

        // Старые ключи больше не читаются; контекст из них либо перенесён, либо устарел.
        for (scope, key) in LEGACY_KEYS.iter().skip(1) {
            if self.read_context(*scope, key).await.is_some() {
                self.store.remove(*scope, key).await?;
            }
        }

        if let Some(context) = migrated {
            self.save_pending(&context).await?;
        }
        set_json(self.store.as_ref(), StorageScope::Local, keys::SCHEMA_VERSION, &SCHEMA_VERSION).await?;
        Ok(true)
    }

    pub async fn save_pending(&self, context: &PendingBookingContext) -> Result<(), StorageError> {
        let envelope = PendingEnvelope {
            version: SCHEMA_VERSION,
            context: context.clone(),
        };
        set_json(self.store.as_ref(), StorageScope::Session, keys::PENDING_BOOKING, &envelope).await
    }

    pub async fn load_pending(&self) -> Result<Option<PendingBookingContext>, StorageError> {
        if let Err(e) = self.migrate().await {
            warn!("Storage migration failed: {}", e);
        }
        Ok(self.read_context(StorageScope::Session, keys::PENDING_BOOKING).await)
    }

    /// Удаляет контекст из канонического и всех старых ключей.
    pub async fn clear_pending(&self) -> Result<(), StorageError> {
        for (scope, key) in LEGACY_KEYS {
            self.store.remove(scope, key).await?;
        }
        Ok(())
    }
}
