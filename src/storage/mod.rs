//! Хранилище состояния клиента.
//!
//! Моделирует браузерные `localStorage` (переживает перезагрузку и уход на шлюз) и
//! `sessionStorage` (живёт, пока открыта вкладка) как единый key/value интерфейс с
//! областью видимости [`StorageScope`].

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

pub mod events;
pub mod ledger;
pub mod memory;
pub mod redis_store;
pub mod schema;

pub use events::{ClientStorageEvent, EventFeed};
pub use ledger::{AttemptedBookings, UsedTransactionLedger};
pub use memory::MemoryStore;
pub use redis_store::RedisStore;
pub use schema::BookingStorage;

/// Известные ключи хранилища.
pub mod keys {
    pub const AUTH_TOKEN: &str = "authToken";
    pub const TOKEN_EXPIRY: &str = "tokenExpiry";
    pub const PENDING_BOOKING: &str = "pendingBooking";
    pub const CURRENT_BOOKING_DATA: &str = "currentBookingData";
    pub const REDIRECT_AFTER_LOGIN: &str = "redirectAfterLogin";
    pub const USED_TRANSACTION_IDS: &str = "usedTransactionIds";
    pub const ATTEMPTED_BOOKINGS: &str = "attemptedBookings";
    pub const RETURN_PATH: &str = "returnPath";
    pub const LOGOUT_IN_PROGRESS: &str = "logoutInProgress";
    pub const SCHEMA_VERSION: &str = "storageSchemaVersion";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageScope {
    /// Постоянное хранилище профиля браузера.
    Local,
    /// Хранилище текущей вкладки.
    Session,
}

impl StorageScope {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageScope::Local => "local",
            StorageScope::Session => "session",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("stored value under '{key}' is malformed: {source}")]
    Malformed {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("could not serialize value for '{key}': {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl From<redis::RedisError> for StorageError {
    fn from(err: redis::RedisError) -> Self {
        StorageError::Backend(err.to_string())
    }
}

/// Изменение ключа, видимое другим вкладкам того же профиля (аналог события `storage`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageEvent {
    pub scope: StorageScope,
    pub key: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    /// Вкладка, которая сделала изменение. Сама она события не получает.
    #[serde(default)]
    pub source_tab: Option<String>,
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, scope: StorageScope, key: &str) -> Result<Option<String>, StorageError>;
    async fn set(&self, scope: StorageScope, key: &str, value: &str) -> Result<(), StorageError>;
    async fn remove(&self, scope: StorageScope, key: &str) -> Result<(), StorageError>;
}

pub async fn get_json<T, S>(store: &S, scope: StorageScope, key: &str) -> Result<Option<T>, StorageError>
where
    T: DeserializeOwned,
    S: KeyValueStore + ?Sized,
{
    match store.get(scope, key).await? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| StorageError::Malformed { key: key.to_string(), source }),
        None => Ok(None),
    }
}

pub async fn set_json<T, S>(store: &S, scope: StorageScope, key: &str, value: &T) -> Result<(), StorageError>
where
    T: Serialize + ?Sized,
    S: KeyValueStore + ?Sized,
{
    let raw = serde_json::to_string(value)
        .map_err(|source| StorageError::Serialize { key: key.to_string(), source })?;
    store.set(scope, key, &raw).await
}
