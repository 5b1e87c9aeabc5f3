use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::warn;

use super::events::{events_channel, ClientStorageEvent};
use super::{KeyValueStore, StorageError, StorageEvent, StorageScope};
use crate::redis_client::RedisClient;

/// Хранилище на Redis для сервиса: `local` привязан к профилю клиента,
/// `session` к вкладке и живёт ограниченное время. Изменения `local` публикуются
/// в канал событий для соседних вкладок.
#[derive(Clone)]
pub struct RedisStore {
    redis: RedisClient,
    prefix: String,
    client_id: String,
    tab_id: String,
    session_ttl_seconds: u64,
}

impl RedisStore {
    pub fn new(
        redis: RedisClient,
        prefix: impl Into<String>,
        client_id: impl Into<String>,
        tab_id: impl Into<String>,
        session_ttl_seconds: u64,
    ) -> Self {
        Self {
            redis,
            prefix: prefix.into(),
            client_id: client_id.into(),
            tab_id: tab_id.into(),
            session_ttl_seconds,
        }
    }

    fn scope_prefix(&self, scope: StorageScope) -> String {
        scope_prefix(&self.prefix, &self.client_id, &self.tab_id, scope)
    }

    fn full_key(&self, scope: StorageScope, key: &str) -> String {
        format!("{}{}", self.scope_prefix(scope), key)
    }

    async fn publish(&self, key: &str, old_value: Option<String>, new_value: Option<String>) {
        if old_value == new_value {
            return;
        }
        let event = ClientStorageEvent {
            client_id: self.client_id.clone(),
            event: StorageEvent {
                scope: StorageScope::Local,
                key: key.to_string(),
                old_value,
                new_value,
                source_tab: Some(self.tab_id.clone()),
            },
        };
        let payload = match serde_json::to_string(&event) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Could not encode storage event for {}: {}", key, e);
                return;
            }
        };
        let mut conn = self.redis.conn.clone();
        // Значение уже записано; потерянное событие не откатывает запись.
        if let Err(e) = conn.publish::<_, _, i64>(events_channel(&self.prefix), payload).await {
            warn!("Could not publish storage event for {}: {}", key, e);
        }
    }
}

// bus:{client}:local:{key} / bus:{client}:tab:{tab}:{key}
fn scope_prefix(prefix: &str, client_id: &str, tab_id: &str, scope: StorageScope) -> String {
    match scope {
        StorageScope::Local => format!("{}:{}:local:", prefix, client_id),
        StorageScope::Session => format!("{}:{}:tab:{}:", prefix, client_id, tab_id),
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, scope: StorageScope, key: &str) -> Result<Option<String>, StorageError> {
        let mut conn = self.redis.conn.clone();
        let value: Option<String> = conn.get(self.full_key(scope, key)).await?;
        Ok(value)
    }

    async fn set(&self, scope: StorageScope, key: &str, value: &str) -> Result<(), StorageError> {
        let mut conn = self.redis.conn.clone();
        let full_key = self.full_key(scope, key);
        match scope {
            StorageScope::Local => {
                let old: Option<String> = conn.get(&full_key).await?;
                let _: () = conn.set(&full_key, value).await?;
                self.publish(key, old, Some(value.to_string())).await;
            }
            // Вкладку нельзя "закрыть" на стороне сервера, поэтому session-ключи истекают сами.
            StorageScope::Session => {
                let _: () = conn.set_ex(full_key, value, self.session_ttl_seconds).await?;
            }
        }
        Ok(())
    }

    async fn remove(&self, scope: StorageScope, key: &str) -> Result<(), StorageError> {
        let mut conn = self.redis.conn.clone();
        let full_key = self.full_key(scope, key);
        if scope == StorageScope::Local {
            let old: Option<String> = conn.get(&full_key).await?;
            let _: () = conn.del(&full_key).await?;
            self.publish(key, old, None).await;
        } else {
            let _: () = conn.del(&full_key).await?;
        }
        Ok(())
    }
}
