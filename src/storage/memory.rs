use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;

use super::{KeyValueStore, StorageError, StorageEvent, StorageScope};

const EVENT_CAPACITY: usize = 64;

type Map = Arc<RwLock<HashMap<String, String>>>;

/// In-memory хранилище. Вкладки одного профиля делят `local` и канал событий,
/// у каждой вкладки своя `session` область.
#[derive(Clone)]
pub struct MemoryStore {
    local: Map,
    session: Map,
    events: broadcast::Sender<StorageEvent>,
    tab_id: Option<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            local: Arc::default(),
            session: Arc::default(),
            events,
            tab_id: None,
        }
    }

    /// Новая вкладка того же профиля.
    pub fn new_tab(&self) -> Self {
        Self {
            local: self.local.clone(),
            session: Arc::default(),
            events: self.events.clone(),
            tab_id: None,
        }
    }

    /// Идентификатор вкладки попадает в её события.
    pub fn named(mut self, tab_id: impl Into<String>) -> Self {
        self.tab_id = Some(tab_id.into());
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.events.subscribe()
    }

    fn map(&self, scope: StorageScope) -> &Map {
        match scope {
            StorageScope::Local => &self.local,
            StorageScope::Session => &self.session,
        }
    }

    fn poisoned() -> StorageError {
        StorageError::Backend("memory store lock poisoned".to_string())
    }

    fn notify(&self, scope: StorageScope, key: &str, old_value: Option<String>, new_value: Option<String>) {
        // События получают только другие вкладки и только для общей области.
        if scope != StorageScope::Local || old_value == new_value {
            return;
        }
        let _ = self.events.send(StorageEvent {
            scope,
            key: key.to_string(),
            old_value,
            new_value,
            source_tab: self.tab_id.clone(),
        });
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, scope: StorageScope, key: &str) -> Result<Option<String>, StorageError> {
        let map = self.map(scope).read().map_err(|_| Self::poisoned())?;
        Ok(map.get(key).cloned())
    }

    async fn set(&self, scope: StorageScope, key: &str, value: &str) -> Result<(), StorageError> {
        let old = {
            let mut map = self.map(scope).write().map_err(|_| Self::poisoned())?;
            map.insert(key.to_string(), value.to_string())
        };
        self.notify(scope, key, old, Some(value.to_string()));
        Ok(())
    }

    async fn remove(&self, scope: StorageScope, key: &str) -> Result<(), StorageError> {
        let old = {
            let mut map = self.map(scope).write().map_err(|_| Self::poisoned())?;
            map.remove(key)
        };
        self.notify(scope, key, old, None);
        Ok(())
    }
}
