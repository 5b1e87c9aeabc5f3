//! Доставка изменений `local` области другим вкладкам профиля.
//!
//! In-memory хранилище рассылает события через свой broadcast-канал. Redis публикует их
//! в общий pub/sub канал, откуда [`relay_redis_events`] переносит их в процесс.

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use super::StorageEvent;
use crate::redis_client::RedisClient;

pub const EVENT_CAPACITY: usize = 256;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Событие хранилища вместе с профилем, к которому оно относится.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientStorageEvent {
    pub client_id: String,
    pub event: StorageEvent,
}

pub fn events_channel(prefix: &str) -> String {
    format!("{}:storage-events", prefix)
}

/// Поток событий для одной вкладки: только её профиль, без её собственных изменений.
pub enum EventFeed {
    Profile {
        events: broadcast::Receiver<StorageEvent>,
        tab_id: String,
    },
    Shared {
        events: broadcast::Receiver<ClientStorageEvent>,
        client_id: String,
        tab_id: String,
    },
}

async fn recv<T: Clone>(rx: &mut broadcast::Receiver<T>) -> Option<T> {
    loop {
        match rx.recv().await {
            Ok(value) => return Some(value),
            Err(RecvError::Lagged(skipped)) => warn!("Storage event feed skipped {} events", skipped),
            Err(RecvError::Closed) => return None,
        }
    }
}

impl EventFeed {
    /// `None`, когда источник событий закрыт.
    pub async fn next(&mut self) -> Option<StorageEvent> {
        loop {
            let (event, tab_id) = match self {
                EventFeed::Profile { events, tab_id } => (recv(events).await?, tab_id.as_str()),
                EventFeed::Shared {
                    events,
                    client_id,
                    tab_id,
                } => {
                    let shared = recv(events).await?;
                    if shared.client_id != *client_id {
                        continue;
                    }
                    (shared.event, tab_id.as_str())
                }
            };
            if event.source_tab.as_deref() != Some(tab_id) {
                return Some(event);
            }
        }
    }
}

/// Слушает pub/sub канал Redis и пересылает события в `sink`. После обрыва переподключается.
pub async fn relay_redis_events(
    redis: RedisClient,
    prefix: String,
    sink: broadcast::Sender<ClientStorageEvent>,
) {
    let channel = events_channel(&prefix);
    loop {
        match relay_once(&redis, &channel, &sink).await {
            Ok(()) => warn!("Redis storage event subscription on {} ended", channel),
            Err(e) => warn!("Redis storage event subscription on {} failed: {}", channel, e),
        }
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

async fn relay_once(
    redis: &RedisClient,
    channel: &str,
    sink: &broadcast::Sender<ClientStorageEvent>,
) -> redis::RedisResult<()> {
    let mut pubsub = redis.client.get_async_pubsub().await?;
    pubsub.subscribe(channel).await?;
    info!("Subscribed to storage events on {}", channel);

    let mut messages = std::pin::pin!(pubsub.on_message());
    while let Some(message) = messages.next().await {
        let payload: String = match message.get_payload() {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Unreadable storage event payload: {}", e);
                continue;
            }
        };
        match serde_json::from_str::<ClientStorageEvent>(&payload) {
            Ok(event) => {
                // Нет подписанных вкладок - не ошибка.
                let _ = sink.send(event);
            }
            Err(e) => debug!("Ignoring malformed storage event: {}", e),
        }
    }
    Ok(())
}
