pub mod clock;
pub mod config;
pub mod controllers;
pub mod error;
pub mod middleware;
pub mod models;
pub mod redis_client;
pub mod services;
pub mod storage;

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::time::Instant;
use tracing::{debug, info};

use clock::{Clock, SystemClock};
use middleware::ClientContext;
use services::api_client::{AuthorizedSeatApi, HttpSeatApi, SeatApi};
use services::availability::AvailabilityRefresher;
use services::payment::PaymentCoordinator;
use services::seat_session::SeatSession;
use services::session::{AuthRedirect, PageTier, SessionGuard, TabWatch};
use storage::events::{relay_redis_events, EVENT_CAPACITY};
use storage::{ClientStorageEvent, EventFeed, KeyValueStore, MemoryStore, RedisStore, StorageEvent};

/// Путь экрана выбора мест; сохраняется как путь возврата после входа.
pub const SEAT_SELECTION_PATH: &str = "/booking/seats";
/// Путь оформления; сохраняется как путь возврата после входа.
pub const CHECKOUT_PATH: &str = "/booking/checkout";
/// Возврат с платёжного шлюза.
pub const CALLBACK_PATH: &str = "/payment/callback";

type TabKey = (String, String);

fn tab_key(client: &ClientContext) -> TabKey {
    (client.client_id.clone(), client.tab_id.clone())
}

struct MemoryTab {
    store: MemoryStore,
    touched: Instant,
}

/// In-memory профили клиентов. `local` профиля переживает закрытие всех его вкладок,
/// вкладки без обращений удаляются.
#[derive(Default)]
pub struct MemoryProfiles {
    profiles: HashMap<String, MemoryStore>,
    tabs: HashMap<TabKey, MemoryTab>,
}

impl MemoryProfiles {
    fn tab(&mut self, client_id: &str, tab_id: &str) -> MemoryStore {
        let now = Instant::now();
        let key = (client_id.to_string(), tab_id.to_string());
        if let Some(tab) = self.tabs.get_mut(&key) {
            tab.touched = now;
            return tab.store.clone();
        }
        // Новая вкладка делит `local` с остальными вкладками профиля.
        let store = self.profile(client_id).new_tab().named(tab_id);
        self.tabs.insert(key, MemoryTab { store: store.clone(), touched: now });
        store
    }

    fn profile(&mut self, client_id: &str) -> &MemoryStore {
        self.profiles.entry(client_id.to_string()).or_default()
    }

    fn subscribe(&mut self, client_id: &str) -> broadcast::Receiver<StorageEvent> {
        self.profile(client_id).subscribe()
    }

    fn evict_idle(&mut self, idle: Duration, now: Instant) -> usize {
        let before = self.tabs.len();
        self.tabs.retain(|_, tab| now.duration_since(tab.touched) < idle);
        before - self.tabs.len()
    }
}

/// Где живёт состояние клиентов.
pub enum StoreBackend {
    Redis(redis_client::RedisClient),
    /// Для тестов и локального запуска без Redis.
    Memory(StdMutex<MemoryProfiles>),
}

/// Серверное состояние открытой вкладки.
struct TabEntry {
    seats: Option<SeatSession>,
    watch: Option<TabWatch>,
    touched: Instant,
}

impl TabEntry {
    fn new() -> Self {
        Self {
            seats: None,
            watch: None,
            touched: Instant::now(),
        }
    }
}

// Shared state для всего приложения
pub struct AppState {
    pub config: config::Config,
    pub backend: StoreBackend,
    pub http_api: HttpSeatApi,
    pub clock: Arc<dyn Clock>,
    tabs: Mutex<HashMap<TabKey, TabEntry>>,
    storage_events: broadcast::Sender<ClientStorageEvent>,
}

impl AppState {
    pub async fn new(config: config::Config) -> anyhow::Result<Arc<Self>> {
        let redis = redis_client::RedisClient::new(&config.redis.url).await?;
        let http_api = HttpSeatApi::from_config(&config.remote_api)?;
        let prefix = config.redis.key_prefix.clone();
        let state = Arc::new(Self::with_parts(
            config,
            StoreBackend::Redis(redis.clone()),
            http_api,
            Arc::new(SystemClock),
        ));
        tokio::spawn(relay_redis_events(redis, prefix, state.storage_events.clone()));
        Ok(state)
    }

    pub fn with_parts(
        config: config::Config,
        backend: StoreBackend,
        http_api: HttpSeatApi,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (storage_events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            config,
            backend,
            http_api,
            clock,
            tabs: Mutex::new(HashMap::new()),
            storage_events,
        }
    }

    fn memory(profiles: &StdMutex<MemoryProfiles>) -> std::sync::MutexGuard<'_, MemoryProfiles> {
        match profiles.lock() {
            Ok(profiles) => profiles,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Хранилище вкладки клиента.
    pub fn store_for(&self, client: &ClientContext) -> Arc<dyn KeyValueStore> {
        match &self.backend {
            StoreBackend::Redis(redis) => Arc::new(RedisStore::new(
                redis.clone(),
                self.config.redis.key_prefix.clone(),
                client.client_id.clone(),
                client.tab_id.clone(),
                self.config.redis.session_ttl_seconds,
            )),
            StoreBackend::Memory(profiles) => {
                Arc::new(Self::memory(profiles).tab(&client.client_id, &client.tab_id))
            }
        }
    }

    /// События `local` области от других вкладок того же профиля.
    fn event_feed(&self, client: &ClientContext) -> EventFeed {
        match &self.backend {
            StoreBackend::Redis(_) => EventFeed::Shared {
                events: self.storage_events.subscribe(),
                client_id: client.client_id.clone(),
                tab_id: client.tab_id.clone(),
            },
            StoreBackend::Memory(profiles) => EventFeed::Profile {
                events: Self::memory(profiles).subscribe(&client.client_id),
                tab_id: client.tab_id.clone(),
            },
        }
    }

    pub fn guard_for(&self, client: &ClientContext) -> SessionGuard {
        SessionGuard::new(
            self.store_for(client),
            self.clock.clone(),
            self.config.session.clone(),
            self.config.booking.login_path.clone(),
        )
    }

    pub fn api_for(&self, client: &ClientContext) -> Arc<dyn SeatApi> {
        Arc::new(AuthorizedSeatApi::new(self.http_api.clone(), self.guard_for(client)))
    }

    pub fn coordinator_for(&self, client: &ClientContext) -> PaymentCoordinator {
        PaymentCoordinator::new(
            self.api_for(client),
            self.store_for(client),
            self.clock.clone(),
            self.guard_for(client),
        )
    }

    pub fn refresher_for(&self, client: &ClientContext) -> AvailabilityRefresher {
        AvailabilityRefresher::new(
            self.api_for(client),
            self.guard_for(client),
            self.config.booking.debounce(),
            SEAT_SELECTION_PATH,
        )
    }

    /// Экран выбора мест вкладки. Пересоздаётся, если сменился автобус или его тариф.
    pub async fn with_seat_session<R>(
        &self,
        client: &ClientContext,
        bus_id: &str,
        fare: Option<i64>,
        f: impl FnOnce(&mut SeatSession) -> R,
    ) -> R {
        let bus = self.config.booking.bus_config(bus_id, fare);

        let mut tabs = self.tabs.lock().await;
        let entry = tabs.entry(tab_key(client)).or_insert_with(TabEntry::new);
        entry.touched = Instant::now();
        if entry.seats.as_ref().is_some_and(|session| *session.bus() != bus) {
            info!("Bus configuration changed for tab {}, resetting selection", client.tab_id);
            entry.seats = None;
        }
        let session = entry.seats.get_or_insert_with(|| {
            info!("Opening seat selection for bus {} (tab {})", bus.bus_id, client.tab_id);
            SeatSession::new(bus, self.refresher_for(client))
        });
        f(session)
    }

    /// Уже открытый экран выбора мест вкладки.
    pub async fn existing_seat_session<R>(
        &self,
        client: &ClientContext,
        f: impl FnOnce(&mut SeatSession) -> R,
    ) -> Option<R> {
        let mut tabs = self.tabs.lock().await;
        let entry = tabs.get_mut(&tab_key(client))?;
        entry.touched = Instant::now();
        entry.seats.as_mut().map(f)
    }

    /// Уход со страницы: выбор сбрасывается, опрос останавливается.
    pub async fn close_seat_session(&self, client: &ClientContext) -> bool {
        let mut tabs = self.tabs.lock().await;
        tabs.get_mut(&tab_key(client))
            .and_then(|entry| {
                entry.touched = Instant::now();
                entry.seats.take()
            })
            .is_some()
    }

    /// Наблюдение за сессией на странице `path`. Возвращает редирект, найденный
    /// с прошлого запроса вкладки: истёкший токен или выход в соседней вкладке.
    pub async fn watch_session(
        &self,
        client: &ClientContext,
        tier: PageTier,
        path: &str,
    ) -> Option<AuthRedirect> {
        let mut tabs = self.tabs.lock().await;
        let entry = tabs.entry(tab_key(client)).or_insert_with(TabEntry::new);
        entry.touched = Instant::now();

        let moved = entry
            .watch
            .as_ref()
            .is_some_and(|watch| watch.tier() != tier || watch.path() != path);
        let carried = if moved || tier == PageTier::Public {
            entry.watch.take().and_then(|watch| watch.take_notice())
        } else {
            None
        };
        if tier == PageTier::Public {
            return carried;
        }

        if entry.watch.is_none() {
            debug!("Watching session of tab {} on {} ({:?})", client.tab_id, path, tier);
            let watch = TabWatch::start(
                self.guard_for(client),
                tier,
                path.to_string(),
                self.event_feed(client),
            )
            .await;
            entry.watch = Some(watch);
        }
        carried.or_else(|| entry.watch.as_ref().and_then(TabWatch::take_notice))
    }

    /// Удаляет вкладки без запросов дольше `idle`: останавливает их опрос и наблюдение.
    pub async fn evict_idle_tabs(&self, idle: Duration) -> usize {
        let now = Instant::now();
        let evicted = {
            let mut tabs = self.tabs.lock().await;
            let before = tabs.len();
            tabs.retain(|(_, tab_id), entry| {
                let keep = now.duration_since(entry.touched) < idle;
                if !keep {
                    debug!("Evicting idle tab {}", tab_id);
                }
                keep
            });
            before - tabs.len()
        };

        if let StoreBackend::Memory(profiles) = &self.backend {
            let stores = Self::memory(profiles).evict_idle(idle, now);
            if stores > 0 {
                debug!("Evicted {} idle in-memory tab stores", stores);
            }
        }
        evicted
    }

    pub async fn open_tabs(&self) -> usize {
        self.tabs.lock().await.len()
    }
}
