//! Охрана сессии: bearer-токен со сроком жизни, реакция на 401 и на выход в другой вкладке,
//! фоновая перепроверка сессии в зависимости от чувствительности страницы.

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::SessionConfig;
use crate::error::{BookingError, BookingResult};
use crate::storage::{keys, EventFeed, KeyValueStore, StorageError, StorageEvent, StorageScope};

pub const SESSION_EXPIRED_NOTICE: &str = "Your session has expired. Please log in again.";
pub const LOGGED_OUT_NOTICE: &str = "You have been logged out.";

/// Перенаправление на страницу входа с сохранённым путём возврата.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRedirect {
    pub login_path: String,
    pub return_path: String,
    pub notice: String,
}

/// Чувствительность страницы к истечению сессии.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageTier {
    #[default]
    Public,
    Protected,
    CriticalPayment,
}

impl PageTier {
    pub fn check_interval(self, config: &SessionConfig) -> Option<Duration> {
        match self {
            PageTier::Public => None,
            PageTier::Protected => Some(Duration::from_secs(config.protected_check_seconds)),
            PageTier::CriticalPayment => Some(Duration::from_secs(config.critical_check_seconds)),
        }
    }

    /// Задержка перед первой проверкой. Сразу после входа критичные страницы ждут
    /// окончания grace-периода, чтобы не получить ложное срабатывание.
    pub fn first_check_delay(
        self,
        config: &SessionConfig,
        logged_in_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Option<Duration> {
        let interval = self.check_interval(config)?;
        match self {
            PageTier::CriticalPayment => {
                let grace = ChronoDuration::seconds(config.login_grace_seconds as i64);
                let since_login = logged_in_at.map(|at| now - at).unwrap_or(grace);
                let remaining = (grace - since_login).to_std().unwrap_or(Duration::ZERO);
                Some(remaining)
            }
            _ => Some(interval),
        }
    }
}

#[derive(Clone)]
pub struct SessionGuard {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
    login_path: String,
}

impl SessionGuard {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        config: SessionConfig,
        login_path: impl Into<String>,
    ) -> Self {
        Self {
            store,
            clock,
            config,
            login_path: login_path.into(),
        }
    }

    fn token_ttl(&self) -> ChronoDuration {
        ChronoDuration::hours(self.config.token_ttl_hours)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Сохраняет токен после входа; срок жизни отсчитывается от текущего момента.
    pub async fn store_token(&self, token: &str) -> Result<(), StorageError> {
        let expiry = self.clock.now() + self.token_ttl();
        self.store.remove(StorageScope::Local, keys::LOGOUT_IN_PROGRESS).await?;
        self.store.set(StorageScope::Local, keys::AUTH_TOKEN, token).await?;
        self.store
            .set(StorageScope::Local, keys::TOKEN_EXPIRY, &expiry.timestamp_millis().to_string())
            .await?;
        info!("Session token stored, expires at {}", expiry);
        Ok(())
    }

    async fn clear_token(&self) -> Result<(), StorageError> {
        self.store.remove(StorageScope::Local, keys::AUTH_TOKEN).await?;
        self.store.remove(StorageScope::Local, keys::TOKEN_EXPIRY).await
    }

    async fn expiry(&self) -> Result<Option<i64>, StorageError> {
        let raw = self.store.get(StorageScope::Local, keys::TOKEN_EXPIRY).await?;
        Ok(raw.and_then(|value| value.trim().parse().ok()))
    }

    /// Токен, если он есть и не истёк. Истёкший токен удаляется.
    pub async fn current_token(&self) -> Result<Option<String>, StorageError> {
        let Some(token) = self.store.get(StorageScope::Local, keys::AUTH_TOKEN).await? else {
            return Ok(None);
        };

        match self.expiry().await? {
            Some(expiry) if expiry > self.clock.now_millis() => Ok(Some(token)),
            _ => {
                info!("Session token expired, purging");
                self.clear_token().await?;
                Ok(None)
            }
        }
    }

    pub async fn is_authenticated(&self) -> Result<bool, StorageError> {
        Ok(self.current_token().await?.is_some())
    }

    /// Момент входа, восстановленный из срока жизни токена.
    pub async fn logged_in_at(&self) -> Result<Option<DateTime<Utc>>, StorageError> {
        Ok(self
            .expiry()
            .await?
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .map(|expiry| expiry - self.token_ttl()))
    }

    /// Токен для защищённого вызова или `AuthenticationRequired` с путём возврата.
    pub async fn require_token(&self, current_path: &str) -> BookingResult<String> {
        match self.current_token().await? {
            Some(token) => Ok(token),
            None => {
                self.handle_unauthorized(current_path).await?;
                Err(BookingError::AuthenticationRequired {
                    return_path: current_path.to_string(),
                })
            }
        }
    }

    /// Реакция на 401: очистка токена, сохранение пути возврата, редирект на вход.
    pub async fn handle_unauthorized(&self, current_path: &str) -> Result<AuthRedirect, StorageError> {
        warn!("Unauthorized, redirecting to login from {}", current_path);
        self.clear_token().await?;
        self.store.set(StorageScope::Local, keys::RETURN_PATH, current_path).await?;
        Ok(AuthRedirect {
            login_path: self.login_path.clone(),
            return_path: current_path.to_string(),
            notice: SESSION_EXPIRED_NOTICE.to_string(),
        })
    }

    /// Путь, куда вернуть пользователя после входа. Читается один раз.
    pub async fn take_return_path(&self) -> Result<Option<String>, StorageError> {
        let path = self.store.get(StorageScope::Local, keys::RETURN_PATH).await?;
        if path.is_some() {
            self.store.remove(StorageScope::Local, keys::RETURN_PATH).await?;
        }
        Ok(path)
    }

    /// Явный выход. Флаг ставится до удаления токена, чтобы соседние вкладки
    /// отличили выход от смены токена при входе.
    pub async fn logout(&self) -> Result<(), StorageError> {
        self.store.set(StorageScope::Local, keys::LOGOUT_IN_PROGRESS, "1").await?;
        self.clear_token().await?;
        info!("Explicit logout");
        Ok(())
    }

    /// Обработка изменения хранилища из другой вкладки.
    pub async fn on_storage_event(
        &self,
        event: &StorageEvent,
        tier: PageTier,
        current_path: &str,
    ) -> Result<Option<AuthRedirect>, StorageError> {
        if tier == PageTier::Public
            || event.scope != StorageScope::Local
            || event.key != keys::AUTH_TOKEN
            || event.new_value.is_some()
        {
            return Ok(None);
        }

        let explicit = self
            .store
            .get(StorageScope::Local, keys::LOGOUT_IN_PROGRESS)
            .await?
            .is_some();
        if !explicit {
            debug!("Token removed without logout flag, treating as login transition");
            return Ok(None);
        }

        Ok(Some(AuthRedirect {
            login_path: self.login_path.clone(),
            return_path: current_path.to_string(),
            notice: LOGGED_OUT_NOTICE.to_string(),
        }))
    }
}

/// Фоновая перепроверка сессии. Таймер останавливается при удалении монитора.
pub struct SessionMonitor {
    handle: JoinHandle<()>,
}

impl SessionMonitor {
    /// Запускает проверку для страницы. Для публичных страниц монитор не нужен.
    pub async fn spawn(
        guard: SessionGuard,
        tier: PageTier,
        current_path: String,
    ) -> Option<(Self, mpsc::Receiver<AuthRedirect>)> {
        let interval = tier.check_interval(guard.config())?;
        let logged_in_at = guard.logged_in_at().await.unwrap_or(None);
        let first = tier.first_check_delay(guard.config(), logged_in_at, guard.clock.now())?;
        let (tx, rx) = mpsc::channel(1);

        let handle = tokio::spawn(async move {
            tokio::time::sleep(first).await;
            loop {
                match guard.is_authenticated().await {
                    Ok(true) => {}
                    Ok(false) => {
                        match guard.handle_unauthorized(&current_path).await {
                            Ok(redirect) => {
                                let _ = tx.send(redirect).await;
                            }
                            Err(e) => warn!("Failed to record return path: {}", e),
                        }
                        break;
                    }
                    Err(e) => warn!("Session check failed: {}", e),
                }
                tokio::time::sleep(interval).await;
            }
        });

        Some((Self { handle }, rx))
    }
}

impl Drop for SessionMonitor {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

enum Wake {
    Check(Option<AuthRedirect>),
    Storage(Option<StorageEvent>),
}

async fn next_check(checks: &mut Option<mpsc::Receiver<AuthRedirect>>) -> Option<AuthRedirect> {
    match checks {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_event(feed: &mut Option<EventFeed>) -> Option<StorageEvent> {
    match feed {
        Some(feed) => feed.next().await,
        None => std::future::pending().await,
    }
}

/// Наблюдение за сессией открытой страницы между запросами вкладки: перепроверка
/// по таймеру и выход в соседней вкладке. Найденный редирект ждёт следующего запроса.
pub struct TabWatch {
    tier: PageTier,
    path: String,
    notice: Arc<StdMutex<Option<AuthRedirect>>>,
    handle: JoinHandle<()>,
}

impl TabWatch {
    pub async fn start(guard: SessionGuard, tier: PageTier, path: String, feed: EventFeed) -> Self {
        let notice = Arc::new(StdMutex::new(None));
        let monitor = SessionMonitor::spawn(guard.clone(), tier, path.clone()).await;

        let slot = notice.clone();
        let current_path = path.clone();
        let handle = tokio::spawn(async move {
            let (_monitor, mut checks) = match monitor {
                Some((monitor, rx)) => (Some(monitor), Some(rx)),
                None => (None, None),
            };
            let mut feed = Some(feed);

            while checks.is_some() || feed.is_some() {
                let wake = tokio::select! {
                    redirect = next_check(&mut checks) => Wake::Check(redirect),
                    event = next_event(&mut feed) => Wake::Storage(event),
                };
                let redirect = match wake {
                    Wake::Check(Some(redirect)) => redirect,
                    Wake::Check(None) => {
                        checks = None;
                        continue;
                    }
                    Wake::Storage(Some(event)) => {
                        match guard.on_storage_event(&event, tier, &current_path).await {
                            Ok(Some(redirect)) => redirect,
                            Ok(None) => continue,
                            Err(e) => {
                                warn!("Storage event handling failed: {}", e);
                                continue;
                            }
                        }
                    }
                    Wake::Storage(None) => {
                        debug!("Storage event feed closed for {}", current_path);
                        feed = None;
                        continue;
                    }
                };
                info!("Session redirect pending for {}: {}", current_path, redirect.notice);
                if let Ok(mut slot) = slot.lock() {
                    *slot = Some(redirect);
                }
            }
        });

        Self {
            tier,
            path,
            notice,
            handle,
        }
    }

    pub fn tier(&self) -> PageTier {
        self.tier
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Накопленный редирект. Отдаётся один раз.
    pub fn take_notice(&self) -> Option<AuthRedirect> {
        self.notice.lock().ok().and_then(|mut slot| slot.take())
    }
}

impl Drop for TabWatch {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
