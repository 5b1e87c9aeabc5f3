//! Переиспользуемая задача с debounce по ключу.
//!
//! Повторные запуски в пределах окна схлопываются в один (trailing edge), запуск с ключом,
//! совпадающим с последним запрошенным, пропускается. Каждый запуск получает номер
//! поколения; результат стоит применять, только если поколение всё ещё последнее.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Запуск запланирован с указанным поколением.
    Scheduled(u64),
    /// Запрос с тем же ключом уже выполняется, и после него ничего другого не запрашивали.
    SkippedInFlight,
    /// Ключ совпадает с последним запрошенным.
    SkippedUnchanged,
}

struct Inner<K> {
    generation: u64,
    latest: Option<K>,
    /// Ключ и поколение выполняющегося запуска.
    in_flight: Option<(K, u64)>,
}

/// Поколение конкретного запуска; позволяет отбросить устаревший результат.
#[derive(Clone)]
pub struct Generation<K> {
    value: u64,
    inner: Arc<Mutex<Inner<K>>>,
}

impl<K> Generation<K> {
    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn is_current(&self) -> bool {
        self.inner
            .lock()
            .map(|inner| inner.generation == self.value)
            .unwrap_or(false)
    }
}

pub struct DebouncedTask<K> {
    delay: Duration,
    inner: Arc<Mutex<Inner<K>>>,
}

impl<K> Clone for DebouncedTask<K> {
    fn clone(&self) -> Self {
        Self {
            delay: self.delay,
            inner: self.inner.clone(),
        }
    }
}

impl<K> DebouncedTask<K>
where
    K: Clone + PartialEq + Send + std::fmt::Debug + 'static,
{
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            inner: Arc::new(Mutex::new(Inner {
                generation: 0,
                latest: None,
                in_flight: None,
            })),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn current_generation(&self) -> u64 {
        self.inner.lock().map(|inner| inner.generation).unwrap_or(0)
    }

    /// Планирует запуск `job` после окна debounce.
    pub fn trigger<F, Fut>(&self, key: K, job: F) -> Trigger
    where
        F: FnOnce(K, Generation<K>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.schedule(key, false, job)
    }

    /// Как `trigger`, но не пропускает неизменившийся ключ (периодическое обновление).
    pub fn trigger_forced<F, Fut>(&self, key: K, job: F) -> Trigger
    where
        F: FnOnce(K, Generation<K>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.schedule(key, true, job)
    }

    fn schedule<F, Fut>(&self, key: K, force: bool, job: F) -> Trigger
    where
        F: FnOnce(K, Generation<K>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let generation = {
            let Ok(mut inner) = self.inner.lock() else {
                return Trigger::SkippedInFlight;
            };
            let unchanged = inner.latest.as_ref() == Some(&key);
            if !force && unchanged {
                debug!("Skipping {:?}: parameters unchanged", key);
                return Trigger::SkippedUnchanged;
            }
            // Выполняющийся запуск покрывает ключ, только пока после него ничего не запрашивали.
            if unchanged && inner.in_flight.as_ref().is_some_and(|(running, _)| *running == key) {
                debug!("Skipping {:?}: identical request in flight", key);
                return Trigger::SkippedInFlight;
            }
            inner.generation += 1;
            inner.latest = Some(key.clone());
            inner.generation
        };

        let inner = self.inner.clone();
        let delay = self.delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            // Более поздний запуск внутри окна отменяет этот.
            {
                let Ok(mut guard) = inner.lock() else { return };
                if guard.generation != generation {
                    return;
                }
                guard.in_flight = Some((key.clone(), generation));
            }

            let handle = Generation {
                value: generation,
                inner: inner.clone(),
            };
            job(key.clone(), handle).await;

            if let Ok(mut guard) = inner.lock() {
                if guard.in_flight.as_ref().is_some_and(|(_, running)| *running == generation) {
                    guard.in_flight = None;
                }
            }
        });

        Trigger::Scheduled(generation)
    }
}
