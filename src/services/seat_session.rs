//! Состояние экрана выбора мест одной вкладки: схема салона, выбор пользователя,
//! актуальные занятые места и периодический опрос.

use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::availability::{AvailabilityKey, AvailabilityRefresher, AvailabilitySnapshot};
use super::debounce::Trigger;
use super::selection::{apply_booked_seats, compute_total, initialize_layout, toggle_seat};
use super::session::AuthRedirect;
use crate::error::BookingResult;
use crate::models::{BusConfig, Seat, SeatLayout, SelectionState};

/// Представление схемы для клиента.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatView {
    pub bus_id: String,
    pub seats: Vec<Seat>,
    pub selected_seat_ids: Vec<String>,
    pub price_per_seat: i64,
    pub total: i64,
    pub warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_redirect: Option<AuthRedirect>,
}

/// Периодический опрос занятых мест. Останавливается при удалении.
pub struct Poller {
    handle: JoinHandle<()>,
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub struct SeatSession {
    bus: BusConfig,
    base_layout: SeatLayout,
    layout: SeatLayout,
    selection: SelectionState,
    refresher: Arc<AvailabilityRefresher>,
    key: Option<AvailabilityKey>,
    poller: Option<Poller>,
}

impl SeatSession {
    pub fn new(bus: BusConfig, refresher: AvailabilityRefresher) -> Self {
        let base_layout = initialize_layout(&bus);
        Self {
            layout: base_layout.clone(),
            base_layout,
            bus,
            selection: SelectionState::new(),
            refresher: Arc::new(refresher),
            key: None,
            poller: None,
        }
    }

    pub fn bus(&self) -> &BusConfig {
        &self.bus
    }

    pub fn layout(&self) -> &SeatLayout {
        &self.layout
    }

    /// Текущие параметры поездки.
    pub fn trip(&self) -> Option<&AvailabilityKey> {
        self.key.as_ref()
    }

    pub fn selection(&self) -> &SelectionState {
        &self.selection
    }

    pub fn price_per_seat(&self) -> i64 {
        self.bus.price_per_seat()
    }

    pub fn total(&self) -> i64 {
        compute_total(&self.selection, self.price_per_seat())
    }

    /// Установка параметров поездки. Повтор с теми же параметрами не вызывает запрос.
    pub fn set_trip(&mut self, key: AvailabilityKey) -> Trigger {
        let changed = self.key.as_ref() != Some(&key);
        self.key = Some(key.clone());
        if changed {
            // Опрос запущен для старых параметров.
            self.poller = None;
        }
        self.refresher.request(key)
    }

    fn relayout(&mut self, snapshot: &AvailabilitySnapshot) {
        // Результат для других параметров поездки к текущей схеме не относится.
        let empty = BTreeSet::new();
        let booked = if snapshot.key.is_some() && snapshot.key == self.key {
            &snapshot.booked
        } else {
            &empty
        };
        self.layout = apply_booked_seats(&self.base_layout, booked, &self.selection);
    }

    /// Применяет последний опубликованный список занятых мест к схеме.
    /// Уже выбранные места не снимаются, даже если они стали занятыми.
    pub fn sync(&mut self) -> AvailabilitySnapshot {
        let snapshot = self.refresher.snapshot();
        self.relayout(&snapshot);
        snapshot
    }

    pub fn toggle(&mut self, seat_id: &str) -> BookingResult<&SelectionState> {
        let snapshot = self.sync();
        self.selection = toggle_seat(&self.selection, seat_id, &self.layout)?;
        self.relayout(&snapshot);
        debug!("Selection is now {:?}", self.selection.selected_seat_ids());
        Ok(&self.selection)
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
        self.sync();
    }

    pub fn view(&mut self) -> SeatView {
        let snapshot = self.sync();
        SeatView {
            bus_id: self.bus.bus_id.clone(),
            seats: self.layout.seats().to_vec(),
            selected_seat_ids: self.selection.selected_seat_ids().to_vec(),
            price_per_seat: self.price_per_seat(),
            total: self.total(),
            warning: snapshot.warning,
            auth_redirect: snapshot.auth_redirect,
        }
    }

    /// Продолжение после входа: требование входа снимается, места запрашиваются заново.
    pub fn resume(&mut self) -> Option<Trigger> {
        self.refresher.clear_auth_redirect();
        let key = self.key.clone()?;
        Some(self.refresher.refresh(key))
    }

    /// Запускает периодическое обновление для текущих параметров поездки.
    pub fn start_polling(&mut self, interval: Duration) -> bool {
        let Some(key) = self.key.clone() else {
            return false;
        };
        if self.poller.is_some() || interval.is_zero() {
            return false;
        }

        info!("Polling availability for {:?} every {:?}", key, interval);
        let refresher = self.refresher.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // Первый тик срабатывает сразу, а начальная загрузка уже запрошена.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                refresher.refresh(key.clone());
            }
        });
        self.poller = Some(Poller { handle });
        true
    }

    pub fn stop_polling(&mut self) {
        self.poller = None;
    }

    pub fn is_polling(&self) -> bool {
        self.poller.is_some()
    }
}
