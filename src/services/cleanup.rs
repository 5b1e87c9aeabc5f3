use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

use crate::AppState;

/// Фоновая уборка вкладок, от которых давно не было запросов.
pub struct CleanupService {
    state: Arc<AppState>,
}

impl CleanupService {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Один проход: закрывает вкладки без запросов дольше `TAB_IDLE_SECONDS`.
    pub async fn run_once(&self) -> usize {
        let idle = self.state.config.booking.tab_idle();
        let evicted = self.state.evict_idle_tabs(idle).await;
        if evicted > 0 {
            info!(
                "Closed {} idle tabs, {} still open",
                evicted,
                self.state.open_tabs().await
            );
        }
        evicted
    }

    /// Периодический запуск. При нулевом интервале уборка выключена.
    pub fn spawn(self, every: Duration) -> Option<JoinHandle<()>> {
        if every.is_zero() {
            return None;
        }
        info!("Idle tab cleanup every {:?}", every);
        Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(every).await;
                self.run_once().await;
            }
        }))
    }
}
