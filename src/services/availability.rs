//! Обновление занятых мест с debounce.
//!
//! Запросы к `/seat/details` схлопываются через [`DebouncedTask`]; результат применяется,
//! только если за время запроса не было более нового запуска. Ошибки сети не блокируют
//! пользователя: список занятых мест сбрасывается, показывается предупреждение.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::api_client::{ApiError, SeatApi, SeatDetailsRequest, SeatDetailsResponse};
use super::debounce::{DebouncedTask, Generation, Trigger};
use super::normalize::{normalize_date, normalize_place};
use super::session::{AuthRedirect, SessionGuard};
use crate::error::AVAILABILITY_WARNING;

static SEAT_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z]\d+$").expect("valid seat pattern"));

/// Нормализованные параметры запроса занятых мест.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AvailabilityKey {
    pub travel_date: String,
    pub destination: String,
    pub bus_id: String,
}

impl AvailabilityKey {
    /// `None`, если дату нельзя привести к `YYYY-MM-DD`.
    pub fn normalize(travel_date: &str, destination: &str, bus_id: &str) -> Option<Self> {
        Some(Self {
            travel_date: normalize_date(travel_date)?,
            destination: normalize_place(destination),
            bus_id: bus_id.trim().to_string(),
        })
    }

    fn request(&self) -> SeatDetailsRequest {
        SeatDetailsRequest {
            travel_date: self.travel_date.clone(),
            destination: self.destination.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AvailabilitySnapshot {
    pub booked: BTreeSet<String>,
    pub key: Option<AvailabilityKey>,
    pub warning: Option<String>,
    pub auth_redirect: Option<AuthRedirect>,
    /// Поколение, результат которого применён.
    pub generation: u64,
}

/// Места из ответа, удовлетворяющие строгому формату `^[A-Z]\d+$`.
pub fn parse_booked_seats(response: &SeatDetailsResponse) -> BTreeSet<String> {
    response
        .data
        .iter()
        .flatten()
        .filter_map(|entry| entry.seat_number.as_deref())
        .map(str::trim)
        .filter(|seat| SEAT_NUMBER.is_match(seat))
        .map(str::to_string)
        .collect()
}

struct Shared {
    api: Arc<dyn SeatApi>,
    guard: SessionGuard,
    return_path: String,
    snapshot: watch::Sender<AvailabilitySnapshot>,
}

impl Shared {
    async fn run(self: Arc<Self>, key: AvailabilityKey, generation: Generation<AvailabilityKey>) {
        let result = self.api.fetch_seat_details(&key.request()).await;

        if !generation.is_current() {
            debug!("Dropping stale availability result for {:?}", key);
            return;
        }

        match result {
            Ok(response) if response.success => {
                let booked = parse_booked_seats(&response);
                info!("Availability for {:?}: {} seats booked", key, booked.len());
                self.snapshot.send_modify(|snap| {
                    snap.booked = booked;
                    snap.warning = None;
                    snap.auth_redirect = None;
                    snap.key = Some(key);
                    snap.generation = generation.value();
                });
            }
            Err(ApiError::Unauthorized) => {
                let redirect = match self.guard.handle_unauthorized(&self.return_path).await {
                    Ok(redirect) => redirect,
                    Err(e) => {
                        warn!("Could not persist return path: {}", e);
                        return;
                    }
                };
                self.snapshot.send_modify(|snap| {
                    snap.auth_redirect = Some(redirect);
                    snap.generation = generation.value();
                });
            }
            other => {
                match other {
                    Ok(_) => warn!("Availability for {:?} returned success=false", key),
                    Err(e) => warn!("Availability fetch for {:?} failed: {}", key, e),
                }
                self.snapshot.send_modify(|snap| {
                    snap.booked.clear();
                    snap.warning = Some(AVAILABILITY_WARNING.to_string());
                    // Сервер ответил без 401, значит токен снова принят.
                    snap.auth_redirect = None;
                    snap.key = Some(key);
                    snap.generation = generation.value();
                });
            }
        }
    }
}

pub struct AvailabilityRefresher {
    shared: Arc<Shared>,
    task: DebouncedTask<AvailabilityKey>,
}

impl AvailabilityRefresher {
    pub fn new(
        api: Arc<dyn SeatApi>,
        guard: SessionGuard,
        debounce: std::time::Duration,
        return_path: impl Into<String>,
    ) -> Self {
        let (snapshot, _) = watch::channel(AvailabilitySnapshot::default());
        Self {
            shared: Arc::new(Shared {
                api,
                guard,
                return_path: return_path.into(),
                snapshot,
            }),
            task: DebouncedTask::new(debounce),
        }
    }

    /// Запрос обновления при смене параметров.
    pub fn request(&self, key: AvailabilityKey) -> Trigger {
        let shared = self.shared.clone();
        self.task.trigger(key, move |key, generation| shared.run(key, generation))
    }

    /// Повторный запрос с теми же параметрами (периодический опрос).
    pub fn refresh(&self, key: AvailabilityKey) -> Trigger {
        let shared = self.shared.clone();
        self.task.trigger_forced(key, move |key, generation| shared.run(key, generation))
    }

    pub fn snapshot(&self) -> AvailabilitySnapshot {
        self.shared.snapshot.borrow().clone()
    }

    /// Снимает требование входа после повторной авторизации.
    pub fn clear_auth_redirect(&self) {
        self.shared.snapshot.send_if_modified(|snap| snap.auth_redirect.take().is_some());
    }

    pub fn subscribe(&self) -> watch::Receiver<AvailabilitySnapshot> {
        self.shared.snapshot.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::api_client::SeatDetailEntry;

    #[test]
    fn only_strict_seat_numbers_are_kept() {
        let response = SeatDetailsResponse {
            success: true,
            data: Some(
                ["A1", "b2", "S10", "AA1", "", " C3 ", "4"]
                    .into_iter()
                    .map(|s| SeatDetailEntry { seat_number: Some(s.to_string()) })
                    .chain(std::iter::once(SeatDetailEntry { seat_number: None }))
                    .collect(),
            ),
        };

        let booked: Vec<String> = parse_booked_seats(&response).into_iter().collect();
        assert_eq!(booked, vec!["A1", "C3", "S10"]);
    }

    #[test]
    fn keys_are_normalized_before_comparison() {
        let a = AvailabilityKey::normalize("2025/03/07", " Pokhara", "12").unwrap();
        let b = AvailabilityKey::normalize("2025-03-07", "POKHARA ", "12").unwrap();
        assert_eq!(a, b);
        assert!(AvailabilityKey::normalize("soon", "x", "1").is_none());
    }
}
