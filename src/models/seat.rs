use serde::{Deserialize, Serialize};

/// Цена места, если в записи автобуса нет тарифа.
pub const DEFAULT_SEAT_PRICE: i64 = 1000;

/// Метка ряда для задних "специальных" мест (S1, S2, ...).
pub const SPECIAL_ROW_LABEL: char = 'S';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeatStatus {
    Available,
    Selected,
    Booked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seat {
    pub id: String,
    /// Ряд (0 - передний).
    pub row: u32,
    /// Номер места в ряду, начиная с 1.
    pub number: u32,
    /// Колонка в сетке отрисовки с учётом прохода.
    pub grid_column: u32,
    pub status: SeatStatus,
}

/// Статическая конфигурация салона автобуса.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusConfig {
    pub bus_id: String,
    pub rows: u32,
    pub seats_per_row: u32,
    /// Проход после указанного номера места (например, 2 для схемы 2+2).
    pub aisle_after: Option<u32>,
    /// Количество задних мест S1..Sn.
    #[serde(default)]
    pub special_seats: u32,
    /// Тариф за место; может отсутствовать в записи автобуса.
    #[serde(default)]
    pub fare: Option<i64>,
}

impl BusConfig {
    pub fn price_per_seat(&self) -> i64 {
        self.fare.filter(|fare| *fare > 0).unwrap_or(DEFAULT_SEAT_PRICE)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatLayout {
    seats: Vec<Seat>,
}

impl SeatLayout {
    pub fn new(seats: Vec<Seat>) -> Self {
        Self { seats }
    }

    pub fn seats(&self) -> &[Seat] {
        &self.seats
    }

    pub fn seats_mut(&mut self) -> &mut [Seat] {
        &mut self.seats
    }

    pub fn get(&self, seat_id: &str) -> Option<&Seat> {
        self.seats.iter().find(|seat| seat.id == seat_id)
    }

    pub fn is_booked(&self, seat_id: &str) -> bool {
        self.get(seat_id)
            .map(|seat| seat.status == SeatStatus::Booked)
            .unwrap_or(false)
    }

    pub fn booked_ids(&self) -> Vec<&str> {
        self.seats
            .iter()
            .filter(|seat| seat.status == SeatStatus::Booked)
            .map(|seat| seat.id.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.seats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seats.is_empty()
    }
}

/// Выбор мест текущим пользователем. Порядок выбора сохраняется.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionState {
    selected_seat_ids: Vec<String>,
}

impl SelectionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut selection = Self::new();
        for id in ids {
            let id = id.into();
            if !selection.contains(&id) {
                selection.selected_seat_ids.push(id);
            }
        }
        selection
    }

    pub fn selected_seat_ids(&self) -> &[String] {
        &self.selected_seat_ids
    }

    pub fn contains(&self, seat_id: &str) -> bool {
        self.selected_seat_ids.iter().any(|id| id == seat_id)
    }

    pub fn len(&self) -> usize {
        self.selected_seat_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selected_seat_ids.is_empty()
    }

    /// Кнопка оформления активна только при выбранных местах.
    pub fn can_submit(&self) -> bool {
        !self.is_empty()
    }

    pub fn clear(&mut self) {
        self.selected_seat_ids.clear();
    }

    pub(crate) fn flip(&mut self, seat_id: &str) {
        if let Some(pos) = self.selected_seat_ids.iter().position(|id| id == seat_id) {
            self.selected_seat_ids.remove(pos);
        } else {
            self.selected_seat_ids.push(seat_id.to_string());
        }
    }
}
