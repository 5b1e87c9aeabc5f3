//! Модель выбора мест: статическая схема салона, отметка занятых мест, выбор и стоимость.

use std::collections::BTreeSet;

use crate::error::{BookingError, BookingResult};
use crate::models::seat::SPECIAL_ROW_LABEL;
use crate::models::{BusConfig, Seat, SeatLayout, SeatStatus, SelectionState};

/// Буквы обычных рядов. `S` зарезервирована под задние места.
fn row_labels() -> impl Iterator<Item = char> {
    ('A'..='Z').filter(|c| *c != SPECIAL_ROW_LABEL)
}

/// Строит сетку мест автобуса. Чистая функция конфигурации.
pub fn initialize_layout(config: &BusConfig) -> SeatLayout {
    let mut seats = Vec::new();
    let aisle_shift = |number: u32| match config.aisle_after {
        Some(after) if number > after => 1,
        _ => 0,
    };

    for (row, label) in row_labels().take(config.rows as usize).enumerate() {
        for number in 1..=config.seats_per_row {
            seats.push(Seat {
                id: format!("{}{}", label, number),
                row: row as u32,
                number,
                grid_column: number - 1 + aisle_shift(number),
                status: SeatStatus::Available,
            });
        }
    }

    let back_row = config.rows.min(row_labels().count() as u32);
    for number in 1..=config.special_seats {
        seats.push(Seat {
            id: format!("{}{}", SPECIAL_ROW_LABEL, number),
            row: back_row,
            number,
            grid_column: number - 1,
            status: SeatStatus::Available,
        });
    }

    SeatLayout::new(seats)
}

/// Пересчитывает статусы мест по списку занятых: занятые - `booked`, выбранные
/// пользователем - `selected`, остальные - `available`.
pub fn apply_booked_seats(
    layout: &SeatLayout,
    booked_ids: &BTreeSet<String>,
    selection: &SelectionState,
) -> SeatLayout {
    let mut next = layout.clone();
    for seat in next.seats_mut() {
        seat.status = if booked_ids.contains(&seat.id) {
            SeatStatus::Booked
        } else if selection.contains(&seat.id) {
            SeatStatus::Selected
        } else {
            SeatStatus::Available
        };
    }
    next
}

/// Переключает место в выборе. Занятое или неизвестное место отклоняется без изменений.
pub fn toggle_seat(
    selection: &SelectionState,
    seat_id: &str,
    layout: &SeatLayout,
) -> BookingResult<SelectionState> {
    match layout.get(seat_id) {
        Some(seat) if seat.status != SeatStatus::Booked => {
            let mut next = selection.clone();
            next.flip(seat_id);
            Ok(next)
        }
        _ => Err(BookingError::SeatUnavailable {
            seat_id: seat_id.to_string(),
        }),
    }
}

pub fn compute_total(selection: &SelectionState, price_per_seat: i64) -> i64 {
    selection.len() as i64 * price_per_seat
}
