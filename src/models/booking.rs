use serde::{Deserialize, Serialize};
use validator::Validate;

/// Идентификатор автобуса в том виде, в каком он пришёл из поиска: число или строка.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BusId {
    Number(i64),
    Text(String),
}

impl BusId {
    /// Приведение к целому числу, которое ожидает API бронирования.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            BusId::Number(n) => Some(*n),
            BusId::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl Default for BusId {
    fn default() -> Self {
        BusId::Text(String::new())
    }
}

impl std::fmt::Display for BusId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BusId::Number(n) => write!(f, "{}", n),
            BusId::Text(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TripDetails {
    pub travel_date: String,
    pub origin: String,
    pub destination: String,
    pub bus_id: BusId,
    pub bus_name: Option<String>,
    pub fare: Option<i64>,
}

/// Черновик данных пассажира с формы. Любое поле может отсутствовать.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PassengerDraft {
    pub name: Option<String>,
    pub contact: Option<String>,
    pub seat_number: Option<String>,
    pub gender: Option<String>,
    pub origin: Option<String>,
    pub destination: Option<String>,
    pub boarding_location: Option<String>,
    pub deboarding_location: Option<String>,
    pub residence: Option<String>,
    pub email: Option<String>,
}

/// Снимок бронирования, сохраняемый перед уходом на платёжный шлюз.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PendingBookingContext {
    pub trip: TripDetails,
    pub selected_seats: Vec<String>,
    pub passengers: Vec<PassengerDraft>,
    pub merchant_txn_id: Option<String>,
    pub total_amount: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    /// Нормализация свободного ввода; всё нераспознанное считается `male`.
    pub fn normalize(raw: Option<&str>) -> Self {
        match raw.map(|g| g.trim().to_lowercase()).as_deref() {
            Some("female") | Some("f") | Some("woman") => Gender::Female,
            _ => Gender::Male,
        }
    }
}

// --- Запрос на бронирование мест (POST /seat/payment) ---

#[derive(Debug, Clone, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BookingSubmission {
    #[validate(nested)]
    pub seat_info: SeatInfo,
    #[validate(nested)]
    pub payment_info: PaymentInfo,
}

#[derive(Debug, Clone, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SeatInfo {
    #[validate(length(equal = 10))]
    pub date_of_travel: String,
    #[validate(range(min = 1))]
    pub bus_id: i64,
    #[validate(nested)]
    pub passengers_list: Vec<PassengerRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PassengerRecord {
    #[validate(length(min = 1))]
    pub passenger_name: String,
    #[validate(length(min = 7))]
    pub contact_number: String,
    #[validate(length(min = 2))]
    pub seat_number: String,
    pub source: String,
    pub destination: String,
    pub gender: Gender,
    pub boarding_location: String,
    pub deboarding_location: String,
    pub residence: String,
    #[validate(email)]
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInfo {
    #[validate(length(min = 1))]
    pub merchant_transaction_id: String,
}

/// Квитанция об успешной покупке.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub transaction_id: String,
    pub gateway_transaction_id: String,
    pub ticket_number: String,
    #[serde(rename = "PNR")]
    pub pnr: String,
    pub payment_method: String,
    pub amount_paid: i64,
    pub total_amount: i64,
    pub seats: Vec<String>,
    pub travel_date: String,
    pub passenger_names: Vec<String>,
}
