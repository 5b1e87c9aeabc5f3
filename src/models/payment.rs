use serde::{Deserialize, Serialize};

/// Фазы одной попытки бронирования.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingPhase {
    Idle,
    AwaitingGateway,
    CheckingPayment,
    Booking,
    Success,
    PaymentFailed,
    BookingFailed,
    BookingError,
}

impl BookingPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BookingPhase::Success
                | BookingPhase::PaymentFailed
                | BookingPhase::BookingFailed
                | BookingPhase::BookingError
        )
    }
}

/// Параметры, с которыми платёжный шлюз возвращает пользователя.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackParams {
    pub merchant_txn_id: String,
    pub gateway_txn_id: String,
}

impl CallbackParams {
    /// Разбирает query string колбэка. Имена параметров сравниваются без учёта регистра,
    /// пустые значения считаются отсутствующими.
    pub fn from_query(query: &str) -> Option<Self> {
        let pairs: Vec<(String, String)> =
            serde_urlencoded::from_str(query.trim_start_matches('?')).ok()?;

        let find = |name: &str| {
            pairs
                .iter()
                .find(|(key, value)| key.eq_ignore_ascii_case(name) && !value.trim().is_empty())
                .map(|(_, value)| value.trim().to_string())
        };

        Some(Self {
            merchant_txn_id: find("MerchantTxnId")?,
            gateway_txn_id: find("GatewayTxnId")?,
        })
    }

    /// Путь колбэка с этими параметрами; после входа сверка продолжается с него.
    pub fn callback_path(&self, base: &str) -> String {
        let query = serde_urlencoded::to_string([
            ("MerchantTxnId", self.merchant_txn_id.as_str()),
            ("GatewayTxnId", self.gateway_txn_id.as_str()),
        ]);
        match query {
            Ok(query) => format!("{}?{}", base, query),
            Err(_) => base.to_string(),
        }
    }
}

/// Результат передачи пользователя на платёжный шлюз.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentHandoff {
    pub merchant_txn_id: String,
    pub redirect_url: String,
    pub amount: i64,
}
