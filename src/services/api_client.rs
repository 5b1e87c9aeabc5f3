//! api_client.rs
//!
//! Клиент удалённого Seat/Booking API.
//!
//! Ключевые компоненты:
//! 1.  **SeatApi**: трейт-граница, через которую координатор ходит в сеть. В тестах
//!     подменяется фейковой реализацией.
//! 2.  **HttpSeatApi**: реализация на `reqwest` с passthrough bearer-токена.
//!     `AuthorizedSeatApi` берёт токен из текущей сессии.
//! 3.  **Модели запросов и ответов**: формы JSON, которыми обменивается API.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::session::SessionGuard;
use crate::config::RemoteApiConfig;
use crate::models::BookingSubmission;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// 401 от защищённого эндпоинта.
    #[error("remote API rejected the credentials")]
    Unauthorized,
    #[error("remote API returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("remote API request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected response shape: {0}")]
    Decode(String),
}

// --- Модели данных API ---

/// Тело запроса занятых мест.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatDetailsRequest {
    pub travel_date: String,
    pub destination: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatDetailsResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub data: Option<Vec<SeatDetailEntry>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatDetailEntry {
    #[serde(default)]
    pub seat_number: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PaymentStatusRequest<'a> {
    merchant_txn_id: &'a str,
    gateway_txn_id: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct PaymentStatusResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Запрос на получение ссылки платёжного шлюза.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInitRequest {
    pub merchant_txn_id: String,
    pub amount: i64,
    pub remarks: String,
}

#[derive(Debug, Deserialize)]
pub struct PaymentInitResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub data: Option<PaymentInitData>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInitData {
    #[serde(alias = "paymentUrl", alias = "url")]
    pub redirect_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BookingResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
    #[serde(default)]
    pub data: Option<BookingResponseData>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BookingResponseData {
    pub payment_details: Option<PaymentDetails>,
    pub booking_details: Option<BookingDetails>,
    pub receipt: Option<ReceiptData>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PaymentDetails {
    pub payment_method: Option<String>,
    pub amount: Option<f64>,
    pub status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BookingDetails {
    pub ticket_number: Option<String>,
    #[serde(rename = "PNR", alias = "pnr")]
    pub pnr: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReceiptData {
    pub payment_method: Option<String>,
    pub amount_paid: Option<f64>,
    pub total_amount: Option<f64>,
}

impl BookingResponse {
    /// Весь текст ошибки из ответа: `message` и `error` (строка или объект).
    pub fn error_text(&self) -> String {
        let mut parts = Vec::new();
        if let Some(message) = &self.message {
            parts.push(message.clone());
        }
        match &self.error {
            Some(serde_json::Value::String(s)) => parts.push(s.clone()),
            Some(serde_json::Value::Null) | None => {}
            Some(other) => parts.push(other.to_string()),
        }
        parts.join(" ")
    }
}

/// Граница удалённого Seat/Booking API.
#[async_trait]
pub trait SeatApi: Send + Sync {
    async fn fetch_seat_details(&self, request: &SeatDetailsRequest) -> Result<SeatDetailsResponse, ApiError>;

    async fn check_payment_status(
        &self,
        merchant_txn_id: &str,
        gateway_txn_id: &str,
    ) -> Result<PaymentStatusResponse, ApiError>;

    async fn submit_booking(&self, submission: &BookingSubmission) -> Result<BookingResponse, ApiError>;

    async fn initiate_payment(&self, request: &PaymentInitRequest) -> Result<PaymentInitResponse, ApiError>;
}

#[derive(Clone)]
pub struct HttpSeatApi {
    base_url: String,
    http_client: reqwest::Client,
    bearer: Option<String>,
}

impl HttpSeatApi {
    pub fn from_config(config: &RemoteApiConfig) -> Result<Self, ApiError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;
        Ok(Self::new(&config.base_url, http_client))
    }

    pub fn new(base_url: &str, http_client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
            bearer: None,
        }
    }

    /// Копия клиента, отправляющая указанный bearer-токен.
    pub fn with_bearer(&self, token: Option<String>) -> Self {
        Self {
            bearer: token,
            ..self.clone()
        }
    }

    async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R, ApiError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.http_client.post(&url).json(body);
        if let Some(token) = &self.bearer {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            error!("Seat API request to {} failed: {:?}", path, e);
            ApiError::Transport(e)
        })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            info!("Seat API returned 401 for {}", path);
            return Err(ApiError::Unauthorized);
        }

        let text = response.text().await?;
        if !status.is_success() {
            debug!("Seat API {} returned {}: {}", path, status, text);
            return Err(ApiError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        serde_json::from_str(&text).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

#[async_trait]
impl SeatApi for HttpSeatApi {
    async fn fetch_seat_details(&self, request: &SeatDetailsRequest) -> Result<SeatDetailsResponse, ApiError> {
        debug!("Fetching booked seats for {} on {}", request.destination, request.travel_date);
        self.post_json("/seat/details?all=true", request).await
    }

    async fn check_payment_status(
        &self,
        merchant_txn_id: &str,
        gateway_txn_id: &str,
    ) -> Result<PaymentStatusResponse, ApiError> {
        info!("Checking payment status: merchant_txn_id={}, gateway_txn_id={}", merchant_txn_id, gateway_txn_id);
        let body = PaymentStatusRequest {
            merchant_txn_id,
            gateway_txn_id,
        };
        self.post_json("/payment/status", &body).await
    }

    async fn submit_booking(&self, submission: &BookingSubmission) -> Result<BookingResponse, ApiError> {
        info!(
            "Submitting booking: merchant_txn_id={}, passengers={}",
            submission.payment_info.merchant_transaction_id,
            submission.seat_info.passengers_list.len()
        );
        self.post_json("/seat/payment", submission).await
    }

    async fn initiate_payment(&self, request: &PaymentInitRequest) -> Result<PaymentInitResponse, ApiError> {
        info!("Initiating payment: merchant_txn_id={}, amount={}", request.merchant_txn_id, request.amount);
        self.post_json("/payment/initiate", request).await
    }
}

/// Обёртка над [`HttpSeatApi`], подставляющая актуальный токен сессии в каждый запрос.
#[derive(Clone)]
pub struct AuthorizedSeatApi {
    inner: HttpSeatApi,
    guard: SessionGuard,
}

impl AuthorizedSeatApi {
    pub fn new(inner: HttpSeatApi, guard: SessionGuard) -> Self {
        Self { inner, guard }
    }

    async fn client(&self) -> HttpSeatApi {
        let token = match self.guard.current_token().await {
            Ok(token) => token,
            Err(e) => {
                warn!("Could not read session token: {}", e);
                None
            }
        };
        self.inner.with_bearer(token)
    }
}

#[async_trait]
impl SeatApi for AuthorizedSeatApi {
    async fn fetch_seat_details(&self, request: &SeatDetailsRequest) -> Result<SeatDetailsResponse, ApiError> {
        self.client().await.fetch_seat_details(request).await
    }

    async fn check_payment_status(
        &self,
        merchant_txn_id: &str,
        gateway_txn_id: &str,
    ) -> Result<PaymentStatusResponse, ApiError> {
        self.client()
            .await
            .check_payment_status(merchant_txn_id, gateway_txn_id)
            .await
    }

    async fn submit_booking(&self, submission: &BookingSubmission) -> Result<BookingResponse, ApiError> {
        self.client().await.submit_booking(submission).await
    }

    async fn initiate_payment(&self, request: &PaymentInitRequest) -> Result<PaymentInitResponse, ApiError> {
        self.client().await.initiate_payment(request).await
    }
}
