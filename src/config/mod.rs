use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::models::BusConfig;

// Главная структура конфигурации - контейнер для всех настроек
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub redis: RedisConfig,
    pub remote_api: RemoteApiConfig,
    pub booking: BookingConfig,
    pub session: SessionConfig,
}

// Настройки приложения
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub rust_log: String,
}

// Настройки Redis (хранилище "браузерного" состояния)
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    pub key_prefix: String,
    /// TTL для ключей уровня вкладки (session scope).
    pub session_ttl_seconds: u64,
}

// Настройки удалённого Seat/Booking API
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteApiConfig {
    pub base_url: String,
    pub request_timeout_seconds: u64,
}

// Настройки процесса бронирования
#[derive(Debug, Clone, Deserialize)]
pub struct BookingConfig {
    pub debounce_ms: u64,
    pub poll_interval_seconds: u64,
    pub default_seat_price: i64,
    pub landing_path: String,
    pub login_path: String,
    // Схема салона по умолчанию
    pub bus_rows: u32,
    pub seats_per_row: u32,
    /// 0 - без прохода.
    pub aisle_after: u32,
    pub special_seats: u32,
    /// Через сколько секунд без запросов вкладка считается закрытой.
    pub tab_idle_seconds: u64,
    pub cleanup_interval_seconds: u64,
}

// Настройки сессии и токена
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub token_ttl_hours: i64,
    pub protected_check_seconds: u64,
    pub critical_check_seconds: u64,
    pub login_grace_seconds: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} has invalid value '{value}'")]
    Invalid { name: &'static str, value: String },
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_var<T: FromStr>(name: &'static str, default: &str) -> Result<T, ConfigError> {
    let value = var_or(name, default);
    value
        .parse()
        .map_err(|_| ConfigError::Invalid { name, value })
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Config {
            app: AppConfig {
                host: var_or("HOST", "0.0.0.0"),
                port: parse_var("PORT", "8000")?,
                environment: var_or("ENVIRONMENT", "development"),
                rust_log: var_or("RUST_LOG", "bus_ticketing=debug,tower_http=debug"),
            },
            redis: RedisConfig {
                url: var_or("REDIS_URL", "redis://127.0.0.1:6379"),
                key_prefix: var_or("REDIS_KEY_PREFIX", "bus"),
                session_ttl_seconds: parse_var("SESSION_SCOPE_TTL_SECONDS", "43200")?,
            },
            remote_api: RemoteApiConfig {
                base_url: var_or("SEAT_API_URL", "http://localhost:4000/api"),
                request_timeout_seconds: parse_var("SEAT_API_TIMEOUT_SECONDS", "30")?,
            },
            booking: BookingConfig {
                debounce_ms: parse_var("AVAILABILITY_DEBOUNCE_MS", "500")?,
                poll_interval_seconds: parse_var("AVAILABILITY_POLL_SECONDS", "30")?,
                default_seat_price: parse_var("DEFAULT_SEAT_PRICE", "1000")?,
                landing_path: var_or("LANDING_PATH", "/"),
                login_path: var_or("LOGIN_PATH", "/login"),
                bus_rows: parse_var("BUS_ROWS", "10")?,
                seats_per_row: parse_var("BUS_SEATS_PER_ROW", "4")?,
                aisle_after: parse_var("BUS_AISLE_AFTER", "2")?,
                special_seats: parse_var("BUS_SPECIAL_SEATS", "5")?,
                tab_idle_seconds: parse_var("TAB_IDLE_SECONDS", "1800")?,
                cleanup_interval_seconds: parse_var("CLEANUP_INTERVAL_SECONDS", "60")?,
            },
            session: SessionConfig {
                token_ttl_hours: parse_var("TOKEN_TTL_HOURS", "24")?,
                protected_check_seconds: parse_var("SESSION_CHECK_PROTECTED_SECONDS", "600")?,
                critical_check_seconds: parse_var("SESSION_CHECK_CRITICAL_SECONDS", "120")?,
                login_grace_seconds: parse_var("SESSION_LOGIN_GRACE_SECONDS", "30")?,
            },
        })
    }
}

impl BookingConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn tab_idle(&self) -> Duration {
        Duration::from_secs(self.tab_idle_seconds)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_seconds)
    }

    /// Конфигурация салона для автобуса; без тарифа используется цена по умолчанию.
    pub fn bus_config(&self, bus_id: &str, fare: Option<i64>) -> BusConfig {
        BusConfig {
            bus_id: bus_id.trim().to_string(),
            rows: self.bus_rows,
            seats_per_row: self.seats_per_row,
            aisle_after: Some(self.aisle_after).filter(|after| *after > 0),
            special_seats: self.special_seats,
            fare: fare.filter(|f| *f > 0).or(Some(self.default_seat_price)),
        }
    }
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            poll_interval_seconds: 30,
            default_seat_price: crate::models::seat::DEFAULT_SEAT_PRICE,
            landing_path: "/".to_string(),
            login_path: "/login".to_string(),
            bus_rows: 10,
            seats_per_row: 4,
            aisle_after: 2,
            special_seats: 5,
            tab_idle_seconds: 1800,
            cleanup_interval_seconds: 60,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            token_ttl_hours: 24,
            protected_check_seconds: 600,
            critical_check_seconds: 120,
            login_grace_seconds: 30,
        }
    }
}
