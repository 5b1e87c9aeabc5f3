use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    Json,
};
use serde_json::{json, Value};

pub const CLIENT_ID_HEADER: &str = "x-client-id";
pub const TAB_ID_HEADER: &str = "x-tab-id";

const MAX_ID_LEN: usize = 64;

/// Профиль браузера (область `local`) и вкладка (область `session`) клиента.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientContext {
    pub client_id: String,
    pub tab_id: String,
}

// Идентификатор входит в ключ Redis, поэтому допускаются только безопасные символы
fn valid_id(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= MAX_ID_LEN
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn header_id(parts: &Parts, name: &'static str) -> Result<String, (StatusCode, Json<Value>)> {
    let value = parts
        .headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .unwrap_or_default();

    if valid_id(value) {
        Ok(value.to_string())
    } else {
        Err((
            StatusCode::BAD_REQUEST,
            Json(json!({
                "success": false,
                "message": format!("Missing or invalid {} header", name),
            })),
        ))
    }
}

impl<S> FromRequestParts<S> for ClientContext
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<Value>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(ClientContext {
            client_id: header_id(parts, CLIENT_ID_HEADER)?,
            tab_id: header_id(parts, TAB_ID_HEADER)?,
        })
    }
}
