use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub const TITLE_MAX_CHARS: usize = 255;

// ============================
// Todo Models
// ============================

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Todo {
    pub id: i64,
    pub title: String,
    pub done: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTodoRequest {
    pub title: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTodoRequest {
    pub title: Option<String>,
    pub done: Option<bool>,
}

/// A title must be non-empty and at most [`TITLE_MAX_CHARS`] characters.
pub fn title_is_valid(title: &str) -> bool {
    let len = title.chars().count();
    (1..=TITLE_MAX_CHARS).contains(&len)
}

// ============================
// Error Types
// ============================

pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
pub const INVALID_ID: &str = "INVALID_ID";
pub const NOT_FOUND: &str = "NOT_FOUND";
pub const DB_ERROR: &str = "DB_ERROR";
pub const RATE_LIMITED: &str = "RATE_LIMITED";

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(code: &str) -> Self {
        Self {
            error: code.to_string(),
            details: None,
        }
    }

    pub fn with_details(code: &str, details: impl Into<String>) -> Self {
        Self {
            error: code.to_string(),
            details: Some(details.into()),
        }
    }
}
