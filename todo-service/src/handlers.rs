use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use sqlx::PgPool;

use crate::models::*;

type ApiError = (StatusCode, Json<ErrorResponse>);

fn db_error(context: &str, e: sqlx::Error) -> ApiError {
    tracing::error!("{}: {}", context, e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::with_details(DB_ERROR, e.to_string())),
    )
}

fn invalid_id() -> ApiError {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(INVALID_ID)))
}

fn validation_error(details: Option<String>) -> ApiError {
    let body = match details {
        Some(details) => ErrorResponse::with_details(VALIDATION_ERROR, details),
        None => ErrorResponse::new(VALIDATION_ERROR),
    };
    (StatusCode::BAD_REQUEST, Json(body))
}

/// Ids are positive integers; anything else is rejected before touching the store.
fn parse_id(raw: &str) -> Result<i64, ApiError> {
    raw.parse::<i64>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(invalid_id)
}

fn title_details() -> String {
    format!("title must be between 1 and {} characters", TITLE_MAX_CHARS)
}

pub async fn healthz() -> Json<Value> {
    Json(json!({ "ok": true }))
}

// ============================
// Todo Handlers
// ============================

pub async fn list_todos(State(pool): State<PgPool>) -> Result<Json<Vec<Todo>>, ApiError> {
    let todos = sqlx::query_as::<_, Todo>(
        "SELECT id, title, done, created_at, updated_at FROM todos ORDER BY id DESC",
    )
    .fetch_all(&pool)
    .await
    .map_err(|e| db_error("Failed to fetch todos", e))?;

    Ok(Json(todos))
}

pub async fn create_todo(
    State(pool): State<PgPool>,
    payload: Result<Json<CreateTodoRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Todo>), ApiError> {
    let Json(payload) = payload.map_err(|_| validation_error(None))?;
    if !title_is_valid(&payload.title) {
        return Err(validation_error(Some(title_details())));
    }

    let todo = sqlx::query_as::<_, Todo>(
        r#"
        INSERT INTO todos (title)
        VALUES ($1)
        RETURNING id, title, done, created_at, updated_at
        "#,
    )
    .bind(payload.title)
    .fetch_one(&pool)
    .await
    .map_err(|e| db_error("Failed to create todo", e))?;

    Ok((StatusCode::CREATED, Json(todo)))
}

pub async fn update_todo(
    State(pool): State<PgPool>,
    Path(id): Path<String>,
    payload: Result<Json<UpdateTodoRequest>, JsonRejection>,
) -> Result<Json<Todo>, ApiError> {
    let id = parse_id(&id)?;
    let Json(payload) = payload.map_err(|_| validation_error(None))?;
    if let Some(title) = payload.title.as_deref() {
        if !title_is_valid(title) {
            return Err(validation_error(Some(title_details())));
        }
    }

    // Absent fields keep their stored value.
    let todo = sqlx::query_as::<_, Todo>(
        r#"
        UPDATE todos
        SET title = COALESCE($1, title),
            done = COALESCE($2, done),
            updated_at = NOW()
        WHERE id = $3
        RETURNING id, title, done, created_at, updated_at
        "#,
    )
    .bind(payload.title)
    .bind(payload.done)
    .bind(id)
    .fetch_optional(&pool)
    .await
    .map_err(|e| db_error("Failed to update todo", e))?
    .ok_or((StatusCode::NOT_FOUND, Json(ErrorResponse::new(NOT_FOUND))))?;

    Ok(Json(todo))
}

/// Deleting a missing todo still answers 204.
pub async fn delete_todo(
    State(pool): State<PgPool>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_id(&id)?;

    sqlx::query("DELETE FROM todos WHERE id = $1")
        .bind(id)
        .execute(&pool)
        .await
        .map_err(|e| db_error("Failed to delete todo", e))?;

    Ok(StatusCode::NO_CONTENT)
}
