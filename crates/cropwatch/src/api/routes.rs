use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, NaiveDate, Utc};
use cropwatch_core::agent::{AgentError, AgentReply};
use cropwatch_core::calendar::LocalDay;
use cropwatch_core::llm::{ChatMessage, Role};
use cropwatch_core::types::{
    CategoryTag, Detection, DetectionRecord, HistoryRecord, Priority, Readings, RelatedImage,
};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::{ApiError, AppState};

/// Page size of the raw database view.
const DATABASE_PAGE_SIZE: i64 = 100;

#[derive(Debug, Serialize)]
pub struct Success<T> {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'static str>,
    data: T,
}

fn success<T: Serialize>(data: T) -> Json<Success<T>> {
    Json(Success {
        status: "success",
        message: None,
        data,
    })
}

/// Request bodies are parsed by hand so that any malformed payload is a 400.
fn parse_body(body: &Bytes) -> Result<Value, ApiError> {
    serde_json::from_slice(body).map_err(|_| ApiError::bad_request("Request body must be valid JSON"))
}

pub async fn agent(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Success<AgentReply>>, ApiError> {
    let payload = parse_body(&body)?;
    let Some(messages) = payload.get("messages").and_then(Value::as_array) else {
        return Err(ApiError::bad_request("Messages are required"));
    };

    let history: Vec<ChatMessage> = messages
        .iter()
        .filter_map(|message| {
            let role = message.get("role").and_then(Value::as_str).and_then(Role::parse)?;
            let content = message.get("content").and_then(Value::as_str).unwrap_or_default();
            match role {
                Role::User => Some(ChatMessage::user(content)),
                Role::Assistant => Some(ChatMessage::assistant(content)),
                Role::System | Role::Tool => None,
            }
        })
        .collect();

    match state.agent.respond(&history).await {
        Ok(reply) => Ok(success(reply)),
        Err(AgentError::EmptyConversation) => Err(ApiError::bad_request(
            "Messages must contain at least one user or assistant message",
        )),
        Err(err) => Err(ApiError::internal("Error processing request", err)),
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ItemsDebug {
    total_records: usize,
    server_date: DateTime<Utc>,
    device_date: NaiveDate,
    timezone: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ItemsResponse {
    status: &'static str,
    data: Vec<Detection>,
    debug: ItemsDebug,
}

pub async fn items(State(state): State<AppState>) -> Result<Json<ItemsResponse>, ApiError> {
    let now = state.clock.now();
    let day = LocalDay::containing(now, state.timezone);
    let rows = state
        .repository
        .detections_between(day.start, day.end)
        .await
        .map_err(|err| ApiError::internal("Failed to fetch data", err))?;

    Ok(Json(ItemsResponse {
        status: "success",
        data: rows.iter().map(Detection::from).collect(),
        debug: ItemsDebug {
            total_records: rows.len(),
            server_date: now,
            device_date: day.date,
            timezone: state.timezone.name(),
        },
    }))
}

pub async fn database(
    State(state): State<AppState>,
) -> Result<Json<Success<Vec<DetectionRecord>>>, ApiError> {
    let rows = state
        .repository
        .recent_detections(DATABASE_PAGE_SIZE)
        .await
        .map_err(|err| ApiError::internal("Failed to fetch database records", err))?;
    Ok(success(rows.into_iter().map(DetectionRecord::from).collect()))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionDetail {
    #[serde(flatten)]
    detection: Detection,
    related_images: Vec<RelatedImage>,
}

pub async fn detection(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Success<DetectionDetail>>, ApiError> {
    let row = state
        .repository
        .detection(&id)
        .await
        .map_err(|err| ApiError::internal("Failed to fetch detection", err))?
        .ok_or_else(|| ApiError::not_found("Record not found"))?;

    let related = state
        .repository
        .related_detections(&row.device_id, row.time, &row.image_id)
        .await
        .map_err(|err| ApiError::internal("Failed to fetch detection", err))?;

    let mut related_images = Vec::with_capacity(related.len() + 1);
    related_images.push(RelatedImage::from(&row));
    related_images.extend(related.iter().map(RelatedImage::from));

    Ok(success(DetectionDetail {
        detection: Detection::from(&row),
        related_images,
    }))
}

pub async fn detection_data(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Success<Readings>>, ApiError> {
    let readings = state
        .repository
        .readings(&id)
        .await
        .map_err(|err| ApiError::internal("Failed to fetch detection data", err))?
        .ok_or_else(|| ApiError::not_found("Record not found"))?;
    Ok(success(readings))
}

#[derive(Debug, Serialize)]
pub struct CategoryChange {
    id: String,
    category: String,
    timestamp: DateTime<Utc>,
}

pub async fn update_category(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<Success<CategoryChange>>, ApiError> {
    let payload = parse_body(&body)?;
    let tag = payload
        .get("category")
        .and_then(Value::as_str)
        .ok_or_else(|| ApiError::bad_request("Invalid category tag"))?
        .parse::<CategoryTag>()
        .map_err(|err| ApiError::bad_request(err.to_string()))?;

    let updated = state
        .repository
        .update_category(&id, tag)
        .await
        .map_err(|err| ApiError::internal("Failed to update category", err))?
        .ok_or_else(|| ApiError::not_found("Record not found"))?;

    info!(image_id = %updated.image_id, category = %updated.category_tag, "category updated");
    Ok(success(CategoryChange {
        category: CategoryTag::display_label(&updated.category_tag),
        id: updated.image_id,
        timestamp: updated.time,
    }))
}

pub async fn device_history(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<Json<Success<Vec<HistoryRecord>>>, ApiError> {
    let rows = state
        .repository
        .device_history(&device_id)
        .await
        .map_err(|err| ApiError::internal("Failed to fetch device history", err))?;
    Ok(success(rows))
}

#[derive(Debug, Serialize)]
pub struct PriorityLevel {
    priority: i64,
}

pub async fn priority(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Success<PriorityLevel>>, ApiError> {
    let stored = state
        .repository
        .priority(&id)
        .await
        .map_err(|err| ApiError::internal("Failed to fetch priority", err))?
        .ok_or_else(|| ApiError::not_found("Image not found"))?;
    Ok(success(PriorityLevel {
        priority: Priority::parse_stored(stored.as_deref()),
    }))
}

pub async fn update_priority(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<Success<PriorityLevel>>, ApiError> {
    const INVALID: &str = "Invalid priority value. Priority must be 0, 1 or 2";

    let payload = parse_body(&body)?;
    // JSON clients may send 1.0 for 1.
    let level = payload
        .get("priority")
        .and_then(Value::as_f64)
        .filter(|value| value.is_finite() && value.fract() == 0.0)
        .map(|value| value as i64)
        .ok_or_else(|| ApiError::bad_request(INVALID))?;
    let priority = Priority::from_level(level).map_err(|err| {
        warn!(image_id = %id, %err, "rejected priority update");
        ApiError::bad_request(INVALID)
    })?;

    let updated = state
        .repository
        .set_priority(&id, priority)
        .await
        .map_err(|err| ApiError::internal("Failed to update priority", err))?;
    if !updated {
        return Err(ApiError::not_found("Image not found"));
    }

    Ok(Json(Success {
        status: "success",
        message: Some("Priority updated"),
        data: PriorityLevel {
            priority: priority.level(),
        },
    }))
}

pub async fn tasks(
    State(state): State<AppState>,
) -> Result<Json<Success<Vec<DetectionRecord>>>, ApiError> {
    let rows = state
        .repository
        .tasks()
        .await
        .map_err(|err| ApiError::internal("Failed to fetch task list", err))?;
    Ok(success(rows.into_iter().map(DetectionRecord::from).collect()))
}

pub async fn test_connection(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    state
        .repository
        .ping()
        .await
        .map_err(|err| ApiError::internal("Database connection failed", err))?;
    Ok(Json(json!({
        "status": "success",
        "message": "Database connection successful",
    })))
}

pub async fn test_db(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let count = state
        .repository
        .count()
        .await
        .map_err(|err| ApiError::internal("Database connection failed", err))?;
    Ok(Json(json!({
        "status": "success",
        "count": count,
        "message": "Database connection successful",
    })))
}
