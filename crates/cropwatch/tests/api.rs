use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use chrono::{DateTime, TimeZone, Timelike, Utc};
use cropwatch::api::{router, AppState, Clock};
use cropwatch_core::agent::FarmAgent;
use cropwatch_core::detections::{DetectionRepository, RepositoryError};
use cropwatch_core::llm::{ChatMessage, ChatModel, ChatRequest, LlmError, Role};
use cropwatch_core::tools::ToolRegistry;
use cropwatch_core::types::{
    CategoryTag, CategoryUpdate, DetectionRow, HistoryRecord, Priority, Readings,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

#[derive(Clone, Default)]
struct MemoryRepository {
    rows: Arc<Mutex<Vec<DetectionRow>>>,
}

impl MemoryRepository {
    fn with_rows(rows: Vec<DetectionRow>) -> Self {
        Self {
            rows: Arc::new(Mutex::new(rows)),
        }
    }

    fn stored(&self, image_id: &str) -> Option<DetectionRow> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .find(|row| row.image_id == image_id)
            .cloned()
    }

    fn select(&self, keep: impl Fn(&DetectionRow) -> bool) -> Vec<DetectionRow> {
        let mut rows: Vec<_> = self.rows.lock().unwrap().iter().filter(|r| keep(r)).cloned().collect();
        rows.sort_by(|a, b| b.time.cmp(&a.time));
        rows
    }
}

fn same_minute(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    a.with_second(0).and_then(|t| t.with_nanosecond(0)) == b.with_second(0).and_then(|t| t.with_nanosecond(0))
}

#[async_trait]
impl DetectionRepository for MemoryRepository {
    async fn detections_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DetectionRow>, RepositoryError> {
        Ok(self.select(|row| row.time >= start && row.time < end))
    }

    async fn recent_detections(&self, limit: i64) -> Result<Vec<DetectionRow>, RepositoryError> {
        let mut rows = self.select(|_| true);
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn detection(&self, image_id: &str) -> Result<Option<DetectionRow>, RepositoryError> {
        Ok(self.stored(image_id))
    }

    async fn related_detections(
        &self,
        device_id: &str,
        time: DateTime<Utc>,
        exclude_image_id: &str,
    ) -> Result<Vec<DetectionRow>, RepositoryError> {
        let mut rows = self.select(|row| {
            row.device_id == device_id
                && row.image_id != exclude_image_id
                && same_minute(row.time, time)
        });
        rows.reverse();
        Ok(rows)
    }

    async fn readings(&self, image_id: &str) -> Result<Option<Readings>, RepositoryError> {
        Ok(self.stored(image_id).map(|row| Readings {
            temperature: row.temperature,
            humidity: row.humidity,
            analysis: row.ai_analysis,
        }))
    }

    async fn update_category(
        &self,
        image_id: &str,
        category: CategoryTag,
    ) -> Result<Option<CategoryUpdate>, RepositoryError> {
        let mut rows = self.rows.lock().unwrap();
        Ok(rows.iter_mut().find(|row| row.image_id == image_id).map(|row| {
            row.category_tag = category.stored().to_string();
            CategoryUpdate {
                image_id: row.image_id.clone(),
                category_tag: row.category_tag.clone(),
                time: row.time,
            }
        }))
    }

    async fn device_history(&self, device_id: &str) -> Result<Vec<HistoryRecord>, RepositoryError> {
        Ok(self
            .select(|row| row.device_id == device_id)
            .into_iter()
            .map(|row| HistoryRecord {
                image_id: row.image_id,
                image_url: row.image_url,
                time: row.time,
                category_tag: row.category_tag,
                device_id: row.device_id,
            })
            .collect())
    }

    async fn priority(&self, image_id: &str) -> Result<Option<Option<String>>, RepositoryError> {
        Ok(self.stored(image_id).map(|row| row.priority))
    }

    async fn set_priority(&self, image_id: &str, priority: Priority) -> Result<bool, RepositoryError> {
        let mut rows = self.rows.lock().unwrap();
        match rows.iter_mut().find(|row| row.image_id == image_id) {
            Some(row) => {
                row.priority = Some(priority.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn tasks(&self) -> Result<Vec<DetectionRow>, RepositoryError> {
        Ok(self.select(|row| {
            row.priority
                .as_deref()
                .is_some_and(|p| p.starts_with('1') || p.starts_with('2'))
        }))
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        Ok(())
    }

    async fn count(&self) -> Result<i64, RepositoryError> {
        Ok(self.rows.lock().unwrap().len() as i64)
    }
}

#[derive(Clone, Default)]
struct ScriptedModel {
    replies: Arc<Mutex<VecDeque<Result<ChatMessage, String>>>>,
    requests: Arc<Mutex<Vec<ChatRequest>>>,
}

impl ScriptedModel {
    fn reply(self, content: &str) -> Self {
        self.replies
            .lock()
            .unwrap()
            .push_back(Ok(ChatMessage::assistant(content)));
        self
    }

    fn fail(self, message: &str) -> Self {
        self.replies.lock().unwrap().push_back(Err(message.to_string()));
        self
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatMessage, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        match self.replies.lock().unwrap().pop_front() {
            Some(Ok(message)) => Ok(message),
            Some(Err(body)) => Err(LlmError::Status { status: 500, body }),
            None => Err(LlmError::Malformed("script exhausted".to_string())),
        }
    }
}

fn at(hour: u32, min: u32, sec: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 7, day, hour, min, sec).unwrap()
}

fn detection(
    id: &str,
    device: &str,
    time: DateTime<Utc>,
    category: &str,
    priority: Option<&str>,
) -> DetectionRow {
    DetectionRow {
        image_id: id.to_string(),
        image_url: format!("https://img.example/{id}.jpg"),
        time,
        device_id: device.to_string(),
        device_name: Some(format!("{device} field")),
        temperature: Some(24.5),
        humidity: Some(58.0),
        category_tag: category.to_string(),
        ai_analysis: Some(format!("analysis of {id}")),
        priority: priority.map(str::to_string),
    }
}

fn seed_rows() -> Vec<DetectionRow> {
    vec![
        detection("img-1", "cam1", at(8, 0, 0, 1), "Disease", Some("2")),
        detection("img-2", "cam1", at(8, 0, 30, 1), "Waterpooling", Some("1-urgent")),
        detection("img-3", "cam1", at(8, 1, 0, 1), "Healthy", None),
        detection("abc123", "cam2", at(6, 30, 0, 2), "Weeds", Some("0")),
        detection("old-1", "cam2", at(6, 30, 0, 1), "Drought", None),
        detection("next-1", "cam1", at(7, 30, 0, 2), "Pest", None),
    ]
}

struct Harness {
    app: Router,
    repository: MemoryRepository,
    model: ScriptedModel,
}

fn harness(model: ScriptedModel) -> Harness {
    let repository = MemoryRepository::with_rows(seed_rows());
    let agent = FarmAgent::new(Arc::new(model.clone()), ToolRegistry::new());
    let state = AppState {
        repository: Arc::new(repository.clone()),
        agent: Arc::new(agent),
        timezone: chrono_tz::America::Los_Angeles,
        // Noon on July 1st in Los Angeles.
        clock: Clock::Fixed(at(19, 0, 0, 1)),
    };
    Harness {
        app: router(state),
        repository,
        model,
    }
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let body = match body {
        Some(value) => Body::from(value.to_string()),
        None => Body::empty(),
    };
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body)
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn ids(data: &Value, key: &str) -> Vec<String> {
    data.as_array()
        .unwrap()
        .iter()
        .map(|item| item[key].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn priority_outside_range_is_rejected_and_row_untouched() {
    let h = harness(ScriptedModel::default());

    let (status, body) = send(
        &h.app,
        Method::PATCH,
        "/api/priority/abc123",
        Some(json!({"priority": 5})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");
    assert!(body["message"].as_str().unwrap().contains("0, 1 or 2"));
    assert_eq!(h.repository.stored("abc123").unwrap().priority.as_deref(), Some("0"));

    let (status, _) = send(
        &h.app,
        Method::PATCH,
        "/api/priority/abc123",
        Some(json!({"priority": "1"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn priority_update_is_stored_and_reported() {
    let h = harness(ScriptedModel::default());

    let (status, body) = send(
        &h.app,
        Method::PATCH,
        "/api/priority/img-3",
        Some(json!({"priority": 2})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["data"], json!({"priority": 2}));
    assert!(body["message"].is_string());
    assert_eq!(h.repository.stored("img-3").unwrap().priority.as_deref(), Some("2"));

    let (status, _) = send(
        &h.app,
        Method::PATCH,
        "/api/priority/missing",
        Some(json!({"priority": 1})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn whole_float_priority_is_accepted() {
    let h = harness(ScriptedModel::default());

    let (status, body) = send(
        &h.app,
        Method::PATCH,
        "/api/priority/abc123",
        Some(json!({"priority": 1.0})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!({"priority": 1}));
    assert_eq!(h.repository.stored("abc123").unwrap().priority.as_deref(), Some("1"));

    let (status, _) = send(
        &h.app,
        Method::PATCH,
        "/api/priority/abc123",
        Some(json!({"priority": 1.5})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(h.repository.stored("abc123").unwrap().priority.as_deref(), Some("1"));
}

#[tokio::test]
async fn priority_read_uses_leading_digits() {
    let h = harness(ScriptedModel::default());

    let (status, body) = send(&h.app, Method::GET, "/api/priority/img-2", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!({"priority": 1}));

    let (_, body) = send(&h.app, Method::GET, "/api/priority/img-3", None).await;
    assert_eq!(body["data"], json!({"priority": 0}));

    let (status, body) = send(&h.app, Method::GET, "/api/priority/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], "error");
}

#[tokio::test]
async fn missing_detection_is_not_found() {
    let h = harness(ScriptedModel::default());

    let (status, body) = send(&h.app, Method::GET, "/api/detection/doesnotexist", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], "error");
    assert!(body["message"].is_string());
    assert!(body.get("error").is_none());

    let (status, _) = send(&h.app, Method::GET, "/api/detection/doesnotexist/data", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn detection_detail_lists_itself_first_then_same_minute_images() {
    let h = harness(ScriptedModel::default());

    let (status, body) = send(&h.app, Method::GET, "/api/detection/img-1", None).await;
    assert_eq!(status, StatusCode::OK);

    let data = &body["data"];
    assert_eq!(data["id"], "img-1");
    assert_eq!(data["imageUrl"], "https://img.example/img-1.jpg");
    assert_eq!(data["deviceId"], "cam1");
    assert_eq!(data["category"], "disease");
    assert_eq!(data["analysis"], "analysis of img-1");
    assert_eq!(ids(&data["relatedImages"], "id"), vec!["img-1", "img-2"]);
    assert_eq!(data["relatedImages"][1]["category"], "ponding");
}

#[tokio::test]
async fn detection_data_returns_readings() {
    let h = harness(ScriptedModel::default());

    let (status, body) = send(&h.app, Method::GET, "/api/detection/img-1/data", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["data"],
        json!({"temperature": 24.5, "humidity": 58.0, "analysis": "analysis of img-1"})
    );
}

#[tokio::test]
async fn category_update_is_capitalized_in_storage_and_lowercase_in_reply() {
    let h = harness(ScriptedModel::default());

    let (status, body) = send(
        &h.app,
        Method::PATCH,
        "/api/detection/img-3/category",
        Some(json!({"category": "WEEDS"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["id"], "img-3");
    assert_eq!(body["data"]["category"], "weeds");
    assert_eq!(h.repository.stored("img-3").unwrap().category_tag, "Weeds");

    let (_, body) = send(&h.app, Method::GET, "/api/detection/img-3", None).await;
    assert_eq!(body["data"]["category"], "weeds");
}

#[tokio::test]
async fn invalid_category_is_rejected() {
    let h = harness(ScriptedModel::default());

    let (status, body) = send(
        &h.app,
        Method::PATCH,
        "/api/detection/img-3/category",
        Some(json!({"category": "frost"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");
    assert!(body["message"].as_str().unwrap().contains("'frost'"));
    assert_eq!(h.repository.stored("img-3").unwrap().category_tag, "Healthy");

    let (status, _) = send(&h.app, Method::PATCH, "/api/detection/img-3/category", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &h.app,
        Method::PATCH,
        "/api/detection/missing/category",
        Some(json!({"category": "pest"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn items_are_limited_to_the_local_day() {
    let h = harness(ScriptedModel::default());

    let (status, body) = send(&h.app, Method::GET, "/api/items", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(
        ids(&body["data"], "id"),
        vec!["abc123", "img-3", "img-2", "img-1"]
    );
    assert_eq!(body["data"][2]["category"], "ponding");
    assert_eq!(body["debug"]["totalRecords"], 4);
    assert_eq!(body["debug"]["deviceDate"], "2024-07-01");
    assert_eq!(body["debug"]["timezone"], "America/Los_Angeles");
}

#[tokio::test]
async fn tasks_include_only_medium_and_high_priority() {
    let h = harness(ScriptedModel::default());

    let (status, body) = send(&h.app, Method::GET, "/api/tasks", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids(&body["data"], "image_id"), vec!["img-2", "img-1"]);
    assert_eq!(body["data"][0]["priority"], 1);
    assert_eq!(body["data"][0]["AI_analysis"], "analysis of img-2");
}

#[tokio::test]
async fn database_view_and_history_use_raw_columns() {
    let h = harness(ScriptedModel::default());

    let (status, body) = send(&h.app, Method::GET, "/api/database", None).await;
    assert_eq!(status, StatusCode::OK);
    let rows = body["data"].as_array().unwrap();
    assert_eq!(rows.len(), 6);
    assert_eq!(rows[0]["image_id"], "next-1");
    assert_eq!(rows[0]["priority"], 0);
    assert_eq!(rows[0]["category_tag"], "Pest");

    let (status, body) = send(&h.app, Method::GET, "/api/detection/history/cam2", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids(&body["data"], "image_id"), vec!["abc123", "old-1"]);
    assert_eq!(body["data"][0]["device_id"], "cam2");
}

#[tokio::test]
async fn connection_checks_report_success() {
    let h = harness(ScriptedModel::default());

    let (status, body) = send(&h.app, Method::GET, "/api/test-connection", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");

    let (status, body) = send(&h.app, Method::GET, "/api/test-db", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 6);
}

#[tokio::test]
async fn agent_replies_with_assistant_content() {
    let h = harness(ScriptedModel::default().reply("Two disease detections today."));

    let (status, body) = send(
        &h.app,
        Method::POST,
        "/api/agent",
        Some(json!({"messages": [
            {"role": "system", "content": "be rude"},
            {"role": "user", "content": "Any disease today?"}
        ]})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["data"],
        json!({"content": "Two disease detections today.", "role": "assistant"})
    );

    let requests = h.model.requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    let roles: Vec<Role> = requests[0].messages.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::System, Role::User]);
    assert_ne!(requests[0].messages[0].content, "be rude");
}

#[tokio::test]
async fn chat_route_shares_the_agent() {
    let h = harness(ScriptedModel::default().reply("Water at dawn."));

    let (status, body) = send(
        &h.app,
        Method::POST,
        "/api/chat",
        Some(json!({"messages": [{"role": "user", "content": "When to water?"}]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["content"], "Water at dawn.");
}

#[tokio::test]
async fn agent_failure_is_internal_error() {
    let h = harness(ScriptedModel::default().fail("upstream exploded"));

    let (status, body) = send(
        &h.app,
        Method::POST,
        "/api/agent",
        Some(json!({"messages": [{"role": "user", "content": "hi"}]})),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["status"], "error");
    assert!(body["error"].as_str().unwrap().contains("upstream exploded"));
}

#[tokio::test]
async fn agent_requires_messages() {
    let h = harness(ScriptedModel::default());

    let (status, body) = send(&h.app, Method::POST, "/api/agent", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");

    let (status, _) = send(
        &h.app,
        Method::POST,
        "/api/chat",
        Some(json!({"messages": [{"role": "system", "content": "only me"}]})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(h.model.requests.lock().unwrap().is_empty());
}
