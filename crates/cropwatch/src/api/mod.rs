//! HTTP surface consumed by the dashboard pages.

mod error;
mod routes;

use std::sync::Arc;

use axum::routing::{get, patch, post};
use axum::Router;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cropwatch_core::agent::FarmAgent;
use cropwatch_core::detections::DetectionRepository;
use tower_http::trace::TraceLayer;

pub use error::ApiError;

/// Source of "now" for the calendar-day views.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Clock {
    System,
    Fixed(DateTime<Utc>),
}

impl Clock {
    pub fn now(&self) -> DateTime<Utc> {
        match self {
            Clock::System => Utc::now(),
            Clock::Fixed(instant) => *instant,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub repository: Arc<dyn DetectionRepository>,
    pub agent: Arc<FarmAgent>,
    pub timezone: Tz,
    pub clock: Clock,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/agent", post(routes::agent))
        .route("/api/chat", post(routes::agent))
        .route("/api/items", get(routes::items))
        .route("/api/database", get(routes::database))
        .route("/api/detection/history/{device_id}", get(routes::device_history))
        .route("/api/detection/{id}", get(routes::detection))
        .route("/api/detection/{id}/data", get(routes::detection_data))
        .route("/api/detection/{id}/category", patch(routes::update_category))
        .route(
            "/api/priority/{id}",
            get(routes::priority).patch(routes::update_priority),
        )
        .route("/api/tasks", get(routes::tasks))
        .route("/api/test-connection", get(routes::test_connection))
        .route("/api/test-db", get(routes::test_db))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
