// crates/cropwatch-core/src/types.rs

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValueError {
    #[error("invalid category tag '{0}'")]
    InvalidCategory(String),

    #[error("invalid priority value {0}; priority must be 0, 1 or 2")]
    InvalidPriority(i64),
}

/// Problem classification attached to a detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CategoryTag {
    Disease,
    Weeds,
    Drought,
    Healthy,
    Ponding,
    Pest,
}

impl CategoryTag {
    pub const ALL: [CategoryTag; 6] = [
        CategoryTag::Disease,
        CategoryTag::Weeds,
        CategoryTag::Drought,
        CategoryTag::Healthy,
        CategoryTag::Ponding,
        CategoryTag::Pest,
    ];

    /// Lower-case form used by the UI contract.
    pub fn as_str(&self) -> &'static str {
        match self {
            CategoryTag::Disease => "disease",
            CategoryTag::Weeds => "weeds",
            CategoryTag::Drought => "drought",
            CategoryTag::Healthy => "healthy",
            CategoryTag::Ponding => "ponding",
            CategoryTag::Pest => "pest",
        }
    }

    /// Capitalized form written to `image_data.category_tag`.
    pub fn stored(&self) -> &'static str {
        match self {
            CategoryTag::Disease => "Disease",
            CategoryTag::Weeds => "Weeds",
            CategoryTag::Drought => "Drought",
            CategoryTag::Healthy => "Healthy",
            CategoryTag::Ponding => "Ponding",
            CategoryTag::Pest => "Pest",
        }
    }

    /// Case-insensitive lookup that also accepts the legacy spellings
    /// `waterpooling` (now `ponding`) and `pests` (now `pest`).
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "disease" => Some(CategoryTag::Disease),
            "weeds" => Some(CategoryTag::Weeds),
            "drought" => Some(CategoryTag::Drought),
            "healthy" => Some(CategoryTag::Healthy),
            "ponding" | "waterpooling" => Some(CategoryTag::Ponding),
            "pest" | "pests" => Some(CategoryTag::Pest),
            _ => None,
        }
    }

    /// Maps whatever is stored in the database to the UI vocabulary. Values
    /// outside the closed set are passed through lower-cased.
    pub fn display_label(stored: &str) -> String {
        match Self::parse(stored) {
            Some(tag) => tag.as_str().to_string(),
            None => stored.to_lowercase(),
        }
    }
}

impl fmt::Display for CategoryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CategoryTag {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| ValueError::InvalidCategory(s.to_string()))
    }
}

/// Urgency level of a detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Low = 0,
    Medium = 1,
    High = 2,
}

impl Priority {
    pub fn from_level(level: i64) -> Result<Self, ValueError> {
        match level {
            0 => Ok(Priority::Low),
            1 => Ok(Priority::Medium),
            2 => Ok(Priority::High),
            other => Err(ValueError::InvalidPriority(other)),
        }
    }

    pub fn level(&self) -> i64 {
        *self as i64
    }

    /// The UI toggle order: low → medium → high → low.
    pub fn next(&self) -> Self {
        match self {
            Priority::Low => Priority::Medium,
            Priority::Medium => Priority::High,
            Priority::High => Priority::Low,
        }
    }

    /// Reads a stored priority. The column has held free-form codes such as
    /// `"1-urgent"`, so only the leading digits are considered; anything
    /// unparsable reads as 0.
    pub fn parse_stored(raw: Option<&str>) -> i64 {
        let Some(raw) = raw else {
            return 0;
        };
        let digits: String = raw
            .trim()
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        digits.parse().unwrap_or(0)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.level())
    }
}

/// One row of `image_data` as read by the repository.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct DetectionRow {
    pub image_id: String,
    pub image_url: String,
    pub time: DateTime<Utc>,
    pub device_id: String,
    pub device_name: Option<String>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub category_tag: String,
    pub ai_analysis: Option<String>,
    pub priority: Option<String>,
}

/// Detection in the shape the dashboard pages consume.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Detection {
    pub id: String,
    pub image_url: String,
    pub device_id: String,
    pub device_name: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub category: String,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub analysis: Option<String>,
}

impl From<&DetectionRow> for Detection {
    fn from(row: &DetectionRow) -> Self {
        Detection {
            id: row.image_id.clone(),
            image_url: row.image_url.clone(),
            device_id: row.device_id.clone(),
            device_name: row.device_name.clone(),
            timestamp: row.time,
            category: CategoryTag::display_label(&row.category_tag),
            temperature: row.temperature,
            humidity: row.humidity,
            analysis: row.ai_analysis.clone(),
        }
    }
}

/// Detection in the raw column shape used by the database and task views.
#[derive(Debug, Clone, Serialize)]
pub struct DetectionRecord {
    pub image_id: String,
    pub image_url: String,
    pub time: DateTime<Utc>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub category_tag: String,
    #[serde(rename = "AI_analysis")]
    pub ai_analysis: Option<String>,
    pub priority: i64,
    pub device_id: String,
}

impl From<DetectionRow> for DetectionRecord {
    fn from(row: DetectionRow) -> Self {
        DetectionRecord {
            priority: Priority::parse_stored(row.priority.as_deref()),
            image_id: row.image_id,
            image_url: row.image_url,
            time: row.time,
            temperature: row.temperature,
            humidity: row.humidity,
            category_tag: row.category_tag,
            ai_analysis: row.ai_analysis,
            device_id: row.device_id,
        }
    }
}

/// Thumbnail entry for the detail page carousel.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelatedImage {
    pub id: String,
    pub image_url: String,
    pub timestamp: DateTime<Utc>,
    pub category: String,
}

impl From<&DetectionRow> for RelatedImage {
    fn from(row: &DetectionRow) -> Self {
        RelatedImage {
            id: row.image_id.clone(),
            image_url: row.image_url.clone(),
            timestamp: row.time,
            category: CategoryTag::display_label(&row.category_tag),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct Readings {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    #[sqlx(rename = "ai_analysis")]
    pub analysis: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct HistoryRecord {
    pub image_id: String,
    pub image_url: String,
    pub time: DateTime<Utc>,
    pub category_tag: String,
    pub device_id: String,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct CategoryUpdate {
    pub image_id: String,
    pub category_tag: String,
    pub time: DateTime<Utc>,
}
