//! Natural-language question → SQL statement, via a language model.

use std::fmt::Write as _;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::llm::{ChatMessage, ChatModel, ChatRequest, LlmError};
use crate::types::CategoryTag;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub sql_type: &'static str,
    pub meaning: String,
}

/// Schema description handed to the model with every question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub table: &'static str,
    pub columns: Vec<ColumnSpec>,
}

impl TableSchema {
    /// The `image_data` detection table.
    pub fn farm() -> Self {
        let categories: Vec<String> = CategoryTag::ALL
            .iter()
            .map(|tag| format!("\"{}\"", tag.stored()))
            .collect();

        let column = |name, sql_type, meaning: &str| ColumnSpec {
            name,
            sql_type,
            meaning: meaning.to_string(),
        };

        TableSchema {
            table: "image_data",
            columns: vec![
                column("image_id", "text", "unique image identifier"),
                column("device_id", "text", "id of the capturing device"),
                column("device_name", "text", "display name of the device"),
                column("time", "timestamptz", "capture time"),
                column("temperature", "double precision", "temperature in °C"),
                column("humidity", "double precision", "relative humidity in %"),
                column(
                    "category_tag",
                    "text",
                    &format!("problem category, one of [{}]", categories.join(", ")),
                ),
                column("ai_analysis", "text", "text description of the AI analysis"),
                column(
                    "priority",
                    "text",
                    "problem priority: '0' low, '1' medium, '2' high",
                ),
            ],
        }
    }

    pub fn describe(&self) -> String {
        let mut out = format!("Table: {}\nColumns:\n", self.table);
        for column in &self.columns {
            let _ = writeln!(out, "- {} ({}): {}", column.name, column.sql_type, column.meaning);
        }
        out
    }
}

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error(transparent)]
    Model(#[from] LlmError),

    #[error("language model returned no SQL")]
    EmptyResponse,
}

pub struct SqlTranslator {
    model: Arc<dyn ChatModel>,
    schema: TableSchema,
}

impl SqlTranslator {
    pub fn new(model: Arc<dyn ChatModel>, schema: TableSchema) -> Self {
        Self { model, schema }
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn prompt(&self, question: &str) -> String {
        format!(
            "Convert the following natural-language question into a SQL query.\n\
             The query must target this table: {table}\n\
             {schema}\n\
             Return only the SQL statement, with syntax compatible with PostgreSQL. \
             Do not include any other explanation. \
             For the current date or time, use the database clock (NOW()).\n\n\
             User question: {question}\n",
            table = self.schema.table,
            schema = self.schema.describe(),
        )
    }

    /// One deterministic (temperature 0) completion; no retry.
    pub async fn translate(&self, question: &str) -> Result<String, TranslateError> {
        let request =
            ChatRequest::new(vec![ChatMessage::user(self.prompt(question))]).with_temperature(0.0);
        let reply = self.model.chat(&request).await?;

        let sql = strip_code_fence(&reply.content);
        if sql.is_empty() {
            return Err(TranslateError::EmptyResponse);
        }
        debug!(model = self.model.model_name(), sql = %sql, "translated question");
        Ok(sql)
    }
}

/// Trims the reply and drops a surrounding Markdown fence (```sql … ```).
pub fn strip_code_fence(text: &str) -> String {
    let text = text.trim();
    if let Some(rest) = text.strip_prefix("```") {
        let body = match rest.find('\n') {
            Some(newline) => &rest[newline + 1..],
            None => strip_language_tag(rest),
        };
        let body = body.trim_end();
        let body = body.strip_suffix("```").unwrap_or(body);
        return body.trim().to_string();
    }
    text.to_string()
}

// Single-line fences put the tag and the statement on one line: ```sql SELECT 1```
fn strip_language_tag(line: &str) -> &str {
    const TAGS: [&str; 5] = ["sql", "postgresql", "postgres", "pgsql", "psql"];
    match line.split_once(char::is_whitespace) {
        Some((tag, rest)) if TAGS.iter().any(|t| tag.eq_ignore_ascii_case(t)) => rest,
        _ => line,
    }
}
