//! The `query_farm_database` tool: translate a question, run it, report the rows.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::executor::{QueryExecutor, QueryRow};
use crate::tools::Tool;
use crate::translator::{SqlTranslator, TableSchema};

pub const QUERY_TOOL_NAME: &str = "query_farm_database";

pub struct FarmQueryTool {
    translator: SqlTranslator,
    executor: Arc<dyn QueryExecutor>,
    description: String,
}

impl fmt::Debug for FarmQueryTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FarmQueryTool")
            .field("table", &self.translator.schema().table)
            .finish()
    }
}

impl FarmQueryTool {
    pub fn new(translator: SqlTranslator, executor: Arc<dyn QueryExecutor>) -> Self {
        let description = describe_tool(translator.schema());
        Self {
            translator,
            executor,
            description,
        }
    }

    /// Translate, execute, format. Every failure becomes report text.
    pub async fn run(&self, question: &str) -> String {
        let sql = match self.translator.translate(question).await {
            Ok(sql) => sql,
            Err(err) => {
                warn!(error = %err, "sql translation failed");
                return failure_text(&err.to_string());
            }
        };

        match self.executor.execute(&sql, &[]).await {
            Ok(rows) => {
                info!(rows = rows.len(), sql = %sql, "farm database query succeeded");
                format_report(&sql, &rows)
            }
            Err(err) => {
                warn!(error = %err, sql = %sql, "farm database query failed");
                failure_text(&err.to_string())
            }
        }
    }
}

#[async_trait]
impl Tool for FarmQueryTool {
    fn name(&self) -> &str {
        QUERY_TOOL_NAME
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn args_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "question": {
                    "type": "string",
                    "description": "The user's question about the farm data, in natural language"
                }
            },
            "required": ["question"]
        })
    }

    async fn call(&self, args: Value) -> String {
        match question_from_args(&args) {
            Some(question) => self.run(question).await,
            None => failure_text("the tool expects a non-empty \"question\" string argument"),
        }
    }
}

/// Accepts `{"question": …}`, `{"input": …}` or a bare JSON string.
fn question_from_args(args: &Value) -> Option<&str> {
    let question = match args {
        Value::String(text) => Some(text.as_str()),
        Value::Object(map) => map
            .get("question")
            .or_else(|| map.get("input"))
            .and_then(Value::as_str),
        _ => None,
    }?;
    let question = question.trim();
    (!question.is_empty()).then_some(question)
}

fn describe_tool(schema: &TableSchema) -> String {
    format!(
        "Queries the farm monitoring database: problem category statistics, \
         temperature and humidity readings, crop health status and similar. \
         The question is converted to SQL and run against the database; \
         real-time questions use the database clock.\n{}",
        schema.describe()
    )
}

pub fn format_report(sql: &str, rows: &[QueryRow]) -> String {
    let formatted = serde_json::to_string_pretty(rows).unwrap_or_else(|_| "[]".to_string());
    format!(
        "Here is what I found in the farm database:\n\n\
         SQL query:\n```sql\n{sql}\n```\n\n\
         Query results:\n```json\n{formatted}\n```\n"
    )
}

fn failure_text(message: &str) -> String {
    format!(
        "Error querying the farm database: {message}. \
         Check the database connection settings or the SQL query syntax."
    )
}
