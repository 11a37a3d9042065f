use std::sync::Arc;

use cropwatch_core::agent::FarmAgent;
use cropwatch_core::config::{ConfigError, LlmSettings};
use cropwatch_core::executor::QueryExecutor;
use cropwatch_core::llm::{ChatModel, OpenAiChatModel};
use cropwatch_core::query_tool::FarmQueryTool;
use cropwatch_core::tools::ToolRegistry;
use cropwatch_core::translator::{SqlTranslator, TableSchema};
use tracing::info;

/// Builds the farm agent with its database query tool. The agent and the
/// SQL translator talk to separate models but share one HTTP client.
pub fn build_agent(
    settings: &LlmSettings,
    executor: Arc<dyn QueryExecutor>,
) -> Result<FarmAgent, ConfigError> {
    let api_key = settings.require_api_key()?;
    let client = reqwest::Client::new();

    let agent_model: Arc<dyn ChatModel> = Arc::new(OpenAiChatModel::new(
        client.clone(),
        settings.base_url.clone(),
        api_key,
        settings.agent_model.clone(),
    ));
    let sql_model: Arc<dyn ChatModel> = Arc::new(OpenAiChatModel::new(
        client,
        settings.base_url.clone(),
        api_key,
        settings.sql_model.clone(),
    ));

    let translator = SqlTranslator::new(sql_model, TableSchema::farm());
    let tools = ToolRegistry::new().with(Arc::new(FarmQueryTool::new(translator, executor)));

    info!(
        agent_model = %settings.agent_model,
        sql_model = %settings.sql_model,
        tools = ?tools.list(),
        "agent configured"
    );
    Ok(FarmAgent::new(agent_model, tools))
}
