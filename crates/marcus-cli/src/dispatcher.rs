//! The `rmcp` adapter: one `#[tool]` method per entry in the tool surface,
//! each parsing its arguments and delegating to `marcus_core::ToolDispatcher`.
//!
//! The dispatcher itself is transport-agnostic and unit-tested without any
//! of this; this layer only translates JSON-RPC tool calls into dispatcher
//! calls and back, mapping a dispatcher `Err` into a `{ok:false, error,
//! hint}` tool response rather than a transport-level error -- agents see a
//! normal (if unsuccessful) result they can act on.

use std::sync::Arc;

use marcus_core::ToolDispatcher;
use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::model::{CallToolResult, Content, ServerCapabilities, ServerInfo};
use rmcp::{tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler};
use uuid::Uuid;

#[derive(Clone)]
pub struct McpHandler {
    dispatcher: Arc<ToolDispatcher>,
    tool_router: ToolRouter<Self>,
}

impl McpHandler {
    pub fn new(dispatcher: Arc<ToolDispatcher>) -> Self {
        Self {
            dispatcher,
            tool_router: Self::tool_router(),
        }
    }
}

fn parse_uuid(field: &str, value: &str) -> Result<Uuid, McpError> {
    Uuid::parse_str(value).map_err(|e| McpError::invalid_params(format!("invalid {field}: {e}")))
}

fn ok_result(value: serde_json::Value) -> Result<CallToolResult, McpError> {
    Ok(CallToolResult::success(vec![Content::text(
        value.to_string(),
    )]))
}

/// Every dispatcher call funnels through here: a hard `Err` becomes a
/// `{ok:false, error, hint}` tool response, never a transport error.
fn respond(result: marcus_core::Result<serde_json::Value>) -> Result<CallToolResult, McpError> {
    match result {
        Ok(value) => ok_result(value),
        Err(e) => ok_result(serde_json::json!({
            "ok": false,
            "error": e.code(),
            "hint": e.hint(),
        })),
    }
}

#[tool_router]
impl McpHandler {
    #[tool(description = "Register a worker agent with its skills and capacity")]
    async fn register_agent(
        &self,
        agent_id: String,
        name: String,
        role: String,
        skills: Vec<String>,
    ) -> Result<CallToolResult, McpError> {
        respond(self.dispatcher.register_agent(&agent_id, &name, &role, skills).await)
    }

    #[tool(description = "Request the next available task for an agent")]
    async fn request_next_task(&self, agent_id: String) -> Result<CallToolResult, McpError> {
        respond(self.dispatcher.request_next_task(&agent_id).await)
    }

    #[tool(description = "Report progress on an assigned task: in_progress, blocked, or completed")]
    async fn report_task_progress(
        &self,
        agent_id: String,
        task_id: String,
        status: String,
        progress: Option<f64>,
        message: Option<String>,
    ) -> Result<CallToolResult, McpError> {
        let task_id = parse_uuid("task_id", &task_id)?;
        respond(
            self.dispatcher
                .report_task_progress(&agent_id, task_id, &status, progress, message)
                .await,
        )
    }

    #[tool(description = "Report a blocker on an assigned task and get recovery suggestions")]
    async fn report_blocker(
        &self,
        agent_id: String,
        task_id: String,
        description: String,
        severity: String,
    ) -> Result<CallToolResult, McpError> {
        let task_id = parse_uuid("task_id", &task_id)?;
        respond(
            self.dispatcher
                .report_blocker(&agent_id, task_id, &description, &severity)
                .await,
        )
    }

    #[tool(description = "Release a held task back to the pool")]
    async fn release_task(&self, agent_id: String, task_id: String) -> Result<CallToolResult, McpError> {
        let task_id = parse_uuid("task_id", &task_id)?;
        respond(self.dispatcher.release_task(&agent_id, task_id).await)
    }

    #[tool(description = "Record a design/implementation decision on a held task")]
    async fn log_decision(
        &self,
        agent_id: String,
        task_id: String,
        what: String,
        why: String,
        impact: String,
        affects_tasks: Option<Vec<String>>,
    ) -> Result<CallToolResult, McpError> {
        let task_id = parse_uuid("task_id", &task_id)?;
        let affects_tasks = affects_tasks
            .unwrap_or_default()
            .iter()
            .map(|s| parse_uuid("affects_tasks[]", s))
            .collect::<Result<Vec<_>, _>>()?;
        respond(
            self.dispatcher
                .log_decision(&agent_id, task_id, what, why, impact, affects_tasks)
                .await,
        )
    }

    #[tool(description = "Log an artifact (file) produced while working a task")]
    async fn log_artifact(
        &self,
        agent_id: String,
        task_id: String,
        filename: String,
        r#type: String,
        content: String,
        description: String,
    ) -> Result<CallToolResult, McpError> {
        let task_id = parse_uuid("task_id", &task_id)?;
        respond(
            self.dispatcher
                .log_artifact(&agent_id, task_id, &filename, &r#type, &content, &description)
                .await,
        )
    }

    #[tool(description = "Assemble the context preamble for a task: dependency decisions, artifacts, conventions")]
    async fn get_task_context(&self, agent_id: String, task_id: String) -> Result<CallToolResult, McpError> {
        let _ = agent_id;
        let task_id = parse_uuid("task_id", &task_id)?;
        respond(self.dispatcher.get_task_context(task_id).await)
    }

    #[tool(description = "Create a project from a natural-language description, or add features to an existing one")]
    async fn create_project(
        &self,
        description: String,
        project_name: String,
        complexity: Option<String>,
        provider: Option<String>,
        project_id: Option<String>,
        mode: Option<String>,
    ) -> Result<CallToolResult, McpError> {
        let project_id = project_id.map(|id| parse_uuid("project_id", &id)).transpose()?;
        respond(
            self.dispatcher
                .create_project(
                    &description,
                    &project_name,
                    complexity.as_deref().unwrap_or("standard"),
                    provider.as_deref().unwrap_or("local"),
                    project_id,
                    mode.as_deref().unwrap_or("auto"),
                )
                .await,
        )
    }

    #[tool(description = "Register an existing external board as a Marcus project")]
    async fn add_project(
        &self,
        name: String,
        provider: String,
        config: Option<serde_json::Value>,
    ) -> Result<CallToolResult, McpError> {
        respond(
            self.dispatcher
                .add_project(&name, &provider, config.unwrap_or_else(|| serde_json::json!({})))
                .await,
        )
    }

    #[tool(description = "List every known project")]
    async fn list_projects(&self) -> Result<CallToolResult, McpError> {
        respond(self.dispatcher.list_projects().await)
    }

    #[tool(description = "Switch the active project for subsequent tool calls")]
    async fn switch_project(&self, project_id: String) -> Result<CallToolResult, McpError> {
        let project_id = parse_uuid("project_id", &project_id)?;
        respond(self.dispatcher.switch_project(project_id).await)
    }

    #[tool(description = "Get the currently active project")]
    async fn get_current_project(&self) -> Result<CallToolResult, McpError> {
        respond(self.dispatcher.get_current_project().await)
    }

    #[tool(description = "Find a project by name, optionally guiding creation if none matches")]
    async fn find_or_create_project(
        &self,
        project_name: String,
        create_if_missing: Option<bool>,
    ) -> Result<CallToolResult, McpError> {
        respond(
            self.dispatcher
                .find_or_create_project(&project_name, create_if_missing.unwrap_or(false))
                .await,
        )
    }

    #[tool(description = "Liveness check")]
    async fn ping(&self) -> Result<CallToolResult, McpError> {
        ok_result(self.dispatcher.ping())
    }
}

#[tool_handler]
impl ServerHandler for McpHandler {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Marcus coordinates autonomous worker agents over a dependency-ordered task \
                 graph. Call register_agent once, then request_next_task in a loop; report \
                 progress, blockers, decisions, and artifacts as you work."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
        }
    }
}
