//! MCP tool implementations.
//!
//! Each tool parses its JSON input into a typed model, calls the memory
//! service or query engine on behalf of the caller's [`Identity`], and returns
//! the result as JSON. Scope checks happen in [`dispatch`] before execution.

mod memories;
mod queries;

pub use memories::*;
pub use queries::*;

use serde_json::Value;
use tracing::debug;

use crate::error::{ToolError, ToolResult};
use crate::memory::{MemoryService, QueryEngine};
use crate::server::oauth::{Identity, Scope};

/// Tool execution context.
#[derive(Clone)]
pub struct ToolContext {
    pub memories: MemoryService,
    pub queries: QueryEngine,
}

impl ToolContext {
    #[must_use]
    pub fn new(memories: MemoryService, queries: QueryEngine) -> Self {
        Self { memories, queries }
    }
}

/// Trait for MCP tools.
#[async_trait::async_trait]
pub trait McpTool: Send + Sync {
    /// Tool name (e.g., "submit_memory").
    fn name(&self) -> &'static str;

    /// Tool description for LLM.
    fn description(&self) -> &'static str;

    /// JSON Schema for input parameters.
    fn input_schema(&self) -> Value;

    /// Scope the caller's token must carry.
    fn required_scope(&self) -> Scope;

    /// Execute the tool with given input.
    async fn execute(&self, ctx: &ToolContext, identity: &Identity, input: Value)
    -> ToolResult<Value>;
}

/// Register all tools.
#[must_use]
pub fn register_all_tools() -> Vec<Box<dyn McpTool>> {
    vec![
        // Memory store tools (6)
        Box::new(memories::SubmitMemoryTool),
        Box::new(memories::GetMemoriesTool),
        Box::new(memories::GetMemoryTool),
        Box::new(memories::UpdateMemoryTool),
        Box::new(memories::DeleteMemoryTool),
        Box::new(memories::ModifyPermissionsTool),
        // Query tools (2)
        Box::new(queries::QueryMemoryTool),
        Box::new(queries::QueryUserTool),
    ]
}

/// Look a tool up by name.
#[must_use]
pub fn find_tool<'a>(tools: &'a [Box<dyn McpTool>], name: &str) -> Option<&'a dyn McpTool> {
    tools.iter().find(|t| t.name() == name).map(|t| &**t)
}

/// Check the caller's scope, then run the named tool.
pub async fn dispatch(
    tools: &[Box<dyn McpTool>],
    ctx: &ToolContext,
    identity: &Identity,
    name: &str,
    input: Value,
) -> ToolResult<Value> {
    let tool = find_tool(tools, name)
        .ok_or_else(|| ToolError::not_found(format!("Unknown tool: {name}")))?;
    identity.require(tool.required_scope())?;

    debug!(tool = name, user_id = %identity.user_id, "Executing tool");
    // A missing body means "no arguments".
    let input = if input.is_null() { Value::Object(serde_json::Map::new()) } else { input };
    tool.execute(ctx, identity, input).await
}
