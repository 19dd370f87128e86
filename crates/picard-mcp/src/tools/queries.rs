//! Query tools: query_memory, query_user.

use serde_json::{Value, json};

use super::{McpTool, ToolContext};
use crate::config::query;
use crate::error::ToolResult;
use crate::models::{QueryMemoryInput, QueryUserInput};
use crate::server::oauth::{Identity, Scope};

fn limit_schema() -> Value {
    json!({
        "type": "integer",
        "minimum": 1,
        "maximum": query::MAX_LIMIT,
        "default": query::DEFAULT_LIMIT,
        "description": "Maximum number of memories to use"
    })
}

/// Semantic search over the caller's own memories.
pub struct QueryMemoryTool;

#[async_trait::async_trait]
impl McpTool for QueryMemoryTool {
    fn name(&self) -> &'static str {
        "query_memory"
    }

    fn description(&self) -> &'static str {
        "Search your own unexpired memories by meaning. Without a query, returns them newest first."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "Natural-language query"},
                "limit": limit_schema()
            }
        })
    }

    fn required_scope(&self) -> Scope {
        Scope::MemoriesRead
    }

    async fn execute(
        &self,
        ctx: &ToolContext,
        identity: &Identity,
        input: Value,
    ) -> ToolResult<Value> {
        let params: QueryMemoryInput = serde_json::from_value(input)?;
        let result = ctx.queries.query_memory(identity.user_id, params).await?;
        Ok(serde_json::to_value(result)?)
    }
}

/// Ask a question answered in the voice of a user's memories.
pub struct QueryUserTool;

#[async_trait::async_trait]
impl McpTool for QueryUserTool {
    fn name(&self) -> &'static str {
        "query_user"
    }

    fn description(&self) -> &'static str {
        "Answer a prompt as a persona grounded in a user's memories. Only public, unexpired \
         memories of other users are used; querying yourself uses all of your unexpired memories."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "user_id": {"type": "string", "format": "uuid", "description": "Target user"},
                "prompt": {"type": "string", "minLength": 1},
                "persona": {
                    "type": "string",
                    "enum": ["default", "concise", "creative"],
                    "default": "default"
                },
                "limit": limit_schema()
            },
            "required": ["user_id", "prompt"]
        })
    }

    fn required_scope(&self) -> Scope {
        Scope::MemoriesRead
    }

    async fn execute(
        &self,
        ctx: &ToolContext,
        identity: &Identity,
        input: Value,
    ) -> ToolResult<Value> {
        let params: QueryUserInput = serde_json::from_value(input)?;
        let result = ctx.queries.query_user(identity.user_id, params).await?;
        Ok(serde_json::to_value(result)?)
    }
}
