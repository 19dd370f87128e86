//! Memory store tools: submit_memory, get_memories, get_memory, update_memory,
//! delete_memory, modify_permissions.

use serde_json::{Value, json};

use super::{McpTool, ToolContext};
use crate::error::ToolResult;
use crate::models::{
    GetMemoriesInput, MemoryIdInput, ModifyPermissionsInput, SubmitMemoryInput, UpdateMemoryInput,
};
use crate::server::oauth::{Identity, Scope};

fn permission_schema() -> Value {
    json!({
        "type": "string",
        "enum": ["private", "public"],
        "default": "private",
        "description": "Public memories are visible to other users' persona queries"
    })
}

fn memory_id_schema() -> Value {
    json!({"type": "string", "format": "uuid", "description": "Memory ID"})
}

/// Store a new memory.
pub struct SubmitMemoryTool;

#[async_trait::async_trait]
impl McpTool for SubmitMemoryTool {
    fn name(&self) -> &'static str {
        "submit_memory"
    }

    fn description(&self) -> &'static str {
        "Store a new memory. The text is encrypted at rest and embedded for semantic search."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "text": {
                    "type": "string",
                    "minLength": 1,
                    "maxLength": 10000,
                    "description": "Memory text"
                },
                "permission": permission_schema(),
                "expiration_date": {
                    "type": "string",
                    "format": "date-time",
                    "description": "Optional RFC 3339 expiration timestamp"
                }
            },
            "required": ["text"]
        })
    }

    fn required_scope(&self) -> Scope {
        Scope::MemoriesWrite
    }

    async fn execute(
        &self,
        ctx: &ToolContext,
        identity: &Identity,
        input: Value,
    ) -> ToolResult<Value> {
        let params: SubmitMemoryInput = serde_json::from_value(input)?;
        let memory = ctx.memories.create(identity.user_id, params).await?;
        Ok(serde_json::to_value(memory)?)
    }
}

/// List memories visible to the caller.
pub struct GetMemoriesTool;

#[async_trait::async_trait]
impl McpTool for GetMemoriesTool {
    fn name(&self) -> &'static str {
        "get_memories"
    }

    fn description(&self) -> &'static str {
        "List your memories, newest first. Optionally include other users' public memories \
         or restrict to one owner."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "filters": {
                    "type": "object",
                    "properties": {
                        "permission": {"type": "string", "enum": ["private", "public"]},
                        "include_public": {"type": "boolean", "default": false},
                        "include_expired": {"type": "boolean", "default": false},
                        "owner_id": {"type": "string", "format": "uuid"}
                    }
                }
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
        let params: GetMemoriesInput = serde_json::from_value(input)?;
        let memories = ctx.memories.list(identity.user_id, &params.filters).await?;
        Ok(json!({"count": memories.len(), "memories": memories}))
    }
}

/// Read one memory.
pub struct GetMemoryTool;

#[async_trait::async_trait]
impl McpTool for GetMemoryTool {
    fn name(&self) -> &'static str {
        "get_memory"
    }

    fn description(&self) -> &'static str {
        "Read one memory by ID. Other users' memories are readable only while public and unexpired."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"memory_id": memory_id_schema()},
            "required": ["memory_id"]
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
        let params: MemoryIdInput = serde_json::from_value(input)?;
        let memory = ctx.memories.read(params.memory_id, identity.user_id).await?;
        Ok(serde_json::to_value(memory)?)
    }
}

/// Change text, permission or expiration of an owned memory.
pub struct UpdateMemoryTool;

#[async_trait::async_trait]
impl McpTool for UpdateMemoryTool {
    fn name(&self) -> &'static str {
        "update_memory"
    }

    fn description(&self) -> &'static str {
        "Update one of your memories. Omitted fields are left unchanged; a new text is re-embedded."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "memory_id": memory_id_schema(),
                "text": {"type": "string", "minLength": 1, "maxLength": 10000},
                "permission": {"type": "string", "enum": ["private", "public"]},
                "expiration_date": {"type": "string", "format": "date-time"},
                "clear_expiration": {
                    "type": "boolean",
                    "default": false,
                    "description": "Remove the expiration date"
                }
            },
            "required": ["memory_id"]
        })
    }

    fn required_scope(&self) -> Scope {
        Scope::MemoriesWrite
    }

    async fn execute(
        &self,
        ctx: &ToolContext,
        identity: &Identity,
        input: Value,
    ) -> ToolResult<Value> {
        let params: UpdateMemoryInput = serde_json::from_value(input)?;
        let memory = ctx.memories.update(identity.user_id, params).await?;
        Ok(serde_json::to_value(memory)?)
    }
}

/// Delete an owned memory.
pub struct DeleteMemoryTool;

#[async_trait::async_trait]
impl McpTool for DeleteMemoryTool {
    fn name(&self) -> &'static str {
        "delete_memory"
    }

    fn description(&self) -> &'static str {
        "Permanently delete one of your memories."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"memory_id": memory_id_schema()},
            "required": ["memory_id"]
        })
    }

    fn required_scope(&self) -> Scope {
        Scope::MemoriesWrite
    }

    async fn execute(
        &self,
        ctx: &ToolContext,
        identity: &Identity,
        input: Value,
    ) -> ToolResult<Value> {
        let params: MemoryIdInput = serde_json::from_value(input)?;
        ctx.memories.delete(params.memory_id, identity.user_id).await?;
        Ok(json!({"deleted": true, "memory_id": params.memory_id}))
    }
}

/// Switch an owned memory between private and public.
pub struct ModifyPermissionsTool;

#[async_trait::async_trait]
impl McpTool for ModifyPermissionsTool {
    fn name(&self) -> &'static str {
        "modify_permissions"
    }

    fn description(&self) -> &'static str {
        "Make one of your memories private or public."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "memory_id": memory_id_schema(),
                "permission": permission_schema()
            },
            "required": ["memory_id", "permission"]
        })
    }

    fn required_scope(&self) -> Scope {
        Scope::MemoriesWrite
    }

    async fn execute(
        &self,
        ctx: &ToolContext,
        identity: &Identity,
        input: Value,
    ) -> ToolResult<Value> {
        let params: ModifyPermissionsInput = serde_json::from_value(input)?;
        let memory = ctx
            .memories
            .set_permission(params.memory_id, identity.user_id, params.permission)
            .await?;
        Ok(serde_json::to_value(memory)?)
    }
}
