//! la-tools: Built-in tools for llama-agent
//!
//! Concrete tool implementations behind the `la_core::Tool` contract. The
//! registry assembled here (plus `spawn_agent` from la-agents) is what the
//! main loop and subagents execute against.

pub mod bash;
pub mod filesystem;
pub mod plan;

pub use bash::BashTool;
pub use filesystem::{EditTool, GlobTool, ReadTool, WriteTool};
pub use plan::ReadPlanTool;

use std::sync::Arc;

use la_core::ToolRegistry;

/// Register every built-in tool.
pub fn register_builtin(registry: &mut ToolRegistry) {
    registry.register(Arc::new(ReadTool));
    registry.register(Arc::new(WriteTool));
    registry.register(Arc::new(EditTool));
    registry.register(Arc::new(GlobTool));
    registry.register(Arc::new(BashTool));
    registry.register(Arc::new(ReadPlanTool));
}
