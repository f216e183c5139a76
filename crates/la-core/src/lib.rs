//! la-core: Core types and the agent loop for llama-agent
//!
//! This crate provides the foundational pieces the rest of the workspace is
//! built on: the message/transcript data model, the LLM backend and tool
//! seams, session-scoped permissions and statistics, and the bounded
//! completion + tool-call agent loop.

pub mod activity;
pub mod agent;
pub mod backend;
pub mod error;
pub mod message;
pub mod permission;
pub mod scan;
pub mod spawn;
pub mod stats;
pub mod tool;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use activity::{extract_activity, Activity};
pub use agent::{
    AgentConfig, AgentLoop, PersistCallback, RunOutcome, StopReason, DEFAULT_TOOL_TIMEOUT_MS,
    MAX_ITERATIONS_LIMIT, SUBAGENT_MAX_ITERATIONS,
};
pub use backend::{BackendTimings, Completion, CompletionRequest, LlmBackend};
pub use error::Error;
pub use message::{Message, Role, ToolCall};
pub use permission::{PermissionManager, PermissionPrompter, PromptAnswer};
pub use spawn::{SpawnOutcome, SpawnRequest, SpawnStats, SubagentSpawner, MAX_SPAWN_DEPTH};
pub use stats::SessionStats;
pub use tool::{
    PropertySchema, Tool, ToolContext, ToolDefinition, ToolOutcome, ToolParameters, ToolRegistry,
};

pub type Result<T> = std::result::Result<T, Error>;
