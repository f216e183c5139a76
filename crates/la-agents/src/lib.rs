//! la-agents: Agent definitions, registry, and the subagent manager
//!
//! Definitions are front-matter documents, either compiled in (embedded)
//! or discovered under `agents/<name>/AGENT.md` directories. The subagent
//! manager turns definitions into isolated child agent loops and is exposed
//! to the model through the `spawn_agent` tool.

pub mod builtin;
pub mod definition;
pub mod manager;
pub mod registry;
pub mod spawn_tool;

pub use definition::{is_valid_name, AgentDefinition};
pub use manager::SubagentManager;
pub use registry::AgentRegistry;
pub use spawn_tool::SpawnAgentTool;
