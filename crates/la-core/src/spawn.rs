//! The seam between the agent loop and the subagent manager.
//!
//! The loop reaches the manager only through the object-safe
//! [`SubagentSpawner`] trait carried in the tool context, which breaks the
//! crate cycle between the loop and the manager that constructs loops.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Maximum nesting depth for subagent spawns. A request whose depth has
/// already reached this value is rejected before any child is constructed.
pub const MAX_SPAWN_DEPTH: u32 = 3;

/// A request to run a named agent as an isolated child loop.
#[derive(Debug, Clone, Deserialize)]
pub struct SpawnRequest {
    pub agent_name: String,
    pub task: String,
    /// Optional structured context, pretty-printed into the child prompt.
    #[serde(default)]
    pub context: Option<serde_json::Value>,
    #[serde(default)]
    pub max_iterations: Option<u32>,
    /// Persist the child conversation under its own context id.
    #[serde(default)]
    pub persist: bool,
    /// Depth of the caller; the child runs at `spawn_depth + 1`.
    #[serde(default)]
    pub spawn_depth: u32,
    /// Working directory override, absolute or relative to the manager's.
    #[serde(default)]
    pub working_dir: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpawnStats {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// What a subagent run produced, programmatic extraction included.
#[derive(Debug, Clone, Serialize)]
pub struct SpawnOutcome {
    pub agent: String,
    pub success: bool,
    pub output: String,
    pub iterations: u32,
    pub stats: SpawnStats,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<serde_json::Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub files_modified: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub commands_run: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SpawnOutcome {
    pub fn failed(agent: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            success: false,
            output: String::new(),
            iterations: 0,
            stats: SpawnStats::default(),
            artifacts: Vec::new(),
            files_modified: Vec::new(),
            commands_run: Vec::new(),
            error: Some(error.into()),
        }
    }
}

/// Spawns child agent loops with isolated transcripts.
#[async_trait]
pub trait SubagentSpawner: Send + Sync {
    async fn spawn(
        self: Arc<Self>,
        request: SpawnRequest,
        interrupt: Arc<AtomicBool>,
    ) -> Result<SpawnOutcome, Error>;

    /// Names and descriptions of spawnable agents, for prompt sections.
    fn available_agents(&self) -> Vec<(String, String)>;
}
