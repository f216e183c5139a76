//! The subagent manager.
//!
//! Spawns child agent loops with isolated transcripts over the shared
//! backend. The backend slot is cleared before and after every spawn so
//! neither side observes the other's tokens; the parent transcript is its
//! own source of truth and is reprocessed on its next completion.

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, warn};

use la_core::{
    extract_activity, scan, AgentConfig, AgentLoop, Error, LlmBackend, Message,
    PermissionManager, Result, Role, SpawnOutcome, SpawnRequest, SpawnStats, StopReason,
    SubagentSpawner, ToolRegistry, MAX_SPAWN_DEPTH, SUBAGENT_MAX_ITERATIONS,
};
use la_store::ContextStore;

use crate::registry::AgentRegistry;

pub struct SubagentManager {
    backend: Arc<dyn LlmBackend>,
    tools: Arc<ToolRegistry>,
    permissions: Arc<PermissionManager>,
    registry: Arc<AgentRegistry>,
    working_dir: PathBuf,
    context_base: Option<PathBuf>,
    /// Depths of spawns currently in flight. Empty between top-level turns.
    depth_stack: Mutex<Vec<u32>>,
}

impl SubagentManager {
    pub fn new(
        backend: Arc<dyn LlmBackend>,
        tools: Arc<ToolRegistry>,
        permissions: Arc<PermissionManager>,
        registry: Arc<AgentRegistry>,
        working_dir: impl Into<PathBuf>,
        context_base: Option<PathBuf>,
    ) -> Self {
        Self {
            backend,
            tools,
            permissions,
            registry,
            working_dir: working_dir.into(),
            context_base,
            depth_stack: Mutex::new(Vec::new()),
        }
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn depth_stack_len(&self) -> usize {
        self.depth_stack.lock().unwrap().len()
    }

    fn resolve_working_dir(&self, requested: Option<&str>) -> Result<PathBuf> {
        let candidate = match requested {
            None => self.working_dir.clone(),
            Some(path) => {
                let path = PathBuf::from(path);
                if path.is_absolute() {
                    path
                } else {
                    self.working_dir.join(path)
                }
            }
        };
        let canonical = candidate
            .canonicalize()
            .map_err(|_| Error::invalid_working_dir(candidate.display().to_string()))?;
        if !canonical.is_dir() {
            return Err(Error::invalid_working_dir(canonical.display().to_string()));
        }
        Ok(canonical)
    }

    /// The child's opening user message: generated agent prompt, the task,
    /// and the caller-provided context JSON when present.
    fn build_child_prompt(
        def: &crate::definition::AgentDefinition,
        request: &SpawnRequest,
    ) -> String {
        let mut prompt = def.system_prompt();
        prompt.push_str("\n\n# Task\n");
        prompt.push_str(&request.task);

        if let Some(context) = &request.context {
            let empty = context.is_null()
                || context.as_object().is_some_and(|o| o.is_empty())
                || context.as_str().is_some_and(|s| s.is_empty());
            if !empty {
                prompt.push_str("\n\n## Context\n");
                prompt.push_str(
                    &serde_json::to_string_pretty(context).unwrap_or_else(|_| context.to_string()),
                );
            }
        }

        prompt
    }

    /// Fenced JSON payloads from the child's assistant messages. Objects
    /// carrying a `questions` key are planning Q&A, not artifacts.
    fn collect_artifacts(messages: &[Message]) -> Vec<serde_json::Value> {
        let mut artifacts = Vec::new();
        for msg in messages.iter().filter(|m| m.role == Role::Assistant) {
            for block in scan::fenced_json_blocks(&msg.content) {
                if let Ok(value) = serde_json::from_str::<serde_json::Value>(block) {
                    if value.get("questions").is_none() {
                        artifacts.push(value);
                    }
                }
            }
        }
        artifacts
    }

    async fn run_child(
        self: &Arc<Self>,
        def: &crate::definition::AgentDefinition,
        request: &SpawnRequest,
        working_dir: PathBuf,
        interrupt: Arc<AtomicBool>,
    ) -> Result<SpawnOutcome> {
        let max_iterations = request
            .max_iterations
            .unwrap_or(def.max_iterations)
            .clamp(1, SUBAGENT_MAX_ITERATIONS);

        let mut config = AgentConfig::new(working_dir)
            .with_allowed_tools(def.allowed_tools.clone())
            .with_max_iterations(max_iterations)
            .with_spawn_depth(request.spawn_depth + 1)
            .with_agents_section(self.registry.prompt_section());

        let persisted = if request.persist {
            match &self.context_base {
                Some(base) => {
                    let store = ContextStore::new(base);
                    let state = store.create()?;
                    config = config.with_context(base.clone(), state.id.clone());
                    Some((Arc::new(store), state.id))
                }
                None => None,
            }
        } else {
            if let Some(base) = &self.context_base {
                config.context_base = Some(base.clone());
            }
            None
        };

        let mut child = AgentLoop::new(
            config,
            Arc::clone(&self.backend),
            Arc::clone(&self.tools),
            Arc::clone(&self.permissions),
        )?;
        child.set_interrupt(interrupt);
        child.set_subagents(Arc::clone(self) as Arc<dyn SubagentSpawner>);

        if let Some((store, id)) = &persisted {
            let store = Arc::clone(store);
            let id = id.clone();
            child.set_persistence(Arc::new(move |msg| store.append_message(&id, msg)));
        }

        let prompt = Self::build_child_prompt(def, request);
        let run = child.run(&prompt).await?;

        let stats = child.stats();
        let error = match run.stop {
            StopReason::Completed => None,
            StopReason::MaxIterations => Some("Subagent reached max iterations".to_string()),
            StopReason::UserCancelled => Some("Subagent was cancelled".to_string()),
        };

        let activity = extract_activity(child.messages());
        Ok(SpawnOutcome {
            agent: def.name.clone(),
            success: run.stop == StopReason::Completed,
            output: run.final_response,
            iterations: run.iterations,
            stats: SpawnStats {
                input_tokens: stats.total_input_tokens,
                output_tokens: stats.total_output_tokens,
            },
            artifacts: Self::collect_artifacts(child.messages()),
            files_modified: activity.files_modified,
            commands_run: activity.commands_run,
            error,
        })
    }
}

#[async_trait]
impl SubagentSpawner for SubagentManager {
    async fn spawn(
        self: Arc<Self>,
        request: SpawnRequest,
        interrupt: Arc<AtomicBool>,
    ) -> Result<SpawnOutcome> {
        if request.spawn_depth >= MAX_SPAWN_DEPTH {
            warn!(agent = %request.agent_name, depth = request.spawn_depth, "spawn depth exceeded");
            return Ok(SpawnOutcome::failed(
                &request.agent_name,
                Error::SpawnDepthExceeded(MAX_SPAWN_DEPTH).to_string(),
            ));
        }

        let Some(def) = self.registry.get(&request.agent_name).cloned() else {
            return Ok(SpawnOutcome::failed(
                &request.agent_name,
                Error::UnknownAgent(request.agent_name.clone()).to_string(),
            ));
        };

        let working_dir = match self.resolve_working_dir(request.working_dir.as_deref()) {
            Ok(dir) => dir,
            Err(e) => return Ok(SpawnOutcome::failed(&request.agent_name, e.to_string())),
        };

        debug!(agent = %def.name, depth = request.spawn_depth + 1, "spawning subagent");

        // Isolation: the child must not see the parent's tokens.
        self.backend.clear_slot().await;
        self.depth_stack
            .lock()
            .unwrap()
            .push(request.spawn_depth + 1);

        let result = self
            .run_child(&def, &request, working_dir, interrupt)
            .await;

        self.depth_stack.lock().unwrap().pop();
        // And the parent must not see the child's.
        self.backend.clear_slot().await;

        match result {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                warn!(agent = %def.name, error = %e, "subagent failed");
                Ok(SpawnOutcome::failed(
                    &def.name,
                    format!("Subagent encountered an error: {}", e),
                ))
            }
        }
    }

    fn available_agents(&self) -> Vec<(String, String)> {
        self.registry
            .list()
            .into_iter()
            .map(|d| (d.name.clone(), d.description.clone()))
            .collect()
    }
}
