//! The `spawn_agent` tool: exposes the subagent manager to the model.

use async_trait::async_trait;
use serde_json::{json, Value};

use la_core::{
    Error, PropertySchema, SpawnRequest, Tool, ToolContext, ToolDefinition, ToolOutcome,
    ToolParameters,
};

pub struct SpawnAgentTool;

const DESCRIPTION: &str = "Delegate a task to a named subagent. The subagent runs in an \
isolated conversation with its own tools and returns a result summary. Describe WHAT you \
want accomplished; the subagent decides how.";

#[async_trait]
impl Tool for SpawnAgentTool {
    fn name(&self) -> &str {
        "spawn_agent"
    }

    fn description(&self) -> &str {
        DESCRIPTION
    }

    fn signature(&self) -> &str {
        "spawn_agent(agent_name, task, context?, max_iterations?, persist?)"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description(), self.signature()).with_parameters(
            ToolParameters::new()
                .add_property(
                    "agent_name",
                    PropertySchema::string("Name of the agent to spawn (see available agents)"),
                    true,
                )
                .add_property(
                    "task",
                    PropertySchema::string("High-level goal for the subagent"),
                    true,
                )
                .add_property(
                    "context",
                    PropertySchema::object("Optional structured context passed to the subagent"),
                    false,
                )
                .add_property(
                    "max_iterations",
                    PropertySchema::integer("Iteration budget override for the subagent"),
                    false,
                )
                .add_property(
                    "persist",
                    PropertySchema::boolean("Persist the subagent conversation as its own context")
                        .with_default(Value::Bool(false)),
                    false,
                ),
        )
    }

    async fn execute(&self, arguments: Value, ctx: &ToolContext) -> Result<ToolOutcome, Error> {
        let Some(spawner) = ctx.subagents.clone() else {
            return Ok(ToolOutcome::failure("subagent manager is not available"));
        };

        let mut request: SpawnRequest = serde_json::from_value(arguments)
            .map_err(|e| Error::tool("spawn_agent", format!("invalid arguments: {}", e)))?;
        request.spawn_depth = ctx.spawn_depth;
        if request.working_dir.is_none() {
            request.working_dir = Some(ctx.working_dir.display().to_string());
        }

        let outcome = spawner
            .spawn(request, ctx.interrupt.clone())
            .await?;

        if !outcome.success {
            return Ok(ToolOutcome::failure(
                outcome
                    .error
                    .unwrap_or_else(|| "Subagent encountered an error".to_string()),
            ));
        }

        let mut payload = json!({
            "agent": outcome.agent,
            "result": outcome.output,
            "iterations": outcome.iterations,
            "stats": {
                "input_tokens": outcome.stats.input_tokens,
                "output_tokens": outcome.stats.output_tokens,
            },
        });
        if !outcome.artifacts.is_empty() {
            payload["artifacts"] = Value::Array(outcome.artifacts);
        }
        if !outcome.files_modified.is_empty() {
            payload["files_modified"] = json!(outcome.files_modified);
        }
        if !outcome.commands_run.is_empty() {
            payload["commands_run"] = json!(outcome.commands_run);
        }

        Ok(ToolOutcome::success(serde_json::to_string_pretty(
            &payload,
        )?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    use la_core::{SpawnOutcome, SpawnStats, SubagentSpawner};

    struct StubSpawner {
        outcome: SpawnOutcome,
    }

    #[async_trait]
    impl SubagentSpawner for StubSpawner {
        async fn spawn(
            self: Arc<Self>,
            request: SpawnRequest,
            _interrupt: Arc<AtomicBool>,
        ) -> Result<SpawnOutcome, Error> {
            assert_eq!(request.spawn_depth, 2);
            Ok(self.outcome.clone())
        }

        fn available_agents(&self) -> Vec<(String, String)> {
            vec![]
        }
    }

    fn ctx_with(spawner: Arc<dyn SubagentSpawner>) -> ToolContext {
        let mut ctx = ToolContext::new(std::env::temp_dir(), Arc::new(AtomicBool::new(false)));
        ctx.subagents = Some(spawner);
        ctx.spawn_depth = 2;
        ctx
    }

    #[tokio::test]
    async fn test_result_json_shape() {
        let spawner = Arc::new(StubSpawner {
            outcome: SpawnOutcome {
                agent: "explorer-agent".into(),
                success: true,
                output: "found it".into(),
                iterations: 3,
                stats: SpawnStats {
                    input_tokens: 100,
                    output_tokens: 40,
                },
                artifacts: vec![],
                files_modified: vec!["/a".into()],
                commands_run: vec![],
                error: None,
            },
        });

        let tool = SpawnAgentTool;
        let outcome = tool
            .execute(
                json!({"agent_name": "explorer-agent", "task": "look"}),
                &ctx_with(spawner),
            )
            .await
            .unwrap();

        assert!(outcome.success);
        let payload: Value = serde_json::from_str(&outcome.output).unwrap();
        assert_eq!(payload["agent"], "explorer-agent");
        assert_eq!(payload["result"], "found it");
        assert_eq!(payload["iterations"], 3);
        assert_eq!(payload["stats"]["input_tokens"], 100);
        assert_eq!(payload["files_modified"][0], "/a");
        // Empty payloads stay absent.
        assert!(payload.get("artifacts").is_none());
        assert!(payload.get("commands_run").is_none());
    }

    #[tokio::test]
    async fn test_failure_becomes_tool_error() {
        let spawner = Arc::new(StubSpawner {
            outcome: SpawnOutcome::failed("worker", "Maximum spawn depth (3) exceeded"),
        });

        let tool = SpawnAgentTool;
        let outcome = tool
            .execute(
                json!({"agent_name": "worker", "task": "go"}),
                &ctx_with(spawner),
            )
            .await
            .unwrap();

        assert!(!outcome.success);
        assert!(outcome.error.contains("Maximum spawn depth"));
    }

    #[tokio::test]
    async fn test_missing_manager() {
        let tool = SpawnAgentTool;
        let ctx = ToolContext::new(std::env::temp_dir(), Arc::new(AtomicBool::new(false)));
        let outcome = tool
            .execute(json!({"agent_name": "a", "task": "t"}), &ctx)
            .await
            .unwrap();
        assert!(!outcome.success);
    }

    #[tokio::test]
    async fn test_bad_arguments_error() {
        let spawner = Arc::new(StubSpawner {
            outcome: SpawnOutcome::failed("x", "unused"),
        });
        let tool = SpawnAgentTool;
        let err = tool
            .execute(json!({"task": "missing agent_name"}), &ctx_with(spawner))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ToolFailed { .. }));
    }
}
