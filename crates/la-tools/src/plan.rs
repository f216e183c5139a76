//! The `read_plan` tool: surface the current context's approved plan.

use async_trait::async_trait;
use serde_json::Value;

use la_core::{Error, Tool, ToolContext, ToolDefinition, ToolOutcome, ToolParameters};

pub struct ReadPlanTool;

#[async_trait]
impl Tool for ReadPlanTool {
    fn name(&self) -> &str {
        "read_plan"
    }

    fn description(&self) -> &str {
        "Read the plan approved for this conversation, if one exists."
    }

    fn signature(&self) -> &str {
        "read_plan()"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description(), self.signature())
            .with_parameters(ToolParameters::new())
    }

    async fn execute(&self, _arguments: Value, ctx: &ToolContext) -> Result<ToolOutcome, Error> {
        let (Some(base), Some(id)) = (&ctx.context_base, &ctx.context_id) else {
            return Ok(ToolOutcome::failure(
                "no persistent context; nothing planned",
            ));
        };

        let path = base.join("contexts").join(id).join("plan.md");
        match tokio::fs::read_to_string(&path).await {
            Ok(plan) => Ok(ToolOutcome::success(plan)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(ToolOutcome::failure("no plan exists for this conversation"))
            }
            Err(e) => Ok(ToolOutcome::failure(format!(
                "cannot read {}: {}",
                path.display(),
                e
            ))),
        }
    }
}
