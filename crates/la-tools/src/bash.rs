//! The bash tool: run a shell command under the working directory.
//!
//! Output is combined stdout and stderr. The command is killed at the tool
//! context's timeout, and the interrupt flag is polled so a cancelled turn
//! does not leave the process running.

use std::process::Stdio;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::process::Command;
use tracing::debug;

use la_core::{
    Error, PropertySchema, Tool, ToolContext, ToolDefinition, ToolOutcome, ToolParameters,
};

/// How often the interrupt flag is polled while a command runs.
const INTERRUPT_POLL_MS: u64 = 100;

pub struct BashTool;

#[derive(Deserialize)]
struct BashArgs {
    command: String,
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Run a shell command in the working directory. Returns combined stdout and stderr; non-zero exits are errors."
    }

    fn signature(&self) -> &str {
        "bash(command)"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description(), self.signature()).with_parameters(
            ToolParameters::new().add_property(
                "command",
                PropertySchema::string("The shell command to execute"),
                true,
            ),
        )
    }

    async fn execute(&self, arguments: Value, ctx: &ToolContext) -> Result<ToolOutcome, Error> {
        let args: BashArgs = serde_json::from_value(arguments)
            .map_err(|e| Error::tool("bash", format!("invalid arguments: {}", e)))?;

        if ctx.interrupt.load(Ordering::SeqCst) {
            return Err(Error::Cancelled);
        }

        debug!(command = %args.command, "running shell command");

        let mut child = match Command::new("sh")
            .arg("-c")
            .arg(&args.command)
            .current_dir(&ctx.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => return Ok(ToolOutcome::failure(format!("cannot spawn shell: {}", e))),
        };

        let deadline = tokio::time::Instant::now() + Duration::from_millis(ctx.timeout_ms);
        let output = loop {
            tokio::select! {
                status = child.wait() => {
                    match status {
                        Ok(status) => break Some(status),
                        Err(e) => return Ok(ToolOutcome::failure(format!("wait failed: {}", e))),
                    }
                }
                _ = tokio::time::sleep(Duration::from_millis(INTERRUPT_POLL_MS)) => {
                    if ctx.interrupt.load(Ordering::SeqCst) {
                        let _ = child.kill().await;
                        return Err(Error::Cancelled);
                    }
                    if tokio::time::Instant::now() >= deadline {
                        let _ = child.kill().await;
                        break None;
                    }
                }
            }
        };

        let Some(status) = output else {
            return Ok(ToolOutcome::failure(format!(
                "command timed out after {} ms",
                ctx.timeout_ms
            )));
        };

        let mut combined = String::new();
        if let Some(mut stdout) = child.stdout.take() {
            use tokio::io::AsyncReadExt;
            let _ = stdout.read_to_string(&mut combined).await;
        }
        if let Some(mut stderr) = child.stderr.take() {
            use tokio::io::AsyncReadExt;
            let mut err_text = String::new();
            let _ = stderr.read_to_string(&mut err_text).await;
            combined.push_str(&err_text);
        }

        if status.success() {
            Ok(ToolOutcome::success(combined))
        } else {
            Ok(ToolOutcome::failure(format!(
                "exit status {}\n{}",
                status.code().unwrap_or(-1),
                combined
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    fn ctx() -> ToolContext {
        ToolContext::new(std::env::temp_dir(), Arc::new(AtomicBool::new(false)))
    }

    #[tokio::test]
    async fn test_echo() {
        let outcome = BashTool
            .execute(serde_json::json!({"command": "echo x"}), &ctx())
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.output, "x\n");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_error() {
        let outcome = BashTool
            .execute(serde_json::json!({"command": "exit 3"}), &ctx())
            .await
            .unwrap();
        assert!(!outcome.success);
        assert!(outcome.error.contains("exit status 3"));
    }

    #[tokio::test]
    async fn test_timeout_kills_command() {
        let mut ctx = ctx();
        ctx.timeout_ms = 200;
        let outcome = BashTool
            .execute(serde_json::json!({"command": "sleep 5"}), &ctx)
            .await
            .unwrap();
        assert!(!outcome.success);
        assert!(outcome.error.contains("timed out"));
    }

    #[tokio::test]
    async fn test_pre_set_interrupt_cancels() {
        let mut ctx = ctx();
        ctx.interrupt = Arc::new(AtomicBool::new(true));
        let err = BashTool
            .execute(serde_json::json!({"command": "echo never"}), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test]
    async fn test_stderr_captured() {
        let outcome = BashTool
            .execute(serde_json::json!({"command": "echo oops 1>&2"}), &ctx())
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.output, "oops\n");
    }
}
