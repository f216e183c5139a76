//! The `/compact` driver.
//!
//! Programmatic fields come straight from the live transcript; the
//! narrative fields come from a one-shot summarization run over the same
//! backend (slot cleared before and after, shorter tool timeout, no tools).

use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tracing::debug;

use la_core::{
    extract_activity, scan, AgentConfig, AgentLoop, Error, LlmBackend, Message,
    PermissionManager, Result, Role, StopReason, ToolRegistry,
};
use la_store::{file_stamp, CompactEntry, ContextStore};

/// Tool timeout for the summarization sub-run.
const COMPACT_TOOL_TIMEOUT_MS: u64 = 60_000;

const COMPACT_SYSTEM_PROMPT: &str = "You summarize a conversation between a user and a \
tool-using assistant so it can continue from the summary alone. Reply with a single fenced \
```json block containing exactly these keys:\n\
{\"summary\": \"what happened\", \"key_decisions\": [\"...\"], \"current_state\": \"where things stand\", \"pending_tasks\": [\"...\"]}\n\
Preserve specifics: file paths, command names, error messages, decisions and their reasons.";

#[derive(serde::Deserialize, Default)]
struct LlmSummary {
    #[serde(default)]
    summary: String,
    #[serde(default)]
    key_decisions: Vec<String>,
    #[serde(default)]
    current_state: String,
    #[serde(default)]
    pending_tasks: Vec<String>,
}

/// Summarize and archive `messages`, returning the rewritten transcript
/// (a single synthetic system message).
pub async fn compact_context(
    backend: Arc<dyn LlmBackend>,
    store: &ContextStore,
    context_id: &str,
    messages: &[Message],
    directive: Option<&str>,
    working_dir: &Path,
    interrupt: Arc<AtomicBool>,
) -> Result<Vec<Message>> {
    let activity = extract_activity(messages);
    let user_messages: Vec<String> = messages
        .iter()
        .filter(|m| m.role == Role::User)
        .map(|m| m.content.clone())
        .collect();
    let plan_ref = store.has_plan(context_id).then(|| "plan.md".to_string());

    // The sub-run reuses the main slot; clear so it starts clean and the
    // main loop reprocesses afterwards.
    backend.clear_slot().await;
    let summary = summarize(&backend, messages, directive, working_dir, interrupt).await;
    backend.clear_slot().await;

    let summary = summary?;
    let entry = CompactEntry {
        timestamp: file_stamp(),
        summary: summary.summary,
        key_decisions: summary.key_decisions,
        current_state: summary.current_state,
        pending_tasks: summary.pending_tasks,
        user_messages,
        files_modified: activity.files_modified,
        commands_run: activity.commands_run,
        plan_ref,
    };

    let record = store.compact(context_id, &entry)?;
    debug!(
        context = context_id,
        archived = record.message_count,
        "compaction complete"
    );

    let state = store
        .load(context_id)?
        .ok_or_else(|| Error::config(format!("no such context: {}", context_id)))?;
    Ok(state.messages)
}

async fn summarize(
    backend: &Arc<dyn LlmBackend>,
    messages: &[Message],
    directive: Option<&str>,
    working_dir: &Path,
    interrupt: Arc<AtomicBool>,
) -> Result<LlmSummary> {
    let config = AgentConfig::new(working_dir)
        .with_custom_system_prompt(COMPACT_SYSTEM_PROMPT)
        .with_skip_tool_table(true)
        .with_max_iterations(1)
        .with_tool_timeout_ms(COMPACT_TOOL_TIMEOUT_MS);

    let mut agent = AgentLoop::new(
        config,
        Arc::clone(backend),
        Arc::new(ToolRegistry::new()),
        Arc::new(PermissionManager::new(true, None)),
    )?;
    agent.set_interrupt(interrupt);

    let mut prompt = render_transcript(messages);
    if let Some(directive) = directive {
        prompt.push_str(&format!("\n\nFocus the summary on: {}", directive));
    }

    let run = agent.run(&prompt).await?;
    if run.stop == StopReason::UserCancelled {
        return Err(Error::Cancelled);
    }

    Ok(parse_summary(&run.final_response))
}

/// Role-prefixed rendering of the transcript for the summarizer.
fn render_transcript(messages: &[Message]) -> String {
    let mut out = String::new();
    for msg in messages {
        out.push_str(&format!("[{}]: {}\n", msg.role, msg.content));
        for call in &msg.tool_calls {
            out.push_str(&format!("  -> tool_call: {}({})\n", call.name, call.arguments));
        }
    }
    out
}

/// Fenced JSON if present, whole-reply JSON next, else the reply is the
/// summary verbatim.
fn parse_summary(reply: &str) -> LlmSummary {
    let candidate = scan::first_fenced_json(reply).unwrap_or(reply.trim());
    match serde_json::from_str::<LlmSummary>(candidate) {
        Ok(parsed) if !parsed.summary.is_empty() => parsed,
        _ => LlmSummary {
            summary: reply.trim().to_string(),
            ..Default::default()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use la_core::testing::MockBackend;
    use la_core::ToolCall;
    use tempfile::tempdir;

    fn transcript() -> Vec<Message> {
        let mut messages = Vec::new();
        for i in 0..6 {
            messages.push(Message::user(format!("request {}", i)));
            messages.push(Message::assistant(format!("reply {}", i)));
        }
        messages.push(Message::assistant_with_tool_calls(
            "",
            vec![
                ToolCall::new("c1", "write", r#"{"file_path":"/a","content":"1"}"#),
                ToolCall::new("c2", "write", r#"{"file_path":"/b","content":"2"}"#),
                ToolCall::new("c3", "bash", r#"{"command":"ls"}"#),
            ],
        ));
        messages
    }

    #[tokio::test]
    async fn test_compact_end_to_end() {
        let dir = tempdir().unwrap();
        let store = ContextStore::new(dir.path());
        let context = store.create().unwrap();
        let messages = transcript();
        store.save_messages(&context.id, &messages).unwrap();

        let backend = Arc::new(MockBackend::new());
        backend.queue_text("done");

        let rewritten = compact_context(
            Arc::clone(&backend) as Arc<dyn LlmBackend>,
            &store,
            &context.id,
            &messages,
            None,
            &std::env::temp_dir(),
            Arc::new(AtomicBool::new(false)),
        )
        .await
        .unwrap();

        // Transcript replaced by one synthetic system message.
        assert_eq!(rewritten.len(), 1);
        assert_eq!(rewritten[0].role, Role::System);
        assert!(rewritten[0].content.contains("done"));

        // Slot cleared around the sub-run.
        assert_eq!(backend.slot_clear_count(), 2);

        // The compact entry got the extracted fields.
        let archives = store.archives(&context.id).unwrap();
        assert_eq!(archives.len(), 1);
        let compact_path = store
            .context_dir(&context.id)
            .join(&archives[0].compact_ref);
        let entry: CompactEntry =
            serde_json::from_str(&std::fs::read_to_string(compact_path).unwrap()).unwrap();
        assert_eq!(entry.summary, "done");
        assert_eq!(entry.files_modified, vec!["/a", "/b"]);
        assert_eq!(entry.commands_run, vec!["ls"]);
        assert_eq!(entry.user_messages.len(), 6);
    }

    #[tokio::test]
    async fn test_structured_summary_parsed() {
        let dir = tempdir().unwrap();
        let store = ContextStore::new(dir.path());
        let context = store.create().unwrap();
        let messages = transcript();
        store.save_messages(&context.id, &messages).unwrap();

        let backend = Arc::new(MockBackend::new());
        backend.queue_text(
            "```json\n{\"summary\": \"built the store\", \"key_decisions\": [\"atomic writes\"], \"current_state\": \"green\", \"pending_tasks\": [\"cli\"]}\n```",
        );

        compact_context(
            Arc::clone(&backend) as Arc<dyn LlmBackend>,
            &store,
            &context.id,
            &messages,
            Some("keep decisions"),
            &std::env::temp_dir(),
            Arc::new(AtomicBool::new(false)),
        )
        .await
        .unwrap();

        // Directive reached the summarizer prompt.
        let (request_messages, _) = backend.last_request().unwrap();
        assert!(request_messages
            .iter()
            .any(|m| m.content.contains("keep decisions")));

        let archives = store.archives(&context.id).unwrap();
        let entry: CompactEntry = serde_json::from_str(
            &std::fs::read_to_string(
                store
                    .context_dir(&context.id)
                    .join(&archives[0].compact_ref),
            )
            .unwrap(),
        )
        .unwrap();
        assert_eq!(entry.summary, "built the store");
        assert_eq!(entry.key_decisions, vec!["atomic writes"]);
        assert_eq!(entry.pending_tasks, vec!["cli"]);
    }

    #[test]
    fn test_parse_summary_fallback() {
        let parsed = parse_summary("just plain prose");
        assert_eq!(parsed.summary, "just plain prose");
        assert!(parsed.key_decisions.is_empty());
    }
}
