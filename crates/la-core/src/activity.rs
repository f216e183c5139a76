//! Side-effect extraction from transcripts.
//!
//! Walks assistant tool calls to recover which files were touched and which
//! commands ran, including the side effects of nested `spawn_agent` calls
//! reported through their tool-result payloads.

use crate::message::{Message, Role};

/// Commands longer than this are truncated with an ellipsis.
const COMMAND_PREVIEW_CHARS: usize = 200;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Activity {
    pub files_modified: Vec<String>,
    pub commands_run: Vec<String>,
}

impl Activity {
    pub fn is_empty(&self) -> bool {
        self.files_modified.is_empty() && self.commands_run.is_empty()
    }
}

/// Extract file modifications and executed commands from a transcript.
///
/// `write`/`edit` calls contribute their `file_path`; `bash` calls their
/// `command` (truncated); `spawn_agent` calls contribute whatever the
/// nested run reported in its result JSON. Files are de-duplicated in
/// first-seen order.
pub fn extract_activity(messages: &[Message]) -> Activity {
    let mut activity = Activity::default();

    for (idx, msg) in messages.iter().enumerate() {
        if msg.role != Role::Assistant {
            continue;
        }

        for call in &msg.tool_calls {
            let args = call.parse_arguments().ok();

            match call.name.as_str() {
                "write" | "edit" => {
                    if let Some(path) = args
                        .as_ref()
                        .and_then(|a| a.get("file_path"))
                        .and_then(|v| v.as_str())
                    {
                        push_file(&mut activity.files_modified, path);
                    }
                }
                "bash" => {
                    if let Some(command) = args
                        .as_ref()
                        .and_then(|a| a.get("command"))
                        .and_then(|v| v.as_str())
                    {
                        activity.commands_run.push(truncate_command(command));
                    }
                }
                "spawn_agent" => {
                    if let Some(nested) = nested_result(messages, idx, &call.id) {
                        merge_nested(&mut activity, &nested);
                    }
                }
                _ => {}
            }
        }
    }

    activity
}

fn push_file(files: &mut Vec<String>, path: &str) {
    if !files.iter().any(|f| f == path) {
        files.push(path.to_string());
    }
}

fn truncate_command(command: &str) -> String {
    if command.chars().count() <= COMMAND_PREVIEW_CHARS {
        return command.to_string();
    }
    let mut truncated: String = command.chars().take(COMMAND_PREVIEW_CHARS).collect();
    truncated.push_str("...");
    truncated
}

/// Find the tool-result payload for a spawn call and parse it as JSON.
fn nested_result(
    messages: &[Message],
    after: usize,
    call_id: &str,
) -> Option<serde_json::Value> {
    messages[after..]
        .iter()
        .find(|m| m.role == Role::Tool && m.tool_call_id.as_deref() == Some(call_id))
        .and_then(|m| serde_json::from_str(&m.content).ok())
}

fn merge_nested(activity: &mut Activity, nested: &serde_json::Value) {
    if let Some(files) = nested.get("files_modified").and_then(|v| v.as_array()) {
        for file in files.iter().filter_map(|v| v.as_str()) {
            push_file(&mut activity.files_modified, file);
        }
    }
    if let Some(commands) = nested.get("commands_run").and_then(|v| v.as_array()) {
        for command in commands.iter().filter_map(|v| v.as_str()) {
            activity.commands_run.push(command.to_string());
        }
    }
}
