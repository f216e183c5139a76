//! Persisted shapes: context state, archive records, compact entries.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use la_core::Message;

/// ISO-8601 UTC with millisecond precision, e.g. `2025-03-01T12:00:00.000Z`.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Filename-safe timestamp for archive and compact files.
pub fn file_stamp() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}

/// A persisted conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextState {
    pub id: String,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
}

impl ContextState {
    pub fn new() -> Self {
        let now = now_iso();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: now.clone(),
            updated_at: now,
            messages: Vec::new(),
            metadata: serde_json::Map::new(),
        }
    }
}

impl Default for ContextState {
    fn default() -> Self {
        Self::new()
    }
}

/// One compaction event recorded in `metadata.archives`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub timestamp: String,
    pub message_count: usize,
    pub compact_ref: String,
}

/// A compaction summary: programmatically extracted fields plus the
/// LLM-generated narrative.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompactEntry {
    pub timestamp: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub key_decisions: Vec<String>,
    #[serde(default)]
    pub current_state: String,
    #[serde(default)]
    pub pending_tasks: Vec<String>,
    #[serde(default)]
    pub user_messages: Vec<String>,
    #[serde(default)]
    pub files_modified: Vec<String>,
    #[serde(default)]
    pub commands_run: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_ref: Option<String>,
}

impl CompactEntry {
    /// Render the entry as the synthetic system message a compacted
    /// conversation resumes from.
    pub fn render_markdown(&self) -> String {
        let mut out = String::from("# Conversation Summary\n\n");
        out.push_str(&self.summary);
        out.push('\n');

        if !self.key_decisions.is_empty() {
            out.push_str("\n## Key Decisions\n");
            for decision in &self.key_decisions {
                out.push_str(&format!("- {}\n", decision));
            }
        }

        if !self.current_state.is_empty() {
            out.push_str("\n## Current State\n");
            out.push_str(&self.current_state);
            out.push('\n');
        }

        if !self.pending_tasks.is_empty() {
            out.push_str("\n## Pending Tasks\n");
            for task in &self.pending_tasks {
                out.push_str(&format!("- {}\n", task));
            }
        }

        if !self.files_modified.is_empty() {
            out.push_str("\n## Files Modified\n");
            for file in &self.files_modified {
                out.push_str(&format!("- {}\n", file));
            }
        }

        if let Some(plan) = &self.plan_ref {
            out.push_str(&format!("\n## Plan\nSee {}\n", plan));
        }

        out
    }
}

/// One row of `/list`.
#[derive(Debug, Clone)]
pub struct ContextSummary {
    pub id: String,
    pub updated_at: String,
    pub message_count: usize,
    pub preview: String,
}
