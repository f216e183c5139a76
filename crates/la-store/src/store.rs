//! The on-disk context store.
//!
//! Layout under the configured base directory:
//!
//! ```text
//! contexts/<uuid>/conversation.json
//! contexts/<uuid>/conversation_<YYYYMMDD_HHMMSS>.json
//! contexts/<uuid>/compact_<YYYYMMDD_HHMMSS>.json
//! contexts/<uuid>/plan.md
//! contexts/<uuid>/plan_state.json
//! ```
//!
//! All writes go through [`write_atomic`]: serialize to `<path>.tmp`, flush,
//! rename over the target. A reader sees either the prior version or the new
//! one, never a truncated file. There is no cross-process locking; the store
//! assumes a single writer.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use la_core::{Error, Message, Result};

use crate::state::{file_stamp, now_iso, ArchiveRecord, CompactEntry, ContextState, ContextSummary};

const CONVERSATION_FILE: &str = "conversation.json";
const PLAN_FILE: &str = "plan.md";

/// Longest preview shown by `/list`; longer previews are cut at 77 chars
/// plus an ellipsis.
const PREVIEW_MAX: usize = 80;
const PREVIEW_CUT: usize = 77;

/// Write `contents` to `path` atomically via a temp file and rename.
pub fn write_atomic(path: &Path, contents: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);

    let mut file = fs::File::create(&tmp)?;
    file.write_all(contents.as_bytes())?;
    file.sync_all()?;
    drop(file);

    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

pub struct ContextStore {
    base: PathBuf,
}

impl ContextStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn context_dir(&self, id: &str) -> PathBuf {
        self.base.join("contexts").join(id)
    }

    fn conversation_path(&self, id: &str) -> PathBuf {
        self.context_dir(id).join(CONVERSATION_FILE)
    }

    /// Create a fresh context with empty messages and persist it.
    pub fn create(&self) -> Result<ContextState> {
        let state = ContextState::new();
        self.write_state(&state)?;
        debug!(id = %state.id, "created context");
        Ok(state)
    }

    pub fn exists(&self, id: &str) -> bool {
        self.conversation_path(id).is_file()
    }

    /// Load a context. Missing file is `None`; parse errors surface.
    pub fn load(&self, id: &str) -> Result<Option<ContextState>> {
        let path = self.conversation_path(id);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let state = serde_json::from_str(&contents)
            .map_err(|e| Error::parse(format!("{}: {}", path.display(), e)))?;
        Ok(Some(state))
    }

    /// Persist a context, bumping `updated_at`.
    pub fn save(&self, state: &mut ContextState) -> Result<()> {
        state.updated_at = now_iso();
        self.write_state(state)
    }

    fn write_state(&self, state: &ContextState) -> Result<()> {
        let json = serde_json::to_string_pretty(state)?;
        write_atomic(&self.conversation_path(&state.id), &json)?;
        Ok(())
    }

    fn load_required(&self, id: &str) -> Result<ContextState> {
        self.load(id)?
            .ok_or_else(|| Error::config(format!("no such context: {}", id)))
    }

    pub fn append_message(&self, id: &str, message: &Message) -> Result<()> {
        let mut state = self.load_required(id)?;
        state.messages.push(message.clone());
        self.save(&mut state)
    }

    /// Replace the persisted messages wholesale.
    pub fn save_messages(&self, id: &str, messages: &[Message]) -> Result<()> {
        let mut state = self.load_required(id)?;
        state.messages = messages.to_vec();
        self.save(&mut state)
    }

    /// All contexts, newest first.
    pub fn list(&self) -> Result<Vec<ContextSummary>> {
        let contexts_dir = self.base.join("contexts");
        let entries = match fs::read_dir(&contexts_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut summaries = Vec::new();
        for entry in entries {
            let entry = entry?;
            let id = entry.file_name().to_string_lossy().to_string();
            let Some(state) = self.load(&id)? else {
                continue;
            };
            summaries.push(ContextSummary {
                preview: preview_of(&state.messages),
                message_count: state.messages.len(),
                updated_at: state.updated_at,
                id: state.id,
            });
        }

        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        let dir = self.context_dir(id);
        if !dir.is_dir() {
            return Err(Error::config(format!("no such context: {}", id)));
        }
        fs::remove_dir_all(dir)?;
        Ok(())
    }

    /// Archive-then-summarize rewrite of a context.
    ///
    /// Moves the current messages to `conversation_<ts>.json`, writes the
    /// compact entry to `compact_<ts>.json`, records the archive in
    /// metadata, and replaces the messages with a single synthetic system
    /// message rendering the entry.
    pub fn compact(&self, id: &str, entry: &CompactEntry) -> Result<ArchiveRecord> {
        let mut state = self.load_required(id)?;
        let dir = self.context_dir(id);

        let stamp = if entry.timestamp.is_empty() {
            file_stamp()
        } else {
            entry.timestamp.clone()
        };

        let archived = serde_json::to_string_pretty(&state.messages)?;
        write_atomic(&dir.join(format!("conversation_{}.json", stamp)), &archived)?;

        let compact_ref = format!("compact_{}.json", stamp);
        let compact_json = serde_json::to_string_pretty(entry)?;
        write_atomic(&dir.join(&compact_ref), &compact_json)?;

        let record = ArchiveRecord {
            timestamp: stamp,
            message_count: state.messages.len(),
            compact_ref,
        };

        let archives = state
            .metadata
            .entry("archives")
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(list) = archives {
            list.push(serde_json::to_value(&record)?);
        }

        state.messages = vec![Message::system(entry.render_markdown())];
        self.save(&mut state)?;

        debug!(id, archived = record.message_count, "compacted context");
        Ok(record)
    }

    pub fn archives(&self, id: &str) -> Result<Vec<ArchiveRecord>> {
        let state = self.load_required(id)?;
        match state.metadata.get("archives") {
            Some(value) => Ok(serde_json::from_value(value.clone())?),
            None => Ok(Vec::new()),
        }
    }

    /// Set a metadata key on a context (e.g. `plan_ref`).
    pub fn update_metadata(&self, id: &str, key: &str, value: Value) -> Result<()> {
        let mut state = self.load_required(id)?;
        state.metadata.insert(key.to_string(), value);
        self.save(&mut state)
    }

    pub fn save_plan(&self, id: &str, content: &str) -> Result<()> {
        write_atomic(&self.context_dir(id).join(PLAN_FILE), content)?;
        Ok(())
    }

    pub fn load_plan(&self, id: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.context_dir(id).join(PLAN_FILE)) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn has_plan(&self, id: &str) -> bool {
        self.context_dir(id).join(PLAN_FILE).is_file()
    }
}

/// First line of the last user message, truncated for display.
fn preview_of(messages: &[Message]) -> String {
    let Some(last_user) = messages
        .iter()
        .rev()
        .find(|m| m.role == la_core::Role::User)
    else {
        return String::new();
    };

    let line = last_user.content.lines().next().unwrap_or_default();
    if line.chars().count() <= PREVIEW_MAX {
        return line.to_string();
    }
    let mut cut: String = line.chars().take(PREVIEW_CUT).collect();
    cut.push_str("...");
    cut
}
