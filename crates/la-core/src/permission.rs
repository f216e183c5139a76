//! Session-scoped permission decisions.
//!
//! Decisions are memoized per (tool, resource signature) so an identical
//! request never re-prompts within a session. Subagents share the parent's
//! manager by reference, so decisions apply transitively.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

/// What the user answered at the prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptAnswer {
    /// Allow this (tool, resource) pair.
    Yes,
    /// Allow the tool for any resource this session.
    Always,
    /// Deny this (tool, resource) pair.
    No,
}

/// Asks the user for consent. Implemented by the terminal frontend.
#[async_trait]
pub trait PermissionPrompter: Send + Sync {
    async fn ask(&self, tool: &str, resource: &str) -> PromptAnswer;
}

/// Wildcard resource key used when the user answers "always".
const ANY_RESOURCE: &str = "*";

pub struct PermissionManager {
    yolo_mode: bool,
    prompter: Option<Arc<dyn PermissionPrompter>>,
    cache: Mutex<HashMap<(String, String), bool>>,
}

impl PermissionManager {
    pub fn new(yolo_mode: bool, prompter: Option<Arc<dyn PermissionPrompter>>) -> Self {
        Self {
            yolo_mode,
            prompter,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Decide whether `tool` may touch `resource`.
    ///
    /// Order: yolo short-circuit, cached pair, cached tool wildcard, then
    /// prompt (writing the answer back to the cache). With no prompter
    /// configured an uncached request is denied.
    pub async fn check(&self, tool: &str, resource: &str) -> bool {
        if self.yolo_mode {
            return true;
        }

        {
            let cache = self.cache.lock().unwrap();
            if let Some(&allowed) = cache.get(&(tool.to_string(), resource.to_string())) {
                return allowed;
            }
            if let Some(&allowed) = cache.get(&(tool.to_string(), ANY_RESOURCE.to_string())) {
                return allowed;
            }
        }

        let Some(prompter) = &self.prompter else {
            return false;
        };

        let answer = prompter.ask(tool, resource).await;
        let mut cache = self.cache.lock().unwrap();
        match answer {
            PromptAnswer::Yes => {
                cache.insert((tool.to_string(), resource.to_string()), true);
                true
            }
            PromptAnswer::Always => {
                cache.insert((tool.to_string(), ANY_RESOURCE.to_string()), true);
                true
            }
            PromptAnswer::No => {
                cache.insert((tool.to_string(), resource.to_string()), false);
                false
            }
        }
    }

    /// Seed a decision without prompting (used by tests and trusted flows).
    pub fn record(&self, tool: &str, resource: &str, allowed: bool) {
        self.cache
            .lock()
            .unwrap()
            .insert((tool.to_string(), resource.to_string()), allowed);
    }
}
