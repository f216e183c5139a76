use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Error;
use crate::message::Message;
use crate::tool::ToolDefinition;

/// Per-completion measurements reported by the backend.
///
/// `context_tokens` is the total number of tokens occupying the context
/// window after this completion (prompt + generation).
#[derive(Debug, Clone, Copy, Default)]
pub struct BackendTimings {
    pub prompt_tokens: u32,
    pub predicted_tokens: u32,
    pub cached_tokens: u32,
    pub prompt_ms: f64,
    pub predict_ms: f64,
    pub context_tokens: u32,
}

/// A finished completion: the assistant message plus its timings.
#[derive(Debug, Clone)]
pub struct Completion {
    pub message: Message,
    pub timings: BackendTimings,
}

/// A completion request handed to the backend.
///
/// Carries the shared interrupt flag so the inference thread can observe
/// cancellation mid-generation and return `Error::Cancelled` instead of a
/// partial message.
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub interrupt: Arc<AtomicBool>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<Message>, interrupt: Arc<AtomicBool>) -> Self {
        Self {
            messages,
            tools: Vec::new(),
            interrupt,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }
}

/// The LLM inference backend.
///
/// `complete` blocks the caller until a full assistant message is produced
/// or cancellation is observed. The backend owns a KV-cache slot shared
/// between the main loop and subagents; `clear_slot` forces the next
/// completion to reprocess its transcript from scratch, which is how spawns
/// get context isolation.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, request: CompletionRequest) -> Result<Completion, Error>;

    /// Drop the current slot's KV-cache. Best-effort; failures are logged
    /// by the implementation, never propagated.
    async fn clear_slot(&self);

    /// Total context window in tokens.
    fn context_window(&self) -> u32;
}
