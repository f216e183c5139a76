//! Test utilities shared across the workspace.
//! Only compiled when running tests or with the `testing` feature.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::backend::{BackendTimings, Completion, CompletionRequest, LlmBackend};
use crate::error::Error;
use crate::message::{Message, ToolCall};
use crate::tool::ToolDefinition;

/// A backend that returns pre-queued completions.
pub struct MockBackend {
    responses: Mutex<Vec<Result<Completion, Error>>>,
    /// Captured (messages, tools) pairs, one per complete() call.
    pub captured_requests: Mutex<Vec<(Vec<Message>, Vec<ToolDefinition>)>>,
    slot_clears: AtomicUsize,
    context_window: u32,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            captured_requests: Mutex::new(Vec::new()),
            slot_clears: AtomicUsize::new(0),
            context_window: 8192,
        }
    }

    pub fn with_context_window(mut self, tokens: u32) -> Self {
        self.context_window = tokens;
        self
    }

    fn default_timings(prompt: u32, predicted: u32) -> BackendTimings {
        BackendTimings {
            prompt_tokens: prompt,
            predicted_tokens: predicted,
            cached_tokens: 0,
            prompt_ms: 5.0,
            predict_ms: 15.0,
            context_tokens: prompt + predicted,
        }
    }

    /// Queue a plain assistant reply. Responses are returned in FIFO order.
    pub fn queue_text(&self, content: &str) {
        self.queue_completion(Completion {
            message: Message::assistant(content),
            timings: Self::default_timings(25, 10),
        });
    }

    /// Queue an assistant reply carrying tool calls.
    pub fn queue_tool_calls(&self, content: &str, calls: Vec<ToolCall>) {
        self.queue_completion(Completion {
            message: Message::assistant_with_tool_calls(content, calls),
            timings: Self::default_timings(25, 10),
        });
    }

    pub fn queue_completion(&self, completion: Completion) {
        self.responses.lock().unwrap().insert(0, Ok(completion));
    }

    /// Queue an error for the next complete() call.
    pub fn queue_error(&self, error: Error) {
        self.responses.lock().unwrap().insert(0, Err(error));
    }

    pub fn request_count(&self) -> usize {
        self.captured_requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> Option<(Vec<Message>, Vec<ToolDefinition>)> {
        self.captured_requests.lock().unwrap().last().cloned()
    }

    /// How many times clear_slot() was called.
    pub fn slot_clear_count(&self) -> usize {
        self.slot_clears.load(Ordering::SeqCst)
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<Completion, Error> {
        self.captured_requests
            .lock()
            .unwrap()
            .push((request.messages, request.tools));
        match self.responses.lock().unwrap().pop() {
            Some(response) => response,
            None => Err(Error::backend("No mock response queued")),
        }
    }

    async fn clear_slot(&self) {
        self.slot_clears.fetch_add(1, Ordering::SeqCst);
    }

    fn context_window(&self) -> u32 {
        self.context_window
    }
}
