//! HTTP client for a llama.cpp `llama-server` instance.
//!
//! Uses the OpenAI-compatible chat endpoint (non-streaming) plus two
//! server-native endpoints: `/props` for the context window and
//! `/slots/{id}?action=erase` for KV-cache isolation around spawns.

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use la_core::{
    BackendTimings, Completion, CompletionRequest, Error, LlmBackend, Message, Role, ToolCall,
    ToolDefinition,
};

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8080";
/// Used until /props answers, and as the fallback when it never does.
const DEFAULT_CONTEXT_WINDOW: u32 = 8192;

pub struct LlamaServerBackend {
    client: Client,
    base_url: String,
    slot_id: u32,
    context_window: AtomicU32,
}

impl LlamaServerBackend {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            slot_id: 0,
            context_window: AtomicU32::new(0),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_slot(mut self, slot_id: u32) -> Self {
        self.slot_id = slot_id;
        self
    }

    /// Fetch the context window from `/props`, caching the answer.
    pub async fn probe_context_window(&self) -> u32 {
        let cached = self.context_window.load(Ordering::SeqCst);
        if cached != 0 {
            return cached;
        }

        let url = format!("{}/props", self.base_url);
        let n_ctx = match self.client.get(&url).send().await {
            Ok(response) => response
                .json::<PropsResponse>()
                .await
                .ok()
                .map(|p| p.default_generation_settings.n_ctx)
                .unwrap_or(DEFAULT_CONTEXT_WINDOW),
            Err(e) => {
                warn!(error = %e, "cannot probe {}; using default context window", url);
                DEFAULT_CONTEXT_WINDOW
            }
        };

        self.context_window.store(n_ctx, Ordering::SeqCst);
        n_ctx
    }

    fn convert_message(message: &Message) -> WireMessage {
        let role = match message.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };

        let tool_calls = if message.tool_calls.is_empty() {
            None
        } else {
            Some(
                message
                    .tool_calls
                    .iter()
                    .map(|tc| WireToolCall {
                        id: tc.id.clone(),
                        r#type: "function".to_string(),
                        function: WireFunctionCall {
                            name: tc.name.clone(),
                            arguments: tc.arguments.clone(),
                        },
                    })
                    .collect(),
            )
        };

        WireMessage {
            role: role.to_string(),
            content: Some(message.content.clone()),
            tool_calls,
            tool_call_id: message.tool_call_id.clone(),
        }
    }

    fn convert_tool(tool: &ToolDefinition) -> WireTool {
        WireTool {
            r#type: "function".to_string(),
            function: WireFunction {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: serde_json::to_value(&tool.parameters).unwrap_or_default(),
            },
        }
    }

    fn parse_response(&self, response: ChatResponse) -> Result<Completion, Error> {
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::backend("completion returned no choices"))?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| ToolCall::new(tc.id, tc.function.name, tc.function.arguments))
            .collect::<Vec<_>>();

        let content = choice.message.content.unwrap_or_default();
        let message = if tool_calls.is_empty() {
            Message::assistant(content)
        } else {
            Message::assistant_with_tool_calls(content, tool_calls)
        };

        let usage = response.usage.unwrap_or_default();
        let timings = response.timings.unwrap_or_default();
        let prompt_tokens = if timings.prompt_n > 0 {
            timings.prompt_n
        } else {
            usage.prompt_tokens
        };
        let predicted_tokens = if timings.predicted_n > 0 {
            timings.predicted_n
        } else {
            usage.completion_tokens
        };

        Ok(Completion {
            message,
            timings: BackendTimings {
                prompt_tokens,
                predicted_tokens,
                cached_tokens: timings.cache_n,
                prompt_ms: timings.prompt_ms,
                predict_ms: timings.predicted_ms,
                context_tokens: prompt_tokens + predicted_tokens,
            },
        })
    }
}

impl Default for LlamaServerBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmBackend for LlamaServerBackend {
    fn name(&self) -> &str {
        "llama-server"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<Completion, Error> {
        if request.interrupt.load(Ordering::SeqCst) {
            return Err(Error::Cancelled);
        }

        let body = ChatRequest {
            messages: request.messages.iter().map(Self::convert_message).collect(),
            tools: if request.tools.is_empty() {
                None
            } else {
                Some(request.tools.iter().map(Self::convert_tool).collect())
            },
            stream: false,
        };

        let url = format!("{}/v1/chat/completions", self.base_url);
        debug!(messages = body.messages.len(), "requesting completion");

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::backend(format!("request failed: {}", e)))?;

        // The request blocks for the whole generation; a flag raised while
        // we waited means the turn is already abandoned.
        if request.interrupt.load(Ordering::SeqCst) {
            return Err(Error::Cancelled);
        }

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::backend(format!("{}: {}", status, text)));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::backend(format!("bad completion payload: {}", e)))?;
        self.parse_response(parsed)
    }

    async fn clear_slot(&self) {
        let url = format!(
            "{}/slots/{}?action=erase",
            self.base_url, self.slot_id
        );
        if let Err(e) = self.client.post(&url).send().await {
            warn!(error = %e, "slot erase failed; next completion reprocesses anyway");
        }
    }

    fn context_window(&self) -> u32 {
        let cached = self.context_window.load(Ordering::SeqCst);
        if cached != 0 {
            cached
        } else {
            DEFAULT_CONTEXT_WINDOW
        }
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ChatRequest {
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    stream: bool,
}

#[derive(Serialize, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    r#type: String,
    function: WireFunctionCall,
}

#[derive(Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Serialize)]
struct WireTool {
    r#type: String,
    function: WireFunction,
}

#[derive(Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
    #[serde(default)]
    timings: Option<WireTimings>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: WireMessage,
}

#[derive(Deserialize, Default)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[derive(Deserialize, Default)]
struct WireTimings {
    #[serde(default)]
    prompt_n: u32,
    #[serde(default)]
    predicted_n: u32,
    #[serde(default)]
    cache_n: u32,
    #[serde(default)]
    prompt_ms: f64,
    #[serde(default)]
    predicted_ms: f64,
}

#[derive(Deserialize)]
struct PropsResponse {
    default_generation_settings: GenerationSettings,
}

#[derive(Deserialize)]
struct GenerationSettings {
    #[serde(default)]
    n_ctx: u32,
}
