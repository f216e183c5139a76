//! The bounded completion + tool-call iteration controller.
//!
//! One `AgentLoop` owns one conversation transcript. Each call to [`run`]
//! appends the user prompt and alternates between backend completions and
//! sequential tool dispatch until the model stops calling tools, the
//! iteration budget is exhausted, or the interrupt flag is raised.
//!
//! [`run`]: AgentLoop::run

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::backend::{CompletionRequest, LlmBackend};
use crate::error::Error;
use crate::message::{Message, ToolCall};
use crate::permission::PermissionManager;
use crate::spawn::SubagentSpawner;
use crate::stats::SessionStats;
use crate::tool::{ToolContext, ToolRegistry};

/// Iteration ceiling for any loop.
pub const MAX_ITERATIONS_LIMIT: u32 = 1000;
/// Subagent loops are clamped harder than the main loop.
pub const SUBAGENT_MAX_ITERATIONS: u32 = 100;
/// Default per-tool-call timeout.
pub const DEFAULT_TOOL_TIMEOUT_MS: u64 = 120_000;

const DEFAULT_SYSTEM_PROMPT: &str = "You are llama-agent, a capable assistant running in a \
terminal. You accomplish tasks by calling the tools listed below. Work step by step: inspect \
before you modify, prefer small verifiable changes, and report what you did. When a task needs \
broad exploration or focused expertise, delegate it to a subagent instead of doing everything \
inline. Answer directly and stop when the task is done.";

/// Immutable configuration for one agent loop.
#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub working_dir: PathBuf,
    pub max_iterations: u32,
    pub tool_timeout_ms: u64,
    pub yolo_mode: bool,
    /// Empty means every registered tool; non-empty is a whitelist.
    pub allowed_tools: Vec<String>,
    pub custom_system_prompt: Option<String>,
    pub skip_tool_table: bool,
    pub skills_section: Option<String>,
    pub agents_section: Option<String>,
    pub context_id: Option<String>,
    pub context_base: Option<PathBuf>,
    pub spawn_depth: u32,
}

impl AgentConfig {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            max_iterations: 50,
            tool_timeout_ms: DEFAULT_TOOL_TIMEOUT_MS,
            yolo_mode: false,
            allowed_tools: Vec::new(),
            custom_system_prompt: None,
            skip_tool_table: false,
            skills_section: None,
            agents_section: None,
            context_id: None,
            context_base: None,
            spawn_depth: 0,
        }
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max.clamp(1, MAX_ITERATIONS_LIMIT);
        self
    }

    pub fn with_tool_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.tool_timeout_ms = timeout_ms;
        self
    }

    pub fn with_yolo_mode(mut self, yolo: bool) -> Self {
        self.yolo_mode = yolo;
        self
    }

    pub fn with_allowed_tools(mut self, tools: Vec<String>) -> Self {
        self.allowed_tools = tools;
        self
    }

    pub fn with_custom_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.custom_system_prompt = Some(prompt.into());
        self
    }

    pub fn with_skip_tool_table(mut self, skip: bool) -> Self {
        self.skip_tool_table = skip;
        self
    }

    pub fn with_skills_section(mut self, section: impl Into<String>) -> Self {
        self.skills_section = Some(section.into());
        self
    }

    pub fn with_agents_section(mut self, section: impl Into<String>) -> Self {
        self.agents_section = Some(section.into());
        self
    }

    pub fn with_context(
        mut self,
        base: impl Into<PathBuf>,
        id: impl Into<String>,
    ) -> Self {
        self.context_base = Some(base.into());
        self.context_id = Some(id.into());
        self
    }

    pub fn with_spawn_depth(mut self, depth: u32) -> Self {
        self.spawn_depth = depth;
        self
    }
}

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Completed,
    MaxIterations,
    UserCancelled,
}

/// The result of one user turn.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub stop: StopReason,
    pub final_response: String,
    /// Completion rounds executed this turn.
    pub iterations: u32,
}

/// Invoked after every in-memory append; failures are logged and swallowed.
pub type PersistCallback = Arc<dyn Fn(&Message) -> Result<(), Error> + Send + Sync>;

pub struct AgentLoop {
    config: AgentConfig,
    backend: Arc<dyn LlmBackend>,
    tools: Arc<ToolRegistry>,
    permissions: Arc<PermissionManager>,
    subagents: Option<Arc<dyn SubagentSpawner>>,
    persist: Option<PersistCallback>,
    interrupt: Arc<AtomicBool>,
    stats: SessionStats,
    messages: Vec<Message>,
}

impl std::fmt::Debug for AgentLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentLoop")
            .field("config", &self.config)
            .field("interrupt", &self.interrupt)
            .field("stats", &self.stats)
            .field("messages", &self.messages)
            .finish_non_exhaustive()
    }
}

impl AgentLoop {
    /// Build a loop and its system message.
    ///
    /// Fails with `InvalidWorkingDir` when the configured directory does
    /// not exist or is not a directory.
    pub fn new(
        config: AgentConfig,
        backend: Arc<dyn LlmBackend>,
        tools: Arc<ToolRegistry>,
        permissions: Arc<PermissionManager>,
    ) -> Result<Self, Error> {
        if !config.working_dir.is_dir() {
            return Err(Error::invalid_working_dir(
                config.working_dir.display().to_string(),
            ));
        }

        let system = build_system_prompt(&config, &tools);
        let stats = SessionStats::new(backend.context_window());

        Ok(Self {
            config,
            backend,
            tools,
            permissions,
            subagents: None,
            persist: None,
            interrupt: Arc::new(AtomicBool::new(false)),
            stats,
            messages: vec![Message::system(system)],
        })
    }

    /// Late-bind the subagent manager (it needs a constructed loop first).
    pub fn set_subagents(&mut self, subagents: Arc<dyn SubagentSpawner>) {
        self.subagents = Some(subagents);
    }

    pub fn set_persistence(&mut self, callback: PersistCallback) {
        self.persist = Some(callback);
    }

    /// Share an externally owned interrupt flag (signal handler, parent).
    pub fn set_interrupt(&mut self, interrupt: Arc<AtomicBool>) {
        self.interrupt = interrupt;
    }

    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Replace the transcript tail with a persisted conversation. The
    /// constructed system message stays at position 0.
    pub fn set_messages(&mut self, messages: Vec<Message>) {
        self.messages.truncate(1);
        self.messages.extend(messages);
    }

    /// Reset to a fresh, system-only transcript.
    pub fn clear(&mut self) {
        self.messages.truncate(1);
    }

    /// Run one user turn to completion.
    pub async fn run(&mut self, user_prompt: &str) -> Result<RunOutcome, Error> {
        self.append(Message::user(user_prompt));

        let mut iterations: u32 = 0;

        loop {
            if self.interrupt.load(Ordering::SeqCst) {
                debug!(iterations, "run interrupted");
                return Ok(RunOutcome {
                    stop: StopReason::UserCancelled,
                    final_response: String::new(),
                    iterations,
                });
            }

            if iterations >= self.config.max_iterations {
                debug!(iterations, "max iterations reached");
                return Ok(RunOutcome {
                    stop: StopReason::MaxIterations,
                    final_response: String::new(),
                    iterations,
                });
            }

            let request = CompletionRequest::new(
                self.messages.clone(),
                Arc::clone(&self.interrupt),
            )
            .with_tools(self.tools.definitions_for(&self.config.allowed_tools));

            let completion = match self.backend.complete(request).await {
                Ok(completion) => completion,
                Err(Error::Cancelled) => {
                    return Ok(RunOutcome {
                        stop: StopReason::UserCancelled,
                        final_response: String::new(),
                        iterations,
                    });
                }
                Err(e) => return Err(e),
            };

            iterations += 1;

            if let Some(warning) = self.stats.record(&completion.timings) {
                warn!("{}", warning);
            }

            let assistant = completion.message;
            debug!(
                iteration = iterations,
                tool_calls = assistant.tool_calls.len(),
                "completion round finished"
            );
            self.append(assistant.clone());

            if assistant.tool_calls.is_empty() {
                return Ok(RunOutcome {
                    stop: StopReason::Completed,
                    final_response: assistant.content,
                    iterations,
                });
            }

            // Tool calls run sequentially in emitted order; one failure
            // never aborts the rest of the turn.
            for call in &assistant.tool_calls {
                let result = self.dispatch(call).await;
                self.append(result);
            }
        }
    }

    /// Resolve, authorize, and execute one tool call, producing the
    /// tool-role message for the transcript. Recoverable failures become
    /// error payloads the model can react to.
    async fn dispatch(&self, call: &ToolCall) -> Message {
        if self.tools.get(&call.name).is_none() {
            return Message::tool_result(
                &call.id,
                format!("Error: Unknown tool '{}'", call.name),
            );
        }

        let args = match call.parse_arguments() {
            Ok(args) => args,
            Err(e) => {
                return Message::tool_result(
                    &call.id,
                    format!("Error: invalid tool arguments: {}", e),
                );
            }
        };

        if !self.tool_allowed(&call.name) {
            return Message::tool_result(&call.id, "Permission denied");
        }

        let resource = resource_signature(&call.name, &args);
        if !self.permissions.check(&call.name, &resource).await {
            return Message::tool_result(&call.id, "Permission denied");
        }

        debug!(tool = %call.name, "executing tool");
        let ctx = self.tool_context();
        match self.tools.execute(&call.name, args, &ctx).await {
            Ok(outcome) if outcome.success => Message::tool_result(&call.id, outcome.output),
            Ok(outcome) => {
                Message::tool_result(&call.id, format!("Error: {}", outcome.error))
            }
            Err(e) => Message::tool_result(&call.id, format!("Error: {}", e)),
        }
    }

    fn tool_allowed(&self, name: &str) -> bool {
        self.config.allowed_tools.is_empty()
            || self.config.allowed_tools.iter().any(|t| t == name)
    }

    fn tool_context(&self) -> ToolContext {
        ToolContext {
            working_dir: self.config.working_dir.clone(),
            interrupt: Arc::clone(&self.interrupt),
            timeout_ms: self.config.tool_timeout_ms,
            context_base: self.config.context_base.clone(),
            context_id: self.config.context_id.clone(),
            subagents: self.subagents.clone(),
            spawn_depth: self.config.spawn_depth,
        }
    }

    fn append(&mut self, message: Message) {
        self.messages.push(message);
        if let Some(persist) = &self.persist {
            if let Err(e) = persist(self.messages.last().expect("just pushed")) {
                warn!(error = %e, "persistence callback failed; continuing");
            }
        }
    }
}

/// The permission resource signature for a call: the touched file for file
/// tools, the command for bash, compact arguments otherwise.
fn resource_signature(tool: &str, args: &Value) -> String {
    let key = match tool {
        "bash" => args.get("command"),
        "read" | "write" | "edit" => args.get("file_path"),
        _ => None,
    };
    match key.and_then(|v| v.as_str()) {
        Some(s) => s.to_string(),
        None => args.to_string(),
    }
}

fn build_system_prompt(config: &AgentConfig, tools: &ToolRegistry) -> String {
    let mut prompt = match &config.custom_system_prompt {
        Some(custom) if !custom.is_empty() => custom.clone(),
        _ => DEFAULT_SYSTEM_PROMPT.to_string(),
    };

    if !config.skip_tool_table {
        let definitions = tools.definitions_for(&config.allowed_tools);
        if !definitions.is_empty() {
            prompt.push_str("\n\n## Tools\n\n| Tool | Signature | Description |\n|------|-----------|-------------|\n");
            for def in definitions {
                prompt.push_str(&format!(
                    "| {} | `{}` | {} |\n",
                    def.name,
                    def.signature,
                    summarize(&def.description)
                ));
            }
        }
    }

    if let Some(skills) = &config.skills_section {
        prompt.push_str("\n\n");
        prompt.push_str(skills);
    }

    if let Some(agents) = &config.agents_section {
        prompt.push_str("\n\n");
        prompt.push_str(agents);
    }

    prompt
}

/// First sentence of a description, or its first 80 chars.
fn summarize(description: &str) -> String {
    let text = description.trim();
    if let Some(end) = text.find(". ") {
        return text[..=end].to_string();
    }
    if text.ends_with('.') || text.chars().count() <= 80 {
        return text.to_string();
    }
    text.chars().take(80).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendTimings, Completion};
    use crate::message::Role;
    use crate::testing::MockBackend;
    use crate::tool::{PropertySchema, Tool, ToolDefinition, ToolOutcome, ToolParameters};
    use async_trait::async_trait;

    struct FakeBash;

    #[async_trait]
    impl Tool for FakeBash {
        fn name(&self) -> &str {
            "bash"
        }
        fn description(&self) -> &str {
            "Run a shell command. Output is combined stdout and stderr."
        }
        fn signature(&self) -> &str {
            "bash(command)"
        }
        fn definition(&self) -> ToolDefinition {
            ToolDefinition::new(self.name(), self.description(), self.signature())
                .with_parameters(ToolParameters::new().add_property(
                    "command",
                    PropertySchema::string("The command to run"),
                    true,
                ))
        }
        async fn execute(
            &self,
            args: Value,
            _ctx: &ToolContext,
        ) -> Result<ToolOutcome, Error> {
            let command = args["command"].as_str().unwrap_or_default();
            match command {
                "echo x" => Ok(ToolOutcome::success("x\n")),
                "false" => Ok(ToolOutcome::failure("exit status 1")),
                other => Ok(ToolOutcome::success(format!("ran: {}", other))),
            }
        }
    }

    fn registry() -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(FakeBash));
        Arc::new(registry)
    }

    fn yolo_permissions() -> Arc<PermissionManager> {
        Arc::new(PermissionManager::new(true, None))
    }

    fn make_loop(backend: Arc<MockBackend>, config: AgentConfig) -> AgentLoop {
        AgentLoop::new(config, backend, registry(), yolo_permissions()).unwrap()
    }

    fn config() -> AgentConfig {
        AgentConfig::new(std::env::temp_dir())
    }

    #[tokio::test]
    async fn test_hello_no_tools() {
        let backend = Arc::new(MockBackend::new());
        backend.queue_text("hello");
        let mut agent = make_loop(Arc::clone(&backend), config());

        let outcome = agent.run("hi").await.unwrap();
        assert_eq!(outcome.stop, StopReason::Completed);
        assert_eq!(outcome.final_response, "hello");
        assert_eq!(outcome.iterations, 1);

        let last = agent.messages().last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert_eq!(last.content, "hello");
        assert!(agent.stats().total_input_tokens > 0);
    }

    #[tokio::test]
    async fn test_single_tool_call_round_trip() {
        let backend = Arc::new(MockBackend::new());
        backend.queue_tool_calls(
            "",
            vec![ToolCall::new("c1", "bash", r#"{"command":"echo x"}"#)],
        );
        backend.queue_text("done");
        let mut agent = make_loop(Arc::clone(&backend), config());

        let outcome = agent.run("run echo").await.unwrap();
        assert_eq!(outcome.stop, StopReason::Completed);
        assert_eq!(outcome.final_response, "done");
        assert_eq!(outcome.iterations, 2);

        let tool_msg = agent
            .messages()
            .iter()
            .find(|m| m.role == Role::Tool)
            .unwrap();
        assert_eq!(tool_msg.content, "x\n");
        assert_eq!(tool_msg.tool_call_id.as_deref(), Some("c1"));

        let activity = crate::activity::extract_activity(agent.messages());
        assert!(activity.files_modified.is_empty());
        assert_eq!(activity.commands_run, vec!["echo x"]);
    }

    #[tokio::test]
    async fn test_whitelist_denies_unlisted_tool() {
        let backend = Arc::new(MockBackend::new());
        backend.queue_tool_calls(
            "",
            vec![ToolCall::new("c1", "bash", r#"{"command":"ls"}"#)],
        );
        backend.queue_text("ok");
        let cfg = config().with_allowed_tools(vec!["read".to_string()]);
        let mut agent = make_loop(Arc::clone(&backend), cfg);

        let outcome = agent.run("try bash").await.unwrap();
        assert_eq!(outcome.stop, StopReason::Completed);

        let tool_msg = agent
            .messages()
            .iter()
            .find(|m| m.role == Role::Tool)
            .unwrap();
        assert_eq!(tool_msg.content, "Permission denied");
    }

    #[tokio::test]
    async fn test_permission_manager_deny() {
        let backend = Arc::new(MockBackend::new());
        backend.queue_tool_calls(
            "",
            vec![ToolCall::new("c1", "bash", r#"{"command":"rm -rf /"}"#)],
        );
        backend.queue_text("understood");

        let permissions = Arc::new(PermissionManager::new(false, None));
        permissions.record("bash", "rm -rf /", false);
        let mut agent =
            AgentLoop::new(config(), Arc::clone(&backend) as _, registry(), permissions)
                .unwrap();

        agent.run("nuke it").await.unwrap();
        let tool_msg = agent
            .messages()
            .iter()
            .find(|m| m.role == Role::Tool)
            .unwrap();
        assert_eq!(tool_msg.content, "Permission denied");
    }

    #[tokio::test]
    async fn test_max_iterations_one_still_runs_tools() {
        let backend = Arc::new(MockBackend::new());
        backend.queue_tool_calls(
            "",
            vec![ToolCall::new("c1", "bash", r#"{"command":"echo x"}"#)],
        );
        let cfg = config().with_max_iterations(1);
        let mut agent = make_loop(Arc::clone(&backend), cfg);

        let outcome = agent.run("loop forever").await.unwrap();
        assert_eq!(outcome.stop, StopReason::MaxIterations);
        assert_eq!(outcome.iterations, 1);
        // The single round's tool calls executed.
        assert!(agent.messages().iter().any(|m| m.role == Role::Tool));
        assert_eq!(backend.request_count(), 1);
    }

    #[tokio::test]
    async fn test_interrupt_before_first_completion() {
        let backend = Arc::new(MockBackend::new());
        backend.queue_text("never seen");
        let mut agent = make_loop(Arc::clone(&backend), config());
        agent.interrupt_flag().store(true, Ordering::SeqCst);

        let outcome = agent.run("hi").await.unwrap();
        assert_eq!(outcome.stop, StopReason::UserCancelled);
        assert_eq!(outcome.iterations, 0);
        assert_eq!(backend.request_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_backend_maps_to_user_cancelled() {
        let backend = Arc::new(MockBackend::new());
        backend.queue_error(Error::Cancelled);
        let mut agent = make_loop(Arc::clone(&backend), config());

        let outcome = agent.run("hi").await.unwrap();
        assert_eq!(outcome.stop, StopReason::UserCancelled);
        assert_eq!(outcome.iterations, 0);
        // No partial assistant message was appended.
        assert!(agent.messages().iter().all(|m| m.role != Role::Assistant));
    }

    #[tokio::test]
    async fn test_unknown_tool_and_bad_args_recoverable() {
        let backend = Arc::new(MockBackend::new());
        backend.queue_tool_calls(
            "",
            vec![
                ToolCall::new("c1", "teleport", "{}"),
                ToolCall::new("c2", "bash", "{broken json"),
            ],
        );
        backend.queue_text("recovered");
        let mut agent = make_loop(Arc::clone(&backend), config());

        let outcome = agent.run("go").await.unwrap();
        assert_eq!(outcome.stop, StopReason::Completed);

        let tool_messages: Vec<&Message> = agent
            .messages()
            .iter()
            .filter(|m| m.role == Role::Tool)
            .collect();
        assert_eq!(tool_messages.len(), 2);
        assert!(tool_messages[0].content.contains("Unknown tool"));
        assert!(tool_messages[1].content.contains("invalid tool arguments"));
    }

    #[tokio::test]
    async fn test_tool_failure_does_not_abort_later_calls() {
        let backend = Arc::new(MockBackend::new());
        backend.queue_tool_calls(
            "",
            vec![
                ToolCall::new("c1", "bash", r#"{"command":"false"}"#),
                ToolCall::new("c2", "bash", r#"{"command":"echo x"}"#),
            ],
        );
        backend.queue_text("done");
        let mut agent = make_loop(Arc::clone(&backend), config());

        agent.run("go").await.unwrap();
        let tool_messages: Vec<&Message> = agent
            .messages()
            .iter()
            .filter(|m| m.role == Role::Tool)
            .collect();
        assert!(tool_messages[0].content.starts_with("Error:"));
        assert_eq!(tool_messages[1].content, "x\n");
    }

    #[tokio::test]
    async fn test_tool_call_ids_reference_prior_assistant_calls() {
        let backend = Arc::new(MockBackend::new());
        backend.queue_tool_calls(
            "",
            vec![ToolCall::new("c1", "bash", r#"{"command":"echo x"}"#)],
        );
        backend.queue_text("done");
        let mut agent = make_loop(Arc::clone(&backend), config());
        agent.run("go").await.unwrap();

        let mut seen_ids: Vec<&str> = Vec::new();
        for msg in agent.messages() {
            for call in &msg.tool_calls {
                seen_ids.push(&call.id);
            }
            if let Some(id) = &msg.tool_call_id {
                assert!(seen_ids.contains(&id.as_str()));
            }
        }
    }

    #[tokio::test]
    async fn test_persistence_callback_failures_swallowed() {
        let backend = Arc::new(MockBackend::new());
        backend.queue_text("hello");
        let mut agent = make_loop(Arc::clone(&backend), config());
        agent.set_persistence(Arc::new(|_msg| {
            Err(Error::Io(std::io::Error::other("disk full")))
        }));

        let outcome = agent.run("hi").await.unwrap();
        assert_eq!(outcome.stop, StopReason::Completed);
        assert_eq!(agent.messages().len(), 3);
    }

    #[tokio::test]
    async fn test_clear_resets_to_system_only() {
        let backend = Arc::new(MockBackend::new());
        backend.queue_text("hello");
        let mut agent = make_loop(Arc::clone(&backend), config());
        agent.run("hi").await.unwrap();
        assert!(agent.messages().len() > 1);

        agent.clear();
        assert_eq!(agent.messages().len(), 1);
        assert_eq!(agent.messages()[0].role, Role::System);
    }

    #[tokio::test]
    async fn test_set_messages_keeps_system_prompt() {
        let backend = Arc::new(MockBackend::new());
        let mut agent = make_loop(Arc::clone(&backend), config());
        let system = agent.messages()[0].content.clone();

        agent.set_messages(vec![Message::user("restored"), Message::assistant("yes")]);
        assert_eq!(agent.messages().len(), 3);
        assert_eq!(agent.messages()[0].content, system);
        assert_eq!(agent.messages()[1].content, "restored");
    }

    #[test]
    fn test_system_prompt_tool_table() {
        let backend = Arc::new(MockBackend::new());
        let agent = make_loop(backend, config());
        let system = &agent.messages()[0].content;
        assert!(system.contains("| bash | `bash(command)` |"));
        assert!(system.contains("Run a shell command."));
        // First sentence only.
        assert!(!system.contains("combined stdout"));
    }

    #[test]
    fn test_custom_prompt_and_skip_table() {
        let backend = Arc::new(MockBackend::new());
        let cfg = config()
            .with_custom_system_prompt("You are a planner.")
            .with_skip_tool_table(true);
        let agent = make_loop(backend, cfg);
        let system = &agent.messages()[0].content;
        assert_eq!(system, "You are a planner.");
    }

    #[test]
    fn test_sections_appended() {
        let backend = Arc::new(MockBackend::new());
        let cfg = config()
            .with_skills_section("<skills>\n</skills>")
            .with_agents_section("<available_agents>\n</available_agents>");
        let agent = make_loop(backend, cfg);
        let system = &agent.messages()[0].content;
        assert!(system.contains("<skills>"));
        assert!(system.contains("<available_agents>"));
    }

    #[test]
    fn test_invalid_working_dir_rejected() {
        let backend: Arc<MockBackend> = Arc::new(MockBackend::new());
        let cfg = AgentConfig::new("/definitely/not/a/real/dir");
        let err = AgentLoop::new(cfg, backend, registry(), yolo_permissions()).unwrap_err();
        assert!(matches!(err, Error::InvalidWorkingDir(_)));
    }

    #[test]
    fn test_max_iterations_clamped() {
        let cfg = config().with_max_iterations(0);
        assert_eq!(cfg.max_iterations, 1);
        let cfg = config().with_max_iterations(99_999);
        assert_eq!(cfg.max_iterations, MAX_ITERATIONS_LIMIT);
    }

    #[tokio::test]
    async fn test_stats_cover_context_after_each_completion() {
        let backend = Arc::new(MockBackend::new());
        backend.queue_completion(Completion {
            message: Message::assistant("hi"),
            timings: BackendTimings {
                prompt_tokens: 120,
                predicted_tokens: 30,
                cached_tokens: 40,
                prompt_ms: 12.0,
                predict_ms: 40.0,
                context_tokens: 150,
            },
        });
        let mut agent = make_loop(Arc::clone(&backend), config());
        agent.run("hi").await.unwrap();

        let stats = agent.stats();
        assert!(
            stats.total_input_tokens + stats.total_output_tokens
                >= u64::from(stats.current_context_tokens)
        );
        assert_eq!(stats.total_cached_tokens, 40);
    }
}
