//! Interactive REPL: readline, slash commands, turn dispatch.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use rustyline::error::ReadlineError;
use rustyline::history::FileHistory;
use rustyline::{Config, Editor};
use tracing::debug;

use la_agents::{AgentRegistry, SubagentManager};
use la_core::{
    AgentConfig, AgentLoop, LlmBackend, PermissionManager, StopReason, SubagentSpawner,
    ToolRegistry,
};
use la_plan::PlanWorkflow;
use la_store::{ContextStore, ContextSummary};

use crate::compaction::compact_context;
use crate::interact::TerminalInteract;
use crate::skills::Skill;

/// Everything one interactive session needs.
pub struct Session {
    pub backend: Arc<dyn LlmBackend>,
    pub tools: Arc<ToolRegistry>,
    pub permissions: Arc<PermissionManager>,
    pub agent_registry: Arc<AgentRegistry>,
    pub subagents: Arc<SubagentManager>,
    pub store: Arc<ContextStore>,
    pub interrupt: Arc<AtomicBool>,
    pub skills: Vec<Skill>,
    /// Prototype configuration; each context gets a copy bound to its id.
    pub base_config: AgentConfig,
    pub history_path: Option<PathBuf>,
    agent: AgentLoop,
    context_id: String,
}

impl Session {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        backend: Arc<dyn LlmBackend>,
        tools: Arc<ToolRegistry>,
        permissions: Arc<PermissionManager>,
        agent_registry: Arc<AgentRegistry>,
        subagents: Arc<SubagentManager>,
        store: Arc<ContextStore>,
        interrupt: Arc<AtomicBool>,
        skills: Vec<Skill>,
        base_config: AgentConfig,
        history_path: Option<PathBuf>,
    ) -> Result<Self> {
        let context = store.create()?;
        let context_id = context.id;
        let agent = build_agent(
            &base_config,
            &context_id,
            &backend,
            &tools,
            &permissions,
            &subagents,
            &store,
            &interrupt,
        )?;

        Ok(Self {
            backend,
            tools,
            permissions,
            agent_registry,
            subagents,
            store,
            interrupt,
            skills,
            base_config,
            history_path,
            agent,
            context_id,
        })
    }

    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    /// Bind the session to a context, replacing the live transcript.
    fn switch_context(&mut self, context_id: String) -> Result<()> {
        let state = self
            .store
            .load(&context_id)?
            .ok_or_else(|| anyhow::anyhow!("no such context: {}", context_id))?;

        self.agent = build_agent(
            &self.base_config,
            &context_id,
            &self.backend,
            &self.tools,
            &self.permissions,
            &self.subagents,
            &self.store,
            &self.interrupt,
        )?;
        self.agent.set_messages(state.messages);
        self.context_id = context_id;
        Ok(())
    }

    /// Run one user turn and print the outcome.
    pub async fn run_turn(&mut self, prompt: &str) {
        self.interrupt.store(false, Ordering::SeqCst);

        match self.agent.run(prompt).await {
            Ok(outcome) => match outcome.stop {
                StopReason::Completed => println!("\n{}\n", outcome.final_response),
                StopReason::UserCancelled => println!("\n[Cancelled by user]\n"),
                StopReason::MaxIterations => println!(
                    "\n[Stopped: reached {} iterations]\n",
                    outcome.iterations
                ),
            },
            Err(e) => eprintln!("\nError: {}\n", e),
        }
    }

    async fn handle_compact(&mut self, directive: Option<&str>) {
        self.interrupt.store(false, Ordering::SeqCst);
        let messages: Vec<la_core::Message> = self.agent.messages()[1..].to_vec();
        if messages.is_empty() {
            println!("Nothing to compact.\n");
            return;
        }

        match compact_context(
            Arc::clone(&self.backend),
            &self.store,
            &self.context_id,
            &messages,
            directive,
            &self.base_config.working_dir,
            Arc::clone(&self.interrupt),
        )
        .await
        {
            Ok(rewritten) => {
                let archived = messages.len();
                self.agent.set_messages(rewritten);
                println!("Compacted {} messages into a summary.\n", archived);
            }
            Err(la_core::Error::Cancelled) => println!("\n[Cancelled by user]\n"),
            Err(e) => eprintln!("Compaction failed: {}\n", e),
        }
    }

    async fn handle_plan(&mut self, task: &str) {
        self.interrupt.store(false, Ordering::SeqCst);
        let workflow = PlanWorkflow::new(
            Arc::clone(&self.backend),
            Arc::clone(&self.tools),
            Arc::clone(&self.permissions),
            Arc::clone(&self.subagents),
            Arc::clone(&self.agent_registry),
            Arc::clone(&self.store),
            self.base_config.working_dir.clone(),
            Arc::clone(&self.interrupt),
        );

        let task = if task.is_empty() { None } else { Some(task) };
        match workflow.run(task, &self.context_id, &TerminalInteract).await {
            Ok(status) => {
                use la_plan::PlanRunStatus::*;
                match status {
                    Approved => println!(
                        "Plan approved and written to contexts/{}/plan.md\n",
                        self.context_id
                    ),
                    Declined => println!("Plan kept for later; rerun /plan to revisit.\n"),
                    Aborted => println!("Planning aborted.\n"),
                    Interrupted => println!("[Cancelled by user] — /plan resumes it.\n"),
                }
            }
            Err(e) => eprintln!("Plan failed: {}\n", e),
        }
    }

    fn print_stats(&self) {
        let stats = self.agent.stats();
        println!(
            "\nSession stats:\n  input tokens:   {}\n  output tokens:  {}\n  cached tokens:  {}\n  prompt time:    {:.0} ms\n  predict time:   {:.0} ms\n  context:        {} / {} tokens ({:.0}%)\n",
            stats.total_input_tokens,
            stats.total_output_tokens,
            stats.total_cached_tokens,
            stats.total_prompt_ms,
            stats.total_predict_ms,
            stats.current_context_tokens,
            stats.context_window,
            stats.context_utilization() * 100.0
        );
    }

    fn print_contexts(&self) {
        match self.store.list() {
            Ok(contexts) if contexts.is_empty() => println!("No contexts.\n"),
            Ok(contexts) => {
                println!();
                for ctx in contexts {
                    let marker = if ctx.id == self.context_id { "*" } else { " " };
                    println!(
                        "{} {}  {}  {:>4} msgs  {}",
                        marker,
                        &ctx.id[..8],
                        ctx.updated_at,
                        ctx.message_count,
                        ctx.preview
                    );
                }
                println!();
            }
            Err(e) => eprintln!("Cannot list contexts: {}\n", e),
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn build_agent(
    base_config: &AgentConfig,
    context_id: &str,
    backend: &Arc<dyn LlmBackend>,
    tools: &Arc<ToolRegistry>,
    permissions: &Arc<PermissionManager>,
    subagents: &Arc<SubagentManager>,
    store: &Arc<ContextStore>,
    interrupt: &Arc<AtomicBool>,
) -> Result<AgentLoop> {
    let config = base_config
        .clone()
        .with_context(store.base(), context_id);

    let mut agent = AgentLoop::new(
        config,
        Arc::clone(backend),
        Arc::clone(tools),
        Arc::clone(permissions),
    )?;
    agent.set_interrupt(Arc::clone(interrupt));
    agent.set_subagents(Arc::clone(subagents) as Arc<dyn SubagentSpawner>);

    let persist_store = Arc::clone(store);
    let persist_id = context_id.to_string();
    agent.set_persistence(Arc::new(move |msg| {
        persist_store.append_message(&persist_id, msg)
    }));
    Ok(agent)
}

enum Command {
    Exit,
    Clear,
    List,
    Switch(String),
    Delete(String),
    Compact(Option<String>),
    Plan(String),
    Stats,
    Tools,
    Skills,
    Subagents,
    Help,
    Prompt(String),
    Nothing,
}

fn parse_command(input: &str) -> Command {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Command::Nothing;
    }
    if !trimmed.starts_with('/') {
        return Command::Prompt(trimmed.to_string());
    }

    let (cmd, arg) = match trimmed.split_once(' ') {
        Some((cmd, arg)) => (cmd, arg.trim()),
        None => (trimmed, ""),
    };

    match cmd.to_lowercase().as_str() {
        "/exit" | "/quit" => Command::Exit,
        "/clear" => Command::Clear,
        "/list" => Command::List,
        "/switch" => Command::Switch(arg.to_string()),
        "/delete" => Command::Delete(arg.to_string()),
        "/compact" => Command::Compact(if arg.is_empty() {
            None
        } else {
            Some(arg.to_string())
        }),
        "/plan" => Command::Plan(arg.to_string()),
        "/stats" => Command::Stats,
        "/tools" => Command::Tools,
        "/skills" => Command::Skills,
        "/subagents" => Command::Subagents,
        "/help" => Command::Help,
        other => {
            eprintln!("Unknown command: {}. Type /help for commands.", other);
            Command::Nothing
        }
    }
}

/// Resolve a context-id prefix to exactly one id.
fn match_prefix<'a>(
    contexts: &'a [ContextSummary],
    prefix: &str,
) -> std::result::Result<&'a ContextSummary, String> {
    if prefix.is_empty() {
        return Err("expected a context id prefix".to_string());
    }
    let matches: Vec<&ContextSummary> = contexts
        .iter()
        .filter(|c| c.id.starts_with(prefix))
        .collect();
    match matches.len() {
        0 => Err(format!("no context matches '{}'", prefix)),
        1 => Ok(matches[0]),
        n => Err(format!("prefix '{}' is ambiguous ({} matches)", prefix, n)),
    }
}

fn print_help() {
    println!(
        r#"
Commands:
  /exit, /quit         Leave
  /clear               Start a fresh context
  /list                List saved contexts
  /switch <prefix>     Switch to another context
  /delete <prefix>     Delete a context (not the current one)
  /compact [directive] Summarize and archive this conversation
  /plan <task>         Start or resume the planning workflow
  /stats               Token and timing counters
  /tools               Available tools
  /skills              Discovered skills
  /subagents           Available agents

Ctrl+C interrupts the current turn; press it twice to quit.
"#
    );
}

/// The interactive loop. Returns when the user exits.
pub async fn run_repl(mut session: Session) -> Result<()> {
    let config = Config::builder()
        .history_ignore_space(true)
        .history_ignore_dups(true)?
        .build();
    let mut editor: Editor<(), FileHistory> = Editor::with_config(config)?;
    if let Some(path) = &session.history_path {
        let _ = editor.load_history(path);
    }

    println!(
        "llama-agent · context {} · /help for commands\n",
        &session.context_id()[..8]
    );

    loop {
        match editor.readline("> ") {
            Ok(line) => {
                let _ = editor.add_history_entry(&line);
                match parse_command(&line) {
                    Command::Exit => break,
                    Command::Nothing => {}
                    Command::Help => print_help(),
                    Command::Prompt(text) => session.run_turn(&text).await,
                    Command::Clear => match session.store.create() {
                        Ok(context) => {
                            let id = context.id;
                            if let Err(e) = session.switch_context(id) {
                                eprintln!("Cannot clear: {}\n", e);
                            } else {
                                println!(
                                    "Started fresh context {}.\n",
                                    &session.context_id()[..8]
                                );
                            }
                        }
                        Err(e) => eprintln!("Cannot create context: {}\n", e),
                    },
                    Command::List => session.print_contexts(),
                    Command::Switch(prefix) => {
                        let contexts = session.store.list().unwrap_or_default();
                        match match_prefix(&contexts, &prefix) {
                            Ok(found) => {
                                let id = found.id.clone();
                                match session.switch_context(id) {
                                    Ok(()) => println!(
                                        "Switched to {}.\n",
                                        &session.context_id()[..8]
                                    ),
                                    Err(e) => eprintln!("{}\n", e),
                                }
                            }
                            Err(msg) => eprintln!("{}\n", msg),
                        }
                    }
                    Command::Delete(prefix) => {
                        let contexts = session.store.list().unwrap_or_default();
                        match match_prefix(&contexts, &prefix) {
                            Ok(found) if found.id == session.context_id() => {
                                eprintln!("Cannot delete the current context.\n");
                            }
                            Ok(found) => match session.store.delete(&found.id) {
                                Ok(()) => println!("Deleted {}.\n", &found.id[..8]),
                                Err(e) => eprintln!("{}\n", e),
                            },
                            Err(msg) => eprintln!("{}\n", msg),
                        }
                    }
                    Command::Compact(directive) => {
                        session.handle_compact(directive.as_deref()).await
                    }
                    Command::Plan(task) => session.handle_plan(&task).await,
                    Command::Stats => session.print_stats(),
                    Command::Tools => {
                        println!();
                        for def in session.tools.definitions() {
                            println!("  {:<14} {}", def.name, def.signature);
                        }
                        println!();
                    }
                    Command::Skills => {
                        if session.skills.is_empty() {
                            println!("No skills discovered.\n");
                        } else {
                            println!();
                            for skill in &session.skills {
                                println!("  {:<14} {}", skill.name, skill.description);
                            }
                            println!();
                        }
                    }
                    Command::Subagents => {
                        println!();
                        for def in session.agent_registry.list() {
                            println!("  {:<16} {}", def.name, def.description);
                        }
                        println!();
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                debug!("readline interrupted");
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("Input error: {}", e);
                break;
            }
        }
    }

    if let Some(path) = &session.history_path {
        let _ = editor.save_history(path);
    }
    Ok(())
}

/// Single-turn mode: one prompt, one answer, exit.
pub async fn run_single(mut session: Session, prompt: &str) -> Result<()> {
    session.run_turn(prompt).await;
    Ok(())
}
