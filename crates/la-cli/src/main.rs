use std::io::Read;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use la_agents::{AgentRegistry, SpawnAgentTool, SubagentManager};
use la_backend::LlamaServerBackend;
use la_core::{AgentConfig, LlmBackend, PermissionManager, ToolRegistry, MAX_ITERATIONS_LIMIT};
use la_store::ContextStore;

mod compaction;
mod interact;
mod qa;
mod repl;
mod skills;

use interact::TerminalPrompter;
use repl::Session;

/// Log level for tracing output
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Parser)]
#[command(name = "llama-agent")]
#[command(author, version, about = "An interactive tool-using agent over llama-server", long_about = None)]
pub struct Cli {
    /// Prompt to run in single-turn mode
    #[arg(short = 'p', long)]
    pub prompt: Option<String>,

    /// Skip all permission prompts
    #[arg(long)]
    pub yolo: bool,

    /// Disable skill discovery
    #[arg(long)]
    pub no_skills: bool,

    /// Extra skills directory (repeatable)
    #[arg(long = "skills-path")]
    pub skills_path: Vec<PathBuf>,

    /// Maximum agent-loop iterations per turn (1-1000)
    #[arg(long = "max-iterations", alias = "mi", default_value_t = 50)]
    pub max_iterations: u32,

    /// Data directory (default: <working-dir>/.llama-agent)
    #[arg(long = "data-dir", alias = "dd")]
    pub data_dir: Option<PathBuf>,

    /// Working directory (must exist)
    #[arg(short = 'C', long = "working-dir")]
    pub working_dir: Option<PathBuf>,

    /// llama-server base URL
    #[arg(long, env = "LLAMA_SERVER_URL", default_value = "http://127.0.0.1:8080")]
    pub server_url: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, value_enum, default_value = "warn")]
    pub log_level: LogLevel,
}

/// `${APPDATA}/llama-agent` on Windows, `${HOME}/.llama-agent` elsewhere.
fn config_dir() -> Option<PathBuf> {
    if cfg!(windows) {
        std::env::var_os("APPDATA").map(|base| PathBuf::from(base).join("llama-agent"))
    } else {
        dirs::home_dir().map(|home| home.join(".llama-agent"))
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("llama_agent={0},la_core={0},la_store={0},la_agents={0},la_tools={0},la_backend={0},la_plan={0},la_cli={0}", cli.log_level.as_filter()))
        }))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    // Startup validation is fatal; everything after this prints and continues.
    let working_dir = match &cli.working_dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("cannot determine working directory")?,
    };
    if !working_dir.is_dir() {
        bail!(
            "working directory does not exist or is not a directory: {}",
            working_dir.display()
        );
    }
    let working_dir = working_dir
        .canonicalize()
        .context("cannot canonicalize working directory")?;

    let data_dir = cli
        .data_dir
        .clone()
        .unwrap_or_else(|| working_dir.join(".llama-agent"));
    let config_dir = config_dir();

    let max_iterations = cli.max_iterations.clamp(1, MAX_ITERATIONS_LIMIT);

    // Shared interrupt flag: one Ctrl+C cancels the turn, a second one
    // while still cancelling aborts the process.
    let interrupt = Arc::new(AtomicBool::new(false));
    {
        let interrupt = Arc::clone(&interrupt);
        tokio::spawn(async move {
            loop {
                if tokio::signal::ctrl_c().await.is_err() {
                    return;
                }
                if interrupt.swap(true, Ordering::SeqCst) {
                    std::process::exit(130);
                }
            }
        });
    }

    // Tool catalog: built-ins plus spawn_agent. Immutable from here on.
    let mut tools = ToolRegistry::new();
    la_tools::register_builtin(&mut tools);
    tools.register(Arc::new(SpawnAgentTool));
    let tools = Arc::new(tools);

    // Agent definitions: embedded, then user-global, then project-local.
    let mut agent_registry = AgentRegistry::with_embedded();
    let mut agent_paths = Vec::new();
    if let Some(config) = &config_dir {
        agent_paths.push(config.join("agents"));
    }
    agent_paths.push(data_dir.join("agents"));
    agent_registry
        .discover(&agent_paths)
        .context("agent discovery failed")?;
    let agent_registry = Arc::new(agent_registry);

    // Skills.
    let skills = if cli.no_skills {
        Vec::new()
    } else {
        let mut skill_paths = Vec::new();
        if let Some(config) = &config_dir {
            skill_paths.push(config.join("skills"));
        }
        skill_paths.extend(cli.skills_path.iter().cloned());
        skills::discover_skills(&skill_paths)
    };

    let backend = LlamaServerBackend::new().with_base_url(&cli.server_url);
    backend.probe_context_window().await;
    let backend: Arc<dyn LlmBackend> = Arc::new(backend);

    let permissions = Arc::new(PermissionManager::new(
        cli.yolo,
        Some(Arc::new(TerminalPrompter)),
    ));

    let store = Arc::new(ContextStore::new(&data_dir));

    let subagents = Arc::new(SubagentManager::new(
        Arc::clone(&backend),
        Arc::clone(&tools),
        Arc::clone(&permissions),
        Arc::clone(&agent_registry),
        working_dir.clone(),
        Some(data_dir.clone()),
    ));

    let mut base_config = AgentConfig::new(working_dir)
        .with_max_iterations(max_iterations)
        .with_yolo_mode(cli.yolo)
        .with_agents_section(agent_registry.prompt_section());
    if let Some(section) = skills::skills_section(&skills) {
        base_config = base_config.with_skills_section(section);
    }

    let session = Session::new(
        Arc::clone(&backend),
        tools,
        permissions,
        agent_registry,
        subagents,
        store,
        interrupt,
        skills,
        base_config,
        config_dir.map(|dir| dir.join("history")),
    )
    .context("cannot start session")?;

    // Explicit -p wins; otherwise piped stdin is the single-turn prompt.
    if let Some(prompt) = &cli.prompt {
        return repl::run_single(session, prompt).await;
    }
    if !atty::is(atty::Stream::Stdin) {
        let mut piped = String::new();
        std::io::stdin()
            .read_to_string(&mut piped)
            .context("cannot read piped stdin")?;
        let piped = piped.trim();
        if !piped.is_empty() {
            return repl::run_single(session, piped).await;
        }
        bail!("no prompt: stdin was piped but empty");
    }

    repl::run_repl(session).await
}
