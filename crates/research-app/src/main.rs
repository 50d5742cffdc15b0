//! `research-engine`: a command-line front end that wires a chat/tool
//! client pair to one of the two orchestrators and drives a single
//! research session to completion, or resumes one from its event log.

mod demo;

use clap::{Parser, Subcommand, ValueEnum};
use research_core::config::{EngineConfig, LogFormat};
use research_core::error::ResearchError;
use research_core::llm::ChatClient;
use research_core::tool::{ToolExecutor, ToolResult};
use research_events::bus::EventBus;
use research_events::store::{EventStore, SqliteEventStore};
use research_orchestrator::{load_and_resume, DagOrchestrator, DagOrchestratorConfig, DiffusionOrchestrator};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "research-engine", about = "Autonomous deep-research engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a new research session and drive it to completion.
    Run {
        query: String,
        #[arg(long, value_enum, default_value_t = Mode::Diffusion)]
        mode: Mode,
        /// Override LLM_PROVIDER for this run (e.g. "openai", "anthropic").
        #[arg(long)]
        provider: Option<String>,
        /// Use canned in-memory chat/tool clients instead of a real provider.
        #[arg(long)]
        demo: bool,
        /// Print every committed event as it lands.
        #[arg(long, short)]
        verbose: bool,
    },
    /// Resume a previously interrupted session from its event log.
    Resume {
        session_id: String,
        /// Override LLM_PROVIDER for this run (e.g. "openai", "anthropic").
        #[arg(long)]
        provider: Option<String>,
        #[arg(long)]
        demo: bool,
        #[arg(long, short)]
        verbose: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    Diffusion,
    Dag,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Diffusion => write!(f, "diffusion"),
            Mode::Dag => write!(f, "dag"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), ResearchError> {
    dotenvy::dotenv().ok();
    let config = EngineConfig::from_env()?;
    init_logging(&config);

    let cli = Cli::parse();
    let store = SqliteEventStore::open(&config.event_store_path)?;
    let bus = EventBus::new();

    match cli.command {
        Command::Run { query, mode, provider, demo, verbose } => {
            let session_id = uuid::Uuid::new_v4().to_string();
            let config = apply_provider_override(config, provider);
            info!(session_id = %session_id, mode = %mode, provider = %config.llm_provider, demo, "starting research session");
            let (chat, tools) = build_clients(&config, demo, mode)?;
            let state = match mode {
                Mode::Diffusion => {
                    let orchestrator = DiffusionOrchestrator::new(chat, tools, supervisor_config(&config));
                    orchestrator.run(&session_id, &query, None, &store, &bus).await?
                }
                Mode::Dag => {
                    let orchestrator = DagOrchestrator::new(chat, tools, dag_config(&config));
                    orchestrator.run(&session_id, &query, None, &store, &bus).await?
                }
            };
            if verbose {
                print_events(&store, &session_id).await?;
            }
            print_report(&session_id, &state);
        }
        Command::Resume { session_id, provider, demo, verbose } => {
            let config = apply_provider_override(config, provider);
            info!(session_id = %session_id, provider = %config.llm_provider, demo, "resuming research session");
            // The recorded mode is only known once the event log is
            // loaded, so both orchestrators are built up front; only the
            // one matching the session's mode ever gets used.
            let (diffusion_chat, diffusion_tools) = build_clients(&config, demo, Mode::Diffusion)?;
            let (dag_chat, dag_tools) = build_clients(&config, demo, Mode::Dag)?;
            let diffusion = DiffusionOrchestrator::new(diffusion_chat, diffusion_tools, supervisor_config(&config));
            let dag = DagOrchestrator::new(dag_chat, dag_tools, dag_config(&config));

            let state = load_and_resume(&session_id, &diffusion, &dag, None, &store, &bus).await?;
            if verbose {
                print_events(&store, &session_id).await?;
            }
            print_report(&session_id, &state);
        }
    }

    Ok(())
}

fn init_logging(config: &EngineConfig) {
    let env_filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(env_filter).with_target(false);
    match config.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Compact => builder.compact().init(),
    }
}

fn supervisor_config(config: &EngineConfig) -> research_agents::SupervisorConfig {
    research_agents::SupervisorConfig {
        max_iterations: config.max_supervisor_iterations,
        max_concurrent_researchers: config.max_concurrent_researchers,
        max_sub_researcher_iterations: config.max_sub_researcher_iterations,
    }
}

fn dag_config(config: &EngineConfig) -> DagOrchestratorConfig {
    DagOrchestratorConfig {
        max_concurrent_researchers: config.max_concurrent_researchers,
        max_sub_researcher_iterations: config.max_sub_researcher_iterations,
    }
}

/// `--provider` on the command line wins over `LLM_PROVIDER` for this run.
fn apply_provider_override(mut config: EngineConfig, provider: Option<String>) -> EngineConfig {
    if let Some(provider) = provider {
        config.llm_provider = provider;
    }
    config
}

fn build_clients(
    config: &EngineConfig,
    demo: bool,
    mode: Mode,
) -> Result<(Arc<dyn ChatClient>, Arc<dyn ToolExecutor>), ResearchError> {
    if demo {
        return Ok(match mode {
            Mode::Diffusion => demo::diffusion_demo(),
            Mode::Dag => demo::dag_demo(),
        });
    }
    let chat = research_core::llm::client_from_provider(&config.llm_provider, &config.llm_model)?;
    Ok((chat, Arc::new(UnavailableToolExecutor)))
}

/// Stands in for a real web-search/document-fetch integration, which is
/// out of scope here. Every call fails with a message pointing at `--demo`.
struct UnavailableToolExecutor;

#[async_trait::async_trait]
impl ToolExecutor for UnavailableToolExecutor {
    async fn execute(&self, tool_name: &str, _args: &HashMap<String, serde_json::Value>) -> ToolResult {
        ToolResult::err(format!(
            "no tool backend configured for '{tool_name}'; pass --demo for a canned run"
        ))
    }

    fn tool_names(&self) -> Vec<String> {
        vec![]
    }
}

async fn print_events(store: &dyn EventStore, session_id: &str) -> Result<(), ResearchError> {
    for stored in store.load_events(session_id).await? {
        println!("[{:>4}] {:?}", stored.version, stored.event);
    }
    Ok(())
}

fn print_report(session_id: &str, state: &research_events::aggregate::ResearchState) {
    println!("session:  {session_id}");
    println!("status:   {:?}", state.status);
    println!("title:    {}", state.report_title);
    println!("summary:  {}", state.report_summary);
    println!();
    println!("{}", state.report_content);
    if !state.citations.is_empty() {
        println!();
        println!("citations:");
        for citation in &state.citations {
            println!("  [{}] {}", citation.id, citation.url);
        }
    }
}
