use clap::{Parser, Subcommand, ValueEnum};
use devmaster_agent::{AgentRegistry, LlmClient, LlmProvider, ModelConfig};
use devmaster_builtins::{
    chat_workflow, register_builtins, register_placeholder_stages, workflow_for_task,
    IntentClassifierAgent,
};
use devmaster_core::{InitialState, Role, StateContainer, TaskKind};
use devmaster_orchestrator::{
    EventSubscription, FileStateStore, OrchestrationGraph, Orchestrator, OrchestratorConfig,
    RunManager, RunOutcome, StateStore,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "devmaster", about = "DevMaster — Multi-Agent Orchestration Engine")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "devmaster.toml")]
    config: PathBuf,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Json)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Json,
    Pretty,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a request through a workflow
    Run {
        /// Request text
        #[arg(short, long)]
        request: String,
        /// Agent to start at (defaults to the workflow entry)
        #[arg(short, long)]
        entry: Option<String>,
        /// `chat`, `auto` (classify the request), or a task kind such as `debugging`
        #[arg(short, long, default_value = "auto")]
        workflow: String,
        /// Print run events as JSON lines while the run progresses
        #[arg(long)]
        watch: bool,
        /// Print the final state as JSON
        #[arg(long)]
        json: bool,
    },
    /// Continue a checkpointed run from the data directory
    Resume {
        run_id: Uuid,
        /// Workflow to resume under; `auto` reuses the run's task kind
        #[arg(short, long, default_value = "auto")]
        workflow: String,
        #[arg(long)]
        watch: bool,
        #[arg(long)]
        json: bool,
    },
    /// List checkpointed runs in the data directory
    Runs,
    /// List registered agents
    Agents,
}

#[derive(Debug, Deserialize)]
struct DevMasterConfig {
    #[serde(default)]
    orchestrator: OrchestratorConfig,
    #[serde(default)]
    model: ModelConfig,
    #[serde(default = "default_data_dir")]
    data_dir: PathBuf,
}

impl Default for DevMasterConfig {
    fn default() -> Self {
        Self {
            orchestrator: OrchestratorConfig::default(),
            model: ModelConfig::default(),
            data_dir: default_data_dir(),
        }
    }
}

impl DevMasterConfig {
    fn runs_dir(&self) -> PathBuf {
        self.data_dir.join("runs")
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match cli.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
    }

    // A missing .env is fine.
    let _ = dotenvy::dotenv();

    let mut config = load_config(&cli.config).await?;
    apply_env_api_key(&mut config.model, std::env::var("DEVMASTER_API_KEY").ok());
    config.orchestrator.validate()?;

    match cli.command {
        Commands::Run {
            request,
            entry,
            workflow,
            watch,
            json,
        } => {
            let kind = resolve_task_kind(&workflow, &request)?;
            let (registry, graph) = build_workflow(kind, &config.model)?;
            let entry = entry.unwrap_or_else(|| graph.entry().to_string());
            let manager = Arc::new(build_manager(&config, registry, graph).await?);

            info!(entry = %entry, task_kind = %kind, "Starting run");
            let (run_id, events) =
                manager.start_run_observed(&entry, InitialState::new(request));
            let outcome = drive(&manager, run_id, watch.then_some(events)).await?;
            print_outcome(&outcome, json)?;
        }
        Commands::Resume {
            run_id,
            workflow,
            watch,
            json,
        } => {
            let store = FileStateStore::new(config.runs_dir()).await?;
            let saved = store
                .load_state(run_id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("No checkpoint for run {run_id}"))?;
            let kind = if workflow == "auto" {
                saved.task_kind
            } else {
                resolve_task_kind(&workflow, &saved.user_request)?
            };
            let (registry, graph) = build_workflow(kind, &config.model)?;
            let manager = Arc::new(build_manager(&config, registry, graph).await?);

            let events = manager.resume_run_observed(run_id).await?;
            let outcome = drive(&manager, run_id, watch.then_some(events)).await?;
            print_outcome(&outcome, json)?;
        }
        Commands::Runs => {
            let store = FileStateStore::new(config.runs_dir()).await?;
            let ids = store.list_runs().await?;
            if ids.is_empty() {
                println!("No checkpointed runs in {}", config.runs_dir().display());
            }
            for id in ids {
                match store.load_state(id).await {
                    Ok(Some(state)) => println!(
                        "  {}  {:<9}  {:<22}  {}",
                        id,
                        state.status(),
                        state.task_kind,
                        state.active_agent
                    ),
                    Ok(None) => {}
                    Err(e) => warn!(run_id = %id, error = %e, "Unreadable checkpoint"),
                }
            }
        }
        Commands::Agents => {
            let mut registry = AgentRegistry::new();
            register_builtins(&mut registry, build_llm(&config.model)?)?;
            let mut agents = registry.descriptors();
            agents.sort_by(|a, b| a.name.cmp(&b.name));
            println!("Registered agents:");
            for agent in &agents {
                println!("  {} — {}", agent.name, agent.description);
            }
            println!("\nTotal: {} agent(s)", agents.len());
        }
    }

    Ok(())
}

async fn load_config(path: &Path) -> anyhow::Result<DevMasterConfig> {
    if !tokio::fs::try_exists(path).await? {
        warn!(path = %path.display(), "Config file not found, using defaults");
        return Ok(DevMasterConfig::default());
    }
    let config_str = tokio::fs::read_to_string(path).await.map_err(|e| {
        anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e)
    })?;
    Ok(toml::from_str(&config_str)?)
}

fn apply_env_api_key(model: &mut ModelConfig, env_key: Option<String>) {
    if model.api_key.is_empty() {
        if let Some(key) = env_key.filter(|k| !k.is_empty()) {
            model.api_key = key;
        }
    }
}

/// `None` for the mock provider, so the chat agent keeps its canned replies.
fn build_llm(model: &ModelConfig) -> anyhow::Result<Option<Arc<LlmClient>>> {
    if model.provider == LlmProvider::Mock {
        return Ok(None);
    }
    Ok(Some(Arc::new(LlmClient::new(model.clone())?)))
}

fn resolve_task_kind(workflow: &str, request: &str) -> anyhow::Result<TaskKind> {
    match workflow {
        "chat" => Ok(TaskKind::ConversationalChat),
        "auto" => Ok(IntentClassifierAgent::new()?.classify(request).task_kind),
        other => serde_json::from_value(serde_json::Value::String(other.to_string()))
            .map_err(|_| anyhow::anyhow!("Unknown workflow '{other}'")),
    }
}

fn build_workflow(
    kind: TaskKind,
    model: &ModelConfig,
) -> anyhow::Result<(AgentRegistry, OrchestrationGraph)> {
    let mut registry = AgentRegistry::new();
    register_builtins(&mut registry, build_llm(model)?)?;
    let graph = if kind == TaskKind::ConversationalChat {
        chat_workflow(&registry)?
    } else {
        let added = register_placeholder_stages(&mut registry, kind)?;
        if !added.is_empty() {
            info!(stages = ?added, "Using placeholder agents for unimplemented stages");
        }
        workflow_for_task(kind, &registry)?
    };
    Ok((registry, graph))
}

async fn build_manager(
    config: &DevMasterConfig,
    registry: AgentRegistry,
    graph: OrchestrationGraph,
) -> anyhow::Result<RunManager> {
    let store = FileStateStore::new(config.runs_dir()).await?;
    let orchestrator = Orchestrator::new(
        Arc::new(registry),
        graph,
        config.orchestrator.clone(),
    )
    .with_store(Arc::new(store));
    Ok(RunManager::new(orchestrator))
}

/// Wait for the run, streaming events when asked. Ctrl-C cancels the run
/// under the configured cancellation policy.
async fn drive(
    manager: &Arc<RunManager>,
    run_id: Uuid,
    events: Option<EventSubscription>,
) -> anyhow::Result<RunOutcome> {
    let interrupt = {
        let manager = Arc::clone(manager);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!(run_id = %run_id, "Interrupted, cancelling run");
                let _ = manager.cancel(run_id);
            }
        })
    };

    if let Some(mut events) = events {
        while let Some(event) = events.recv().await {
            println!("{}", serde_json::to_string(&event)?);
            if event.kind.is_terminal() {
                break;
            }
        }
        if events.dropped() > 0 {
            warn!(dropped = events.dropped(), "Some run events were not shown");
        }
    }

    let outcome = manager.wait(run_id).await;
    interrupt.abort();
    Ok(outcome?)
}

fn print_outcome(outcome: &RunOutcome, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&outcome.state)?);
        return Ok(());
    }
    print!("{}", render_summary(outcome));
    Ok(())
}

fn render_summary(outcome: &RunOutcome) -> String {
    let state: &StateContainer = &outcome.state;
    let mut out = format!(
        "Run {}: {} after {} step(s)\n",
        state.run_id,
        outcome.status(),
        outcome.steps
    );
    if let Some(error) = &outcome.error {
        out.push_str(&format!("Error: {error}\n"));
    }
    for message in state.messages.iter().filter(|m| m.role != Role::User) {
        let author = message.agent_name.as_deref().unwrap_or("system");
        out.push_str(&format!("[{author}] {}\n", message.content));
    }
    if !state.artifacts.is_empty() {
        let keys: Vec<&str> = state.artifacts.keys().map(String::as_str).collect();
        out.push_str(&format!("Artifacts: {}\n", keys.join(", ")));
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use devmaster_core::{RunStatus, END};
    use devmaster_orchestrator::CancellationPolicy;
    use std::io::Write;

    #[tokio::test]
    async fn test_config_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
data_dir = "/tmp/devmaster-runs"

[orchestrator]
step_budget = 12
cancellation = "abandon"

[orchestrator.fallbacks]
execution = "HumanIntervention"

[model]
provider = "claude"
model_id = "claude-sonnet-4"
"#
        )
        .unwrap();

        let config = load_config(file.path()).await.unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/devmaster-runs"));
        assert_eq!(config.orchestrator.step_budget, 12);
        assert_eq!(config.orchestrator.error_budget, 3);
        assert_eq!(config.orchestrator.cancellation, CancellationPolicy::Abandon);
        assert_eq!(
            config.orchestrator.fallbacks.execution.as_deref(),
            Some("HumanIntervention")
        );
        assert_eq!(config.model.provider, LlmProvider::Claude);
        assert!(config.model.api_key.is_empty());
    }

    #[test]
    fn test_bundled_sample_config_is_valid() {
        let config: DevMasterConfig =
            toml::from_str(include_str!("../../../devmaster.toml")).unwrap();
        config.orchestrator.validate().unwrap();
        assert_eq!(
            config.orchestrator.fallbacks.timeout.as_deref(),
            Some("HumanIntervention")
        );
        assert_eq!(config.model.provider, LlmProvider::Mock);
    }

    #[tokio::test]
    async fn test_missing_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).await.unwrap();
        assert_eq!(config.data_dir, default_data_dir());
        assert_eq!(config.orchestrator.step_budget, 50);
        assert_eq!(config.model.provider, LlmProvider::Mock);
    }

    #[test]
    fn test_env_api_key_only_fills_blank() {
        let mut model = ModelConfig::default();
        apply_env_api_key(&mut model, Some("from-env".into()));
        assert_eq!(model.api_key, "from-env");

        apply_env_api_key(&mut model, Some("other".into()));
        assert_eq!(model.api_key, "from-env");
    }

    #[test]
    fn test_resolve_task_kind() {
        assert_eq!(
            resolve_task_kind("chat", "deploy it").unwrap(),
            TaskKind::ConversationalChat
        );
        assert_eq!(
            resolve_task_kind("debugging", "").unwrap(),
            TaskKind::Debugging
        );
        assert_eq!(
            resolve_task_kind("auto", "please deploy to production").unwrap(),
            TaskKind::Deployment
        );
        assert!(resolve_task_kind("astrology", "").is_err());
    }

    #[tokio::test]
    async fn test_run_through_manager_with_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let config = DevMasterConfig {
            data_dir: dir.path().to_path_buf(),
            ..DevMasterConfig::default()
        };
        let (registry, graph) = build_workflow(TaskKind::Testing, &config.model).unwrap();
        let entry = graph.entry().to_string();
        let manager = Arc::new(build_manager(&config, registry, graph).await.unwrap());

        let (run_id, events) = manager.start_run_observed(&entry, InitialState::new("add tests"));
        let outcome = drive(&manager, run_id, Some(events)).await.unwrap();

        assert_eq!(outcome.status(), RunStatus::Completed);
        assert_eq!(outcome.state.active_agent, END);
        assert!(outcome.state.artifacts.contains_key("TestingAgent"));
        let summary = render_summary(&outcome);
        assert!(summary.contains("completed after 2 step(s)"));

        let store = FileStateStore::new(dir.path().join("runs")).await.unwrap();
        assert_eq!(store.list_runs().await.unwrap(), vec![run_id]);
    }
}
