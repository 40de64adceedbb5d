use std::ffi::OsString;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::error::ErrorKind;
use clap::Parser;
use serde_json::json;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use sleuth_agent::{DeepResearcher, ResearchContext, ResearchOutcome};
use sleuth_core::config::{default_config_paths, AppConfig, McpServerConfig, Provider};
use sleuth_core::error::SleuthError;
use sleuth_core::event::EventBus;
use sleuth_core::traits::ToolProvider;
use sleuth_core::types::ResearchEvent;
use sleuth_mcp::McpToolProvider;
use sleuth_tools::{ToolCatalog, WebSearchTool};

/// Documents served to researchers when no MCP server is configured.
const DEFAULT_FILES_DIR: &str = "files";

#[derive(Parser)]
#[command(name = "sleuth", version, about = "Multi-agent deep research from the command line")]
struct Cli {
    /// Research query (read from stdin when omitted and stdin is piped)
    #[arg(short, long)]
    query: Option<String>,

    /// Model provider: groq, openai, anthropic, gemini, mistral, aiml
    #[arg(short, long, env = "SLEUTH_PROVIDER")]
    provider: Option<Provider>,

    /// Model id (defaults to the provider's default model)
    #[arg(short, long, env = "SLEUTH_MODEL")]
    model: Option<String>,

    /// Path to config file (default: ./sleuth.toml, then ~/.sleuth/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

/// A failed run: the error plus the process exit code it maps to.
struct Failure {
    code: i32,
    error: anyhow::Error,
}

impl Failure {
    fn missing_query() -> Self {
        Self {
            code: 2,
            error: anyhow!("no query given; pass --query or pipe it on stdin"),
        }
    }
}

impl From<anyhow::Error> for Failure {
    fn from(error: anyhow::Error) -> Self {
        let code = match error.downcast_ref::<SleuthError>() {
            Some(SleuthError::CredentialMissing(_)) => 3,
            _ => 1,
        };
        Self { code, error }
    }
}

impl From<SleuthError> for Failure {
    fn from(error: SleuthError) -> Self {
        anyhow::Error::from(error).into()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries only the result line
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sleuth=info,warn")),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let result = match parse_cli(std::env::args_os()) {
        Ok(cli) => run(cli).await,
        Err(failure) => Err(failure),
    };

    let (line, code) = match result {
        Ok(outcome) => (success_line(&outcome)?, 0),
        Err(failure) => {
            warn!(error = %failure.error, code = failure.code, "Research failed");
            (failure_line(&failure), failure.code)
        }
    };
    println!("{}", line);
    std::process::exit(code);
}

/// Help and version requests print and exit as usual; any other usage
/// error becomes a failure line.
fn parse_cli<I, T>(args: I) -> Result<Cli, Failure>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    Cli::try_parse_from(args).map_err(|e| match e.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => e.exit(),
        _ => Failure {
            code: 1,
            error: anyhow::Error::new(e),
        },
    })
}

async fn run(cli: Cli) -> Result<ResearchOutcome, Failure> {
    let query = resolve_query(cli.query)?;

    let mut config = load_config(cli.config.as_deref())?;
    apply_overrides(&mut config, cli.provider, cli.model);
    config.research.validate()?;
    config.preflight()?;
    info!(model = %config.model.model_string(), "Configuration ready");

    let tools = build_catalog(&config);
    let events = Arc::new(EventBus::default());
    tokio::spawn(log_events(events.subscribe()));

    let ctx = ResearchContext::from_config(config, tools, events);
    let researcher = DeepResearcher::new(Arc::new(ctx))?;
    Ok(researcher.research(&query).await?)
}

fn resolve_query(flag: Option<String>) -> Result<String, Failure> {
    let query = match flag {
        Some(q) => q,
        None if !io::stdin().is_terminal() => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .context("reading query from stdin")?;
            buf
        }
        None => String::new(),
    };
    let query = query.trim().to_string();
    if query.is_empty() {
        return Err(Failure::missing_query());
    }
    Ok(query)
}

/// Explicit path, else the first default location that exists, else a
/// config built from flags and environment.
fn load_config(explicit: Option<&Path>) -> anyhow::Result<AppConfig> {
    if let Some(path) = explicit {
        return AppConfig::load(path).with_context(|| format!("loading {}", path.display()));
    }
    for path in default_config_paths() {
        if path.exists() {
            debug!(path = %path.display(), "Using config file");
            return AppConfig::load(&path).with_context(|| format!("loading {}", path.display()));
        }
    }
    let provider = Provider::default();
    Ok(AppConfig::for_model(provider, provider.default_model()))
}

/// Flags win over the file. A provider given without a model switches to
/// that provider's default model.
fn apply_overrides(config: &mut AppConfig, provider: Option<Provider>, model: Option<String>) {
    if let Some(provider) = provider {
        if provider != config.model.provider {
            config.model.provider = provider;
            config.model.api_key = None;
            config.model.base_url = None;
            config.model.model_id = provider.default_model().to_string();
        }
    }
    if let Some(model) = model {
        config.model.model_id = model;
    }
}

fn build_catalog(config: &AppConfig) -> ToolCatalog {
    let mut catalog = ToolCatalog::new(config.research.allowed_tools.clone());

    if config.search.enabled {
        if let Some(key) = config.search.api_key.as_deref() {
            catalog.register(WebSearchTool::new(key, config.search.max_results));
        }
    }

    let provider: Option<Arc<dyn ToolProvider>> = sleuth_mcp::provider_from_config(config.mcp.as_ref())
        .or_else(|| {
            Path::new(DEFAULT_FILES_DIR).is_dir().then(|| {
                Arc::new(McpToolProvider::new(
                    "filesystem",
                    McpServerConfig::filesystem(format!("./{}", DEFAULT_FILES_DIR)),
                )) as Arc<dyn ToolProvider>
            })
        });
    match provider {
        Some(provider) => {
            info!(backend = provider.name(), "Tool backend configured");
            catalog.with_provider(provider)
        }
        None => catalog,
    }
}

fn success_line(outcome: &ResearchOutcome) -> anyhow::Result<String> {
    let mut value = serde_json::to_value(outcome)?;
    value["success"] = json!(true);
    Ok(value.to_string())
}

fn failure_line(failure: &Failure) -> String {
    json!({"success": false, "error": format!("{:#}", failure.error)}).to_string()
}

async fn log_events(mut rx: tokio::sync::broadcast::Receiver<ResearchEvent>) {
    use tokio::sync::broadcast::error::RecvError;
    loop {
        match rx.recv().await {
            Ok(ResearchEvent::RoundComplete { round, notes }) => {
                info!(round, notes, "Delegation round joined");
            }
            Ok(ResearchEvent::ToolInvoked { name, is_error }) => {
                debug!(tool = %name, is_error, "Tool invoked");
            }
            Ok(event) => debug!(?event, "Workflow event"),
            Err(RecvError::Lagged(n)) => debug!(skipped = n, "Event log lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}
