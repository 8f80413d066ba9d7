//! stack-loadtest: drive synthetic load at a deployed stack.

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use stack_loadtest::backend::BackendKind;
use stack_loadtest::capability::Capabilities;
use stack_loadtest::config::{parse_duration, RunConfig};
use stack_loadtest::engine::{handle_ctrl_c, LiveGeneratorFactory, Orchestrator};
use stack_loadtest::registry::EndpointRegistry;
use stack_loadtest::report::write_report;

/// Concurrent load generator for PostgreSQL, Redis, Lambda and HTTP backends
#[derive(Parser)]
#[command(name = "stack-loadtest")]
#[command(about = "Drive concurrent synthetic load at a deployed stack", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a load test against the endpoints in a manifest
    Run(RunArgs),

    /// Show which endpoints a manifest exposes and which drivers are built in
    Inspect {
        /// Path to the deployed-resource manifest (flat JSON object)
        #[arg(long, env = "STACK_LOADTEST_MANIFEST", default_value = "outputs.json")]
        manifest: PathBuf,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Path to the deployed-resource manifest (flat JSON object)
    #[arg(long, env = "STACK_LOADTEST_MANIFEST", default_value = "outputs.json")]
    manifest: PathBuf,

    /// Optional TOML file with run settings; flags override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Total run duration (e.g. 30m, 90s, 1h)
    #[arg(long, value_parser = duration_arg)]
    duration: Option<Duration>,

    #[arg(long)]
    sql_intensity: Option<u32>,

    #[arg(long)]
    cache_intensity: Option<u32>,

    #[arg(long)]
    function_intensity: Option<u32>,

    #[arg(long)]
    http_intensity: Option<u32>,

    /// How long each backend gets to stop after cancellation
    #[arg(long, value_parser = duration_arg)]
    grace: Option<Duration>,

    /// Interval between progress log lines
    #[arg(long, value_parser = duration_arg)]
    progress_interval: Option<Duration>,

    /// Skip a backend entirely (repeatable): sql, cache, function, http
    #[arg(long = "disable", value_name = "BACKEND")]
    disable: Vec<BackendKind>,

    /// Write a JSON report to this path
    #[arg(long)]
    report: Option<PathBuf>,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,
}

fn duration_arg(value: &str) -> Result<Duration, String> {
    parse_duration(value).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => execute_run(args).await,
        Commands::Inspect { manifest } => {
            execute_inspect(&manifest);
            Ok(())
        }
    }
}

/// Logs go to stderr so the summary on stdout stays clean.
fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stack_loadtest=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn execute_run(args: RunArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => {
            eprintln!("Loading config from: {}", path.display());
            RunConfig::load(path)
                .map_err(|e| anyhow::anyhow!("Failed to load config '{}': {}", path.display(), e))?
        }
        None => RunConfig::default(),
    };
    apply_overrides(&mut config, &args);
    config.validate()?;

    if args.no_color || !std::io::stdout().is_terminal() {
        colored::control::set_override(false);
    }

    let factory = Arc::new(LiveGeneratorFactory::new(capabilities_for(&args.disable)));
    let mut orchestrator = Orchestrator::new(&args.manifest, config, factory);

    let ctrl_c = tokio::spawn(handle_ctrl_c(orchestrator.cancel_token()));
    let report = orchestrator.run().await;
    ctrl_c.abort();

    if let Some(path) = &args.report {
        match write_report(&report, path) {
            Ok(()) => {
                eprintln!();
                eprintln!("Report written to: {}", path.display());
            }
            Err(e) => {
                eprintln!();
                eprintln!("Warning: Failed to write report: {}", e);
                // Non-fatal -- the run still completed
            }
        }
    }

    Ok(())
}

/// Apply CLI flag overrides on top of file/default values.
fn apply_overrides(config: &mut RunConfig, args: &RunArgs) {
    if let Some(d) = args.duration {
        config.duration = d;
    }
    if let Some(v) = args.sql_intensity {
        config.sql_intensity = v;
    }
    if let Some(v) = args.cache_intensity {
        config.cache_intensity = v;
    }
    if let Some(v) = args.function_intensity {
        config.function_intensity = v;
    }
    if let Some(v) = args.http_intensity {
        config.http_intensity = v;
    }
    if let Some(g) = args.grace {
        config.shutdown_grace = g;
    }
    if let Some(p) = args.progress_interval {
        config.progress_interval = p;
    }
}

fn execute_inspect(manifest: &Path) {
    let registry = EndpointRegistry::load(manifest);
    println!("{}", render_inspect(manifest, &registry, Capabilities::probe()));
}

/// Compiled-in capabilities minus every `--disable`d backend.
fn capabilities_for(disabled: &[BackendKind]) -> Capabilities {
    disabled
        .iter()
        .fold(Capabilities::probe(), |caps, kind| caps.without(*kind))
}

fn render_inspect(manifest: &Path, registry: &EndpointRegistry, caps: Capabilities) -> String {
    let show = |v: Option<&str>| v.unwrap_or("-").to_string();
    let mut lines = vec![
        format!("manifest: {} ({} keys)", manifest.display(), registry.len()),
        format!("region:   {}", show(registry.region())),
        String::new(),
    ];
    for kind in BackendKind::ALL {
        let target = match kind {
            BackendKind::Sql => format!(
                "{}:{} db={} secret={}",
                show(registry.database_endpoint()),
                show(registry.database_port()),
                show(registry.database_name()),
                show(registry.database_secret_ref()),
            ),
            BackendKind::Cache => format!(
                "{}:{}",
                show(registry.cache_endpoint()),
                show(registry.cache_port()),
            ),
            BackendKind::Function => {
                let functions: Vec<String> = registry.function_names().into_iter().collect();
                if functions.is_empty() {
                    "-".to_string()
                } else {
                    functions.join(", ")
                }
            }
            BackendKind::Http => registry
                .http_host()
                .map(stack_loadtest::backend::http::target_url)
                .unwrap_or_else(|| "-".to_string()),
        };
        lines.push(format!(
            "{:<8} [{}] {target}",
            kind.as_str(),
            mark(caps.supports(kind))
        ));
    }
    lines.join("\n")
}

fn mark(available: bool) -> &'static str {
    if available {
        "built-in"
    } else {
        "missing"
    }
}
