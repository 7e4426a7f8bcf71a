//! TaskWing MCP server
//!
//! Serves the task tools over stdio and, with `--watch`, runs the continuous analysis engine in
//! the same process.
//!
//! ## Usage
//!
//! Add to your MCP client configuration:
//! ```json
//! {
//!   "mcpServers": {
//!     "taskwing": {
//!       "command": "taskwing-mcp",
//!       "args": ["--root", "/path/to/project"]
//!     }
//!   }
//! }
//! ```
//!
//! Exit codes: 0 when stdin closes, 1 when startup fails, 2 when the client breaks the protocol.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use log::{error, info, warn};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use taskwing_engine::{Config, EngineServices};
use taskwing_mcp::{LogHooks, McpServer, ServeOutcome, ServerFacts, ToolContext, ToolHooks};

const EXIT_INIT_FAILURE: u8 = 1;
const EXIT_PROTOCOL_ERROR: u8 = 2;

#[derive(Debug, Parser)]
#[command(name = "taskwing-mcp", version, about = "TaskWing task tools over stdio JSON-RPC")]
struct Cli {
    /// Project root (defaults to the current directory)
    #[arg(long, value_name = "DIR")]
    root: Option<PathBuf>,

    /// Also watch the project and run analysis agents on changes
    #[arg(long)]
    watch: bool,

    /// Log at debug level on stderr
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // stdout carries the protocol; logs go to stderr only
    let default_filter = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .target(env_logger::Target::Stderr)
        .init();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            error!("failed to start runtime: {err}");
            return ExitCode::from(EXIT_INIT_FAILURE);
        }
    };
    match runtime.block_on(run(cli)) {
        Ok(ServeOutcome::Eof) => ExitCode::SUCCESS,
        Ok(ServeOutcome::ProtocolViolation(envelope)) => {
            error!("protocol error: {}", envelope.message);
            ExitCode::from(EXIT_PROTOCOL_ERROR)
        }
        Err(err) => {
            error!("{err:#}");
            ExitCode::from(EXIT_INIT_FAILURE)
        }
    }
}

async fn run(cli: Cli) -> Result<ServeOutcome> {
    let root = match cli.root {
        Some(root) => root,
        None => std::env::current_dir().context("failed to read current directory")?,
    };
    let root = root
        .canonicalize()
        .with_context(|| format!("project root {} is not accessible", root.display()))?;

    let config = Config::load(&root).context("failed to load configuration")?;
    let services = EngineServices::open(&root, config).context("failed to open engine services")?;
    let ctx = ToolContext::open(&root).context("failed to open task store")?;

    let watch = if cli.watch {
        // No model client is bundled; agent runs report ModelUnavailable until one is injected.
        warn!("watching without a model client; agent runs will fail with ModelUnavailable");
        Some(services.start_watch(None).context("failed to start watcher")?)
    } else {
        None
    };

    let facts = ServerFacts {
        project: services
            .config
            .project
            .name
            .clone()
            .or_else(|| root.file_name().map(|name| name.to_string_lossy().into_owned()))
            .unwrap_or_default(),
        watching: watch.is_some(),
        started_at: Utc::now(),
        config: services.config.effective_json(),
    };
    let hooks = Arc::new(LogHooks::new(Some(services.activity.clone())));
    let server = McpServer::new(ctx, hooks as Arc<dyn ToolHooks>).with_facts(facts);

    info!("serving {} over stdio", root.display());
    let outcome = server
        .serve(tokio::io::stdin(), tokio::io::stdout())
        .await
        .context("stdio failed")?;

    if let Some(engine) = watch {
        let reports = engine.stop().await;
        info!("watch engine stopped after {} pending run(s)", reports.len());
    }
    services.activity.flush().await;
    Ok(outcome)
}
