//! Toolport — per-project tool servers behind a shared port router.
//!
//! Every instance serves one project on its own loopback port and records
//! itself in `~/.toolport-router.json`. Relays look a project up in that
//! table and speak JSON-RPC over plain HTTP to the matching instance.
//!
//! Usage:
//!   toolport serve --workspace /path/to/project     # Start an instance
//!   toolport list                                   # Show registered instances
//!   toolport resolve --workspace /path/to/project   # Print the port to call
//!   toolport ping --workspace /path/to/project      # Liveness check
//!   echo '{"jsonrpc":"2.0","id":1,"method":"tools/list"}' | toolport call --workspace .

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use toolport_registry::{AllocatorConfig, PortAllocator, RegistryStore};
use toolport_server::{
    EditorCliHost, HandoverPolicy, ListWorkspacesTool, SwitchStrategy, ToolServer, WorkspaceCoordinator,
};
use toolport_transport::{DuplexTransport, LogNotifier, RELAY_VERSION_HEADER, TransportConfig, VersionGateConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "toolport", version, about = "Per-project tool servers behind a shared port router")]
struct Cli {
    /// Path to the router table (defaults to $TOOLPORT_ROUTER_FILE or ~/.toolport-router.json)
    #[arg(long, global = true)]
    router_file: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long, global = true)]
    verbose: bool,

    /// Write logs to a file (defaults to ~/.toolport/logs/toolport.log if no path given)
    #[arg(long, global = true, default_missing_value = "DEFAULT", num_args = 0..=1)]
    log_file: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve tools for one project
    Serve(ServeArgs),
    /// List registered instances
    List,
    /// Print the port serving a project
    Resolve {
        #[arg(long)]
        workspace: Option<String>,
    },
    /// Check that the instance serving a project is alive
    Ping {
        #[arg(long)]
        workspace: Option<String>,
    },
    /// Send one JSON-RPC envelope from stdin and print the reply
    Call {
        #[arg(long)]
        workspace: Option<String>,
    },
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Project directory this instance serves
    #[arg(long)]
    workspace: PathBuf,

    /// Port to listen on (allocated from the router range if omitted)
    #[arg(long)]
    port: Option<u16>,

    /// Hostname to bind to
    #[arg(long, default_value = "127.0.0.1")]
    hostname: String,

    /// Editor launcher used to open projects
    #[arg(long, default_value = "code")]
    editor: String,

    /// Command run to ask another window to take over
    #[arg(long)]
    handover_command: Option<String>,

    /// Oldest relay version accepted without a warning
    #[arg(long, default_value = toolport_transport::gate::MIN_CALLER_VERSION)]
    min_caller_version: String,

    /// Strategies tried when a tool call targets another project
    #[arg(long, value_enum, default_value_t = StrategyArg::All)]
    switch_strategy: StrategyArg,

    /// Verification polls after a switch attempt
    #[arg(long, default_value = "5")]
    verification_retries: u32,

    /// Delay between verification polls
    #[arg(long, default_value = "3000")]
    verification_delay_ms: u64,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum StrategyArg {
    All,
    CurrentWindow,
    NewWindow,
    Handover,
}

impl StrategyArg {
    fn strategies(self) -> Vec<SwitchStrategy> {
        match self {
            Self::All => SwitchStrategy::ALL.to_vec(),
            Self::CurrentWindow => vec![SwitchStrategy::CurrentWindow],
            Self::NewWindow => vec![SwitchStrategy::NewWindow],
            Self::Handover => vec![SwitchStrategy::HandoverOnly],
        }
    }
}

fn init_tracing(verbose: bool, log_file: Option<&str>) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    if let Some(log_file_arg) = log_file {
        let log_path = if log_file_arg == "DEFAULT" {
            dirs::home_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join(".toolport/logs/toolport.log")
        } else {
            PathBuf::from(log_file_arg)
        };

        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating log directory {}", parent.display()))?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .with_context(|| format!("opening log file {}", log_path.display()))?;

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .init();

        eprintln!("Logging to {}", log_path.display());
    } else {
        // stdout carries command output; logs go to stderr.
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_file.as_deref())?;

    let store = cli
        .router_file
        .clone()
        .map(RegistryStore::new)
        .unwrap_or_else(RegistryStore::at_default_location);

    match cli.command {
        Command::Serve(args) => serve(args, store).await,
        Command::List => list(&store).await,
        Command::Resolve { workspace } => {
            println!("{}", store.resolve_port(workspace.as_deref()).await);
            Ok(())
        }
        Command::Ping { workspace } => ping(&store, workspace.as_deref()).await,
        Command::Call { workspace } => call(&store, workspace.as_deref()).await,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Instance
// ─────────────────────────────────────────────────────────────────────────────

async fn serve(args: ServeArgs, store: RegistryStore) -> Result<()> {
    let workspace = args.workspace.canonicalize().unwrap_or(args.workspace);
    let workspace = workspace.to_string_lossy().into_owned();

    let port = match args.port {
        Some(port) => port,
        None => PortAllocator::with_config(
            store.clone(),
            AllocatorConfig {
                hostname: args.hostname.clone(),
                ..AllocatorConfig::default()
            },
        )
        .find_available_port()
        .await
        .context("allocating a port")?,
    };

    let config = TransportConfig {
        port,
        hostname: args.hostname.clone(),
        workspace: Some(workspace.clone()),
        registry: Some(store.clone()),
        version_gate: VersionGateConfig {
            minimum: args.min_caller_version,
            ..VersionGateConfig::default()
        },
    };
    let mut transport = DuplexTransport::start_with_notifier(config, Arc::new(LogNotifier))
        .await
        .context("starting transport")?;

    let mut host = EditorCliHost::new(workspace.clone(), args.editor);
    if let Some(command) = args.handover_command {
        host = host.with_handover_command(command);
    }
    let policy = HandoverPolicy {
        strategies: args.switch_strategy.strategies(),
        verification_retries: args.verification_retries,
        verification_delay: Duration::from_millis(args.verification_delay_ms),
        ..HandoverPolicy::default()
    };
    let coordinator = Arc::new(WorkspaceCoordinator::with_policy(host, store.clone(), policy));

    let mut builder =
        ToolServer::builder(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")).workspace_gate(coordinator);
    builder.register_tool(ListWorkspacesTool::new(store.clone()))?;
    let server = builder.build(transport.outbound());
    transport.set_handler(Arc::new(server));

    if let Err(e) = store
        .register(&workspace, transport.port(), Some(std::process::id()))
        .await
    {
        transport.close().await;
        return Err(e).context("registering in router table");
    }

    info!("Serving {workspace} on port {}", transport.port());
    println!("────────────────────────────────────────────────────────────────");
    println!();
    println!("  Toolport running!");
    println!();
    println!("  Project:  {workspace}");
    println!("  Endpoint: http://{}:{}/", args.hostname, transport.port());
    println!("  Router:   {}", store.path().display());
    println!();
    println!("  Press Ctrl+C to stop.");
    println!();

    // Ctrl+C or stdin EOF (parent process gone).
    let shutdown_notify = Arc::new(tokio::sync::Notify::new());
    {
        let notify = shutdown_notify.clone();
        std::thread::spawn(move || {
            let mut buf = [0u8; 1];
            loop {
                match std::io::stdin().read(&mut buf) {
                    Ok(0) | Err(_) => {
                        notify.notify_one();
                        return;
                    }
                    Ok(_) => continue,
                }
            }
        });
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = shutdown_notify.notified() => {
            eprintln!("stdin closed (parent process gone), shutting down");
        }
    }

    println!("  Shutting down...");
    transport.close().await;
    println!("  Server stopped.");
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Relay side
// ─────────────────────────────────────────────────────────────────────────────

async fn list(store: &RegistryStore) -> Result<()> {
    let entries = store.list().await;
    println!("{}", serde_json::to_string_pretty(&entries)?);
    Ok(())
}

fn endpoint(port: u16, path: &str) -> String {
    format!("http://127.0.0.1:{port}{path}")
}

async fn resolve_target(store: &RegistryStore, workspace: Option<&str>) -> u16 {
    let port = store.resolve_port(workspace).await;
    if let Some(ws) = workspace {
        if store.port_for_workspace(ws).await.is_none() {
            warn!("No instance registered for {ws}; using default port {port}");
        }
    }
    port
}

async fn ping(store: &RegistryStore, workspace: Option<&str>) -> Result<()> {
    let port = resolve_target(store, workspace).await;
    let body: serde_json::Value = reqwest::get(endpoint(port, "/ping"))
        .await
        .with_context(|| format!("no instance answering on port {port}"))?
        .error_for_status()?
        .json()
        .await?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

async fn call(store: &RegistryStore, workspace: Option<&str>) -> Result<()> {
    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("reading envelope from stdin")?;
    let envelope: serde_json::Value = serde_json::from_str(&input).context("stdin is not valid JSON")?;

    let port = resolve_target(store, workspace).await;
    let response = reqwest::Client::new()
        .post(endpoint(port, "/"))
        .header(RELAY_VERSION_HEADER, env!("CARGO_PKG_VERSION"))
        .json(&envelope)
        .send()
        .await
        .with_context(|| format!("no instance answering on port {port}"))?;

    let status = response.status();
    let text = response.text().await?;
    if !status.is_success() {
        bail!("instance on port {port} returned {status}: {text}");
    }
    println!("{text}");
    Ok(())
}
