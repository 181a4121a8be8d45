//! remote-mcp: serve or query a Model Context Protocol catalog
//!
//! `serve` exposes the demonstration catalog over TCP, HTTP event streams
//! or stdio; `client` connects to a server and walks every catalog once.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{debug, error, info, Level};
use tracing_subscriber::EnvFilter;

use remote_mcp::config::{self, Config, TransportKind};
use remote_mcp::mcp::client::{ClientOptions, ClientSession};
use remote_mcp::mcp::engine::InvocationResult;
use remote_mcp::mcp::error::SessionError;
use remote_mcp::mcp::server::{McpServer, ServerOptions};
use remote_mcp::mcp::sse::{SseListener, SSE_PATH};
use remote_mcp::mcp::transport::Listener;
use remote_mcp::samples::sample_registry;

/// Model Context Protocol server and client.
///
/// Serves resources, tools and prompts to remote clients over a long-lived
/// connection, or connects to such a server and exercises its catalogs.
#[derive(Parser, Debug)]
#[command(name = "remote-mcp")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "CONFIG_FILE", global = true)]
    config: Option<PathBuf>,

    /// Increase logging verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Decrease logging verbosity (only show errors)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the demonstration catalog
    Serve {
        /// Address to listen on (overrides server.listen)
        #[arg(long, value_name = "ADDR")]
        listen: Option<String>,

        /// Serve a single session over stdin/stdout instead of the network
        #[arg(long, conflicts_with_all = ["listen", "sse"])]
        stdio: bool,

        /// Serve HTTP event streams (GET /sse, POST /messages) instead of TCP
        #[arg(long)]
        sse: bool,
    },

    /// Connect to a server and exercise every catalog
    Client {
        /// Server address or event-stream URL (overrides client.connect)
        #[arg(long, value_name = "ADDR")]
        connect: Option<String>,

        /// Connect through an HTTP event stream instead of TCP
        #[arg(long)]
        sse: bool,
    },
}

/// Determines the log level from CLI arguments.
#[allow(clippy::match_same_arms)] // Explicit "warn" arm for clarity
fn get_log_level(verbose: u8, quiet: bool, config_level: &str) -> Level {
    if quiet {
        return Level::ERROR;
    }

    match verbose {
        0 => match config_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::WARN, // Default to warn for unknown levels
        },
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Initialises the tracing subscriber for logging.
///
/// Logs go to stderr; stdout may carry protocol frames.
fn init_tracing(level: Level) {
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Entry point for remote-mcp.
fn main() -> ExitCode {
    let args = Args::parse();

    // Load configuration
    let config_path = args.config.as_deref();
    let cfg = match config::load_config(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            if config_path.is_none() {
                if let Some(default_path) = config::default_config_path() {
                    eprintln!("\nExpected config at: {}", default_path.display());
                }
            }
            return ExitCode::FAILURE;
        }
    };

    // Initialise logging
    let log_level = get_log_level(args.verbose, args.quiet, &cfg.logging.level);
    init_tracing(log_level);

    match config_path
        .map(Path::to_path_buf)
        .or_else(config::default_config_path)
        .filter(|path| path.exists())
    {
        Some(path) => debug!(path = %path.display(), "Loaded configuration"),
        None => debug!("No configuration file found, using defaults"),
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to create Tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    let result = match args.command {
        Command::Serve { listen, stdio, sse } => {
            let transport = if sse { TransportKind::Sse } else { cfg.server.transport };
            runtime.block_on(serve(&cfg, listen, stdio, transport))
        }
        Command::Client { connect, sse } => {
            let transport = if sse { TransportKind::Sse } else { cfg.client.transport };
            runtime.block_on(run_client(&cfg, connect, transport))
        }
    };

    // A stdio session may leave a blocking stdin read behind.
    runtime.shutdown_timeout(SHUTDOWN_GRACE);

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Exiting with error");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// How long background tasks get to finish once the command is done.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

async fn serve(
    cfg: &Config,
    listen: Option<String>,
    stdio: bool,
    transport: TransportKind,
) -> Result<(), BoxError> {
    let server = McpServer::new(sample_registry()?, ServerOptions::from_config(&cfg.server));

    info!(
        version = env!("CARGO_PKG_VERSION"),
        name = %cfg.server.name,
        "Starting remote-mcp server"
    );

    let addr = listen.unwrap_or_else(|| cfg.server.listen.clone());
    if stdio {
        server.run_stdio().await?;
    } else {
        match transport {
            TransportKind::Tcp => {
                let listener = Listener::bind(addr.as_str()).await?;
                eprintln!("Listening on {}", listener.local_addr()?);
                server.run(listener).await?;
            }
            TransportKind::Sse => {
                let listener = SseListener::bind(addr.as_str()).await?;
                eprintln!("Listening on http://{}{SSE_PATH}", listener.local_addr());
                server.run(listener).await?;
            }
        }
    }

    info!("Server shut down gracefully");
    Ok(())
}

async fn run_client(
    cfg: &Config,
    connect: Option<String>,
    transport: TransportKind,
) -> Result<(), BoxError> {
    let addr = connect.unwrap_or_else(|| cfg.client.connect.clone());
    info!(addr = %addr, "Connecting to MCP server");

    let options = ClientOptions::from_config(&cfg.client);
    let session = match transport {
        TransportKind::Tcp => ClientSession::connect(addr.as_str(), options).await?,
        TransportKind::Sse => ClientSession::connect_sse(&sse_url(&addr), options).await?,
    };
    let server = session.initialize().await?;
    info!(server = %server.server_info.name, "Connection initialized");

    let outcome = walk_catalogs(&session).await;
    session.close().await;
    outcome.map_err(Into::into)
}

/// Accepts either a full URL or a bare `host:port`.
fn sse_url(addr: &str) -> String {
    if addr.starts_with("http://") || addr.starts_with("https://") {
        addr.to_string()
    } else {
        format!("http://{addr}{SSE_PATH}")
    }
}

async fn walk_catalogs(session: &ClientSession) -> Result<(), SessionError> {
    println!("\nAvailable Resources:");
    for resource in session.list_resources().await? {
        println!("- {} ({})", resource.display_name, resource.key);
    }

    for uri in ["mcp://hello", "mcp://greeting/User"] {
        match session.read_resource(uri).await? {
            InvocationResult::Ok(result) => {
                println!("\n{uri}: {}", result.text().unwrap_or("<binary>"));
            }
            InvocationResult::Error(e) => println!("\n{uri}: error: {e}"),
        }
    }

    println!("\nAvailable Tools:");
    for tool in session.list_tools().await? {
        println!("- {}: {}", tool.descriptor.key, tool.descriptor.description);
    }

    let calls = [
        ("echo", json!({"text": "Hello, Server!"})),
        ("add", json!({"a": 5, "b": 3})),
    ];
    for (name, arguments) in calls {
        match session.call_tool(name, arguments).await? {
            InvocationResult::Ok(result) => {
                let text = result.content.first().and_then(|c| c.as_text()).unwrap_or("");
                println!("\n{name} result: {text}");
            }
            InvocationResult::Error(e) => println!("\n{name} error: {e}"),
        }
    }

    println!("\nAvailable Prompts:");
    for prompt in session.list_prompts().await? {
        println!("- {}: {}", prompt.key, prompt.description);
    }

    let arguments = json!({"name": "Developer", "role": "Software Engineer"});
    match session.get_prompt("introduction", arguments).await? {
        InvocationResult::Ok(result) => {
            println!("\nIntroduction Prompt:");
            for message in result.messages {
                println!("[{}] {}", message.role, message.content.as_text().unwrap_or(""));
            }
        }
        InvocationResult::Error(e) => println!("\nError getting prompt: {e}"),
    }

    Ok(())
}
