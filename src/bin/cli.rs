//! ClawLink CLI
//!
//! Command-line access to an agent gateway: status checks, raw requests,
//! streaming, event watching and configuration management.

use clap::{Parser, Subcommand};
use console::style;
use clawlink::config::{
    config_path, load_config, load_config_from_path, read_config_snapshot, save_config,
    validate_config, Config,
};
use clawlink::gateway::{event_names, StreamCallbacks};
use clawlink::{Error, GatewayClient, Result, VERSION};
use serde_json::Value;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Parser)]
#[command(
    name = "clawlink",
    author = "ClawLink Contributors",
    version = VERSION,
    about = "ClawLink - agent gateway client",
    long_about = None
)]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(long = "config", short = 'c', global = true, env = "CLAWLINK_CONFIG")]
    config_file: Option<PathBuf>,

    /// Gateway URL override
    #[arg(long, global = true)]
    url: Option<String>,

    /// Request timeout in milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show gateway status
    Status,

    /// Send a request and print the reply
    Request {
        /// Message type, e.g. `sessions.list`
        kind: String,
        /// JSON payload
        payload: Option<String>,
    },

    /// Send a fire-and-forget event
    Emit {
        /// Event type
        kind: String,
        /// JSON payload
        payload: Option<String>,
    },

    /// Open a stream and print chunks as they arrive
    Stream {
        /// Stream type, e.g. `agent.stream`
        kind: String,
        /// JSON payload
        payload: Option<String>,
    },

    /// List installed skills
    Skills,

    /// List agent sessions
    Sessions,

    /// Print events until interrupted
    Watch {
        /// Event types to watch (connection events are always shown)
        events: Vec<String>,
    },

    /// Inspect or manage the configuration file
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Print the config file path
    Path,
    /// Validate the configuration
    Validate,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long, short)]
        force: bool,
    },
}

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(
                "clawlink=info"
                    .parse()
                    .unwrap_or_else(|_| tracing_subscriber::filter::LevelFilter::INFO.into()),
            ),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("{} {}", style("✗").red(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let resolved = resolve_config(&cli);
    // `config` must work on a file that no longer parses
    let config = match cli.command {
        Commands::Config { action } => return manage_config(action, &cli.config_file, resolved),
        _ => resolved?,
    };

    match cli.command {
        Commands::Config { .. } => Ok(()),
        Commands::Status => show_status(config).await,
        Commands::Request { kind, payload } => {
            let payload = parse_payload(payload.as_deref())?;
            let client = connect(config).await?;
            let reply = client.request(&kind, payload).await?;
            print_json(&reply)
        }
        Commands::Emit { kind, payload } => {
            let payload = parse_payload(payload.as_deref())?;
            let client = connect(config).await?;
            client.emit_event(&kind, payload).await?;
            println!("{} Sent {}", style("✓").green(), style(&kind).cyan());
            // Let the writer flush before the runtime shuts down
            client.disconnect().await;
            Ok(())
        }
        Commands::Stream { kind, payload } => {
            let payload = parse_payload(payload.as_deref())?;
            let client = connect(config).await?;
            run_stream(&client, &kind, payload).await
        }
        Commands::Skills => {
            let client = connect(config).await?;
            let skills = client.list_skills().await?;
            if skills.is_empty() {
                println!("No skills installed");
            }
            for skill in skills {
                let marker = if skill.enabled {
                    style("●").green()
                } else {
                    style("○").dim()
                };
                println!(
                    "{} {} {}",
                    marker,
                    style(&skill.name).bold(),
                    style(&skill.description).dim()
                );
            }
            Ok(())
        }
        Commands::Sessions => {
            let client = connect(config).await?;
            let sessions = client.list_sessions().await?;
            if sessions.is_empty() {
                println!("No active sessions");
            }
            for session in sessions {
                println!(
                    "{}  {:?}  {:?}  {}",
                    style(&session.id).cyan(),
                    session.channel,
                    session.status,
                    session.model.as_deref().unwrap_or("-")
                );
            }
            Ok(())
        }
        Commands::Watch { events } => watch(config, events).await,
    }
}

/// Layer CLI flags over the loaded configuration
fn resolve_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config_file {
        Some(path) => {
            let mut config = load_config_from_path(path)?;
            clawlink::config::apply_env_overrides(&mut config);
            config
        }
        None => load_config()?,
    };
    if let Some(url) = &cli.url {
        config.gateway.url = url.clone();
    }
    if let Some(ms) = cli.timeout_ms {
        config.gateway.request_timeout = Duration::from_millis(ms);
    }
    Ok(config)
}

fn parse_payload(raw: Option<&str>) -> Result<Option<Value>> {
    raw.map(|text| {
        serde_json::from_str(text)
            .map_err(|e| Error::InvalidInput(format!("payload is not valid JSON: {}", e)))
    })
    .transpose()
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn connect(mut config: Config) -> Result<GatewayClient> {
    // One-shot commands fail fast rather than retry
    config.gateway.auto_connect = false;
    let url = config.gateway.url.clone();
    if !config.enabled {
        return Err(Error::Disabled("gateway client".into()));
    }
    let client = GatewayClient::new(config);
    debug!("Connecting to {}", url);
    if !client.connect().await {
        return Err(Error::Transport(format!("could not connect to {}", url)));
    }
    Ok(client)
}

// ============================================================================
// Commands
// ============================================================================

async fn show_status(mut config: Config) -> Result<()> {
    println!("🔍 Gateway Status\n");
    config.gateway.auto_connect = false;
    let enabled = config.enabled;
    let client = GatewayClient::new(config);
    if enabled {
        client.connect().await;
    }
    let status = client.status().await;

    let connection = if status.connected {
        style("✓ Connected").green()
    } else {
        style("✗ Disconnected").red()
    };
    println!("   Gateway:  {} ({})", connection, style(&status.url).cyan());
    println!("   Port:     {}", status.port);
    if status.connected {
        println!("   Sessions: {}", status.sessions);
        println!("   Uptime:   {}s", status.uptime);
        if let Some(version) = &status.version {
            println!("   Version:  {}", version);
        }
    }
    if !enabled {
        println!("   {}", style("client disabled in configuration").yellow());
    }
    Ok(())
}

async fn run_stream(client: &GatewayClient, kind: &str, payload: Option<Value>) -> Result<()> {
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Result<Value>>();
    let error_tx = done_tx.clone();

    let callbacks = StreamCallbacks::new()
        .on_chunk(|chunk| {
            match chunk.as_str() {
                Some(text) => print!("{}", text),
                None => println!("{}", chunk),
            }
            let _ = io::stdout().flush();
        })
        .on_complete(move |result| {
            let _ = done_tx.send(Ok(result));
        })
        .on_error(move |e| {
            let _ = error_tx.send(Err(e));
        });

    let handle = client.stream_request(kind, payload, callbacks).await?;

    tokio::select! {
        outcome = done_rx.recv() => {
            println!();
            match outcome {
                Some(Ok(result)) => {
                    if !result.is_null() {
                        eprintln!("{}", style("── complete ──").dim());
                        print_json(&result)?;
                    }
                    Ok(())
                }
                Some(Err(e)) => Err(e),
                None => Err(Error::ConnectionLost),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            handle.cancel();
            println!();
            eprintln!("{} Stream {} cancelled", style("○").dim(), handle.id());
            client.disconnect().await;
            Ok(())
        }
    }
}

/// Connection events first, then the requested ones, each once
fn watch_names(events: Vec<String>) -> Vec<String> {
    let mut names: Vec<String> = vec![
        event_names::CONNECTED.into(),
        event_names::DISCONNECTED.into(),
        event_names::ERROR.into(),
    ];
    for event in events {
        if !names.contains(&event) {
            names.push(event);
        }
    }
    names
}

async fn watch(config: Config, events: Vec<String>) -> Result<()> {
    let client = connect(config).await?;

    let (tx, mut rx) = mpsc::unbounded_channel::<(String, Value)>();
    let names = watch_names(events);
    for name in &names {
        let tx = tx.clone();
        let event = name.clone();
        client.on(name, move |payload| {
            let _ = tx.send((event.clone(), payload.clone()));
        });
    }
    drop(tx);

    println!(
        "Watching {} (Ctrl-C to stop)",
        style(names.join(", ")).cyan()
    );
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some((name, payload)) => {
                    let time = chrono::Local::now().format("%H:%M:%S");
                    println!("{} {} {}", style(time).dim(), style(&name).bold(), payload);
                    if name == event_names::DISCONNECTED {
                        break;
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                client.disconnect().await;
                break;
            }
        }
    }
    Ok(())
}

fn manage_config(
    action: Option<ConfigAction>,
    explicit: &Option<PathBuf>,
    config: Result<Config>,
) -> Result<()> {
    let path = explicit.clone().unwrap_or_else(config_path);

    match action.unwrap_or(ConfigAction::Show) {
        ConfigAction::Path => {
            println!("{}", path.display());
        }
        ConfigAction::Show => {
            let snapshot = read_config_snapshot(&path);
            if snapshot.exists {
                println!("{} {}", style("Config file:").dim(), path.display());
            } else {
                println!("{} {} (using defaults)", style("No config file at").dim(), path.display());
            }
            for issue in &snapshot.issues {
                println!("{} {}", style("!").yellow(), issue);
            }
            match config {
                Ok(config) => print_json(&serde_json::to_value(config)?)?,
                Err(e) => println!(
                    "{} {} (run `clawlink config init --force` to replace the file)",
                    style("✗").red(),
                    e
                ),
            }
        }
        ConfigAction::Validate => {
            let result = validate_config(&config?);
            for issue in &result.errors {
                println!("{} {}: {}", style("✗").red(), issue.path, issue.message);
                if let Some(suggestion) = &issue.suggestion {
                    println!("    {} {}", style("→").dim(), suggestion);
                }
            }
            for issue in &result.warnings {
                println!("{} {}: {}", style("!").yellow(), issue.path, issue.message);
                if let Some(suggestion) = &issue.suggestion {
                    println!("    {} {}", style("→").dim(), suggestion);
                }
            }
            if !result.valid {
                return Err(Error::Config(format!("{} error(s)", result.errors.len())));
            }
            println!("{} Configuration is valid", style("✓").green());
        }
        ConfigAction::Init { force } => {
            if path.exists() && !force {
                return Err(Error::Config(format!(
                    "{} already exists (use --force to overwrite)",
                    path.display()
                )));
            }
            save_config(&Config::default(), &path)?;
            println!("{} Wrote {}", style("✓").green(), path.display());
        }
    }
    Ok(())
}
