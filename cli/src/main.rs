// murmur — terminal chat over plain TCP
//
// `murmur serve` hosts a room, `murmur connect` joins one, and
// `murmur user` manages who may join.

mod config;
mod console;
mod display;
mod users;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use console::Command;
use murmur_core::{ChatClient, ChatServer, ClientEvent, Presence, ServerEvent};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use zeroize::Zeroizing;

#[derive(Parser)]
#[command(name = "murmur")]
#[command(about = "Murmur — real-time terminal chat", long_about = None)]
#[command(version)]
struct Cli {
    /// Write logs to a daily file in this directory instead of stderr
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Host a chat room
    Serve {
        #[arg(short, long)]
        port: Option<u16>,
        /// Maximum number of admitted peers
        #[arg(long)]
        max_connections: Option<usize>,
        /// Lines replayed to each new peer
        #[arg(long)]
        history: Option<usize>,
        /// Sender name for lines typed at the server console
        #[arg(long)]
        operator: Option<String>,
    },
    /// Join a chat room
    Connect {
        #[arg(short, long)]
        name: Option<String>,
        #[arg(long)]
        host: Option<String>,
        #[arg(short, long)]
        port: Option<u16>,
        /// Prompted for when omitted
        #[arg(long)]
        password: Option<String>,
        /// working, sleeping, eating or none
        #[arg(long)]
        presence: Option<String>,
    },
    /// Manage the users allowed to join
    User {
        #[command(subcommand)]
        action: UserAction,
    },
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum UserAction {
    /// Add a user
    Add {
        name: String,
        #[arg(long)]
        password: Option<String>,
    },
    /// Change a user's password
    Passwd {
        name: String,
        #[arg(long)]
        password: Option<String>,
    },
    /// Remove a user
    Remove { name: String },
    /// List all users
    List,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Set a configuration value
    Set { key: String, value: String },
    /// Get a configuration value
    Get { key: String },
    /// List all configuration values
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_logging(cli.log_dir.as_deref())?;

    match cli.command {
        Commands::Serve {
            port,
            max_connections,
            history,
            operator,
        } => cmd_serve(port, max_connections, history, operator).await,
        Commands::Connect {
            name,
            host,
            port,
            password,
            presence,
        } => cmd_connect(name, host, port, password, presence).await,
        Commands::User { action } => cmd_user(action).await,
        Commands::Config { action } => cmd_config(action).await,
    }
}

fn init_logging(log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));

    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).context("Failed to create log directory")?;
            let appender = tracing_appender::rolling::daily(dir, "murmur.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            Ok(None)
        }
    }
}

fn read_password(provided: Option<String>) -> Result<Zeroizing<String>> {
    match provided {
        Some(password) => Ok(Zeroizing::new(password)),
        None => console::read_secret("Password: ").context("Failed to read password"),
    }
}

fn print_help(server: bool) {
    println!("{}", "Commands:".bold());
    if server {
        println!("  {}          List connected peers", "/who".bright_green());
        println!("  {}  Disconnect a peer", "/kick <name>".bright_green());
        println!("  {}         Show the listening address", "/info".bright_green());
    }
    println!("  {} Set your presence", "/status <state>".bright_green());
    println!("  {}         Leave", "/quit".bright_green());
    println!("  Anything else is sent to the room");
    println!();
}

async fn cmd_serve(
    port: Option<u16>,
    max_connections: Option<usize>,
    history: Option<usize>,
    operator: Option<String>,
) -> Result<()> {
    let config = config::Config::load()?;
    let port = port.unwrap_or(config.server.port);

    let mut server_config = config.server_config();
    if let Some(max) = max_connections {
        server_config.max_connections = max;
    }
    if let Some(capacity) = history {
        server_config.history_capacity = capacity;
    }
    if let Some(name) = operator {
        server_config.operator_name = name;
    }

    let admin = users::UserAdmin::open(&config.users_path()?)?;
    if admin.list().await?.is_empty() {
        println!(
            "{} No users yet, nobody can join. Add one with {}",
            "!".yellow(),
            "murmur user add <name>".bright_green()
        );
    }

    let server = ChatServer::new(server_config, admin.store(), Arc::new(admin.verifier()));
    let mut events = server
        .startup(port)
        .await
        .context("Failed to start server")?;
    info!("Serving on port {}", port);

    println!("{}", "Murmur — Server".bold());
    if let Some(info) = server.server_info() {
        println!("  {} Listening on {}", "✓".green(), info.bright_cyan());
    }
    println!();
    print_help(true);

    let mut input = console::stdin_lines();
    let mut presence: Option<Presence> = None;
    display::prompt();

    loop {
        tokio::select! {
            line = input.recv() => {
                let Some(line) = line else { break };
                match console::parse(&line) {
                    Command::Quit => break,
                    Command::Empty => {}
                    Command::Help => print_help(true),
                    Command::Say(text) => {
                        if let Err(e) = server.send_message(&text, presence).await {
                            println!("{} {}", "✗".red(), e);
                        }
                    }
                    Command::Status(next) => {
                        presence = next;
                        println!("{} Presence: {}", "✓".green(), Presence::label_or_dash(presence));
                    }
                    Command::Who => {
                        let peers = server.peers();
                        if peers.is_empty() {
                            println!("{}", "Nobody is connected.".dimmed());
                        }
                        for peer in peers {
                            println!(
                                "  {} {} {} since {}",
                                peer.name.bright_cyan(),
                                peer.address.to_string().dimmed(),
                                peer.id.to_string().dimmed(),
                                display::format_date(peer.admitted_at)
                            );
                        }
                    }
                    Command::Kick(name) => {
                        info!("Operator evicting {}", name);
                        if server.evict_by_name(&name).await {
                            println!("{} Disconnected {}", "✓".green(), name.bright_cyan());
                        } else {
                            println!("{} No peer named {}", "✗".red(), name);
                        }
                    }
                    Command::Info => {
                        if let Some(info) = server.server_info() {
                            println!("  {}", info.bright_cyan());
                        }
                    }
                    Command::Invalid(message) => println!("{} {}", "✗".red(), message),
                }
                display::prompt();
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                println!();
                print_server_event(event);
                display::prompt();
            }
        }
    }

    println!();
    println!("Stopping server...");
    server.shutdown().await.context("Failed to stop server")?;
    println!("{} Server stopped", "✓".green());
    Ok(())
}

fn print_server_event(event: ServerEvent) {
    match event {
        ServerEvent::MessageReceived(line) => println!("{}", display::chat_line(&line)),
        ServerEvent::RosterCountChanged(count) => {
            println!("{} {} connected", "•".bright_blue(), count)
        }
        ServerEvent::PeerAdmitted { name, address } => {
            println!("{} {} joined from {}", "→".bright_green(), name.bright_cyan(), address)
        }
        ServerEvent::PeerRejected {
            name,
            address,
            reason,
        } => println!("{} {} from {} turned away: {}", "✗".red(), name, address, reason),
        ServerEvent::PeerLeft { name } => println!("{} {} left", "←".yellow(), name.bright_cyan()),
    }
}

async fn cmd_connect(
    name: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    password: Option<String>,
    presence: Option<String>,
) -> Result<()> {
    let mut config = config::Config::load()?;
    if let Some(host) = host {
        config.client.host = host;
    }
    if let Some(port) = port {
        config.client.port = port;
    }
    let name = name
        .or_else(|| config.client.name.clone())
        .context("No name given: pass --name or run `murmur config set client.name <name>`")?;
    let mut presence = match presence {
        Some(value) => Presence::parse_optional(&value)?,
        None => config.client.presence,
    };
    let password = read_password(password)?;

    let client_config = config.client_config(&name, &password);
    drop(password);
    let (client, mut events) = ChatClient::connect(client_config)
        .await
        .context("Failed to connect")?;

    println!("{}", "Murmur".bold());
    println!(
        "  {} Connected to {} as {}",
        "✓".green(),
        client.server_addr().to_string().bright_cyan(),
        client.name().bright_cyan()
    );
    println!();
    print_help(false);

    let mut input = console::stdin_lines();
    display::prompt();

    loop {
        tokio::select! {
            line = input.recv() => {
                let Some(line) = line else { break };
                match console::parse(&line) {
                    Command::Quit => break,
                    Command::Empty => {}
                    Command::Help => print_help(false),
                    Command::Say(text) => {
                        if let Err(e) = client.send_message(&text, presence).await {
                            warn!("Send failed: {}", e);
                            println!("{} {}", "✗".red(), e);
                        }
                    }
                    Command::Status(next) => {
                        presence = next;
                        println!("{} Presence: {}", "✓".green(), Presence::label_or_dash(presence));
                    }
                    Command::Info => {
                        println!("  {} via {}", client.server_addr(), client.origin_address());
                    }
                    Command::Who | Command::Kick(_) => {
                        println!("{} Only available on the server console", "✗".red());
                    }
                    Command::Invalid(message) => println!("{} {}", "✗".red(), message),
                }
                display::prompt();
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    ClientEvent::Received(line) => {
                        println!();
                        println!("{}", display::chat_line(&line));
                    }
                    ClientEvent::Sent(_) => continue,
                    ClientEvent::SendFailed(line) => {
                        println!();
                        println!("{} Not delivered: {}", "✗".red(), line.body);
                    }
                    ClientEvent::ForceClosed => {
                        println!();
                        println!("{} The server closed this session", "✗".red());
                        break;
                    }
                    ClientEvent::Disconnected => {
                        println!();
                        println!("{} Connection lost", "✗".red());
                        break;
                    }
                }
                display::prompt();
            }
        }
    }

    if client.is_active() {
        client.disconnect().await?;
    }
    println!("{} Disconnected", "✓".green());
    Ok(())
}

async fn cmd_user(action: UserAction) -> Result<()> {
    let config = config::Config::load()?;
    let admin = users::UserAdmin::open(&config.users_path()?)?;

    match action {
        UserAction::Add { name, password } => {
            let password = read_password(password)?;
            let record = admin.add(&name, &password).await?;
            println!("{} Added user {}", "✓".green(), record.name.bright_cyan());
        }

        UserAction::Passwd { name, password } => {
            let password = read_password(password)?;
            admin.set_password(&name, &password).await?;
            println!("{} Password changed for {}", "✓".green(), name.bright_cyan());
        }

        UserAction::Remove { name } => {
            admin.remove(&name).await?;
            println!("{} Removed user {}", "✓".green(), name.bright_cyan());
        }

        UserAction::List => {
            let users = admin.list().await?;
            if users.is_empty() {
                println!("{}", "No users yet.".dimmed());
                println!("Add one with: {}", "murmur user add <name>".bright_green());
                return Ok(());
            }

            println!("{} ({})", "Users".bold(), users.len());
            for user in users {
                println!(
                    "  {} {}",
                    user.name.bright_cyan(),
                    format!("added {}", display::format_date(user.created_at)).dimmed()
                );
            }
        }
    }

    Ok(())
}

async fn cmd_config(action: ConfigAction) -> Result<()> {
    let mut config = config::Config::load()?;

    match action {
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            config.save()?;
            println!("{} Set {} = {}", "✓".green(), key.bright_cyan(), value);
        }

        ConfigAction::Get { key } => match config.get(&key) {
            Some(value) => println!("{} = {}", key.bright_cyan(), value),
            None => anyhow::bail!("Unknown config key: {}", key),
        },

        ConfigAction::List => {
            println!("{}", "Configuration".bold());
            for (key, value) in config.list() {
                println!("  {} = {}", key.bright_cyan(), value);
            }
            println!();
            println!("Config file: {}", config::Config::config_file()?.display());
        }
    }

    Ok(())
}
