//! # CampusClock — automated daily health check-in
//!
//! Usage:
//!   campusclock run                          # Start the daily scheduler
//!   campusclock user add 20230001 --password ... --email a@b.edu --auto
//!   campusclock clock 20230001               # One check-in right now
//!   campusclock clock 20230001 --standalone  # Same, without touching the DB
//!   campusclock check 20230001               # Is the stored session live?

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use campusclock_core::config::AppConfig;
use campusclock_core::types::ClockOutcome;
use campusclock_notify::notifiers_from_config;
use campusclock_scheduler::run_daemon;
use campusclock_security::Vault;
use campusclock_session::SessionClient;
use campusclock_store::ClockStore;
use campusclock_workflow::ClockWorkflow;

#[derive(Parser)]
#[command(
    name = "campusclock",
    version,
    about = "⏰ CampusClock — automated daily health check-in"
)]
struct Cli {
    /// Config file path (default: ~/.campusclock/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the daily scheduler daemon
    Run,
    /// Run one check-in now for a user
    Clock {
        username: String,
        /// Do not read or write persisted session state
        #[arg(long)]
        standalone: bool,
    },
    /// Probe whether a user's stored session is still authenticated
    Check { username: String },
    /// Log a user in and persist the session cookies
    Login {
        username: String,
        /// Drop the stored session and authenticate from scratch
        #[arg(long)]
        force: bool,
    },
    /// Log a user out of the portal and clear the local session
    Logout { username: String },
    /// Manage registered users
    #[command(subcommand)]
    User(UserCommand),
}

#[derive(Subcommand)]
enum UserCommand {
    /// Register a portal account
    Add {
        username: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        email: Option<String>,
        /// Opt into the daily scheduler
        #[arg(long)]
        auto: bool,
    },
    /// List registered accounts
    List,
    /// Remove an account (its attempts cascade with it)
    Remove { username: String },
    /// Toggle the daily auto check-in
    SetAuto {
        username: String,
        #[arg(long)]
        on: bool,
    },
    /// Show a user's attempt history
    History { username: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "campusclock=debug"
    } else {
        "campusclock=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let config = match &cli.config {
        Some(path) => AppConfig::load_from(std::path::Path::new(path))?,
        None => AppConfig::load()?,
    };

    let db_path = shellexpand::tilde(&config.store.db_path).to_string();
    tracing::debug!("opening store at {db_path}");
    let store = Arc::new(ClockStore::open(std::path::Path::new(&db_path))?);
    let vault = Vault::new(config.security.encrypt);

    match cli.command {
        Command::Run => {
            let notifiers = Arc::new(notifiers_from_config(&config));
            run_daemon(store, notifiers, Arc::new(config)).await?;
        }

        Command::Clock {
            username,
            standalone,
        } => {
            let user = require_user(&store, &username)?;
            let session_store = if standalone { None } else { Some(store.clone()) };
            let mut session =
                SessionClient::new(user, config.portal.clone(), vault, session_store)?;
            session.login(false).await?;
            match ClockWorkflow::new(&session).clock().await? {
                ClockOutcome::Submitted => println!("✅ {}", ClockOutcome::Submitted.message()),
                outcome => println!("⏭  {}", outcome.message()),
            }
        }

        Command::Check { username } => {
            let user = require_user(&store, &username)?;
            let session = SessionClient::new(user, config.portal.clone(), vault, Some(store))?;
            if session.is_authenticated().await? {
                println!("✅ session for {username} is live");
            } else {
                println!("❌ session for {username} is not authenticated");
            }
        }

        Command::Login { username, force } => {
            let user = require_user(&store, &username)?;
            let mut session =
                SessionClient::new(user, config.portal.clone(), vault, Some(store))?;
            session.login(force).await?;
            println!("✅ logged in as {username}, session persisted");
        }

        Command::Logout { username } => {
            let user = require_user(&store, &username)?;
            let mut session =
                SessionClient::new(user, config.portal.clone(), vault, Some(store.clone()))?;
            session.logout().await?;
            store.clear_cookie(&username)?;
            println!("logged out {username}");
        }

        Command::User(cmd) => run_user_command(cmd, &store, &vault)?,
    }

    Ok(())
}

fn run_user_command(cmd: UserCommand, store: &Arc<ClockStore>, vault: &Vault) -> Result<()> {
    match cmd {
        UserCommand::Add {
            username,
            password,
            email,
            auto,
        } => {
            store.add_user(&username, &vault.seal(&password), email.as_deref(), auto)?;
            println!("added {username} (auto_clock: {auto})");
        }
        UserCommand::List => {
            let users = store.list_users()?;
            if users.is_empty() {
                println!("no users registered");
            }
            for user in users {
                println!(
                    "{:<16} auto_clock: {:<5} email: {:<28} session: {}",
                    user.username,
                    user.auto_clock,
                    user.email.as_deref().unwrap_or("-"),
                    if user.cookie.is_some() { "stored" } else { "none" },
                );
            }
        }
        UserCommand::Remove { username } => {
            if store.remove_user(&username)? {
                println!("removed {username}");
            } else {
                println!("no such user: {username}");
            }
        }
        UserCommand::SetAuto { username, on } => {
            if store.set_auto_clock(&username, on)? {
                println!("{username}: auto_clock = {on}");
            } else {
                println!("no such user: {username}");
            }
        }
        UserCommand::History { username } => {
            let Some(user) = store.get_user(&username)? else {
                println!("no such user: {username}");
                return Ok(());
            };
            let Some(id) = user.id else {
                println!("{username} has no attempts yet");
                return Ok(());
            };
            for attempt in store.attempts_for_user(&id)? {
                println!(
                    "{}  {:<8} scheduled {}  executed {}  {}",
                    attempt.id,
                    attempt.status.as_str(),
                    attempt.scheduled_at.format("%Y-%m-%d %H:%M:%S"),
                    attempt
                        .executed_at
                        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                        .unwrap_or_else(|| "-".into()),
                    attempt.message.as_deref().unwrap_or("")
                );
            }
        }
    }
    Ok(())
}

fn require_user(
    store: &Arc<ClockStore>,
    username: &str,
) -> Result<campusclock_core::types::User> {
    store
        .get_user(username)?
        .ok_or_else(|| anyhow::anyhow!("no such user: {username} (try `campusclock user add`)"))
}
