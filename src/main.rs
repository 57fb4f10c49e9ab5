// src/main.rs
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use personal_finance_client::cli::{self, api::Client, state::ReportRange, sync::SyncEvent, sync::SyncHandle, ui};
use personal_finance_client::config::ClientConfig;

const DEFAULT_FILTER: &str = "info,personal_finance_client=debug";

#[derive(Parser, Debug)]
#[command(name = "finance-client", version, about = "Terminal client for the personal finance tracker")]
struct Cli {
    /// Base URL of the ledger API, e.g. http://localhost:5000/api
    #[arg(long, global = true)]
    api_base: Option<String>,

    /// Seconds to wait before polling again after a failed poll (at least 1)
    #[arg(long, global = true, value_parser = clap::value_parser!(u64).range(1..))]
    retry_delay_secs: Option<u64>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Interactive terminal UI (default)
    Tui,
    /// Log in and print every change the server pushes until Ctrl-C
    Watch(Login),
    /// Print the summary and per-category report for a date range
    Report {
        #[command(flatten)]
        login: Login,
        /// First day, YYYY-MM-DD
        #[arg(long)]
        start: String,
        /// Last day, YYYY-MM-DD
        #[arg(long)]
        end: String,
    },
}

#[derive(Args, Debug)]
struct Login {
    #[arg(long, short)]
    username: String,
    #[arg(long, short, env = "FINANCE_PASSWORD", hide_env_values = true)]
    password: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Cli::parse();

    let mut config = ClientConfig::from_env();
    if let Some(base) = &args.api_base {
        config = config.with_api_base(base);
    }
    if let Some(secs) = args.retry_delay_secs {
        config = config.with_retry_delay(Duration::from_secs(secs));
    }

    match args.command.unwrap_or(Command::Tui) {
        Command::Tui => {
            init_file_tracing(&config)?;
            tracing::info!(api_base = %config.api_base, "Starting TUI");
            cli::run(&config).await
        }
        Command::Watch(login) => {
            init_stderr_tracing();
            watch(&config, &login).await
        }
        Command::Report { login, start, end } => {
            init_stderr_tracing();
            report(&config, &login, &start, &end).await
        }
    }
}

// The TUI owns the terminal, so logs go to a file.
fn init_file_tracing(config: &ClientConfig) -> Result<()> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.log_file)
        .with_context(|| format!("opening log file {}", config.log_file.display()))?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_FILTER.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file)),
        )
        .init();
    Ok(())
}

fn init_stderr_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn watch(config: &ClientConfig, login: &Login) -> Result<()> {
    let client = Client::new(config)?;
    let session = client.login(&login.username, &login.password).await?;
    tracing::info!(user = %session.username, "Logged in, watching for updates");

    let (handle, mut events) = SyncHandle::spawn(client.ledger(session), config.retry_delay);

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for CTRL+C");
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutdown signal received");
    };
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            event = events.recv() => match event {
                Some(SyncEvent::State(state)) => tracing::debug!(state = state.label(), "sync state"),
                Some(SyncEvent::Categories(list)) => {
                    println!("categories ({}):", list.len());
                    for c in &list {
                        println!("  {}", c.name);
                    }
                }
                Some(SyncEvent::Transactions(rows)) => {
                    println!("transactions ({}):", rows.len());
                    for t in &rows {
                        println!("  {:<8} {:>12}  {}", t.kind.as_str(), t.amount, t.category);
                    }
                }
                Some(SyncEvent::SessionExpired) => {
                    eprintln!("Session expired, please log in again.");
                    break;
                }
                None => break,
            },
        }
    }

    let exit = handle.shutdown().await;
    tracing::info!(?exit, "Watcher stopped");
    Ok(())
}

async fn report(config: &ClientConfig, login: &Login, start: &str, end: &str) -> Result<()> {
    let range = ReportRange::parse(start, end)?;
    let client = Client::new(config)?;
    let ledger = client.ledger(client.login(&login.username, &login.password).await?);

    let summary = ledger.report(&range).await?;
    let by_category = ledger.category_report(&range).await?;

    for line in ui::summary_lines(&summary) {
        println!("{line}");
    }
    println!();
    for line in ui::category_lines(&by_category) {
        println!("{line}");
    }
    Ok(())
}
