//! Command line interface for operating the relay bot. Supports writing
//! a starter configuration, running the full relay (stream listener,
//! command bot, delivery queues, keep-alive server), and a one-shot
//! mirror push.

mod config;
mod dedup;
mod dispatch;
mod event;
mod format;
mod mirror;
mod relay;
mod server;
mod stream;
mod subscriptions;
mod telegram;
mod wiki;

use std::{fs, net::SocketAddr, path::Path, sync::Arc};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use teloxide::Bot;
use tokio::sync::mpsc;
use tracing::info;

use config::Settings;
use subscriptions::SubscriptionStore;

/// Command line interface entry point.
#[derive(Parser)]
#[command(
    name = "wikigram",
    author,
    version,
    about = "Wikimedia recent-change notifications for Telegram"
)]
struct Cli {
    /// Path to the `.env` configuration file.
    #[arg(long, default_value = ".env")]
    env: String,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Write a default `.env` and an empty subscriptions file.
    Init,
    /// Run the relay until interrupted.
    Serve,
    /// Mirror the current subscriptions file to GitHub once.
    Push,
}

/// Execute the selected CLI subcommand.
async fn run(cli: Cli) -> anyhow::Result<()> {
    ensure_env_file(&cli.env)?;
    let cfg = Settings::from_env(&cli.env)?;
    match cli.command {
        Commands::Init => {
            if !cfg.settings_file.exists() {
                if let Some(parent) = cfg.settings_file.parent() {
                    if !parent.as_os_str().is_empty() {
                        fs::create_dir_all(parent)?;
                    }
                }
                fs::write(&cfg.settings_file, "{}\n")?;
            }
        }
        Commands::Push => {
            let gh = cfg
                .github
                .as_ref()
                .context("GITHUB_TOKEN and GITHUB_REPO must be set to mirror")?;
            let store = SubscriptionStore::load(cfg.settings_file.clone())?;
            mirror::Mirror::new(gh)?.push(&store.snapshot_json()).await?;
        }
        Commands::Serve => serve(cfg).await?,
    }
    Ok(())
}

/// Wire up and run every long-lived task until ctrl-c.
async fn serve(cfg: Settings) -> anyhow::Result<()> {
    let Some(token) = cfg.bot_token.clone() else {
        bail!("BOT_TOKEN is not set; add it to the env file before serving");
    };
    let store = SubscriptionStore::load(cfg.settings_file.clone())?;
    let bot = Bot::new(token);
    let messenger: Arc<dyn telegram::Messenger> =
        Arc::new(telegram::TelegramMessenger::new(bot.clone()));
    let alerts = dispatch::spawn_alerter(messenger.clone(), cfg.admin_chat);
    let dispatcher = dispatch::Dispatcher::new(messenger, alerts.clone());
    let mirror = cfg.github.as_ref().map(mirror::Mirror::new).transpose()?;

    let (tx, rx) = mpsc::channel(256);
    let stream_cfg = stream::StreamConfig::new(cfg.stream_url.clone(), cfg.retry_after_fallback);
    let connector = tokio::spawn(stream::run(stream_cfg, tx));
    let fanout = tokio::spawn(relay::run(rx, relay::Relay::new(store.clone(), dispatcher)));
    let commands = tokio::spawn(telegram::run_commands(bot, cfg.clone(), store, mirror, alerts));
    let http_addr: SocketAddr = cfg.bind_http.parse().context("parsing BIND_HTTP")?;
    let http = tokio::spawn(server::serve_http(http_addr, std::future::pending()));
    info!(bind = %cfg.bind_http, stream = %cfg.stream_url, "wikigram serving");

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutting down");
    // Dropping the connector also drops the open upstream connection;
    // in-flight delivery retries are abandoned.
    connector.abort();
    fanout.abort();
    commands.abort();
    http.abort();
    Ok(())
}

/// Create a default `.env` file if one is not already present at `path`.
fn ensure_env_file(path: &str) -> anyhow::Result<()> {
    let env_path = Path::new(path);
    if env_path.exists() {
        return Ok(());
    }
    if let Some(parent) = env_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let base_dir = match env_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir()?,
    };
    let settings_file = base_dir.join("subscriptions.json");
    let mut content = String::new();
    content.push_str("BOT_TOKEN=\n");
    content.push_str("ADMIN_CHAT_ID=\n");
    content.push_str("ADMIN_IDS=\n");
    content.push_str("ADMIN_OVERRIDE_ID=\n");
    content.push_str(&format!("STREAM_URL={}\n", config::DEFAULT_STREAM_URL));
    content.push_str(&format!(
        "SETTINGS_FILE={}\n",
        settings_file.to_string_lossy()
    ));
    content.push_str("BIND_HTTP=127.0.0.1:8080\n");
    content.push_str("RETRY_AFTER_FALLBACK_SECS=60\n");
    content.push_str("GITHUB_TOKEN=\n");
    content.push_str("GITHUB_REPO=\n");
    content.push_str("GITHUB_FILE_PATH=subscriptions.json\n");
    content.push_str("GITHUB_BRANCH=main\n");
    fs::write(env_path, content)?;
    Ok(())
}

#[cfg(not(test))]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();
    run(Cli::parse()).await
}
