use std::sync::Arc;

use anyhow::Context;

use netflix_code_bot::channels::TelegramBot;
use netflix_code_bot::config::{AppConfig, DEFAULT_CONFIG_PATH};
use netflix_code_bot::mail::MailFilter;
use netflix_code_bot::pipeline::{CodeSource, MailboxCodeSource};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let config_path =
        std::env::var("CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = AppConfig::load(&config_path)
        .with_context(|| format!("Failed to load configuration from {config_path}"))?;

    // Initialize tracing: RUST_LOG, then log.level, then info
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(config.log_level.as_deref().unwrap_or("info"))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    eprintln!("📬 Netflix Code Bot v{}", env!("CARGO_PKG_VERSION"));
    eprintln!(
        "   IMAP: {}:{} ({})",
        config.mailbox.server, config.mailbox.port, config.mailbox.address
    );
    eprintln!(
        "   Authorized chats: {}",
        config.telegram.authorized_chats.len()
    );
    match config.fetch_timeout {
        Some(limit) => eprintln!("   Fetch timeout: {}s\n", limit.as_secs()),
        None => eprintln!("   Fetch timeout: none\n"),
    }

    tracing::info!(
        file = ?config.sources.file,
        env_overrides = ?config.sources.env_overrides,
        "Configuration loaded"
    );

    let mut source = MailboxCodeSource::new(config.mailbox, MailFilter::NETFLIX_ACCESS_CODE);
    if let Some(limit) = config.fetch_timeout {
        source = source.with_timeout(limit);
    }
    let source: Arc<dyn CodeSource> = Arc::new(source);

    let bot = Arc::new(TelegramBot::new(
        config.telegram.bot_token,
        config.telegram.authorized_chats,
        source,
    ));

    tokio::select! {
        result = bot.run() => result.context("Telegram bot stopped")?,
        _ = tokio::signal::ctrl_c() => tracing::info!("Bot stopped by user"),
    }

    Ok(())
}
