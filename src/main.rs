use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

use intake_bot::channels::{Channel, CliChannel, NotificationDispatcher, Outbound, TelegramChannel};
use intake_bot::config::{BotConfig, ChannelKind, RelayMode};
use intake_bot::conversation::{
    ConversationDriver, ConversationRegistry, StepExecutor, spawn_idle_sweep,
};
use intake_bot::events::EventBus;
use intake_bot::forms::{FormStore, Outbox};
use intake_bot::questionnaire::{Chain, catalog};
use intake_bot::relay::{Relay, ReplyListener, SubscribeListener, VerdictListener};
use intake_bot::store::{FormRepository, LibSqlBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut config = BotConfig::from_env().context("invalid configuration")?;
    let _log_guard = init_tracing(&config);

    eprintln!("🩺 Intake Bot v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Channel: {:?}", config.channel);
    eprintln!("   Database: {}", config.db_path.display());
    match config.relay.mode {
        RelayMode::Off => eprintln!("   Relay: off"),
        mode => eprintln!("   Relay: {:?} on {}", mode, config.relay.addr),
    }
    if config.channel == ChannelKind::Cli {
        eprintln!("   Type /start to begin. Answer buttons by number or label.\n");
    }

    let backend = LibSqlBackend::new_local(&config.db_path)
        .await
        .context("failed to open form database")?;
    let repo: Arc<dyn FormRepository> = Arc::new(backend);

    let chain = match &config.questionnaire_path {
        Some(path) => Chain::load(path)
            .with_context(|| format!("failed to load questionnaire {}", path.display()))?,
        None => catalog::pregnancy_risk()?,
    };
    info!(steps = chain.len(), body_start = chain.body_start(), "Questionnaire loaded");

    let bus = EventBus::new();

    // Persistence
    let (outbox_handle, outbox_rx) = Outbox::channel();
    let forms = FormStore::new(outbox_handle);
    bus.subscribe(forms.clone());
    Outbox::new(Arc::clone(&repo), Arc::clone(&bus), config.outbox_retry).spawn(outbox_rx);

    let registry = ConversationRegistry::new();
    bus.subscribe(registry.clone());

    // Channel
    let channel: Arc<dyn Channel> = match config.channel {
        ChannelKind::Telegram => {
            let token = config
                .telegram_token
                .take()
                .context("TELEGRAM_BOT_TOKEN not set")?;
            let telegram = Arc::new(TelegramChannel::new(token));
            if let Err(e) = telegram.health_check().await {
                warn!(error = %e, "Telegram health check failed; continuing");
            }
            telegram
        }
        ChannelKind::Cli => Arc::new(CliChannel::new()),
    };
    let outbound = Outbound::new(Arc::clone(&channel), config.retry);

    let (dispatcher, _dispatch_task) = NotificationDispatcher::spawn(outbound.clone());
    bus.subscribe(dispatcher);

    let executor = Arc::new(StepExecutor::new(
        chain,
        Arc::clone(&bus),
        outbound.clone(),
        Arc::clone(&registry),
    ));
    let driver = ConversationDriver::new(
        executor,
        Arc::clone(&registry),
        Arc::clone(&bus),
        outbound,
    );

    spawn_idle_sweep(
        Arc::clone(&registry),
        Arc::clone(&forms),
        config.idle_timeout,
        config.sweep_interval,
    );

    // Verdict relay
    let listener: Option<Arc<dyn VerdictListener>> = match config.relay.mode {
        RelayMode::Subscribe if config.relay.connect => {
            Some(Arc::new(SubscribeListener::connect(config.relay.addr.clone())))
        }
        RelayMode::Subscribe => Some(Arc::new(
            SubscribeListener::bind(&config.relay.addr)
                .await
                .context("failed to bind verdict subscriber")?,
        )),
        RelayMode::Reply => Some(Arc::new(
            ReplyListener::bind(&config.relay.addr, config.relay.reply_delay)
                .await
                .context("failed to bind reply listener")?,
        )),
        RelayMode::Off => None,
    };
    if let Some(listener) = listener {
        Relay::new(Arc::clone(&repo), Arc::clone(&bus)).spawn(listener);
    }

    let inbound = channel
        .start()
        .await
        .context("failed to start channel")?;
    driver.run(inbound).await;

    if let Err(e) = channel.shutdown().await {
        warn!(error = %e, "Channel shutdown failed");
    }
    Ok(())
}

/// Stderr logging filtered by `RUST_LOG`, plus a daily log file when a log
/// directory is configured. The guard must live until exit.
fn init_tracing(config: &BotConfig) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "intake-bot.log");
            let (file, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(std::io::stderr.and(file))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
            None
        }
    }
}
