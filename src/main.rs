//! subgate — Telegram-бот, который выдаёт подписки Marzban участникам закрытого
//! канала и периодически сверяет их с членством в канале.

mod account;
mod bot;
mod config;
mod link;
mod membership;
mod panel;
mod provision;
mod reconcile;
mod redirect;
mod scheduler;

use membership::TelegramMembership;
use panel::{AccountTemplate, MarzbanClient};
use provision::Provisioner;
use reconcile::Reconciler;
use std::path::PathBuf;
use std::sync::Arc;
use teloxide::dispatching::Dispatcher;
use teloxide::prelude::*;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/etc/subgate.toml"));
    tracing::info!("Starting subgate with config {}", config_path.display());

    let config = Arc::new(config::Config::load(&config_path)?);
    let token = config.bot_token()?;
    let channel = ChatId(config.target_channel()?);
    let interval = config.check_interval()?;
    tracing::info!(
        admin_count = config.admin_ids.len(),
        target_channel = channel.0,
        interval_minutes = interval.as_secs() / 60,
        panel_address = %config.panel.address,
        renew_from = ?config.renew_from,
        support_chat = ?config.support_chat_id,
        redirect_port = ?config.redirect.listen_port,
        "Configuration loaded"
    );

    let panel = MarzbanClient::new(
        &config.panel.address,
        config.panel.username.clone(),
        config.panel.password.clone(),
        AccountTemplate {
            proxies: config.template.proxies.clone(),
            inbounds: config.template.inbounds.clone(),
        },
        config.panel_timeout(),
    )?;

    let bot = Bot::new(token);
    match bot.get_chat(channel).await {
        Ok(chat) => tracing::info!(
            chat_id = chat.id.0,
            title = ?chat.title(),
            "Bot started for target channel"
        ),
        Err(error) => tracing::warn!(
            error = %error,
            "Не удалось получить целевой канал через getChat"
        ),
    }

    let membership = TelegramMembership::new(bot.clone(), channel);
    let policy = config.renewal_policy();
    let reconciler = Arc::new(Reconciler::new(panel.clone(), membership.clone(), policy));
    let provisioner = Arc::new(Provisioner::new(panel, policy.term));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = scheduler::spawn(
        reconciler.clone(),
        config.initial_delay(),
        interval,
        shutdown_rx.clone(),
    );
    let redirector = config.redirect.listen_port.map(|port| {
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(error) = redirect::serve(port, shutdown).await {
                tracing::error!(port, error = %error, "Redirector failed");
            }
        })
    });

    let state = bot::handlers::BotState::new(config, reconciler, provisioner, membership, shutdown_rx);
    tracing::info!("Dispatcher initialized, bot is ready");

    Dispatcher::builder(bot, bot::handlers::schema())
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    tracing::info!("Dispatcher stopped, waiting for background tasks");
    if shutdown_tx.send(true).is_err() {
        tracing::debug!("Background tasks already gone");
    }
    if let Err(error) = scheduler.await {
        tracing::warn!(error = %error, "Scheduler task ended abnormally");
    }
    if let Some(handle) = redirector
        && let Err(error) = handle.await
    {
        tracing::warn!(error = %error, "Redirector task ended abnormally");
    }
    Ok(())
}
