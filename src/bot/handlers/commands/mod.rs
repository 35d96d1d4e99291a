use super::format::{render_pass_outcome, render_stats};
use super::shared::{HandlerResult, send_access};
use super::state::{BotState, is_admin_message, sender_display_name, sender_user_id};
use crate::account::partition;
use crate::panel::SubscriptionStore;
use chrono::Utc;
use std::time::Duration;
use teloxide::dptree;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;

const BROADCAST_PAUSE: Duration = Duration::from_millis(50);

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase")]
pub enum BotCommand {
    #[command(description = "Получить ссылку на подписку")]
    Start,
    #[command(description = "Получить ссылку на подписку")]
    Vpn,
    #[command(description = "Справка")]
    Help,
    #[command(description = "Запустить сверку подписок (админ)")]
    Sync,
    #[command(description = "Статистика панели (админ)")]
    Stats,
    #[command(description = "Рассылка всем подписчикам (админ)")]
    Broadcast(String),
}

pub fn handler() -> teloxide::dispatching::UpdateHandler<Box<dyn std::error::Error + Send + Sync + 'static>> {
    teloxide::filter_command::<BotCommand, _>()
        .branch(dptree::case![BotCommand::Start].endpoint(cmd_access))
        .branch(dptree::case![BotCommand::Vpn].endpoint(cmd_access))
        .branch(dptree::case![BotCommand::Help].endpoint(cmd_help))
        .branch(dptree::case![BotCommand::Sync].endpoint(cmd_sync))
        .branch(dptree::case![BotCommand::Stats].endpoint(cmd_stats))
        .branch(dptree::case![BotCommand::Broadcast(text)].endpoint(cmd_broadcast))
}

pub async fn cmd_help(bot: Bot, msg: Message, state: BotState) -> HandlerResult {
    let mut text = String::from(
        "Команды:\n\
         /vpn — получить ссылку на подписку (нужно состоять в канале)\n\
         /start — то же самое",
    );
    if is_admin_message(&msg, &state) {
        text.push_str(
            "\n\nДля администраторов:\n\
             /sync — внеочередная сверка подписок\n\
             /stats — статистика аккаунтов панели\n\
             /broadcast <текст> — рассылка всем подписчикам",
        );
    }
    bot.send_message(msg.chat.id, text)
        .reply_markup(crate::bot::keyboards::user_menu())
        .await?;
    Ok(())
}

pub async fn cmd_access(bot: Bot, msg: Message, state: BotState) -> HandlerResult {
    let Some(user_id) = sender_user_id(&msg) else {
        tracing::warn!("Received access command without sender");
        return Ok(());
    };
    let display_name = sender_display_name(&msg).unwrap_or_default();
    tracing::info!(
        user_id = user_id,
        username = ?msg.from.as_ref().and_then(|u| u.username.as_deref()),
        "Access requested"
    );
    send_access(&bot, msg.chat.id, user_id, &display_name, &state).await
}

async fn cmd_sync(bot: Bot, msg: Message, state: BotState) -> HandlerResult {
    if !is_admin_message(&msg, &state) {
        return Ok(());
    }
    tracing::info!(admin_id = ?sender_user_id(&msg), "Admin command /sync");

    let text = match state.reconciler.run_pass(Utc::now(), &state.shutdown).await {
        Ok(outcome) => render_pass_outcome(&outcome),
        Err(error) => {
            tracing::error!(error = %error, "Manual reconciliation pass aborted");
            format!("❌ Сверка прервана: {}", error)
        }
    };
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

async fn cmd_stats(bot: Bot, msg: Message, state: BotState) -> HandlerResult {
    if !is_admin_message(&msg, &state) {
        return Ok(());
    }
    let store = state.reconciler.store();
    let token = store.authenticate().await?;
    let stats = partition(store.list_accounts(&token).await?).stats();
    bot.send_message(msg.chat.id, render_stats(&stats)).await?;
    Ok(())
}

async fn cmd_broadcast(bot: Bot, msg: Message, state: BotState, text: String) -> HandlerResult {
    if !is_admin_message(&msg, &state) {
        return Ok(());
    }
    let Some(text) = broadcast_text(&text) else {
        bot.send_message(msg.chat.id, "Использование: /broadcast <текст>")
            .await?;
        return Ok(());
    };

    let store = state.reconciler.store();
    let token = store.authenticate().await?;
    let recipients = partition(store.list_accounts(&token).await?).managed;
    tracing::info!(
        admin_id = ?sender_user_id(&msg),
        recipients = recipients.len(),
        "Broadcast started"
    );

    let mut delivered = 0usize;
    let mut failed = 0usize;
    for account in &recipients {
        match bot.send_message(ChatId(account.user_id), text).await {
            Ok(_) => delivered += 1,
            Err(error) => {
                failed += 1;
                tracing::debug!(
                    user_id = account.user_id,
                    error = %error,
                    "Broadcast message not delivered"
                );
            }
        }
        tokio::time::sleep(BROADCAST_PAUSE).await;
    }

    tracing::info!(delivered, failed, "Broadcast finished");
    bot.send_message(
        msg.chat.id,
        format!("📣 Рассылка завершена\nДоставлено: {}\nОшибок: {}", delivered, failed),
    )
    .await?;
    Ok(())
}

/// Пустой текст не рассылается.
fn broadcast_text(raw: &str) -> Option<&str> {
    let text = raw.trim();
    (!text.is_empty()).then_some(text)
}
