//! Чат поддержки и служебные сообщения целевого чата.

use super::shared::{HandlerResult, SupportTarget, support_reply_target};
use super::state::BotState;
use teloxide::prelude::*;

pub fn staff_reply_filter(msg: Message, state: BotState) -> Option<SupportTarget> {
    support_reply_target(&msg, &state)
}

/// Ответ сотрудника уходит пользователю; пустые ответы (стикеры и т.п.) пропускаются.
pub async fn relay_staff_reply(bot: Bot, msg: Message, target: SupportTarget) -> HandlerResult {
    let Some(text) = msg.text().or(msg.caption()) else {
        return Ok(());
    };
    match bot
        .send_message(ChatId(target.0), format!("💬 Ответ поддержки:\n\n{}", text))
        .await
    {
        Ok(_) => {
            tracing::info!(user_id = target.0, "Support reply delivered");
        }
        Err(error) => {
            tracing::warn!(user_id = target.0, error = %error, "Support reply not delivered");
            bot.send_message(msg.chat.id, format!("Не удалось доставить ответ: {}", error))
                .await?;
        }
    }
    Ok(())
}

pub fn is_join_leave_notice(msg: Message, state: BotState) -> bool {
    state
        .config
        .target_channel
        .is_some_and(|channel| msg.chat.id == ChatId(channel))
        && (msg.new_chat_members().is_some() || msg.left_chat_member().is_some())
}

/// Удаляет уведомления о входе и выходе участников.
pub async fn delete_join_leave_notice(bot: Bot, msg: Message) -> HandlerResult {
    if let Err(error) = bot.delete_message(msg.chat.id, msg.id).await {
        tracing::warn!(
            chat_id = msg.chat.id.0,
            error = %error,
            "Failed to delete service message"
        );
    }
    Ok(())
}
