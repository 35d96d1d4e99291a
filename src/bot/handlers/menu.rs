use super::shared::{
    HandlerResult, cached_subscription_url, mark_user_awaiting_support, redirect_base,
    relay_to_support, send_access, take_awaiting_support,
};
use super::state::{BotState, sender_display_name, sender_user_id};
use teloxide::prelude::*;

pub async fn handle_menu_buttons(bot: Bot, msg: Message, state: BotState) -> HandlerResult {
    let Some(user_id) = sender_user_id(&msg) else {
        return Ok(());
    };

    match msg.text() {
        Some(crate::bot::keyboards::BTN_USER_LINK) => {
            take_awaiting_support(&state, user_id).await;
            let display_name = sender_display_name(&msg).unwrap_or_default();
            send_access(&bot, msg.chat.id, user_id, &display_name, &state).await?;
        }
        Some(crate::bot::keyboards::BTN_USER_APPS) => {
            take_awaiting_support(&state, user_id).await;
            show_platforms(&bot, &msg, user_id, &state).await?;
        }
        Some(crate::bot::keyboards::BTN_USER_SUPPORT) => {
            mark_user_awaiting_support(&state, user_id).await;
            bot.send_message(
                msg.chat.id,
                "Опишите проблему одним сообщением, и мы передадим его в поддержку.",
            )
            .reply_markup(crate::bot::keyboards::user_menu())
            .await?;
        }
        _ => {
            if take_awaiting_support(&state, user_id).await {
                relay_to_support(&bot, &msg, user_id, &state).await?;
            } else {
                bot.send_message(msg.chat.id, "Не понял запрос. Используйте кнопки меню ниже.")
                    .reply_markup(crate::bot::keyboards::user_menu())
                    .await?;
            }
        }
    }
    Ok(())
}

async fn show_platforms(bot: &Bot, msg: &Message, user_id: i64, state: &BotState) -> HandlerResult {
    if redirect_base(state).is_none() {
        bot.send_message(
            msg.chat.id,
            "Быстрый импорт в приложения недоступен. Откройте инструкцию по ссылке из «🔗 Моя ссылка».",
        )
        .reply_markup(crate::bot::keyboards::user_menu())
        .await?;
        return Ok(());
    }
    if cached_subscription_url(state, user_id).await.is_none() {
        bot.send_message(msg.chat.id, "Сначала получите ссылку кнопкой «🔗 Моя ссылка».")
            .reply_markup(crate::bot::keyboards::user_menu())
            .await?;
        return Ok(());
    }
    bot.send_message(msg.chat.id, "Выберите платформу:")
        .reply_markup(crate::bot::keyboards::platform_buttons())
        .await?;
    Ok(())
}
