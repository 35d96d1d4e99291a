use super::shared::{
    HandlerResult, cached_subscription_url, callback_chat_id, callback_prefix_filter, redirect_base,
};
use super::state::BotState;
use crate::bot::keyboards::APPS_PREFIX;
use teloxide::dptree;
use teloxide::prelude::*;

const PROFILE_NAME: &str = "VPN";

pub fn handler() -> teloxide::dispatching::UpdateHandler<Box<dyn std::error::Error + Send + Sync + 'static>> {
    Update::filter_callback_query()
        .branch(dptree::filter_map(callback_prefix_filter(APPS_PREFIX)).endpoint(callback_apps))
}

async fn callback_apps(bot: Bot, q: CallbackQuery, state: BotState) -> HandlerResult {
    let user_id = q.from.id.0 as i64;
    let system = q
        .data
        .as_deref()
        .and_then(|data| data.strip_prefix(APPS_PREFIX))
        .unwrap_or("");

    let Some(base) = redirect_base(&state) else {
        bot.answer_callback_query(q.id.clone())
            .text("Быстрый импорт сейчас недоступен")
            .await?;
        return Ok(());
    };
    let Some(subscription_url) = cached_subscription_url(&state, user_id).await else {
        bot.answer_callback_query(q.id.clone())
            .text("Сначала получите ссылку кнопкой «🔗 Моя ссылка»")
            .show_alert(true)
            .await?;
        return Ok(());
    };
    let Some(keyboard) =
        crate::bot::keyboards::app_buttons(system, base, &subscription_url, PROFILE_NAME)
    else {
        tracing::warn!(user_id, system = %system, "Unknown platform in callback");
        bot.answer_callback_query(q.id.clone())
            .text("Неизвестная платформа")
            .await?;
        return Ok(());
    };

    bot.answer_callback_query(q.id.clone()).await?;
    bot.send_message(
        callback_chat_id(&q),
        "Выберите приложение. Если оно не установлено, сначала установите его.",
    )
    .reply_markup(keyboard)
    .await?;
    Ok(())
}
