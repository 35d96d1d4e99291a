use super::format::{
    MEMBERSHIP_UNKNOWN_TEXT, PROVISION_FAILED_TEXT, access_text, format_timestamp, not_member_text,
};
use super::state::BotState;
use crate::membership::{Membership, MembershipGateway};
use image::{DynamicImage, ImageFormat, Luma};
use qrcode::QrCode;
use std::io::Cursor;
use teloxide::prelude::*;
use teloxide::types::InputFile;

pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Заголовок сообщения в чате поддержки; по нему ответ сотрудника находит пользователя.
pub const SUPPORT_HEADER_PREFIX: &str = "#id";

/// Пользователь, которому адресован ответ из чата поддержки.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupportTarget(pub i64);

pub fn build_user_qr_png_bytes(payload: &str) -> Result<Vec<u8>, anyhow::Error> {
    let qr = QrCode::new(payload.as_bytes())?;
    let image = qr
        .render::<Luma<u8>>()
        .quiet_zone(true)
        .min_dimensions(512, 512)
        .build();
    let mut bytes = Vec::new();
    {
        let mut cursor = Cursor::new(&mut bytes);
        DynamicImage::ImageLuma8(image).write_to(&mut cursor, ImageFormat::Png)?;
    }
    Ok(bytes)
}

pub fn callback_prefix_filter(prefix: &'static str) -> impl Fn(CallbackQuery) -> Option<CallbackQuery> {
    move |q: CallbackQuery| {
        if q.data.as_deref().is_some_and(|payload| payload.starts_with(prefix)) {
            Some(q)
        } else {
            None
        }
    }
}

pub fn callback_chat_id(q: &CallbackQuery) -> ChatId {
    q.message
        .as_ref()
        .map(|msg| msg.chat().id)
        .unwrap_or(ChatId(q.from.id.0 as i64))
}

pub fn redirect_base(state: &BotState) -> Option<&str> {
    state
        .config
        .redirect
        .base_url
        .as_deref()
        .filter(|base| !base.trim().is_empty())
}

/// Проверка членства и выдача ссылки по `/start`, `/vpn` и кнопке «Моя ссылка».
pub async fn send_access(
    bot: &Bot,
    chat_id: ChatId,
    user_id: i64,
    display_name: &str,
    state: &BotState,
) -> HandlerResult {
    match state.membership.membership(user_id).await {
        Membership::Member => {}
        Membership::NotMember => {
            tracing::info!(user_id, "Access refused, user is not in the channel");
            bot.send_message(
                chat_id,
                not_member_text(state.config.support_contacts.as_deref()),
            )
            .reply_markup(crate::bot::keyboards::join_button(
                state.config.join_url.as_deref(),
            ))
            .await?;
            return Ok(());
        }
        Membership::Unknown => {
            bot.send_message(chat_id, MEMBERSHIP_UNKNOWN_TEXT)
                .reply_markup(crate::bot::keyboards::user_menu())
                .await?;
            return Ok(());
        }
    }

    let url = match state.provisioner.access_url(user_id, display_name).await {
        Ok(url) => url,
        Err(error) => {
            tracing::error!(user_id, error = %error, "Failed to provision subscription");
            bot.send_message(chat_id, PROVISION_FAILED_TEXT)
                .reply_markup(crate::bot::keyboards::user_menu())
                .await?;
            return Ok(());
        }
    };
    state.sessions.lock().await.insert(user_id, url.clone());

    bot.send_message(chat_id, access_text(display_name, &url))
        .reply_markup(crate::bot::keyboards::access_buttons(
            &url,
            redirect_base(state).is_some(),
        ))
        .await?;

    match build_user_qr_png_bytes(&url) {
        Ok(qr_png) => {
            bot.send_photo(
                chat_id,
                InputFile::memory(qr_png).file_name(format!("subscription-{}.png", user_id)),
            )
            .caption("QR-код подписки: отсканируйте его в приложении.")
            .reply_markup(crate::bot::keyboards::user_menu())
            .await?;
        }
        Err(error) => {
            tracing::warn!(user_id, error = %error, "Failed to render subscription QR");
        }
    }
    Ok(())
}

pub async fn cached_subscription_url(state: &BotState, user_id: i64) -> Option<String> {
    state.sessions.lock().await.get(&user_id).cloned()
}

pub async fn mark_user_awaiting_support(state: &BotState, user_id: i64) {
    state.awaiting_support.lock().await.insert(user_id);
}

/// Снимает отметку и сообщает, стояла ли она.
pub async fn take_awaiting_support(state: &BotState, user_id: i64) -> bool {
    state.awaiting_support.lock().await.remove(&user_id)
}

pub fn support_header(user_id: i64, display_name: &str, username: Option<&str>, sent_at: i64) -> String {
    format!(
        "{}{}\n{}{}\n{}",
        SUPPORT_HEADER_PREFIX,
        user_id,
        display_name,
        username.map(|u| format!(" (@{})", u)).unwrap_or_default(),
        format_timestamp(sent_at),
    )
}

/// User id из первой строки заголовка `#id<цифры>`.
pub fn parse_support_header(text: &str) -> Option<i64> {
    let first = text.lines().next()?.trim();
    let digits = first.strip_prefix(SUPPORT_HEADER_PREFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Пересылает обращение пользователя в чат поддержки.
pub async fn relay_to_support(bot: &Bot, msg: &Message, user_id: i64, state: &BotState) -> HandlerResult {
    let Some(support_chat_id) = state.config.support_chat_id else {
        bot.send_message(
            msg.chat.id,
            support_unavailable_text(state.config.support_contacts.as_deref()),
        )
        .reply_markup(crate::bot::keyboards::user_menu())
        .await?;
        return Ok(());
    };
    let Some(body) = msg.text().or(msg.caption()) else {
        bot.send_message(msg.chat.id, "Пока принимаем только текст. Опишите проблему словами.")
            .reply_markup(crate::bot::keyboards::user_menu())
            .await?;
        mark_user_awaiting_support(state, user_id).await;
        return Ok(());
    };

    let user = msg.from.as_ref();
    let display_name = user.map(|u| u.full_name()).unwrap_or_default();
    let header = support_header(
        user_id,
        &display_name,
        user.and_then(|u| u.username.as_deref()),
        msg.date.timestamp(),
    );
    bot.send_message(ChatId(support_chat_id), format!("{}\n\n{}", header, body))
        .await?;
    tracing::info!(user_id, "Support request relayed");

    bot.send_message(msg.chat.id, "Сообщение передано в поддержку. Ответ придёт сюда.")
        .reply_markup(crate::bot::keyboards::user_menu())
        .await?;
    Ok(())
}

fn support_unavailable_text(contacts: Option<&str>) -> String {
    match contacts.filter(|c| !c.trim().is_empty()) {
        Some(contacts) => format!("Напишите в поддержку напрямую: {}", contacts.trim()),
        None => "Поддержка сейчас недоступна, попробуйте позже.".to_string(),
    }
}

/// Ответ сотрудника в чате поддержки на пересланное обращение.
pub fn support_reply_target(msg: &Message, state: &BotState) -> Option<SupportTarget> {
    let support_chat_id = state.config.support_chat_id?;
    if msg.chat.id != ChatId(support_chat_id) {
        return None;
    }
    let original = msg.reply_to_message()?;
    parse_support_header(original.text()?).map(SupportTarget)
}
