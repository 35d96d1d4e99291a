//! Клавиатуры бота: inline и постоянные reply-кнопки.

use crate::link::{PLATFORMS, platform, redirect_link};
use reqwest::Url;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, KeyboardButton, KeyboardMarkup};

pub const BTN_USER_LINK: &str = "🔗 Моя ссылка";
pub const BTN_USER_APPS: &str = "📱 Приложения";
pub const BTN_USER_SUPPORT: &str = "🆘 Поддержка";

pub const APPS_PREFIX: &str = "apps:";

pub fn user_menu() -> KeyboardMarkup {
    KeyboardMarkup::new(vec![
        vec![
            KeyboardButton::new(BTN_USER_LINK),
            KeyboardButton::new(BTN_USER_APPS),
        ],
        vec![KeyboardButton::new(BTN_USER_SUPPORT)],
    ])
    .resize_keyboard()
    .persistent()
}

/// Кнопка на страницу подписки и, если есть редиректор, выбор платформы.
pub fn access_buttons(subscription_url: &str, with_apps: bool) -> InlineKeyboardMarkup {
    let mut keyboard = InlineKeyboardMarkup::default();
    if let Ok(url) = Url::parse(subscription_url) {
        keyboard = keyboard.append_row(vec![InlineKeyboardButton::url("📖 Открыть инструкцию", url)]);
    }
    if with_apps {
        keyboard = keyboard.append_row(platform_row());
    }
    keyboard
}

pub fn platform_buttons() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::default().append_row(platform_row())
}

fn platform_row() -> Vec<InlineKeyboardButton> {
    PLATFORMS
        .iter()
        .map(|p| InlineKeyboardButton::callback(p.label, format!("{}{}", APPS_PREFIX, p.system)))
        .collect()
}

/// Кнопки приложений платформы, по одной в ряд. `None` для неизвестной платформы.
pub fn app_buttons(
    system: &str,
    redirect_base: &str,
    subscription_url: &str,
    profile_name: &str,
) -> Option<InlineKeyboardMarkup> {
    let platform = platform(system)?;
    let mut keyboard = InlineKeyboardMarkup::default();
    for app in platform.apps {
        let link = redirect_link(redirect_base, system, app.app, subscription_url, profile_name);
        match Url::parse(&link) {
            Ok(url) => {
                keyboard = keyboard.append_row(vec![InlineKeyboardButton::url(app.label, url)]);
            }
            Err(error) => {
                tracing::warn!(link = %link, error = %error, "Skipping malformed redirect link");
            }
        }
    }
    Some(keyboard)
}

pub fn join_button(join_url: Option<&str>) -> InlineKeyboardMarkup {
    match join_url.and_then(|raw| Url::parse(raw).ok()) {
        Some(url) => InlineKeyboardMarkup::default()
            .append_row(vec![InlineKeyboardButton::url("⭐ Оформить подписку", url)]),
        None => InlineKeyboardMarkup::default(),
    }
}
