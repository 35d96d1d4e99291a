use crate::account::PanelStats;
use crate::reconcile::{PassOutcome, PassReport};
use chrono::{DateTime, Local, Utc};

pub const PROVISION_FAILED_TEXT: &str = "Не удалось получить ссылку, попробуйте позже.";
pub const MEMBERSHIP_UNKNOWN_TEXT: &str =
    "Не получилось проверить подписку на канал. Попробуйте ещё раз через пару минут.";

pub fn format_timestamp(ts: i64) -> String {
    DateTime::<Utc>::from_timestamp(ts, 0)
        .map(|dt| {
            dt.with_timezone(&Local)
                .format("%Y-%m-%d %H:%M:%S %:z")
                .to_string()
        })
        .unwrap_or_else(|| format!("Некорректный timestamp: {}", ts))
}

pub fn access_text(display_name: &str, subscription_url: &str) -> String {
    format!(
        "Привет, {}!\n\n\
         Твоя персональная ссылка на подписку:\n{}\n\n\
         Подробная настройка по кнопке ниже. Приложения для своей платформы можно \
         выбрать там же или через «📱 Приложения».",
        display_name, subscription_url
    )
}

pub fn not_member_text(support_contacts: Option<&str>) -> String {
    let mut text = String::from(
        "Ой, а ты не состоишь в нашем чате для подписчиков.\n\
         Чтобы попасть в него, оформи подписку по кнопке ниже.",
    );
    if let Some(contacts) = support_contacts.filter(|c| !c.trim().is_empty()) {
        text.push_str(
            "\n\nЕсли ты уже в чате, но ссылку получить не выходит, напиши: ",
        );
        text.push_str(contacts.trim());
    }
    text
}

pub fn render_pass_outcome(outcome: &PassOutcome) -> String {
    match outcome {
        PassOutcome::Busy => "⏳ Сверка уже идёт, дождитесь её окончания.".to_string(),
        PassOutcome::Completed(report) => render_pass_report(report),
    }
}

pub fn render_pass_report(report: &PassReport) -> String {
    let mut text = format!(
        "🔄 Сверка завершена\n\n\
         Наших аккаунтов: {}\n\
         Чужих: {}\n\
         Не истекли: {}\n\
         Продлено: {}\n\
         Удалено: {}\n\
         В льготном периоде: {}\n\
         Не удалось проверить: {}\n\
         Ошибок панели: {}",
        report.managed,
        report.foreign,
        report.active,
        report.renewed,
        report.removed,
        report.grace,
        report.inconclusive,
        report.failed,
    );
    if report.cancelled {
        text.push_str("\n\n⚠️ Прервана остановкой бота.");
    }
    text
}

pub fn render_stats(stats: &PanelStats) -> String {
    format!(
        "📊 Статистика панели:\n\
         Аккаунтов бота: {}\n\
         Активные: {}\n\
         Истёкшие: {}\n\
         Прочие статусы: {}\n\
         Чужие аккаунты: {}",
        stats.managed, stats.active, stats.expired, stats.other, stats.foreign
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_member_text_mentions_contacts_when_present() {
        assert!(not_member_text(Some("@a @b")).ends_with("@a @b"));
        assert!(!not_member_text(None).contains("напиши"));
        assert!(!not_member_text(Some("  ")).contains("напиши"));
    }

    #[test]
    fn pass_report_flags_cancellation() {
        let report = PassReport {
            managed: 3,
            renewed: 1,
            cancelled: true,
            ..PassReport::default()
        };
        let text = render_pass_outcome(&PassOutcome::Completed(report));
        assert!(text.contains("Продлено: 1"));
        assert!(text.contains("Прервана"));
        assert!(render_pass_outcome(&PassOutcome::Busy).contains("уже идёт"));
    }
}
