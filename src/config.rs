//! Конфигурация бота: TOML-файл плюс переопределения из переменных окружения.

use crate::reconcile::{RenewFrom, RenewalPolicy};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Не удалось прочитать конфиг {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("Некорректный TOML в конфиге: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Не задан обязательный параметр {0}")]
    Missing(&'static str),
    #[error("Некорректное значение {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PanelConfig {
    pub address: String,
    pub username: String,
    pub password: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TemplateConfig {
    pub proxies: serde_json::Value,
    pub inbounds: serde_json::Value,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            proxies: serde_json::json!({ "vless": { "flow": "xtls-rprx-vision" } }),
            inbounds: serde_json::json!({ "vless": ["VLESS TCP REALITY", "VLESS H2 REALITY"] }),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RedirectConfig {
    /// Порт встроенного редиректора; без него HTTP-сервис не поднимается.
    pub listen_port: Option<u16>,
    /// Публичный адрес редиректора для кнопок приложений.
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bot_token: Option<String>,
    pub target_channel: Option<i64>,
    pub check_interval_minutes: Option<u64>,
    pub initial_delay_secs: Option<u64>,
    pub renew_from: RenewFrom,
    pub admin_ids: Vec<i64>,
    pub support_chat_id: Option<i64>,
    pub join_url: Option<String>,
    pub support_contacts: Option<String>,
    pub panel: PanelConfig,
    pub template: TemplateConfig,
    pub redirect: RedirectConfig,
}

const DEFAULT_INITIAL_DELAY_SECS: u64 = 10;
const DEFAULT_PANEL_TIMEOUT_SECS: u64 = 30;

impl Config {
    /// Читает файл (если он есть), применяет переменные окружения и проверяет
    /// обязательные параметры.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.display().to_string(),
                source,
            })?;
            toml::from_str::<Config>(&raw)?
        } else {
            tracing::warn!(
                path = %path.display(),
                "Config file not found, using environment only"
            );
            Config::default()
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let non_empty = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(value) = non_empty("BOT_TOKEN") {
            self.bot_token = Some(value);
        }
        if let Some(value) = non_empty("TARGET_CHANNEL") {
            self.target_channel = Some(parse_env("TARGET_CHANNEL", &value)?);
        }
        if let Some(value) = non_empty("CHECK_COOLDOWN") {
            self.check_interval_minutes = Some(parse_env("CHECK_COOLDOWN", &value)?);
        }
        if let Some(value) = non_empty("PANEL_ADDRESS") {
            self.panel.address = value;
        }
        if let Some(value) = non_empty("PANEL_USERNAME") {
            self.panel.username = value;
        }
        if let Some(value) = non_empty("PANEL_PASS") {
            self.panel.password = value;
        }
        if let Some(value) = non_empty("SUPPORT_CHAT") {
            self.support_chat_id = Some(parse_env("SUPPORT_CHAT", &value)?);
        }
        if let Some(value) = non_empty("REDIRECT_BASE_URL") {
            self.redirect.base_url = Some(value);
        }
        if let Some(value) = non_empty("PROXY_PORT") {
            self.redirect.listen_port = Some(parse_env("PROXY_PORT", &value)?);
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.bot_token.as_deref().is_none_or(|t| t.trim().is_empty()) {
            return Err(ConfigError::Missing("bot_token / BOT_TOKEN"));
        }
        if self.target_channel.is_none() {
            return Err(ConfigError::Missing("target_channel / TARGET_CHANNEL"));
        }
        self.check_interval()?;
        if self.panel.address.trim().is_empty() {
            return Err(ConfigError::Missing("panel.address / PANEL_ADDRESS"));
        }
        if self.panel.username.trim().is_empty() {
            return Err(ConfigError::Missing("panel.username / PANEL_USERNAME"));
        }
        if self.panel.password.is_empty() {
            return Err(ConfigError::Missing("panel.password / PANEL_PASS"));
        }
        Ok(())
    }

    pub fn bot_token(&self) -> Result<String, ConfigError> {
        self.bot_token
            .clone()
            .ok_or(ConfigError::Missing("bot_token / BOT_TOKEN"))
    }

    pub fn target_channel(&self) -> Result<i64, ConfigError> {
        self.target_channel
            .ok_or(ConfigError::Missing("target_channel / TARGET_CHANNEL"))
    }

    pub fn check_interval(&self) -> Result<Duration, ConfigError> {
        let minutes = self
            .check_interval_minutes
            .ok_or(ConfigError::Missing("check_interval_minutes / CHECK_COOLDOWN"))?;
        match minutes.checked_mul(60) {
            Some(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
            _ => Err(ConfigError::Invalid {
                name: "check_interval_minutes",
                value: minutes.to_string(),
            }),
        }
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs.unwrap_or(DEFAULT_INITIAL_DELAY_SECS))
    }

    pub fn panel_timeout(&self) -> Duration {
        let secs = match self.panel.request_timeout_secs {
            0 => DEFAULT_PANEL_TIMEOUT_SECS,
            secs => secs,
        };
        Duration::from_secs(secs)
    }

    pub fn renewal_policy(&self) -> RenewalPolicy {
        RenewalPolicy {
            renew_from: self.renew_from,
            ..RenewalPolicy::default()
        }
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admin_ids.contains(&user_id)
    }
}

fn parse_env<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::Invalid {
        name,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    const FULL: &str = r#"
bot_token = "123:abc"
target_channel = -1001
check_interval_minutes = 15
admin_ids = [7, 8]

[panel]
address = "https://panel.example.com"
username = "admin"
password = "secret"

[redirect]
base_url = "https://sub.example.com"
"#;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn loads_full_file() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        file.write_all(FULL.as_bytes()).expect("write config");

        let config = Config::load(file.path()).expect("config loads");
        assert_eq!(config.target_channel().expect("channel"), -1001);
        assert_eq!(
            config.check_interval().expect("interval"),
            Duration::from_secs(15 * 60)
        );
        assert_eq!(config.initial_delay(), Duration::from_secs(10));
        assert_eq!(config.panel_timeout(), Duration::from_secs(30));
        assert!(config.is_admin(7));
        assert!(!config.is_admin(9));
        assert_eq!(config.template.proxies["vless"]["flow"], "xtls-rprx-vision");
        assert_eq!(config.renewal_policy().renew_from, RenewFrom::Now);
    }

    #[test]
    fn environment_overrides_file_values() {
        let mut config: Config = toml::from_str(FULL).expect("parse");
        config
            .apply_env(env(&[
                ("TARGET_CHANNEL", "-1002"),
                ("CHECK_COOLDOWN", "5"),
                ("PANEL_PASS", "other"),
                ("PROXY_PORT", "8443"),
            ]))
            .expect("env applies");
        assert_eq!(config.target_channel, Some(-1002));
        assert_eq!(config.check_interval_minutes, Some(5));
        assert_eq!(config.panel.password, "other");
        assert_eq!(config.redirect.listen_port, Some(8443));
    }

    #[test]
    fn environment_alone_is_enough() {
        let mut config = Config::default();
        config
            .apply_env(env(&[
                ("BOT_TOKEN", "1:x"),
                ("TARGET_CHANNEL", "-100"),
                ("CHECK_COOLDOWN", "60"),
                ("PANEL_ADDRESS", "http://127.0.0.1:8000"),
                ("PANEL_USERNAME", "admin"),
                ("PANEL_PASS", "pw"),
            ]))
            .expect("env applies");
        config.validate().expect("valid");
    }

    #[test]
    fn missing_required_value_is_fatal() {
        let mut config: Config = toml::from_str(FULL).expect("parse");
        config.panel.password.clear();
        let error = config.validate().expect_err("password is required");
        assert!(matches!(error, ConfigError::Missing(name) if name.contains("PANEL_PASS")));

        let mut config: Config = toml::from_str(FULL).expect("parse");
        config.target_channel = None;
        assert!(matches!(config.validate(), Err(ConfigError::Missing(_))));
    }

    #[test]
    fn malformed_environment_value_is_rejected() {
        let mut config = Config::default();
        let error = config
            .apply_env(env(&[("TARGET_CHANNEL", "not-a-number")]))
            .expect_err("must fail");
        assert!(matches!(error, ConfigError::Invalid { name: "TARGET_CHANNEL", .. }));
    }

    #[test]
    fn renewal_anchor_is_configurable() {
        let raw = format!("renew_from = \"expiry\"\n{}", FULL);
        let config: Config = toml::from_str(&raw).expect("parse");
        assert_eq!(config.renewal_policy().renew_from, RenewFrom::Expiry);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let mut config: Config = toml::from_str(FULL).expect("parse");
        config.check_interval_minutes = Some(0);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn oversized_interval_is_rejected() {
        let mut config: Config = toml::from_str(FULL).expect("parse");
        config.check_interval_minutes = Some(u64::MAX);
        assert!(matches!(
            config.check_interval(),
            Err(ConfigError::Invalid { name: "check_interval_minutes", .. })
        ));
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }
}
