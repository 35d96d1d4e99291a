//! Модель аккаунтов панели и разбиение на управляемые ботом и чужие.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Префикс имени аккаунта, которым бот помечает свои подписки.
pub const MANAGED_PREFIX: &str = "SUB_";

pub fn username_for(user_id: i64) -> String {
    format!("{}{}", MANAGED_PREFIX, user_id)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Active,
    Expired,
    Disabled,
    Limited,
    OnHold,
    #[serde(other)]
    Unknown,
}

/// Аккаунт в том виде, в каком его отдаёт Marzban.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelAccount {
    pub username: String,
    pub status: AccountStatus,
    #[serde(default)]
    pub expire: Option<i64>,
    #[serde(default)]
    pub proxies: serde_json::Value,
    #[serde(default)]
    pub inbounds: serde_json::Value,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub subscription_url: String,
    #[serde(default)]
    pub data_limit: Option<i64>,
    #[serde(default)]
    pub data_limit_reset_strategy: Option<String>,
    #[serde(default)]
    pub used_traffic: Option<i64>,
}

/// Аккаунт, созданный ботом: имя `SUB_<telegram user id>`.
#[derive(Debug, Clone, PartialEq)]
pub struct ManagedAccount {
    pub user_id: i64,
    pub username: String,
    pub status: AccountStatus,
    pub expires_at: Option<DateTime<Utc>>,
    pub proxies: serde_json::Value,
    pub inbounds: serde_json::Value,
    pub note: Option<String>,
    pub subscription_url: String,
}

impl ManagedAccount {
    pub fn is_expired(&self) -> bool {
        self.status == AccountStatus::Expired
    }
}

/// Аккаунт, к которому бот отношения не имеет. Никогда не изменяется.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignAccount {
    pub username: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Account {
    Managed(ManagedAccount),
    Foreign(ForeignAccount),
}

/// Telegram-идентификатор из имени `SUB_<цифры>`. Имя должно совпадать
/// с тем, что выдаёт `username_for`, иначе аккаунт не наш.
pub fn parse_managed_user_id(username: &str) -> Option<i64> {
    let suffix = username.strip_prefix(MANAGED_PREFIX)?;
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let user_id = suffix.parse::<i64>().ok()?;
    (username_for(user_id) == username).then_some(user_id)
}

impl From<PanelAccount> for Account {
    fn from(raw: PanelAccount) -> Self {
        let Some(user_id) = parse_managed_user_id(&raw.username) else {
            return Account::Foreign(ForeignAccount {
                username: raw.username,
            });
        };
        Account::Managed(ManagedAccount {
            user_id,
            expires_at: raw
                .expire
                .filter(|ts| *ts > 0)
                .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0)),
            username: raw.username,
            status: raw.status,
            proxies: raw.proxies,
            inbounds: raw.inbounds,
            note: raw.note,
            subscription_url: raw.subscription_url,
        })
    }
}

/// Результат разбиения листинга панели.
#[derive(Debug, Default)]
pub struct Partition {
    pub managed: Vec<ManagedAccount>,
    pub foreign: Vec<ForeignAccount>,
}

/// Делит листинг на управляемые и чужие аккаунты, сохраняя порядок.
pub fn partition(accounts: Vec<PanelAccount>) -> Partition {
    let mut result = Partition::default();
    for raw in accounts {
        match Account::from(raw) {
            Account::Managed(account) => result.managed.push(account),
            Account::Foreign(account) => result.foreign.push(account),
        }
    }
    result
}

/// Сводка по листингу для админской команды `/stats`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PanelStats {
    pub managed: usize,
    pub foreign: usize,
    pub active: usize,
    pub expired: usize,
    pub other: usize,
}

impl Partition {
    pub fn stats(&self) -> PanelStats {
        let mut stats = PanelStats {
            managed: self.managed.len(),
            foreign: self.foreign.len(),
            ..PanelStats::default()
        };
        for account in &self.managed {
            match account.status {
                AccountStatus::Active => stats.active += 1,
                AccountStatus::Expired => stats.expired += 1,
                _ => stats.other += 1,
            }
        }
        stats
    }
}
