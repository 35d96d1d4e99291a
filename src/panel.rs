//! HTTP-клиент панели Marzban: токен, листинг, создание, продление, удаление.

use crate::account::{AccountStatus, ManagedAccount, PanelAccount, username_for};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

const LIST_PAGE_SIZE: usize = 500;
const NO_RESET: &str = "no_reset";

#[derive(Debug, Error)]
pub enum PanelError {
    #[error("Ошибка HTTP-запроса к панели: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Панель вернула {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Аккаунт не найден в панели")]
    NotFound,
    #[error("Некорректный ответ панели: {0}")]
    Decode(String),
}

/// Короткоживущий bearer-токен администратора панели.
#[derive(Clone)]
pub struct PanelToken(String);

impl PanelToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for PanelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PanelToken(***)")
    }
}

/// Хранилище подписок, с которым работают движок сверки и выдача ссылок.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn authenticate(&self) -> Result<PanelToken, PanelError>;

    /// Все аккаунты панели, включая чужие.
    async fn list_accounts(&self, token: &PanelToken) -> Result<Vec<PanelAccount>, PanelError>;

    async fn find_account(
        &self,
        username: &str,
        token: &PanelToken,
    ) -> Result<Option<PanelAccount>, PanelError>;

    async fn create(
        &self,
        user_id: i64,
        display_name: &str,
        expires_at: DateTime<Utc>,
        token: &PanelToken,
    ) -> Result<PanelAccount, PanelError>;

    /// Продлевает до `expires_at`, конфигурацию прокси переносит без изменений.
    async fn renew(
        &self,
        account: &ManagedAccount,
        expires_at: DateTime<Utc>,
        token: &PanelToken,
    ) -> Result<(), PanelError>;

    /// Безвозвратное удаление. Отсутствующий аккаунт считается уже удалённым.
    async fn remove(&self, account: &ManagedAccount, token: &PanelToken) -> Result<(), PanelError>;

    /// Ссылка подписки в виде, пригодном для отправки пользователю.
    fn subscription_url(&self, raw: &str) -> String {
        raw.to_string()
    }
}

/// Шаблон прокси и инбаундов для новых аккаунтов.
#[derive(Debug, Clone)]
pub struct AccountTemplate {
    pub proxies: serde_json::Value,
    pub inbounds: serde_json::Value,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct UsersPage {
    users: Vec<PanelAccount>,
    #[serde(default)]
    total: Option<usize>,
}

#[derive(Serialize)]
struct UserCreate<'a> {
    username: &'a str,
    note: &'a str,
    proxies: &'a serde_json::Value,
    inbounds: &'a serde_json::Value,
    expire: i64,
    data_limit: i64,
    data_limit_reset_strategy: &'static str,
    status: AccountStatus,
}

#[derive(Serialize)]
struct UserModify<'a> {
    proxies: &'a serde_json::Value,
    inbounds: &'a serde_json::Value,
    expire: i64,
    data_limit: i64,
    data_limit_reset_strategy: &'static str,
    status: AccountStatus,
}

#[derive(Clone)]
pub struct MarzbanClient {
    client: Client,
    base_url: String,
    username: String,
    password: String,
    template: AccountTemplate,
}

impl MarzbanClient {
    pub fn new(
        base_url: &str,
        username: impl Into<String>,
        password: impl Into<String>,
        template: AccountTemplate,
        timeout: Duration,
    ) -> Result<Self, PanelError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            username: username.into(),
            password: password.into(),
            template,
        })
    }

    fn user_url(&self, username: &str) -> String {
        format!(
            "{}/api/user/{}",
            self.base_url,
            urlencoding::encode(username)
        )
    }

    async fn check(response: Response) -> Result<Response, PanelError> {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(PanelError::NotFound);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PanelError::Status {
                status: status.as_u16(),
                body: body.chars().take(300).collect(),
            });
        }
        Ok(response)
    }

    async fn decode<T: for<'de> Deserialize<'de>>(response: Response) -> Result<T, PanelError> {
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| PanelError::Decode(e.to_string()))
    }
}

#[async_trait]
impl SubscriptionStore for MarzbanClient {
    async fn authenticate(&self) -> Result<PanelToken, PanelError> {
        let url = format!("{}/api/admin/token", self.base_url);
        let response = self
            .client
            .post(&url)
            .form(&[
                ("username", self.username.as_str()),
                ("password", self.password.as_str()),
            ])
            .send()
            .await?;
        let body: TokenResponse = Self::decode(Self::check(response).await?).await?;
        Ok(PanelToken::new(body.access_token))
    }

    async fn list_accounts(&self, token: &PanelToken) -> Result<Vec<PanelAccount>, PanelError> {
        let url = format!("{}/api/users", self.base_url);
        let mut accounts = Vec::new();
        loop {
            let offset = accounts.len();
            let response = self
                .client
                .get(&url)
                .bearer_auth(token.as_str())
                .query(&[("offset", offset), ("limit", LIST_PAGE_SIZE)])
                .send()
                .await?;
            let page: UsersPage = Self::decode(Self::check(response).await?).await?;
            let received = page.users.len();
            accounts.extend(page.users);

            let done = match page.total {
                Some(total) => accounts.len() >= total,
                None => true,
            };
            if done || received < LIST_PAGE_SIZE || received == 0 {
                break;
            }
        }
        tracing::debug!(count = accounts.len(), "Panel accounts listed");
        Ok(accounts)
    }

    async fn find_account(
        &self,
        username: &str,
        token: &PanelToken,
    ) -> Result<Option<PanelAccount>, PanelError> {
        let response = self
            .client
            .get(self.user_url(username))
            .bearer_auth(token.as_str())
            .send()
            .await?;
        match Self::check(response).await {
            Ok(response) => Ok(Some(Self::decode(response).await?)),
            Err(PanelError::NotFound) => Ok(None),
            Err(error) => Err(error),
        }
    }

    async fn create(
        &self,
        user_id: i64,
        display_name: &str,
        expires_at: DateTime<Utc>,
        token: &PanelToken,
    ) -> Result<PanelAccount, PanelError> {
        let username = username_for(user_id);
        let body = UserCreate {
            username: &username,
            note: display_name,
            proxies: &self.template.proxies,
            inbounds: &self.template.inbounds,
            expire: expires_at.timestamp(),
            data_limit: 0,
            data_limit_reset_strategy: NO_RESET,
            status: AccountStatus::Active,
        };
        let response = self
            .client
            .post(format!("{}/api/user", self.base_url))
            .bearer_auth(token.as_str())
            .json(&body)
            .send()
            .await?;
        let account: PanelAccount = Self::decode(Self::check(response).await?).await?;
        tracing::info!(username = %account.username, user_id, "Panel account created");
        Ok(account)
    }

    async fn renew(
        &self,
        account: &ManagedAccount,
        expires_at: DateTime<Utc>,
        token: &PanelToken,
    ) -> Result<(), PanelError> {
        let body = UserModify {
            proxies: &account.proxies,
            inbounds: &account.inbounds,
            expire: expires_at.timestamp(),
            data_limit: 0,
            data_limit_reset_strategy: NO_RESET,
            status: AccountStatus::Active,
        };
        let response = self
            .client
            .put(self.user_url(&account.username))
            .bearer_auth(token.as_str())
            .json(&body)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn remove(&self, account: &ManagedAccount, token: &PanelToken) -> Result<(), PanelError> {
        let response = self
            .client
            .delete(self.user_url(&account.username))
            .bearer_auth(token.as_str())
            .send()
            .await?;
        match Self::check(response).await {
            Ok(_) => Ok(()),
            Err(PanelError::NotFound) => {
                tracing::debug!(username = %account.username, "Account already absent from panel");
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    /// Marzban отдаёт относительную ссылку, если не задан префикс подписок.
    fn subscription_url(&self, raw: &str) -> String {
        if raw.starts_with('/') {
            format!("{}{}", self.base_url, raw)
        } else {
            raw.to_string()
        }
    }
}
