//! Выдача ссылки доступа: существующая подписка или новая на один срок.

use crate::account::username_for;
use crate::panel::{PanelError, SubscriptionStore};
use chrono::{TimeDelta, Utc};

pub struct Provisioner<S> {
    store: S,
    term: TimeDelta,
}

impl<S: SubscriptionStore> Provisioner<S> {
    pub fn new(store: S, term: TimeDelta) -> Self {
        Self { store, term }
    }

    /// Проверку членства делает вызывающий. Существующий аккаунт не продлевается.
    pub async fn access_url(&self, user_id: i64, display_name: &str) -> Result<String, PanelError> {
        let token = self.store.authenticate().await?;
        let username = username_for(user_id);

        let account = match self.store.find_account(&username, &token).await? {
            Some(existing) => {
                tracing::debug!(user_id, username = %username, "Returning existing subscription");
                existing
            }
            None => {
                let expires_at = Utc::now() + self.term;
                let created = self
                    .store
                    .create(user_id, display_name, expires_at, &token)
                    .await?;
                tracing::info!(
                    user_id,
                    username = %created.username,
                    expires_at = %expires_at,
                    "Subscription provisioned"
                );
                created
            }
        };
        Ok(self.store.subscription_url(&account.subscription_url))
    }
}
