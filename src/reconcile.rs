//! Сверка подписок: членство в канале против состояния аккаунтов панели.
//!
//! За один проход каждый управляемый аккаунт в статусе `expired` получает ровно
//! одно решение: продлить, удалить после льготного периода или оставить как есть.
//! Активные и чужие аккаунты не трогаются.

use crate::account::{ManagedAccount, partition};
use crate::membership::{Membership, MembershipGateway};
use crate::panel::{PanelError, PanelToken, SubscriptionStore};
use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;
use tokio::sync::{Mutex, watch};

/// Откуда отсчитывается новый срок при продлении.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenewFrom {
    #[default]
    Now,
    /// От прежней даты окончания, но не раньше, чем `now + term`, если та уже в прошлом.
    Expiry,
}

#[derive(Debug, Clone, Copy)]
pub struct RenewalPolicy {
    pub term: TimeDelta,
    pub grace: TimeDelta,
    pub renew_from: RenewFrom,
}

impl Default for RenewalPolicy {
    fn default() -> Self {
        Self {
            term: TimeDelta::days(31),
            grace: TimeDelta::days(30),
            renew_from: RenewFrom::Now,
        }
    }
}

impl RenewalPolicy {
    pub fn renewed_until(&self, account: &ManagedAccount, now: DateTime<Utc>) -> DateTime<Utc> {
        let from_now = now + self.term;
        match (self.renew_from, account.expires_at) {
            (RenewFrom::Expiry, Some(expires_at)) => {
                let from_expiry = expires_at + self.term;
                if from_expiry > now { from_expiry } else { from_now }
            }
            _ => from_now,
        }
    }

    /// Истёк ли льготный период. Без даты окончания аккаунт остаётся в льготе.
    pub fn grace_elapsed(&self, account: &ManagedAccount, now: DateTime<Utc>) -> bool {
        account
            .expires_at
            .is_some_and(|expires_at| now - expires_at > self.grace)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Renew { until: DateTime<Utc> },
    Remove,
    /// Пользователя нет в канале, но льготный период ещё идёт.
    Grace,
    /// Членство выяснить не удалось; в этом проходе ничего не делаем.
    Inconclusive,
}

/// Решение для истёкшего аккаунта по свежему факту членства.
pub fn decide_expired(
    account: &ManagedAccount,
    membership: Membership,
    now: DateTime<Utc>,
    policy: &RenewalPolicy,
) -> Decision {
    match membership {
        Membership::Member => Decision::Renew {
            until: policy.renewed_until(account, now),
        },
        Membership::Unknown => Decision::Inconclusive,
        Membership::NotMember if policy.grace_elapsed(account, now) => Decision::Remove,
        Membership::NotMember => Decision::Grace,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub managed: usize,
    pub foreign: usize,
    pub active: usize,
    pub renewed: usize,
    pub removed: usize,
    pub grace: usize,
    pub inconclusive: usize,
    pub failed: usize,
    pub cancelled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    Completed(PassReport),
    /// Предыдущий проход ещё идёт; этот пропущен.
    Busy,
}

pub struct Reconciler<S, M> {
    store: S,
    membership: M,
    policy: RenewalPolicy,
    pass_lock: Mutex<()>,
}

impl<S, M> Reconciler<S, M>
where
    S: SubscriptionStore,
    M: MembershipGateway,
{
    pub fn new(store: S, membership: M, policy: RenewalPolicy) -> Self {
        Self {
            store,
            membership,
            policy,
            pass_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Один проход по всему листингу панели.
    ///
    /// Ошибка авторизации или листинга прерывает проход до любых изменений.
    /// Ошибка изменения одного аккаунта логируется, проход продолжается.
    /// Сигнал остановки проверяется перед каждым аккаунтом.
    pub async fn run_pass(
        &self,
        now: DateTime<Utc>,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<PassOutcome, PanelError> {
        let Ok(_guard) = self.pass_lock.try_lock() else {
            tracing::warn!("Reconciliation pass already running, skipping");
            return Ok(PassOutcome::Busy);
        };

        let token = self.store.authenticate().await?;
        let split = partition(self.store.list_accounts(&token).await?);

        let mut report = PassReport {
            managed: split.managed.len(),
            foreign: split.foreign.len(),
            ..PassReport::default()
        };

        for account in &split.managed {
            if *shutdown.borrow() {
                report.cancelled = true;
                tracing::info!("Shutdown requested, leaving the rest of the pass");
                break;
            }
            self.reconcile_account(account, now, &token, &mut report)
                .await;
        }

        tracing::info!(
            managed = report.managed,
            foreign = report.foreign,
            active = report.active,
            renewed = report.renewed,
            removed = report.removed,
            grace = report.grace,
            inconclusive = report.inconclusive,
            failed = report.failed,
            cancelled = report.cancelled,
            "Reconciliation pass finished"
        );
        Ok(PassOutcome::Completed(report))
    }

    async fn reconcile_account(
        &self,
        account: &ManagedAccount,
        now: DateTime<Utc>,
        token: &PanelToken,
        report: &mut PassReport,
    ) {
        if !account.is_expired() {
            report.active += 1;
            return;
        }

        let membership = self.membership.membership(account.user_id).await;
        match decide_expired(account, membership, now, &self.policy) {
            Decision::Renew { until } => {
                match self.store.renew(account, until, token).await {
                    Ok(()) => {
                        report.renewed += 1;
                        tracing::info!(
                            username = %account.username,
                            until = %until,
                            "Subscription renewed"
                        );
                    }
                    Err(PanelError::NotFound) => {
                        tracing::debug!(
                            username = %account.username,
                            "Account vanished before renewal"
                        );
                    }
                    Err(error) => {
                        report.failed += 1;
                        tracing::error!(
                            username = %account.username,
                            error = %error,
                            "Failed to renew subscription"
                        );
                    }
                }
            }
            Decision::Remove => match self.store.remove(account, token).await {
                Ok(()) => {
                    report.removed += 1;
                    tracing::info!(
                        username = %account.username,
                        expired_at = ?account.expires_at,
                        "Subscription removed after grace period"
                    );
                }
                Err(error) => {
                    report.failed += 1;
                    tracing::error!(
                        username = %account.username,
                        error = %error,
                        "Failed to remove subscription"
                    );
                }
            },
            Decision::Grace => {
                report.grace += 1;
                tracing::debug!(
                    username = %account.username,
                    "User not in channel, account kept within grace period"
                );
            }
            Decision::Inconclusive => {
                report.inconclusive += 1;
                tracing::warn!(
                    username = %account.username,
                    "Membership inconclusive, account left untouched"
                );
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Фейки панели и Bot API для тестов движка и выдачи ссылок.

    use super::*;
    use crate::account::{AccountStatus, PanelAccount, username_for};
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex as StdMutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        Authenticate,
        List,
        Find(String),
        Create(String),
        Renew(String, i64),
        Remove(String),
    }

    #[derive(Default)]
    pub struct FakeStore {
        pub accounts: StdMutex<Vec<PanelAccount>>,
        pub calls: StdMutex<Vec<Call>>,
        pub fail_auth: bool,
        pub fail_list: bool,
        pub fail_find: bool,
        pub fail_create: bool,
        pub fail_mutations_for: HashSet<String>,
        /// Попадают в листинг, но исчезают из панели сразу после него.
        pub vanished: HashSet<String>,
    }

    impl FakeStore {
        pub fn with_accounts(accounts: Vec<PanelAccount>) -> Self {
            Self {
                accounts: StdMutex::new(accounts),
                ..Self::default()
            }
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().expect("calls lock").clone()
        }

        pub fn mutations(&self) -> Vec<Call> {
            self.calls()
                .into_iter()
                .filter(|c| matches!(c, Call::Renew(..) | Call::Remove(_) | Call::Create(_)))
                .collect()
        }

        pub fn account(&self, username: &str) -> Option<PanelAccount> {
            self.accounts
                .lock()
                .expect("accounts lock")
                .iter()
                .find(|a| a.username == username)
                .cloned()
        }

        fn record(&self, call: Call) {
            self.calls.lock().expect("calls lock").push(call);
        }

        fn boom() -> PanelError {
            PanelError::Status {
                status: 502,
                body: "bad gateway".to_string(),
            }
        }
    }

    #[async_trait]
    impl SubscriptionStore for FakeStore {
        async fn authenticate(&self) -> Result<PanelToken, PanelError> {
            self.record(Call::Authenticate);
            if self.fail_auth {
                return Err(Self::boom());
            }
            Ok(PanelToken::new("fake"))
        }

        async fn list_accounts(&self, _token: &PanelToken) -> Result<Vec<PanelAccount>, PanelError> {
            self.record(Call::List);
            if self.fail_list {
                return Err(Self::boom());
            }
            let mut accounts = self.accounts.lock().expect("accounts lock");
            let listed = accounts.clone();
            accounts.retain(|a| !self.vanished.contains(&a.username));
            Ok(listed)
        }

        async fn find_account(
            &self,
            username: &str,
            _token: &PanelToken,
        ) -> Result<Option<PanelAccount>, PanelError> {
            self.record(Call::Find(username.to_string()));
            if self.fail_find {
                return Err(Self::boom());
            }
            Ok(self.account(username))
        }

        async fn create(
            &self,
            user_id: i64,
            display_name: &str,
            expires_at: DateTime<Utc>,
            _token: &PanelToken,
        ) -> Result<PanelAccount, PanelError> {
            let username = username_for(user_id);
            self.record(Call::Create(username.clone()));
            if self.fail_create {
                return Err(Self::boom());
            }
            let account = panel_account(
                &username,
                AccountStatus::Active,
                Some(expires_at),
                Some(display_name),
            );
            self.accounts
                .lock()
                .expect("accounts lock")
                .push(account.clone());
            Ok(account)
        }

        async fn renew(
            &self,
            account: &ManagedAccount,
            expires_at: DateTime<Utc>,
            _token: &PanelToken,
        ) -> Result<(), PanelError> {
            self.record(Call::Renew(account.username.clone(), expires_at.timestamp()));
            if self.fail_mutations_for.contains(&account.username) {
                return Err(Self::boom());
            }
            let mut accounts = self.accounts.lock().expect("accounts lock");
            let stored = accounts
                .iter_mut()
                .find(|a| a.username == account.username)
                .ok_or(PanelError::NotFound)?;
            stored.status = AccountStatus::Active;
            stored.expire = Some(expires_at.timestamp());
            stored.proxies = account.proxies.clone();
            stored.inbounds = account.inbounds.clone();
            stored.data_limit = Some(0);
            stored.data_limit_reset_strategy = Some("no_reset".to_string());
            Ok(())
        }

        async fn remove(&self, account: &ManagedAccount, _token: &PanelToken) -> Result<(), PanelError> {
            self.record(Call::Remove(account.username.clone()));
            if self.fail_mutations_for.contains(&account.username) {
                return Err(Self::boom());
            }
            self.accounts
                .lock()
                .expect("accounts lock")
                .retain(|a| a.username != account.username);
            Ok(())
        }
    }

    /// Членство по таблице; неизвестный пользователь считается отсутствующим.
    #[derive(Default)]
    pub struct ScriptedMembership {
        pub facts: HashMap<i64, Membership>,
        pub queries: StdMutex<Vec<i64>>,
    }

    impl ScriptedMembership {
        pub fn new(facts: &[(i64, Membership)]) -> Self {
            Self {
                facts: facts.iter().copied().collect(),
                queries: StdMutex::new(Vec::new()),
            }
        }

        pub fn queries(&self) -> Vec<i64> {
            self.queries.lock().expect("queries lock").clone()
        }
    }

    #[async_trait]
    impl MembershipGateway for ScriptedMembership {
        async fn membership(&self, user_id: i64) -> Membership {
            self.queries.lock().expect("queries lock").push(user_id);
            self.facts
                .get(&user_id)
                .copied()
                .unwrap_or(Membership::NotMember)
        }
    }

    pub fn panel_account(
        username: &str,
        status: AccountStatus,
        expires_at: Option<DateTime<Utc>>,
        note: Option<&str>,
    ) -> PanelAccount {
        PanelAccount {
            username: username.to_string(),
            status,
            expire: expires_at.map(|t| t.timestamp()),
            proxies: serde_json::json!({
                "vless": { "id": format!("uuid-{}", username), "flow": "xtls-rprx-vision" }
            }),
            inbounds: serde_json::json!({ "vless": ["VLESS TCP REALITY", "VLESS H2 REALITY"] }),
            note: note.map(str::to_string),
            subscription_url: format!("/sub/{}", username),
            data_limit: Some(0),
            data_limit_reset_strategy: Some("no_reset".to_string()),
            used_traffic: Some(0),
        }
    }
}
