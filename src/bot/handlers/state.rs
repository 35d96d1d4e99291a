use crate::config::Config;
use crate::membership::TelegramMembership;
use crate::panel::MarzbanClient;
use crate::provision::Provisioner;
use crate::reconcile::Reconciler;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use teloxide::types::Message;
use tokio::sync::{Mutex, watch};

pub type Engine = Reconciler<MarzbanClient, TelegramMembership>;

#[derive(Clone)]
pub struct BotState {
    pub config: Arc<Config>,
    pub reconciler: Arc<Engine>,
    pub provisioner: Arc<Provisioner<MarzbanClient>>,
    pub membership: TelegramMembership,
    /// Последняя выданная ссылка по user id; нужна кнопкам приложений.
    pub sessions: Arc<Mutex<HashMap<i64, String>>>,
    pub awaiting_support: Arc<Mutex<HashSet<i64>>>,
    pub shutdown: watch::Receiver<bool>,
}

impl BotState {
    pub fn new(
        config: Arc<Config>,
        reconciler: Arc<Engine>,
        provisioner: Arc<Provisioner<MarzbanClient>>,
        membership: TelegramMembership,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            reconciler,
            provisioner,
            membership,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            awaiting_support: Arc::new(Mutex::new(HashSet::new())),
            shutdown,
        }
    }
}

pub fn sender_user_id(msg: &Message) -> Option<i64> {
    msg.from.as_ref().map(|user| user.id.0 as i64)
}

pub fn sender_display_name(msg: &Message) -> Option<String> {
    msg.from.as_ref().map(|user| {
        let mut full_name = user.first_name.clone();
        if let Some(last_name) = user.last_name.as_deref()
            && !last_name.trim().is_empty()
        {
            full_name.push(' ');
            full_name.push_str(last_name);
        }
        full_name
    })
}

pub fn is_admin_message(msg: &Message, state: &BotState) -> bool {
    sender_user_id(msg).is_some_and(|user_id| state.config.is_admin(user_id))
}
