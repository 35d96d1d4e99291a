//! Периодический запуск сверки: один отложенный проход после старта, затем по интервалу.

use crate::membership::MembershipGateway;
use crate::panel::SubscriptionStore;
use crate::reconcile::{PassOutcome, Reconciler};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Запускает цикл сверки в отдельной задаче. Проходы идут последовательно внутри
/// задачи, тики во время прохода пропускаются.
pub fn spawn<S, M>(
    reconciler: Arc<Reconciler<S, M>>,
    initial_delay: Duration,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()>
where
    S: SubscriptionStore + 'static,
    M: MembershipGateway + 'static,
{
    tokio::spawn(run(reconciler, initial_delay, interval, shutdown))
}

async fn run<S, M>(
    reconciler: Arc<Reconciler<S, M>>,
    initial_delay: Duration,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) where
    S: SubscriptionStore,
    M: MembershipGateway,
{
    tracing::info!(
        initial_delay_secs = initial_delay.as_secs(),
        interval_secs = interval.as_secs(),
        "Reconciliation scheduler started"
    );
    let mut ticker = tokio::time::interval_at(Instant::now() + initial_delay, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                run_once(&reconciler, &shutdown).await;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    tracing::info!("Reconciliation scheduler stopped");
}

async fn run_once<S, M>(reconciler: &Reconciler<S, M>, shutdown: &watch::Receiver<bool>)
where
    S: SubscriptionStore,
    M: MembershipGateway,
{
    match reconciler.run_pass(Utc::now(), shutdown).await {
        Ok(PassOutcome::Completed(_)) => {}
        Ok(PassOutcome::Busy) => {
            tracing::debug!("Scheduled pass skipped, another pass is running");
        }
        Err(error) => {
            tracing::error!(error = %error, "Reconciliation pass aborted");
        }
    }
}
