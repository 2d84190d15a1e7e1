//! Timer-driven cycle scheduling.
//!
//! Each cycle kind runs on its own interval. Daily and weekly ticks carry a
//! period key persisted in orchestrator state, so a duplicate firing for the
//! same calendar period (process restart, clock hiccup, doubled timer) is a
//! logged skip rather than a second run.

use crate::orchestrator::{CycleKind, Orchestrator, TriggerOutcome};

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};

use std::sync::Arc;

const DAILY_PERIOD_STATE: &str = "last_daily_period";
const WEEKLY_PERIOD_STATE: &str = "last_weekly_period";

/// Period key for a daily tick, one per calendar day.
pub fn daily_period_key(now: DateTime<Utc>) -> String {
    format!("daily:{}", now.format("%Y-%m-%d"))
}

/// Period key for a weekly tick, one per ISO week.
pub fn weekly_period_key(now: DateTime<Utc>) -> String {
    format!("weekly:{}", now.format("%G-W%V"))
}

/// State key holding the last period a cycle kind claimed, if the kind is
/// period-tracked at all.
pub(crate) fn period_state_key(kind: CycleKind) -> Option<&'static str> {
    match kind {
        CycleKind::Daily => Some(DAILY_PERIOD_STATE),
        CycleKind::WeeklyDeep => Some(WEEKLY_PERIOD_STATE),
        _ => None,
    }
}

/// Handle one daily or weekly timer tick. Returns true when a cycle was
/// actually started.
///
/// The period is claimed before the trigger and handed back when no cycle
/// ran, and the cycle body itself hands it back on failure, so a failed run
/// never burns its calendar period.
pub async fn run_periodic_tick(
    orchestrator: &Arc<Orchestrator>,
    kind: CycleKind,
    period_key: &str,
) -> Result<bool, crate::error::OrchestratorError> {
    let Some(state_key) = period_state_key(kind) else {
        return Ok(false);
    };
    let store = orchestrator.store();

    if store.get_state(state_key).await?.as_deref() == Some(period_key) {
        store
            .log_event(
                "orchestrator",
                &format!("{kind}_learning_skipped"),
                &format!("{kind} learning already ran for period {period_key}"),
                None,
            )
            .await?;
        return Ok(false);
    }

    store.set_state(state_key, period_key).await?;
    match orchestrator.trigger(kind, None).await? {
        TriggerOutcome::Accepted => Ok(true),
        TriggerOutcome::Busy => {
            store.clear_state(state_key).await?;
            store
                .log_event(
                    "orchestrator",
                    &format!("{kind}_learning_skipped"),
                    "previous learning cycle still in progress",
                    None,
                )
                .await?;
            Ok(false)
        }
        _ => {
            store.clear_state(state_key).await?;
            Ok(false)
        }
    }
}

/// Drive the daily, weekly, and incremental timers until shutdown.
pub fn spawn_scheduler_loop(orchestrator: Arc<Orchestrator>) -> JoinHandle<()> {
    let config = orchestrator.config().clone();
    tokio::spawn(async move {
        let mut daily = interval(Duration::from_secs(config.daily_interval_secs));
        let mut weekly = interval(Duration::from_secs(config.weekly_interval_secs));
        let mut incremental = interval(Duration::from_secs(config.incremental_interval_secs));
        for timer in [&mut daily, &mut weekly, &mut incremental] {
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // Intervals fire immediately on creation; discard the first tick
            // so startup does not launch every cycle at once.
            timer.tick().await;
        }

        loop {
            tokio::select! {
                _ = daily.tick() => {
                    let key = daily_period_key(Utc::now());
                    if let Err(error) =
                        run_periodic_tick(&orchestrator, CycleKind::Daily, &key).await
                    {
                        tracing::warn!(%error, "daily tick failed");
                    }
                }
                _ = weekly.tick() => {
                    let key = weekly_period_key(Utc::now());
                    if let Err(error) =
                        run_periodic_tick(&orchestrator, CycleKind::WeeklyDeep, &key).await
                    {
                        tracing::warn!(%error, "weekly tick failed");
                    }
                }
                _ = incremental.tick() => {
                    if let Err(error) =
                        orchestrator.trigger(CycleKind::Incremental, None).await
                    {
                        tracing::warn!(%error, "incremental tick failed");
                    }
                }
            }
        }
    })
}

/// Periodically sweep agent health and trigger single-agent learning for
/// anything under the configured threshold.
pub fn spawn_maintenance_loop(orchestrator: Arc<Orchestrator>) -> JoinHandle<()> {
    let period = Duration::from_secs(orchestrator.config().maintenance_interval_secs);
    tokio::spawn(async move {
        let mut timer = interval(period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        timer.tick().await;

        loop {
            timer.tick().await;
            match orchestrator.maintenance_check().await {
                Ok(triggered) if triggered > 0 => {
                    tracing::info!(triggered, "maintenance learning triggered");
                }
                Ok(_) => {}
                Err(error) => {
                    tracing::warn!(%error, "maintenance sweep failed");
                }
            }
        }
    })
}
