//! The learning cycle scheduler core.
//!
//! One orchestrator coordinates all registered agents: it owns the exclusive
//! learning lock, runs the four cycle kinds, feeds the insight exchange, and
//! answers status queries. Agents are invoked sequentially in registry order,
//! each under its own deadline; one agent failing its turn never aborts its
//! siblings.

use crate::agents::{AgentRegistry, HealthReporter, LearnOutcome, Learner};
use crate::collector::{EventCollector, LearnBatch};
use crate::config::OrchestratorConfig;
use crate::error::OrchestratorError;
use crate::exchange::{apply_deep_connections, run_exchange};
use crate::store::{now_ts, CycleRecord, OrchestratorStore};

use serde::Serialize;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The four learning cycle kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleKind {
    Daily,
    WeeklyDeep,
    Incremental,
    SingleAgent,
}

impl CycleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::WeeklyDeep => "weekly_deep",
            Self::Incremental => "incremental",
            Self::SingleAgent => "single_agent",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "daily" => Some(Self::Daily),
            "weekly_deep" => Some(Self::WeeklyDeep),
            "incremental" => Some(Self::Incremental),
            "single_agent" => Some(Self::SingleAgent),
            _ => None,
        }
    }
}

impl std::fmt::Display for CycleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a single-agent learning run, returned synchronously to manual
/// trigger callers.
#[derive(Debug, Clone, Serialize)]
pub struct SingleAgentSummary {
    pub agent: String,
    pub health: f64,
    pub insights_generated: i64,
    pub duration_secs: f64,
}

/// Synchronous answer to a trigger request.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum TriggerOutcome {
    /// Lock acquired; the cycle runs on a background task and reports
    /// through the event log and metrics history.
    Accepted,
    /// Another cycle holds the lock. Not an error: no history row is
    /// written and no retry is scheduled.
    Busy,
    /// A single-agent run finished inline.
    Completed(SingleAgentSummary),
    /// The request itself was invalid (unknown agent, missing parameter).
    Rejected { message: String },
    /// A single-agent run started but failed.
    Failed { message: String },
}

/// Snapshot for the status surface.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    /// "idle" or "learning".
    pub state: String,
    pub last_learning_time: Option<String>,
    pub per_agent_health: HashMap<String, f64>,
    pub insight_counts_by_agent: HashMap<String, i64>,
    pub cycles_completed: i64,
    pub total_artworks_analyzed: i64,
}

/// Health reported for an agent that does not implement health reporting.
pub const DEFAULT_HEALTH: f64 = 0.5;

pub struct Orchestrator {
    registry: Arc<AgentRegistry>,
    store: Arc<OrchestratorStore>,
    collector: Arc<EventCollector>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<AgentRegistry>,
        store: Arc<OrchestratorStore>,
        collector: Arc<EventCollector>,
        config: OrchestratorConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            store,
            collector,
            config,
        })
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<OrchestratorStore> {
        &self.store
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Trigger surface
    // -----------------------------------------------------------------------

    /// Try to start a cycle. Timer-driven and manual triggers both come
    /// through here; the persisted lock row is the only arbiter, so
    /// concurrent triggers from any process serialize correctly.
    pub async fn trigger(
        self: &Arc<Self>,
        kind: CycleKind,
        agent: Option<String>,
    ) -> Result<TriggerOutcome, OrchestratorError> {
        match kind {
            CycleKind::SingleAgent => {
                let Some(agent_id) = agent else {
                    return Ok(TriggerOutcome::Rejected {
                        message: "single_agent trigger requires an agent id".to_string(),
                    });
                };
                self.trigger_single_agent(&agent_id).await
            }
            _ => {
                if !self
                    .store
                    .try_acquire_lock(kind.as_str(), self.config.lock_lease_secs)
                    .await?
                {
                    return Ok(TriggerOutcome::Busy);
                }
                let orchestrator = self.clone();
                tokio::spawn(async move {
                    orchestrator.run_cycle_holding_lock(kind).await;
                });
                Ok(TriggerOutcome::Accepted)
            }
        }
    }

    /// Run a single agent's learning inline and answer with the structured
    /// result. Used by manual triggers and by self-healing maintenance.
    async fn trigger_single_agent(
        self: &Arc<Self>,
        agent_id: &str,
    ) -> Result<TriggerOutcome, OrchestratorError> {
        let Some(registration) = self.registry.get(agent_id) else {
            return Ok(TriggerOutcome::Rejected {
                message: format!("unknown agent: {agent_id}"),
            });
        };
        if registration.learner().is_none() {
            return Ok(TriggerOutcome::Rejected {
                message: format!("agent {agent_id} does not support learn"),
            });
        }

        if !self
            .store
            .try_acquire_lock("single_agent", self.config.lock_lease_secs)
            .await?
        {
            return Ok(TriggerOutcome::Busy);
        }

        // Spawned so the lock releases even if the agent panics its task.
        let orchestrator = self.clone();
        let agent = agent_id.to_string();
        let body = tokio::spawn(async move { orchestrator.run_single_agent_inner(&agent).await });
        let result = match body.await {
            Ok(result) => result,
            Err(join_error) => Err(OrchestratorError::Other(anyhow::anyhow!(
                "single-agent task aborted: {join_error}"
            ))),
        };
        self.release_lock_best_effort().await;

        match result {
            Ok(summary) => Ok(TriggerOutcome::Completed(summary)),
            Err(error) => {
                self.log_best_effort(
                    "orchestrator",
                    "learning_error",
                    &format!("error during single-agent learning for {agent_id}: {error}"),
                )
                .await;
                Ok(TriggerOutcome::Failed {
                    message: error.to_string(),
                })
            }
        }
    }

    /// Run a timer-driven cycle body with the lock already held, then release
    /// it no matter how the body exited, a panic included. Failures surface
    /// only through the event log.
    pub(crate) async fn run_cycle_holding_lock(self: &Arc<Self>, kind: CycleKind) {
        let orchestrator = self.clone();
        let body = tokio::spawn(async move {
            match kind {
                CycleKind::Daily => orchestrator.run_daily_inner().await,
                CycleKind::WeeklyDeep => orchestrator.run_weekly_deep_inner().await,
                CycleKind::Incremental => orchestrator.run_incremental_inner().await,
                // Single-agent runs go through trigger_single_agent.
                CycleKind::SingleAgent => Ok(()),
            }
        });
        let result = match body.await {
            Ok(result) => result,
            Err(join_error) => Err(OrchestratorError::Other(anyhow::anyhow!(
                "cycle task aborted: {join_error}"
            ))),
        };

        if let Err(error) = result {
            tracing::warn!(cycle = %kind, %error, "learning cycle failed");
            self.log_best_effort(
                "orchestrator",
                &format!("{kind}_learning_error"),
                &format!("error during {kind} learning: {error}"),
            )
            .await;
            // Hand the claimed period back so the next tick retries it.
            if let Some(state_key) = crate::scheduler::period_state_key(kind) {
                if let Err(error) = self.store.clear_state(state_key).await {
                    tracing::error!(%error, "failed to release the period claim");
                }
            }
        }

        self.release_lock_best_effort().await;
    }

    // -----------------------------------------------------------------------
    // Cycle bodies (lock held by caller)
    // -----------------------------------------------------------------------

    /// Daily cycle: full event window since the watermark, every capable
    /// agent learns, metrics recorded, exchange runs, watermark advances.
    async fn run_daily_inner(&self) -> Result<(), OrchestratorError> {
        self.store
            .log_event(
                "orchestrator",
                "daily_learning_started",
                "daily learning cycle started",
                None,
            )
            .await?;
        let start = Instant::now();

        let since = self.store.watermark().await?;
        let batch = self.collector.collect_window(&since, "daily").await?;

        let mut insights_generated = 0i64;
        let mut agent_health = HashMap::new();

        for agent_id in self.registry.ids() {
            let Some(registration) = self.registry.get(&agent_id) else {
                continue;
            };
            let Some(learner) = registration.learner() else {
                continue;
            };
            match self.invoke_learner(&agent_id, learner, &batch).await {
                Some(outcome) => {
                    insights_generated += self.persist_insights(&agent_id, &outcome).await?;
                    agent_health.insert(agent_id, outcome.health.clamp(0.0, 1.0));
                }
                None => {
                    agent_health.insert(agent_id, 0.0);
                }
            }
        }

        run_exchange(
            &self.registry,
            &self.store,
            self.config.exchange_window_hours,
            self.config.agent_timeout_secs,
        )
        .await?;

        let record = CycleRecord {
            id: uuid::Uuid::new_v4().to_string(),
            cycle_kind: CycleKind::Daily.as_str().to_string(),
            artworks_analyzed: batch.artworks.len() as i64,
            users_analyzed: batch.interactions.distinct_users() as i64,
            insights_generated,
            duration_secs: start.elapsed().as_secs_f64(),
            agent_health,
            created_at: now_ts(),
        };
        self.store.insert_cycle(&record).await?;

        // The window ending now has been fully processed.
        self.store.set_watermark(&record.created_at).await?;

        self.store
            .log_event(
                "orchestrator",
                "daily_learning_completed",
                "daily learning cycle completed",
                Some(&serde_json::json!({
                    "artworks_analyzed": record.artworks_analyzed,
                    "users_analyzed": record.users_analyzed,
                    "insights_generated": record.insights_generated,
                    "duration_secs": record.duration_secs,
                })),
            )
            .await?;
        Ok(())
    }

    /// Weekly deep cycle: the entire historical corpus, not a delta. Edges
    /// reported by agents land in the graph tagged `deep_learning`. Does not
    /// touch the daily watermark.
    async fn run_weekly_deep_inner(&self) -> Result<(), OrchestratorError> {
        self.store
            .log_event(
                "orchestrator",
                "weekly_deep_learning_started",
                "weekly deep learning cycle started",
                None,
            )
            .await?;
        let start = Instant::now();

        let dataset = self.collector.historical_dataset(&self.store).await?;

        let mut agent_health = HashMap::new();
        let mut agents_run = 0usize;
        let deadline = Duration::from_secs(self.config.agent_timeout_secs);

        for agent_id in self.registry.ids() {
            let Some(registration) = self.registry.get(&agent_id) else {
                continue;
            };
            let Some(deep_learner) = registration.deep_learner() else {
                continue;
            };
            match tokio::time::timeout(deadline, deep_learner.deep_learn(&dataset)).await {
                Ok(Ok(outcome)) => {
                    apply_deep_connections(&self.store, &agent_id, &outcome).await?;
                    agent_health.insert(agent_id, outcome.health.clamp(0.0, 1.0));
                    agents_run += 1;
                }
                Ok(Err(error)) => {
                    self.store
                        .log_event(
                            &agent_id,
                            "learning_error",
                            &format!("deep learning failed: {error}"),
                            None,
                        )
                        .await?;
                    agent_health.insert(agent_id, 0.0);
                }
                Err(_) => {
                    self.store
                        .log_event(
                            &agent_id,
                            "learning_error",
                            &format!(
                                "deep learning timed out after {}s",
                                self.config.agent_timeout_secs
                            ),
                            None,
                        )
                        .await?;
                    agent_health.insert(agent_id, 0.0);
                }
            }
        }

        let record = CycleRecord {
            id: uuid::Uuid::new_v4().to_string(),
            cycle_kind: CycleKind::WeeklyDeep.as_str().to_string(),
            artworks_analyzed: dataset.artworks.len() as i64,
            users_analyzed: dataset.artists.len() as i64,
            insights_generated: 0,
            duration_secs: start.elapsed().as_secs_f64(),
            agent_health,
            created_at: now_ts(),
        };
        self.store.insert_cycle(&record).await?;

        self.store
            .log_event(
                "orchestrator",
                "weekly_deep_learning_completed",
                "weekly deep learning cycle completed",
                Some(&serde_json::json!({ "agents_run": agents_run })),
            )
            .await?;
        Ok(())
    }

    /// Incremental cycle: small fixed-size recent batches, cheap enough to
    /// run every few minutes. Never advances the daily watermark.
    async fn run_incremental_inner(&self) -> Result<(), OrchestratorError> {
        self.store
            .log_event(
                "orchestrator",
                "incremental_learning_started",
                "incremental learning started",
                None,
            )
            .await?;
        let start = Instant::now();

        let batch = self.collector.collect_recent(&self.config).await?;

        let mut insights_generated = 0i64;
        let mut agent_health = HashMap::new();
        let deadline = Duration::from_secs(self.config.agent_timeout_secs);

        for agent_id in self.registry.ids() {
            let Some(registration) = self.registry.get(&agent_id) else {
                continue;
            };
            let Some(incremental) = registration.incremental_learner() else {
                continue;
            };
            match tokio::time::timeout(deadline, incremental.incremental_learn(&batch)).await {
                Ok(Ok(outcome)) => {
                    insights_generated += self.persist_insights(&agent_id, &outcome).await?;
                    agent_health.insert(agent_id, outcome.health.clamp(0.0, 1.0));
                }
                Ok(Err(error)) => {
                    self.store
                        .log_event(
                            &agent_id,
                            "learning_error",
                            &format!("incremental learning failed: {error}"),
                            None,
                        )
                        .await?;
                    agent_health.insert(agent_id, 0.0);
                }
                Err(_) => {
                    self.store
                        .log_event(
                            &agent_id,
                            "learning_error",
                            &format!(
                                "incremental learning timed out after {}s",
                                self.config.agent_timeout_secs
                            ),
                            None,
                        )
                        .await?;
                    agent_health.insert(agent_id, 0.0);
                }
            }
        }

        let record = CycleRecord {
            id: uuid::Uuid::new_v4().to_string(),
            cycle_kind: CycleKind::Incremental.as_str().to_string(),
            artworks_analyzed: batch.artworks.len() as i64,
            users_analyzed: batch.interactions.distinct_users() as i64,
            insights_generated,
            duration_secs: start.elapsed().as_secs_f64(),
            agent_health,
            created_at: now_ts(),
        };
        self.store.insert_cycle(&record).await?;

        self.store
            .log_event(
                "orchestrator",
                "incremental_learning_completed",
                "incremental learning completed",
                Some(&serde_json::json!({
                    "insights_generated": insights_generated,
                })),
            )
            .await?;
        Ok(())
    }

    /// Single-agent cycle: daily-style event collection, one agent's learn.
    async fn run_single_agent_inner(
        &self,
        agent_id: &str,
    ) -> Result<SingleAgentSummary, OrchestratorError> {
        self.store
            .log_event(
                "orchestrator",
                "learning_started",
                &format!("learning started for agent: {agent_id}"),
                None,
            )
            .await?;
        let start = Instant::now();

        let since = self.store.watermark().await?;
        let batch = self.collector.collect_window(&since, "single").await?;

        let registration = self
            .registry
            .get(agent_id)
            .ok_or_else(|| OrchestratorError::UnknownAgent(agent_id.to_string()))?;
        let learner = registration
            .learner()
            .ok_or_else(|| OrchestratorError::UnknownAgent(agent_id.to_string()))?;

        let deadline = Duration::from_secs(self.config.agent_timeout_secs);
        let outcome = match tokio::time::timeout(deadline, learner.learn(&batch)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(OrchestratorError::Other(anyhow::anyhow!(
                    "agent {agent_id} timed out after {}s",
                    self.config.agent_timeout_secs
                )))
            }
        };

        let insights_generated = self.persist_insights(agent_id, &outcome).await?;
        let health = outcome.health.clamp(0.0, 1.0);
        let duration_secs = start.elapsed().as_secs_f64();

        let mut agent_health = HashMap::new();
        agent_health.insert(agent_id.to_string(), health);
        let record = CycleRecord {
            id: uuid::Uuid::new_v4().to_string(),
            cycle_kind: CycleKind::SingleAgent.as_str().to_string(),
            artworks_analyzed: batch.artworks.len() as i64,
            users_analyzed: batch.interactions.distinct_users() as i64,
            insights_generated,
            duration_secs,
            agent_health,
            created_at: now_ts(),
        };
        self.store.insert_cycle(&record).await?;

        self.store
            .log_event(
                "orchestrator",
                "learning_completed",
                &format!("learning completed for agent: {agent_id}"),
                Some(&serde_json::json!({
                    "agent": agent_id,
                    "health": health,
                    "insights_generated": insights_generated,
                    "duration_secs": duration_secs,
                })),
            )
            .await?;

        Ok(SingleAgentSummary {
            agent: agent_id.to_string(),
            health,
            insights_generated,
            duration_secs,
        })
    }

    // -----------------------------------------------------------------------
    // Self-healing
    // -----------------------------------------------------------------------

    /// Inspect every agent's reported health; agents below the threshold
    /// that are not mid-learning get a single-agent cycle. Best-effort: a
    /// busy lock simply means the agent waits for the next check.
    pub async fn maintenance_check(self: &Arc<Self>) -> Result<usize, OrchestratorError> {
        let mut triggered = 0usize;
        for agent_id in self.registry.ids() {
            let Some(registration) = self.registry.get(&agent_id) else {
                continue;
            };
            let Some(reporter) = registration.health_reporter() else {
                continue;
            };
            if reporter.is_learning() {
                continue;
            }
            let health = self.report_health(&agent_id, reporter).await;
            if health >= self.config.health_threshold {
                continue;
            }

            let outcome = self.trigger_single_agent(&agent_id).await?;
            if matches!(
                outcome,
                TriggerOutcome::Completed(_) | TriggerOutcome::Failed { .. }
            ) {
                triggered += 1;
                self.store
                    .log_event(
                        "orchestrator",
                        "maintenance_learning",
                        &format!(
                            "triggered maintenance learning for {agent_id} due to low health score: {health}"
                        ),
                        None,
                    )
                    .await?;
            }
        }
        Ok(triggered)
    }

    // -----------------------------------------------------------------------
    // Status surface
    // -----------------------------------------------------------------------

    pub async fn status(&self) -> Result<StatusSnapshot, OrchestratorError> {
        let state = if self.store.lock_held().await? {
            "learning"
        } else {
            "idle"
        };

        let mut per_agent_health = HashMap::new();
        for agent_id in self.registry.ids() {
            let health = match self.registry.get(&agent_id).and_then(|r| r.health_reporter().cloned())
            {
                Some(reporter) => self.report_health(&agent_id, &reporter).await,
                None => DEFAULT_HEALTH,
            };
            per_agent_health.insert(agent_id, health);
        }

        Ok(StatusSnapshot {
            state: state.to_string(),
            last_learning_time: self.store.last_learning_time().await?,
            per_agent_health,
            insight_counts_by_agent: self.store.insight_counts_by_agent().await?,
            cycles_completed: self.store.cycles_completed().await?,
            total_artworks_analyzed: self.store.total_artworks_analyzed().await?,
        })
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Ask one agent for its health under the configured deadline. A
    /// reporter that hangs is scored with the default instead of stalling
    /// the sweep or the status surface.
    async fn report_health(&self, agent_id: &str, reporter: &Arc<dyn HealthReporter>) -> f64 {
        let deadline = Duration::from_secs(self.config.agent_timeout_secs);
        match tokio::time::timeout(deadline, reporter.health_score()).await {
            Ok(score) => score.clamp(0.0, 1.0),
            Err(_) => {
                tracing::warn!(agent_id, "health report timed out");
                DEFAULT_HEALTH
            }
        }
    }

    /// Invoke one agent's learn under the configured deadline. A failure or
    /// timeout is the agent's own: it is logged against the agent and the
    /// cycle moves on.
    async fn invoke_learner(
        &self,
        agent_id: &str,
        learner: &Arc<dyn Learner>,
        batch: &LearnBatch,
    ) -> Option<LearnOutcome> {
        let deadline = Duration::from_secs(self.config.agent_timeout_secs);
        match tokio::time::timeout(deadline, learner.learn(batch)).await {
            Ok(Ok(outcome)) => Some(outcome),
            Ok(Err(error)) => {
                tracing::warn!(agent_id, %error, "agent learning turn failed");
                self.log_best_effort(
                    agent_id,
                    "learning_error",
                    &format!("learning failed: {error}"),
                )
                .await;
                None
            }
            Err(_) => {
                tracing::warn!(agent_id, "agent learning turn timed out");
                self.log_best_effort(
                    agent_id,
                    "learning_error",
                    &format!("learning timed out after {}s", self.config.agent_timeout_secs),
                )
                .await;
                None
            }
        }
    }

    /// Persist the insights an agent authored this turn.
    async fn persist_insights(
        &self,
        agent_id: &str,
        outcome: &LearnOutcome,
    ) -> Result<i64, OrchestratorError> {
        for draft in &outcome.insights {
            self.store.insert_insight(agent_id, draft).await?;
        }
        Ok(outcome.insights.len() as i64)
    }

    async fn release_lock_best_effort(&self) {
        if let Err(error) = self.store.release_lock().await {
            tracing::error!(%error, "failed to release learning lock");
        }
    }

    async fn log_best_effort(&self, source: &str, event_kind: &str, message: &str) {
        if let Err(error) = self.store.log_event(source, event_kind, message, None).await {
            tracing::error!(%error, event_kind, "failed to write event log entry");
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("agents", &self.registry.ids())
            .finish_non_exhaustive()
    }
}
