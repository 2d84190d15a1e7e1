//! Agent capability traits and the agent registry.
//!
//! Each optional learning operation is its own trait, and an agent declares
//! what it supports by attaching typed handles at registration time. The
//! orchestrator never probes for methods at call time: an absent capability
//! is simply an absent handle, silently skipped during a cycle.

use crate::collector::{HistoricalDataset, LearnBatch};
use crate::store::Insight;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value as JsonValue;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// An insight authored by an agent during a learning turn. The orchestrator
/// persists it under the producing agent's id.
#[derive(Debug, Clone)]
pub struct InsightDraft {
    pub kind: String,
    pub payload: JsonValue,
    pub confidence: f64,
    pub related_entities: JsonValue,
}

/// Result of a `learn` or `incremental_learn` turn.
#[derive(Debug, Clone, Default)]
pub struct LearnOutcome {
    pub health: f64,
    pub insights: Vec<InsightDraft>,
}

impl Default for InsightDraft {
    fn default() -> Self {
        Self {
            kind: "observation".to_string(),
            payload: JsonValue::Null,
            confidence: 0.5,
            related_entities: JsonValue::Null,
        }
    }
}

/// Result of a weekly `deep_learn` turn. Connections are influence edges
/// from this agent toward the named targets; the exchange writes them with
/// kind `deep_learning`.
#[derive(Debug, Clone, Default)]
pub struct DeepLearnOutcome {
    pub health: f64,
    pub connections: HashMap<String, f64>,
}

/// How strongly one source agent's insights influenced a consumer, and what
/// kind of connection the consumer considers it.
#[derive(Debug, Clone)]
pub struct Influence {
    pub strength: f64,
    pub kind: String,
}

/// Per-source influence report returned by an insight consumer.
#[derive(Debug, Clone, Default)]
pub struct CrossAgentReport {
    pub influences: HashMap<String, Influence>,
}

#[async_trait]
pub trait Learner: Send + Sync {
    async fn learn(&self, batch: &LearnBatch) -> anyhow::Result<LearnOutcome>;
}

#[async_trait]
pub trait DeepLearner: Send + Sync {
    async fn deep_learn(&self, dataset: &HistoricalDataset) -> anyhow::Result<DeepLearnOutcome>;
}

#[async_trait]
pub trait IncrementalLearner: Send + Sync {
    async fn incremental_learn(&self, batch: &LearnBatch) -> anyhow::Result<LearnOutcome>;
}

#[async_trait]
pub trait InsightConsumer: Send + Sync {
    /// Process insights produced by *other* agents and report how much each
    /// source influenced this one.
    async fn consume_insights(&self, insights: &[Insight]) -> anyhow::Result<CrossAgentReport>;
}

#[async_trait]
pub trait HealthReporter: Send + Sync {
    /// Current health in [0, 1].
    async fn health_score(&self) -> f64;

    /// Whether the agent is mid-learning on its own. Maintenance skips
    /// agents that report true.
    fn is_learning(&self) -> bool {
        false
    }
}

/// Which optional operations an agent supports.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CapabilitySet {
    pub learn: bool,
    pub deep_learn: bool,
    pub incremental_learn: bool,
    pub consume_insights: bool,
    pub report_health: bool,
}

/// One registered agent: an id plus typed handles per capability.
pub struct AgentRegistration {
    id: String,
    learner: Option<Arc<dyn Learner>>,
    deep_learner: Option<Arc<dyn DeepLearner>>,
    incremental_learner: Option<Arc<dyn IncrementalLearner>>,
    insight_consumer: Option<Arc<dyn InsightConsumer>>,
    health_reporter: Option<Arc<dyn HealthReporter>>,
}

impl AgentRegistration {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            learner: None,
            deep_learner: None,
            incremental_learner: None,
            insight_consumer: None,
            health_reporter: None,
        }
    }

    pub fn with_learner(mut self, handle: Arc<dyn Learner>) -> Self {
        self.learner = Some(handle);
        self
    }

    pub fn with_deep_learner(mut self, handle: Arc<dyn DeepLearner>) -> Self {
        self.deep_learner = Some(handle);
        self
    }

    pub fn with_incremental_learner(mut self, handle: Arc<dyn IncrementalLearner>) -> Self {
        self.incremental_learner = Some(handle);
        self
    }

    pub fn with_insight_consumer(mut self, handle: Arc<dyn InsightConsumer>) -> Self {
        self.insight_consumer = Some(handle);
        self
    }

    pub fn with_health_reporter(mut self, handle: Arc<dyn HealthReporter>) -> Self {
        self.health_reporter = Some(handle);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn learner(&self) -> Option<&Arc<dyn Learner>> {
        self.learner.as_ref()
    }

    pub fn deep_learner(&self) -> Option<&Arc<dyn DeepLearner>> {
        self.deep_learner.as_ref()
    }

    pub fn incremental_learner(&self) -> Option<&Arc<dyn IncrementalLearner>> {
        self.incremental_learner.as_ref()
    }

    pub fn insight_consumer(&self) -> Option<&Arc<dyn InsightConsumer>> {
        self.insight_consumer.as_ref()
    }

    pub fn health_reporter(&self) -> Option<&Arc<dyn HealthReporter>> {
        self.health_reporter.as_ref()
    }

    pub fn capabilities(&self) -> CapabilitySet {
        CapabilitySet {
            learn: self.learner.is_some(),
            deep_learn: self.deep_learner.is_some(),
            incremental_learn: self.incremental_learner.is_some(),
            consume_insights: self.insight_consumer.is_some(),
            report_health: self.health_reporter.is_some(),
        }
    }
}

impl std::fmt::Debug for AgentRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistration")
            .field("id", &self.id)
            .field("capabilities", &self.capabilities())
            .finish()
    }
}

/// In-memory mapping from agent id to registration. Agents register at
/// process start (or whenever a discovery hook re-runs); registrations are
/// never removed while the process runs.
#[derive(Default)]
pub struct AgentRegistry {
    agents: RwLock<HashMap<String, Arc<AgentRegistration>>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent. Idempotent: a second registration under the same
    /// id replaces the previous handles.
    pub fn register(&self, registration: AgentRegistration) {
        let mut agents = self.agents.write().expect("agent registry poisoned");
        agents.insert(registration.id.clone(), Arc::new(registration));
    }

    pub fn get(&self, id: &str) -> Option<Arc<AgentRegistration>> {
        self.agents.read().expect("agent registry poisoned").get(id).cloned()
    }

    /// Registered ids in a fixed (sorted) order. Cycles invoke agents
    /// sequentially in this order.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .agents
            .read()
            .expect("agent registry poisoned")
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn capabilities(&self, id: &str) -> Option<CapabilitySet> {
        self.get(id).map(|registration| registration.capabilities())
    }

    pub fn len(&self) -> usize {
        self.agents.read().expect("agent registry poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry").field("ids", &self.ids()).finish()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Configurable stub agent shared by scheduler, exchange, and
    //! maintenance tests.

    use super::*;

    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    pub struct StubAgent {
        pub id: String,
        pub health: Mutex<f64>,
        pub fail_learn: AtomicBool,
        pub learn_delay: Mutex<Duration>,
        pub consume_delay: Mutex<Duration>,
        pub health_delay: Mutex<Duration>,
        pub insights_per_learn: usize,
        pub learn_calls: AtomicUsize,
        pub incremental_calls: AtomicUsize,
        pub deep_calls: AtomicUsize,
        pub mid_learning: AtomicBool,
        /// (strength, kind) reported for every source during the exchange.
        pub influence: Mutex<Option<(f64, String)>>,
        pub consumed: Mutex<Vec<Insight>>,
        /// target id -> strength edges reported by deep_learn.
        pub deep_connections: Mutex<HashMap<String, f64>>,
    }

    impl StubAgent {
        pub fn new(id: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                health: Mutex::new(0.9),
                fail_learn: AtomicBool::new(false),
                learn_delay: Mutex::new(Duration::ZERO),
                consume_delay: Mutex::new(Duration::ZERO),
                health_delay: Mutex::new(Duration::ZERO),
                insights_per_learn: 1,
                learn_calls: AtomicUsize::new(0),
                incremental_calls: AtomicUsize::new(0),
                deep_calls: AtomicUsize::new(0),
                mid_learning: AtomicBool::new(false),
                influence: Mutex::new(None),
                consumed: Mutex::new(Vec::new()),
                deep_connections: Mutex::new(HashMap::new()),
            })
        }

        pub fn set_health(&self, health: f64) {
            *self.health.lock().unwrap() = health;
        }

        pub fn set_influence(&self, strength: f64, kind: &str) {
            *self.influence.lock().unwrap() = Some((strength, kind.to_string()));
        }

        pub fn set_delay(&self, delay: Duration) {
            *self.learn_delay.lock().unwrap() = delay;
        }

        fn outcome(&self) -> anyhow::Result<LearnOutcome> {
            if self.fail_learn.load(Ordering::SeqCst) {
                anyhow::bail!("stub agent {} failed its turn", self.id);
            }
            let insights = (0..self.insights_per_learn)
                .map(|i| InsightDraft {
                    kind: "trending".to_string(),
                    payload: serde_json::json!({"agent": self.id, "n": i}),
                    confidence: 0.8,
                    related_entities: serde_json::json!([]),
                })
                .collect();
            Ok(LearnOutcome {
                health: *self.health.lock().unwrap(),
                insights,
            })
        }
    }

    #[async_trait]
    impl Learner for StubAgent {
        async fn learn(&self, _batch: &LearnBatch) -> anyhow::Result<LearnOutcome> {
            self.learn_calls.fetch_add(1, Ordering::SeqCst);
            let delay = *self.learn_delay.lock().unwrap();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            self.outcome()
        }
    }

    #[async_trait]
    impl IncrementalLearner for StubAgent {
        async fn incremental_learn(&self, _batch: &LearnBatch) -> anyhow::Result<LearnOutcome> {
            self.incremental_calls.fetch_add(1, Ordering::SeqCst);
            self.outcome()
        }
    }

    #[async_trait]
    impl DeepLearner for StubAgent {
        async fn deep_learn(
            &self,
            _dataset: &HistoricalDataset,
        ) -> anyhow::Result<DeepLearnOutcome> {
            self.deep_calls.fetch_add(1, Ordering::SeqCst);
            Ok(DeepLearnOutcome {
                health: *self.health.lock().unwrap(),
                connections: self.deep_connections.lock().unwrap().clone(),
            })
        }
    }

    #[async_trait]
    impl InsightConsumer for StubAgent {
        async fn consume_insights(
            &self,
            insights: &[Insight],
        ) -> anyhow::Result<CrossAgentReport> {
            let delay = *self.consume_delay.lock().unwrap();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            self.consumed.lock().unwrap().extend(insights.iter().cloned());
            let mut influences = HashMap::new();
            if let Some((strength, kind)) = self.influence.lock().unwrap().clone() {
                for insight in insights {
                    influences
                        .entry(insight.agent_name.clone())
                        .or_insert_with(|| Influence {
                            strength,
                            kind: kind.clone(),
                        });
                }
            }
            Ok(CrossAgentReport { influences })
        }
    }

    #[async_trait]
    impl HealthReporter for StubAgent {
        async fn health_score(&self) -> f64 {
            let delay = *self.health_delay.lock().unwrap();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            *self.health.lock().unwrap()
        }

        fn is_learning(&self) -> bool {
            self.mid_learning.load(Ordering::SeqCst)
        }
    }

    /// Register a stub with every capability attached.
    pub fn register_full(registry: &AgentRegistry, stub: &Arc<StubAgent>) {
        registry.register(
            AgentRegistration::new(&stub.id)
                .with_learner(stub.clone())
                .with_deep_learner(stub.clone())
                .with_incremental_learner(stub.clone())
                .with_insight_consumer(stub.clone())
                .with_health_reporter(stub.clone()),
        );
    }
}
