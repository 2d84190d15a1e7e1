//! Cross-agent insight exchange.
//!
//! After a primary learning cycle, insights produced within the trailing
//! window are redistributed: every agent capable of consuming insights
//! receives the union of what *other* agents produced, and reports back how
//! much each source influenced it. Reported strengths are upserted into the
//! influence graph, newest observation winning outright.

use crate::agents::{AgentRegistry, DeepLearnOutcome};
use crate::error::OrchestratorError;
use crate::store::{ts_hours_ago, Insight, OrchestratorStore};

pub const EXCHANGE_KIND_DEFAULT: &str = "insight_sharing";
pub const DEEP_LEARNING_KIND: &str = "deep_learning";

/// Run one exchange pass over the trailing window.
///
/// A window with no insights is a logged no-op. A consumer that fails its
/// pass, or exceeds the per-agent deadline, is logged and skipped; the
/// exchange continues with the remaining agents.
pub async fn run_exchange(
    registry: &AgentRegistry,
    store: &OrchestratorStore,
    window_hours: i64,
    timeout_secs: u64,
) -> Result<(), OrchestratorError> {
    let cutoff = ts_hours_ago(window_hours);
    let recent = store.insights_since(&cutoff).await?;

    if recent.is_empty() {
        store
            .log_event(
                "orchestrator",
                "cross_agent_learning_skipped",
                "no insights in the exchange window",
                None,
            )
            .await?;
        return Ok(());
    }

    let mut targets_fed = 0usize;
    let mut edges_written = 0usize;

    for target_id in registry.ids() {
        let Some(registration) = registry.get(&target_id) else {
            continue;
        };
        let Some(consumer) = registration.insight_consumer() else {
            continue;
        };

        // The union of every other agent's recent insights, own output
        // excluded.
        let supplied: Vec<Insight> = recent
            .iter()
            .filter(|insight| insight.agent_name != target_id)
            .cloned()
            .collect();
        if supplied.is_empty() {
            continue;
        }

        let deadline = std::time::Duration::from_secs(timeout_secs);
        let report = match tokio::time::timeout(deadline, consumer.consume_insights(&supplied)).await
        {
            Ok(Ok(report)) => report,
            Ok(Err(error)) => {
                tracing::warn!(agent_id = %target_id, %error, "insight consumer failed");
                store
                    .log_event(
                        &target_id,
                        "cross_learning_error",
                        &format!("insight consumption failed: {error}"),
                        None,
                    )
                    .await?;
                continue;
            }
            Err(_) => {
                tracing::warn!(agent_id = %target_id, "insight consumer timed out");
                store
                    .log_event(
                        &target_id,
                        "cross_learning_error",
                        &format!("insight consumption timed out after {timeout_secs}s"),
                        None,
                    )
                    .await?;
                continue;
            }
        };

        targets_fed += 1;
        for (source_id, influence) in &report.influences {
            if source_id == &target_id {
                continue;
            }
            // Consumers that do not classify the connection get the default.
            let kind = if influence.kind.is_empty() {
                EXCHANGE_KIND_DEFAULT
            } else {
                influence.kind.as_str()
            };
            store
                .upsert_connection(source_id, &target_id, kind, influence.strength)
                .await?;
            edges_written += 1;
        }
    }

    store
        .log_event(
            "orchestrator",
            "cross_agent_learning_completed",
            "cross-agent learning completed",
            Some(&serde_json::json!({
                "insights_in_window": recent.len(),
                "consumers_fed": targets_fed,
                "edges_written": edges_written,
            })),
        )
        .await?;

    Ok(())
}

/// Write the influence edges reported by a weekly deep-learning turn. These
/// are kept distinct from exchange-derived edges via the `deep_learning`
/// connection kind.
pub async fn apply_deep_connections(
    store: &OrchestratorStore,
    source_agent: &str,
    outcome: &DeepLearnOutcome,
) -> Result<(), OrchestratorError> {
    for (target_id, strength) in &outcome.connections {
        if target_id == source_agent {
            continue;
        }
        store
            .upsert_connection(source_agent, target_id, DEEP_LEARNING_KIND, *strength)
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testing::{register_full, StubAgent};
    use crate::agents::InsightDraft;

    use std::sync::Arc;

    async fn setup_store() -> Arc<OrchestratorStore> {
        let path = std::env::temp_dir().join(format!(
            "atelier_test_exchange_{}.db",
            uuid::Uuid::new_v4()
        ));
        OrchestratorStore::connect(&path).await.unwrap()
    }

    fn draft() -> InsightDraft {
        InsightDraft {
            kind: "trending".to_string(),
            payload: serde_json::json!({"signal": "rising"}),
            confidence: 0.8,
            related_entities: serde_json::json!([]),
        }
    }

    #[tokio::test]
    async fn insights_flow_to_every_other_consumer() {
        let store = setup_store().await;
        let registry = AgentRegistry::new();

        let a = StubAgent::new("a");
        let b = StubAgent::new("b");
        let c = StubAgent::new("c");
        let d = StubAgent::new("d");
        for stub in [&a, &b, &c, &d] {
            stub.set_influence(0.6, EXCHANGE_KIND_DEFAULT);
            register_full(&registry, stub);
        }

        store.insert_insight("a", &draft()).await.unwrap();
        run_exchange(&registry, &store, 24, 300).await.unwrap();

        // b, c, d each saw a's insight; a had nothing from others.
        assert_eq!(b.consumed.lock().unwrap().len(), 1);
        assert_eq!(c.consumed.lock().unwrap().len(), 1);
        assert_eq!(d.consumed.lock().unwrap().len(), 1);
        assert!(a.consumed.lock().unwrap().is_empty());

        let connections = store.connections().await.unwrap();
        assert_eq!(connections.len(), 3);
        for target in ["b", "c", "d"] {
            let edge = connections
                .iter()
                .find(|e| e.source_agent == "a" && e.target_agent == target)
                .unwrap();
            assert_eq!(edge.connection_kind, EXCHANGE_KIND_DEFAULT);
            assert!((edge.strength - 0.6).abs() < f64::EPSILON);
        }
    }

    #[tokio::test]
    async fn rerun_overwrites_strength_rather_than_averaging() {
        let store = setup_store().await;
        let registry = AgentRegistry::new();

        let a = StubAgent::new("a");
        let b = StubAgent::new("b");
        b.set_influence(0.4, EXCHANGE_KIND_DEFAULT);
        register_full(&registry, &a);
        register_full(&registry, &b);

        store.insert_insight("a", &draft()).await.unwrap();
        run_exchange(&registry, &store, 24, 300).await.unwrap();

        b.set_influence(0.9, EXCHANGE_KIND_DEFAULT);
        run_exchange(&registry, &store, 24, 300).await.unwrap();

        let connections = store.connections().await.unwrap();
        assert_eq!(connections.len(), 1);
        // 0.9, not the 0.65 a running average would give.
        assert!((connections[0].strength - 0.9).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn empty_window_is_a_logged_noop() {
        let store = setup_store().await;
        let registry = AgentRegistry::new();
        let a = StubAgent::new("a");
        register_full(&registry, &a);

        run_exchange(&registry, &store, 24, 300).await.unwrap();

        assert!(store.connections().await.unwrap().is_empty());
        let logs = store.logs(None, 10).await.unwrap();
        assert_eq!(logs[0].event_kind, "cross_agent_learning_skipped");
    }

    #[tokio::test]
    async fn hung_consumer_is_timed_out_and_skipped() {
        let store = setup_store().await;
        let registry = AgentRegistry::new();

        let a = StubAgent::new("a");
        let stuck = StubAgent::new("stuck");
        *stuck.consume_delay.lock().unwrap() = std::time::Duration::from_secs(30);
        let c = StubAgent::new("c");
        c.set_influence(0.5, EXCHANGE_KIND_DEFAULT);
        register_full(&registry, &a);
        register_full(&registry, &stuck);
        register_full(&registry, &c);

        store.insert_insight("a", &draft()).await.unwrap();
        run_exchange(&registry, &store, 24, 1).await.unwrap();

        // The stuck consumer was cut off; the remaining consumer still ran.
        assert_eq!(c.consumed.lock().unwrap().len(), 1);
        let connections = store.connections().await.unwrap();
        assert_eq!(connections.len(), 1);
        assert_eq!(connections[0].target_agent, "c");

        let errors = store.logs(Some("stuck"), 10).await.unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].event_kind, "cross_learning_error");
        assert!(errors[0].message.contains("timed out"));
    }

    #[tokio::test]
    async fn deep_connections_carry_their_own_kind() {
        let store = setup_store().await;

        let mut outcome = DeepLearnOutcome::default();
        outcome.connections.insert("cloe".to_string(), 0.7);
        outcome.connections.insert("huraii".to_string(), 0.3);
        // Self-edges are dropped.
        outcome.connections.insert("thorius".to_string(), 0.5);
        apply_deep_connections(&store, "thorius", &outcome).await.unwrap();

        let connections = store.connections().await.unwrap();
        assert_eq!(connections.len(), 2);
        assert!(connections.iter().all(|e| e.connection_kind == DEEP_LEARNING_KIND));
        assert!(connections.iter().all(|e| e.source_agent == "thorius"));
    }
}
