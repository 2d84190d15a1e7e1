//! HTTP surface for status, manual triggers, and insight queries.
//!
//! Read endpoints go straight to the store. The trigger endpoint answers
//! synchronously in every case: background cycles report `accepted` and
//! finish through the event log, single-agent runs return their summary
//! inline.

use crate::orchestrator::{CycleKind, Orchestrator, TriggerOutcome};
use crate::store::{InsightFilter, LOG_QUERY_CAP};

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use std::sync::Arc;

/// Return a 500 JSON response for a query failure.
macro_rules! query_error {
    ($error:expr, $context:literal) => {{
        tracing::warn!(error = %$error, $context);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": "database query failed"})),
        )
            .into_response()
    }};
}

pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .route("/trigger", post(post_trigger))
        .route("/insights", get(get_insights))
        .route("/logs", get(get_logs))
        .route("/metrics", get(get_metrics))
        .route("/connections", get(get_connections))
        .with_state(orchestrator)
}

/// Bind and serve until the process exits.
pub async fn serve(orchestrator: Arc<Orchestrator>) -> anyhow::Result<()> {
    let addr = orchestrator.config().api_addr.clone();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "api listening");
    axum::serve(listener, router(orchestrator)).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// GET /status
// ---------------------------------------------------------------------------

async fn get_status(State(orchestrator): State<Arc<Orchestrator>>) -> impl IntoResponse {
    match orchestrator.status().await {
        Ok(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
        Err(error) => query_error!(error, "status query failed"),
    }
}

// ---------------------------------------------------------------------------
// POST /trigger
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct TriggerRequest {
    kind: String,
    agent: Option<String>,
}

async fn post_trigger(
    State(orchestrator): State<Arc<Orchestrator>>,
    Json(request): Json<TriggerRequest>,
) -> impl IntoResponse {
    let Some(kind) = CycleKind::parse(&request.kind) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": format!("unknown cycle kind: {}", request.kind)})),
        )
            .into_response();
    };

    match orchestrator.trigger(kind, request.agent).await {
        Ok(outcome) => {
            let status = match &outcome {
                TriggerOutcome::Accepted => StatusCode::ACCEPTED,
                TriggerOutcome::Busy => StatusCode::CONFLICT,
                TriggerOutcome::Completed(_) => StatusCode::OK,
                TriggerOutcome::Rejected { .. } => StatusCode::BAD_REQUEST,
                TriggerOutcome::Failed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, Json(outcome)).into_response()
        }
        Err(error) => query_error!(error, "trigger failed"),
    }
}

// ---------------------------------------------------------------------------
// GET /insights
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct InsightsQuery {
    agent: Option<String>,
    kind: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

#[derive(Serialize)]
struct InsightsResponse {
    insights: Vec<crate::store::Insight>,
    total: i64,
    has_more: bool,
}

async fn get_insights(
    State(orchestrator): State<Arc<Orchestrator>>,
    Query(query): Query<InsightsQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(50).clamp(1, LOG_QUERY_CAP);
    let offset = query.offset.unwrap_or(0).max(0);
    let filter = InsightFilter {
        agent: query.agent,
        kind: query.kind,
    };

    match orchestrator.store().insights(&filter, limit, offset).await {
        Ok((insights, total)) => {
            let has_more = offset + (insights.len() as i64) < total;
            (
                StatusCode::OK,
                Json(InsightsResponse {
                    insights,
                    total,
                    has_more,
                }),
            )
                .into_response()
        }
        Err(error) => query_error!(error, "insight query failed"),
    }
}

// ---------------------------------------------------------------------------
// GET /logs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct LogsQuery {
    /// Filters on the event source column, which holds agent ids and
    /// "orchestrator".
    agent: Option<String>,
    limit: Option<i64>,
}

#[derive(Serialize)]
struct LogsResponse {
    entries: Vec<crate::store::EventLogEntry>,
}

async fn get_logs(
    State(orchestrator): State<Arc<Orchestrator>>,
    Query(query): Query<LogsQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(50);
    match orchestrator
        .store()
        .logs(query.agent.as_deref(), limit)
        .await
    {
        Ok(entries) => (StatusCode::OK, Json(LogsResponse { entries })).into_response(),
        Err(error) => query_error!(error, "log query failed"),
    }
}

// ---------------------------------------------------------------------------
// GET /metrics
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct MetricsQuery {
    limit: Option<i64>,
}

#[derive(Serialize)]
struct MetricsResponse {
    cycles: Vec<crate::store::CycleRecord>,
}

/// Recent cycle records, newest first.
async fn get_metrics(
    State(orchestrator): State<Arc<Orchestrator>>,
    Query(query): Query<MetricsQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(20).clamp(1, LOG_QUERY_CAP);
    match orchestrator.store().cycle_history(limit).await {
        Ok(cycles) => (StatusCode::OK, Json(MetricsResponse { cycles })).into_response(),
        Err(error) => query_error!(error, "metrics query failed"),
    }
}

// ---------------------------------------------------------------------------
// GET /connections
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct ConnectionsQuery {
    /// Restrict to edges originating at this agent.
    agent: Option<String>,
}

#[derive(Serialize)]
struct ConnectionsResponse {
    connections: Vec<crate::store::AgentConnection>,
}

async fn get_connections(
    State(orchestrator): State<Arc<Orchestrator>>,
    Query(query): Query<ConnectionsQuery>,
) -> impl IntoResponse {
    let result = match query.agent.as_deref() {
        Some(agent) => orchestrator.store().connections_from(agent).await,
        None => orchestrator.store().connections().await,
    };
    match result {
        Ok(connections) => {
            (StatusCode::OK, Json(ConnectionsResponse { connections })).into_response()
        }
        Err(error) => query_error!(error, "connection query failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testing::{register_full, StubAgent};
    use crate::agents::AgentRegistry;
    use crate::collector::testing::marketplace_pool;
    use crate::collector::EventCollector;
    use crate::config::OrchestratorConfig;
    use crate::store::OrchestratorStore;

    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    async fn setup() -> (Router, Arc<Orchestrator>) {
        let path = std::env::temp_dir().join(format!("atelier_test_api_{}.db", uuid::Uuid::new_v4()));
        let store = OrchestratorStore::connect(&path).await.unwrap();
        let collector = Arc::new(EventCollector::from_pool(marketplace_pool().await));
        let registry = Arc::new(AgentRegistry::new());
        let stub = StubAgent::new("cloe");
        register_full(&registry, &stub);
        let orchestrator = Orchestrator::new(
            registry,
            store,
            collector,
            OrchestratorConfig::default(),
        );
        (router(orchestrator.clone()), orchestrator)
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn status_endpoint_reports_idle_state() {
        let (app, _orchestrator) = setup().await;
        let response = app
            .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["state"], "idle");
        assert_eq!(json["cycles_completed"], 0);
        assert!(json["per_agent_health"]["cloe"].is_number());
    }

    #[tokio::test]
    async fn trigger_endpoint_maps_outcomes_to_statuses() {
        let (app, orchestrator) = setup().await;

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/trigger")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"kind":"single_agent","agent":"cloe"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["result"], "completed");
        assert_eq!(json["agent"], "cloe");

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/trigger")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"kind":"marathon"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        // A held lock surfaces as a conflict.
        orchestrator.store().try_acquire_lock("daily", 3_600).await.unwrap();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/trigger")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"kind":"daily"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        orchestrator.store().release_lock().await.unwrap();
    }

    #[tokio::test]
    async fn insights_endpoint_pages_and_filters() {
        let (app, orchestrator) = setup().await;
        for i in 0..3 {
            let draft = crate::agents::InsightDraft {
                kind: "trending".to_string(),
                payload: serde_json::json!({"n": i}),
                confidence: 0.8,
                related_entities: serde_json::json!([]),
            };
            orchestrator.store().insert_insight("cloe", &draft).await.unwrap();
        }

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/insights?agent=cloe&limit=2")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["insights"].as_array().unwrap().len(), 2);
        assert_eq!(json["total"], 3);
        assert_eq!(json["has_more"], true);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/insights?agent=nobody")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["total"], 0);
        assert_eq!(json["has_more"], false);
    }

    #[tokio::test]
    async fn metrics_endpoint_returns_cycle_history() {
        let (app, orchestrator) = setup().await;
        orchestrator
            .trigger(CycleKind::SingleAgent, Some("cloe".to_string()))
            .await
            .unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics?limit=5")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        let cycles = json["cycles"].as_array().unwrap();
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0]["cycle_kind"], "single_agent");
        assert_eq!(cycles[0]["insights_generated"], 1);
        assert!(cycles[0]["agent_health"]["cloe"].is_number());
    }

    #[tokio::test]
    async fn connections_endpoint_filters_by_source_agent() {
        let (app, orchestrator) = setup().await;
        orchestrator
            .store()
            .upsert_connection("cloe", "huraii", "insight_sharing", 0.6)
            .await
            .unwrap();
        orchestrator
            .store()
            .upsert_connection("huraii", "cloe", "insight_sharing", 0.3)
            .await
            .unwrap();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/connections")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["connections"].as_array().unwrap().len(), 2);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/connections?agent=cloe")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let json = body_json(response).await;
        let connections = json["connections"].as_array().unwrap();
        assert_eq!(connections.len(), 1);
        assert_eq!(connections[0]["target_agent"], "huraii");
    }

    #[tokio::test]
    async fn logs_endpoint_filters_by_source() {
        let (app, orchestrator) = setup().await;
        orchestrator
            .store()
            .log_event("cloe", "learning_error", "boom", None)
            .await
            .unwrap();
        orchestrator
            .store()
            .log_event("orchestrator", "daily_learning_started", "started", None)
            .await
            .unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/logs?agent=cloe")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let json = body_json(response).await;
        let entries = json["entries"].as_array().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["event_kind"], "learning_error");
    }
}
