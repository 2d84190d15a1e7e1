//! OrchestratorStore: persistence for orchestrator.db.
//!
//! Owns the four logical tables of the learning core (event log, insights,
//! cycle history, agent connections) plus a small key-value table holding the
//! watermark, timer idempotency keys, and the persisted learning lock.

use crate::agents::InsightDraft;
use crate::error::OrchestratorError;

use serde_json::Value as JsonValue;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row as _, SqlitePool};

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

/// Hard cap on log query page size.
pub const LOG_QUERY_CAP: i64 = 200;

const LOCK_KEY: &str = "learning_lock";
const LOCK_IDLE: &str = "idle";
const WATERMARK_KEY: &str = "last_learning_time";

/// UTC timestamp in the format every table column uses. Fractional seconds
/// keep ordering stable for rows written within the same second.
pub(crate) fn now_ts() -> String {
    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

/// UTC timestamp `hours` before now, same format as [`now_ts`].
pub(crate) fn ts_hours_ago(hours: i64) -> String {
    (chrono::Utc::now() - chrono::Duration::hours(hours))
        .format("%Y-%m-%d %H:%M:%S%.3f")
        .to_string()
}

/// UTC timestamp `secs` before now, same format as [`now_ts`].
pub(crate) fn ts_secs_ago(secs: i64) -> String {
    (chrono::Utc::now() - chrono::Duration::seconds(secs))
        .format("%Y-%m-%d %H:%M:%S%.3f")
        .to_string()
}

/// An insight row as persisted (and as served by the query surface).
#[derive(Debug, Clone, serde::Serialize)]
pub struct Insight {
    pub id: String,
    pub agent_name: String,
    pub insight_kind: String,
    pub payload: JsonValue,
    pub confidence: f64,
    pub related_entities: JsonValue,
    pub created_at: String,
}

/// One row of the append-only event log.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EventLogEntry {
    pub id: String,
    pub source: String,
    pub event_kind: String,
    pub message: String,
    pub data: Option<JsonValue>,
    pub created_at: String,
}

/// One completed learning cycle. Immutable once written.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CycleRecord {
    pub id: String,
    pub cycle_kind: String,
    pub artworks_analyzed: i64,
    pub users_analyzed: i64,
    pub insights_generated: i64,
    pub duration_secs: f64,
    /// Health snapshot per agent at cycle end.
    pub agent_health: HashMap<String, f64>,
    pub created_at: String,
}

/// A directed influence edge between two agents.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AgentConnection {
    pub source_agent: String,
    pub target_agent: String,
    pub connection_kind: String,
    pub strength: f64,
    pub updated_at: String,
}

/// Filter for the paged insight query surface.
#[derive(Debug, Clone, Default)]
pub struct InsightFilter {
    pub agent: Option<String>,
    pub kind: Option<String>,
}

/// Wraps a dedicated SQLite connection pool for orchestrator.db.
///
/// Separate from the marketplace database so orchestrator writes never
/// contend with marketplace request traffic.
pub struct OrchestratorStore {
    pool: SqlitePool,
}

impl OrchestratorStore {
    /// Connect to (or create) orchestrator.db at the given path.
    ///
    /// Runs the embedded schema, enables WAL mode, and seeds the learning
    /// lock row in the idle state.
    pub async fn connect(path: &Path) -> Result<Arc<Self>, OrchestratorError> {
        let url = format!("sqlite:{}?mode=rwc", path.display());
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(|error| OrchestratorError::Other(anyhow::anyhow!("invalid db path: {error}")))?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await?;

        sqlx::raw_sql(SCHEMA).execute(&pool).await?;

        // The lock row must exist before any CAS attempt can succeed.
        sqlx::query(
            "INSERT OR IGNORE INTO orchestrator_state (key, value, updated_at) VALUES (?, ?, ?)",
        )
        .bind(LOCK_KEY)
        .bind(LOCK_IDLE)
        .bind(now_ts())
        .execute(&pool)
        .await?;

        Ok(Arc::new(Self { pool }))
    }

    // -----------------------------------------------------------------------
    // State KV (watermark, idempotency keys)
    // -----------------------------------------------------------------------

    /// Write a key-value pair to orchestrator_state (upsert).
    pub async fn set_state(
        &self,
        key: &str,
        value: impl Into<String>,
    ) -> Result<(), OrchestratorError> {
        let value = value.into();
        sqlx::query(
            "INSERT INTO orchestrator_state (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(&value)
        .bind(now_ts())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Remove a key from orchestrator_state. Absent keys are a no-op.
    pub async fn clear_state(&self, key: &str) -> Result<(), OrchestratorError> {
        sqlx::query("DELETE FROM orchestrator_state WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Read a value from orchestrator_state.
    pub async fn get_state(&self, key: &str) -> Result<Option<String>, OrchestratorError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM orchestrator_state WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(value,)| value))
    }

    /// The end timestamp of the most recently fully-processed event window.
    /// Epoch start when no cycle has ever completed.
    pub async fn watermark(&self) -> Result<String, OrchestratorError> {
        Ok(self
            .get_state(WATERMARK_KEY)
            .await?
            .unwrap_or_else(|| "1970-01-01 00:00:00.000".to_string()))
    }

    /// Advance the watermark. Only the daily cycle calls this, and only
    /// after a fully successful run.
    pub async fn set_watermark(&self, ts: &str) -> Result<(), OrchestratorError> {
        self.set_state(WATERMARK_KEY, ts).await
    }

    /// The watermark as stored, without the epoch default. None until the
    /// first daily cycle completes.
    pub async fn last_learning_time(&self) -> Result<Option<String>, OrchestratorError> {
        self.get_state(WATERMARK_KEY).await
    }

    // -----------------------------------------------------------------------
    // Learning lock (cross-process mutual exclusion)
    // -----------------------------------------------------------------------

    /// Try to take the exclusive learning lock via compare-and-swap on the
    /// persisted lock row. Returns false when another cycle holds it.
    ///
    /// The lock is leased, not permanent: a holder whose `updated_at` is
    /// older than `lease_secs` is presumed dead (a process killed
    /// mid-cycle never reaches `release_lock`) and its lock is stolen.
    pub async fn try_acquire_lock(
        &self,
        owner: &str,
        lease_secs: i64,
    ) -> Result<bool, OrchestratorError> {
        let stale_before = ts_secs_ago(lease_secs);
        let result = sqlx::query(
            "UPDATE orchestrator_state SET value = ?, updated_at = ?
             WHERE key = ? AND (value = ? OR updated_at < ?)",
        )
        .bind(owner)
        .bind(now_ts())
        .bind(LOCK_KEY)
        .bind(LOCK_IDLE)
        .bind(&stale_before)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Release the learning lock unconditionally. Called on every cycle exit
    /// path, success or failure, so a crashed agent turn cannot leave the
    /// system locked.
    pub async fn release_lock(&self) -> Result<(), OrchestratorError> {
        sqlx::query("UPDATE orchestrator_state SET value = ?, updated_at = ? WHERE key = ?")
            .bind(LOCK_IDLE)
            .bind(now_ts())
            .bind(LOCK_KEY)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Whether a cycle currently holds the lock.
    pub async fn lock_held(&self) -> Result<bool, OrchestratorError> {
        let value = self.get_state(LOCK_KEY).await?;
        Ok(matches!(value, Some(v) if v != LOCK_IDLE))
    }

    // -----------------------------------------------------------------------
    // Event log
    // -----------------------------------------------------------------------

    /// Append a lifecycle event to the audit trail. Never mutated afterward.
    pub async fn log_event(
        &self,
        source: &str,
        event_kind: &str,
        message: &str,
        data: Option<&JsonValue>,
    ) -> Result<(), OrchestratorError> {
        let id = uuid::Uuid::new_v4().to_string();
        let data_json = data.map(|d| d.to_string());
        sqlx::query(
            "INSERT INTO agent_events (id, source, event_kind, message, data, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(source)
        .bind(event_kind)
        .bind(message)
        .bind(&data_json)
        .bind(now_ts())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Newest-first log entries, optionally filtered by source. The limit is
    /// capped at [`LOG_QUERY_CAP`].
    pub async fn logs(
        &self,
        source: Option<&str>,
        limit: i64,
    ) -> Result<Vec<EventLogEntry>, OrchestratorError> {
        let limit = limit.clamp(1, LOG_QUERY_CAP);
        let rows = sqlx::query(
            "SELECT id, source, event_kind, message, data, created_at
             FROM agent_events
             WHERE (?1 IS NULL OR source = ?1)
             ORDER BY created_at DESC
             LIMIT ?2",
        )
        .bind(source)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let entries = rows
            .into_iter()
            .map(|row| EventLogEntry {
                id: row.get("id"),
                source: row.get("source"),
                event_kind: row.get("event_kind"),
                message: row.get("message"),
                data: row
                    .get::<Option<String>, _>("data")
                    .and_then(|raw| serde_json::from_str(&raw).ok()),
                created_at: row.get("created_at"),
            })
            .collect();
        Ok(entries)
    }

    // -----------------------------------------------------------------------
    // Insights
    // -----------------------------------------------------------------------

    /// Persist an agent-authored insight. Confidence is clamped to [0, 1].
    pub async fn insert_insight(
        &self,
        agent_name: &str,
        draft: &InsightDraft,
    ) -> Result<String, OrchestratorError> {
        let id = uuid::Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO agent_insights
                 (id, agent_name, insight_kind, payload, confidence, related_entities, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(agent_name)
        .bind(&draft.kind)
        .bind(draft.payload.to_string())
        .bind(draft.confidence.clamp(0.0, 1.0))
        .bind(draft.related_entities.to_string())
        .bind(now_ts())
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    /// All insights created at or after the cutoff, newest first. Used by the
    /// cross-agent exchange window.
    pub async fn insights_since(&self, cutoff: &str) -> Result<Vec<Insight>, OrchestratorError> {
        let rows = sqlx::query(
            "SELECT id, agent_name, insight_kind, payload, confidence, related_entities, created_at
             FROM agent_insights
             WHERE created_at >= ?
             ORDER BY created_at DESC",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(map_insight_row).collect())
    }

    /// Paged insight query, newest first, with the total row count for
    /// pagination.
    pub async fn insights(
        &self,
        filter: &InsightFilter,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Insight>, i64), OrchestratorError> {
        let rows = sqlx::query(
            "SELECT id, agent_name, insight_kind, payload, confidence, related_entities, created_at
             FROM agent_insights
             WHERE (?1 IS NULL OR agent_name = ?1)
               AND (?2 IS NULL OR insight_kind = ?2)
             ORDER BY created_at DESC
             LIMIT ?3 OFFSET ?4",
        )
        .bind(filter.agent.as_deref())
        .bind(filter.kind.as_deref())
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let total_row = sqlx::query(
            "SELECT COUNT(*) AS count FROM agent_insights
             WHERE (?1 IS NULL OR agent_name = ?1)
               AND (?2 IS NULL OR insight_kind = ?2)",
        )
        .bind(filter.agent.as_deref())
        .bind(filter.kind.as_deref())
        .fetch_one(&self.pool)
        .await?;
        let total: i64 = total_row.get("count");

        Ok((rows.into_iter().map(map_insight_row).collect(), total))
    }

    /// Insight totals keyed by producing agent.
    pub async fn insight_counts_by_agent(
        &self,
    ) -> Result<HashMap<String, i64>, OrchestratorError> {
        let rows =
            sqlx::query("SELECT agent_name, COUNT(*) AS count FROM agent_insights GROUP BY agent_name")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.get("agent_name"), row.get("count")))
            .collect())
    }

    /// Per-day insight counts by agent and kind, for the deep-learning
    /// historical dataset.
    pub async fn insight_history(&self) -> Result<Vec<(String, String, String, i64)>, OrchestratorError> {
        let rows = sqlx::query(
            "SELECT agent_name, insight_kind, date(created_at) AS day, COUNT(*) AS count
             FROM agent_insights
             GROUP BY agent_name, insight_kind, date(created_at)
             ORDER BY day DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                (
                    row.get("agent_name"),
                    row.get("insight_kind"),
                    row.get("day"),
                    row.get("count"),
                )
            })
            .collect())
    }

    // -----------------------------------------------------------------------
    // Agent connections
    // -----------------------------------------------------------------------

    /// Upsert a directed influence edge. At most one row exists per
    /// (source, target, kind); a new strength overwrites the old one rather
    /// than averaging into it. Strength is clamped to [0, 1].
    pub async fn upsert_connection(
        &self,
        source: &str,
        target: &str,
        kind: &str,
        strength: f64,
    ) -> Result<(), OrchestratorError> {
        let ts = now_ts();
        sqlx::query(
            "INSERT INTO agent_connections
                 (source_agent, target_agent, connection_kind, strength, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(source_agent, target_agent, connection_kind) DO UPDATE SET
                 strength   = excluded.strength,
                 updated_at = excluded.updated_at",
        )
        .bind(source)
        .bind(target)
        .bind(kind)
        .bind(strength.clamp(0.0, 1.0))
        .bind(&ts)
        .bind(&ts)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Every edge in the influence graph.
    pub async fn connections(&self) -> Result<Vec<AgentConnection>, OrchestratorError> {
        let rows = sqlx::query(
            "SELECT source_agent, target_agent, connection_kind, strength, updated_at
             FROM agent_connections
             ORDER BY source_agent, target_agent, connection_kind",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| AgentConnection {
                source_agent: row.get("source_agent"),
                target_agent: row.get("target_agent"),
                connection_kind: row.get("connection_kind"),
                strength: row.get("strength"),
                updated_at: row.get("updated_at"),
            })
            .collect())
    }

    /// Outgoing edges for one source agent, strongest first.
    pub async fn connections_from(
        &self,
        source: &str,
    ) -> Result<Vec<AgentConnection>, OrchestratorError> {
        let rows = sqlx::query(
            "SELECT source_agent, target_agent, connection_kind, strength, updated_at
             FROM agent_connections
             WHERE source_agent = ?
             ORDER BY strength DESC, target_agent",
        )
        .bind(source)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| AgentConnection {
                source_agent: row.get("source_agent"),
                target_agent: row.get("target_agent"),
                connection_kind: row.get("connection_kind"),
                strength: row.get("strength"),
                updated_at: row.get("updated_at"),
            })
            .collect())
    }

    // -----------------------------------------------------------------------
    // Cycle history
    // -----------------------------------------------------------------------

    /// Append a completed cycle to the history. Health values are clamped to
    /// [0, 1] before serialization.
    pub async fn insert_cycle(&self, record: &CycleRecord) -> Result<(), OrchestratorError> {
        let health: HashMap<&str, f64> = record
            .agent_health
            .iter()
            .map(|(id, h)| (id.as_str(), h.clamp(0.0, 1.0)))
            .collect();
        let health_json = serde_json::to_string(&health)
            .map_err(|error| OrchestratorError::Other(error.into()))?;

        sqlx::query(
            "INSERT INTO learning_cycles
                 (id, cycle_kind, artworks_analyzed, users_analyzed, insights_generated,
                  duration_secs, agent_health, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.cycle_kind)
        .bind(record.artworks_analyzed)
        .bind(record.users_analyzed)
        .bind(record.insights_generated)
        .bind(record.duration_secs)
        .bind(&health_json)
        .bind(&record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Number of completed learning cycles.
    pub async fn cycles_completed(&self) -> Result<i64, OrchestratorError> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM learning_cycles")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("count"))
    }

    /// Sum of artworks analyzed across all completed cycles.
    pub async fn total_artworks_analyzed(&self) -> Result<i64, OrchestratorError> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(artworks_analyzed), 0) AS total FROM learning_cycles",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("total"))
    }

    /// Newest-first cycle history page, for the metrics surface.
    pub async fn cycle_history(&self, limit: i64) -> Result<Vec<CycleRecord>, OrchestratorError> {
        let rows = sqlx::query(
            "SELECT id, cycle_kind, artworks_analyzed, users_analyzed, insights_generated,
                    duration_secs, agent_health, created_at
             FROM learning_cycles
             ORDER BY created_at DESC
             LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| CycleRecord {
                id: row.get("id"),
                cycle_kind: row.get("cycle_kind"),
                artworks_analyzed: row.get("artworks_analyzed"),
                users_analyzed: row.get("users_analyzed"),
                insights_generated: row.get("insights_generated"),
                duration_secs: row.get("duration_secs"),
                agent_health: serde_json::from_str(&row.get::<String, _>("agent_health"))
                    .unwrap_or_default(),
                created_at: row.get("created_at"),
            })
            .collect())
    }
}

fn map_insight_row(row: sqlx::sqlite::SqliteRow) -> Insight {
    Insight {
        id: row.get("id"),
        agent_name: row.get("agent_name"),
        insight_kind: row.get("insight_kind"),
        payload: serde_json::from_str(&row.get::<String, _>("payload"))
            .unwrap_or(JsonValue::Null),
        confidence: row.get("confidence"),
        related_entities: serde_json::from_str(&row.get::<String, _>("related_entities"))
            .unwrap_or(JsonValue::Null),
        created_at: row.get("created_at"),
    }
}

impl std::fmt::Debug for OrchestratorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestratorStore").finish_non_exhaustive()
    }
}

/// Embedded schema for orchestrator.db.
///
/// All tables use `IF NOT EXISTS` so re-running is safe. Timestamps are UTC
/// TEXT columns written exclusively by [`now_ts`], so lexicographic
/// comparison matches chronological order.
const SCHEMA: &str = r#"
-- Append-only lifecycle audit trail
CREATE TABLE IF NOT EXISTS agent_events (
    id TEXT PRIMARY KEY,
    source TEXT NOT NULL,
    event_kind TEXT NOT NULL,
    message TEXT NOT NULL,
    data TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_agent_events_source ON agent_events(source, created_at);
CREATE INDEX IF NOT EXISTS idx_agent_events_kind ON agent_events(event_kind, created_at);

-- Agent-authored insights (persisted and redistributed by the orchestrator)
CREATE TABLE IF NOT EXISTS agent_insights (
    id TEXT PRIMARY KEY,
    agent_name TEXT NOT NULL,
    insight_kind TEXT NOT NULL,
    payload TEXT NOT NULL,
    confidence REAL NOT NULL DEFAULT 0.5,
    related_entities TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_agent_insights_agent ON agent_insights(agent_name, created_at);
CREATE INDEX IF NOT EXISTS idx_agent_insights_kind ON agent_insights(insight_kind);

-- One row per completed learning cycle
CREATE TABLE IF NOT EXISTS learning_cycles (
    id TEXT PRIMARY KEY,
    cycle_kind TEXT NOT NULL,
    artworks_analyzed INTEGER NOT NULL DEFAULT 0,
    users_analyzed INTEGER NOT NULL DEFAULT 0,
    insights_generated INTEGER NOT NULL DEFAULT 0,
    duration_secs REAL NOT NULL DEFAULT 0,
    agent_health TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_learning_cycles_created ON learning_cycles(created_at);

-- Directed weighted influence graph between agents
CREATE TABLE IF NOT EXISTS agent_connections (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_agent TEXT NOT NULL,
    target_agent TEXT NOT NULL,
    connection_kind TEXT NOT NULL,
    strength REAL NOT NULL DEFAULT 0.5,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(source_agent, target_agent, connection_kind)
);
CREATE INDEX IF NOT EXISTS idx_agent_connections_source ON agent_connections(source_agent);
CREATE INDEX IF NOT EXISTS idx_agent_connections_target ON agent_connections(target_agent);

-- Orchestrator state (watermark, lock, idempotency keys)
CREATE TABLE IF NOT EXISTS orchestrator_state (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;
