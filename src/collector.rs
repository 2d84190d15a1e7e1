//! Event window collector over the marketplace database.
//!
//! Translates a "since" watermark into the event batches a learning cycle
//! consumes: new artworks, user interactions split by kind, market activity,
//! and security reports. All accessors are read-only; a failed fetch is
//! fatal to the cycle that requested it.

use crate::config::OrchestratorConfig;
use crate::error::OrchestratorError;
use crate::store::OrchestratorStore;

use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row as _, SqlitePool};

use std::path::Path;
use std::str::FromStr;

fn collector_err(error: sqlx::Error) -> OrchestratorError {
    OrchestratorError::Collector(error.to_string())
}

#[derive(Debug, Clone, Serialize)]
pub struct ArtworkRecord {
    pub id: i64,
    pub title: String,
    pub artist_id: i64,
    pub price: f64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct InteractionRecord {
    pub id: i64,
    pub user_id: i64,
    pub artwork_id: i64,
    pub interaction_kind: String,
    pub created_at: String,
}

/// Interactions split by kind, the shape agents receive them in.
#[derive(Debug, Clone, Default, Serialize)]
pub struct InteractionBatch {
    pub views: Vec<InteractionRecord>,
    pub likes: Vec<InteractionRecord>,
    pub saves: Vec<InteractionRecord>,
    pub shares: Vec<InteractionRecord>,
    pub comments: Vec<InteractionRecord>,
}

impl InteractionBatch {
    fn push(&mut self, record: InteractionRecord) {
        match record.interaction_kind.as_str() {
            "view" => self.views.push(record),
            "like" => self.likes.push(record),
            "save" => self.saves.push(record),
            "share" => self.shares.push(record),
            "comment" => self.comments.push(record),
            // Unknown kinds are counted with views rather than dropped.
            _ => self.views.push(record),
        }
    }

    fn iter_all(&self) -> impl Iterator<Item = &InteractionRecord> {
        self.views
            .iter()
            .chain(&self.likes)
            .chain(&self.saves)
            .chain(&self.shares)
            .chain(&self.comments)
    }

    pub fn total(&self) -> usize {
        self.iter_all().count()
    }

    /// Number of distinct users across every interaction kind.
    pub fn distinct_users(&self) -> usize {
        let users: std::collections::HashSet<i64> =
            self.iter_all().map(|record| record.user_id).collect();
        users.len()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SaleRecord {
    pub id: i64,
    pub artwork_id: i64,
    pub buyer_id: i64,
    pub amount: f64,
    pub sale_date: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenTransaction {
    pub id: i64,
    pub wallet: String,
    pub amount: f64,
    pub created_at: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MarketBatch {
    pub sales: Vec<SaleRecord>,
    pub token_transactions: Vec<TokenTransaction>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SecurityAlert {
    pub id: i64,
    pub alert_kind: String,
    pub severity: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserReport {
    pub id: i64,
    pub reporter_id: i64,
    pub reason: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SecurityBatch {
    pub alerts: Vec<SecurityAlert>,
    pub reports: Vec<UserReport>,
}

/// Everything a `learn` or `incremental_learn` turn receives.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LearnBatch {
    pub artworks: Vec<ArtworkRecord>,
    pub interactions: InteractionBatch,
    pub market: MarketBatch,
    pub security: SecurityBatch,
    /// "daily", "single", or "incremental".
    pub mode: String,
}

/// An artwork with engagement aggregates, for the weekly deep cycle.
#[derive(Debug, Clone, Serialize)]
pub struct ArtworkAggregate {
    pub id: i64,
    pub title: String,
    pub artist_id: i64,
    pub created_at: String,
    pub total_likes: i64,
    pub total_views: i64,
    pub total_sales: i64,
    pub average_sale_price: f64,
}

/// An artist with revenue aggregates, for the weekly deep cycle.
#[derive(Debug, Clone, Serialize)]
pub struct ArtistAggregate {
    pub id: i64,
    pub name: String,
    pub joined_at: String,
    pub total_artworks: i64,
    pub total_sales: i64,
    pub total_revenue: f64,
    pub average_sale_price: f64,
}

/// One day of a count/amount time series.
#[derive(Debug, Clone, Serialize)]
pub struct SeriesPoint {
    pub label: String,
    pub day: String,
    pub count: i64,
    pub total_amount: f64,
    pub average_amount: f64,
}

/// Per-day insight counts by agent and kind.
#[derive(Debug, Clone, Serialize)]
pub struct InsightCount {
    pub agent_name: String,
    pub insight_kind: String,
    pub day: String,
    pub count: i64,
}

/// The entire historical corpus fed to `deep_learn`: not a delta, the whole
/// dataset with derived aggregates.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HistoricalDataset {
    pub artworks: Vec<ArtworkAggregate>,
    pub artists: Vec<ArtistAggregate>,
    pub interaction_series: Vec<SeriesPoint>,
    pub sales_series: Vec<SeriesPoint>,
    pub transaction_series: Vec<SeriesPoint>,
    pub insight_history: Vec<InsightCount>,
}

/// Read-only view over the marketplace database.
pub struct EventCollector {
    pool: SqlitePool,
}

impl EventCollector {
    /// Open the marketplace database read-only.
    pub async fn connect(path: &Path) -> Result<Self, OrchestratorError> {
        let url = format!("sqlite:{}?mode=ro", path.display());
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(|error| OrchestratorError::Collector(format!("invalid db path: {error}")))?
            .read_only(true)
            .busy_timeout(std::time::Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await
            .map_err(collector_err)?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool. Tests seed a throwaway database through a
    /// writable pool and hand it in here.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // -----------------------------------------------------------------------
    // Windowed accessors (daily / single-agent cycles)
    // -----------------------------------------------------------------------

    pub async fn artworks_since(&self, since: &str) -> Result<Vec<ArtworkRecord>, OrchestratorError> {
        let rows = sqlx::query(
            "SELECT id, title, artist_id, price, created_at
             FROM artworks WHERE created_at > ? ORDER BY created_at DESC",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(collector_err)?;
        Ok(rows.into_iter().map(map_artwork).collect())
    }

    pub async fn interactions_since(
        &self,
        since: &str,
    ) -> Result<InteractionBatch, OrchestratorError> {
        let rows = sqlx::query(
            "SELECT id, user_id, artwork_id, interaction_kind, created_at
             FROM user_interactions WHERE created_at > ? ORDER BY created_at DESC",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(collector_err)?;

        let mut batch = InteractionBatch::default();
        for row in rows {
            batch.push(map_interaction(row));
        }
        Ok(batch)
    }

    pub async fn market_since(&self, since: &str) -> Result<MarketBatch, OrchestratorError> {
        let sales = sqlx::query(
            "SELECT id, artwork_id, buyer_id, amount, sale_date
             FROM sales WHERE sale_date > ? ORDER BY sale_date DESC",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(collector_err)?;

        let transactions = sqlx::query(
            "SELECT id, wallet, amount, created_at
             FROM token_transactions WHERE created_at > ? ORDER BY created_at DESC",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(collector_err)?;

        Ok(MarketBatch {
            sales: sales.into_iter().map(map_sale).collect(),
            token_transactions: transactions.into_iter().map(map_transaction).collect(),
        })
    }

    pub async fn security_since(&self, since: &str) -> Result<SecurityBatch, OrchestratorError> {
        let alerts = sqlx::query(
            "SELECT id, alert_kind, severity, created_at
             FROM security_alerts WHERE created_at > ? ORDER BY created_at DESC",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(collector_err)?;

        let reports = sqlx::query(
            "SELECT id, reporter_id, reason, created_at
             FROM user_reports WHERE created_at > ? ORDER BY created_at DESC",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(collector_err)?;

        Ok(SecurityBatch {
            alerts: alerts.into_iter().map(map_alert).collect(),
            reports: reports.into_iter().map(map_report).collect(),
        })
    }

    /// The full event window since the watermark, as one batch.
    pub async fn collect_window(
        &self,
        since: &str,
        mode: &str,
    ) -> Result<LearnBatch, OrchestratorError> {
        Ok(LearnBatch {
            artworks: self.artworks_since(since).await?,
            interactions: self.interactions_since(since).await?,
            market: self.market_since(since).await?,
            security: self.security_since(since).await?,
            mode: mode.to_string(),
        })
    }

    // -----------------------------------------------------------------------
    // Bounded recent accessors (incremental cycles)
    // -----------------------------------------------------------------------

    pub async fn recent_artworks(&self, limit: i64) -> Result<Vec<ArtworkRecord>, OrchestratorError> {
        let rows = sqlx::query(
            "SELECT id, title, artist_id, price, created_at
             FROM artworks ORDER BY created_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(collector_err)?;
        Ok(rows.into_iter().map(map_artwork).collect())
    }

    pub async fn recent_interactions(
        &self,
        limit: i64,
    ) -> Result<InteractionBatch, OrchestratorError> {
        let rows = sqlx::query(
            "SELECT id, user_id, artwork_id, interaction_kind, created_at
             FROM user_interactions ORDER BY created_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(collector_err)?;

        let mut batch = InteractionBatch::default();
        for row in rows {
            batch.push(map_interaction(row));
        }
        Ok(batch)
    }

    pub async fn recent_market(&self, limit: i64) -> Result<MarketBatch, OrchestratorError> {
        let sales = sqlx::query(
            "SELECT id, artwork_id, buyer_id, amount, sale_date
             FROM sales ORDER BY sale_date DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(collector_err)?;

        let transactions = sqlx::query(
            "SELECT id, wallet, amount, created_at
             FROM token_transactions ORDER BY created_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(collector_err)?;

        Ok(MarketBatch {
            sales: sales.into_iter().map(map_sale).collect(),
            token_transactions: transactions.into_iter().map(map_transaction).collect(),
        })
    }

    pub async fn recent_security(&self, limit: i64) -> Result<SecurityBatch, OrchestratorError> {
        let alerts = sqlx::query(
            "SELECT id, alert_kind, severity, created_at
             FROM security_alerts ORDER BY created_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(collector_err)?;

        let reports = sqlx::query(
            "SELECT id, reporter_id, reason, created_at
             FROM user_reports ORDER BY created_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(collector_err)?;

        Ok(SecurityBatch {
            alerts: alerts.into_iter().map(map_alert).collect(),
            reports: reports.into_iter().map(map_report).collect(),
        })
    }

    /// Fixed-size recent batches for the incremental cycle. Item-count
    /// ceilings, not a time window, so cost is constant as history grows.
    pub async fn collect_recent(
        &self,
        config: &OrchestratorConfig,
    ) -> Result<LearnBatch, OrchestratorError> {
        Ok(LearnBatch {
            artworks: self.recent_artworks(config.recent_artwork_limit).await?,
            interactions: self.recent_interactions(config.recent_interaction_limit).await?,
            market: self.recent_market(config.recent_market_limit).await?,
            security: self.recent_security(config.recent_security_limit).await?,
            mode: "incremental".to_string(),
        })
    }

    // -----------------------------------------------------------------------
    // Historical dataset (weekly deep cycle)
    // -----------------------------------------------------------------------

    /// The entire historical corpus with derived aggregates. Insight history
    /// comes from the orchestrator store; everything else from the
    /// marketplace database.
    pub async fn historical_dataset(
        &self,
        store: &OrchestratorStore,
    ) -> Result<HistoricalDataset, OrchestratorError> {
        let artworks = sqlx::query(
            r#"
            SELECT a.id, a.title, a.artist_id, a.created_at,
                   COUNT(DISTINCT l.id) AS total_likes,
                   COUNT(DISTINCT v.id) AS total_views,
                   COUNT(DISTINCT s.id) AS total_sales,
                   COALESCE(AVG(s.amount), 0.0) AS average_sale_price
            FROM artworks a
            LEFT JOIN user_interactions l ON a.id = l.artwork_id AND l.interaction_kind = 'like'
            LEFT JOIN user_interactions v ON a.id = v.artwork_id AND v.interaction_kind = 'view'
            LEFT JOIN sales s ON a.id = s.artwork_id
            GROUP BY a.id
            ORDER BY a.created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(collector_err)?;

        let artists = sqlx::query(
            r#"
            SELECT u.id, u.name, u.joined_at,
                   COUNT(DISTINCT a.id) AS total_artworks,
                   COUNT(DISTINCT s.id) AS total_sales,
                   COALESCE(SUM(s.amount), 0.0) AS total_revenue,
                   COALESCE(AVG(s.amount), 0.0) AS average_sale_price
            FROM artists u
            LEFT JOIN artworks a ON u.id = a.artist_id
            LEFT JOIN sales s ON a.id = s.artwork_id
            GROUP BY u.id
            ORDER BY total_revenue DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(collector_err)?;

        let interaction_series = sqlx::query(
            "SELECT interaction_kind AS label, date(created_at) AS day, COUNT(*) AS count
             FROM user_interactions
             GROUP BY interaction_kind, date(created_at)
             ORDER BY day DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(collector_err)?;

        let sales_series = sqlx::query(
            "SELECT date(sale_date) AS day, COUNT(*) AS count,
                    COALESCE(SUM(amount), 0.0) AS total_amount,
                    COALESCE(AVG(amount), 0.0) AS average_amount
             FROM sales GROUP BY date(sale_date) ORDER BY day DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(collector_err)?;

        let transaction_series = sqlx::query(
            "SELECT date(created_at) AS day, COUNT(*) AS count,
                    COALESCE(SUM(amount), 0.0) AS total_amount,
                    COALESCE(AVG(amount), 0.0) AS average_amount
             FROM token_transactions GROUP BY date(created_at) ORDER BY day DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(collector_err)?;

        let insight_history = store
            .insight_history()
            .await?
            .into_iter()
            .map(|(agent_name, insight_kind, day, count)| InsightCount {
                agent_name,
                insight_kind,
                day,
                count,
            })
            .collect();

        Ok(HistoricalDataset {
            artworks: artworks
                .into_iter()
                .map(|row| ArtworkAggregate {
                    id: row.get("id"),
                    title: row.get("title"),
                    artist_id: row.get("artist_id"),
                    created_at: row.get("created_at"),
                    total_likes: row.get("total_likes"),
                    total_views: row.get("total_views"),
                    total_sales: row.get("total_sales"),
                    average_sale_price: row.get("average_sale_price"),
                })
                .collect(),
            artists: artists
                .into_iter()
                .map(|row| ArtistAggregate {
                    id: row.get("id"),
                    name: row.get("name"),
                    joined_at: row.get("joined_at"),
                    total_artworks: row.get("total_artworks"),
                    total_sales: row.get("total_sales"),
                    total_revenue: row.get("total_revenue"),
                    average_sale_price: row.get("average_sale_price"),
                })
                .collect(),
            interaction_series: interaction_series
                .into_iter()
                .map(|row| SeriesPoint {
                    label: row.get("label"),
                    day: row.get("day"),
                    count: row.get("count"),
                    total_amount: 0.0,
                    average_amount: 0.0,
                })
                .collect(),
            sales_series: sales_series.into_iter().map(map_series).collect(),
            transaction_series: transaction_series.into_iter().map(map_series).collect(),
            insight_history,
        })
    }
}

fn map_artwork(row: sqlx::sqlite::SqliteRow) -> ArtworkRecord {
    ArtworkRecord {
        id: row.get("id"),
        title: row.get("title"),
        artist_id: row.get("artist_id"),
        price: row.get("price"),
        created_at: row.get("created_at"),
    }
}

fn map_interaction(row: sqlx::sqlite::SqliteRow) -> InteractionRecord {
    InteractionRecord {
        id: row.get("id"),
        user_id: row.get("user_id"),
        artwork_id: row.get("artwork_id"),
        interaction_kind: row.get("interaction_kind"),
        created_at: row.get("created_at"),
    }
}

fn map_sale(row: sqlx::sqlite::SqliteRow) -> SaleRecord {
    SaleRecord {
        id: row.get("id"),
        artwork_id: row.get("artwork_id"),
        buyer_id: row.get("buyer_id"),
        amount: row.get("amount"),
        sale_date: row.get("sale_date"),
    }
}

fn map_transaction(row: sqlx::sqlite::SqliteRow) -> TokenTransaction {
    TokenTransaction {
        id: row.get("id"),
        wallet: row.get("wallet"),
        amount: row.get("amount"),
        created_at: row.get("created_at"),
    }
}

fn map_alert(row: sqlx::sqlite::SqliteRow) -> SecurityAlert {
    SecurityAlert {
        id: row.get("id"),
        alert_kind: row.get("alert_kind"),
        severity: row.get("severity"),
        created_at: row.get("created_at"),
    }
}

fn map_report(row: sqlx::sqlite::SqliteRow) -> UserReport {
    UserReport {
        id: row.get("id"),
        reporter_id: row.get("reporter_id"),
        reason: row.get("reason"),
        created_at: row.get("created_at"),
    }
}

fn map_series(row: sqlx::sqlite::SqliteRow) -> SeriesPoint {
    SeriesPoint {
        label: String::new(),
        day: row.get("day"),
        count: row.get("count"),
        total_amount: row.get("total_amount"),
        average_amount: row.get("average_amount"),
    }
}

impl std::fmt::Debug for EventCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventCollector").finish_non_exhaustive()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::store::{now_ts, ts_hours_ago, OrchestratorStore};

    async fn setup_store() -> std::sync::Arc<OrchestratorStore> {
        let path = std::env::temp_dir().join(format!(
            "atelier_test_collector_store_{}.db",
            uuid::Uuid::new_v4()
        ));
        OrchestratorStore::connect(&path).await.unwrap()
    }

    #[tokio::test]
    async fn windowed_accessors_respect_the_since_bound() {
        let pool = marketplace_pool().await;
        seed_artwork(&pool, "old", 1, &ts_hours_ago(48)).await;
        seed_artwork(&pool, "new", 1, &ts_hours_ago(1)).await;
        seed_interaction(&pool, 10, 1, "like", &ts_hours_ago(1)).await;
        seed_interaction(&pool, 11, 1, "view", &ts_hours_ago(30)).await;

        let collector = EventCollector::from_pool(pool);
        let batch = collector.collect_window(&ts_hours_ago(24), "daily").await.unwrap();

        assert_eq!(batch.artworks.len(), 1);
        assert_eq!(batch.artworks[0].title, "new");
        assert_eq!(batch.interactions.likes.len(), 1);
        assert!(batch.interactions.views.is_empty());
        assert_eq!(batch.mode, "daily");
    }

    #[tokio::test]
    async fn interactions_are_split_by_kind_and_users_deduplicated() {
        let pool = marketplace_pool().await;
        let ts = ts_hours_ago(1);
        seed_interaction(&pool, 10, 1, "view", &ts).await;
        seed_interaction(&pool, 10, 2, "like", &ts).await;
        seed_interaction(&pool, 11, 1, "save", &ts).await;
        seed_interaction(&pool, 11, 1, "share", &ts).await;
        seed_interaction(&pool, 12, 3, "comment", &ts).await;

        let collector = EventCollector::from_pool(pool);
        let interactions = collector.interactions_since(&ts_hours_ago(24)).await.unwrap();

        assert_eq!(interactions.views.len(), 1);
        assert_eq!(interactions.likes.len(), 1);
        assert_eq!(interactions.saves.len(), 1);
        assert_eq!(interactions.shares.len(), 1);
        assert_eq!(interactions.comments.len(), 1);
        assert_eq!(interactions.total(), 5);
        assert_eq!(interactions.distinct_users(), 3);
    }

    #[tokio::test]
    async fn recent_batches_honor_fixed_ceilings() {
        let pool = marketplace_pool().await;
        for i in 0..15 {
            seed_artwork(&pool, &format!("art-{i}"), 1, &ts_hours_ago(i)).await;
        }
        for i in 0..60 {
            seed_interaction(&pool, i, 1, "view", &ts_hours_ago(1)).await;
        }

        let collector = EventCollector::from_pool(pool);
        let config = crate::config::OrchestratorConfig::default();
        let batch = collector.collect_recent(&config).await.unwrap();

        assert_eq!(batch.artworks.len(), 10);
        assert_eq!(batch.interactions.total(), 50);
        assert_eq!(batch.mode, "incremental");
        // Newest artwork first.
        assert_eq!(batch.artworks[0].title, "art-0");
    }

    #[tokio::test]
    async fn historical_dataset_aggregates_engagement_and_revenue() {
        let pool = marketplace_pool().await;
        let store = setup_store().await;

        seed_artist(&pool, "vera", &ts_hours_ago(1000)).await;
        seed_artwork(&pool, "sunrise", 1, &ts_hours_ago(100)).await;
        seed_interaction(&pool, 10, 1, "like", &ts_hours_ago(50)).await;
        seed_interaction(&pool, 11, 1, "like", &ts_hours_ago(49)).await;
        seed_interaction(&pool, 10, 1, "view", &ts_hours_ago(48)).await;
        seed_sale(&pool, 1, 200.0, &ts_hours_ago(24)).await;
        seed_sale(&pool, 1, 400.0, &ts_hours_ago(12)).await;

        let collector = EventCollector::from_pool(pool);
        let dataset = collector.historical_dataset(&store).await.unwrap();

        assert_eq!(dataset.artworks.len(), 1);
        let artwork = &dataset.artworks[0];
        assert_eq!(artwork.total_likes, 2);
        assert_eq!(artwork.total_views, 1);
        assert_eq!(artwork.total_sales, 2);
        assert!((artwork.average_sale_price - 300.0).abs() < 1e-9);

        assert_eq!(dataset.artists.len(), 1);
        let artist = &dataset.artists[0];
        assert_eq!(artist.total_artworks, 1);
        assert!((artist.total_revenue - 600.0).abs() < 1e-9);

        assert!(!dataset.sales_series.is_empty());
        assert!(!dataset.interaction_series.is_empty());
    }

    #[tokio::test]
    async fn historical_dataset_includes_insight_history() {
        let pool = marketplace_pool().await;
        let store = setup_store().await;
        store
            .insert_insight(
                "cloe",
                &crate::agents::InsightDraft {
                    kind: "trending".to_string(),
                    payload: serde_json::json!({}),
                    confidence: 0.7,
                    related_entities: serde_json::json!([]),
                },
            )
            .await
            .unwrap();

        let collector = EventCollector::from_pool(pool);
        let dataset = collector.historical_dataset(&store).await.unwrap();
        assert_eq!(dataset.insight_history.len(), 1);
        assert_eq!(dataset.insight_history[0].agent_name, "cloe");
        assert_eq!(dataset.insight_history[0].count, 1);
    }

    #[tokio::test]
    async fn missing_table_is_a_collector_failure() {
        let pool = marketplace_pool().await;
        sqlx::raw_sql("DROP TABLE artworks").execute(&pool).await.unwrap();

        let collector = EventCollector::from_pool(pool);
        let error = collector.artworks_since(&now_ts()).await.unwrap_err();
        assert!(matches!(error, OrchestratorError::Collector(_)));
    }
}
