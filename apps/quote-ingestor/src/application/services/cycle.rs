//! Ingestion Cycle Controller
//!
//! Runs one bounded collect-and-deliver pass against a fresh feed session:
//!
//! ```text
//! login ─► push: connect + subscribe, drain queue until window closes
//!       └► poll: query each lookup category, sleep between queries
//!                         │
//!                         ▼
//!        normalize ─► route ─► upsert (one request per record)
//!                         │
//!                         ▼
//!            disconnect ─► CycleReport {category: count}
//! ```
//!
//! Push deliveries land on a bounded channel drained by this task alone,
//! so batches are processed one at a time in arrival order and the
//! cycle-scoped counters never see concurrent mutation.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::Instrument;
use uuid::Uuid;

use crate::application::ports::{
    FeedConnector, FeedCredentials, FeedError, FeedSession, IngestionCycle, QuoteStore,
};
use crate::domain::category::{Category, CategoryTable};
use crate::domain::normalize::Normalizer;
use crate::domain::quote::FeedBatch;
use crate::infrastructure::metrics::{self, DropReason, UpsertOutcome};

// =============================================================================
// Settings
// =============================================================================

/// How a cycle collects quotes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestMode {
    /// Subscribe and consume pushed batches for a fixed window.
    Push {
        /// How long the session stays open.
        window: Duration,
        /// Capacity of the batch queue between feed and consumer.
        queue_capacity: usize,
    },
    /// Query every lookup category in turn.
    Poll {
        /// Pause after each category query.
        interval: Duration,
        /// Settlement term to query.
        settlement: String,
    },
}

impl IngestMode {
    /// Mode name for logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Push { .. } => "push",
            Self::Poll { .. } => "poll",
        }
    }
}

// =============================================================================
// Counters & Report
// =============================================================================

/// Per-cycle tallies. Created empty at cycle start, consumed at cycle end.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleCounters {
    upserted: BTreeMap<Category, u64>,
    unclassified: u64,
    filtered: u64,
    failed: u64,
    batches: u64,
}

impl CycleCounters {
    /// Successful upserts for a category.
    #[must_use]
    pub fn upserted(&self, category: Category) -> u64 {
        self.upserted.get(&category).copied().unwrap_or(0)
    }

    /// Successful upserts across categories.
    #[must_use]
    pub fn total_upserted(&self) -> u64 {
        self.upserted.values().sum()
    }

    /// Rows with no destination category.
    #[must_use]
    pub const fn unclassified(&self) -> u64 {
        self.unclassified
    }

    /// Rows failed by normalization or the store.
    #[must_use]
    pub const fn failed(&self) -> u64 {
        self.failed
    }

    fn record_upsert(&mut self, category: Category) {
        *self.upserted.entry(category).or_insert(0) += 1;
    }
}

/// Summary of one finished cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// Cycle identifier, also on the cycle's tracing span.
    pub cycle_id: Uuid,
    /// Collection mode.
    pub mode: &'static str,
    /// Start time.
    pub started_at: DateTime<Utc>,
    /// Wall time spent.
    pub duration_ms: u64,
    /// Successful upserts per category.
    pub upserted: BTreeMap<Category, u64>,
    /// Rows dropped as unclassified.
    pub unclassified: u64,
    /// Rows filtered out by kind rules.
    pub filtered: u64,
    /// Rows that failed normalization or upsert.
    pub failed: u64,
    /// Batches processed.
    pub batches: u64,
}

/// Cycle-level failure, caught by the supervisor.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CycleError {
    /// Feed login, subscription or query failed.
    #[error(transparent)]
    Feed(#[from] FeedError),

    /// The cycle panicked.
    #[error("cycle panicked: {0}")]
    Panicked(String),
}

// =============================================================================
// Batch Ingestion
// =============================================================================

/// Normalizes, routes and upserts batches, one record at a time.
pub struct BatchIngestor {
    store: Arc<dyn QuoteStore>,
    tables: Arc<CategoryTable>,
    normalizer: Normalizer,
    pacing: Duration,
}

impl BatchIngestor {
    /// Create an ingestor.
    #[must_use]
    pub fn new(
        store: Arc<dyn QuoteStore>,
        tables: Arc<CategoryTable>,
        normalizer: Normalizer,
        pacing: Duration,
    ) -> Self {
        Self {
            store,
            tables,
            normalizer,
            pacing,
        }
    }

    /// Process every row of a batch, tallying into `counters`.
    ///
    /// Never fails: bad rows and rejected upserts are logged and skipped.
    pub async fn ingest(&self, batch: &FeedBatch, counters: &mut CycleCounters) {
        counters.batches += 1;
        tracing::debug!(kind = %batch.kind, rows = batch.len(), "Processing batch");

        for row in &batch.rows {
            let normalized = self.normalizer.normalize_with_settlement(
                batch.kind,
                row,
                batch.settlement.as_deref(),
            );
            let record = match normalized {
                Ok(Some(record)) => record,
                Ok(None) => {
                    counters.filtered += 1;
                    metrics::record_dropped(DropReason::Filtered);
                    continue;
                }
                Err(e) => {
                    counters.failed += 1;
                    metrics::record_dropped(DropReason::Malformed);
                    tracing::warn!(kind = %batch.kind, error = %e, "Dropping malformed row");
                    continue;
                }
            };

            let Some(category) = self.tables.route(batch.kind, record.symbol()) else {
                counters.unclassified += 1;
                metrics::record_dropped(DropReason::Unclassified);
                tracing::warn!(symbol = record.symbol(), "Unclassified symbol, not upserted");
                continue;
            };

            match self.store.upsert(category, &record).await {
                Ok(_) => {
                    counters.record_upsert(category);
                    metrics::record_upsert(category, UpsertOutcome::Success);
                }
                Err(_) => {
                    counters.failed += 1;
                    metrics::record_upsert(category, UpsertOutcome::Failure);
                }
            }

            if !self.pacing.is_zero() {
                tokio::time::sleep(self.pacing).await;
            }
        }
    }
}

// =============================================================================
// Cycle Controller
// =============================================================================

/// Runs ingestion cycles against a feed connector.
pub struct CycleController {
    connector: Arc<dyn FeedConnector>,
    credentials: FeedCredentials,
    tables: Arc<CategoryTable>,
    ingestor: BatchIngestor,
    mode: IngestMode,
}

impl CycleController {
    /// Create a controller.
    #[must_use]
    pub fn new(
        connector: Arc<dyn FeedConnector>,
        credentials: FeedCredentials,
        tables: Arc<CategoryTable>,
        ingestor: BatchIngestor,
        mode: IngestMode,
    ) -> Self {
        Self {
            connector,
            credentials,
            tables,
            ingestor,
            mode,
        }
    }

    async fn cycle(&self, cycle_id: Uuid) -> Result<CycleReport, CycleError> {
        let started_at = Utc::now();
        let clock = tokio::time::Instant::now();
        let mut counters = CycleCounters::default();

        let mut session = self.connector.login(&self.credentials).await?;
        tracing::info!(tables_version = self.tables.version(), "Feed session opened");

        let result = match &self.mode {
            IngestMode::Push {
                window,
                queue_capacity,
            } => {
                self.run_push(session.as_mut(), *window, *queue_capacity, &mut counters)
                    .await
            }
            IngestMode::Poll {
                interval,
                settlement,
            } => {
                self.run_poll(session.as_mut(), *interval, settlement, &mut counters)
                    .await
            }
        };

        if let Err(e) = session.disconnect().await {
            tracing::warn!(error = %e, "Feed disconnect failed");
        }
        drop(session);
        result?;

        let report = CycleReport {
            cycle_id,
            mode: self.mode.as_str(),
            started_at,
            duration_ms: u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX),
            upserted: counters.upserted,
            unclassified: counters.unclassified,
            filtered: counters.filtered,
            failed: counters.failed,
            batches: counters.batches,
        };

        tracing::info!(
            summary = ?report.upserted,
            unclassified = report.unclassified,
            filtered = report.filtered,
            failed = report.failed,
            batches = report.batches,
            duration_ms = report.duration_ms,
            "Cycle finished"
        );

        Ok(report)
    }

    async fn run_push(
        &self,
        session: &mut dyn FeedSession,
        window: Duration,
        queue_capacity: usize,
        counters: &mut CycleCounters,
    ) -> Result<(), CycleError> {
        let (tx, mut rx) = mpsc::channel::<FeedBatch>(queue_capacity.max(1));
        session.connect(tx).await?;

        for subscription in self.tables.subscriptions() {
            session.subscribe(subscription).await?;
            tracing::debug!(
                kind = %subscription.kind,
                board = %subscription.board,
                settlement = subscription.settlement.as_deref().unwrap_or("-"),
                "Subscribed"
            );
        }

        let deadline = tokio::time::sleep(window);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                () = &mut deadline => break,
                batch = rx.recv() => match batch {
                    Some(batch) => self.ingestor.ingest(&batch, counters).await,
                    None => {
                        session.delivery_outcome().await?;
                        tracing::debug!("Feed closed its delivery channel before the window ended");
                        break;
                    }
                },
            }
        }

        let pending = rx.len();
        if pending > 0 {
            tracing::debug!(pending, "Discarding batches queued after the window closed");
        }

        Ok(())
    }

    async fn run_poll(
        &self,
        session: &mut dyn FeedSession,
        interval: Duration,
        settlement: &str,
        counters: &mut CycleCounters,
    ) -> Result<(), CycleError> {
        for (category, symbols) in self.tables.lookup_categories() {
            let kind = self.tables.query_kind(category);
            let batch = session
                .query(kind, &symbols, settlement)
                .await?
                .with_settlement(settlement);
            tracing::debug!(%category, rows = batch.len(), "Queried category");

            self.ingestor.ingest(&batch, counters).await;
            tokio::time::sleep(interval).await;
        }

        Ok(())
    }
}

#[async_trait]
impl IngestionCycle for CycleController {
    async fn run_cycle(&self) -> Result<CycleReport, CycleError> {
        let cycle_id = Uuid::new_v4();
        let span = tracing::info_span!("cycle", %cycle_id, mode = self.mode.as_str());
        self.cycle(cycle_id).instrument(span).await
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{StoreError, UpsertAck};
    use crate::domain::normalize::NormalizedRecord;
    use crate::domain::quote::{InstrumentKind, RawRow, Subscription};
    use parking_lot::Mutex;
    use serde_json::json;

    const TABLES: &str = r"
version: 1
reject_suffixes: [C]
kind_routes:
  repos: cauciones
categories:
  - category: bonos_soberanos
    symbols: [AL30]
  - category: acciones
    symbols: [GGAL]
subscriptions:
  - kind: securities
    board: government_bonds
    settlement: 24hs
  - kind: repos
    board: repos
";

    #[derive(Default)]
    struct RecordingStore {
        calls: Mutex<Vec<(Category, String)>>,
        fail_symbols: Vec<String>,
    }

    #[async_trait]
    impl QuoteStore for RecordingStore {
        async fn upsert(
            &self,
            category: Category,
            record: &NormalizedRecord,
        ) -> Result<UpsertAck, StoreError> {
            self.calls
                .lock()
                .push((category, record.symbol().to_string()));
            if self.fail_symbols.iter().any(|s| s == record.symbol()) {
                return Err(StoreError::Rejected {
                    status: 500,
                    body: "boom".into(),
                });
            }
            Ok(UpsertAck { status: 201 })
        }
    }

    #[derive(Default)]
    struct ScriptLog {
        subscribed: Vec<Subscription>,
        queried: Vec<(InstrumentKind, Vec<String>, String)>,
        disconnected: bool,
    }

    #[derive(Default)]
    struct ScriptedConnector {
        pushed: Vec<FeedBatch>,
        reject_login: bool,
        delivery_error: Option<FeedError>,
        log: Arc<Mutex<ScriptLog>>,
    }

    struct ScriptedSession {
        pushed: Vec<FeedBatch>,
        delivery_error: Option<FeedError>,
        log: Arc<Mutex<ScriptLog>>,
    }

    #[async_trait]
    impl FeedConnector for ScriptedConnector {
        async fn login(
            &self,
            _credentials: &FeedCredentials,
        ) -> Result<Box<dyn FeedSession>, FeedError> {
            if self.reject_login {
                return Err(FeedError::Authentication("bad password".into()));
            }
            Ok(Box::new(ScriptedSession {
                pushed: self.pushed.clone(),
                delivery_error: self.delivery_error.clone(),
                log: Arc::clone(&self.log),
            }))
        }
    }

    #[async_trait]
    impl FeedSession for ScriptedSession {
        async fn connect(&mut self, sink: mpsc::Sender<FeedBatch>) -> Result<(), FeedError> {
            let batches = std::mem::take(&mut self.pushed);
            tokio::spawn(async move {
                for batch in batches {
                    if sink.send(batch).await.is_err() {
                        break;
                    }
                }
            });
            Ok(())
        }

        async fn subscribe(&mut self, subscription: &Subscription) -> Result<(), FeedError> {
            self.log.lock().subscribed.push(subscription.clone());
            Ok(())
        }

        async fn query(
            &mut self,
            kind: InstrumentKind,
            symbols: &[String],
            settlement: &str,
        ) -> Result<FeedBatch, FeedError> {
            self.log
                .lock()
                .queried
                .push((kind, symbols.to_vec(), settlement.to_string()));
            let rows = symbols
                .iter()
                .map(|s| security_row(s, settlement))
                .collect();
            Ok(FeedBatch::new(kind, rows))
        }

        async fn delivery_outcome(&mut self) -> Result<(), FeedError> {
            self.delivery_error.take().map_or(Ok(()), Err)
        }

        async fn disconnect(&mut self) -> Result<(), FeedError> {
            self.log.lock().disconnected = true;
            Ok(())
        }
    }

    fn security_row(symbol: &str, settlement: &str) -> RawRow {
        let value = json!({
            "symbol": symbol,
            "settlement": settlement,
            "last": 100,
            "change": 250,
            "datetime": "2025-10-16T15:30:00-03:00"
        });
        value.as_object().cloned().unwrap()
    }

    fn tables() -> Arc<CategoryTable> {
        Arc::new(CategoryTable::from_yaml(TABLES).unwrap())
    }

    fn credentials() -> FeedCredentials {
        FeedCredentials::new(265, "20123456".into(), "user".into(), "secret".into())
    }

    fn ingestor(store: Arc<RecordingStore>) -> BatchIngestor {
        BatchIngestor::new(
            store,
            tables(),
            Normalizer::new(chrono_tz::America::Argentina::Buenos_Aires),
            Duration::ZERO,
        )
    }

    fn controller(
        connector: ScriptedConnector,
        store: Arc<RecordingStore>,
        mode: IngestMode,
    ) -> CycleController {
        CycleController::new(
            Arc::new(connector),
            credentials(),
            tables(),
            ingestor(store),
            mode,
        )
    }

    fn push_mode() -> IngestMode {
        IngestMode::Push {
            window: Duration::from_secs(60),
            queue_capacity: 8,
        }
    }

    #[tokio::test]
    async fn ingest_counts_only_successful_upserts() {
        let store = Arc::new(RecordingStore {
            fail_symbols: vec!["GGAL - 24hs".into()],
            ..Default::default()
        });
        let batch = FeedBatch::new(
            InstrumentKind::Securities,
            vec![
                security_row("AL30", "24hs"),
                security_row("GGAL", "24hs"),
                security_row("UNKNOWN1", "24hs"),
            ],
        );

        let mut counters = CycleCounters::default();
        ingestor(Arc::clone(&store)).ingest(&batch, &mut counters).await;

        assert_eq!(counters.upserted(Category::SovereignBonds), 1);
        assert_eq!(counters.upserted(Category::Equities), 0);
        assert_eq!(counters.total_upserted(), 1);
        assert_eq!(counters.failed(), 1);
        assert_eq!(counters.unclassified(), 1);
        assert_eq!(store.calls.lock().len(), 2);
    }

    #[tokio::test]
    async fn malformed_row_does_not_stop_the_batch() {
        let store = Arc::new(RecordingStore::default());
        let mut broken = security_row("GGAL", "24hs");
        broken.remove("datetime");
        let batch = FeedBatch::new(
            InstrumentKind::Securities,
            vec![broken, security_row("AL30", "24hs")],
        );

        let mut counters = CycleCounters::default();
        ingestor(Arc::clone(&store)).ingest(&batch, &mut counters).await;

        assert_eq!(counters.failed(), 1);
        assert_eq!(counters.upserted(Category::SovereignBonds), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn push_cycle_routes_and_summarizes() {
        let log = Arc::new(Mutex::new(ScriptLog::default()));
        let connector = ScriptedConnector {
            pushed: vec![FeedBatch::new(
                InstrumentKind::Securities,
                vec![security_row("AL30", "24hs"), security_row("UNKNOWN1", "24hs")],
            )],
            log: Arc::clone(&log),
            ..Default::default()
        };
        let store = Arc::new(RecordingStore::default());

        let report = controller(connector, Arc::clone(&store), push_mode())
            .run_cycle()
            .await
            .unwrap();

        assert_eq!(
            store.calls.lock().as_slice(),
            &[(Category::SovereignBonds, "AL30 - 24hs".to_string())]
        );
        assert_eq!(report.upserted.len(), 1);
        assert_eq!(report.upserted[&Category::SovereignBonds], 1);
        assert_eq!(report.unclassified, 1);
        assert_eq!(report.mode, "push");

        let log = log.lock();
        assert_eq!(log.subscribed.len(), 2);
        assert!(log.disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_cycle_queries_each_lookup_category() {
        let log = Arc::new(Mutex::new(ScriptLog::default()));
        let connector = ScriptedConnector {
            pushed: vec![],
            log: Arc::clone(&log),
            ..Default::default()
        };
        let store = Arc::new(RecordingStore::default());
        let mode = IngestMode::Poll {
            interval: Duration::from_secs(5),
            settlement: "24hs".into(),
        };

        let report = controller(connector, Arc::clone(&store), mode)
            .run_cycle()
            .await
            .unwrap();

        let log = log.lock();
        assert_eq!(
            log.queried,
            vec![
                (
                    InstrumentKind::Securities,
                    vec!["AL30".to_string()],
                    "24hs".to_string()
                ),
                (
                    InstrumentKind::Securities,
                    vec!["GGAL".to_string()],
                    "24hs".to_string()
                ),
            ]
        );
        assert!(log.disconnected);
        assert_eq!(report.upserted[&Category::SovereignBonds], 1);
        assert_eq!(report.upserted[&Category::Equities], 1);
        assert_eq!(report.batches, 2);
    }

    #[tokio::test]
    async fn queried_settlement_keys_rows_that_omit_it() {
        let store = Arc::new(RecordingStore::default());
        let mut bare = security_row("GGAL", "CI");
        bare.remove("settlement");
        let batch = FeedBatch::new(InstrumentKind::Securities, vec![bare]).with_settlement("CI");

        let mut counters = CycleCounters::default();
        ingestor(Arc::clone(&store)).ingest(&batch, &mut counters).await;

        assert_eq!(
            store.calls.lock().as_slice(),
            &[(Category::Equities, "GGAL - CI".to_string())]
        );
    }

    #[tokio::test]
    async fn login_failure_is_a_cycle_error() {
        let connector = ScriptedConnector {
            pushed: vec![],
            reject_login: true,
            ..Default::default()
        };
        let store = Arc::new(RecordingStore::default());

        let err = controller(connector, store, push_mode())
            .run_cycle()
            .await
            .unwrap_err();
        assert!(matches!(err, CycleError::Feed(FeedError::Authentication(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn broken_delivery_fails_the_cycle_and_releases_the_session() {
        let log = Arc::new(Mutex::new(ScriptLog::default()));
        let connector = ScriptedConnector {
            delivery_error: Some(FeedError::Connection("events poll refused".into())),
            log: Arc::clone(&log),
            ..Default::default()
        };
        let store = Arc::new(RecordingStore::default());

        let err = controller(connector, store, push_mode())
            .run_cycle()
            .await
            .unwrap_err();

        assert!(matches!(err, CycleError::Feed(FeedError::Connection(_))));
        assert!(log.lock().disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn counters_start_empty_every_cycle() {
        let connector = ScriptedConnector {
            pushed: vec![FeedBatch::new(
                InstrumentKind::Securities,
                vec![security_row("AL30", "24hs")],
            )],
            ..Default::default()
        };
        let store = Arc::new(RecordingStore::default());
        let controller = controller(connector, Arc::clone(&store), push_mode());

        let first = controller.run_cycle().await.unwrap();
        let second = controller.run_cycle().await.unwrap();

        assert_eq!(first.upserted[&Category::SovereignBonds], 1);
        assert_eq!(second.upserted[&Category::SovereignBonds], 1);
        assert_ne!(first.cycle_id, second.cycle_id);
        assert_eq!(store.calls.lock().len(), 2);
    }
}
