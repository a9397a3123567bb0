use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use futures_util::stream::{self, StreamExt};
use tokio::sync::Mutex;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::config::BlendConfig;
use crate::error::{AppError, Result};
use crate::feedback::admission::ExpertTrust;
use crate::feedback::ledger::RejectReason;
use crate::feedback::{AdmissionOutcome, FeedbackAdmissionPolicy, FeedbackLedger, FeedbackRequest};
use crate::fetcher::{BatchOrigin, UpstreamEventSource};
use crate::forecast::{BasePredictor, ForecastBlender};
use crate::state::EventStore;
use crate::types::{Event, EventSource, PredictionChange};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPhase {
    Fetching,
    Deduping,
    Forecasting,
    Blending,
    Published,
}

impl std::fmt::Display for RefreshPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RefreshPhase::Fetching => "FETCHING",
            RefreshPhase::Deduping => "DEDUPING",
            RefreshPhase::Forecasting => "FORECASTING",
            RefreshPhase::Blending => "BLENDING",
            RefreshPhase::Published => "PUBLISHED",
        };
        write!(f, "{s}")
    }
}

/// Outcome of one refresh cycle. Per-event failures are collected here, never raised.
#[derive(Debug)]
pub struct RefreshReport {
    pub phases: Vec<RefreshPhase>,
    pub origin: BatchOrigin,
    /// True when upstream failed and the previously served list was kept.
    pub kept_cache: bool,
    pub published: usize,
    /// `(event_id, error)` for every event whose base prediction failed.
    pub forecast_errors: Vec<(String, String)>,
}

impl RefreshReport {
    fn new() -> Self {
        Self {
            phases: Vec::new(),
            origin: BatchOrigin::Live,
            kept_cache: false,
            published: 0,
            forecast_errors: Vec::new(),
        }
    }

    fn enter(&mut self, phase: RefreshPhase) {
        debug!("Refresh phase: {phase}");
        self.phases.push(phase);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeedbackOutcome {
    Admitted { old_probability: f64, new_probability: f64 },
    Rejected { reason: RejectReason, probability: f64 },
}

#[derive(Debug, Clone)]
pub struct RefreshSettings {
    pub lookback_days: i64,
    pub max_concurrent_forecasts: usize,
    pub publish_predictions: bool,
}

/// Base forecast of one event, or why it has none this cycle.
enum BaseForecast {
    Fresh(f64),
    /// Closed event or failed prediction: keep what was published before.
    Keep,
}

// ---------------------------------------------------------------------------
// EventRefreshOrchestrator
// ---------------------------------------------------------------------------

pub struct EventRefreshOrchestrator {
    source: UpstreamEventSource,
    store: Arc<EventStore>,
    predictor: Arc<dyn BasePredictor>,
    blender: ForecastBlender,
    ledger: Arc<FeedbackLedger>,
    policy: FeedbackAdmissionPolicy,
    settings: RefreshSettings,
    health: Arc<HealthState>,
    latency: Arc<LatencyStats>,
    /// event_id → probability changes caused by feedback
    history: DashMap<String, Vec<PredictionChange>>,
    /// event_id → lock serializing feedback read-modify-write on that event
    event_locks: DashMap<String, Arc<Mutex<()>>>,
    refresh_lock: Mutex<()>,
}

impl EventRefreshOrchestrator {
    pub fn new(
        source: UpstreamEventSource,
        store: Arc<EventStore>,
        predictor: Arc<dyn BasePredictor>,
        ledger: Arc<FeedbackLedger>,
        blend: BlendConfig,
        trust: Arc<dyn ExpertTrust>,
        settings: RefreshSettings,
    ) -> Self {
        Self {
            source,
            store,
            predictor,
            policy: FeedbackAdmissionPolicy::new(&blend, trust),
            blender: ForecastBlender::new(blend),
            ledger,
            settings,
            health: Arc::new(HealthState::new()),
            latency: Arc::new(LatencyStats::new()),
            history: DashMap::new(),
            event_locks: DashMap::new(),
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn health(&self) -> &Arc<HealthState> {
        &self.health
    }

    pub fn latency(&self) -> &Arc<LatencyStats> {
        &self.latency
    }

    pub fn ledger(&self) -> &Arc<FeedbackLedger> {
        &self.ledger
    }

    pub fn event_count(&self) -> usize {
        self.store.len()
    }

    pub fn list(&self) -> Vec<Event> {
        self.store.list()
    }

    /// The served list, refreshing first if nothing has been ingested yet.
    pub async fn list_or_refresh(&self) -> Vec<Event> {
        if self.store.is_empty() {
            self.refresh().await;
        }
        self.list()
    }

    pub fn history(&self, event_id: &str) -> Vec<PredictionChange> {
        self.history.get(event_id).map(|h| h.clone()).unwrap_or_default()
    }

    /// Lookup with exactly one refresh attempt on a miss.
    pub async fn get_event(&self, event_id: &str) -> Option<Event> {
        if let Some(event) = self.store.get(event_id) {
            return Some(event);
        }
        info!(event_id = %event_id, "Event not cached, refreshing");
        self.refresh().await;
        let event = self.store.get(event_id);
        if event.is_none() {
            warn!(event_id = %event_id, "Event not found after refresh");
        }
        event
    }

    /// One full refresh cycle. Never fails: the store always ends up non-empty.
    pub async fn refresh(&self) -> RefreshReport {
        let _guard = self.refresh_lock.lock().await;
        let mut report = RefreshReport::new();

        report.enter(RefreshPhase::Fetching);
        let from = (Utc::now() - chrono::Duration::days(self.settings.lookback_days)).timestamp();
        let batch = self.source.fetch(from).await;
        report.origin = batch.origin.clone();
        debug!(
            pages = batch.stats.pages,
            api_total = batch.stats.api_total,
            malformed = batch.stats.rejected_malformed,
            "Fetch finished ({})",
            match &batch.origin {
                BatchOrigin::Live => "live",
                BatchOrigin::EmptyFallback => "empty listing",
                BatchOrigin::UnavailableFallback(_) => "unavailable",
            },
        );

        // An empty listing never displaces events that are already being served.
        if batch.origin == BatchOrigin::EmptyFallback && !self.store.is_empty() {
            warn!("Upstream listing empty, keeping {} cached events", self.store.len());
            report.kept_cache = true;
            report.published = self.store.len();
            report.enter(RefreshPhase::Published);
            self.record_health(&report);
            return report;
        }

        if let BatchOrigin::UnavailableFallback(reason) = &batch.origin {
            if self.store.is_empty() {
                warn!("Upstream unavailable and nothing cached, serving synthetic events: {reason}");
                let events: Vec<Event> = batch
                    .events
                    .into_iter()
                    .map(|mut e| {
                        e.base_probability = Some(e.probability);
                        e
                    })
                    .collect();
                report.published = self.store.upsert(events).len();
            } else {
                warn!("Upstream unavailable, keeping {} cached events: {reason}", self.store.len());
                report.kept_cache = true;
                report.published = self.store.len();
            }
            report.enter(RefreshPhase::Published);
            self.record_health(&report);
            return report;
        }

        report.enter(RefreshPhase::Deduping);
        let events = EventStore::dedup(batch.events);

        report.enter(RefreshPhase::Forecasting);
        let now = Utc::now();
        let forecasts: Vec<(Event, Result<BaseForecast>)> = stream::iter(events)
            .map(|event| async move {
                let base = self.base_forecast(&event, now).await;
                (event, base)
            })
            .buffered(self.settings.max_concurrent_forecasts.max(1))
            .collect()
            .await;

        report.enter(RefreshPhase::Blending);
        // Feedback on any of these events waits until the batch is stored, so a
        // vote admitted mid-cycle is either blended here or applied after.
        let locks: Vec<_> = forecasts.iter().map(|(e, _)| self.event_lock(&e.event_id)).collect();
        let mut guards = Vec::with_capacity(locks.len());
        for lock in &locks {
            guards.push(lock.lock().await);
        }

        let mut finished = Vec::with_capacity(forecasts.len());
        for (mut event, base) in forecasts {
            let previous = self.store.get(&event.event_id);
            match base {
                Ok(BaseForecast::Fresh(base)) => {
                    let aggregate = self.ledger.aggregate(&event.event_id).await;
                    event.set_probability(self.blender.blend(base, &aggregate));
                    event.base_probability = Some(base);
                }
                Ok(BaseForecast::Keep) => keep_previous(&mut event, previous.as_ref()),
                Err(e) => {
                    warn!(event_id = %event.event_id, "Base prediction failed, keeping previous probability: {e}");
                    report.forecast_errors.push((event.event_id.clone(), e.to_string()));
                    keep_previous(&mut event, previous.as_ref());
                }
            }
            finished.push(event);
        }

        let accepted = self.store.upsert(finished);
        drop(guards);
        report.published = accepted.len();
        report.enter(RefreshPhase::Published);

        if report.origin == BatchOrigin::Live {
            let predictions: HashMap<String, f64> = accepted
                .iter()
                .filter(|e| e.source == EventSource::Live)
                .map(|e| (e.event_id.clone(), e.probability))
                .collect();
            self.publish(predictions).await;
        }

        info!(
            published = report.published,
            forecast_errors = report.forecast_errors.len(),
            total = self.store.len(),
            "Refresh complete: {} events published, {} forecast errors",
            report.published,
            report.forecast_errors.len(),
        );
        self.record_health(&report);
        report
    }

    async fn base_forecast(&self, event: &Event, now: chrono::DateTime<Utc>) -> Result<BaseForecast> {
        if event.source == EventSource::Synthetic {
            return Ok(BaseForecast::Fresh(event.probability));
        }
        if !event.is_open(now) {
            return Ok(BaseForecast::Keep);
        }
        let started = Instant::now();
        let result = self.predictor.predict(&event.description).await;
        self.latency.record(started.elapsed(), result.is_ok());
        result.map(BaseForecast::Fresh)
    }

    /// Validate, admit, re-blend and republish one expert vote.
    pub async fn submit_feedback(&self, request: FeedbackRequest) -> Result<FeedbackOutcome> {
        if request.expert_id.trim().is_empty() {
            return Err(AppError::InvalidRequest("expert_id is required".to_string()));
        }
        if !request.weight.is_finite() || request.weight < 0.0 {
            return Err(AppError::InvalidRequest("expert_weight must be a non-negative number".to_string()));
        }

        let event_id = request.event_id.clone();
        if self.get_event(&event_id).await.is_none() {
            return Err(AppError::EventNotFound(event_id));
        }

        let lock = self.event_lock(&event_id);
        let _guard = lock.lock().await;

        let event = self
            .store
            .get(&event_id)
            .ok_or_else(|| AppError::EventNotFound(event_id.clone()))?;
        let expert_id = request.expert_id.clone();
        let expert_weight = request.weight;
        let agrees = request.agrees;

        info!(event_id = %event_id, expert_id = %expert_id, "Processing feedback");
        let adjusted = match self.policy.admit(&self.ledger, request, event.probability).await? {
            AdmissionOutcome::Rejected { reason, probability } => {
                return Ok(FeedbackOutcome::Rejected { reason, probability });
            }
            AdmissionOutcome::Admitted(adjusted) => adjusted,
        };

        // The first admitted vote on a never-forecast event pins its
        // pre-feedback probability as the blend anchor.
        let anchor = event.base_probability.unwrap_or(adjusted.old_probability);
        let aggregate = self.ledger.aggregate(&event_id).await;
        let new_probability = if self.blender.passes_gate(&aggregate) {
            self.blender.blend(anchor, &aggregate)
        } else {
            adjusted.new_probability
        };
        self.store.set_probability(&event_id, new_probability, Some(anchor));
        let new_probability = self.store.get(&event_id).map_or(new_probability, |e| e.probability);

        info!(
            event_id = %event_id,
            expert_id = %expert_id,
            votes = aggregate.vote_count,
            "Feedback applied: {:.4} -> {:.4}",
            adjusted.old_probability,
            new_probability,
        );

        self.history.entry(event_id.clone()).or_default().push(PredictionChange {
            timestamp: Utc::now(),
            old_probability: adjusted.old_probability,
            new_probability,
            expert_id,
            expert_weight,
            agrees,
        });

        if event.source == EventSource::Live {
            self.publish(HashMap::from([(event_id, new_probability)])).await;
        }

        Ok(FeedbackOutcome::Admitted { old_probability: adjusted.old_probability, new_probability })
    }

    fn event_lock(&self, event_id: &str) -> Arc<Mutex<()>> {
        self.event_locks
            .entry(event_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Best-effort upstream republish; failures are logged only.
    async fn publish(&self, predictions: HashMap<String, f64>) {
        if !self.settings.publish_predictions || predictions.is_empty() {
            return;
        }
        match self.source.client().post_predictions(&predictions).await {
            Ok(()) => debug!(count = predictions.len(), "Predictions published upstream"),
            Err(e) => warn!(count = predictions.len(), "Failed to publish predictions upstream: {e}"),
        }
    }

    fn record_health(&self, report: &RefreshReport) {
        let using_fallback = report.origin != BatchOrigin::Live && !report.kept_cache;
        self.health.record_refresh(
            Utc::now().timestamp_millis(),
            using_fallback,
            report.forecast_errors.len(),
        );
    }
}

fn keep_previous(event: &mut Event, previous: Option<&Event>) {
    if let Some(prev) = previous {
        event.probability = prev.probability;
        event.base_probability = prev.base_probability;
    }
}

// ---------------------------------------------------------------------------
// EventRefresher
// ---------------------------------------------------------------------------

/// Background task re-running the refresh cycle on a fixed interval.
pub struct EventRefresher {
    orchestrator: Arc<EventRefreshOrchestrator>,
    interval_secs: u64,
}

impl EventRefresher {
    pub fn new(orchestrator: Arc<EventRefreshOrchestrator>, interval_secs: u64) -> Self {
        Self { orchestrator, interval_secs: interval_secs.max(1) }
    }

    pub async fn run(self) {
        let mut ticker = interval(Duration::from_secs(self.interval_secs));
        ticker.tick().await; // skip immediate first tick, bootstrap already ran

        loop {
            ticker.tick().await;
            let report = self.orchestrator.refresh().await;
            if !report.forecast_errors.is_empty() {
                error!(
                    failed = report.forecast_errors.len(),
                    "Refresh finished with {} base prediction failures",
                    report.forecast_errors.len(),
                );
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
