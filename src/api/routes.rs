use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::api::health::HealthSnapshot;
use crate::api::latency::LatencySummary;
use crate::error::AppError;
use crate::event_refresh::{EventRefreshOrchestrator, FeedbackOutcome};
use crate::feedback::ledger::ExpertSummary;
use crate::feedback::FeedbackRequest;
use crate::types::{Event, PredictionChange};

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<EventRefreshOrchestrator>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/events", get(get_events))
        .route("/events/:id", get(get_event))
        .route("/events/:id/history", get(get_event_history))
        .route("/experts/:id", get(get_expert))
        .route("/feedback", post(post_feedback))
        .route("/health", get(get_health))
        .route("/stats/latency", get(get_stats_latency))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct EventResponse {
    pub event_id: String,
    pub market_type: String,
    pub probability: f64,
    pub description: String,
    pub cutoff: DateTime<Utc>,
    pub status: String,
}

impl From<Event> for EventResponse {
    fn from(e: Event) -> Self {
        Self {
            event_id: e.event_id,
            market_type: e.market_type.to_string(),
            probability: e.probability,
            description: e.description,
            cutoff: e.cutoff,
            status: e.status.to_string(),
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct FeedbackBody {
    pub event_id: String,
    pub agrees: bool,
    pub comment: Option<String>,
    pub expert_id: String,
    pub expert_weight: Option<f64>,
}

#[derive(Serialize, Debug)]
pub struct FeedbackResponse {
    pub success: bool,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    #[serde(flatten)]
    pub refresh: HealthSnapshot,
    pub event_count: usize,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_events(State(state): State<ApiState>) -> Json<Vec<EventResponse>> {
    let events = state.orchestrator.list_or_refresh().await;
    Json(events.into_iter().map(EventResponse::from).collect())
}

async fn get_event(
    State(state): State<ApiState>,
    Path(event_id): Path<String>,
) -> Result<Json<EventResponse>, AppError> {
    state
        .orchestrator
        .get_event(&event_id)
        .await
        .map(|e| Json(e.into()))
        .ok_or(AppError::EventNotFound(event_id))
}

async fn get_event_history(
    State(state): State<ApiState>,
    Path(event_id): Path<String>,
) -> Result<Json<Vec<PredictionChange>>, AppError> {
    if state.orchestrator.get_event(&event_id).await.is_none() {
        return Err(AppError::EventNotFound(event_id));
    }
    Ok(Json(state.orchestrator.history(&event_id)))
}

async fn get_expert(
    State(state): State<ApiState>,
    Path(expert_id): Path<String>,
) -> Json<ExpertSummary> {
    Json(state.orchestrator.ledger().expert_summary(&expert_id).await)
}

async fn post_feedback(
    State(state): State<ApiState>,
    Json(body): Json<FeedbackBody>,
) -> Result<Json<FeedbackResponse>, AppError> {
    info!(event_id = %body.event_id, expert_id = %body.expert_id, "Received feedback request");

    let request = FeedbackRequest {
        event_id: body.event_id,
        expert_id: body.expert_id,
        agrees: body.agrees,
        weight: body.expert_weight.unwrap_or(1.0),
        comment: body.comment,
    };

    let (success, message) = match state.orchestrator.submit_feedback(request).await? {
        FeedbackOutcome::Admitted { new_probability, .. } => (
            true,
            format!("Feedback processed successfully, probability now {new_probability:.4}"),
        ),
        FeedbackOutcome::Rejected { reason, .. } => (false, format!("Feedback rejected: {reason}")),
    };

    Ok(Json(FeedbackResponse { success, message, timestamp: Utc::now() }))
}

async fn get_health(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        refresh: state.orchestrator.health().snapshot(),
        event_count: state.orchestrator.event_count(),
    })
}

async fn get_stats_latency(State(state): State<ApiState>) -> Json<LatencySummary> {
    Json(state.orchestrator.latency().summary())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BlendConfig;
    use crate::db::MemoryFeedbackStore;
    use crate::error::Result;
    use crate::event_refresh::RefreshSettings;
    use crate::feedback::{FeedbackLedger, UniformTrust};
    use crate::fetcher::{UpstreamEventSource, UpstreamMarketClient};
    use crate::forecast::BasePredictor;
    use crate::state::EventStore;
    use crate::types::RawEvent;
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct DownClient;

    #[async_trait]
    impl UpstreamMarketClient for DownClient {
        async fn get_events(&self, _from: i64, _offset: usize, _limit: usize) -> Result<Vec<RawEvent>> {
            Err(AppError::UpstreamUnavailable("down".into()))
        }

        async fn post_predictions(&self, _p: &HashMap<String, f64>) -> Result<()> {
            Err(AppError::UpstreamUnavailable("down".into()))
        }
    }

    struct HalfPredictor;

    #[async_trait]
    impl BasePredictor for HalfPredictor {
        async fn predict(&self, _description: &str) -> Result<f64> {
            Ok(0.5)
        }
    }

    async fn state() -> ApiState {
        let ledger = FeedbackLedger::load(Arc::new(MemoryFeedbackStore::default()), 0.1)
            .await
            .unwrap();
        let orchestrator = EventRefreshOrchestrator::new(
            UpstreamEventSource::new(Arc::new(DownClient), 100, 1),
            EventStore::new(),
            Arc::new(HalfPredictor),
            Arc::new(ledger),
            BlendConfig::default(),
            Arc::new(UniformTrust),
            RefreshSettings { lookback_days: 7, max_concurrent_forecasts: 1, publish_predictions: true },
        );
        ApiState { orchestrator: Arc::new(orchestrator) }
    }

    fn body(event_id: &str, expert_id: &str) -> FeedbackBody {
        FeedbackBody {
            event_id: event_id.to_string(),
            agrees: true,
            comment: Some("solid reasoning".to_string()),
            expert_id: expert_id.to_string(),
            expert_weight: None,
        }
    }

    #[tokio::test]
    async fn events_fall_back_to_synthetic_list() {
        let Json(events) = get_events(State(state().await)).await;
        assert_eq!(events.len(), 5);
        assert!(events.iter().all(|e| e.market_type == "BINARY" && e.status == "UNRESOLVED"));
    }

    #[tokio::test]
    async fn feedback_succeeds_once_then_reports_soft_failure() {
        let state = state().await;

        let Json(first) = post_feedback(State(state.clone()), Json(body("nft_revival", "alice")))
            .await
            .unwrap();
        assert!(first.success);

        let Json(second) = post_feedback(State(state), Json(body("nft_revival", "alice")))
            .await
            .unwrap();
        assert!(!second.success);
        assert!(second.message.contains("already"));
    }

    #[tokio::test]
    async fn unknown_event_is_404() {
        let err = post_feedback(State(state().await), Json(body("nope", "alice")))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::EventNotFound(_)));
    }
}
