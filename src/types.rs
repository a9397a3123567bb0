use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub event_id: String,
    pub market_type: MarketType,
    /// Used verbatim as the forecasting prompt.
    pub description: String,
    pub cutoff: DateTime<Utc>,
    pub status: EventStatus,
    /// Current published estimate, always within [0,1].
    pub probability: f64,
    /// Last base predictor output, or the probability pinned by the first
    /// vote on a never-forecast event. Anchor for feedback re-blending.
    #[serde(default)]
    pub base_probability: Option<f64>,
    #[serde(default)]
    pub source: EventSource,
}

impl Event {
    /// Open for forecasting: unresolved and before its cutoff.
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.status == EventStatus::Unresolved && now < self.cutoff
    }

    pub fn set_probability(&mut self, p: f64) {
        self.probability = clamp_probability(p);
    }
}

/// Clamp to [0,1]; NaN collapses to the neutral 0.5.
pub fn clamp_probability(p: f64) -> f64 {
    if p.is_nan() {
        0.5
    } else {
        p.clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketType {
    Binary,
}

impl std::fmt::Display for MarketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MarketType::Binary => write!(f, "BINARY"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    Unresolved,
    Resolved,
    Deleted,
}

impl EventStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "UNRESOLVED" | "PENDING" => Some(EventStatus::Unresolved),
            "RESOLVED" | "SETTLED" => Some(EventStatus::Resolved),
            "DELETED" | "DISCARDED" => Some(EventStatus::Deleted),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventStatus::Unresolved => "UNRESOLVED",
            EventStatus::Resolved => "RESOLVED",
            EventStatus::Deleted => "DELETED",
        };
        write!(f, "{s}")
    }
}

/// Provenance tag, fixed at ingestion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    #[default]
    Live,
    Synthetic,
}

impl std::fmt::Display for EventSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventSource::Live => write!(f, "live"),
            EventSource::Synthetic => write!(f, "synthetic"),
        }
    }
}

/// A record as handed over by an upstream client: either still JSON-shaped
/// or already typed.
#[derive(Debug, Clone)]
pub enum RawEvent {
    Json(serde_json::Value),
    Typed(Event),
}

// ---------------------------------------------------------------------------
// Feedback
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedbackVote {
    pub event_id: String,
    pub expert_id: String,
    pub agrees: bool,
    /// Caller-supplied multiplier.
    pub weight: f64,
    /// Trust-scaled weight from the expert's reputation; overrides `weight` when present.
    #[serde(default)]
    pub reputation: Option<f64>,
    #[serde(default)]
    pub comment: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

/// Derived from the vote log on every read, never cached.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeedbackAggregate {
    pub vote_count: usize,
    pub weighted_agreement_score: f64,
}

impl FeedbackAggregate {
    pub fn neutral() -> Self {
        Self { vote_count: 0, weighted_agreement_score: 0.5 }
    }
}

/// One entry of an event's probability change log.
#[derive(Debug, Clone, Serialize)]
pub struct PredictionChange {
    pub timestamp: DateTime<Utc>,
    pub old_probability: f64,
    pub new_probability: f64,
    pub expert_id: String,
    pub expert_weight: f64,
    pub agrees: bool,
}
