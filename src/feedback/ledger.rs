use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::db::{FeedbackSnapshot, FeedbackStore};
use crate::error::{AppError, Result};
use crate::types::{FeedbackAggregate, FeedbackVote};

const SECS_PER_DAY: f64 = 24.0 * 3600.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    DuplicateExpert,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::DuplicateExpert => write!(f, "expert already submitted feedback for this event"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Admitted,
    Rejected(RejectReason),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ExpertSummary {
    pub expert_id: String,
    pub total_feedbacks: usize,
    pub agree_ratio: Option<f64>,
}

/// Append-only per-event vote log backed by a [`FeedbackStore`].
///
/// The duplicate check, the durable save and the in-memory commit all happen
/// under one lock, so two concurrent submissions from the same expert for the
/// same event cannot both be admitted.
pub struct FeedbackLedger {
    store: Arc<dyn FeedbackStore>,
    votes: Mutex<FeedbackSnapshot>,
    decay_rate: f64,
}

impl FeedbackLedger {
    pub async fn load(store: Arc<dyn FeedbackStore>, decay_rate: f64) -> Result<Self> {
        let votes = store
            .load()
            .await
            .map_err(|e| AppError::Persistence(format!("loading feedback ledger: {e}")))?;
        let total: usize = votes.values().map(Vec::len).sum();
        info!(events = votes.len(), votes = total, "Feedback ledger loaded");
        Ok(Self { store, votes: Mutex::new(votes), decay_rate })
    }

    pub async fn append(&self, vote: FeedbackVote) -> Result<AppendOutcome> {
        let mut votes = self.votes.lock().await;

        let duplicate = votes
            .get(&vote.event_id)
            .is_some_and(|v| v.iter().any(|existing| existing.expert_id == vote.expert_id));
        if duplicate {
            return Ok(AppendOutcome::Rejected(RejectReason::DuplicateExpert));
        }

        let mut next = votes.clone();
        next.entry(vote.event_id.clone()).or_default().push(vote.clone());

        if let Err(e) = self.store.save(&next).await {
            warn!(
                event_id = %vote.event_id,
                expert_id = %vote.expert_id,
                "Feedback save failed, vote not admitted: {e}",
            );
            return Err(AppError::Persistence(e.to_string()));
        }

        *votes = next;
        Ok(AppendOutcome::Admitted)
    }

    #[cfg(test)]
    pub async fn has_vote(&self, event_id: &str, expert_id: &str) -> bool {
        let votes = self.votes.lock().await;
        votes
            .get(event_id)
            .is_some_and(|v| v.iter().any(|vote| vote.expert_id == expert_id))
    }

    #[cfg(test)]
    pub async fn votes_for(&self, event_id: &str) -> Vec<FeedbackVote> {
        self.votes.lock().await.get(event_id).cloned().unwrap_or_default()
    }

    pub async fn aggregate(&self, event_id: &str) -> FeedbackAggregate {
        self.aggregate_at(event_id, Utc::now()).await
    }

    /// Recomputed from the full vote log on every call.
    pub async fn aggregate_at(&self, event_id: &str, now: DateTime<Utc>) -> FeedbackAggregate {
        let votes = self.votes.lock().await;
        match votes.get(event_id) {
            Some(v) => FeedbackAggregate {
                vote_count: v.len(),
                weighted_agreement_score: weighted_agreement_score(v, now, self.decay_rate),
            },
            None => FeedbackAggregate::neutral(),
        }
    }

    pub async fn expert_summary(&self, expert_id: &str) -> ExpertSummary {
        let votes = self.votes.lock().await;
        let (total, agreed) = votes
            .values()
            .flat_map(|v| v.iter())
            .filter(|v| v.expert_id == expert_id)
            .fold((0usize, 0usize), |(t, a), v| (t + 1, a + usize::from(v.agrees)));
        ExpertSummary {
            expert_id: expert_id.to_string(),
            total_feedbacks: total,
            agree_ratio: (total > 0).then(|| agreed as f64 / total as f64),
        }
    }
}

/// Effective weight of one vote: reputation (or the caller weight) decayed
/// exponentially by age in days. Future timestamps count as age zero.
pub fn effective_weight(vote: &FeedbackVote, now: DateTime<Utc>, decay_rate: f64) -> f64 {
    let multiplier = vote.reputation.unwrap_or(vote.weight);
    let age_days = ((now - vote.submitted_at).num_milliseconds() as f64 / 1000.0 / SECS_PER_DAY).max(0.0);
    let w = multiplier * (-decay_rate * age_days).exp();
    if w.is_finite() {
        w.max(0.0)
    } else {
        0.0
    }
}

/// Σ(wᵢ·agreeᵢ) / Σwᵢ, or 0.5 when there is no usable weight.
pub fn weighted_agreement_score(votes: &[FeedbackVote], now: DateTime<Utc>, decay_rate: f64) -> f64 {
    let (weighted, total) = votes.iter().fold((0.0, 0.0), |(weighted, total), vote| {
        let w = effective_weight(vote, now, decay_rate);
        let agreement = if vote.agrees { 1.0 } else { 0.0 };
        (weighted + w * agreement, total + w)
    });

    if total <= 0.0 {
        0.5
    } else {
        (weighted / total).clamp(0.0, 1.0)
    }
}
