use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::config::BlendConfig;
use crate::error::Result;
use crate::feedback::ledger::{AppendOutcome, FeedbackLedger, RejectReason};
use crate::types::{clamp_probability, FeedbackVote};

/// Trust score per expert. Plug a reputation system in here.
pub trait ExpertTrust: Send + Sync {
    fn multiplier(&self, expert_id: &str) -> f64;
}

/// Every expert is trusted equally.
pub struct UniformTrust;

impl ExpertTrust for UniformTrust {
    fn multiplier(&self, _expert_id: &str) -> f64 {
        1.0
    }
}

#[derive(Debug, Clone)]
pub struct FeedbackRequest {
    pub event_id: String,
    pub expert_id: String,
    pub agrees: bool,
    pub weight: f64,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdjustmentResult {
    pub old_probability: f64,
    pub adjustment: f64,
    pub new_probability: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AdmissionOutcome {
    Admitted(AdjustmentResult),
    /// Nothing changed; `probability` is the prediction as it was.
    Rejected { reason: RejectReason, probability: f64 },
}

pub struct FeedbackAdmissionPolicy {
    trust: Arc<dyn ExpertTrust>,
    base_rate: f64,
    max_adjustment: f64,
}

impl FeedbackAdmissionPolicy {
    pub fn new(cfg: &BlendConfig, trust: Arc<dyn ExpertTrust>) -> Self {
        Self { trust, base_rate: cfg.base_rate, max_adjustment: cfg.max_adjustment }
    }

    /// `min(base_rate × weight × trust, max_adjustment)`, never negative.
    pub fn adjustment_magnitude(&self, expert_id: &str, expert_weight: f64) -> f64 {
        let raw = self.base_rate * expert_weight * self.trust.multiplier(expert_id);
        if raw.is_finite() {
            raw.clamp(0.0, self.max_adjustment)
        } else {
            0.0
        }
    }

    /// Record the vote if this expert has not voted on the event yet and
    /// compute the headroom-proportional update of `current_probability`.
    pub async fn admit(
        &self,
        ledger: &FeedbackLedger,
        request: FeedbackRequest,
        current_probability: f64,
    ) -> Result<AdmissionOutcome> {
        let adjustment = self.adjustment_magnitude(&request.expert_id, request.weight);
        let trust = self.trust.multiplier(&request.expert_id);

        let vote = FeedbackVote {
            event_id: request.event_id.clone(),
            expert_id: request.expert_id.clone(),
            agrees: request.agrees,
            weight: request.weight,
            // Non-uniform trust reaches the aggregate through the stored reputation.
            reputation: (trust.is_finite() && trust != 1.0).then(|| (request.weight * trust).max(0.0)),
            comment: request.comment,
            submitted_at: Utc::now(),
        };

        match ledger.append(vote).await? {
            AppendOutcome::Rejected(reason) => {
                info!(
                    event_id = %request.event_id,
                    expert_id = %request.expert_id,
                    "Feedback rejected: {reason}",
                );
                Ok(AdmissionOutcome::Rejected { reason, probability: current_probability })
            }
            AppendOutcome::Admitted => {
                let new_probability = apply_adjustment(current_probability, request.agrees, adjustment);
                Ok(AdmissionOutcome::Admitted(AdjustmentResult {
                    old_probability: current_probability,
                    adjustment,
                    new_probability,
                }))
            }
        }
    }
}

/// Agreement moves toward 1 by a share of the remaining headroom,
/// disagreement toward 0 by a share of the current mass.
pub fn apply_adjustment(current: f64, agrees: bool, adjustment: f64) -> f64 {
    let new_p = if agrees {
        current + (1.0 - current) * adjustment
    } else {
        current - current * adjustment
    };
    clamp_probability(new_p)
}
