//! Row type for the `feedback_votes` table (see migrations/0001_feedback_votes.sql).

use chrono::DateTime;

use crate::error::{AppError, Result};
use crate::types::FeedbackVote;

#[derive(Debug, sqlx::FromRow)]
pub struct FeedbackVoteRow {
    pub id: i64,
    pub event_id: String,
    pub expert_id: String,
    pub agrees: bool,
    pub weight: f64,
    pub reputation: Option<f64>,
    pub comment: Option<String>,
    /// Unix milliseconds, UTC.
    pub submitted_at: i64,
}

impl FeedbackVoteRow {
    pub fn into_vote(self) -> Result<FeedbackVote> {
        let submitted_at = DateTime::from_timestamp_millis(self.submitted_at).ok_or_else(|| {
            AppError::Persistence(format!("row {} has invalid submitted_at {}", self.id, self.submitted_at))
        })?;
        Ok(FeedbackVote {
            event_id: self.event_id,
            expert_id: self.expert_id,
            agrees: self.agrees,
            weight: self.weight,
            reputation: self.reputation,
            comment: self.comment,
            submitted_at,
        })
    }
}
