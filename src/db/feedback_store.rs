use std::collections::HashMap;

use async_trait::async_trait;
use tracing::debug;

use crate::db::models::FeedbackVoteRow;
use crate::error::Result;
use crate::types::FeedbackVote;

/// Full ledger contents: event_id → votes in admission order.
pub type FeedbackSnapshot = HashMap<String, Vec<FeedbackVote>>;

/// Durable feedback storage with whole-snapshot semantics.
#[async_trait]
pub trait FeedbackStore: Send + Sync {
    async fn load(&self) -> Result<FeedbackSnapshot>;

    /// Replace the stored snapshot. Must be all-or-nothing.
    async fn save(&self, snapshot: &FeedbackSnapshot) -> Result<()>;
}

// ---------------------------------------------------------------------------
// SQLite
// ---------------------------------------------------------------------------

pub struct SqliteFeedbackStore {
    pool: sqlx::SqlitePool,
}

impl SqliteFeedbackStore {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FeedbackStore for SqliteFeedbackStore {
    async fn load(&self) -> Result<FeedbackSnapshot> {
        let rows: Vec<FeedbackVoteRow> = sqlx::query_as(
            r#"
            SELECT id, event_id, expert_id, agrees, weight, reputation, comment, submitted_at
            FROM feedback_votes
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut snapshot = FeedbackSnapshot::new();
        for row in rows {
            let vote = row.into_vote()?;
            snapshot.entry(vote.event_id.clone()).or_default().push(vote);
        }
        Ok(snapshot)
    }

    async fn save(&self, snapshot: &FeedbackSnapshot) -> Result<()> {
        // Full rewrite in one transaction: a crash leaves the previous snapshot intact.
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM feedback_votes").execute(&mut *tx).await?;

        let mut written = 0usize;
        let mut event_ids: Vec<&String> = snapshot.keys().collect();
        event_ids.sort();
        for event_id in event_ids {
            for vote in &snapshot[event_id] {
                sqlx::query(
                    r#"
                    INSERT INTO feedback_votes (
                        event_id, expert_id, agrees, weight, reputation, comment, submitted_at
                    ) VALUES (?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&vote.event_id)
                .bind(&vote.expert_id)
                .bind(vote.agrees)
                .bind(vote.weight)
                .bind(vote.reputation)
                .bind(vote.comment.as_deref())
                .bind(vote.submitted_at.timestamp_millis())
                .execute(&mut *tx)
                .await?;
                written += 1;
            }
        }

        tx.commit().await?;
        debug!(votes = written, "Feedback snapshot saved");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory (tests)
// ---------------------------------------------------------------------------

#[cfg(test)]
pub use memory::MemoryFeedbackStore;

#[cfg(test)]
mod memory {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;
    use crate::error::AppError;

    #[derive(Default)]
    pub struct MemoryFeedbackStore {
        snapshot: tokio::sync::Mutex<FeedbackSnapshot>,
        fail_saves: AtomicBool,
        saves: AtomicUsize,
    }

    impl MemoryFeedbackStore {
        pub fn set_fail_saves(&self, fail: bool) {
            self.fail_saves.store(fail, Ordering::SeqCst);
        }

        pub fn save_count(&self) -> usize {
            self.saves.load(Ordering::SeqCst)
        }

        pub async fn stored(&self) -> FeedbackSnapshot {
            self.snapshot.lock().await.clone()
        }
    }

    #[async_trait]
    impl FeedbackStore for MemoryFeedbackStore {
        async fn load(&self) -> Result<FeedbackSnapshot> {
            Ok(self.snapshot.lock().await.clone())
        }

        async fn save(&self, snapshot: &FeedbackSnapshot) -> Result<()> {
            if self.fail_saves.load(Ordering::SeqCst) {
                return Err(AppError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "simulated write failure",
                )));
            }
            *self.snapshot.lock().await = snapshot.clone();
            self.saves.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> sqlx::SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    fn vote(event_id: &str, expert_id: &str, agrees: bool) -> FeedbackVote {
        FeedbackVote {
            event_id: event_id.to_string(),
            expert_id: expert_id.to_string(),
            agrees,
            weight: 1.0,
            reputation: None,
            comment: Some("looks right".to_string()),
            submitted_at: Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap(),
        }
    }

    #[tokio::test]
    async fn sqlite_save_then_load_preserves_votes() {
        let store = SqliteFeedbackStore::new(memory_pool().await);

        let mut snapshot = FeedbackSnapshot::new();
        snapshot.insert("e1".into(), vec![vote("e1", "alice", true), vote("e1", "bob", false)]);
        snapshot.insert("e2".into(), vec![vote("e2", "alice", false)]);
        store.save(&snapshot).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, snapshot);
    }

    #[tokio::test]
    async fn sqlite_save_is_a_full_rewrite() {
        let store = SqliteFeedbackStore::new(memory_pool().await);

        let mut first = FeedbackSnapshot::new();
        first.insert("e1".into(), vec![vote("e1", "alice", true)]);
        store.save(&first).await.unwrap();

        let mut second = FeedbackSnapshot::new();
        second.insert("e2".into(), vec![vote("e2", "bob", true)]);
        store.save(&second).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert!(!loaded.contains_key("e1"));
        assert_eq!(loaded["e2"].len(), 1);
    }

    #[tokio::test]
    async fn sqlite_failed_save_keeps_previous_snapshot() {
        let store = SqliteFeedbackStore::new(memory_pool().await);

        let mut first = FeedbackSnapshot::new();
        first.insert("e1".into(), vec![vote("e1", "alice", true)]);
        store.save(&first).await.unwrap();

        // Duplicate (event_id, expert_id) violates the UNIQUE constraint mid-transaction.
        let mut bad = FeedbackSnapshot::new();
        bad.insert("e2".into(), vec![vote("e2", "bob", true), vote("e2", "bob", false)]);
        assert!(store.save(&bad).await.is_err());

        assert_eq!(store.load().await.unwrap(), first);
    }
}
