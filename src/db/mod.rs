pub mod feedback_store;
pub mod models;

pub use feedback_store::{FeedbackSnapshot, FeedbackStore, SqliteFeedbackStore};
#[cfg(test)]
pub use feedback_store::MemoryFeedbackStore;
