pub mod admission;
pub mod ledger;

pub use admission::{AdmissionOutcome, FeedbackAdmissionPolicy, FeedbackRequest, UniformTrust};
pub use ledger::FeedbackLedger;
