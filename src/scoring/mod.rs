//! Lead scoring, enrichment and the feedback loop
//!
//! - `base`: deterministic signal weights composed with learned adjustments
//! - `learning`: feedback records and immutable adjustment snapshots
//! - `enrichment`: phone-directory corroboration with a persistent cache
//! - `worker`: background recomputation thread

mod base;
mod enrichment;
mod learning;
mod worker;

pub use base::{confidence_score, data_quality, ScoreBreakdown, ScoreWeights, Scorer};
pub use enrichment::{
    apply_entry, parse_listing, DirectoryListing, EnrichmentOutcome, Enricher, NoopDirectory, PhoneDirectory,
    TelephoneBookDirectory, DEFAULT_DIRECTORY_URL, TAG_DIRECTORY_VERIFIED,
};
pub use learning::{
    adjustment_keys, confidence_for, Adjustment, AdjustmentSnapshot, AdjustmentStore, Feedback, FeedbackKind,
    RecomputeSummary, PRIOR_SAMPLES,
};
pub use worker::{recompute_once, LearningWorker};
