//! Extraction and classification pipeline
//!
//! Turns fetched HTML into a classified [`Lead`](crate::lead::Lead). Nothing
//! in here returns an error; unparseable input simply yields fewer fields.

pub mod classify;
pub mod contact;
pub mod name;
mod pipeline;
mod relevance;

pub use classify::{classify, Classification, ClassificationRule, Signals};
pub use contact::{normalize_email, normalize_mobile, normalize_phone_any, PhoneKind};
pub use pipeline::{relevance_overridden, Contacts, ExtractionOutcome, ExtractionPipeline, PageContext, PageDocument};
pub use relevance::{AcceptAll, RelevanceError, RelevanceFilter, RelevanceVerdict};
