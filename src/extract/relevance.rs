use async_trait::async_trait;
use thiserror::Error;

/// Verdict from an optional relevance classifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelevanceVerdict {
    Relevant,
    Irrelevant { reason: String },
}

#[derive(Debug, Error)]
pub enum RelevanceError {
    #[error("Relevance filter unavailable: {0}")]
    Unavailable(String),

    #[error("Relevance filter timed out")]
    Timeout,

    #[error("Relevance filter returned an unusable answer: {0}")]
    InvalidResponse(String),
}

/// An opaque page classifier (e.g. an LLM) consulted after the rule-based
/// classification
///
/// Its verdict never overrides a strong candidate phrase, the contact-data
/// override, or any strong rule signal on a page that carries contact data.
#[async_trait]
pub trait RelevanceFilter: Send + Sync {
    fn name(&self) -> &str;

    /// Errors are treated as `Relevant` by the pipeline
    async fn check(&self, url: &str, text: &str) -> Result<RelevanceVerdict, RelevanceError>;
}

/// Filter that accepts everything
pub struct AcceptAll;

#[async_trait]
impl RelevanceFilter for AcceptAll {
    fn name(&self) -> &str {
        "accept_all"
    }

    async fn check(&self, _url: &str, _text: &str) -> Result<RelevanceVerdict, RelevanceError> {
        Ok(RelevanceVerdict::Relevant)
    }
}
