//! Multi-portal crawl orchestration
//!
//! This module contains the crawl side of a run, including:
//! - The portal registry and listing-page link extraction
//! - Query generation and the search backend fallback chain
//! - Cooperative pause/stop signalling
//! - The coordinator that ties fetching, extraction, scoring and storage together

mod control;
mod coordinator;
mod links;
mod portals;
mod query_bank;
mod search;

pub use control::{ControlToken, CrawlControl, RunSignal};
pub use coordinator::Coordinator;
pub use links::{extract_detail_links, scoped_fragment};
pub use portals::{DetailExtractor, PortalConfig, PortalRegistry, PAGE_PLACEHOLDER};
pub use query_bank::{GeneratedQuery, QueryBank, QueryMode};
pub use search::{
    parse_duckduckgo_results, DuckDuckGoHtml, GoogleCse, KeyRing, SearchBackend, SearchChain, SearchError,
    SearchHit, SearchOutcome, SearchRequest, SearchResult, DUCKDUCKGO_HTML_ENDPOINT, GOOGLE_CSE_ENDPOINT,
};
