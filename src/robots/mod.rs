//! Robots.txt handling
//!
//! Every portal and search-result fetch is gated by [`RobotsGate::check`];
//! disallowed paths are skipped before any request to the page itself.

mod gate;
mod parser;

pub use gate::{RobotsDecision, RobotsGate, ROBOTS_AGENT};
pub use parser::RobotsRules;
