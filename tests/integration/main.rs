//! Integration tests for Lead-Harvest
//!
//! Network behaviour is exercised against wiremock servers; storage tests use
//! temporary SQLite files so several connections can contend for the lock.

mod crawl_tests;
mod lifecycle_tests;
mod search_tests;
mod storage_tests;
mod support;
