//! Statistics generation from the lead database
//!
//! This module provides functionality for extracting and displaying
//! lead and run statistics from the storage layer.

use crate::lead::LeadType;
use crate::storage::{RunRecord, Storage, StorageResult};
use std::collections::HashMap;

/// Lead and run statistics summary
#[derive(Debug, Clone)]
pub struct HarvestStatistics {
    /// Total number of stored leads
    pub total_leads: u64,

    /// Count of leads by classification
    pub leads_by_type: HashMap<LeadType, u64>,

    /// Leads not yet replayed into the external store
    pub unsynced_leads: u64,

    /// Version of the learned score adjustments
    pub adjustment_version: i64,

    /// Most recent runs, newest first
    pub recent_runs: Vec<RunRecord>,
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `storage` - The storage backend to query
/// * `run_limit` - How many recent runs to include
pub fn load_statistics(storage: &dyn Storage, run_limit: usize) -> StorageResult<HarvestStatistics> {
    Ok(HarvestStatistics {
        total_leads: storage.count_leads()?,
        leads_by_type: storage.count_leads_by_type()?,
        unsynced_leads: storage.count_unsynced()?,
        adjustment_version: storage.load_adjustments()?.version,
        recent_runs: storage.list_runs(run_limit)?,
    })
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &HarvestStatistics) {
    println!("=== Lead Statistics ===\n");

    println!("Overview:");
    println!("  Total leads: {}", stats.total_leads);
    println!("  Unsynced leads: {}", stats.unsynced_leads);
    println!("  Score adjustment version: {}", stats.adjustment_version);
    println!();

    println!("Leads by Type:");
    let mut type_counts: Vec<_> = stats.leads_by_type.iter().collect();
    type_counts.sort_by(|a, b| b.1.cmp(a.1));

    for (lead_type, count) in type_counts {
        println!("  {}: {} ({:.1}%)", lead_type, count, percentage(*count, stats.total_leads));
    }
    println!();

    if !stats.recent_runs.is_empty() {
        println!("Recent Runs:");
        for run in &stats.recent_runs {
            println!(
                "  #{} {} started {} | links {} | leads {}{}",
                run.id,
                run.status,
                run.started_at,
                run.links_checked,
                run.leads_accepted,
                run.error_class
                    .as_deref()
                    .map(|class| format!(" | failed: {}", class))
                    .unwrap_or_default()
            );
        }
    }
}

fn percentage(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}
