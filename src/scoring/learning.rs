//! Learned score adjustments
//!
//! Feedback rows accumulate in storage; a recomputation folds them into the
//! `score_adjustments` table inside one transaction and bumps a global
//! version. Scorers only ever see an immutable [`AdjustmentSnapshot`].

use crate::lead::Lead;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Pseudo-count used for `confidence = n / (n + PRIOR_SAMPLES)`
pub const PRIOR_SAMPLES: f64 = 10.0;

/// Kind of an externally supplied feedback signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
    /// Human rating of lead quality
    Rating,
    /// The lead converted (or explicitly did not)
    Conversion,
    /// An extracted field was wrong (negative) or confirmed (positive)
    Correction,
}

impl FeedbackKind {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Rating => "rating",
            Self::Conversion => "conversion",
            Self::Correction => "correction",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "rating" => Some(Self::Rating),
            "conversion" => Some(Self::Conversion),
            "correction" => Some(Self::Correction),
            _ => None,
        }
    }
}

/// One feedback signal for a stored lead, with `value` in [-1, 1]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub lead_id: i64,
    pub kind: FeedbackKind,
    pub value: f64,
}

impl Feedback {
    pub fn new(lead_id: i64, kind: FeedbackKind, value: f64) -> Self {
        let value = if value.is_nan() { 0.0 } else { value.clamp(-1.0, 1.0) };
        Self { lead_id, kind, value }
    }

    /// Maps a 1–5 star rating onto [-1, 1]
    pub fn rating(lead_id: i64, stars: u8) -> Self {
        let stars = stars.clamp(1, 5) as f64;
        Self::new(lead_id, FeedbackKind::Rating, (stars - 3.0) / 2.0)
    }

    pub fn conversion(lead_id: i64, converted: bool) -> Self {
        Self::new(lead_id, FeedbackKind::Conversion, if converted { 1.0 } else { -0.5 })
    }

    pub fn correction(lead_id: i64, extraction_correct: bool) -> Self {
        Self::new(lead_id, FeedbackKind::Correction, if extraction_correct { 0.5 } else { -1.0 })
    }
}

/// A learned key → weight record
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Adjustment {
    /// Mean feedback value in [-1, 1]
    pub weight: f64,
    /// `n / (n + PRIOR_SAMPLES)`
    pub confidence: f64,
    pub sample_size: u64,
}

impl Adjustment {
    /// Folds `n` new samples with mean `mean` into this record
    ///
    /// Sample counts add up; the weight becomes the sample-weighted mean.
    pub fn merge(&self, n: u64, mean: f64) -> Adjustment {
        let total = self.sample_size + n;
        if total == 0 {
            return *self;
        }
        let weight = (self.weight * self.sample_size as f64 + mean * n as f64) / total as f64;
        Adjustment {
            weight: weight.clamp(-1.0, 1.0),
            confidence: confidence_for(total),
            sample_size: total,
        }
    }
}

impl Default for Adjustment {
    fn default() -> Self {
        Self {
            weight: 0.0,
            confidence: 0.0,
            sample_size: 0,
        }
    }
}

pub fn confidence_for(samples: u64) -> f64 {
    let n = samples as f64;
    n / (n + PRIOR_SAMPLES)
}

/// Consistent view of the adjustment table at one version
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdjustmentSnapshot {
    pub version: i64,
    pub entries: HashMap<String, Adjustment>,
}

impl AdjustmentSnapshot {
    pub fn get(&self, key: &str) -> Option<&Adjustment> {
        self.entries.get(key)
    }

    /// Sum of `weight * confidence * scale` over the lead's keys
    pub fn adjustment_for(&self, lead: &Lead, scale: f64) -> f64 {
        adjustment_keys(lead)
            .iter()
            .filter_map(|key| self.entries.get(key))
            .map(|adj| adj.weight * adj.confidence * scale)
            .sum()
    }
}

/// Counts from one recomputation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecomputeSummary {
    pub version: i64,
    pub keys_updated: usize,
    pub feedback_processed: usize,
}

/// Keys a lead contributes to and is scored by
pub fn adjustment_keys(lead: &Lead) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(domain) = lead.email_domain() {
        keys.push(format!("email_domain:{}", domain));
    }
    if let Some(industry) = &lead.industry {
        keys.push(format!("industry:{}", industry.to_lowercase()));
    }
    if let Some(portal) = &lead.source_portal {
        keys.push(format!("portal:{}", portal.to_lowercase()));
    }
    keys
}

/// Shared handle to the current snapshot
///
/// Readers clone an `Arc` under a short read lock; publishing swaps the
/// whole snapshot, so a scorer never observes a half-applied update.
#[derive(Debug, Default)]
pub struct AdjustmentStore {
    current: RwLock<Arc<AdjustmentSnapshot>>,
}

impl AdjustmentStore {
    pub fn new(snapshot: AdjustmentSnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    pub fn snapshot(&self) -> Arc<AdjustmentSnapshot> {
        Arc::clone(&self.current.read())
    }

    /// Replaces the snapshot unless it is older than the current one
    pub fn publish(&self, snapshot: AdjustmentSnapshot) -> bool {
        let mut current = self.current.write();
        if snapshot.version < current.version {
            return false;
        }
        *current = Arc::new(snapshot);
        true
    }

    pub fn version(&self) -> i64 {
        self.current.read().version
    }
}
