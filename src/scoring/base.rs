//! Deterministic base scoring composed with learned adjustments

use crate::extract::{normalize_phone_any, PhoneKind};
use crate::lead::{clamp_score, clamp_score_f64, Lead, LeadType, TAG_MANUAL_REVIEW, TAG_MIXED_SIGNALS};
use crate::scoring::AdjustmentStore;
use serde::Serialize;
use std::sync::Arc;

/// Points per signal and fixed penalties
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreWeights {
    pub email: i64,
    pub mobile: i64,
    pub landline: i64,
    pub whatsapp: i64,
    pub name: i64,
    pub role: i64,
    pub company: i64,
    /// Subtracted from leads classified as employer ads
    pub employer_ad_penalty: i64,
    /// Subtracted when a mobile number is the only usable field
    pub mobile_only_penalty: i64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            email: 20,
            mobile: 25,
            landline: 10,
            whatsapp: 10,
            name: 15,
            role: 10,
            company: 5,
            employer_ad_penalty: 30,
            mobile_only_penalty: 10,
        }
    }
}

/// How a final score was composed
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub base: i64,
    pub learned: f64,
    /// Adjustment snapshot version used
    pub version: i64,
    pub quality: u8,
    pub confidence: u8,
    pub data_quality: u8,
}

/// Scores leads against the current adjustment snapshot
#[derive(Debug, Clone)]
pub struct Scorer {
    weights: ScoreWeights,
    adjustments: Arc<AdjustmentStore>,
    learned_scale: f64,
}

impl Scorer {
    pub fn new(adjustments: Arc<AdjustmentStore>, learned_scale: f64) -> Self {
        Self {
            weights: ScoreWeights::default(),
            adjustments,
            learned_scale,
        }
    }

    pub fn adjustments(&self) -> &Arc<AdjustmentStore> {
        &self.adjustments
    }

    /// Signal points minus penalties, before learning
    pub fn base_score(&self, lead: &Lead) -> i64 {
        let w = &self.weights;
        let mut score = 0;

        if lead.email.is_some() {
            score += w.email;
        }
        let phone_kind = lead.phone.as_deref().and_then(normalize_phone_any).map(|(_, kind)| kind);
        match phone_kind {
            Some(PhoneKind::Mobile) => score += w.mobile,
            Some(PhoneKind::Landline) => score += w.landline,
            None => {}
        }
        if lead.whatsapp.is_some() {
            score += w.whatsapp;
        }
        if lead.name.is_some() {
            score += w.name;
        }
        if lead.role.is_some() {
            score += w.role;
        }
        if lead.company.is_some() {
            score += w.company;
        }

        if lead.lead_type == LeadType::EmployerAd {
            score -= w.employer_ad_penalty;
        }
        let mobile_only = phone_kind == Some(PhoneKind::Mobile)
            && lead.email.is_none()
            && lead.name.is_none()
            && lead.role.is_none();
        if mobile_only {
            score -= w.mobile_only_penalty;
        }
        score
    }

    /// Scores the lead in place and returns the breakdown
    ///
    /// The snapshot is taken once, so every key of this lead is scored
    /// against the same adjustment version.
    pub fn score(&self, lead: &mut Lead) -> ScoreBreakdown {
        let snapshot = self.adjustments.snapshot();
        let base = self.base_score(lead);
        let learned = snapshot.adjustment_for(lead, self.learned_scale);

        let quality = clamp_score_f64(base as f64 + learned);
        let confidence = confidence_score(lead);
        let data_quality = data_quality(lead);
        lead.quality_score = quality;
        lead.confidence_score = confidence;
        lead.data_quality = data_quality;

        ScoreBreakdown {
            base,
            learned,
            version: snapshot.version,
            quality,
            confidence,
            data_quality,
        }
    }
}

/// Certainty that the classification is right
pub fn confidence_score(lead: &Lead) -> u8 {
    let mut confidence: i64 = match lead.lead_type {
        LeadType::Candidate => 70,
        LeadType::EmployerAd => 40,
        LeadType::Unknown => 30,
        LeadType::Garbage => 0,
    };
    if lead.has_tag(TAG_MANUAL_REVIEW) {
        confidence -= 20;
    }
    if lead.has_tag(TAG_MIXED_SIGNALS) {
        confidence -= 15;
    }
    if lead.email.is_some() && lead.phone.is_some() {
        confidence += 10;
    }
    clamp_score(confidence)
}

/// Share of profile fields that are filled in, as a percentage
pub fn data_quality(lead: &Lead) -> u8 {
    let filled = [
        lead.email.is_some(),
        lead.phone.is_some(),
        lead.whatsapp.is_some(),
        lead.name.is_some(),
        lead.role.is_some(),
        lead.company.is_some(),
        !lead.skills.is_empty(),
    ];
    let count = filled.iter().filter(|f| **f).count() as i64;
    clamp_score(count * 100 / filled.len() as i64)
}
