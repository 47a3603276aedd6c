//! Lead record and classification types
//!
//! A `Lead` is the unit that flows from the extraction pipeline through
//! scoring into storage. Scores are always kept inside [0, 100].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Upper bound for every score field
pub const MAX_SCORE: u8 = 100;

/// Tag attached to employer ads that carried contact data
pub const TAG_MANUAL_REVIEW: &str = "manual_review";

/// Tag attached when strong candidate and employer phrases both fired
pub const TAG_MIXED_SIGNALS: &str = "mixed_signals";

/// Classification of a fetched page / lead
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadType {
    /// A job seeker offering themselves
    Candidate,
    /// A job offer published by an employer
    EmployerAd,
    /// No usable signal either way
    Unknown,
    /// Empty, broken or irrelevant page
    Garbage,
}

impl LeadType {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Candidate => "candidate",
            Self::EmployerAd => "employer_ad",
            Self::Unknown => "unknown",
            Self::Garbage => "garbage",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "candidate" => Some(Self::Candidate),
            "employer_ad" => Some(Self::EmployerAd),
            "unknown" => Some(Self::Unknown),
            "garbage" => Some(Self::Garbage),
            _ => None,
        }
    }
}

impl fmt::Display for LeadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}

/// Clamps an arbitrary signed score into [0, 100]
pub fn clamp_score(value: i64) -> u8 {
    value.clamp(0, MAX_SCORE as i64) as u8
}

/// Clamps a floating point score into [0, 100], mapping NaN to 0
pub fn clamp_score_f64(value: f64) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.round().clamp(0.0, MAX_SCORE as f64) as u8
}

/// A candidate contact record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    /// Local row id, set once persisted
    pub id: Option<i64>,

    pub name: Option<String>,

    /// Lowercased, validated email address
    pub email: Option<String>,

    /// E.164 phone number (e.g. `+4917612345678`)
    pub phone: Option<String>,

    /// Canonical `https://wa.me/<digits>` link
    pub whatsapp: Option<String>,

    pub role: Option<String>,
    pub company: Option<String>,

    pub source_url: String,
    pub source_portal: Option<String>,
    pub source_query: Option<String>,
    pub industry: Option<String>,

    pub lead_type: LeadType,

    pub quality_score: u8,
    pub confidence_score: u8,
    pub data_quality: u8,

    pub tags: Vec<String>,
    pub skills: Vec<String>,

    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Lead {
    /// Creates an empty lead for the given source URL
    pub fn new(source_url: impl Into<String>) -> Self {
        Self {
            id: None,
            name: None,
            email: None,
            phone: None,
            whatsapp: None,
            role: None,
            company: None,
            source_url: source_url.into(),
            source_portal: None,
            source_query: None,
            industry: None,
            lead_type: LeadType::Unknown,
            quality_score: 0,
            confidence_score: 0,
            data_quality: 0,
            tags: Vec::new(),
            skills: Vec::new(),
            created_at: None,
            updated_at: None,
        }
    }

    /// True if the lead carries an email or a phone number
    ///
    /// Leads without either are never persisted.
    pub fn has_contact(&self) -> bool {
        self.email.is_some() || self.phone.is_some()
    }

    /// Domain part of the email, lowercased
    pub fn email_domain(&self) -> Option<&str> {
        self.email
            .as_deref()
            .and_then(|e| e.rsplit_once('@'))
            .map(|(_, domain)| domain)
    }

    /// Adds a tag unless it is already present
    pub fn add_tag(&mut self, tag: &str) {
        if !self.has_tag(tag) {
            self.tags.push(tag.to_string());
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}
