//! Candidate vs. employer-ad classification
//!
//! Precedence is fixed:
//!
//! 1. URL path markers decide outright.
//! 2. A strong candidate phrase yields `candidate`, whatever else the text says.
//! 3. A strong employer phrase yields `employer_ad` and blocks the page, unless
//!    contact data was extracted; then the page passes tagged `manual_review`.
//! 4. Otherwise weak hints are counted; near-empty pages without contact data
//!    are `garbage`.

use crate::lead::{LeadType, TAG_MANUAL_REVIEW, TAG_MIXED_SIGNALS};
use regex::Regex;
use std::sync::LazyLock;

pub const CANDIDATE_PATH_MARKERS: &[&str] = &["/stellengesuche", "/s-stellengesuche", "/jobgesuche", "/gesuche/"];
pub const EMPLOYER_PATH_MARKERS: &[&str] = &["/jobs/", "/stellenangebote", "/s-jobs", "/job/", "/stellenanzeige"];

pub const STRONG_CANDIDATE_PHRASES: &[&str] = &[
    "ich suche",
    "suche job",
    "suche arbeit",
    "suche eine stelle",
    "suche stelle",
    "suche eine neue herausforderung",
    "auf jobsuche",
    "auf der suche nach einer neuen stelle",
    "open to work",
    "biete meine arbeitskraft",
    "ich biete mich an",
];

const EMPLOYER_OFFER_PHRASES: &[&str] = &["wir bieten", "we offer", "das bieten wir"];
const EMPLOYER_APPLY_PHRASES: &[&str] = &[
    "jetzt bewerben",
    "bewirb dich",
    "bewerben sie sich",
    "ihre bewerbung",
    "apply now",
];

const WEAK_CANDIDATE_HINTS: &[&str] = &["lebenslauf", "berufserfahrung", "verfügbar ab", "suche", "gelernte", "gelernter"];
const WEAK_EMPLOYER_HINTS: &[&str] = &["wir suchen", "stellenangebot", "bewerbung", "unser team", "vollzeit", "gehalt"];

/// Pages shorter than this with no contact data are garbage
pub const MIN_MEANINGFUL_TEXT: usize = 40;

static GENDER_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\(\s*[mwdfx]\s*/\s*[mwdfx]\s*(?:/\s*[mwdfx]\s*)?\)|\b[mwd]/[mwd]/[mwd]\b").expect("valid regex")
});

/// Which precedence step produced the decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassificationRule {
    UrlMarker,
    StrongCandidate,
    StrongEmployer,
    ContactOverride,
    WeakSignals,
    Garbage,
}

/// Raw signals detected on a page
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Signals {
    pub url_marker: Option<LeadType>,
    pub strong_candidate: bool,
    pub strong_employer: bool,
    pub has_contact: bool,
}

impl Signals {
    pub fn any_strong(&self) -> bool {
        self.url_marker.is_some() || self.strong_candidate || self.strong_employer
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub lead_type: LeadType,
    /// False when the page must not produce a lead
    pub accepted: bool,
    pub rule: ClassificationRule,
    pub tags: Vec<&'static str>,
    pub signals: Signals,
}

/// Path marker for a URL, candidate markers winning over employer markers
pub fn url_marker(url: &str) -> Option<LeadType> {
    let path = url::Url::parse(url)
        .map(|u| u.path().to_lowercase())
        .unwrap_or_else(|_| url.to_lowercase());

    if CANDIDATE_PATH_MARKERS.iter().any(|m| path.contains(m)) {
        Some(LeadType::Candidate)
    } else if EMPLOYER_PATH_MARKERS.iter().any(|m| path.contains(m)) {
        Some(LeadType::EmployerAd)
    } else {
        None
    }
}

pub fn has_strong_candidate_phrase(lower: &str) -> bool {
    STRONG_CANDIDATE_PHRASES.iter().any(|p| lower.contains(p))
}

pub fn has_strong_employer_phrase(text: &str) -> bool {
    if GENDER_MARKER_RE.is_match(text) {
        return true;
    }
    let lower = text.to_lowercase();
    EMPLOYER_OFFER_PHRASES.iter().any(|p| lower.contains(p))
        && EMPLOYER_APPLY_PHRASES.iter().any(|p| lower.contains(p))
}

pub fn detect_signals(url: &str, text: &str, has_contact: bool) -> Signals {
    let lower = text.to_lowercase();
    Signals {
        url_marker: url_marker(url),
        strong_candidate: has_strong_candidate_phrase(&lower),
        strong_employer: has_strong_employer_phrase(text),
        has_contact,
    }
}

/// Classifies a page from its URL, visible text and whether contact data exists
pub fn classify(url: &str, text: &str, has_contact: bool) -> Classification {
    let signals = detect_signals(url, text, has_contact);
    classify_signals(signals, text)
}

fn employer_outcome(signals: Signals, blocking_rule: ClassificationRule) -> Classification {
    if signals.has_contact {
        Classification {
            lead_type: LeadType::EmployerAd,
            accepted: true,
            rule: ClassificationRule::ContactOverride,
            tags: vec![TAG_MANUAL_REVIEW],
            signals,
        }
    } else {
        Classification {
            lead_type: LeadType::EmployerAd,
            accepted: false,
            rule: blocking_rule,
            tags: Vec::new(),
            signals,
        }
    }
}

pub fn classify_signals(signals: Signals, text: &str) -> Classification {
    match signals.url_marker {
        Some(LeadType::Candidate) => {
            return Classification {
                lead_type: LeadType::Candidate,
                accepted: true,
                rule: ClassificationRule::UrlMarker,
                tags: Vec::new(),
                signals,
            }
        }
        Some(_) => return employer_outcome(signals, ClassificationRule::UrlMarker),
        None => {}
    }

    if signals.strong_candidate {
        let tags = if signals.strong_employer {
            vec![TAG_MIXED_SIGNALS]
        } else {
            Vec::new()
        };
        return Classification {
            lead_type: LeadType::Candidate,
            accepted: true,
            rule: ClassificationRule::StrongCandidate,
            tags,
            signals,
        };
    }

    if signals.strong_employer {
        return employer_outcome(signals, ClassificationRule::StrongEmployer);
    }

    let trimmed = text.trim();
    if !signals.has_contact && trimmed.chars().count() < MIN_MEANINGFUL_TEXT {
        return Classification {
            lead_type: LeadType::Garbage,
            accepted: false,
            rule: ClassificationRule::Garbage,
            tags: Vec::new(),
            signals,
        };
    }

    let lower = trimmed.to_lowercase();
    let candidate_hints = WEAK_CANDIDATE_HINTS.iter().filter(|h| lower.contains(*h)).count();
    let employer_hints = WEAK_EMPLOYER_HINTS.iter().filter(|h| lower.contains(*h)).count();

    if employer_hints > candidate_hints {
        return employer_outcome(signals, ClassificationRule::WeakSignals);
    }

    Classification {
        lead_type: if candidate_hints > employer_hints {
            LeadType::Candidate
        } else {
            LeadType::Unknown
        },
        accepted: true,
        rule: ClassificationRule::WeakSignals,
        tags: Vec::new(),
        signals,
    }
}
