//! Best-effort name, role and skill extraction

use regex::Regex;
use std::sync::LazyLock;

const NAME_WORD: &str = r"[A-ZÄÖÜ][a-zäöüß]+(?:-[A-ZÄÖÜ][a-zäöüß]+)?";

static INTRO_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?:[Mm]ein [Nn]ame ist|[Ii]ch bin|[Ii]ch heiße|Name:|Ansprechpartner(?:in)?:|Kontaktperson:)\s*(?:(?:Herr|Frau)\s+)?({w}(?:\s+{w}){{0,2}})",
        w = NAME_WORD
    ))
    .expect("valid regex")
});

static SALUTATION_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"\b(?:Herr|Frau)\s+({w}(?:\s+{w})?)", w = NAME_WORD)).expect("valid regex")
});

static ROLE_AFTER_ALS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[Aa]ls\s+([A-ZÄÖÜ][\wäöüß/\-]+(?:\s+[A-ZÄÖÜ][\wäöüß\-]+)?)").expect("valid regex")
});

static COMPANY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:Firma|Unternehmen|Arbeitgeber):\s*([^\n,;]{2,60})").expect("valid regex")
});

/// Occupation keywords recognised anywhere in the text
pub const ROLE_KEYWORDS: &[&str] = &[
    "Key Account Manager",
    "Account Manager",
    "Sales Manager",
    "Vertriebsmitarbeiter",
    "Vertriebler",
    "Außendienstmitarbeiter",
    "Innendienstmitarbeiter",
    "Verkäufer",
    "Kaufmann",
    "Kauffrau",
    "Buchhalter",
    "Elektriker",
    "Mechatroniker",
    "Pflegekraft",
    "Altenpfleger",
    "Erzieher",
    "Lagerist",
    "Fahrer",
    "Koch",
    "Projektmanager",
    "Softwareentwickler",
];

/// Skill keywords collected into `Lead::skills`
pub const SKILL_KEYWORDS: &[&str] = &[
    "Führerschein",
    "Staplerschein",
    "SAP",
    "Excel",
    "MS Office",
    "Salesforce",
    "CRM",
    "Englisch",
    "Kaltakquise",
];

/// Capitalised words that follow name introductions but are not names
const NOT_A_NAME: &[&str] = &[
    "Auf", "Aktuell", "Derzeit", "Gelernter", "Gelernte", "Seit", "Sehr", "Student", "Studentin",
    "Suche", "Verfügbar", "Zuverlässig", "Motiviert", "Flexibel", "Ihr", "Ihre", "Hier", "Ab",
];

fn plausible_name(candidate: &str) -> bool {
    let first = candidate.split_whitespace().next().unwrap_or_default();
    !NOT_A_NAME.contains(&first)
        && !ROLE_KEYWORDS
            .iter()
            .any(|role| candidate.to_lowercase().contains(&role.to_lowercase()))
}

/// Finds a person name from introductions and salutations
pub fn extract_name(text: &str) -> Option<String> {
    INTRO_NAME_RE
        .captures_iter(text)
        .chain(SALUTATION_NAME_RE.captures_iter(text))
        .map(|cap| cap[1].trim().to_string())
        .find(|candidate| plausible_name(candidate))
}

/// Derives a name from `first.last@…` style addresses
pub fn name_from_email(email: &str) -> Option<String> {
    let local = email.split('@').next()?;
    let parts: Vec<&str> = local.split(['.', '_', '-']).collect();
    if parts.len() != 2 {
        return None;
    }
    if parts
        .iter()
        .any(|p| p.len() < 2 || !p.chars().all(|c| c.is_alphabetic()))
    {
        return None;
    }
    Some(
        parts
            .iter()
            .map(|p| capitalize(p))
            .collect::<Vec<_>>()
            .join(" "),
    )
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(|c| c.to_lowercase())).collect(),
        None => String::new(),
    }
}

/// Finds a role: known keywords first, then `als <Role>` phrases
pub fn extract_role(text: &str) -> Option<String> {
    let lower = text.to_lowercase();
    if let Some(role) = ROLE_KEYWORDS
        .iter()
        .find(|role| lower.contains(&role.to_lowercase()))
    {
        return Some(role.to_string());
    }
    ROLE_AFTER_ALS_RE
        .captures(text)
        .map(|cap| cap[1].trim().to_string())
}

pub fn extract_company(text: &str) -> Option<String> {
    COMPANY_RE
        .captures(text)
        .map(|cap| cap[1].trim().to_string())
        .filter(|c| !c.is_empty())
}

pub fn extract_skills(text: &str) -> Vec<String> {
    let words: Vec<&str> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    SKILL_KEYWORDS
        .iter()
        .filter(|skill| {
            let parts: Vec<&str> = skill.split(' ').collect();
            words.windows(parts.len()).any(|window| window == parts.as_slice())
        })
        .map(|s| s.to_string())
        .collect()
}
