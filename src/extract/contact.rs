//! Contact-field extraction: email, German mobile numbers, WhatsApp links

use regex::Regex;
use std::sync::LazyLock;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b[a-z0-9][a-z0-9._%+\-]*@[a-z0-9][a-z0-9.\-]*\.[a-z]{2,24}\b").expect("valid regex")
});

/// `max (at) example (dot) de` style obfuscation
static OBFUSCATED_AT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s*[\(\[\{]\s*(?:at|ät)\s*[\)\]\}]\s*").expect("valid regex"));
static OBFUSCATED_DOT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s*[\(\[\{]\s*(?:dot|punkt)\s*[\)\]\}]\s*").expect("valid regex"));

/// Phone-like runs: a leading `+`/`0`, then digits and separators on one line
static PHONE_CANDIDATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:\+\d|\b0)[\d \t/().\-]{6,22}\d").expect("valid regex"));

static WHATSAPP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:https?://)?(?:wa\.me/|api\.whatsapp\.com/send/?\?phone=)\+?(\d{6,15})")
        .expect("valid regex")
});

const REJECTED_EMAIL_TLDS: &[&str] = &["png", "jpg", "jpeg", "gif", "svg", "webp", "css", "js", "ico", "pdf"];
const REJECTED_EMAIL_MARKERS: &[&str] = &["noreply", "no-reply", "donotreply", "mailer-daemon", "sentry", "wixpress"];

/// Kind of a normalized German phone number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhoneKind {
    /// 015x / 016x / 017x
    Mobile,
    Landline,
}

/// Normalizes an email address, returning `None` for unusable addresses
pub fn normalize_email(raw: &str) -> Option<String> {
    let email = raw
        .trim()
        .trim_start_matches("mailto:")
        .trim_end_matches(['.', ',', ';'])
        .to_lowercase();
    let email = email.split('?').next().unwrap_or_default().to_string();

    let (local, domain) = email.rsplit_once('@')?;
    if local.is_empty() || domain.len() < 4 || !domain.contains('.') {
        return None;
    }
    if domain.starts_with('.') || domain.ends_with('.') || domain.contains("..") {
        return None;
    }
    let tld = domain.rsplit('.').next()?;
    if REJECTED_EMAIL_TLDS.contains(&tld) {
        return None;
    }
    if REJECTED_EMAIL_MARKERS.iter().any(|m| email.contains(m)) {
        return None;
    }
    Some(email)
}

/// Extracts normalized, de-duplicated email addresses from text
pub fn extract_emails(text: &str) -> Vec<String> {
    let deobfuscated = OBFUSCATED_AT_RE.replace_all(text, "@");
    let deobfuscated = OBFUSCATED_DOT_RE.replace_all(&deobfuscated, ".");

    let mut found = Vec::new();
    for m in EMAIL_RE.find_iter(&deobfuscated) {
        if let Some(email) = normalize_email(m.as_str()) {
            if !found.contains(&email) {
                found.push(email);
            }
        }
    }
    found
}

/// Normalizes any German phone number to E.164 and reports its kind
///
/// Accepts national (`0176 …`), international (`+49 176 …`, `0049 176 …`)
/// and `+49 (0)176 …` forms. Non-German numbers and service numbers
/// (`0180…`, `0800…`) yield `None`.
pub fn normalize_phone_any(raw: &str) -> Option<(String, PhoneKind)> {
    let trimmed = raw.trim();
    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();

    let international = if trimmed.starts_with('+') {
        digits
    } else if let Some(rest) = digits.strip_prefix("00") {
        rest.to_string()
    } else if let Some(rest) = digits.strip_prefix('0') {
        format!("49{}", rest)
    } else {
        return None;
    };

    let national = international.strip_prefix("49")?;
    let national = national.strip_prefix('0').unwrap_or(national);

    let kind = if national.starts_with("15") || national.starts_with("16") || national.starts_with("17") {
        if !(10..=11).contains(&national.len()) {
            return None;
        }
        PhoneKind::Mobile
    } else if national.starts_with('1') || national.starts_with('8') || national.starts_with('9') {
        return None;
    } else {
        if !(6..=11).contains(&national.len()) {
            return None;
        }
        PhoneKind::Landline
    };

    Some((format!("+49{}", national), kind))
}

/// Normalizes a German mobile number to E.164; landlines are rejected
pub fn normalize_mobile(raw: &str) -> Option<String> {
    match normalize_phone_any(raw)? {
        (e164, PhoneKind::Mobile) => Some(e164),
        (_, PhoneKind::Landline) => None,
    }
}

/// Extracts de-duplicated mobile numbers (E.164) from text
pub fn extract_mobile_phones(text: &str) -> Vec<String> {
    let mut found = Vec::new();
    for m in PHONE_CANDIDATE_RE.find_iter(text) {
        if let Some(phone) = normalize_mobile(m.as_str()) {
            if !found.contains(&phone) {
                found.push(phone);
            }
        }
    }
    found
}

/// Extracts WhatsApp links canonicalized to `https://wa.me/<digits>`
pub fn extract_whatsapp_links(text: &str) -> Vec<String> {
    let mut found = Vec::new();
    for cap in WHATSAPP_RE.captures_iter(text) {
        let link = format!("https://wa.me/{}", &cap[1]);
        if !found.contains(&link) {
            found.push(link);
        }
    }
    found
}

/// E.164 mobile number behind a canonical WhatsApp link, if it is one
pub fn whatsapp_mobile(link: &str) -> Option<String> {
    let digits = link.rsplit('/').next()?;
    normalize_mobile(&format!("+{}", digits))
}
