//! Phone-directory enrichment with a persistent lookup cache

use crate::http::{FetchError, FetchResult, HttpManager};
use crate::lead::{clamp_score, Lead};
use crate::resilience::RequestKind;
use crate::storage::{with_storage, DirectoryEntry, SharedStorage, Storage, StorageResult};
use async_trait::async_trait;
use chrono::Utc;
use scraper::{Html, Selector};
use std::sync::Arc;
use url::Url;

/// Public reverse-lookup site used by default
pub const DEFAULT_DIRECTORY_URL: &str = "https://www.dastelefonbuch.de/";

/// Tag added when the directory listing matches the extracted name
pub const TAG_DIRECTORY_VERIFIED: &str = "directory_verified";

/// A directory hit for a phone number
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryListing {
    pub name: Option<String>,
    pub address: Option<String>,
}

/// Reverse phone lookup
#[async_trait]
pub trait PhoneDirectory: Send + Sync {
    fn name(&self) -> &str;

    /// Looks up an E.164 number; `Ok(None)` means "not listed"
    async fn lookup(&self, phone: &str) -> Result<Option<DirectoryListing>, FetchError>;
}

/// Directory that never finds anything
pub struct NoopDirectory;

#[async_trait]
impl PhoneDirectory for NoopDirectory {
    fn name(&self) -> &str {
        "noop"
    }

    async fn lookup(&self, _phone: &str) -> Result<Option<DirectoryListing>, FetchError> {
        Ok(None)
    }
}

/// Reverse lookup against a telephone-book website
pub struct TelephoneBookDirectory {
    http: Arc<HttpManager>,
    base_url: Url,
}

impl TelephoneBookDirectory {
    pub fn new(http: Arc<HttpManager>, base_url: Url) -> Self {
        Self { http, base_url }
    }

    /// Lookup URL for an E.164 number, using the national `0…` form
    pub fn lookup_url(&self, phone: &str) -> Result<Url, FetchError> {
        let national = match phone.strip_prefix("+49") {
            Some(rest) => format!("0{}", rest),
            None => phone.to_string(),
        };
        self.base_url
            .join(&format!("Rückwärts-Suche/{}", national))
            .map_err(|e| FetchError::Network {
                url: self.base_url.to_string(),
                message: e.to_string(),
            })
    }
}

/// Extracts the first listing from a result page
pub fn parse_listing(html: &str) -> Option<DirectoryListing> {
    let document = Html::parse_document(html);
    let text_of = |selector: &Selector| {
        document
            .select(selector)
            .next()
            .map(|el| el.text().collect::<Vec<_>>().join(" "))
            .map(|s| s.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|s| !s.is_empty())
    };

    let name = text_of(&Selector::parse(r#"[itemprop="name"]"#).ok()?);
    let address = text_of(&Selector::parse(r#"[itemprop="address"]"#).ok()?);
    if name.is_none() && address.is_none() {
        return None;
    }
    Some(DirectoryListing { name, address })
}

#[async_trait]
impl PhoneDirectory for TelephoneBookDirectory {
    fn name(&self) -> &str {
        "telefonbuch"
    }

    async fn lookup(&self, phone: &str) -> Result<Option<DirectoryListing>, FetchError> {
        let url = self.lookup_url(phone)?;
        match self.http.fetch(&url, RequestKind::Scrape).await {
            FetchResult::Success(page) => Ok(parse_listing(&page.body)),
            FetchResult::HttpError { status_code: 404 } => Ok(None),
            other => other.into_page(url.as_str()).map(|_| None),
        }
    }
}

/// What enrichment did for one lead
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrichmentOutcome {
    /// No phone number to look up
    Skipped,
    /// Answered from the cache
    Cached { found: bool },
    /// Answered by a fresh lookup, now cached
    LookedUp { found: bool },
    /// Lookup failed; nothing cached
    Failed,
}

/// Corroborates phone numbers and upgrades `data_quality`
pub struct Enricher {
    directory: Arc<dyn PhoneDirectory>,
    storage: SharedStorage,
}

impl Enricher {
    pub fn new(directory: Arc<dyn PhoneDirectory>, storage: SharedStorage) -> Self {
        Self { directory, storage }
    }

    /// Enriches the lead in place
    ///
    /// Cache misses perform a lookup and cache the answer, including "not
    /// listed". Lookup errors are logged and leave the lead unchanged.
    pub async fn enrich(&self, lead: &mut Lead) -> StorageResult<EnrichmentOutcome> {
        let Some(phone) = lead.phone.clone() else {
            return Ok(EnrichmentOutcome::Skipped);
        };

        let subject = phone.clone();
        if let Some(entry) = with_storage(&self.storage, move |s| s.get_directory_entry(&subject)).await? {
            apply_entry(lead, &entry);
            return Ok(EnrichmentOutcome::Cached { found: entry.found });
        }

        let listing = match self.directory.lookup(&phone).await {
            Ok(listing) => listing,
            Err(e) => {
                tracing::debug!(directory = self.directory.name(), error = %e, "Directory lookup failed");
                return Ok(EnrichmentOutcome::Failed);
            }
        };

        let entry = DirectoryEntry {
            subject: phone,
            found: listing.is_some(),
            listed_name: listing.as_ref().and_then(|l| l.name.clone()),
            listed_address: listing.as_ref().and_then(|l| l.address.clone()),
            source: self.directory.name().to_string(),
            looked_up_at: Utc::now(),
        };
        apply_entry(lead, &entry);
        let found = entry.found;
        with_storage(&self.storage, move |s| s.put_directory_entry(&entry)).await?;
        Ok(EnrichmentOutcome::LookedUp { found })
    }
}

/// Applies a directory answer to a lead
pub fn apply_entry(lead: &mut Lead, entry: &DirectoryEntry) {
    if !entry.found {
        return;
    }
    let mut bonus = 15;
    match (&lead.name, &entry.listed_name) {
        (Some(name), Some(listed)) if names_match(name, listed) => {
            bonus += 10;
            lead.add_tag(TAG_DIRECTORY_VERIFIED);
        }
        (None, Some(listed)) => lead.name = Some(listed.clone()),
        _ => {}
    }
    lead.data_quality = clamp_score(lead.data_quality as i64 + bonus);
}

/// True when any word of at least three letters appears in both names
fn names_match(a: &str, b: &str) -> bool {
    let b = b.to_lowercase();
    a.to_lowercase()
        .split(|c: char| !c.is_alphabetic())
        .filter(|w| w.chars().count() >= 3)
        .any(|w| b.split(|c: char| !c.is_alphabetic()).any(|other| other == w))
}
