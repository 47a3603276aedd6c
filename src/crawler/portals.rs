//! Portal registry
//!
//! Built-in portal definitions can be disabled or reshaped through
//! `[[portals]]` entries in the config file. An override with an unknown name
//! and its own listing URLs adds a new portal using the generic extractor.

use crate::config::PortalOverride;
use rand::Rng;
use std::time::Duration;

/// Placeholder replaced by the 1-based page number in listing URL templates
pub const PAGE_PLACEHOLDER: &str = "{page}";

/// How detail pages of a portal are narrowed before extraction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetailExtractor {
    /// The whole page goes through the pipeline
    Generic,
    /// Only the first element matching this CSS selector; whole page if absent
    Scoped(String),
}

/// Crawl settings for one classified-ad portal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalConfig {
    pub name: String,
    pub enabled: bool,
    /// Listing URL templates containing `{page}`
    pub listing_urls: Vec<String>,
    pub max_pages: u32,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    /// CSS selector for anchors on listing pages
    pub link_selector: String,
    /// Substring a detail link's path must contain
    pub link_pattern: Option<String>,
    pub extractor: DetailExtractor,
    /// Industry attached to leads from this portal
    pub industry: Option<String>,
}

impl PortalConfig {
    /// A portal with generic extraction and conservative defaults
    pub fn generic(name: impl Into<String>, listing_urls: Vec<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            listing_urls,
            max_pages: 3,
            min_delay_ms: 1_000,
            max_delay_ms: 3_000,
            link_selector: "a[href]".to_string(),
            link_pattern: None,
            extractor: DetailExtractor::Generic,
            industry: None,
        }
    }

    /// Listing URL for `page` (1-based)
    pub fn listing_url(template: &str, page: u32) -> String {
        template.replace(PAGE_PLACEHOLDER, &page.to_string())
    }

    /// Pages to request for a template; templates without `{page}` have one
    pub fn pages_for(&self, template: &str) -> u32 {
        if template.contains(PAGE_PLACEHOLDER) {
            self.max_pages.max(1)
        } else {
            1
        }
    }

    /// Random inter-request delay inside the portal's range
    pub fn delay(&self) -> Duration {
        let (low, high) = if self.min_delay_ms <= self.max_delay_ms {
            (self.min_delay_ms, self.max_delay_ms)
        } else {
            (self.max_delay_ms, self.min_delay_ms)
        };
        Duration::from_millis(rand::rng().random_range(low..=high))
    }

    fn apply(&mut self, o: &PortalOverride) {
        if let Some(enabled) = o.enabled {
            self.enabled = enabled;
        }
        if let Some(max_pages) = o.max_pages {
            self.max_pages = max_pages;
        }
        if let Some(urls) = &o.listing_urls {
            self.listing_urls = urls.clone();
        }
        if let Some(min) = o.min_delay_ms {
            self.min_delay_ms = min;
        }
        if let Some(max) = o.max_delay_ms {
            self.max_delay_ms = max;
        }
    }
}

/// Ordered set of portal configurations
#[derive(Debug, Clone, Default)]
pub struct PortalRegistry {
    portals: Vec<PortalConfig>,
}

impl PortalRegistry {
    pub fn new(portals: Vec<PortalConfig>) -> Self {
        Self { portals }
    }

    /// The built-in job-seeker portals
    pub fn builtin() -> Self {
        Self::new(vec![
            PortalConfig {
                name: "kleinanzeigen".to_string(),
                enabled: true,
                listing_urls: vec!["https://www.kleinanzeigen.de/s-stellengesuche/seite:{page}/c107".to_string()],
                max_pages: 5,
                min_delay_ms: 2_000,
                max_delay_ms: 5_000,
                link_selector: "article.aditem a[href]".to_string(),
                link_pattern: Some("/s-anzeige/".to_string()),
                extractor: DetailExtractor::Scoped("#viewad-description".to_string()),
                industry: None,
            },
            PortalConfig {
                name: "markt".to_string(),
                enabled: true,
                listing_urls: vec!["https://www.markt.de/stellengesuche/?page={page}".to_string()],
                max_pages: 3,
                min_delay_ms: 1_500,
                max_delay_ms: 4_000,
                link_selector: "a[href]".to_string(),
                link_pattern: Some("/a/".to_string()),
                extractor: DetailExtractor::Generic,
                industry: None,
            },
            PortalConfig {
                name: "quoka".to_string(),
                enabled: true,
                listing_urls: vec!["https://www.quoka.de/stellengesuche/?pageno={page}".to_string()],
                max_pages: 3,
                min_delay_ms: 1_500,
                max_delay_ms: 4_000,
                link_selector: "a[href]".to_string(),
                link_pattern: Some("/stellengesuche/".to_string()),
                extractor: DetailExtractor::Generic,
                industry: None,
            },
        ])
    }

    /// Built-in portals with config overrides applied
    pub fn from_overrides(overrides: &[PortalOverride]) -> Self {
        let mut registry = Self::builtin();
        for o in overrides {
            match registry.portals.iter_mut().find(|p| p.name == o.name) {
                Some(portal) => portal.apply(o),
                None => match &o.listing_urls {
                    Some(urls) if !urls.is_empty() => {
                        let mut portal = PortalConfig::generic(o.name.clone(), urls.clone());
                        portal.apply(o);
                        registry.portals.push(portal);
                    }
                    _ => tracing::warn!(portal = %o.name, "Override for unknown portal has no listing URLs, ignoring"),
                },
            }
        }
        registry
    }

    pub fn get(&self, name: &str) -> Option<&PortalConfig> {
        self.portals.iter().find(|p| p.name == name)
    }

    /// Enabled portals in registry order
    pub fn active(&self) -> impl Iterator<Item = &PortalConfig> {
        self.portals.iter().filter(|p| p.enabled && !p.listing_urls.is_empty())
    }

    pub fn all(&self) -> &[PortalConfig] {
        &self.portals
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn override_for(name: &str) -> PortalOverride {
        PortalOverride {
            name: name.to_string(),
            enabled: None,
            max_pages: None,
            listing_urls: None,
            min_delay_ms: None,
            max_delay_ms: None,
        }
    }

    #[test]
    fn test_disable_builtin_portal() {
        let mut o = override_for("markt");
        o.enabled = Some(false);
        let registry = PortalRegistry::from_overrides(&[o]);

        let active: Vec<&str> = registry.active().map(|p| p.name.as_str()).collect();
        assert!(!active.contains(&"markt"));
        assert!(active.contains(&"kleinanzeigen"));
    }

    #[test]
    fn test_unknown_override_adds_generic_portal() {
        let mut o = override_for("local-board");
        o.listing_urls = Some(vec!["http://board.test/list?p={page}".to_string()]);
        o.max_pages = Some(2);
        let registry = PortalRegistry::from_overrides(&[o]);

        let portal = registry.get("local-board").unwrap();
        assert_eq!(portal.extractor, DetailExtractor::Generic);
        assert_eq!(portal.max_pages, 2);
        assert!(PortalRegistry::from_overrides(&[override_for("nothing")]).get("nothing").is_none());
    }

    #[test]
    fn test_listing_url_and_pages() {
        let portal = PortalConfig::generic("p", vec![]);
        assert_eq!(PortalConfig::listing_url("http://x.test/?page={page}", 3), "http://x.test/?page=3");
        assert_eq!(portal.pages_for("http://x.test/static"), 1);
        assert_eq!(portal.pages_for("http://x.test/?page={page}"), 3);
    }

    #[test]
    fn test_delay_within_range() {
        let mut portal = PortalConfig::generic("p", vec![]);
        portal.min_delay_ms = 10;
        portal.max_delay_ms = 20;
        for _ in 0..50 {
            let d = portal.delay();
            assert!(d >= Duration::from_millis(10) && d <= Duration::from_millis(20));
        }
    }
}
