use serde::Deserialize;

/// Main configuration structure for Lead-Harvest
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub search: SearchConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    /// Overrides for the built-in portal registry, matched by name
    #[serde(default)]
    pub portals: Vec<PortalOverride>,
}

/// Crawl behaviour and concurrency limits
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CrawlerConfig {
    /// Industries to generate search queries for (keys of the query bank)
    #[serde(default = "default_industries")]
    pub industries: Vec<String>,

    /// Query template set: "candidates" or "broad"
    #[serde(default = "default_mode")]
    pub mode: String,

    /// Queries issued per industry in one run
    #[serde(default = "default_queries_per_industry")]
    pub queries_per_industry: usize,

    /// Date restriction passed to the search API (e.g. "d30", "w2")
    #[serde(default)]
    pub date_restrict: Option<String>,

    /// Global cap on in-flight requests
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,

    /// Per-host cap on in-flight requests
    #[serde(default = "default_max_requests_per_host")]
    pub max_requests_per_host: usize,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Attempts per URL for transient failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay between retry attempts (milliseconds), doubled per attempt
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Whether the search-query path runs at all
    #[serde(default = "default_true")]
    pub search_enabled: bool,
}

/// HTTP client policy
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HttpConfig {
    /// Allow falling back to a client that skips TLS validation
    #[serde(default)]
    pub allow_insecure_tls: bool,

    /// User-agent strings rotated per request; built-in list when empty
    #[serde(default)]
    pub user_agents: Vec<String>,
}

/// Penalty windows for the per-host circuit breaker
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_scrape_base_penalty_secs")]
    pub scrape_base_penalty_secs: u64,

    #[serde(default = "default_api_base_penalty_secs")]
    pub api_base_penalty_secs: u64,

    #[serde(default = "default_max_penalty_secs")]
    pub max_penalty_secs: u64,

    /// Consecutive timeouts after which timeouts count as penalizing
    #[serde(default = "default_timeout_threshold")]
    pub timeout_threshold: u32,
}

/// Search backends and credentials
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SearchConfig {
    #[serde(default)]
    pub google_api_keys: Vec<String>,

    #[serde(default)]
    pub google_cx: Option<String>,

    /// Ordered backend names; unknown names are rejected by validation
    #[serde(default = "default_backends")]
    pub backends: Vec<String>,

    #[serde(default = "default_results_per_query")]
    pub results_per_query: usize,
}

/// Local store settings
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StorageConfig {
    /// Path to the SQLite database file
    pub database_path: String,

    /// Attempts for a write that hits "database locked"
    #[serde(default = "default_lock_retries")]
    pub lock_retries: u32,

    /// Base backoff between locked-write attempts (milliseconds)
    #[serde(default = "default_lock_backoff_ms")]
    pub lock_backoff_ms: u64,
}

/// Scoring and learning settings
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ScoringConfig {
    /// Seconds between background recomputations of score adjustments
    #[serde(default = "default_learning_interval_secs")]
    pub learning_interval_secs: u64,

    /// Score points a fully-confident adjustment of weight 1.0 contributes
    #[serde(default = "default_learned_scale")]
    pub learned_scale: f64,

    /// Minimum quality score for a lead to be stored
    #[serde(default)]
    pub min_quality_score: u8,

    /// Corroborate phone numbers against the reverse-lookup directory
    #[serde(default)]
    pub directory_lookup: bool,

    /// Base URL of the reverse-lookup directory
    #[serde(default)]
    pub directory_url: Option<String>,
}

/// Per-portal overrides applied on top of the built-in registry
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PortalOverride {
    pub name: String,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub max_pages: Option<u32>,
    #[serde(default)]
    pub listing_urls: Option<Vec<String>>,
    #[serde(default)]
    pub min_delay_ms: Option<u64>,
    #[serde(default)]
    pub max_delay_ms: Option<u64>,
}

fn default_industries() -> Vec<String> {
    vec!["vertrieb".to_string()]
}

fn default_mode() -> String {
    "candidates".to_string()
}

fn default_queries_per_industry() -> usize {
    10
}

fn default_max_concurrent_requests() -> usize {
    8
}

fn default_max_requests_per_host() -> usize {
    2
}

fn default_request_timeout_secs() -> u64 {
    20
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_true() -> bool {
    true
}

fn default_scrape_base_penalty_secs() -> u64 {
    30
}

fn default_api_base_penalty_secs() -> u64 {
    60
}

fn default_max_penalty_secs() -> u64 {
    900
}

fn default_timeout_threshold() -> u32 {
    3
}

fn default_backends() -> Vec<String> {
    vec!["google".to_string(), "duckduckgo".to_string()]
}

fn default_results_per_query() -> usize {
    10
}

fn default_lock_retries() -> u32 {
    5
}

fn default_lock_backoff_ms() -> u64 {
    50
}

fn default_learning_interval_secs() -> u64 {
    300
}

fn default_learned_scale() -> f64 {
    20.0
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            industries: default_industries(),
            mode: default_mode(),
            queries_per_industry: default_queries_per_industry(),
            date_restrict: None,
            max_concurrent_requests: default_max_concurrent_requests(),
            max_requests_per_host: default_max_requests_per_host(),
            request_timeout_secs: default_request_timeout_secs(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            search_enabled: true,
        }
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            scrape_base_penalty_secs: default_scrape_base_penalty_secs(),
            api_base_penalty_secs: default_api_base_penalty_secs(),
            max_penalty_secs: default_max_penalty_secs(),
            timeout_threshold: default_timeout_threshold(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            google_api_keys: Vec::new(),
            google_cx: None,
            backends: default_backends(),
            results_per_query: default_results_per_query(),
        }
    }
}

impl StorageConfig {
    /// Storage settings for the given path with default retry policy
    pub fn at(database_path: impl Into<String>) -> Self {
        Self {
            database_path: database_path.into(),
            lock_retries: default_lock_retries(),
            lock_backoff_ms: default_lock_backoff_ms(),
        }
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            learning_interval_secs: default_learning_interval_secs(),
            learned_scale: default_learned_scale(),
            min_quality_score: 0,
            directory_lookup: false,
            directory_url: None,
        }
    }
}

impl Config {
    /// A configuration with defaults everywhere except the database path
    pub fn with_database(database_path: impl Into<String>) -> Self {
        Self {
            crawler: CrawlerConfig::default(),
            http: HttpConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            search: SearchConfig::default(),
            storage: StorageConfig::at(database_path),
            scoring: ScoringConfig::default(),
            portals: Vec::new(),
        }
    }
}
