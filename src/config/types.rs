use serde::Deserialize;

/// Main configuration structure for Shelf-Crawler
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub throttle: ThrottleConfig,
    #[serde(default)]
    pub pagination: PaginationConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    pub output: OutputConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

/// Job limits and pipeline behaviour
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CrawlerConfig {
    /// Maximum depth of category expansion below the top level
    pub max_depth: u32,

    /// Maximum number of child categories kept per node and per level
    pub max_categories_per_level: usize,

    /// Maximum listing pages visited per category
    pub max_pages: u32,

    /// Maximum products extracted per category
    pub max_products_per_category: usize,

    /// Number of category tasks in flight at once
    pub parallel_categories: usize,

    /// How long a task may wait for a throttle slot (milliseconds)
    pub slot_timeout_ms: u64,

    /// Attempts made for a checkpoint write before the job is failed
    pub persist_retries: u32,

    /// Initial backoff between checkpoint write attempts (milliseconds)
    pub persist_backoff_ms: u64,

    /// Lifetime of a checkpoint before it expires
    pub checkpoint_ttl_days: i64,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_depth: 3,
            max_categories_per_level: 20,
            max_pages: 50,
            max_products_per_category: 1000,
            parallel_categories: 3,
            slot_timeout_ms: 120_000,
            persist_retries: 3,
            persist_backoff_ms: 500,
            checkpoint_ttl_days: 30,
        }
    }
}

/// Per-domain pacing and circuit breaker settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ThrottleConfig {
    /// Starting inter-request delay for a domain (milliseconds)
    pub default_delay_ms: u64,

    /// Lower bound of the adaptive delay (milliseconds)
    pub min_delay_ms: u64,

    /// Upper bound of the adaptive delay (milliseconds)
    pub max_delay_ms: u64,

    /// Concurrent requests allowed against one host
    pub max_concurrent_per_host: u32,

    /// Symmetric jitter applied to each gap, as a fraction of the delay
    pub jitter_ratio: f64,

    /// Cooldown after a 403 response (milliseconds)
    pub block_cooldown_ms: u64,

    /// Failures that trip the circuit breaker
    pub failure_threshold: u32,

    /// Time the circuit stays open before probing (milliseconds)
    pub recovery_timeout_ms: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            default_delay_ms: 2000,
            min_delay_ms: 500,
            max_delay_ms: 30_000,
            max_concurrent_per_host: 2,
            jitter_ratio: 0.2,
            block_cooldown_ms: 15 * 60 * 1000,
            failure_threshold: 10,
            recovery_timeout_ms: 60_000,
        }
    }
}

/// Pagination detection and stepping settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct PaginationConfig {
    /// Wait after a load-more click or a scroll before recounting (milliseconds)
    pub scroll_delay_ms: u64,

    /// Timeout passed to every navigation (milliseconds)
    pub navigation_timeout_ms: u64,

    /// Consecutive pages without new items before a traversal stops
    pub empty_page_threshold: u32,

    pub selectors: PaginationSelectors,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            scroll_delay_ms: 2000,
            navigation_timeout_ms: 30_000,
            empty_page_threshold: 1,
            selectors: PaginationSelectors::default(),
        }
    }
}

/// Selector lists consulted by the pagination probes, in priority order
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct PaginationSelectors {
    pub numbered: Vec<String>,
    pub load_more: Vec<String>,
    pub infinite_scroll: Vec<String>,
    pub next: Vec<String>,
    pub next_link: Vec<String>,
    pub item: Vec<String>,
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

impl Default for PaginationSelectors {
    fn default() -> Self {
        Self {
            numbered: strings(&[
                ".pagination a",
                "nav[aria-label*='agination'] a",
                "ul.page-numbers a",
                "[class*='pager'] a",
            ]),
            load_more: strings(&[
                "button.load-more",
                "a.load-more",
                "[data-action='load-more']",
                "[data-testid='load-more']",
            ]),
            infinite_scroll: strings(&[
                "[data-infinite-scroll]",
                ".infinite-scroll",
                "[data-next-page-url]",
            ]),
            next: strings(&[
                "a[rel='next']",
                "a.next",
                ".pagination .next a",
                "[aria-label='Next page']",
                "button.next",
            ]),
            next_link: strings(&["link[rel='next']", "a[rel='next']"]),
            item: strings(&[
                "[data-product-id]",
                ".product-item",
                ".product-card",
                "li.product",
            ]),
        }
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

impl UserAgentConfig {
    /// Formats the header value: `Name/Version (+ContactURL; ContactEmail)`
    pub fn header_value(&self) -> String {
        format!(
            "{}/{} (+{}; {})",
            self.crawler_name, self.crawler_version, self.contact_url, self.contact_email
        )
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite checkpoint database
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// Path to the markdown job summary
    #[serde(rename = "summary-path")]
    pub summary_path: String,
}

/// Selectors used by the reference catalog collaborator
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CatalogConfig {
    /// Links treated as top-level navigation
    pub navigation: Vec<String>,

    /// Links treated as subcategories on a category page
    pub subcategory: Vec<String>,

    /// Links pointing at product detail pages on a listing page
    pub product_link: Vec<String>,

    /// Elements holding a product's display name, relative to the page
    pub product_title: Vec<String>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            navigation: strings(&["nav a", "header .menu a", "[role='navigation'] a"]),
            subcategory: strings(&[".subcategories a", ".category-list a", "aside .categories a"]),
            product_link: strings(&[
                ".product-item a",
                ".product-card a",
                "li.product a",
                "a.product-link",
            ]),
            product_title: strings(&[".product-title", ".product-name"]),
        }
    }
}

/// HTTP driver behaviour
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct HttpConfig {
    /// Consult robots.txt before every navigation
    pub respect_robots: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            respect_robots: true,
        }
    }
}
