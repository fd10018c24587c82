use crate::config::types::{
    CatalogConfig, Config, CrawlerConfig, OutputConfig, PaginationConfig, ThrottleConfig,
    UserAgentConfig,
};
use crate::ConfigError;
use scraper::Selector;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_throttle_config(&config.throttle)?;
    validate_pagination_config(&config.pagination)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_output_config(&config.output)?;
    validate_catalog_config(&config.catalog)?;
    Ok(())
}

/// Validates job limits
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.parallel_categories < 1 || config.parallel_categories > 64 {
        return Err(ConfigError::Validation(format!(
            "parallel_categories must be between 1 and 64, got {}",
            config.parallel_categories
        )));
    }

    if config.max_categories_per_level < 1 {
        return Err(ConfigError::Validation(
            "max_categories_per_level must be >= 1".to_string(),
        ));
    }

    if config.max_pages < 1 {
        return Err(ConfigError::Validation("max_pages must be >= 1".to_string()));
    }

    if config.max_products_per_category < 1 {
        return Err(ConfigError::Validation(
            "max_products_per_category must be >= 1".to_string(),
        ));
    }

    if config.persist_retries < 1 {
        return Err(ConfigError::Validation(
            "persist_retries must be >= 1".to_string(),
        ));
    }

    if config.checkpoint_ttl_days < 1 {
        return Err(ConfigError::Validation(format!(
            "checkpoint_ttl_days must be >= 1, got {}",
            config.checkpoint_ttl_days
        )));
    }

    Ok(())
}

/// Validates throttle bounds
fn validate_throttle_config(config: &ThrottleConfig) -> Result<(), ConfigError> {
    if config.min_delay_ms > config.default_delay_ms
        || config.default_delay_ms > config.max_delay_ms
    {
        return Err(ConfigError::Validation(format!(
            "throttle delays must satisfy min <= default <= max, got {} / {} / {}",
            config.min_delay_ms, config.default_delay_ms, config.max_delay_ms
        )));
    }

    if config.max_concurrent_per_host < 1 {
        return Err(ConfigError::Validation(
            "max_concurrent_per_host must be >= 1".to_string(),
        ));
    }

    if !(0.0..1.0).contains(&config.jitter_ratio) {
        return Err(ConfigError::Validation(format!(
            "jitter_ratio must be in [0, 1), got {}",
            config.jitter_ratio
        )));
    }

    if config.failure_threshold < 1 {
        return Err(ConfigError::Validation(
            "failure_threshold must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates pagination settings and every probe selector
fn validate_pagination_config(config: &PaginationConfig) -> Result<(), ConfigError> {
    if config.empty_page_threshold < 1 {
        return Err(ConfigError::Validation(
            "empty_page_threshold must be >= 1".to_string(),
        ));
    }

    if config.navigation_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "navigation_timeout_ms must be > 0".to_string(),
        ));
    }

    let selectors = &config.selectors;
    if selectors.item.is_empty() {
        return Err(ConfigError::Validation(
            "pagination item selectors cannot be empty".to_string(),
        ));
    }

    for list in [
        &selectors.numbered,
        &selectors.load_more,
        &selectors.infinite_scroll,
        &selectors.next,
        &selectors.next_link,
        &selectors.item,
    ] {
        validate_selectors(list)?;
    }

    Ok(())
}

/// Validates catalog selectors
fn validate_catalog_config(config: &CatalogConfig) -> Result<(), ConfigError> {
    if config.product_link.is_empty() {
        return Err(ConfigError::Validation(
            "catalog product_link selectors cannot be empty".to_string(),
        ));
    }

    validate_selectors(&config.navigation)?;
    validate_selectors(&config.subcategory)?;
    validate_selectors(&config.product_link)?;
    validate_selectors(&config.product_title)?;
    Ok(())
}

fn validate_selectors(selectors: &[String]) -> Result<(), ConfigError> {
    for selector in selectors {
        Selector::parse(selector)
            .map_err(|e| ConfigError::InvalidSelector(format!("'{}': {:?}", selector, e)))?;
    }
    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;

    validate_email(&config.contact_email)?;

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    if config.summary_path.is_empty() {
        return Err(ConfigError::Validation(
            "summary_path cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    if email.is_empty() {
        return Err(ConfigError::Validation(
            "contact_email cannot be empty".to_string(),
        ));
    }

    let parts: Vec<&str> = email.split('@').collect();
    if parts.len() != 2 {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    let local = parts[0];
    let domain = parts[1];

    if local.is_empty() || domain.is_empty() {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    if !domain.contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email domain: '{}'",
            email
        )));
    }

    Ok(())
}
