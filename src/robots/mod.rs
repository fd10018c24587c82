//! Robots.txt handling module
//!
//! The HTTP page driver consults a [`RobotsCache`] before each navigation
//! when `respect-robots` is enabled.

mod cache;
mod parser;

pub use cache::{CachedRobots, RobotsCache};
pub use parser::ParsedRobots;

use reqwest::Client;

/// Fetches robots.txt for an origin
///
/// A missing file (4xx) allows everything. Server errors and network
/// failures also fall back to allow-all, with a warning.
///
/// # Arguments
///
/// * `client` - The HTTP client to use
/// * `origin` - Serialized origin, e.g. `https://shop.example.com`
pub async fn fetch_robots(client: &Client, origin: &str) -> ParsedRobots {
    let url = format!("{}/robots.txt", origin.trim_end_matches('/'));

    let response = match client.get(&url).send().await {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!("Failed to fetch {}: {}", url, e);
            return ParsedRobots::allow_all();
        }
    };

    let status = response.status();
    if status.is_client_error() {
        tracing::debug!("{} returned {}, allowing all", url, status);
        return ParsedRobots::allow_all();
    }
    if !status.is_success() {
        tracing::warn!("{} returned {}, allowing all", url, status);
        return ParsedRobots::allow_all();
    }

    match response.text().await {
        Ok(body) => ParsedRobots::from_content(&body),
        Err(e) => {
            tracing::warn!("Failed to read {}: {}", url, e);
            ParsedRobots::allow_all()
        }
    }
}
