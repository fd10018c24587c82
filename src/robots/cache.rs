//! Per-origin robots.txt cache with 24 hour freshness

use crate::robots::{fetch_robots, ParsedRobots};
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use std::collections::HashMap;
use tokio::sync::RwLock;
use url::Url;

/// Robots rules for one origin and when they were fetched
#[derive(Debug, Clone)]
pub struct CachedRobots {
    pub content: ParsedRobots,
    pub fetched_at: DateTime<Utc>,
}

impl CachedRobots {
    pub fn new(content: ParsedRobots) -> Self {
        Self {
            content,
            fetched_at: Utc::now(),
        }
    }

    /// Robots rules are refreshed daily
    pub fn is_stale(&self) -> bool {
        Utc::now() - self.fetched_at > Duration::hours(24)
    }
}

/// Shared cache consulted before every navigation
pub struct RobotsCache {
    client: Client,
    user_agent: String,
    entries: RwLock<HashMap<String, CachedRobots>>,
}

impl RobotsCache {
    /// # Arguments
    ///
    /// * `client` - Client used to fetch robots.txt files
    /// * `user_agent` - Product token matched against `User-agent` groups
    pub fn new(client: Client, user_agent: &str) -> Self {
        Self {
            client,
            user_agent: user_agent.to_string(),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Checks `url` against its origin's robots.txt, fetching it when missing or stale
    pub async fn is_allowed(&self, url: &Url) -> bool {
        let origin = url.origin().ascii_serialization();

        {
            let entries = self.entries.read().await;
            if let Some(cached) = entries.get(&origin) {
                if !cached.is_stale() {
                    return cached.content.is_allowed(url.as_str(), &self.user_agent);
                }
            }
        }

        let robots = fetch_robots(&self.client, &origin).await;
        let allowed = robots.is_allowed(url.as_str(), &self.user_agent);
        self.entries
            .write()
            .await
            .insert(origin, CachedRobots::new(robots));
        allowed
    }

    /// Stores rules for an origin without fetching them
    pub async fn insert(&self, origin: &str, robots: ParsedRobots) {
        self.entries
            .write()
            .await
            .insert(origin.to_string(), CachedRobots::new(robots));
    }
}
