use crate::collectors::{DATABASE_SCRAPERS, GLOBAL_SCRAPERS, enabled_by_default};
use std::collections::HashSet;
use std::time::Duration;

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Scrapers that are cached unless configured otherwise.
pub const DEFAULT_CACHED: &[&str] = &["disk_usage"];

/// Which scrapers run and which of them are served through the cache.
#[derive(Clone, Debug)]
pub struct ScraperConfig {
    pub enabled: HashSet<String>,
    pub cached: HashSet<String>,
    pub cache_ttl: Duration,
}

impl Default for ScraperConfig {
    /// Every scraper that is enabled by default, with the default cache setup.
    fn default() -> Self {
        let enabled = GLOBAL_SCRAPERS
            .iter()
            .chain(DATABASE_SCRAPERS)
            .filter(|name| enabled_by_default(name).unwrap_or(false))
            .map(ToString::to_string)
            .collect();

        Self {
            enabled,
            cached: DEFAULT_CACHED.iter().map(ToString::to_string).collect(),
            cache_ttl: DEFAULT_CACHE_TTL,
        }
    }
}

impl ScraperConfig {
    /// Config with nothing enabled
    #[must_use]
    pub fn new() -> Self {
        Self {
            enabled: HashSet::new(),
            cached: HashSet::new(),
            cache_ttl: DEFAULT_CACHE_TTL,
        }
    }

    #[must_use]
    pub fn with_enabled(mut self, scrapers: &[String]) -> Self {
        self.enabled = scrapers.iter().cloned().collect();
        self
    }

    #[must_use]
    pub fn with_cached(mut self, scrapers: &[String]) -> Self {
        self.cached = scrapers.iter().cloned().collect();
        self
    }

    /// A zero TTL disables caching altogether.
    #[must_use]
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    #[must_use]
    pub fn is_enabled(&self, name: &str) -> bool {
        self.enabled.contains(name)
    }

    #[must_use]
    pub fn is_cached(&self, name: &str) -> bool {
        !self.cache_ttl.is_zero() && self.cached.contains(name)
    }
}
