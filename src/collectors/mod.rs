use crate::scrape::{BoxedScraper, CachedScraper, PgSession, Scraper, ScraperSet};
use tracing::debug;

#[macro_use]
mod register_macro;

// Order matters: scrapers run in the order they are listed here.
register_scrapers! {
    global {
        recovery => RecoveryScraper,
        locks => LocksScraper,
        stat_activity => StatActivityScraper,
        stat_archiver => StatArchiverScraper,
        stat_bgwriter => StatBgwriterScraper,
        stat_database => StatDatabaseScraper,
        stat_replication => StatReplicationScraper,
        wal_receiver => WalReceiverScraper,
    }
    per_database {
        stat_vacuum_progress => StatVacuumProgressScraper,
        stat_user_tables => StatUserTablesScraper,
        stat_user_indexes => StatUserIndexesScraper,
        disk_usage => DiskUsageScraper,
    }
}

pub mod config;
pub mod util;

use self::config::ScraperConfig;

/// Build the enabled scrapers in registration order, wrapping the ones
/// configured for caching.
#[must_use]
pub fn build_scrapers(config: &ScraperConfig) -> ScraperSet<PgSession> {
    let build = |factories: Vec<(&'static str, ScraperFactory)>| -> Vec<BoxedScraper<PgSession>> {
        factories
            .into_iter()
            .filter(|(name, _)| config.is_enabled(name))
            .map(|(name, factory)| {
                if config.is_cached(name) {
                    debug!(scraper = name, ttl = ?config.cache_ttl, "caching scraper");
                    Box::new(CachedScraper::new(factory(), config.cache_ttl))
                        as BoxedScraper<PgSession>
                } else {
                    factory()
                }
            })
            .collect()
    };

    ScraperSet::new(build(global_factories()), build(database_factories()))
}
