use crate::scrape::{Connection, MetricSink, Observation, Scraper, Version};
use anyhow::Result;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

struct CacheEntry {
    scraped_at: Instant,
    observations: Vec<Observation>,
}

/// Memoizes what a wrapped scraper emits, per database, for `ttl`.
///
/// A refresh that fails still replaces the entry with whatever the wrapped
/// scraper managed to emit, so a broken database is queried at most once per
/// `ttl`. Entries are refreshed in place and never evicted.
///
/// Callers must not scrape the same database concurrently; the scrape
/// service serializes scrapes for this reason.
pub struct CachedScraper<S> {
    inner: S,
    name: String,
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl<S: Scraper> CachedScraper<S> {
    pub fn new(inner: S, ttl: Duration) -> Self {
        let name = format!("cached_{}", inner.name());

        Self {
            inner,
            name,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Number of databases with a stored entry.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!(scraper = %self.name, "cache mutex was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn fresh(&self, datname: &str) -> Option<Vec<Observation>> {
        self.entries()
            .get(datname)
            .filter(|entry| entry.scraped_at.elapsed() <= self.ttl)
            .map(|entry| entry.observations.clone())
    }

    fn store(&self, datname: String, scraped_at: Instant, observations: Vec<Observation>) {
        self.entries().insert(
            datname,
            CacheEntry {
                scraped_at,
                observations,
            },
        );
    }
}

impl<S: Scraper> Scraper for CachedScraper<S> {
    type Conn = S::Conn;

    fn name(&self) -> &str {
        &self.name
    }

    fn base_name(&self) -> &str {
        self.inner.base_name()
    }

    fn scrape<'a>(
        &'a self,
        conn: &'a mut S::Conn,
        version: Version,
        sink: &'a mut MetricSink,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let datname = conn.database().to_string();

            if let Some(observations) = self.fresh(&datname) {
                debug!(
                    scraper = %self.name,
                    datname = %datname,
                    observations = observations.len(),
                    "serving cached observations"
                );
                sink.extend(observations);
                return Ok(());
            }

            let started = Instant::now();
            let mut private = MetricSink::new();
            let result = self.inner.scrape(conn, version, &mut private).await;

            let observations = private.into_observations();
            sink.extend(observations.iter().cloned());

            debug!(
                scraper = %self.name,
                datname = %datname,
                observations = observations.len(),
                ok = result.is_ok(),
                "refreshed cache entry"
            );

            self.store(datname, started, observations);

            result
        })
    }

    fn enabled_by_default(&self) -> bool {
        self.inner.enabled_by_default()
    }
}
