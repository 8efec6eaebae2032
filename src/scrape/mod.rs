//! Scrape orchestration.
//!
//! An [`Exporter`] is built for every inbound scrape. It opens a connection
//! from the [`ScrapeTarget`], reads the server version, discovers the
//! databases to walk, then runs the global scrapers once on that connection
//! and the per-database scrapers once per discovered database, each time on
//! a connection opened for that database. Every scraper run is timed and
//! reported through two instrumentation gauges; a failing scraper never stops
//! the others.

use anyhow::Result;
use futures::future::BoxFuture;
use std::time::Instant;
use tracing::{debug, error, info, info_span, instrument, warn};
use tracing_futures::Instrument as _;

pub mod cached;
pub mod sink;
pub mod target;
pub mod version;

#[cfg(test)]
pub(crate) mod testing;

pub use self::cached::CachedScraper;
pub use self::sink::{MetricKind, MetricSink, Observation};
pub use self::target::{Connection, Connector, PgConnector, PgSession, ScrapeTarget};
pub use self::version::Version;

pub const UP: &str = "postgres_up";
const UP_HELP: &str = "Whether the Postgres server is up.";

pub const INFO: &str = "postgres_info";
const INFO_HELP: &str = "Postgres version and distribution.";

pub const SCRAPER_DURATION: &str = "postgres_exporter_scraper_duration_seconds";
const SCRAPER_DURATION_HELP: &str = "Duration of a scraper run in seconds.";

pub const SCRAPER_SUCCESS: &str = "postgres_exporter_scraper_success";
const SCRAPER_SUCCESS_HELP: &str = "Whether the scraper run succeeded (1) or failed (0).";

/// A unit of work that turns one or more queries into observations.
pub trait Scraper: Send + Sync {
    type Conn: Connection;

    fn name(&self) -> &str;

    /// Name used to select the scraper, unchanged by wrappers such as
    /// [`CachedScraper`].
    fn base_name(&self) -> &str {
        self.name()
    }

    fn scrape<'a>(
        &'a self,
        conn: &'a mut Self::Conn,
        version: Version,
        sink: &'a mut MetricSink,
    ) -> BoxFuture<'a, Result<()>>;

    fn enabled_by_default(&self) -> bool {
        true
    }
}

pub type BoxedScraper<C> = Box<dyn Scraper<Conn = C>>;

impl<C: Connection> Scraper for BoxedScraper<C> {
    type Conn = C;

    fn name(&self) -> &str {
        self.as_ref().name()
    }

    fn base_name(&self) -> &str {
        self.as_ref().base_name()
    }

    fn scrape<'a>(
        &'a self,
        conn: &'a mut C,
        version: Version,
        sink: &'a mut MetricSink,
    ) -> BoxFuture<'a, Result<()>> {
        self.as_ref().scrape(conn, version, sink)
    }

    fn enabled_by_default(&self) -> bool {
        self.as_ref().enabled_by_default()
    }
}

/// The fixed, ordered scraper lists an [`Exporter`] runs.
pub struct ScraperSet<C> {
    global: Vec<BoxedScraper<C>>,
    per_database: Vec<BoxedScraper<C>>,
}

impl<C: Connection> ScraperSet<C> {
    #[must_use]
    pub fn new(global: Vec<BoxedScraper<C>>, per_database: Vec<BoxedScraper<C>>) -> Self {
        Self {
            global,
            per_database,
        }
    }

    #[must_use]
    pub fn global(&self) -> &[BoxedScraper<C>] {
        &self.global
    }

    #[must_use]
    pub fn per_database(&self) -> &[BoxedScraper<C>] {
        &self.per_database
    }

    /// Names of every scraper, global first.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.global
            .iter()
            .chain(&self.per_database)
            .map(|s| s.name())
            .collect()
    }

    /// Whether a scraper with this base name is in the set.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.global
            .iter()
            .chain(&self.per_database)
            .any(|s| s.base_name() == name)
    }
}

impl<C: Connection> Default for ScraperSet<C> {
    fn default() -> Self {
        Self::new(Vec::new(), Vec::new())
    }
}

pub struct Exporter<'a, K: Connector> {
    connector: &'a K,
    target: ScrapeTarget,
    scrapers: &'a ScraperSet<K::Conn>,
    excluded: &'a [String],
    only: &'a [String],
}

impl<'a, K: Connector> Exporter<'a, K> {
    #[must_use]
    pub fn new(
        connector: &'a K,
        target: ScrapeTarget,
        scrapers: &'a ScraperSet<K::Conn>,
        excluded: &'a [String],
    ) -> Self {
        Self {
            connector,
            target,
            scrapers,
            excluded,
            only: &[],
        }
    }

    /// Run only the scrapers whose base name is in `only`, keeping their
    /// order. An empty list runs everything.
    #[must_use]
    pub fn with_filter(mut self, only: &'a [String]) -> Self {
        self.only = only;
        self
    }

    fn selected(&self, scraper: &dyn Scraper<Conn = K::Conn>) -> bool {
        self.only.is_empty() || self.only.iter().any(|name| name == scraper.base_name())
    }

    /// Run one full scrape, pushing everything gathered into `sink`.
    ///
    /// Failing to connect, read the version or list databases ends the
    /// scrape early; so does failing to connect to one of the discovered
    /// databases. Whatever was emitted before that point stays in `sink`.
    #[instrument(
        skip(self, sink),
        level = "info",
        fields(datname = %self.target.database(), otel.kind = "internal")
    )]
    pub async fn collect(&mut self, sink: &mut MetricSink) {
        let mut conn = match self.connector.connect(&self.target).await {
            Ok(conn) => conn,
            Err(e) => {
                sink.gauge(UP, UP_HELP, &[], 0.0);
                error!(datname = %self.target.database(), error = %e, "failed to connect");
                return;
            }
        };

        sink.gauge(UP, UP_HELP, &[], 1.0);

        self.scrape_server(&mut conn, sink).await;

        if let Err(e) = conn.close().await {
            warn!(error = %e, "failed to close connection");
        }
    }

    async fn scrape_server(&mut self, conn: &mut K::Conn, sink: &mut MetricSink) {
        let raw = match conn.server_version().await {
            Ok(raw) => raw,
            Err(e) => {
                error!(error = %e, "failed to query server version");
                return;
            }
        };

        let version = Version::parse(&raw);

        sink.gauge(INFO, INFO_HELP, &[("version", &version.to_string())], 1.0);

        let databases = match conn.list_databases(self.excluded).await {
            Ok(databases) => databases,
            Err(e) => {
                error!(error = %e, "failed to list databases");
                return;
            }
        };

        info!(
            version = %version,
            databases = %databases.join(","),
            excluded = %self.excluded.join(","),
            "discovered databases"
        );

        let initial = conn.database().to_string();

        let scrapers = self.scrapers;

        for scraper in scrapers.global().iter().filter(|s| self.selected(s.as_ref())) {
            run_scraper(scraper.as_ref(), conn, version, &initial, sink).await;
        }

        for datname in &databases {
            self.target.set_database(datname);

            let mut db_conn = match self.connector.connect(&self.target).await {
                Ok(db_conn) => db_conn,
                Err(e) => {
                    error!(
                        datname = %datname,
                        error = %e,
                        "failed to connect, skipping remaining databases"
                    );
                    return;
                }
            };

            for scraper in scrapers
                .per_database()
                .iter()
                .filter(|s| self.selected(s.as_ref()))
            {
                run_scraper(scraper.as_ref(), &mut db_conn, version, datname, sink).await;
            }

            if let Err(e) = db_conn.close().await {
                warn!(datname = %datname, error = %e, "failed to close connection");
            }
        }
    }
}

async fn run_scraper<C: Connection>(
    scraper: &dyn Scraper<Conn = C>,
    conn: &mut C,
    version: Version,
    datname: &str,
    sink: &mut MetricSink,
) {
    let span = info_span!("scraper.run", scraper = scraper.name(), datname = datname);

    let started = Instant::now();
    let result = scraper.scrape(conn, version, sink).instrument(span).await;
    let duration = started.elapsed().as_secs_f64();

    let labels = [("scraper", scraper.name()), ("datname", datname)];

    sink.gauge(SCRAPER_DURATION, SCRAPER_DURATION_HELP, &labels, duration);

    match result {
        Ok(()) => {
            sink.gauge(SCRAPER_SUCCESS, SCRAPER_SUCCESS_HELP, &labels, 1.0);
            debug!(scraper = scraper.name(), datname, duration, "scraper succeeded");
        }
        Err(e) => {
            sink.gauge(SCRAPER_SUCCESS, SCRAPER_SUCCESS_HELP, &labels, 0.0);
            error!(
                scraper = scraper.name(),
                datname,
                duration,
                error = %e,
                "scraper failed"
            );
        }
    }
}
