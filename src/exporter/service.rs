use crate::collectors::SCRAPER_NAMES;
use crate::exporter::{encode, process::ProcessCollector};
use crate::scrape::{
    Connection, Connector, Exporter, MetricSink, PgConnector, ScrapeTarget, ScraperSet,
};
use anyhow::{Result, bail};
use prometheus::Registry;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

/// Everything an HTTP handler needs to run a scrape.
///
/// Cheap to clone; clones share the connector, the scrapers and their caches,
/// and the lock that keeps scrapes from overlapping.
pub struct ScrapeService<C: Connector = PgConnector> {
    connector: Arc<C>,
    target: ScrapeTarget,
    scrapers: Arc<ScraperSet<C::Conn>>,
    excluded: Arc<[String]>,
    lock: Arc<Mutex<()>>,
    scrape_timeout: Duration,
    process: Option<ProcessCollector>,
}

impl<C: Connector> Clone for ScrapeService<C> {
    fn clone(&self) -> Self {
        Self {
            connector: Arc::clone(&self.connector),
            target: self.target.clone(),
            scrapers: Arc::clone(&self.scrapers),
            excluded: Arc::clone(&self.excluded),
            lock: Arc::clone(&self.lock),
            scrape_timeout: self.scrape_timeout,
            process: self.process.clone(),
        }
    }
}

impl<C: Connector> ScrapeService<C> {
    #[must_use]
    pub fn new(
        connector: C,
        target: ScrapeTarget,
        scrapers: ScraperSet<C::Conn>,
        excluded: Vec<String>,
        scrape_timeout: Duration,
    ) -> Self {
        Self {
            connector: Arc::new(connector),
            target,
            scrapers: Arc::new(scrapers),
            excluded: excluded.into(),
            lock: Arc::new(Mutex::new(())),
            scrape_timeout,
            process: None,
        }
    }

    /// Also expose `postgres_exporter_process_*` on every render.
    #[must_use]
    pub fn with_process_collector(mut self, process: ProcessCollector) -> Self {
        self.process = Some(process);
        self
    }

    #[must_use]
    pub fn scraper_names(&self) -> Vec<&str> {
        self.scrapers.names()
    }

    #[must_use]
    pub fn excluded(&self) -> &[String] {
        &self.excluded
    }

    #[must_use]
    pub fn target(&self) -> &ScrapeTarget {
        &self.target
    }

    /// Check that every name in a `collect[]` filter is a scraper this
    /// service runs.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first scraper that is unknown or was
    /// disabled on the command line
    pub fn validate_filter(&self, only: &[String]) -> Result<()> {
        for name in only {
            if self.scrapers.contains(name) {
                continue;
            }

            if SCRAPER_NAMES.contains(&name.as_str()) {
                bail!("disabled scraper: {name}");
            }

            bail!("missing scraper: {name}");
        }

        Ok(())
    }

    /// Run one scrape and return what it emitted.
    ///
    /// A non-empty `only` restricts the run to those scrapers. Only one
    /// scrape runs at a time; callers queue on the lock. A scrape that
    /// outlives the timeout is dropped, closing its connections, and
    /// whatever it emitted so far is returned.
    #[instrument(skip(self), level = "info", fields(otel.kind = "internal"))]
    pub async fn scrape(&self, only: &[String]) -> MetricSink {
        let _guard = self.lock.lock().await;

        let mut sink = MetricSink::new();
        let mut exporter = Exporter::new(
            self.connector.as_ref(),
            self.target.clone(),
            &self.scrapers,
            &self.excluded,
        )
        .with_filter(only);

        let started = Instant::now();

        if timeout(self.scrape_timeout, exporter.collect(&mut sink))
            .await
            .is_err()
        {
            warn!(
                timeout = ?self.scrape_timeout,
                observations = sink.len(),
                "scrape timed out, serving partial results"
            );
        } else {
            debug!(
                duration = started.elapsed().as_secs_f64(),
                observations = sink.len(),
                "scrape finished"
            );
        }

        sink
    }

    /// Scrape and encode the result, plus process metrics, in the text
    /// exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if the observations cannot be registered or encoded
    pub async fn render(&self, only: &[String]) -> Result<String> {
        let sink = self.scrape(only).await;

        // fresh registry per request so series that vanished are not served
        let registry = Registry::new();
        encode::register_observations(&registry, sink.observations())?;

        if let Some(process) = &self.process {
            process.update();
            process.register(&registry)?;
        }

        encode::encode(&registry)
    }

    /// Open a connection to the configured database and ping it.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or the ping fails
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.connector.connect(&self.target).await?;
        let result = conn.ping().await;

        if let Err(e) = conn.close().await {
            debug!(error = %e, "failed to close health check connection");
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scrape::testing::{CountingScraper, FakeConnection, FakeConnector, SlowScraper};
    use crate::scrape::{BoxedScraper, UP};

    fn service(
        connector: FakeConnector,
        global: Vec<BoxedScraper<FakeConnection>>,
        scrape_timeout: Duration,
    ) -> ScrapeService<FakeConnector> {
        let target = connector.target();
        ScrapeService::new(
            connector,
            target,
            ScraperSet::new(global, Vec::new()),
            vec!["template1".to_string()],
            scrape_timeout,
        )
    }

    #[tokio::test]
    async fn test_render_unreachable_database() {
        let connector = FakeConnector::new("14.2", &[]).refuse("postgres");
        let service = service(connector, Vec::new(), Duration::from_secs(5));

        let text = service.render(&[]).await.unwrap();

        assert!(text.contains("postgres_up 0"));
        assert!(!text.contains("postgres_info"));
    }

    #[tokio::test]
    async fn test_render_includes_scraper_output() {
        let connector = FakeConnector::new("16.1", &["app"]);
        let service = service(
            connector,
            vec![Box::new(CountingScraper::new("counting"))],
            Duration::from_secs(5),
        );

        let text = service.render(&[]).await.unwrap();

        assert!(text.contains("postgres_up 1"));
        assert!(text.contains("postgres_info{version=\"16.1\"} 1"));
        assert!(text.contains("counting_calls{datname=\"postgres\"} 1"));
        assert!(text.lines().any(|line| {
            line.starts_with("postgres_exporter_scraper_success{")
                && line.contains("scraper=\"counting\"")
                && line.ends_with(" 1")
        }));
    }

    #[tokio::test]
    async fn test_clones_share_scrapers() {
        let connector = FakeConnector::new("14.2", &[]);
        let counting = CountingScraper::new("counting");
        let calls = counting.calls();
        let service = service(connector, vec![Box::new(counting)], Duration::from_secs(5));

        let clone = service.clone();
        service.scrape(&[]).await;
        clone.scrape(&[]).await;

        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert_eq!(clone.excluded(), ["template1".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_serves_partial_results() {
        let connector = FakeConnector::new("14.2", &[]);
        let service = service(
            connector,
            vec![Box::new(SlowScraper::new(Duration::from_secs(60)))],
            Duration::from_secs(1),
        );

        let sink = service.scrape(&[]).await;

        assert!(sink.find(UP, &[]).is_some());
        assert!(sink.find("slow_started", &[]).is_some());
        assert!(sink.find("slow_finished", &[]).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scrapes_do_not_overlap() {
        let connector = FakeConnector::new("14.2", &[]);
        let service = service(
            connector,
            vec![Box::new(SlowScraper::new(Duration::from_secs(2)))],
            Duration::from_secs(10),
        );

        let started = tokio::time::Instant::now();
        let (first, second) = tokio::join!(service.scrape(&[]), service.scrape(&[]));

        assert!(first.find("slow_finished", &[]).is_some());
        assert!(second.find("slow_finished", &[]).is_some());
        assert!(started.elapsed() >= Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_render_filtered() {
        let connector = FakeConnector::new("16.1", &[]);
        let kept = CountingScraper::new("kept");
        let skipped = CountingScraper::new("skipped");
        let skipped_calls = skipped.calls();
        let service = service(
            connector,
            vec![Box::new(skipped), Box::new(kept)],
            Duration::from_secs(5),
        );

        let only = vec!["kept".to_string()];
        assert!(service.validate_filter(&only).is_ok());

        let text = service.render(&only).await.unwrap();

        assert!(text.contains("postgres_up 1"));
        assert!(text.contains("scraper=\"kept\""));
        assert!(!text.contains("scraper=\"skipped\""));
        assert_eq!(skipped_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[test]
    fn test_validate_filter() {
        let service = service(
            FakeConnector::new("16.1", &[]),
            vec![Box::new(CountingScraper::new("counting"))],
            Duration::from_secs(5),
        );

        assert!(service.validate_filter(&[]).is_ok());
        assert!(service.validate_filter(&["counting".to_string()]).is_ok());

        let missing = service.validate_filter(&["nope".to_string()]).unwrap_err();
        assert_eq!(missing.to_string(), "missing scraper: nope");

        let disabled = service
            .validate_filter(&["counting".to_string(), "locks".to_string()])
            .unwrap_err();
        assert_eq!(disabled.to_string(), "disabled scraper: locks");
    }

    #[tokio::test]
    async fn test_ping() {
        let healthy = service(FakeConnector::new("14.2", &[]), Vec::new(), Duration::from_secs(5));
        assert!(healthy.ping().await.is_ok());

        let refused = service(
            FakeConnector::new("14.2", &[]).refuse("postgres"),
            Vec::new(),
            Duration::from_secs(5),
        );
        assert!(refused.ping().await.is_err());
    }

    #[tokio::test]
    async fn test_render_with_process_metrics() {
        let service = service(FakeConnector::new("14.2", &[]), Vec::new(), Duration::from_secs(5))
            .with_process_collector(ProcessCollector::new());

        let first = service.render(&[]).await.unwrap();
        let second = service.render(&[]).await.unwrap();

        assert!(first.contains("postgres_exporter_process_start_time_seconds"));
        assert!(second.contains("postgres_exporter_process_resident_memory_bytes"));
    }
}
