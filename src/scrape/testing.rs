//! In-memory connections and scrapers for exercising the orchestrator.

use crate::scrape::{Connection, Connector, MetricSink, ScrapeTarget, Scraper, Version};
use anyhow::{Result, anyhow};
use futures::future::BoxFuture;
use secrecy::SecretString;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub struct FakeConnection {
    id: usize,
    database: String,
    version: String,
    databases: Vec<String>,
    fail_version: bool,
    fail_discovery: bool,
    excluded_seen: Arc<Mutex<Vec<String>>>,
    closed: Arc<Mutex<Vec<usize>>>,
}

impl FakeConnection {
    pub fn new(id: usize, database: &str) -> Self {
        Self {
            id,
            database: database.to_string(),
            version: "14.2".to_string(),
            databases: Vec::new(),
            fail_version: false,
            fail_discovery: false,
            excluded_seen: Arc::default(),
            closed: Arc::default(),
        }
    }

    pub const fn id(&self) -> usize {
        self.id
    }
}

impl Connection for FakeConnection {
    fn database(&self) -> &str {
        &self.database
    }

    fn server_version(&mut self) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            if self.fail_version {
                return Err(anyhow!("version query failed"));
            }
            Ok(self.version.clone())
        })
    }

    fn list_databases<'a>(
        &'a mut self,
        excluded: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<String>>> {
        Box::pin(async move {
            if self.fail_discovery {
                return Err(anyhow!("discovery query failed"));
            }

            self.excluded_seen.lock().unwrap().extend_from_slice(excluded);

            Ok(self
                .databases
                .iter()
                .filter(|db| !excluded.contains(*db))
                .cloned()
                .collect())
        })
    }

    fn ping(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn close(self) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move {
            self.closed.lock().unwrap().push(self.id);
            Ok(())
        })
    }
}

/// Hands out numbered connections; the first one opened gets id 0.
pub struct FakeConnector {
    version: String,
    databases: Vec<String>,
    refuse: HashSet<String>,
    fail_version: bool,
    fail_discovery: bool,
    next_id: AtomicUsize,
    opened: Arc<Mutex<Vec<usize>>>,
    excluded_seen: Arc<Mutex<Vec<String>>>,
    closed: Arc<Mutex<Vec<usize>>>,
}

impl FakeConnector {
    pub fn new(version: &str, databases: &[&str]) -> Self {
        Self {
            version: version.to_string(),
            databases: databases.iter().map(ToString::to_string).collect(),
            refuse: HashSet::new(),
            fail_version: false,
            fail_discovery: false,
            next_id: AtomicUsize::new(0),
            opened: Arc::default(),
            excluded_seen: Arc::default(),
            closed: Arc::default(),
        }
    }

    /// Refuse connections to `database`.
    pub fn refuse(mut self, database: &str) -> Self {
        self.refuse.insert(database.to_string());
        self
    }

    pub fn fail_version(mut self) -> Self {
        self.fail_version = true;
        self
    }

    pub fn fail_discovery(mut self) -> Self {
        self.fail_discovery = true;
        self
    }

    /// Template pointing at the `postgres` database.
    pub fn target(&self) -> ScrapeTarget {
        let dsn = SecretString::from("postgresql://postgres@localhost:5432/postgres".to_string());
        ScrapeTarget::from_dsn(&dsn).unwrap()
    }

    pub fn opened(&self) -> Vec<usize> {
        self.opened.lock().unwrap().clone()
    }

    pub fn closed(&self) -> Vec<usize> {
        self.closed.lock().unwrap().clone()
    }

    pub fn excluded_seen(&self) -> Vec<String> {
        self.excluded_seen.lock().unwrap().clone()
    }
}

impl Connector for FakeConnector {
    type Conn = FakeConnection;

    fn connect<'a>(&'a self, target: &'a ScrapeTarget) -> BoxFuture<'a, Result<FakeConnection>> {
        Box::pin(async move {
            if self.refuse.contains(target.database()) {
                return Err(anyhow!("connection to {} refused", target.database()));
            }

            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            self.opened.lock().unwrap().push(id);

            Ok(FakeConnection {
                id,
                database: target.database().to_string(),
                version: self.version.clone(),
                databases: self.databases.clone(),
                fail_version: self.fail_version,
                fail_discovery: self.fail_discovery,
                excluded_seen: Arc::clone(&self.excluded_seen),
                closed: Arc::clone(&self.closed),
            })
        })
    }
}

/// Emits `counting_calls{datname}` with its own call count as the value.
///
/// A failing instance emits the observation and then returns an error.
pub struct CountingScraper {
    name: &'static str,
    fail: bool,
    calls: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<(usize, String)>>>,
}

impl CountingScraper {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            fail: false,
            calls: Arc::default(),
            seen: Arc::default(),
        }
    }

    pub fn failing(name: &'static str) -> Self {
        Self {
            fail: true,
            ..Self::new(name)
        }
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    /// `(connection id, database)` of every call.
    pub fn seen(&self) -> Arc<Mutex<Vec<(usize, String)>>> {
        Arc::clone(&self.seen)
    }
}

impl Scraper for CountingScraper {
    type Conn = FakeConnection;

    fn name(&self) -> &str {
        self.name
    }

    fn scrape<'a>(
        &'a self,
        conn: &'a mut FakeConnection,
        _version: Version,
        sink: &'a mut MetricSink,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.seen
                .lock()
                .unwrap()
                .push((conn.id(), conn.database().to_string()));

            sink.gauge(
                "counting_calls",
                "Calls made to the counting scraper.",
                &[("datname", conn.database())],
                call as f64,
            );

            if self.fail {
                return Err(anyhow!("{} failed", self.name));
            }

            Ok(())
        })
    }
}

/// Emits a single fixed value, labelled by database when per-database.
pub struct ValueScraper {
    name: &'static str,
    metric: &'static str,
    value: f64,
    with_datname: bool,
}

impl ValueScraper {
    pub const fn global(name: &'static str, metric: &'static str, value: f64) -> Self {
        Self {
            name,
            metric,
            value,
            with_datname: false,
        }
    }

    pub const fn per_database(name: &'static str, metric: &'static str, value: f64) -> Self {
        Self {
            name,
            metric,
            value,
            with_datname: true,
        }
    }
}

impl Scraper for ValueScraper {
    type Conn = FakeConnection;

    fn name(&self) -> &str {
        self.name
    }

    fn scrape<'a>(
        &'a self,
        conn: &'a mut FakeConnection,
        _version: Version,
        sink: &'a mut MetricSink,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if self.with_datname {
                sink.gauge(self.metric, "fixed value", &[("datname", conn.database())], self.value);
            } else {
                sink.gauge(self.metric, "fixed value", &[], self.value);
            }
            Ok(())
        })
    }
}

/// Emits `slow_started`, sleeps, then emits `slow_finished`.
pub struct SlowScraper {
    delay: Duration,
}

impl SlowScraper {
    pub const fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Scraper for SlowScraper {
    type Conn = FakeConnection;

    fn name(&self) -> &str {
        "slow"
    }

    fn scrape<'a>(
        &'a self,
        _conn: &'a mut FakeConnection,
        _version: Version,
        sink: &'a mut MetricSink,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            sink.gauge("slow_started", "Slow scraper started.", &[], 1.0);
            tokio::time::sleep(self.delay).await;
            sink.gauge("slow_finished", "Slow scraper finished.", &[], 1.0);
            Ok(())
        })
    }
}
