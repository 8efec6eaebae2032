//! Connection template and the seams the orchestrator opens connections through.

use anyhow::{Context, Result, anyhow};
use futures::future::BoxFuture;
use secrecy::{ExposeSecret, SecretString};
use sqlx::Connection as _;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use std::{fmt, str::FromStr, time::Duration};
use tokio::time::timeout;
use tracing::{debug, info_span};
use tracing_futures::Instrument as _;

pub const APPLICATION_NAME: &str = "postgres_exporter";

const SERVER_VERSION_QUERY: &str = "SELECT current_setting('server_version')";

const DISCOVERY_QUERY: &str = r"
    SELECT datname
    FROM pg_database
    WHERE datallowconn
      AND NOT datistemplate
      AND datname::text <> ALL($1)
    ORDER BY datname
";

/// Connection parameters plus the database the next connection should open.
///
/// Each scrape works on its own clone, so rewriting the database while
/// walking the discovered databases never leaks into another scrape.
#[derive(Clone)]
pub struct ScrapeTarget {
    options: PgConnectOptions,
    database: String,
}

impl ScrapeTarget {
    /// Parse a libpq style DSN.
    ///
    /// # Errors
    ///
    /// Returns an error if the DSN cannot be parsed
    pub fn from_dsn(dsn: &SecretString) -> Result<Self> {
        let options = PgConnectOptions::from_str(dsn.expose_secret())
            .context("Failed to parse DSN")?
            .application_name(APPLICATION_NAME);

        Ok(Self::from_options(options))
    }

    #[must_use]
    pub fn from_options(options: PgConnectOptions) -> Self {
        // the server falls back to the user name when no database is given
        let database = options
            .get_database()
            .map_or_else(|| options.get_username().to_string(), ToString::to_string);

        Self { options, database }
    }

    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn set_database(&mut self, database: &str) {
        database.clone_into(&mut self.database);
    }

    #[must_use]
    pub fn connect_options(&self) -> PgConnectOptions {
        self.options.clone().database(&self.database)
    }
}

impl fmt::Debug for ScrapeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScrapeTarget")
            .field("host", &self.options.get_host())
            .field("port", &self.options.get_port())
            .field("username", &self.options.get_username())
            .field("database", &self.database)
            .finish_non_exhaustive()
    }
}

/// An open session the orchestrator and the scrapers run against.
pub trait Connection: Send + Sized + 'static {
    /// Database this connection was opened for.
    fn database(&self) -> &str;

    fn server_version(&mut self) -> BoxFuture<'_, Result<String>>;

    /// Names of the databases eligible for per-database scraping, with
    /// `excluded` filtered out by the server.
    fn list_databases<'a>(
        &'a mut self,
        excluded: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<String>>>;

    fn ping(&mut self) -> BoxFuture<'_, Result<()>>;

    fn close(self) -> BoxFuture<'static, Result<()>>;
}

pub trait Connector: Send + Sync + 'static {
    type Conn: Connection;

    fn connect<'a>(&'a self, target: &'a ScrapeTarget) -> BoxFuture<'a, Result<Self::Conn>>;
}

/// Opens a dedicated `PgConnection` per call.
#[derive(Clone, Debug)]
pub struct PgConnector {
    connect_timeout: Duration,
}

impl PgConnector {
    #[must_use]
    pub const fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for PgConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl Connector for PgConnector {
    type Conn = PgSession;

    fn connect<'a>(&'a self, target: &'a ScrapeTarget) -> BoxFuture<'a, Result<PgSession>> {
        Box::pin(async move {
            let options = target.connect_options();

            let span = info_span!(
                "db.connect",
                otel.kind = "client",
                db.system = "postgresql",
                db.name = %target.database(),
            );

            let conn = timeout(self.connect_timeout, PgConnection::connect_with(&options))
                .instrument(span)
                .await
                .map_err(|_| {
                    anyhow!(
                        "connecting to database {} timed out after {}s",
                        target.database(),
                        self.connect_timeout.as_secs()
                    )
                })?
                .with_context(|| format!("Failed to connect to database {}", target.database()))?;

            debug!(datname = %target.database(), "opened connection");

            Ok(PgSession {
                conn,
                database: target.database().to_string(),
            })
        })
    }
}

pub struct PgSession {
    conn: PgConnection,
    database: String,
}

impl PgSession {
    pub fn conn(&mut self) -> &mut PgConnection {
        &mut self.conn
    }
}

impl Connection for PgSession {
    fn database(&self) -> &str {
        &self.database
    }

    fn server_version(&mut self) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            let span = info_span!(
                "db.query",
                otel.kind = "client",
                db.system = "postgresql",
                db.operation = "SELECT",
                db.statement = SERVER_VERSION_QUERY,
            );

            let version: String = sqlx::query_scalar(SERVER_VERSION_QUERY)
                .fetch_one(&mut self.conn)
                .instrument(span)
                .await?;

            Ok(version)
        })
    }

    fn list_databases<'a>(
        &'a mut self,
        excluded: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<String>>> {
        Box::pin(async move {
            let span = info_span!(
                "db.query",
                otel.kind = "client",
                db.system = "postgresql",
                db.operation = "SELECT",
                db.statement = "SELECT datname FROM pg_database (connectable, non-template, not excluded)",
                db.sql.table = "pg_database"
            );

            let databases: Vec<String> = sqlx::query_scalar(DISCOVERY_QUERY)
                .bind(excluded)
                .fetch_all(&mut self.conn)
                .instrument(span)
                .await?;

            Ok(databases)
        })
    }

    fn ping(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.conn.ping().await?;
            Ok(())
        })
    }

    fn close(self) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move {
            self.conn.close().await?;
            Ok(())
        })
    }
}
