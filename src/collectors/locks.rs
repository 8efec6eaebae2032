use crate::collectors::util::{bool_label, text_or_empty};
use crate::scrape::{MetricSink, PgSession, Scraper, Version};
use anyhow::Result;
use futures::future::BoxFuture;
use sqlx::Row;
use tracing::{debug, info_span, instrument};
use tracing_futures::Instrument as _;

const LOCKS_QUERY: &str = r"
    SELECT
        d.datname,
        l.locktype,
        l.mode,
        l.granted,
        COUNT(*)::float8 AS count
    FROM pg_locks l
    JOIN pg_database d ON l.database = d.oid
    GROUP BY d.datname, l.locktype, l.mode, l.granted
    ORDER BY d.datname, l.locktype, l.mode, l.granted
";

/// Tracks `PostgreSQL` lock contention per database, lock type and mode
#[derive(Clone, Debug, Default)]
pub struct LocksScraper;

impl LocksScraper {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Scraper for LocksScraper {
    type Conn = PgSession;

    fn name(&self) -> &str {
        "locks"
    }

    #[instrument(
        skip(self, conn, sink),
        level = "info",
        err,
        fields(scraper = "locks", otel.kind = "internal")
    )]
    fn scrape<'a>(
        &'a self,
        conn: &'a mut PgSession,
        _version: Version,
        sink: &'a mut MetricSink,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let query_span = info_span!(
                "db.query",
                otel.kind = "client",
                db.system = "postgresql",
                db.operation = "SELECT",
                db.statement = "SELECT datname, locktype, mode, granted, count FROM pg_locks + pg_database join",
                db.sql.table = "pg_locks"
            );

            let rows = sqlx::query(LOCKS_QUERY)
                .fetch_all(conn.conn())
                .instrument(query_span)
                .await?;

            for row in &rows {
                let datname = text_or_empty(row, "datname")?;
                let locktype = text_or_empty(row, "locktype")?;
                let mode = text_or_empty(row, "mode")?;
                let granted: bool = row.try_get::<Option<bool>, _>("granted")?.unwrap_or(false);
                let count: f64 = row.try_get("count")?;

                sink.gauge(
                    "postgres_locks_count",
                    "Number of locks by datname, locktype, mode and granted",
                    &[
                        ("datname", &datname),
                        ("locktype", &locktype),
                        ("mode", &mode),
                        ("granted", bool_label(granted)),
                    ],
                    count,
                );
            }

            debug!(groups = rows.len(), "updated lock metrics");

            Ok(())
        })
    }
}
