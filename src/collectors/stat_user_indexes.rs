use crate::collectors::util::text_or_empty;
use crate::scrape::{Connection, MetricSink, PgSession, Scraper, Version};
use anyhow::Result;
use futures::future::BoxFuture;
use sqlx::Row;
use tracing::{debug, info_span, instrument};
use tracing_futures::Instrument as _;

const USER_INDEXES_QUERY: &str = r"
    SELECT
        schemaname::text AS schemaname,
        relname::text AS relname,
        indexrelname::text AS indexname,
        idx_scan::float8 AS idx_scan,
        idx_tup_read::float8 AS idx_tup_read,
        idx_tup_fetch::float8 AS idx_tup_fetch
    FROM pg_stat_user_indexes
    WHERE schemaname <> 'information_schema'
      AND idx_tup_fetch IS NOT NULL
    ORDER BY schemaname, relname, indexrelname
";

const COUNTERS: &[(&str, &str, &str)] = &[
    (
        "idx_scan",
        "postgres_stat_user_indexes_scan_total",
        "Number of times this index has been scanned",
    ),
    (
        "idx_tup_read",
        "postgres_stat_user_indexes_tuple_read_total",
        "Number of index entries returned by scans on this index",
    ),
    (
        "idx_tup_fetch",
        "postgres_stat_user_indexes_tuple_fetch_total",
        "Number of live table rows fetched by simple index scans using this index",
    ),
];

/// Index usage for the connected database
#[derive(Clone, Debug, Default)]
pub struct StatUserIndexesScraper;

impl StatUserIndexesScraper {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Scraper for StatUserIndexesScraper {
    type Conn = PgSession;

    fn name(&self) -> &str {
        "stat_user_indexes"
    }

    #[instrument(
        skip(self, conn, sink),
        level = "info",
        err,
        fields(scraper = "stat_user_indexes", otel.kind = "internal")
    )]
    fn scrape<'a>(
        &'a self,
        conn: &'a mut PgSession,
        _version: Version,
        sink: &'a mut MetricSink,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let datname = conn.database().to_string();

            let query_span = info_span!(
                "db.query",
                otel.kind = "client",
                db.system = "postgresql",
                db.operation = "SELECT",
                db.name = %datname,
                db.statement = "SELECT ... FROM pg_stat_user_indexes",
                db.sql.table = "pg_stat_user_indexes"
            );

            let rows = sqlx::query(USER_INDEXES_QUERY)
                .fetch_all(conn.conn())
                .instrument(query_span)
                .await?;

            for row in &rows {
                let schemaname = text_or_empty(row, "schemaname")?;
                let relname = text_or_empty(row, "relname")?;
                let indexname = text_or_empty(row, "indexname")?;

                let labels = [
                    ("datname", datname.as_str()),
                    ("schemaname", schemaname.as_str()),
                    ("relname", relname.as_str()),
                    ("indexname", indexname.as_str()),
                ];

                for &(column, name, help) in COUNTERS {
                    let value = row.try_get::<Option<f64>, _>(column)?.unwrap_or(0.0);
                    sink.counter(name, help, &labels, value);
                }
            }

            debug!(%datname, indexes = rows.len(), "updated user index metrics");

            Ok(())
        })
    }
}
