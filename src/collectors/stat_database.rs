use crate::collectors::util::text_or_empty;
use crate::scrape::{MetricKind, MetricSink, PgSession, Scraper, Version};
use anyhow::Result;
use futures::future::BoxFuture;
use sqlx::Row;
use tracing::{debug, info_span, instrument};
use tracing_futures::Instrument as _;

const STAT_DATABASE_QUERY: &str = r"
    SELECT
        datname,
        numbackends::float8 AS numbackends,
        tup_returned::float8 AS tup_returned,
        tup_fetched::float8 AS tup_fetched,
        tup_inserted::float8 AS tup_inserted,
        tup_updated::float8 AS tup_updated,
        tup_deleted::float8 AS tup_deleted,
        xact_commit::float8 AS xact_commit,
        xact_rollback::float8 AS xact_rollback,
        blks_read::float8 AS blks_read,
        blks_hit::float8 AS blks_hit,
        conflicts::float8 AS conflicts,
        deadlocks::float8 AS deadlocks,
        temp_files::float8 AS temp_files,
        temp_bytes::float8 AS temp_bytes
    FROM pg_stat_database
    WHERE datname IS NOT NULL
    ORDER BY datname
";

const COLUMNS: &[(&str, &str, MetricKind, &str)] = &[
    (
        "numbackends",
        "postgres_stat_database_numbackends",
        MetricKind::Gauge,
        "Number of backends currently connected to this database",
    ),
    (
        "tup_returned",
        "postgres_stat_database_tup_returned_total",
        MetricKind::Counter,
        "Number of rows returned by queries in this database",
    ),
    (
        "tup_fetched",
        "postgres_stat_database_tup_fetched_total",
        MetricKind::Counter,
        "Number of rows fetched by queries in this database",
    ),
    (
        "tup_inserted",
        "postgres_stat_database_tup_inserted_total",
        MetricKind::Counter,
        "Number of rows inserted by queries in this database",
    ),
    (
        "tup_updated",
        "postgres_stat_database_tup_updated_total",
        MetricKind::Counter,
        "Number of rows updated by queries in this database",
    ),
    (
        "tup_deleted",
        "postgres_stat_database_tup_deleted_total",
        MetricKind::Counter,
        "Number of rows deleted by queries in this database",
    ),
    (
        "xact_commit",
        "postgres_stat_database_xact_commit_total",
        MetricKind::Counter,
        "Number of transactions in this database that have been committed",
    ),
    (
        "xact_rollback",
        "postgres_stat_database_xact_rollback_total",
        MetricKind::Counter,
        "Number of transactions in this database that have been rolled back",
    ),
    (
        "blks_read",
        "postgres_stat_database_blks_read_total",
        MetricKind::Counter,
        "Number of disk blocks read in this database",
    ),
    (
        "blks_hit",
        "postgres_stat_database_blks_hit_total",
        MetricKind::Counter,
        "Number of times disk blocks were found already in the buffer cache",
    ),
    (
        "conflicts",
        "postgres_stat_database_conflicts_total",
        MetricKind::Counter,
        "Number of queries canceled due to conflicts with recovery in this database",
    ),
    (
        "deadlocks",
        "postgres_stat_database_deadlocks_total",
        MetricKind::Counter,
        "Number of deadlocks detected in this database",
    ),
    (
        "temp_files",
        "postgres_stat_database_temp_files_total",
        MetricKind::Counter,
        "Number of temporary files created by queries in this database",
    ),
    (
        "temp_bytes",
        "postgres_stat_database_temp_bytes_total",
        MetricKind::Counter,
        "Total amount of data written to temporary files by queries in this database",
    ),
];

/// Per-database activity counters from `pg_stat_database`
#[derive(Clone, Debug, Default)]
pub struct StatDatabaseScraper;

impl StatDatabaseScraper {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Scraper for StatDatabaseScraper {
    type Conn = PgSession;

    fn name(&self) -> &str {
        "stat_database"
    }

    #[instrument(
        skip(self, conn, sink),
        level = "info",
        err,
        fields(scraper = "stat_database", otel.kind = "internal")
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
                db.statement = "SELECT * FROM pg_stat_database WHERE datname IS NOT NULL",
                db.sql.table = "pg_stat_database"
            );

            let rows = sqlx::query(STAT_DATABASE_QUERY)
                .fetch_all(conn.conn())
                .instrument(query_span)
                .await?;

            for row in &rows {
                let datname = text_or_empty(row, "datname")?;

                for &(column, name, kind, help) in COLUMNS {
                    let value = row.try_get::<Option<f64>, _>(column)?.unwrap_or(0.0);
                    let labels = [("datname", datname.as_str())];

                    match kind {
                        MetricKind::Gauge => sink.gauge(name, help, &labels, value),
                        MetricKind::Counter => sink.counter(name, help, &labels, value),
                    }
                }
            }

            debug!(databases = rows.len(), "updated database metrics");

            Ok(())
        })
    }
}
