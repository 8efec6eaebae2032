use crate::scrape::{MetricSink, PgSession, Scraper, Version};
use anyhow::Result;
use futures::future::BoxFuture;
use sqlx::Row;
use tracing::{debug, info_span, instrument};
use tracing_futures::Instrument as _;

/// WAL archiver progress from `pg_stat_archiver`
#[derive(Clone, Debug, Default)]
pub struct StatArchiverScraper;

impl StatArchiverScraper {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Scraper for StatArchiverScraper {
    type Conn = PgSession;

    fn name(&self) -> &str {
        "stat_archiver"
    }

    #[instrument(
        skip(self, conn, sink),
        level = "info",
        err,
        fields(scraper = "stat_archiver", otel.kind = "internal")
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
                db.statement = "SELECT archived_count, failed_count, stats_reset FROM pg_stat_archiver",
                db.sql.table = "pg_stat_archiver"
            );

            let row = sqlx::query(
                r"
                SELECT
                    archived_count::float8 AS archived_count,
                    failed_count::float8 AS failed_count,
                    EXTRACT(EPOCH FROM stats_reset)::float8 AS stats_reset
                FROM pg_stat_archiver
                ",
            )
            .fetch_one(conn.conn())
            .instrument(query_span)
            .await?;

            let archived: f64 = row.try_get("archived_count")?;
            let failed: f64 = row.try_get("failed_count")?;

            sink.counter(
                "postgres_stat_archiver_archived_total",
                "Number of WAL files that have been successfully archived",
                &[],
                archived,
            );
            sink.counter(
                "postgres_stat_archiver_failed_total",
                "Number of failed attempts for archiving WAL files",
                &[],
                failed,
            );

            if let Some(stats_reset) = row.try_get::<Option<f64>, _>("stats_reset")? {
                sink.gauge(
                    "postgres_stat_archiver_stats_reset_timestamp",
                    "Time at which these statistics were last reset",
                    &[],
                    stats_reset,
                );
            }

            debug!(archived, failed, "updated archiver metrics");

            Ok(())
        })
    }
}
