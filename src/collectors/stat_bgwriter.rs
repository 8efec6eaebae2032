use crate::collectors::util::MS_PER_SEC;
use crate::scrape::{MetricSink, PgSession, Scraper, Version};
use anyhow::Result;
use futures::future::BoxFuture;
use sqlx::Row;
use sqlx::postgres::PgRow;
use tracing::{debug, info_span, instrument};
use tracing_futures::Instrument as _;

// PostgreSQL 17 moved the checkpoint columns to pg_stat_checkpointer and
// dropped buffers_backend/buffers_backend_fsync.
const BGWRITER_QUERY_17: &str = r"
    SELECT
        c.num_timed::float8 AS checkpoints_timed,
        c.num_requested::float8 AS checkpoints_req,
        c.write_time::float8 AS checkpoint_write_time,
        c.sync_time::float8 AS checkpoint_sync_time,
        c.buffers_written::float8 AS buffers_checkpoint,
        b.buffers_clean::float8 AS buffers_clean,
        b.maxwritten_clean::float8 AS maxwritten_clean,
        NULL::float8 AS buffers_backend,
        NULL::float8 AS buffers_backend_fsync,
        b.buffers_alloc::float8 AS buffers_alloc,
        EXTRACT(EPOCH FROM b.stats_reset)::float8 AS stats_reset
    FROM pg_stat_bgwriter b
    CROSS JOIN pg_stat_checkpointer c
";

const BGWRITER_QUERY: &str = r"
    SELECT
        checkpoints_timed::float8 AS checkpoints_timed,
        checkpoints_req::float8 AS checkpoints_req,
        checkpoint_write_time::float8 AS checkpoint_write_time,
        checkpoint_sync_time::float8 AS checkpoint_sync_time,
        buffers_checkpoint::float8 AS buffers_checkpoint,
        buffers_clean::float8 AS buffers_clean,
        maxwritten_clean::float8 AS maxwritten_clean,
        buffers_backend::float8 AS buffers_backend,
        buffers_backend_fsync::float8 AS buffers_backend_fsync,
        buffers_alloc::float8 AS buffers_alloc,
        EXTRACT(EPOCH FROM stats_reset)::float8 AS stats_reset
    FROM pg_stat_bgwriter
";

/// (column, metric, help, divisor)
const COUNTERS: &[(&str, &str, &str, f64)] = &[
    (
        "checkpoints_timed",
        "postgres_stat_bgwriter_checkpoints_timed_total",
        "Number of scheduled checkpoints that have been performed",
        1.0,
    ),
    (
        "checkpoints_req",
        "postgres_stat_bgwriter_checkpoints_req_total",
        "Number of requested checkpoints that have been performed",
        1.0,
    ),
    (
        "checkpoint_write_time",
        "postgres_stat_bgwriter_checkpoint_write_time_seconds_total",
        "Time spent writing checkpoint files to disk, in seconds",
        MS_PER_SEC,
    ),
    (
        "checkpoint_sync_time",
        "postgres_stat_bgwriter_checkpoint_sync_time_seconds_total",
        "Time spent synchronizing checkpoint files to disk, in seconds",
        MS_PER_SEC,
    ),
    (
        "buffers_checkpoint",
        "postgres_stat_bgwriter_buffers_checkpoint_total",
        "Number of buffers written during checkpoints",
        1.0,
    ),
    (
        "buffers_clean",
        "postgres_stat_bgwriter_buffers_clean_total",
        "Number of buffers written by the background writer",
        1.0,
    ),
    (
        "maxwritten_clean",
        "postgres_stat_bgwriter_maxwritten_clean_total",
        "Number of times the background writer stopped a cleaning scan because it had written too many buffers",
        1.0,
    ),
    (
        "buffers_backend",
        "postgres_stat_bgwriter_buffers_backend_total",
        "Number of buffers written directly by a backend",
        1.0,
    ),
    (
        "buffers_backend_fsync",
        "postgres_stat_bgwriter_buffers_backend_fsync_total",
        "Number of times a backend had to execute its own fsync call",
        1.0,
    ),
    (
        "buffers_alloc",
        "postgres_stat_bgwriter_buffers_alloc_total",
        "Number of buffers allocated",
        1.0,
    ),
];

/// Background writer and checkpointer activity
#[derive(Clone, Debug, Default)]
pub struct StatBgwriterScraper;

impl StatBgwriterScraper {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn query(version: Version) -> &'static str {
        if version.gte(17.0) {
            BGWRITER_QUERY_17
        } else {
            BGWRITER_QUERY
        }
    }
}

fn emit(row: &PgRow, sink: &mut MetricSink) -> Result<(), sqlx::Error> {
    for &(column, name, help, divisor) in COUNTERS {
        // NULL on servers that no longer track the column
        if let Some(value) = row.try_get::<Option<f64>, _>(column)? {
            sink.counter(name, help, &[], value / divisor);
        }
    }

    if let Some(stats_reset) = row.try_get::<Option<f64>, _>("stats_reset")? {
        sink.gauge(
            "postgres_stat_bgwriter_stats_reset_timestamp",
            "Time at which these statistics were last reset",
            &[],
            stats_reset,
        );
    }

    Ok(())
}

impl Scraper for StatBgwriterScraper {
    type Conn = PgSession;

    fn name(&self) -> &str {
        "stat_bgwriter"
    }

    #[instrument(
        skip(self, conn, sink),
        level = "info",
        err,
        fields(scraper = "stat_bgwriter", otel.kind = "internal")
    )]
    fn scrape<'a>(
        &'a self,
        conn: &'a mut PgSession,
        version: Version,
        sink: &'a mut MetricSink,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let query_span = info_span!(
                "db.query",
                otel.kind = "client",
                db.system = "postgresql",
                db.operation = "SELECT",
                db.statement = "SELECT * FROM pg_stat_bgwriter",
                db.sql.table = "pg_stat_bgwriter"
            );

            let row = sqlx::query(Self::query(version))
                .fetch_one(conn.conn())
                .instrument(query_span)
                .await?;

            emit(&row, sink)?;

            debug!(%version, "updated bgwriter metrics");

            Ok(())
        })
    }
}
