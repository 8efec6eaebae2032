use crate::collectors::util::text_or_empty;
use crate::scrape::{MetricSink, PgSession, Scraper, Version};
use anyhow::Result;
use futures::future::BoxFuture;
use sqlx::Row;
use tracing::{debug, info_span, instrument};
use tracing_futures::Instrument as _;

// PostgreSQL 17 tracks dead tuple storage in bytes instead of tuple counts.
const VACUUM_PROGRESS_QUERY_17: &str = r"
    SELECT
        V.pid::text AS pid,
        V.datname::text AS datname,
        T.schemaname::text AS schemaname,
        T.relname::text AS relname,
        A.query_start::text AS query_start,
        V.phase,
        V.heap_blks_total::float8 AS heap_blks_total,
        V.heap_blks_scanned::float8 AS heap_blks_scanned,
        V.heap_blks_vacuumed::float8 AS heap_blks_vacuumed,
        V.index_vacuum_count::float8 AS index_vacuum_count,
        V.max_dead_tuple_bytes::float8 AS max_dead,
        V.dead_tuple_bytes::float8 AS num_dead
    FROM pg_stat_progress_vacuum AS V
    JOIN pg_stat_activity A ON A.pid = V.pid
    JOIN pg_stat_all_tables AS T ON T.relid = V.relid
    WHERE V.datname = current_database()
";

const VACUUM_PROGRESS_QUERY: &str = r"
    SELECT
        V.pid::text AS pid,
        V.datname::text AS datname,
        T.schemaname::text AS schemaname,
        T.relname::text AS relname,
        A.query_start::text AS query_start,
        V.phase,
        V.heap_blks_total::float8 AS heap_blks_total,
        V.heap_blks_scanned::float8 AS heap_blks_scanned,
        V.heap_blks_vacuumed::float8 AS heap_blks_vacuumed,
        V.index_vacuum_count::float8 AS index_vacuum_count,
        V.max_dead_tuples::float8 AS max_dead,
        V.num_dead_tuples::float8 AS num_dead
    FROM pg_stat_progress_vacuum AS V
    JOIN pg_stat_activity A ON A.pid = V.pid
    JOIN pg_stat_all_tables AS T ON T.relid = V.relid
    WHERE V.datname = current_database()
";

/// Phase metric for a `pg_stat_progress_vacuum.phase` value.
fn phase_metric(phase: &str) -> Option<(&'static str, &'static str)> {
    let metric = match phase {
        "initializing" => (
            "postgres_stat_vacuum_progress_phase_initializing",
            "VACUUM is preparing to begin scanning the heap",
        ),
        "scanning heap" => (
            "postgres_stat_vacuum_progress_phase_scanning_heap",
            "VACUUM is currently scanning the heap",
        ),
        "vacuuming indexes" => (
            "postgres_stat_vacuum_progress_phase_vacuuming_indexes",
            "VACUUM is currently vacuuming the indexes",
        ),
        "vacuuming heap" => (
            "postgres_stat_vacuum_progress_phase_vacuuming_heap",
            "VACUUM is currently vacuuming the heap",
        ),
        "cleaning up indexes" => (
            "postgres_stat_vacuum_progress_phase_cleaning_up_indexes",
            "VACUUM is currently cleaning up indexes",
        ),
        "truncating heap" => (
            "postgres_stat_vacuum_progress_phase_truncating_heap",
            "VACUUM is currently truncating the heap",
        ),
        "performing final cleanup" => (
            "postgres_stat_vacuum_progress_phase_performing_final_cleanup",
            "VACUUM is performing final cleanup",
        ),
        _ => return None,
    };

    Some(metric)
}

/// Dead tuple metrics, named after what the server version reports.
fn dead_tuple_metrics(version: Version) -> [(&'static str, &'static str, &'static str); 2] {
    if version.gte(17.0) {
        [
            (
                "max_dead",
                "postgres_stat_vacuum_progress_max_dead_tuple_bytes",
                "Amount of dead tuple data that can be stored before an index vacuum cycle, in bytes",
            ),
            (
                "num_dead",
                "postgres_stat_vacuum_progress_dead_tuple_bytes",
                "Amount of dead tuple data collected since the last index vacuum cycle, in bytes",
            ),
        ]
    } else {
        [
            (
                "max_dead",
                "postgres_stat_vacuum_progress_max_dead_tuples",
                "Number of dead tuples that can be stored before an index vacuum cycle",
            ),
            (
                "num_dead",
                "postgres_stat_vacuum_progress_num_dead_tuples",
                "Number of dead tuples collected since the last index vacuum cycle",
            ),
        ]
    }
}

const BLOCKS: &[(&str, &str, &str)] = &[
    (
        "heap_blks_total",
        "postgres_stat_vacuum_progress_heap_blks_total",
        "Total number of heap blocks in the table",
    ),
    (
        "heap_blks_scanned",
        "postgres_stat_vacuum_progress_heap_blks_scanned",
        "Number of heap blocks scanned",
    ),
    (
        "heap_blks_vacuumed",
        "postgres_stat_vacuum_progress_heap_blks_vacuumed",
        "Number of heap blocks vacuumed",
    ),
    (
        "index_vacuum_count",
        "postgres_stat_vacuum_progress_index_vacuum_count",
        "Number of completed index vacuum cycles",
    ),
];

/// Progress of every VACUUM running in the connected database
#[derive(Clone, Debug, Default)]
pub struct StatVacuumProgressScraper;

impl StatVacuumProgressScraper {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Scraper for StatVacuumProgressScraper {
    type Conn = PgSession;

    fn name(&self) -> &str {
        "stat_vacuum_progress"
    }

    #[instrument(
        skip(self, conn, sink),
        level = "info",
        err,
        fields(scraper = "stat_vacuum_progress", otel.kind = "internal")
    )]
    fn scrape<'a>(
        &'a self,
        conn: &'a mut PgSession,
        version: Version,
        sink: &'a mut MetricSink,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if !version.gte(9.6) {
                debug!(%version, "pg_stat_progress_vacuum not available, skipping");
                return Ok(());
            }

            let query = if version.gte(17.0) {
                VACUUM_PROGRESS_QUERY_17
            } else {
                VACUUM_PROGRESS_QUERY
            };

            let query_span = info_span!(
                "db.query",
                otel.kind = "client",
                db.system = "postgresql",
                db.operation = "SELECT",
                db.statement = "SELECT ... FROM pg_stat_progress_vacuum JOIN pg_stat_activity JOIN pg_stat_all_tables",
                db.sql.table = "pg_stat_progress_vacuum"
            );

            let rows = sqlx::query(query)
                .fetch_all(conn.conn())
                .instrument(query_span)
                .await?;

            let dead_tuples = dead_tuple_metrics(version);

            for row in &rows {
                let pid = text_or_empty(row, "pid")?;
                let query_start = text_or_empty(row, "query_start")?;
                let schemaname = text_or_empty(row, "schemaname")?;
                let datname = text_or_empty(row, "datname")?;
                let relname = text_or_empty(row, "relname")?;
                let phase = text_or_empty(row, "phase")?;

                let labels = [
                    ("pid", pid.as_str()),
                    ("query_start", query_start.as_str()),
                    ("schemaname", schemaname.as_str()),
                    ("datname", datname.as_str()),
                    ("relname", relname.as_str()),
                ];

                sink.gauge(
                    "postgres_stat_vacuum_progress_running",
                    "VACUUM is running",
                    &labels,
                    1.0,
                );

                if let Some((name, help)) = phase_metric(&phase) {
                    sink.gauge(name, help, &labels, 1.0);
                } else {
                    debug!(%phase, "unknown vacuum phase");
                }

                for &(column, name, help) in BLOCKS.iter().chain(dead_tuples.iter()) {
                    let value = row.try_get::<Option<f64>, _>(column)?.unwrap_or(0.0);
                    sink.gauge(name, help, &labels, value);
                }
            }

            debug!(running = rows.len(), "updated vacuum progress metrics");

            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_metric() {
        assert_eq!(
            phase_metric("scanning heap").map(|(name, _)| name),
            Some("postgres_stat_vacuum_progress_phase_scanning_heap")
        );
        assert_eq!(
            phase_metric("performing final cleanup").map(|(name, _)| name),
            Some("postgres_stat_vacuum_progress_phase_performing_final_cleanup")
        );
        assert!(phase_metric("compacting").is_none());
        assert!(phase_metric("").is_none());
    }

    #[test]
    fn test_dead_tuple_metrics_follow_version() {
        let [max, num] = dead_tuple_metrics(Version::from(17.2));
        assert!(max.1.ends_with("max_dead_tuple_bytes"));
        assert!(num.1.ends_with("_dead_tuple_bytes"));

        let [max, num] = dead_tuple_metrics(Version::from(16.0));
        assert!(max.1.ends_with("max_dead_tuples"));
        assert!(num.1.ends_with("num_dead_tuples"));
    }
}
