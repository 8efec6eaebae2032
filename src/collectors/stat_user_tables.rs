use crate::collectors::util::text_or_empty;
use crate::scrape::{Connection, MetricKind, MetricSink, PgSession, Scraper, Version};
use anyhow::Result;
use futures::future::BoxFuture;
use sqlx::Row;
use tracing::{debug, info_span, instrument};
use tracing_futures::Instrument as _;

const USER_TABLES_QUERY: &str = r"
    SELECT
        schemaname::text AS schemaname,
        relname::text AS relname,
        seq_scan::float8 AS seq_scan,
        idx_scan::float8 AS idx_scan,
        n_live_tup::float8 AS n_live_tup,
        n_dead_tup::float8 AS n_dead_tup,
        EXTRACT(EPOCH FROM last_vacuum)::float8 AS last_vacuum,
        EXTRACT(EPOCH FROM last_autovacuum)::float8 AS last_autovacuum,
        EXTRACT(EPOCH FROM last_analyze)::float8 AS last_analyze,
        EXTRACT(EPOCH FROM last_autoanalyze)::float8 AS last_autoanalyze
    FROM pg_stat_user_tables
    ORDER BY schemaname, relname
";

// Timestamps are only emitted once the table has been vacuumed/analyzed.
const COLUMNS: &[(&str, &str, MetricKind, &str)] = &[
    (
        "seq_scan",
        "postgres_stat_user_tables_seq_scan_total",
        MetricKind::Counter,
        "Number of sequential scans initiated on this table",
    ),
    (
        "idx_scan",
        "postgres_stat_user_tables_idx_scan_total",
        MetricKind::Counter,
        "Number of index scans initiated on this table",
    ),
    (
        "n_live_tup",
        "postgres_stat_user_tables_n_live_tup",
        MetricKind::Gauge,
        "Estimated number of live rows",
    ),
    (
        "n_dead_tup",
        "postgres_stat_user_tables_n_dead_tup",
        MetricKind::Gauge,
        "Estimated number of dead rows",
    ),
    (
        "last_vacuum",
        "postgres_stat_user_tables_last_vacuum_timestamp",
        MetricKind::Gauge,
        "Last time at which this table was manually vacuumed",
    ),
    (
        "last_autovacuum",
        "postgres_stat_user_tables_last_autovacuum_timestamp",
        MetricKind::Gauge,
        "Last time at which this table was vacuumed by the autovacuum daemon",
    ),
    (
        "last_analyze",
        "postgres_stat_user_tables_last_analyze_timestamp",
        MetricKind::Gauge,
        "Last time at which this table was manually analyzed",
    ),
    (
        "last_autoanalyze",
        "postgres_stat_user_tables_last_autoanalyze_timestamp",
        MetricKind::Gauge,
        "Last time at which this table was analyzed by the autovacuum daemon",
    ),
];

/// Table access and maintenance statistics for the connected database.
///
/// One series per user table, so this is off unless asked for.
#[derive(Clone, Debug, Default)]
pub struct StatUserTablesScraper;

impl StatUserTablesScraper {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Scraper for StatUserTablesScraper {
    type Conn = PgSession;

    fn name(&self) -> &str {
        "stat_user_tables"
    }

    #[instrument(
        skip(self, conn, sink),
        level = "info",
        err,
        fields(scraper = "stat_user_tables", otel.kind = "internal")
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
                db.statement = "SELECT ... FROM pg_stat_user_tables",
                db.sql.table = "pg_stat_user_tables"
            );

            let rows = sqlx::query(USER_TABLES_QUERY)
                .fetch_all(conn.conn())
                .instrument(query_span)
                .await?;

            for row in &rows {
                let schemaname = text_or_empty(row, "schemaname")?;
                let relname = text_or_empty(row, "relname")?;

                let labels = [
                    ("datname", datname.as_str()),
                    ("schemaname", schemaname.as_str()),
                    ("relname", relname.as_str()),
                ];

                for &(column, name, kind, help) in COLUMNS {
                    let Some(value) = row.try_get::<Option<f64>, _>(column)? else {
                        continue;
                    };

                    match kind {
                        MetricKind::Gauge => sink.gauge(name, help, &labels, value),
                        MetricKind::Counter => sink.counter(name, help, &labels, value),
                    }
                }
            }

            debug!(%datname, tables = rows.len(), "updated user table metrics");

            Ok(())
        })
    }

    fn enabled_by_default(&self) -> bool {
        false
    }
}
