use crate::collectors::util::text_or_empty;
use crate::scrape::{MetricSink, PgSession, Scraper, Version};
use anyhow::Result;
use futures::future::BoxFuture;
use sqlx::Row;
use tracing::{debug, info_span, instrument};
use tracing_futures::Instrument as _;

// Every (database, state) pair is reported, zero when no backend is in it.
const CONNECTIONS_QUERY: &str = r"
    WITH states AS (
        SELECT datname, unnest(ARRAY[
            'active',
            'idle',
            'idle in transaction',
            'idle in transaction (aborted)',
            'fastpath function call',
            'disabled'
        ]) AS state
        FROM pg_database
        WHERE datallowconn
    )
    SELECT s.datname, s.state, COALESCE(a.count, 0)::float8 AS count
    FROM states s
    LEFT JOIN (
        SELECT datname, state, COUNT(*) AS count
        FROM pg_stat_activity
        GROUP BY datname, state
    ) a USING (datname, state)
    ORDER BY s.datname, s.state
";

const OLDEST_QUERY: &str = r"
    SELECT
        (SELECT EXTRACT(EPOCH FROM MIN(backend_start))::float8
           FROM pg_stat_activity) AS oldest_backend,
        (SELECT EXTRACT(EPOCH FROM age(clock_timestamp(), COALESCE(MIN(xact_start), clock_timestamp())))::float8
           FROM pg_stat_activity
          WHERE state IN ('idle in transaction', 'active')
            AND backend_xid IS NOT NULL) AS oldest_xact,
        (SELECT EXTRACT(EPOCH FROM age(clock_timestamp(), COALESCE(MIN(query_start), clock_timestamp())))::float8
           FROM pg_stat_activity
          WHERE state = 'active') AS oldest_active,
        (SELECT EXTRACT(EPOCH FROM age(clock_timestamp(), COALESCE(MIN(query_start), clock_timestamp())))::float8
           FROM pg_stat_activity
          WHERE backend_xmin IS NOT NULL) AS oldest_snapshot
";

/// Connections per database and state, plus the age of the oldest
/// backend, transaction, running query and snapshot.
#[derive(Clone, Debug, Default)]
pub struct StatActivityScraper;

impl StatActivityScraper {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Scraper for StatActivityScraper {
    type Conn = PgSession;

    fn name(&self) -> &str {
        "stat_activity"
    }

    #[instrument(
        skip(self, conn, sink),
        level = "info",
        err,
        fields(scraper = "stat_activity", otel.kind = "internal")
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
                db.statement = "SELECT datname, state, count FROM pg_stat_activity (all states)",
                db.sql.table = "pg_stat_activity"
            );

            let rows = sqlx::query(CONNECTIONS_QUERY)
                .fetch_all(conn.conn())
                .instrument(query_span)
                .await?;

            for row in &rows {
                let datname = text_or_empty(row, "datname")?;
                let state = text_or_empty(row, "state")?;
                let count: f64 = row.try_get("count")?;

                sink.gauge(
                    "postgres_stat_activity_connections",
                    "Number of current connections in their current state",
                    &[("datname", &datname), ("state", &state)],
                    count,
                );
            }

            let query_span = info_span!(
                "db.query",
                otel.kind = "client",
                db.system = "postgresql",
                db.operation = "SELECT",
                db.statement = "SELECT oldest backend/xact/query/snapshot FROM pg_stat_activity",
                db.sql.table = "pg_stat_activity"
            );

            let row = sqlx::query(OLDEST_QUERY)
                .fetch_one(conn.conn())
                .instrument(query_span)
                .await?;

            if let Some(oldest_backend) = row.try_get::<Option<f64>, _>("oldest_backend")? {
                sink.gauge(
                    "postgres_stat_activity_oldest_backend_timestamp",
                    "The oldest backend started timestamp",
                    &[],
                    oldest_backend,
                );
            }

            let ages = [
                (
                    "oldest_xact",
                    "postgres_stat_activity_oldest_xact_seconds",
                    "The oldest transaction (active or idle in transaction)",
                ),
                (
                    "oldest_active",
                    "postgres_stat_activity_oldest_query_active_seconds",
                    "The oldest query in running state (long query)",
                ),
                (
                    "oldest_snapshot",
                    "postgres_stat_activity_oldest_snapshot_seconds",
                    "The oldest query snapshot",
                ),
            ];

            for (column, name, help) in ages {
                let seconds = row.try_get::<Option<f64>, _>(column)?.unwrap_or(0.0);
                sink.gauge(name, help, &[], seconds);
            }

            debug!(connections = rows.len(), "updated activity metrics");

            Ok(())
        })
    }
}
