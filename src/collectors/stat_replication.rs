use crate::collectors::util::text_or_empty;
use crate::scrape::{MetricSink, PgSession, Scraper, Version};
use anyhow::Result;
use futures::future::BoxFuture;
use sqlx::Row;
use sqlx::types::ipnetwork::IpNetwork;
use tracing::{debug, info_span, instrument};
use tracing_futures::Instrument as _;

// Rows with a NULL diff (pg_basebackup streaming connections) are skipped.
const REPLICATION_QUERY: &str = r"
    WITH replication AS (
        SELECT
            application_name,
            client_addr,
            state,
            sync_state,
            (CASE WHEN pg_is_in_recovery()
                THEN pg_wal_lsn_diff(pg_last_wal_receive_lsn(), replay_lsn)
                ELSE pg_wal_lsn_diff(pg_current_wal_lsn(), replay_lsn)
             END)::float8 AS lag_bytes,
            EXTRACT(EPOCH FROM write_lag)::float8 AS write_lag_seconds,
            EXTRACT(EPOCH FROM flush_lag)::float8 AS flush_lag_seconds,
            EXTRACT(EPOCH FROM replay_lag)::float8 AS replay_lag_seconds
        FROM pg_stat_replication
    )
    SELECT * FROM replication WHERE lag_bytes IS NOT NULL
";

const REPLICATION_QUERY_PRE_10: &str = r"
    WITH replication AS (
        SELECT
            application_name,
            client_addr,
            state,
            sync_state,
            (CASE WHEN pg_is_in_recovery()
                THEN pg_xlog_location_diff(pg_last_xlog_receive_location(), replay_location)
                ELSE pg_xlog_location_diff(pg_current_xlog_location(), replay_location)
             END)::float8 AS lag_bytes,
            NULL::float8 AS write_lag_seconds,
            NULL::float8 AS flush_lag_seconds,
            NULL::float8 AS replay_lag_seconds
        FROM pg_stat_replication
    )
    SELECT * FROM replication WHERE lag_bytes IS NOT NULL
";

const LAGS: &[(&str, &str, &str)] = &[
    (
        "write_lag_seconds",
        "postgres_stat_replication_write_lag_seconds",
        "write_lag as reported by pg_stat_replication, in seconds",
    ),
    (
        "flush_lag_seconds",
        "postgres_stat_replication_flush_lag_seconds",
        "flush_lag as reported by pg_stat_replication, in seconds",
    ),
    (
        "replay_lag_seconds",
        "postgres_stat_replication_replay_lag_seconds",
        "replay_lag as reported by pg_stat_replication, in seconds",
    ),
];

/// Replication lag of every connected standby
#[derive(Clone, Debug, Default)]
pub struct StatReplicationScraper;

impl StatReplicationScraper {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn query(version: Version) -> &'static str {
        if version.gte(10.0) {
            REPLICATION_QUERY
        } else {
            REPLICATION_QUERY_PRE_10
        }
    }
}

impl Scraper for StatReplicationScraper {
    type Conn = PgSession;

    fn name(&self) -> &str {
        "stat_replication"
    }

    #[instrument(
        skip(self, conn, sink),
        level = "info",
        err,
        fields(scraper = "stat_replication", otel.kind = "internal")
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
                db.statement = "SELECT * FROM pg_stat_replication with WAL lag",
                db.sql.table = "pg_stat_replication"
            );

            let rows = sqlx::query(Self::query(version))
                .fetch_all(conn.conn())
                .instrument(query_span)
                .await?;

            for row in &rows {
                let application_name = text_or_empty(row, "application_name")?;
                let client_addr = row
                    .try_get::<Option<IpNetwork>, _>("client_addr")?
                    .map(|addr| addr.ip().to_string())
                    .unwrap_or_default();
                let state = text_or_empty(row, "state")?;
                let sync_state = text_or_empty(row, "sync_state")?;

                let labels = [
                    ("application_name", application_name.as_str()),
                    ("client_addr", client_addr.as_str()),
                    ("state", state.as_str()),
                    ("sync_state", sync_state.as_str()),
                ];

                let lag_bytes: f64 = row.try_get("lag_bytes")?;
                sink.gauge(
                    "postgres_stat_replication_lag_bytes",
                    "Replication delay in bytes between the current WAL position and the standby replay position",
                    &labels,
                    lag_bytes,
                );

                // lag columns go NULL after a period of inactivity
                for &(column, name, help) in LAGS {
                    if let Some(seconds) = row.try_get::<Option<f64>, _>(column)? {
                        sink.gauge(name, help, &labels, seconds);
                    }
                }
            }

            debug!(standbys = rows.len(), "updated replication metrics");

            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_selection_by_version() {
        assert!(StatReplicationScraper::query(Version::from(10.0)).contains("pg_wal_lsn_diff"));
        assert!(StatReplicationScraper::query(Version::from(9.6)).contains("pg_xlog_location_diff"));
        assert!(StatReplicationScraper::query(Version::default()).contains("replay_location"));
    }
}
