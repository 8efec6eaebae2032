use crate::collectors::util::text_or_empty;
use crate::scrape::{MetricSink, PgSession, Scraper, Version};
use anyhow::Result;
use futures::future::BoxFuture;
use sqlx::Row;
use tracing::{debug, info_span, instrument};
use tracing_futures::Instrument as _;

const WAL_RECEIVER_QUERY: &str = r"
    WITH receiver AS (
        SELECT
            status,
            (CASE WHEN pg_last_wal_receive_lsn() = pg_last_wal_replay_lsn()
                THEN 0
                ELSE EXTRACT(EPOCH FROM now() - pg_last_xact_replay_timestamp())
             END)::float8 AS replay_lag
        FROM pg_stat_wal_receiver
    )
    SELECT * FROM receiver WHERE replay_lag IS NOT NULL
";

/// Standby replay delay, only meaningful on a server running a WAL receiver
#[derive(Clone, Debug, Default)]
pub struct WalReceiverScraper;

impl WalReceiverScraper {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Scraper for WalReceiverScraper {
    type Conn = PgSession;

    fn name(&self) -> &str {
        "wal_receiver"
    }

    #[instrument(
        skip(self, conn, sink),
        level = "info",
        err,
        fields(scraper = "wal_receiver", otel.kind = "internal")
    )]
    fn scrape<'a>(
        &'a self,
        conn: &'a mut PgSession,
        version: Version,
        sink: &'a mut MetricSink,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            // pg_stat_wal_receiver and the *_wal_* functions appeared in 10
            if !version.gte(10.0) {
                debug!(%version, "wal receiver not supported, skipping");
                return Ok(());
            }

            let query_span = info_span!(
                "db.query",
                otel.kind = "client",
                db.system = "postgresql",
                db.operation = "SELECT",
                db.statement = "SELECT status, replay_lag FROM pg_stat_wal_receiver",
                db.sql.table = "pg_stat_wal_receiver"
            );

            let rows = sqlx::query(WAL_RECEIVER_QUERY)
                .fetch_all(conn.conn())
                .instrument(query_span)
                .await?;

            for row in &rows {
                let status = text_or_empty(row, "status")?;
                let replay_lag: f64 = row.try_get("replay_lag")?;

                sink.gauge(
                    "postgres_wal_receiver_replay_lag_seconds",
                    "Delay in standby WAL replay, now() - pg_last_xact_replay_timestamp()",
                    &[("status", &status)],
                    replay_lag,
                );
            }

            debug!(receivers = rows.len(), "updated wal receiver metrics");

            Ok(())
        })
    }
}
