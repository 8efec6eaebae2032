use crate::scrape::{MetricSink, PgSession, Scraper, Version};
use anyhow::Result;
use futures::future::BoxFuture;
use tracing::{debug, info_span, instrument};
use tracing_futures::Instrument as _;

/// Reports whether the server is a standby replaying WAL
#[derive(Clone, Debug, Default)]
pub struct RecoveryScraper;

impl RecoveryScraper {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Scraper for RecoveryScraper {
    type Conn = PgSession;

    fn name(&self) -> &str {
        "recovery"
    }

    #[instrument(
        skip(self, conn, sink),
        level = "info",
        err,
        fields(scraper = "recovery", otel.kind = "internal")
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
                db.statement = "SELECT pg_is_in_recovery()"
            );

            let in_recovery: bool = sqlx::query_scalar("SELECT pg_is_in_recovery()")
                .fetch_one(conn.conn())
                .instrument(query_span)
                .await?;

            sink.gauge(
                "postgres_in_recovery",
                "Whether recovery is still in progress (pg_is_in_recovery()).",
                &[],
                if in_recovery { 1.0 } else { 0.0 },
            );

            debug!(in_recovery, "updated recovery metrics");

            Ok(())
        })
    }
}
