use crate::collectors::util::text_or_empty;
use crate::scrape::{Connection, MetricSink, PgSession, Scraper, Version};
use anyhow::Result;
use futures::future::BoxFuture;
use sqlx::Row;
use tracing::{debug, info_span, instrument};
use tracing_futures::Instrument as _;

const RELATION_SIZE_QUERY: &str = r"
    SELECT
        N.nspname::text AS schemaname,
        C.relname::text AS relname,
        pg_relation_size(C.oid)::float8 AS size_bytes
    FROM pg_class C
    LEFT JOIN pg_namespace N ON N.oid = C.relnamespace
    WHERE N.nspname NOT IN ('pg_catalog', 'information_schema')
    ORDER BY pg_relation_size(C.oid) DESC
";

const TABLE_SIZE_QUERY: &str = r"
    SELECT
        N.nspname::text AS schemaname,
        C.relname::text AS relname,
        pg_total_relation_size(C.oid)::float8 AS size_bytes
    FROM pg_class C
    LEFT JOIN pg_namespace N ON N.oid = C.relnamespace
    WHERE N.nspname NOT IN ('pg_catalog', 'information_schema')
      AND C.relkind <> 'i'
      AND N.nspname !~ '^pg_toast'
    ORDER BY pg_total_relation_size(C.oid) DESC
";

/// On-disk size of every relation and table in the connected database.
///
/// `pg_relation_size` stats every file, so this is usually run behind a
/// cache.
#[derive(Clone, Debug, Default)]
pub struct DiskUsageScraper;

impl DiskUsageScraper {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Scraper for DiskUsageScraper {
    type Conn = PgSession;

    fn name(&self) -> &str {
        "disk_usage"
    }

    #[instrument(
        skip(self, conn, sink),
        level = "info",
        err,
        fields(scraper = "disk_usage", otel.kind = "internal")
    )]
    fn scrape<'a>(
        &'a self,
        conn: &'a mut PgSession,
        _version: Version,
        sink: &'a mut MetricSink,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let datname = conn.database().to_string();

            let passes = [
                (
                    RELATION_SIZE_QUERY,
                    "SELECT nspname, relname, pg_relation_size(oid) FROM pg_class",
                    "postgres_disk_usage_relation_bytes",
                    "Bytes used on disk to store this relation",
                ),
                (
                    TABLE_SIZE_QUERY,
                    "SELECT nspname, relname, pg_total_relation_size(oid) FROM pg_class",
                    "postgres_disk_usage_table_bytes",
                    "Bytes used on disk to store this table, including indexes and TOAST",
                ),
            ];

            let mut relations = 0;

            for (query, statement, name, help) in passes {
                let query_span = info_span!(
                    "db.query",
                    otel.kind = "client",
                    db.system = "postgresql",
                    db.operation = "SELECT",
                    db.name = %datname,
                    db.statement = statement,
                    db.sql.table = "pg_class"
                );

                let rows = sqlx::query(query)
                    .fetch_all(conn.conn())
                    .instrument(query_span)
                    .await?;

                for row in &rows {
                    let schemaname = text_or_empty(row, "schemaname")?;
                    let relname = text_or_empty(row, "relname")?;
                    let size: f64 = row.try_get::<Option<f64>, _>("size_bytes")?.unwrap_or(0.0);

                    sink.gauge(
                        name,
                        help,
                        &[
                            ("datname", datname.as_str()),
                            ("schemaname", schemaname.as_str()),
                            ("relname", relname.as_str()),
                        ],
                        size,
                    );
                }

                relations += rows.len();
            }

            debug!(%datname, relations, "updated disk usage metrics");

            Ok(())
        })
    }
}
