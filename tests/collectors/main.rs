//! Scrapers run against a live PostgreSQL server.
//!
//! Every test returns early when `POSTGRES_EXPORTER_DSN` (or the localhost
//! default) is not reachable.

#[path = "../common/mod.rs"]
mod common;

mod database;
mod server;

use anyhow::Result;
use postgres_exporter::scrape::{MetricKind, MetricSink, PgSession, Scraper, Version};

/// Run `scraper` once on a fresh session, `None` when there is no database.
async fn scrape<S>(scraper: &S) -> Option<(Result<()>, MetricSink, Version)>
where
    S: Scraper<Conn = PgSession>,
{
    let (mut session, version) = common::live_session().await?;
    let mut sink = MetricSink::new();

    let result = scraper.scrape(&mut session, version, &mut sink).await;

    Some((result, sink, version))
}

/// Counters never go negative and every observation carries a finite value.
fn assert_sane(sink: &MetricSink) {
    for o in sink.iter() {
        assert!(o.value.is_finite(), "{} is not finite", o.name);
        if o.kind == MetricKind::Counter {
            assert!(o.value >= 0.0, "{} is negative: {}", o.name, o.value);
            assert!(o.name.ends_with("_total"), "{} counter without _total", o.name);
        }
        assert!(o.name.starts_with("postgres_"), "{} has no prefix", o.name);
    }
}
