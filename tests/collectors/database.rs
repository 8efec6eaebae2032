use super::{assert_sane, common, scrape};
use postgres_exporter::collectors::{
    DiskUsageScraper, StatUserIndexesScraper, StatUserTablesScraper, StatVacuumProgressScraper,
};
use postgres_exporter::scrape::{CachedScraper, MetricSink, Scraper};
use std::time::Duration;

#[tokio::test]
async fn test_vacuum_progress_is_empty_when_idle() {
    let Some((result, sink, _)) = scrape(&StatVacuumProgressScraper::new()).await else {
        return;
    };

    result.unwrap();
    assert_sane(&sink);
    assert!(
        sink.iter()
            .filter(|o| o.name == "postgres_stat_vacuum_progress_running")
            .all(|o| o.value == 1.0)
    );
}

#[tokio::test]
async fn test_user_tables_and_indexes() {
    let Some((mut session, version)) = common::live_session().await else {
        return;
    };

    sqlx::raw_sql(
        "CREATE TEMP TABLE exporter_sample (id int PRIMARY KEY, note text);
         INSERT INTO exporter_sample SELECT g, 'x' FROM generate_series(1, 10) g",
    )
    .execute(session.conn())
    .await
    .unwrap();

    let mut sink = MetricSink::new();
    StatUserTablesScraper::new()
        .scrape(&mut session, version, &mut sink)
        .await
        .unwrap();
    StatUserIndexesScraper::new()
        .scrape(&mut session, version, &mut sink)
        .await
        .unwrap();

    assert_sane(&sink);
    assert!(
        sink.iter()
            .filter(|o| o.name.starts_with("postgres_stat_user_tables_"))
            .all(|o| o.label("datname") == Some(common::test_target().database()))
    );
}

#[tokio::test]
async fn test_disk_usage() {
    let Some((result, sink, _)) = scrape(&DiskUsageScraper::new()).await else {
        return;
    };

    result.unwrap();
    assert_sane(&sink);
    assert!(
        sink.iter()
            .filter(|o| o.name == "postgres_disk_usage_relation_bytes")
            .all(|o| o.value >= 0.0)
    );
}

#[tokio::test]
async fn test_cached_disk_usage_serves_same_result() {
    let Some((mut session, version)) = common::live_session().await else {
        return;
    };

    let cached = CachedScraper::new(DiskUsageScraper::new(), Duration::from_secs(60));

    let mut first = MetricSink::new();
    cached.scrape(&mut session, version, &mut first).await.unwrap();

    let mut second = MetricSink::new();
    cached.scrape(&mut session, version, &mut second).await.unwrap();

    assert_eq!(cached.name(), "cached_disk_usage");
    assert_eq!(first.len(), second.len());
    assert_eq!(cached.len(), 1);
}
