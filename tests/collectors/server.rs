use super::{assert_sane, common, scrape};
use postgres_exporter::collectors::{
    LocksScraper, RecoveryScraper, StatActivityScraper, StatArchiverScraper,
    StatBgwriterScraper, StatDatabaseScraper, StatReplicationScraper, WalReceiverScraper,
};

#[tokio::test]
async fn test_recovery() {
    let Some((result, sink, _)) = scrape(&RecoveryScraper::new()).await else {
        return;
    };

    result.unwrap();
    let up = sink.find("postgres_in_recovery", &[]).unwrap();
    assert!(up.value == 0.0 || up.value == 1.0);
}

#[tokio::test]
async fn test_locks_labels() {
    let Some((result, sink, _)) = scrape(&LocksScraper::new()).await else {
        return;
    };

    result.unwrap();
    assert_sane(&sink);

    for o in sink.iter() {
        assert_eq!(o.name, "postgres_locks_count");
        assert_eq!(o.label_names(), vec!["datname", "locktype", "mode", "granted"]);
        assert!(matches!(o.label("granted"), Some("true" | "false")));
        assert!(o.value >= 1.0);
    }
}

#[tokio::test]
async fn test_stat_activity_sees_itself() {
    let Some((result, sink, _)) = scrape(&StatActivityScraper::new()).await else {
        return;
    };

    result.unwrap();
    assert_sane(&sink);
    assert!(
        sink.iter()
            .any(|o| o.name == "postgres_stat_activity_connections" && o.value >= 1.0)
    );
}

#[tokio::test]
async fn test_stat_archiver() {
    let Some((result, sink, _)) = scrape(&StatArchiverScraper::new()).await else {
        return;
    };

    result.unwrap();
    assert_sane(&sink);
    assert!(sink.find("postgres_stat_archiver_archived_total", &[]).is_some());
    assert!(sink.find("postgres_stat_archiver_failed_total", &[]).is_some());
}

#[tokio::test]
async fn test_stat_bgwriter() {
    let Some((result, sink, _)) = scrape(&StatBgwriterScraper::new()).await else {
        return;
    };

    result.unwrap();
    assert_sane(&sink);
    assert!(sink.find("postgres_stat_bgwriter_buffers_alloc_total", &[]).is_some());
    assert!(sink.find("postgres_stat_bgwriter_checkpoints_timed_total", &[]).is_some());
}

#[tokio::test]
async fn test_stat_database() {
    let Some((result, sink, _)) = scrape(&StatDatabaseScraper::new()).await else {
        return;
    };

    result.unwrap();
    assert_sane(&sink);

    let target = common::test_target();
    let datname = target.database();

    let backends = sink
        .find("postgres_stat_database_numbackends", &[("datname", datname)])
        .unwrap();
    assert!(backends.value >= 1.0);
    assert!(
        sink.find("postgres_stat_database_xact_commit_total", &[("datname", datname)])
            .is_some()
    );
}

#[tokio::test]
async fn test_replication_scrapers_on_primary() {
    let Some((result, sink, version)) = scrape(&StatReplicationScraper::new()).await else {
        return;
    };
    result.unwrap();
    assert_sane(&sink);

    let Some((result, sink, _)) = scrape(&WalReceiverScraper::new()).await else {
        return;
    };
    result.unwrap();

    // a standalone primary has no WAL receiver
    if version.gte(10.0) {
        assert!(sink.iter().all(|o| o.value >= 0.0));
    } else {
        assert!(sink.is_empty());
    }
}
