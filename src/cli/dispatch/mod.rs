use crate::{
    cli::actions::Action,
    collectors::{SCRAPER_NAMES, config::ScraperConfig, enabled_by_default, util::clean_database_list},
    exporter::{DEFAULT_METRICS_PATH, ServerConfig},
};
use anyhow::{Result, anyhow, bail};
use clap::ArgMatches;
use secrecy::SecretString;
use std::time::Duration;
use tracing::{debug, warn};

/// Turn the parsed arguments into an [`Action`].
///
/// # Errors
///
/// Returns an error if a required argument is missing or the metrics path is
/// unusable
pub fn handler(matches: &ArgMatches) -> Result<Action> {
    let port = matches
        .get_one::<u16>("port")
        .copied()
        .ok_or_else(|| anyhow!("Port is required. Please provide it using the --port flag."))?;

    let listen = matches.get_one::<String>("listen").cloned();

    let metrics_path = matches
        .get_one::<String>("metrics-path")
        .cloned()
        .unwrap_or_else(|| DEFAULT_METRICS_PATH.to_string());
    validate_metrics_path(&metrics_path)?;

    let dsn = SecretString::from(
        matches
            .get_one::<String>("dsn")
            .cloned()
            .ok_or_else(|| anyhow!("DSN is required. Please provide it using the --dsn flag."))?,
    );

    let excluded = list_values(matches, "exclude-databases");
    debug!(excluded = ?excluded, "excluded databases");

    let cached = list_values(matches, "cached-scrapers");
    for name in &cached {
        if !SCRAPER_NAMES.contains(&name.as_str()) {
            warn!(scraper = %name, "unknown scraper in --cached-scrapers, ignoring");
        }
    }

    let cache_ttl = seconds(matches, "cache-ttl", 300);

    let scrapers = ScraperConfig::new()
        .with_enabled(&get_enabled_scrapers(matches))
        .with_cached(&cached)
        .with_cache_ttl(cache_ttl);

    Ok(Action::Run {
        server: ServerConfig {
            port,
            listen,
            metrics_path,
        },
        dsn,
        scrapers,
        excluded,
        scrape_timeout: seconds(matches, "scrape-timeout", 30),
        connect_timeout: seconds(matches, "connect-timeout", 5),
    })
}

fn validate_metrics_path(path: &str) -> Result<()> {
    if !path.starts_with('/') {
        bail!("Metrics path must start with '/': {path}");
    }

    if path == "/health" {
        bail!("Metrics path cannot be /health, it is reserved for the health check");
    }

    Ok(())
}

fn list_values(matches: &ArgMatches, id: &str) -> Vec<String> {
    matches
        .get_many::<String>(id)
        .map(clean_database_list)
        .unwrap_or_default()
}

fn seconds(matches: &ArgMatches, id: &str, default: u64) -> Duration {
    Duration::from_secs(matches.get_one::<u64>(id).copied().unwrap_or(default))
}

/// Names of the scrapers to run, in registration order.
///
/// `--no-collector.<name>` beats `--collector.<name>`, which beats the
/// scraper's own default.
#[must_use]
pub fn get_enabled_scrapers(matches: &ArgMatches) -> Vec<String> {
    SCRAPER_NAMES
        .iter()
        .filter(|&&name| {
            if matches.get_flag(&format!("no-collector.{name}")) {
                return false;
            }

            if matches.get_flag(&format!("collector.{name}")) {
                return true;
            }

            enabled_by_default(name).unwrap_or(false)
        })
        .map(|&name| name.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands;

    fn parse(args: &[&str]) -> ArgMatches {
        let mut argv = vec!["postgres_exporter"];
        argv.extend_from_slice(args);
        commands::new().get_matches_from(argv)
    }

    #[test]
    fn test_get_enabled_scrapers_defaults() {
        let enabled = get_enabled_scrapers(&parse(&[]));

        assert!(enabled.contains(&"recovery".to_string()));
        assert!(enabled.contains(&"stat_database".to_string()));
        assert!(enabled.contains(&"disk_usage".to_string()));
        assert!(!enabled.contains(&"stat_user_tables".to_string()));
    }

    #[test]
    fn test_get_enabled_scrapers_explicit_enable() {
        let enabled = get_enabled_scrapers(&parse(&["--collector.stat_user_tables"]));

        assert!(enabled.contains(&"stat_user_tables".to_string()));
        assert!(enabled.contains(&"locks".to_string()));
    }

    #[test]
    fn test_get_enabled_scrapers_explicit_disable() {
        let enabled = get_enabled_scrapers(&parse(&["--no-collector.locks"]));

        assert!(!enabled.contains(&"locks".to_string()));
        assert!(enabled.contains(&"stat_activity".to_string()));
    }

    #[test]
    fn test_get_enabled_scrapers_keeps_registration_order() {
        let enabled = get_enabled_scrapers(&parse(&[]));
        let expected: Vec<String> = SCRAPER_NAMES
            .iter()
            .filter(|name| enabled_by_default(name).unwrap_or(false))
            .map(|name| (*name).to_string())
            .collect();

        assert_eq!(enabled, expected);
    }

    #[test]
    fn test_handler_builds_run_action() {
        temp_env::with_vars(
            [
                ("POSTGRES_EXPORTER_EXCLUDE_DATABASES", None::<&str>),
                ("POSTGRES_EXPORTER_CACHED_SCRAPERS", None),
                ("POSTGRES_EXPORTER_LISTEN", None),
            ],
            || {
                let matches = parse(&[
                    "--port",
                    "9999",
                    "--listen",
                    "127.0.0.1",
                    "--exclude-databases",
                    " template0 ,template1,,template0",
                    "--cache-ttl",
                    "60",
                    "--scrape-timeout",
                    "10",
                ]);

                let Action::Run {
                    server,
                    scrapers,
                    excluded,
                    scrape_timeout,
                    connect_timeout,
                    ..
                } = handler(&matches).unwrap();

                assert_eq!(server.port, 9999);
                assert_eq!(server.listen.as_deref(), Some("127.0.0.1"));
                assert_eq!(server.metrics_path, "/metrics");
                assert_eq!(excluded, vec!["template0", "template1"]);
                assert_eq!(scrapers.cache_ttl, Duration::from_secs(60));
                assert!(scrapers.is_cached("disk_usage"));
                assert!(scrapers.is_enabled("locks"));
                assert_eq!(scrape_timeout, Duration::from_secs(10));
                assert_eq!(connect_timeout, Duration::from_secs(5));
            },
        );
    }

    #[test]
    fn test_handler_rejects_bad_metrics_path() {
        temp_env::with_var("POSTGRES_EXPORTER_METRICS_PATH", None::<&str>, || {
            assert!(handler(&parse(&["--metrics-path", "metrics"])).is_err());
            assert!(handler(&parse(&["--metrics-path", "/health"])).is_err());
            assert!(handler(&parse(&["--metrics-path", "/custom"])).is_ok());
        });
    }

    #[test]
    fn test_zero_cache_ttl_disables_cache() {
        temp_env::with_var("POSTGRES_EXPORTER_CACHE_TTL", None::<&str>, || {
            let Action::Run { scrapers, .. } = handler(&parse(&["--cache-ttl", "0"])).unwrap();
            assert!(!scrapers.is_cached("disk_usage"));
        });
    }
}
