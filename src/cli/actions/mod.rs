pub mod run;

use crate::collectors::config::ScraperConfig;
use crate::exporter::ServerConfig;
use secrecy::SecretString;
use std::time::Duration;

#[derive(Debug)]
pub enum Action {
    Run {
        server: ServerConfig,
        dsn: SecretString,
        scrapers: ScraperConfig,
        excluded: Vec<String>,
        scrape_timeout: Duration,
        connect_timeout: Duration,
    },
}
