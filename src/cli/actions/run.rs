use crate::cli::actions::Action;
use crate::collectors::build_scrapers;
use crate::exporter::{self, ScrapeService, process::ProcessCollector};
use crate::scrape::{PgConnector, ScrapeTarget};
use anyhow::Result;
use tracing::debug;

/// Handle the run action
///
/// # Errors
///
/// Returns an error if the DSN is invalid or the server fails
pub async fn handle(action: Action) -> Result<()> {
    match action {
        Action::Run {
            server,
            dsn,
            scrapers,
            excluded,
            scrape_timeout,
            connect_timeout,
        } => {
            let target = ScrapeTarget::from_dsn(&dsn)?;
            let scrapers = build_scrapers(&scrapers);

            debug!(scrapers = ?scrapers.names(), "scrapers enabled");

            let service = ScrapeService::new(
                PgConnector::new(connect_timeout),
                target,
                scrapers,
                excluded,
                scrape_timeout,
            )
            .with_process_collector(ProcessCollector::new());

            exporter::new(server, service).await?;
        }
    }

    Ok(())
}
