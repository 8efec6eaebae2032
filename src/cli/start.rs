use crate::cli::{actions::Action, commands, dispatch::handler, telemetry};
use anyhow::Result;
use tracing::Level;

// -v INFO, -vv DEBUG, anything above TRACE
const fn log_level(verbose: u8) -> Option<Level> {
    match verbose {
        0 => None,
        1 => Some(Level::INFO),
        2 => Some(Level::DEBUG),
        _ => Some(Level::TRACE),
    }
}

/// Parse the command line, install logging and tracing, and decide what to run.
///
/// # Errors
///
/// Returns an error if telemetry cannot be initialized or the arguments are
/// invalid
pub fn start() -> Result<Action> {
    let matches = commands::new().get_matches();

    telemetry::init(log_level(matches.get_count("verbose")))?;

    handler(&matches)
}
