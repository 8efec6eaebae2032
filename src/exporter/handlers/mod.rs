mod health;
mod metrics;

pub use self::health::{Health, health};
pub use self::metrics::metrics;
