use clap::{
    Arg, ArgAction, ColorChoice, Command,
    builder::styling::{AnsiColor, Effects, Styles},
};

use crate::exporter::{DEFAULT_METRICS_PATH, GIT_COMMIT_HASH};

mod collectors;

pub const DEFAULT_DSN: &str = "postgresql://postgres@localhost:5432/postgres";

pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let cmd = Command::new("postgres_exporter")
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(GIT_COMMIT_HASH)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .help("Port to listen on")
                .default_value("9187")
                .env("POSTGRES_EXPORTER_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("listen")
                .short('l')
                .long("listen")
                .help("IP address to bind to, both IPv6 and IPv4 when omitted")
                .env("POSTGRES_EXPORTER_LISTEN")
                .value_name("IP"),
        )
        .arg(
            Arg::new("metrics-path")
                .long("metrics-path")
                .help("Path under which metrics are exposed")
                .default_value(DEFAULT_METRICS_PATH)
                .env("POSTGRES_EXPORTER_METRICS_PATH")
                .value_name("PATH"),
        )
        .arg(
            Arg::new("dsn")
                .long("dsn")
                .help("Database connection string")
                .default_value(DEFAULT_DSN)
                .env("POSTGRES_EXPORTER_DSN")
                .hide_env_values(true)
                .value_name("DSN"),
        )
        .arg(
            Arg::new("exclude-databases")
                .long("exclude-databases")
                .help("Comma-separated list of databases to skip in per-database scrapers")
                .env("POSTGRES_EXPORTER_EXCLUDE_DATABASES")
                .value_name("template0,template1,...")
                .value_delimiter(',')
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("cached-scrapers")
                .long("cached-scrapers")
                .help("Comma-separated list of scrapers served through the result cache")
                .default_value("disk_usage")
                .env("POSTGRES_EXPORTER_CACHED_SCRAPERS")
                .value_name("disk_usage,...")
                .value_delimiter(',')
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("cache-ttl")
                .long("cache-ttl")
                .help("Seconds a cached scraper result stays fresh, 0 disables caching")
                .default_value("300")
                .env("POSTGRES_EXPORTER_CACHE_TTL")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("scrape-timeout")
                .long("scrape-timeout")
                .help("Seconds a single scrape may take before partial results are served")
                .default_value("30")
                .env("POSTGRES_EXPORTER_SCRAPE_TIMEOUT")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new("connect-timeout")
                .long("connect-timeout")
                .help("Seconds to wait when opening a database connection")
                .default_value("5")
                .env("POSTGRES_EXPORTER_CONNECT_TIMEOUT")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Increase verbosity, -vv for debug")
                .action(ArgAction::Count),
        );

    collectors::add_collectors_args(cmd)
}
