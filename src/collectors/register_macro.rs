macro_rules! register_scrapers {
    (
        global {
            $( $global:ident => $global_type:ident ),* $(,)?
        }
        per_database {
            $( $database:ident => $database_type:ident ),* $(,)?
        }
    ) => {
        $(
            pub mod $global;
            pub use $global::$global_type;
        )*

        $(
            pub mod $database;
            pub use $database::$database_type;
        )*

        /// Scrapers run once per scrape on the initial connection, in order.
        pub const GLOBAL_SCRAPERS: &[&str] = &[
            $(stringify!($global),)*
        ];

        /// Scrapers run once per discovered database, in order.
        pub const DATABASE_SCRAPERS: &[&str] = &[
            $(stringify!($database),)*
        ];

        /// Every scraper name, global first; used for the CLI flags.
        pub const SCRAPER_NAMES: &[&str] = &[
            $(stringify!($global),)*
            $(stringify!($database),)*
        ];

        pub type ScraperFactory = fn() -> BoxedScraper<PgSession>;

        #[must_use]
        pub fn global_factories() -> Vec<(&'static str, ScraperFactory)> {
            vec![
                $(
                    (
                        stringify!($global),
                        (|| Box::new($global_type::new()) as BoxedScraper<PgSession>) as ScraperFactory,
                    ),
                )*
            ]
        }

        #[must_use]
        pub fn database_factories() -> Vec<(&'static str, ScraperFactory)> {
            vec![
                $(
                    (
                        stringify!($database),
                        (|| Box::new($database_type::new()) as BoxedScraper<PgSession>) as ScraperFactory,
                    ),
                )*
            ]
        }

        /// Default enablement of a scraper by name, `None` if unknown.
        #[must_use]
        pub fn enabled_by_default(name: &str) -> Option<bool> {
            global_factories()
                .into_iter()
                .chain(database_factories())
                .find(|(candidate, _)| *candidate == name)
                .map(|(_, factory)| factory().enabled_by_default())
        }
    };
}
