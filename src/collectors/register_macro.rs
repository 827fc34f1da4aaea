macro_rules! register_collectors {
    (
        $(
            $module:ident => $collector_type:ident
        ),* $(,)?
    ) => {
        // Import all collector modules
        $(
            pub mod $module;
            pub use $module::$collector_type;
        )*

        // Generate the enum with all collector types
        #[derive(Clone)]
        pub enum CollectorType {
            $(
                $collector_type($collector_type),
            )*
        }

        // Implement Collector trait for CollectorType enum
        impl Collector for CollectorType {
            fn name(&self) -> &'static str {
                match self {
                    $(
                        CollectorType::$collector_type(c) => c.name(),
                    )*
                }
            }

            fn metrics(&self) -> Vec<Box<dyn prometheus::core::Collector>> {
                match self {
                    $(
                        CollectorType::$collector_type(c) => c.metrics(),
                    )*
                }
            }

            fn collect<'a>(&'a self) -> BoxFuture<'a, Result<()>> {
                match self {
                    $(
                        CollectorType::$collector_type(c) => c.collect(),
                    )*
                }
            }
        }

        /// Methods specific to particular collector variants.
        impl CollectorType {
            /// The scrape-performance tracker, present only on the exporter
            /// self-monitoring collector.
            #[must_use]
            pub fn get_scraper(&self) -> Option<std::sync::Arc<crate::collectors::exporter::ScraperCollector>> {
                match self {
                    CollectorType::ExporterCollector(c) => Some(c.get_scraper().clone()),
                    _ => None,
                }
            }
        }

        // Generate array of collector names
        pub const COLLECTOR_NAMES: &[&'static str] = &[
            $(stringify!($module),)*
        ];

        /// Whether the `--collector.<name>` flag defaults to on.
        #[must_use]
        pub fn enabled_by_default(name: &str) -> bool {
            match name {
                $(
                    stringify!($module) => $collector_type::ENABLED_BY_DEFAULT,
                )*
                _ => false,
            }
        }
    };
}
