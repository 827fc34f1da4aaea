use crate::collectors::Collector;
use crate::collectors::metric_set::boxed;
use anyhow::Result;
use futures::future::BoxFuture;
use prometheus::{CounterVec, GaugeVec, HistogramOpts, HistogramVec, IntCounter, IntGauge, Opts};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Per-collector scrape timings and outcomes, shared across scrapes.
#[derive(Clone)]
pub struct ScraperCollector {
    scrape_duration_seconds: HistogramVec,
    scrape_errors_total: CounterVec,
    last_scrape_timestamp: GaugeVec,
    last_scrape_success: GaugeVec,
    metrics_total: IntGauge,
    scrapes_total: IntCounter,
}

impl Default for ScraperCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl ScraperCollector {
    /// # Panics
    ///
    /// Panics if metric creation fails.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        let scrape_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "mongodb_exporter_collector_scrape_duration_seconds",
                "Time spent running each collector in seconds",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["collector"],
        )
        .expect("mongodb_exporter_collector_scrape_duration_seconds");

        let scrape_errors_total = CounterVec::new(
            Opts::new(
                "mongodb_exporter_collector_scrape_errors_total",
                "Total number of failed runs per collector",
            ),
            &["collector"],
        )
        .expect("mongodb_exporter_collector_scrape_errors_total");

        let last_scrape_timestamp = GaugeVec::new(
            Opts::new(
                "mongodb_exporter_collector_last_scrape_timestamp_seconds",
                "Unix timestamp of the last run per collector",
            ),
            &["collector"],
        )
        .expect("mongodb_exporter_collector_last_scrape_timestamp_seconds");

        let last_scrape_success = GaugeVec::new(
            Opts::new(
                "mongodb_exporter_collector_last_scrape_success",
                "Whether the last run of a collector succeeded (1) or failed (0)",
            ),
            &["collector"],
        )
        .expect("mongodb_exporter_collector_last_scrape_success");

        let metrics_total = IntGauge::with_opts(Opts::new(
            "mongodb_exporter_metrics_total",
            "Number of samples exported by the previous scrape",
        ))
        .expect("mongodb_exporter_metrics_total");

        let scrapes_total = IntCounter::with_opts(Opts::new(
            "mongodb_exporter_scrapes_total",
            "Total number of scrapes served since start",
        ))
        .expect("mongodb_exporter_scrapes_total");

        Self {
            scrape_duration_seconds,
            scrape_errors_total,
            last_scrape_timestamp,
            last_scrape_success,
            metrics_total,
            scrapes_total,
        }
    }

    #[must_use]
    pub fn start_scrape(&self, collector_name: &'static str) -> ScrapeTimer {
        ScrapeTimer {
            collector_name,
            start: Instant::now(),
            scraper: self.clone(),
        }
    }

    pub fn update_metrics_count(&self, count: usize) {
        self.metrics_total.set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    pub fn increment_scrapes(&self) {
        self.scrapes_total.inc();
    }

    fn record(&self, collector_name: &str, duration: f64, success: bool) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();

        self.scrape_duration_seconds
            .with_label_values(&[collector_name])
            .observe(duration);
        self.last_scrape_timestamp
            .with_label_values(&[collector_name])
            .set(now);
        self.last_scrape_success
            .with_label_values(&[collector_name])
            .set(if success { 1.0 } else { 0.0 });

        if !success {
            self.scrape_errors_total
                .with_label_values(&[collector_name])
                .inc();
        }
    }
}

impl Collector for ScraperCollector {
    fn name(&self) -> &'static str {
        "exporter.scraper"
    }

    fn metrics(&self) -> Vec<Box<dyn prometheus::core::Collector>> {
        vec![
            boxed(&self.scrape_duration_seconds),
            boxed(&self.scrape_errors_total),
            boxed(&self.last_scrape_timestamp),
            boxed(&self.last_scrape_success),
            boxed(&self.metrics_total),
            boxed(&self.scrapes_total),
        ]
    }

    fn collect<'a>(&'a self) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { Ok(()) })
    }
}

/// Times one collector run. Must be finished with [`ScrapeTimer::success`] or
/// [`ScrapeTimer::error`]; a timer dropped unfinished records nothing.
pub struct ScrapeTimer {
    collector_name: &'static str,
    start: Instant,
    scraper: ScraperCollector,
}

impl ScrapeTimer {
    pub fn success(self) {
        self.finish(true);
    }

    pub fn error(self) {
        self.finish(false);
    }

    fn finish(self, success: bool) {
        let duration = self.start.elapsed().as_secs_f64();
        self.scraper.record(self.collector_name, duration, success);
    }
}
