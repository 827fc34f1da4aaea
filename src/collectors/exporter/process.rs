use crate::collectors::Collector;
use crate::collectors::metric_set::boxed;
use anyhow::Result;
use futures::future::BoxFuture;
use prometheus::{Gauge, IntGauge, Opts};
use std::sync::{Arc, Mutex};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{debug, instrument, warn};

/// Resource usage of the exporter process itself.
#[derive(Clone)]
pub struct ProcessCollector {
    cpu_percent: Gauge,
    resident_memory_bytes: IntGauge,
    virtual_memory_bytes: IntGauge,
    open_fds: IntGauge,
    start_time_seconds: Gauge,
    sampler: Arc<Mutex<Sampler>>,
}

struct Sampler {
    system: System,
    pid: Pid,
    last_cpu_refresh: Option<Instant>,
}

struct Sample {
    cpu_percent: Option<f64>,
    rss: u64,
    vsz: u64,
}

impl Sampler {
    /// Refresh this process only. CPU usage needs two samples at least
    /// `MINIMUM_CPU_UPDATE_INTERVAL` apart, so frequent scrapes reuse the last value.
    fn sample(&mut self) -> Option<Sample> {
        let now = Instant::now();
        let cpu_due = self
            .last_cpu_refresh
            .is_none_or(|last| now.duration_since(last) >= sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);

        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[self.pid]), true);
        if cpu_due {
            self.last_cpu_refresh = Some(now);
        }

        self.system.process(self.pid).map(|process| Sample {
            cpu_percent: cpu_due.then(|| f64::from(process.cpu_usage())),
            rss: process.memory(),
            vsz: process.virtual_memory(),
        })
    }
}

impl Default for ProcessCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessCollector {
    /// # Panics
    ///
    /// Panics if metric creation fails.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        let cpu_percent = Gauge::with_opts(Opts::new(
            "mongodb_exporter_process_cpu_percent",
            "CPU usage of the exporter process in percent (can exceed 100 on multi-core hosts)",
        ))
        .expect("mongodb_exporter_process_cpu_percent");

        let resident_memory_bytes = IntGauge::with_opts(Opts::new(
            "mongodb_exporter_process_resident_memory_bytes",
            "Resident memory size of the exporter process in bytes",
        ))
        .expect("mongodb_exporter_process_resident_memory_bytes");

        let virtual_memory_bytes = IntGauge::with_opts(Opts::new(
            "mongodb_exporter_process_virtual_memory_bytes",
            "Virtual memory size of the exporter process in bytes",
        ))
        .expect("mongodb_exporter_process_virtual_memory_bytes");

        let open_fds = IntGauge::with_opts(Opts::new(
            "mongodb_exporter_process_open_fds",
            "Number of open file descriptors of the exporter process",
        ))
        .expect("mongodb_exporter_process_open_fds");

        let start_time_seconds = Gauge::with_opts(Opts::new(
            "mongodb_exporter_process_start_time_seconds",
            "Start time of the exporter process since unix epoch in seconds",
        ))
        .expect("mongodb_exporter_process_start_time_seconds");

        start_time_seconds.set(
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs_f64(),
        );

        Self {
            cpu_percent,
            resident_memory_bytes,
            virtual_memory_bytes,
            open_fds,
            start_time_seconds,
            sampler: Arc::new(Mutex::new(Sampler {
                system: System::new(),
                pid: Pid::from_u32(std::process::id()),
                last_cpu_refresh: None,
            })),
        }
    }

    fn update(&self) {
        let sample = {
            let mut sampler = match self.sampler.lock() {
                Ok(guard) => guard,
                Err(poisoned) => {
                    warn!("process sampler mutex was poisoned, recovering");
                    poisoned.into_inner()
                }
            };
            sampler.sample()
        };

        let Some(sample) = sample else {
            debug!("exporter process not found in process table");
            return;
        };

        if let Some(cpu) = sample.cpu_percent {
            self.cpu_percent.set(cpu);
        }
        self.resident_memory_bytes
            .set(i64::try_from(sample.rss).unwrap_or(i64::MAX));
        self.virtual_memory_bytes
            .set(i64::try_from(sample.vsz).unwrap_or(i64::MAX));
        self.open_fds.set(open_fd_count());
    }
}

#[cfg(target_os = "linux")]
fn open_fd_count() -> i64 {
    std::fs::read_dir("/proc/self/fd")
        .map(|entries| i64::try_from(entries.count()).unwrap_or(0))
        .unwrap_or(0)
}

#[cfg(not(target_os = "linux"))]
const fn open_fd_count() -> i64 {
    0
}

impl Collector for ProcessCollector {
    fn name(&self) -> &'static str {
        "exporter.process"
    }

    fn metrics(&self) -> Vec<Box<dyn prometheus::core::Collector>> {
        vec![
            boxed(&self.cpu_percent),
            boxed(&self.resident_memory_bytes),
            boxed(&self.virtual_memory_bytes),
            boxed(&self.open_fds),
            boxed(&self.start_time_seconds),
        ]
    }

    #[instrument(skip(self), level = "debug")]
    fn collect<'a>(&'a self) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.update();
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_process_collector_reports_memory() -> Result<()> {
        let collector = ProcessCollector::new();
        collector.collect().await?;

        assert!(collector.resident_memory_bytes.get() > 0);
        assert!(collector.start_time_seconds.get() > 0.0);
        Ok(())
    }

    #[test]
    fn test_process_collector_metric_count() {
        assert_eq!(ProcessCollector::new().metrics().len(), 5);
    }
}
