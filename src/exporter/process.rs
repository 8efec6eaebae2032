//! Resource usage of the exporter process itself.

use anyhow::Result;
use prometheus::{Counter, Gauge, IntGauge, Opts, Registry};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{debug, warn};

/// Exposes `postgres_exporter_process_*` metrics.
///
/// The metric handles live as long as the collector, so the CPU counter
/// keeps increasing across scrapes even though every scrape registers them
/// on a fresh [`Registry`].
///
/// - `postgres_exporter_process_cpu_seconds_total`: user + system CPU time,
///   cumulative across cores
/// - `postgres_exporter_process_cpu_cores`
/// - `postgres_exporter_process_resident_memory_bytes`
/// - `postgres_exporter_process_virtual_memory_bytes`
/// - `postgres_exporter_process_threads` (Linux)
/// - `postgres_exporter_process_open_fds` (Linux)
/// - `postgres_exporter_process_start_time_seconds`
#[derive(Clone)]
pub struct ProcessCollector {
    cpu_seconds_total: Counter,
    cpu_cores: IntGauge,
    resident_memory_bytes: IntGauge,
    virtual_memory_bytes: IntGauge,
    open_fds: IntGauge,
    threads: IntGauge,
    start_time_seconds: Gauge,
    state: Arc<Mutex<ProcessState>>,
    pid: Pid,
}

struct ProcessState {
    system: System,
    last_cpu_time: Option<Duration>,
}

impl Default for ProcessCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(clippy::expect_used)]
fn int_gauge(name: &str, help: &str) -> IntGauge {
    IntGauge::with_opts(Opts::new(name, help)).expect(name)
}

impl ProcessCollector {
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        let cpu_seconds_total = Counter::with_opts(Opts::new(
            "postgres_exporter_process_cpu_seconds_total",
            "Total user and system CPU time spent in seconds (cumulative across all cores)",
        ))
        .expect("postgres_exporter_process_cpu_seconds_total");

        let start_time_seconds = Gauge::with_opts(Opts::new(
            "postgres_exporter_process_start_time_seconds",
            "Start time of the process since unix epoch in seconds",
        ))
        .expect("postgres_exporter_process_start_time_seconds");

        let cpu_cores = int_gauge(
            "postgres_exporter_process_cpu_cores",
            "Number of CPU cores available to the system",
        );

        let mut system = System::new();
        system.refresh_cpu_all();
        let num_cores = system.cpus().len().max(1);
        cpu_cores.set(i64::try_from(num_cores).unwrap_or(i64::MAX));

        start_time_seconds.set(
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs_f64(),
        );

        Self {
            cpu_seconds_total,
            cpu_cores,
            resident_memory_bytes: int_gauge(
                "postgres_exporter_process_resident_memory_bytes",
                "Resident memory size in bytes (RSS)",
            ),
            virtual_memory_bytes: int_gauge(
                "postgres_exporter_process_virtual_memory_bytes",
                "Virtual memory size in bytes (VSZ)",
            ),
            open_fds: int_gauge(
                "postgres_exporter_process_open_fds",
                "Number of open file descriptors",
            ),
            threads: int_gauge(
                "postgres_exporter_process_threads",
                "Number of OS threads in the process",
            ),
            start_time_seconds,
            state: Arc::new(Mutex::new(ProcessState {
                system,
                last_cpu_time: None,
            })),
            pid: Pid::from_u32(std::process::id()),
        }
    }

    /// Register the process metrics on `registry`.
    ///
    /// # Errors
    ///
    /// Returns an error if a metric with the same name is already registered
    pub fn register(&self, registry: &Registry) -> Result<()> {
        registry.register(Box::new(self.cpu_seconds_total.clone()))?;
        registry.register(Box::new(self.cpu_cores.clone()))?;
        registry.register(Box::new(self.resident_memory_bytes.clone()))?;
        registry.register(Box::new(self.virtual_memory_bytes.clone()))?;
        registry.register(Box::new(self.open_fds.clone()))?;
        registry.register(Box::new(self.threads.clone()))?;
        registry.register(Box::new(self.start_time_seconds.clone()))?;
        Ok(())
    }

    /// Refresh the process readings from the OS.
    pub fn update(&self) {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("process state mutex was poisoned, recovering");
                poisoned.into_inner()
            }
        };

        state
            .system
            .refresh_processes(ProcessesToUpdate::Some(&[self.pid]), true);

        let Some(process) = state.system.process(self.pid) else {
            debug!(pid = %self.pid, "exporter process not found");
            return;
        };

        let rss = process.memory();
        let vsz = process.virtual_memory();
        let cpu_time = Duration::from_millis(process.accumulated_cpu_time());

        self.resident_memory_bytes
            .set(i64::try_from(rss).unwrap_or(i64::MAX));
        self.virtual_memory_bytes
            .set(i64::try_from(vsz).unwrap_or(i64::MAX));

        if let Some(last) = state.last_cpu_time {
            let delta = cpu_time.saturating_sub(last).as_secs_f64();
            if delta > 0.0 {
                self.cpu_seconds_total.inc_by(delta);
            }
        } else {
            self.cpu_seconds_total.inc_by(cpu_time.as_secs_f64());
        }
        state.last_cpu_time = Some(cpu_time);

        #[cfg(target_os = "linux")]
        {
            if let Ok(entries) = std::fs::read_dir(format!("/proc/{}/task", self.pid)) {
                self.threads
                    .set(i64::try_from(entries.count()).unwrap_or(i64::MAX));
            }

            if let Ok(entries) = std::fs::read_dir(format!("/proc/{}/fd", self.pid)) {
                self.open_fds
                    .set(i64::try_from(entries.count()).unwrap_or(i64::MAX));
            }
        }

        debug!(
            rss_mb = rss / 1024 / 1024,
            vsz_mb = vsz / 1024 / 1024,
            cpu_seconds_total = self.cpu_seconds_total.get(),
            cpu_cores = self.cpu_cores.get(),
            threads = self.threads.get(),
            fds = self.open_fds.get(),
            "collected process metrics"
        );
    }
}
