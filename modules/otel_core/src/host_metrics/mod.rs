//! Host resource sampler.
//!
//! `HostMetricsFactory` is the seam the startup hook starts samplers through.
//! The default implementation, [`ProcHostMetrics`], reads procfs on a fixed
//! interval and records gauges on the shared meter provider. Files that do
//! not exist on the platform are skipped.

pub mod procfs;

use modkit::lifecycle::{Lifecycle, StopReason};
use modkit::SharedMeterProvider;
use opentelemetry::metrics::{Gauge, MeterProvider};
use opentelemetry::KeyValue;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use procfs::{CpuTimes, LoadAvg, MemInfo};

/// Name of the single host sampler the integration starts.
pub const HOST_METRICS_SAMPLER: &str = "host-metrics";

/// Starts host samplers bound to a meter provider.
pub trait HostMetricsFactory: Send + Sync + 'static {
    fn start(
        &self,
        name: &'static str,
        meter_provider: SharedMeterProvider,
        interval: Duration,
        cancel: CancellationToken,
    ) -> anyhow::Result<SamplerHandle>;
}

/// A running sampler. Stopping consumes the handle.
#[derive(Debug)]
pub struct SamplerHandle {
    lifecycle: Lifecycle,
}

impl SamplerHandle {
    /// Spawn `make(cancel)` as the sampler task; the task must return once
    /// `cancel` fires.
    pub fn spawn<F, Fut>(name: &str, cancel: CancellationToken, make: F) -> anyhow::Result<Self>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let lifecycle = Lifecycle::new(name);
        lifecycle.start_with_token(cancel, make)?;
        Ok(Self { lifecycle })
    }

    pub fn name(&self) -> &str {
        self.lifecycle.name()
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }

    pub async fn stop(self, timeout: Duration) -> anyhow::Result<StopReason> {
        Ok(self.lifecycle.stop(timeout).await?)
    }
}

/// procfs-backed sampler (Linux). On other platforms every read fails and
/// nothing is recorded.
#[derive(Debug, Clone)]
pub struct ProcHostMetrics {
    root: PathBuf,
}

impl Default for ProcHostMetrics {
    fn default() -> Self {
        Self::with_root("/proc")
    }
}

impl ProcHostMetrics {
    /// Read procfs from `root` instead of `/proc`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl HostMetricsFactory for ProcHostMetrics {
    fn start(
        &self,
        name: &'static str,
        meter_provider: SharedMeterProvider,
        interval: Duration,
        cancel: CancellationToken,
    ) -> anyhow::Result<SamplerHandle> {
        anyhow::ensure!(!interval.is_zero(), "sampling interval must be non-zero");
        let mut sampler = Sampler::new(self.root.clone(), &meter_provider, name);
        tracing::info!(sampler = name, ?interval, "starting host metrics sampler");
        SamplerHandle::spawn(name, cancel, move |cancel| async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => sampler.sample().await,
                    _ = cancel.cancelled() => break,
                }
            }
            Ok(())
        })
    }
}

struct Instruments {
    cpu_utilization: Gauge<f64>,
    memory_usage: Gauge<f64>,
    load_average: Gauge<f64>,
    process_memory: Gauge<f64>,
}

struct Sampler {
    root: PathBuf,
    instruments: Instruments,
    prev_cpu: Option<CpuTimes>,
}

impl Sampler {
    fn new(root: PathBuf, provider: &SharedMeterProvider, name: &'static str) -> Self {
        let meter = provider.meter(name);
        let instruments = Instruments {
            cpu_utilization: meter
                .f64_gauge("system.cpu.utilization")
                .with_unit("1")
                .with_description("Share of CPU time spent busy since the previous sample")
                .build(),
            memory_usage: meter
                .f64_gauge("system.memory.usage")
                .with_unit("By")
                .with_description("Physical memory in use and available")
                .build(),
            load_average: meter
                .f64_gauge("system.cpu.load_average")
                .with_description("Run-queue load average")
                .build(),
            process_memory: meter
                .f64_gauge("process.memory.usage")
                .with_unit("By")
                .with_description("Resident set size of this process")
                .build(),
        };
        Self {
            root,
            instruments,
            prev_cpu: None,
        }
    }

    async fn read(&self, file: &str) -> Option<String> {
        match tokio::fs::read_to_string(self.root.join(file)).await {
            Ok(s) => Some(s),
            Err(e) => {
                tracing::trace!(file, error = %e, "host metric source unavailable");
                None
            }
        }
    }

    async fn sample(&mut self) {
        if let Some(cpu) = self.read("stat").await.as_deref().and_then(CpuTimes::parse_stat) {
            if let Some(util) = self.prev_cpu.and_then(|prev| cpu.utilization_since(&prev)) {
                self.instruments.cpu_utilization.record(util, &[]);
            }
            self.prev_cpu = Some(cpu);
        }

        if let Some(mem) = self.read("meminfo").await.as_deref().and_then(MemInfo::parse) {
            self.instruments.memory_usage.record(
                mem.used_bytes() as f64,
                &[KeyValue::new("system.memory.state", "used")],
            );
            self.instruments.memory_usage.record(
                mem.available_bytes as f64,
                &[KeyValue::new("system.memory.state", "free")],
            );
        }

        if let Some(load) = self.read("loadavg").await.as_deref().and_then(LoadAvg::parse) {
            for (window, value) in [("1m", load.one), ("5m", load.five), ("15m", load.fifteen)] {
                self.instruments
                    .load_average
                    .record(value, &[KeyValue::new("system.cpu.load_average.window", window)]);
            }
        }

        if let Some(rss) = self
            .read("self/status")
            .await
            .as_deref()
            .and_then(procfs::parse_vm_rss)
        {
            self.instruments.process_memory.record(rss as f64, &[]);
        }
    }
}
