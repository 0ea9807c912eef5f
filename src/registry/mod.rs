//! Prometheus registry assembly.
//!
//! The exporter registry holds the memcached collector, the build info
//! gauge and, on Linux, process metrics for the exporter and optionally
//! for the memcached server.

mod build_info;
mod exporter;
#[cfg(target_os = "linux")]
mod process;

use std::path::PathBuf;

use prometheus::Registry;

pub use build_info::{BUILD_INFO, build_info};
pub use exporter::{Exporter, families};
#[cfg(target_os = "linux")]
pub use process::PidFileProcessCollector;

use crate::collector::{MemcachedCollector, NAMESPACE};

/// Builds the registry served on the telemetry path.
pub fn build_registry(
    collector: MemcachedCollector,
    pid_file: Option<PathBuf>,
) -> prometheus::Result<Registry> {
    let registry = Registry::new();
    registry.register(Box::new(Exporter::new(collector)?))?;
    registry.register(Box::new(build_info()?))?;

    #[cfg(target_os = "linux")]
    {
        use prometheus::process_collector::ProcessCollector;

        registry.register(Box::new(ProcessCollector::for_self()))?;
        if let Some(path) = pid_file {
            registry.register(Box::new(PidFileProcessCollector::new(path, NAMESPACE)))?;
        }
    }
    #[cfg(not(target_os = "linux"))]
    if pid_file.is_some() {
        tracing::warn!(namespace = NAMESPACE, "process metrics are only available on Linux");
    }

    Ok(registry)
}
