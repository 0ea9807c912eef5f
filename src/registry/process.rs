//! Process metrics of the memcached server itself, located through its
//! PID file.
//!
//! The PID file is re-read on every collect so a restarted server is
//! picked up without restarting the exporter.

use std::path::PathBuf;

use prometheus::core::{Collector, Desc};
use prometheus::process_collector::ProcessCollector;
use prometheus::proto::MetricFamily;
use tracing::warn;

use crate::config::read_pid_file;

pub struct PidFileProcessCollector {
    pid_file: PathBuf,
    namespace: String,
    /// Only used for its descriptors, which do not depend on the PID.
    template: ProcessCollector,
}

impl PidFileProcessCollector {
    pub fn new(pid_file: impl Into<PathBuf>, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        Self {
            pid_file: pid_file.into(),
            template: ProcessCollector::new(0, namespace.clone()),
            namespace,
        }
    }
}

impl Collector for PidFileProcessCollector {
    fn desc(&self) -> Vec<&Desc> {
        self.template.desc()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        match read_pid_file(&self.pid_file) {
            Ok(pid) => ProcessCollector::new(pid, self.namespace.clone()).collect(),
            Err(e) => {
                warn!(error = %e, "skipping memcached process metrics");
                Vec::new()
            }
        }
    }
}
