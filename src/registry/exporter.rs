//! Bridge from [`MemcachedCollector`] to a Prometheus registry.
//!
//! Every `collect()` from the registry runs one fresh scrape; nothing is
//! cached between scrapes, so a series a server stops reporting simply
//! disappears from the next exposition.

use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{CounterVec, GaugeVec, Opts};
use std::collections::HashMap;
use tracing::warn;

use crate::collector::{MemcachedCollector, MetricDescriptor, MetricKind};
use crate::model::{Sample, ScrapeSnapshot};

/// Registers the memcached metrics with a Prometheus registry.
pub struct Exporter {
    collector: MemcachedCollector,
    descs: Vec<Desc>,
}

impl Exporter {
    pub fn new(collector: MemcachedCollector) -> prometheus::Result<Self> {
        let descs = collector
            .describe()
            .iter()
            .map(|d| Desc::new(d.name.clone(), d.help.clone(), d.label_names.clone(), HashMap::new()))
            .collect::<prometheus::Result<Vec<_>>>()?;
        Ok(Self { collector, descs })
    }

    pub fn collector(&self) -> &MemcachedCollector {
        &self.collector
    }
}

impl Collector for Exporter {
    fn desc(&self) -> Vec<&Desc> {
        self.descs.iter().collect()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let snapshot = self.collector.collect();
        families(self.collector.describe(), &snapshot)
    }
}

/// Converts a snapshot into metric families, one per descriptor that has
/// samples, in descriptor order.
pub fn families(descriptors: &[MetricDescriptor], snapshot: &ScrapeSnapshot) -> Vec<MetricFamily> {
    let mut out = Vec::new();
    for descriptor in descriptors {
        let samples = snapshot.samples(&descriptor.name);
        if samples.is_empty() {
            continue;
        }
        match family(descriptor, samples) {
            Ok(Some(f)) => out.push(f),
            Ok(None) => {}
            Err(e) => warn!(metric = %descriptor.name, error = %e, "dropping metric family"),
        }
    }
    out
}

fn family(descriptor: &MetricDescriptor, samples: &[Sample]) -> prometheus::Result<Option<MetricFamily>> {
    let opts = Opts::new(descriptor.name.clone(), descriptor.help.clone());
    let label_names: Vec<&str> = descriptor.label_names.iter().map(String::as_str).collect();

    let mut collected = match descriptor.kind {
        MetricKind::Gauge => {
            let vec = GaugeVec::new(opts, &label_names)?;
            for sample in samples {
                vec.get_metric_with_label_values(&label_values(sample))?
                    .set(sample.value);
            }
            vec.collect()
        }
        MetricKind::Counter => {
            let vec = CounterVec::new(opts, &label_names)?;
            for sample in samples {
                if sample.value < 0.0 {
                    continue;
                }
                vec.get_metric_with_label_values(&label_values(sample))?
                    .inc_by(sample.value);
            }
            vec.collect()
        }
    };
    Ok(collected.pop())
}

fn label_values(sample: &Sample) -> Vec<&str> {
    sample.label_values.iter().map(String::as_str).collect()
}
