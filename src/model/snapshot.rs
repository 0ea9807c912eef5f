//! Point-in-time result of one scrape.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;

/// One value of a metric, identified by its label values.
#[derive(Clone, Serialize, Debug, PartialEq)]
pub struct Sample {
    pub label_values: Vec<String>,
    pub value: f64,
}

/// Samples of one scrape, grouped by full metric name.
///
/// Families iterate in name order and samples within a family in label
/// order, so two scrapes of the same data compare equal. Always carries
/// the `up` and duration meta samples once finished, even when nothing
/// else could be gathered.
#[derive(Clone, Serialize, Debug, PartialEq, Default)]
pub struct ScrapeSnapshot {
    pub up: bool,
    pub scrape_duration_seconds: f64,
    families: BTreeMap<String, Vec<Sample>>,
}

impl ScrapeSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a sample. A sample with the same label values replaces the
    /// earlier one; its value is returned.
    pub fn insert(&mut self, metric: &str, sample: Sample) -> Option<f64> {
        let samples = self.families.entry(metric.to_string()).or_default();
        match samples.binary_search_by(|s| s.label_values.cmp(&sample.label_values)) {
            Ok(pos) => Some(std::mem::replace(&mut samples[pos], sample).value),
            Err(pos) => {
                samples.insert(pos, sample);
                None
            }
        }
    }

    /// Records the outcome and adds the meta samples under the given names.
    pub fn finish(
        mut self,
        up: bool,
        duration: Duration,
        up_metric: &str,
        duration_metric: &str,
    ) -> Self {
        self.up = up;
        self.scrape_duration_seconds = duration.as_secs_f64();
        self.insert(
            up_metric,
            Sample {
                label_values: Vec::new(),
                value: if up { 1.0 } else { 0.0 },
            },
        );
        self.insert(
            duration_metric,
            Sample {
                label_values: Vec::new(),
                value: self.scrape_duration_seconds,
            },
        );
        self
    }

    /// Samples of `metric`, empty if none were gathered.
    pub fn samples(&self, metric: &str) -> &[Sample] {
        self.families.get(metric).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Value of the sample of `metric` with exactly these label values.
    pub fn value(&self, metric: &str, label_values: &[&str]) -> Option<f64> {
        self.samples(metric)
            .iter()
            .find(|s| s.label_values.iter().map(String::as_str).eq(label_values.iter().copied()))
            .map(|s| s.value)
    }

    /// All families in name order.
    pub fn families(&self) -> impl Iterator<Item = (&str, &[Sample])> {
        self.families
            .iter()
            .map(|(name, samples)| (name.as_str(), samples.as_slice()))
    }

    /// Total number of samples.
    pub fn len(&self) -> usize {
        self.families.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.families.is_empty()
    }

    /// Copy with the timing removed, for comparing scrapes of the same data.
    pub fn without_timing(&self, duration_metric: &str) -> Self {
        let mut copy = self.clone();
        copy.scrape_duration_seconds = 0.0;
        copy.families.remove(duration_metric);
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(labels: &[&str], value: f64) -> Sample {
        Sample {
            label_values: labels.iter().map(|l| l.to_string()).collect(),
            value,
        }
    }

    #[test]
    fn test_insert_keeps_label_order() {
        let mut snap = ScrapeSnapshot::new();
        snap.insert("m", sample(&["2"], 2.0));
        snap.insert("m", sample(&["1"], 1.0));
        snap.insert("m", sample(&["3"], 3.0));

        let labels: Vec<&str> = snap
            .samples("m")
            .iter()
            .map(|s| s.label_values[0].as_str())
            .collect();
        assert_eq!(labels, vec!["1", "2", "3"]);
    }

    #[test]
    fn test_insert_replaces_duplicate() {
        let mut snap = ScrapeSnapshot::new();
        assert_eq!(snap.insert("m", sample(&["a"], 1.0)), None);
        assert_eq!(snap.insert("m", sample(&["a"], 5.0)), Some(1.0));
        assert_eq!(snap.len(), 1);
        assert_eq!(snap.value("m", &["a"]), Some(5.0));
    }

    #[test]
    fn test_finish_adds_meta_samples() {
        let snap = ScrapeSnapshot::new().finish(
            false,
            Duration::from_millis(1500),
            "x_up",
            "x_scrape_duration_seconds",
        );
        assert!(!snap.up);
        assert_eq!(snap.value("x_up", &[]), Some(0.0));
        assert_eq!(snap.value("x_scrape_duration_seconds", &[]), Some(1.5));
        assert_eq!(snap.len(), 2);
    }

    #[test]
    fn test_without_timing() {
        let a = ScrapeSnapshot::new().finish(true, Duration::from_millis(3), "up", "d");
        let b = ScrapeSnapshot::new().finish(true, Duration::from_millis(9), "up", "d");
        assert_ne!(a, b);
        assert_eq!(a.without_timing("d"), b.without_timing("d"));
    }

    #[test]
    fn test_value_missing() {
        let snap = ScrapeSnapshot::new();
        assert!(snap.is_empty());
        assert!(snap.samples("nothing").is_empty());
        assert_eq!(snap.value("nothing", &[]), None);
    }
}
