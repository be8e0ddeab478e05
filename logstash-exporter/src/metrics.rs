//! Metric descriptors and constant metric values.
//!
//! A [`Desc`] fixes the name, help text, type and ordered label names of a
//! metric family. Collectors build their descriptors once through a
//! [`DescHelper`] and then stamp out [`Metric`] values per scrape.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;

/// Namespace shared by every metric this exporter emits.
pub const NAMESPACE: &str = "logstash";

/// Labels appended to every instance-scoped descriptor, in this order.
///
/// `hostname` is always last and carries the client endpoint.
pub const INSTANCE_LABELS: [&str; 2] = ["instance_name", "hostname"];

/// Channel used to hand metric values from collectors to the registry.
pub type MetricSender = mpsc::Sender<Metric>;

/// Errors raised while building metric values.
#[derive(Debug, Error)]
pub enum MetricError {
    #[error("metric {name} expects {expected} label values, got {actual}")]
    LabelCardinality {
        name: String,
        expected: usize,
        actual: usize,
    },
}

/// Prometheus metric type of a family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

impl MetricKind {
    /// Get the TYPE comment string for Prometheus exposition format.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
        }
    }
}

/// Immutable description of one metric family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Desc {
    fq_name: String,
    help: String,
    kind: MetricKind,
    labels: Vec<String>,
}

impl Desc {
    /// Create a descriptor with a fully-qualified name and ordered labels.
    pub fn new(
        fq_name: impl Into<String>,
        help: impl Into<String>,
        kind: MetricKind,
        labels: &[&str],
    ) -> Arc<Self> {
        Arc::new(Self {
            fq_name: fq_name.into(),
            help: help.into(),
            kind,
            labels: labels.iter().map(|l| l.to_string()).collect(),
        })
    }

    pub fn fq_name(&self) -> &str {
        &self.fq_name
    }

    pub fn help(&self) -> &str {
        &self.help
    }

    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Build a value for this family.
    ///
    /// `label_values` must match [`Desc::labels`] one-to-one.
    pub fn metric(self: &Arc<Self>, value: f64, label_values: &[&str]) -> Result<Metric, MetricError> {
        if label_values.len() != self.labels.len() {
            return Err(MetricError::LabelCardinality {
                name: self.fq_name.clone(),
                expected: self.labels.len(),
                actual: label_values.len(),
            });
        }

        Ok(Metric {
            desc: Arc::clone(self),
            value,
            label_values: label_values.iter().map(|v| v.to_string()).collect(),
        })
    }
}

/// A single sample: descriptor, label values and value.
#[derive(Debug, Clone)]
pub struct Metric {
    desc: Arc<Desc>,
    value: f64,
    label_values: Vec<String>,
}

impl Metric {
    pub fn desc(&self) -> &Arc<Desc> {
        &self.desc
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn label_values(&self) -> &[String] {
        &self.label_values
    }

    /// Label name/value pairs in descriptor order.
    pub fn labels(&self) -> impl Iterator<Item = (&str, &str)> {
        self.desc
            .labels
            .iter()
            .map(String::as_str)
            .zip(self.label_values.iter().map(String::as_str))
    }

    /// Look up a single label value by name.
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels().find(|(k, _)| *k == name).map(|(_, v)| v)
    }
}

/// Builds descriptors under a fixed `namespace_subsystem_` prefix.
#[derive(Debug, Clone, Copy)]
pub struct DescHelper {
    namespace: &'static str,
    subsystem: &'static str,
}

impl DescHelper {
    pub const fn new(namespace: &'static str, subsystem: &'static str) -> Self {
        Self {
            namespace,
            subsystem,
        }
    }

    /// Build the fully-qualified metric name, skipping empty components.
    pub fn fq_name(&self, name: &str) -> String {
        [self.namespace, self.subsystem, name]
            .iter()
            .filter(|part| !part.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("_")
    }

    /// Instance-scoped counter; [`INSTANCE_LABELS`] are appended to `labels`.
    pub fn counter(&self, name: &str, help: &str, labels: &[&str]) -> Arc<Desc> {
        self.instance_desc(name, help, MetricKind::Counter, labels)
    }

    /// Instance-scoped gauge; [`INSTANCE_LABELS`] are appended to `labels`.
    pub fn gauge(&self, name: &str, help: &str, labels: &[&str]) -> Arc<Desc> {
        self.instance_desc(name, help, MetricKind::Gauge, labels)
    }

    /// Descriptor without instance labels, for exporter self-metrics.
    pub fn global(&self, name: &str, help: &str, kind: MetricKind, labels: &[&str]) -> Arc<Desc> {
        Desc::new(self.fq_name(name), help, kind, labels)
    }

    fn instance_desc(&self, name: &str, help: &str, kind: MetricKind, labels: &[&str]) -> Arc<Desc> {
        let mut all = Vec::with_capacity(labels.len() + INSTANCE_LABELS.len());
        all.extend_from_slice(labels);
        all.extend_from_slice(&INSTANCE_LABELS);
        Desc::new(self.fq_name(name), help, kind, &all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fq_name() {
        let helper = DescHelper::new(NAMESPACE, "info");
        assert_eq!(helper.fq_name("node"), "logstash_info_node");

        let helper = DescHelper::new(NAMESPACE, "");
        assert_eq!(helper.fq_name("up"), "logstash_up");
    }

    #[test]
    fn test_instance_labels_trail() {
        let helper = DescHelper::new(NAMESPACE, "stats");
        let desc = helper.counter("pipeline_events_in", "Events in", &["pipeline"]);

        assert_eq!(desc.fq_name(), "logstash_stats_pipeline_events_in");
        assert_eq!(desc.labels(), ["pipeline", "instance_name", "hostname"]);
        assert_eq!(desc.kind(), MetricKind::Counter);
    }

    #[test]
    fn test_global_desc_has_no_instance_labels() {
        let helper = DescHelper::new(NAMESPACE, "exporter");
        let desc = helper.global("self_up", "Exporter is up", MetricKind::Gauge, &[]);

        assert_eq!(desc.fq_name(), "logstash_exporter_self_up");
        assert!(desc.labels().is_empty());
    }

    #[test]
    fn test_metric_label_cardinality() {
        let desc = DescHelper::new(NAMESPACE, "info").gauge("up", "Up", &[]);

        let ok = desc.metric(1.0, &["main", "http://localhost:9600"]).unwrap();
        assert_eq!(ok.label("hostname"), Some("http://localhost:9600"));
        assert_eq!(ok.value(), 1.0);

        let err = desc.metric(1.0, &["main"]).unwrap_err();
        assert!(matches!(
            err,
            MetricError::LabelCardinality {
                expected: 2,
                actual: 1,
                ..
            }
        ));
    }
}
