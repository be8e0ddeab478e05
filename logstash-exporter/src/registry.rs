//! Registry of scrape collectors and exposition of their output.

use std::any::Any;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error};

use crate::exposition;
use crate::metrics::{Desc, MetricSender};

const METRIC_CHANNEL_CAPACITY: usize = 1024;

/// Anything that can be plugged into a [`MetricsRegistry`].
#[async_trait]
pub trait ScrapeCollector: Send + Sync + 'static {
    /// Descriptors identifying this collector in the registry.
    fn describe(&self) -> Vec<Arc<Desc>>;

    /// Send current metric values; failures are handled internally.
    async fn collect(&self, tx: MetricSender);

    /// Append metrics encoded outside of the [`Metric`](crate::metrics::Metric) model.
    fn encode_native(&self, _output: &mut String) {}

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// Registration failures.
#[derive(Error)]
pub enum RegistryError {
    /// A collector with the same descriptor set is registered already.
    #[error("collector already registered")]
    AlreadyRegistered { existing: Arc<dyn ScrapeCollector> },

    #[error("descriptor {name} is already provided by another collector")]
    DuplicateDescriptor { name: String },
}

impl fmt::Debug for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyRegistered { .. } => f.write_str("AlreadyRegistered"),
            Self::DuplicateDescriptor { name } => f
                .debug_struct("DuplicateDescriptor")
                .field("name", name)
                .finish(),
        }
    }
}

struct Registered {
    names: BTreeSet<String>,
    collector: Arc<dyn ScrapeCollector>,
}

impl Registered {
    fn new(collector: Arc<dyn ScrapeCollector>) -> Self {
        let names = collector
            .describe()
            .iter()
            .map(|d| d.fq_name().to_string())
            .collect();
        Self { names, collector }
    }

    /// Collectors without descriptors are only identified by pointer.
    fn same_as(&self, other: &Registered) -> bool {
        if self.names.is_empty() || other.names.is_empty() {
            same_collector(&self.collector, &other.collector)
        } else {
            self.names == other.names
        }
    }
}

fn same_collector(a: &Arc<dyn ScrapeCollector>, b: &Arc<dyn ScrapeCollector>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Set of collectors gathered on every scrape.
#[derive(Default)]
pub struct MetricsRegistry {
    collectors: RwLock<Vec<Registered>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a collector.
    ///
    /// Fails with [`RegistryError::AlreadyRegistered`] when a collector with
    /// the same descriptor set is present, and with
    /// [`RegistryError::DuplicateDescriptor`] on a partial overlap.
    pub fn register(&self, collector: Arc<dyn ScrapeCollector>) -> Result<(), RegistryError> {
        let candidate = Registered::new(collector);
        let mut collectors = self.collectors.write();

        for existing in collectors.iter() {
            if existing.same_as(&candidate) {
                return Err(RegistryError::AlreadyRegistered {
                    existing: Arc::clone(&existing.collector),
                });
            }
            if let Some(name) = existing.names.intersection(&candidate.names).next() {
                return Err(RegistryError::DuplicateDescriptor { name: name.clone() });
            }
        }

        debug!(descriptors = candidate.names.len(), "Registered collector");
        collectors.push(candidate);
        Ok(())
    }

    /// Remove the collector matching `collector`; returns whether one was removed.
    pub fn unregister(&self, collector: &Arc<dyn ScrapeCollector>) -> bool {
        let target = Registered::new(Arc::clone(collector));
        let mut collectors = self.collectors.write();

        let before = collectors.len();
        collectors.retain(|existing| !existing.same_as(&target));
        before != collectors.len()
    }

    pub fn len(&self) -> usize {
        self.collectors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.collectors.read().is_empty()
    }

    /// Collect every registered collector and render the text exposition.
    pub async fn gather(&self) -> String {
        let snapshot: Vec<Arc<dyn ScrapeCollector>> = self
            .collectors
            .read()
            .iter()
            .map(|r| Arc::clone(&r.collector))
            .collect();

        let (tx, mut rx) = mpsc::channel(METRIC_CHANNEL_CAPACITY);
        let mut tasks = JoinSet::new();
        for collector in &snapshot {
            let collector = Arc::clone(collector);
            let tx = tx.clone();
            tasks.spawn(async move { collector.collect(tx).await });
        }
        drop(tx);

        let mut metrics = Vec::new();
        while let Some(metric) = rx.recv().await {
            metrics.push(metric);
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Collector task failed");
            }
        }

        let mut output = String::new();
        exposition::render(&metrics, &mut output);
        for collector in &snapshot {
            collector.encode_native(&mut output);
        }
        output
    }
}
