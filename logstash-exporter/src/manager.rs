//! Collector manager: runs every family concurrently for one scrape.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::client::{ClientError, HttpClient, LogstashClient, ScrapeContext};
use crate::collectors::{
    Collector, NodeInfoCollector, NodeStatsCollector, SelfInfoCollector, SharedClients,
};
use crate::config::LogstashInstance;
use crate::metrics::{Desc, MetricKind, MetricSender};
use crate::registry::ScrapeCollector;

const SCRAPE_DURATION_NAME: &str = "logstash_exporter_scrape_duration_seconds";
const SCRAPE_DURATION_HELP: &str = "Duration of one collector family scrape, in seconds.";

#[derive(Debug, Clone, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ScrapeLabels {
    collector: String,
    result: String,
}

type ScrapeDurations = Family<ScrapeLabels, Histogram, fn() -> Histogram>;

fn scrape_histogram() -> Histogram {
    Histogram::new(exponential_buckets(0.005, 2.0, 12))
}

/// Owns the collector families and the client list they scrape.
pub struct CollectorManager {
    collectors: HashMap<&'static str, Arc<dyn Collector>>,
    clients: SharedClients,
    http_timeout: Duration,
    scrape_durations: ScrapeDurations,
    registry: Registry,
    scrape_desc: Arc<Desc>,
}

impl CollectorManager {
    /// Build a client per instance and the collector families over them.
    pub fn new(instances: &[LogstashInstance], http_timeout: Duration) -> Result<Self, ClientError> {
        let clients = instances
            .iter()
            .map(|instance| {
                HttpClient::new(instance).map(|c| Arc::new(c) as Arc<dyn LogstashClient>)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::with_clients(clients, http_timeout))
    }

    pub fn with_clients(clients: Vec<Arc<dyn LogstashClient>>, http_timeout: Duration) -> Self {
        let clients: SharedClients = Arc::new(RwLock::new(clients));

        let mut collectors: HashMap<&'static str, Arc<dyn Collector>> = HashMap::new();
        collectors.insert("node_info", Arc::new(NodeInfoCollector::new(clients.clone())));
        collectors.insert("node_stats", Arc::new(NodeStatsCollector::new(clients.clone())));
        collectors.insert("exporter", Arc::new(SelfInfoCollector::new()));

        let scrape_durations = ScrapeDurations::new_with_constructor(scrape_histogram);
        let mut registry = Registry::default();
        registry.register(
            SCRAPE_DURATION_NAME,
            SCRAPE_DURATION_HELP,
            scrape_durations.clone(),
        );

        Self {
            collectors,
            clients,
            http_timeout,
            scrape_durations,
            registry,
            scrape_desc: Desc::new(
                SCRAPE_DURATION_NAME,
                SCRAPE_DURATION_HELP,
                MetricKind::Histogram,
                &["collector", "result"],
            ),
        }
    }

    pub fn http_timeout(&self) -> Duration {
        self.http_timeout
    }

    /// Endpoints currently scraped, in order.
    pub fn endpoints(&self) -> Vec<String> {
        self.clients
            .read()
            .iter()
            .map(|c| c.endpoint().to_string())
            .collect()
    }

    /// Start scraping `instance`, unless its endpoint is scraped already.
    pub fn add_instance(&self, instance: &LogstashInstance) -> Result<bool, ClientError> {
        let client = HttpClient::new(instance)?;

        let mut clients = self.clients.write();
        if clients.iter().any(|c| c.endpoint() == instance.host) {
            return Ok(false);
        }

        info!(instance = %client.name(), endpoint = %instance.host, "Added instance");
        clients.push(Arc::new(client));
        Ok(true)
    }

    /// Stop scraping the instance at `endpoint`; returns whether it was present.
    pub fn remove_instance(&self, endpoint: &str) -> bool {
        let mut clients = self.clients.write();
        let before = clients.len();
        clients.retain(|c| c.endpoint() != endpoint);

        let removed = before != clients.len();
        if removed {
            info!(%endpoint, "Removed instance");
        }
        removed
    }

    /// Run every family under one scrape deadline.
    ///
    /// Family errors are logged and recorded in the scrape duration
    /// histogram; they never fail the scrape.
    pub async fn collect_all(&self, tx: MetricSender) {
        let ctx = ScrapeContext::with_timeout(self.http_timeout);

        let mut tasks = JoinSet::new();
        for (&name, collector) in &self.collectors {
            let collector = Arc::clone(collector);
            let durations = self.scrape_durations.clone();
            let tx = tx.clone();

            tasks.spawn(async move {
                let start = Instant::now();
                let result = collector.collect(&ctx, tx).await;
                let elapsed = start.elapsed().as_secs_f64();

                let outcome = if result.is_ok() { "success" } else { "error" };
                durations
                    .get_or_create(&ScrapeLabels {
                        collector: name.to_string(),
                        result: outcome.to_string(),
                    })
                    .observe(elapsed);

                match result {
                    Ok(()) => debug!(collector = %name, duration = elapsed, "Collector succeeded"),
                    Err(e) => error!(collector = %name, error = %e, "Collector failed"),
                }
            });
        }
        drop(tx);

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Collector task failed");
            }
        }
    }
}

#[async_trait]
impl ScrapeCollector for CollectorManager {
    fn describe(&self) -> Vec<Arc<Desc>> {
        vec![Arc::clone(&self.scrape_desc)]
    }

    async fn collect(&self, tx: MetricSender) {
        self.collect_all(tx).await;
    }

    fn encode_native(&self, output: &mut String) {
        let mut encoded = String::new();
        if let Err(e) = prometheus_client::encoding::text::encode(&mut encoded, &self.registry) {
            error!(error = %e, "Failed to encode scrape durations");
            return;
        }

        let encoded = encoded.strip_suffix("# EOF\n").unwrap_or(&encoded);
        output.push_str(encoded);
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
