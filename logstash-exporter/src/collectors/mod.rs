//! Per-family collectors turning Logstash API documents into metrics.
//!
//! Each family fans out one task per configured instance and folds the
//! per-instance failures into a single [`CollectError`].

mod node_info;
mod node_stats;
mod pipeline;
mod self_info;

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::task::JoinSet;

use crate::client::{ClientError, LogstashClient, ScrapeContext};
use crate::metrics::{Desc, MetricError, MetricSender};

pub use node_info::NodeInfoCollector;
pub use node_stats::NodeStatsCollector;
pub use pipeline::pipeline_healthy;
pub use self_info::{BuildInfo, SelfInfoCollector};

/// Client list shared between the collector manager and its families.
pub type SharedClients = Arc<RwLock<Vec<Arc<dyn LogstashClient>>>>;

/// Errors raised by a collector family.
#[derive(Debug, Error)]
pub enum CollectError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Metric(#[from] MetricError),

    #[error("metric receiver dropped")]
    ReceiverDropped,

    #[error("collector task failed: {0}")]
    Task(String),

    #[error("{}", format_multiple(.0))]
    Multiple(Vec<CollectError>),
}

fn format_multiple(errors: &[CollectError]) -> String {
    let mut message = format!("encountered {} errors:", errors.len());
    for error in errors {
        message.push_str("\n\t");
        message.push_str(&error.to_string());
    }
    message
}

/// Fold per-instance errors: none is `Ok`, one is returned as is.
pub fn aggregate(mut errors: Vec<CollectError>) -> Result<(), CollectError> {
    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        _ => Err(CollectError::Multiple(errors)),
    }
}

/// One metric family.
#[async_trait]
pub trait Collector: Send + Sync {
    async fn collect(&self, ctx: &ScrapeContext, tx: MetricSender) -> Result<(), CollectError>;
}

/// Run `task` once per client concurrently and aggregate the failures.
pub(crate) async fn for_each_client<F, Fut>(clients: &SharedClients, task: F) -> Result<(), CollectError>
where
    F: Fn(Arc<dyn LogstashClient>) -> Fut,
    Fut: Future<Output = Result<(), CollectError>> + Send + 'static,
{
    let snapshot: Vec<Arc<dyn LogstashClient>> = clients.read().clone();

    let mut tasks = JoinSet::new();
    for client in snapshot {
        tasks.spawn(task(client));
    }

    let mut errors = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => errors.push(e),
            Err(e) => errors.push(CollectError::Task(e.to_string())),
        }
    }

    aggregate(errors)
}

/// Sends metrics for one instance, appending its instance label values.
pub(crate) struct Emitter {
    tx: MetricSender,
    name: String,
    endpoint: String,
}

impl Emitter {
    pub fn new(tx: MetricSender, client: &dyn LogstashClient) -> Self {
        Self {
            tx,
            name: client.name().to_string(),
            endpoint: client.endpoint().to_string(),
        }
    }

    pub async fn emit(&self, desc: &Arc<Desc>, value: f64, labels: &[&str]) -> Result<(), CollectError> {
        let mut values = Vec::with_capacity(labels.len() + 2);
        values.extend_from_slice(labels);
        values.push(self.name.as_str());
        values.push(self.endpoint.as_str());

        let metric = desc.metric(value, &values)?;
        self.tx
            .send(metric)
            .await
            .map_err(|_| CollectError::ReceiverDropped)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Canned clients for collector tests.

    use super::*;
    use crate::responses::{NodeInfoResponse, NodeStatsResponse};
    use crate::metrics::Metric;
    use reqwest::StatusCode;
    use tokio::sync::mpsc;

    pub const NODE_INFO: &str = include_str!("../../tests/fixtures/node_info.json");
    pub const NODE_STATS: &str = include_str!("../../tests/fixtures/node_stats.json");

    pub struct FakeClient {
        pub name: String,
        pub endpoint: String,
        pub info: Option<NodeInfoResponse>,
        pub stats: Option<NodeStatsResponse>,
    }

    impl FakeClient {
        pub fn healthy(name: &str) -> Arc<dyn LogstashClient> {
            Arc::new(Self {
                name: name.to_string(),
                endpoint: format!("http://{name}:9600"),
                info: Some(serde_json::from_str(NODE_INFO).unwrap()),
                stats: Some(serde_json::from_str(NODE_STATS).unwrap()),
            })
        }

        pub fn failing(name: &str) -> Arc<dyn LogstashClient> {
            Arc::new(Self {
                name: name.to_string(),
                endpoint: format!("http://{name}:9600"),
                info: None,
                stats: None,
            })
        }

        fn unavailable(&self, path: &str) -> ClientError {
            ClientError::Status {
                url: format!("{}{}", self.endpoint, path),
                status: StatusCode::SERVICE_UNAVAILABLE,
            }
        }
    }

    #[async_trait]
    impl LogstashClient for FakeClient {
        async fn get_node_info(&self, _ctx: &ScrapeContext) -> Result<NodeInfoResponse, ClientError> {
            self.info.clone().ok_or_else(|| self.unavailable("/"))
        }

        async fn get_node_stats(&self, _ctx: &ScrapeContext) -> Result<NodeStatsResponse, ClientError> {
            self.stats.clone().ok_or_else(|| self.unavailable("/_node/stats"))
        }

        fn endpoint(&self) -> &str {
            &self.endpoint
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

    pub fn shared(clients: Vec<Arc<dyn LogstashClient>>) -> SharedClients {
        Arc::new(RwLock::new(clients))
    }

    /// Run a collector to completion and return what it emitted.
    pub async fn run(collector: &dyn Collector) -> (Result<(), CollectError>, Vec<Metric>) {
        let (tx, mut rx) = mpsc::channel(1024);
        let ctx = ScrapeContext::with_timeout(std::time::Duration::from_secs(5));

        let collect = collector.collect(&ctx, tx);
        let drain = async {
            let mut metrics = Vec::new();
            while let Some(metric) = rx.recv().await {
                metrics.push(metric);
            }
            metrics
        };

        tokio::join!(collect, drain)
    }

    pub fn find<'a>(metrics: &'a [Metric], name: &str) -> Vec<&'a Metric> {
        metrics
            .iter()
            .filter(|m| m.desc().fq_name() == name)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_error(n: u16) -> CollectError {
        CollectError::Task(format!("boom {n}"))
    }

    #[test]
    fn test_aggregate_none() {
        assert!(aggregate(Vec::new()).is_ok());
    }

    #[test]
    fn test_aggregate_single_is_verbatim() {
        let err = aggregate(vec![client_error(1)]).unwrap_err();
        assert!(matches!(err, CollectError::Task(_)));
        assert_eq!(err.to_string(), "collector task failed: boom 1");
    }

    #[test]
    fn test_aggregate_multiple_lists_each() {
        let err = aggregate(vec![client_error(1), client_error(2), client_error(3)]).unwrap_err();

        let message = err.to_string();
        assert!(message.starts_with("encountered 3 errors:"));
        assert!(message.contains("\n\tcollector task failed: boom 1"));
        assert!(message.contains("\n\tcollector task failed: boom 2"));
        assert!(message.contains("\n\tcollector task failed: boom 3"));
    }

    #[tokio::test]
    async fn test_for_each_client_runs_every_client() {
        let clients = testing::shared(vec![
            testing::FakeClient::healthy("a"),
            testing::FakeClient::failing("b"),
            testing::FakeClient::failing("c"),
        ]);

        let result = for_each_client(&clients, |client| async move {
            if client.name() == "a" {
                Ok(())
            } else {
                Err(CollectError::Task(client.name().to_string()))
            }
        })
        .await;

        match result {
            Err(CollectError::Multiple(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("expected two errors, got {other:?}"),
        }
    }
}
