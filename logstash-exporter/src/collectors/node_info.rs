use std::sync::Arc;

use async_trait::async_trait;

use super::{CollectError, Collector, Emitter, SharedClients, for_each_client};
use crate::client::{LogstashClient, ScrapeContext};
use crate::metrics::{Desc, DescHelper, MetricSender, NAMESPACE};

const SUBSYSTEM: &str = "info";

struct Descs {
    node: Arc<Desc>,
    build: Arc<Desc>,
    status: Arc<Desc>,
    pipeline_workers: Arc<Desc>,
    pipeline_batch_size: Arc<Desc>,
    pipeline_batch_delay: Arc<Desc>,
    up: Arc<Desc>,
}

impl Descs {
    fn new() -> Self {
        let h = DescHelper::new(NAMESPACE, SUBSYSTEM);
        Self {
            node: h.gauge(
                "node",
                "A metric with a constant '1' value labeled by node name, version, host, http_address, and id of the logstash instance.",
                &["name", "version", "http_address", "host", "id"],
            ),
            build: h.gauge(
                "build",
                "A metric with a constant '1' value labeled by build date, sha, and snapshot of the logstash instance.",
                &["date", "sha", "snapshot"],
            ),
            status: h.gauge(
                "status",
                "A metric with a constant '1' value labeled by status.",
                &["status"],
            ),
            pipeline_workers: h.gauge(
                "pipeline_workers",
                "Number of worker threads that will process pipeline events.",
                &[],
            ),
            pipeline_batch_size: h.gauge(
                "pipeline_batch_size",
                "Number of events to retrieve from the input queue before sending to the filter and output stages.",
                &[],
            ),
            pipeline_batch_delay: h.gauge(
                "pipeline_batch_delay",
                "Amount of time to wait for events to fill the batch before sending to the filter and output stages.",
                &[],
            ),
            up: h.gauge(
                "up",
                "Whether the Logstash instance is up (1) or down (0).",
                &[],
            ),
        }
    }
}

/// Emits node identity, build and status metrics from `GET /`.
pub struct NodeInfoCollector {
    clients: SharedClients,
    descs: Arc<Descs>,
}

impl NodeInfoCollector {
    pub fn new(clients: SharedClients) -> Self {
        Self {
            clients,
            descs: Arc::new(Descs::new()),
        }
    }
}

#[async_trait]
impl Collector for NodeInfoCollector {
    async fn collect(&self, ctx: &ScrapeContext, tx: MetricSender) -> Result<(), CollectError> {
        for_each_client(&self.clients, |client| {
            let descs = Arc::clone(&self.descs);
            let tx = tx.clone();
            let ctx = *ctx;
            async move { collect_instance(&descs, client.as_ref(), &ctx, tx).await }
        })
        .await
    }
}

async fn collect_instance(
    descs: &Descs,
    client: &dyn LogstashClient,
    ctx: &ScrapeContext,
    tx: MetricSender,
) -> Result<(), CollectError> {
    let emitter = Emitter::new(tx, client);

    let info = match client.get_node_info(ctx).await {
        Ok(info) => info,
        Err(e) => {
            emitter.emit(&descs.up, 0.0, &[]).await?;
            return Err(e.into());
        }
    };

    emitter
        .emit(
            &descs.node,
            1.0,
            &[&info.name, &info.version, &info.http_address, &info.host, &info.id],
        )
        .await?;

    let snapshot = info.build_snapshot.to_string();
    emitter
        .emit(&descs.build, 1.0, &[&info.build_date, &info.build_sha, &snapshot])
        .await?;

    emitter.emit(&descs.status, 1.0, &[&info.status]).await?;

    emitter
        .emit(&descs.pipeline_workers, info.pipeline.workers as f64, &[])
        .await?;
    emitter
        .emit(&descs.pipeline_batch_size, info.pipeline.batch_size as f64, &[])
        .await?;
    emitter
        .emit(&descs.pipeline_batch_delay, info.pipeline.batch_delay as f64, &[])
        .await?;

    let up = if info.is_up() { 1.0 } else { 0.0 };
    emitter.emit(&descs.up, up, &[]).await
}
