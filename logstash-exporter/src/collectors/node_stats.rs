use std::sync::Arc;

use async_trait::async_trait;

use super::pipeline::PipelineCollector;
use super::{CollectError, Collector, Emitter, SharedClients, for_each_client};
use crate::client::{LogstashClient, ScrapeContext};
use crate::metrics::{Desc, DescHelper, MetricSender, NAMESPACE};
use crate::responses::{Flow, FlowMetric, NodeStatsResponse};

pub(super) const SUBSYSTEM: &str = "stats";

/// Current and lifetime gauges of one flow metric.
pub(super) struct FlowDescs {
    current: Arc<Desc>,
    lifetime: Arc<Desc>,
}

impl FlowDescs {
    pub fn new(h: &DescHelper, name: &str, help: &str, labels: &[&str]) -> Self {
        Self {
            current: h.gauge(&format!("{name}_current"), &format!("Current {help}"), labels),
            lifetime: h.gauge(&format!("{name}_lifetime"), &format!("Lifetime {help}"), labels),
        }
    }

    pub async fn emit(
        &self,
        emitter: &Emitter,
        metric: Option<&FlowMetric>,
        labels: &[&str],
    ) -> Result<(), CollectError> {
        if let Some(metric) = metric {
            emitter.emit(&self.current, metric.current.value(), labels).await?;
            emitter.emit(&self.lifetime, metric.lifetime.value(), labels).await?;
        }
        Ok(())
    }
}

/// Flow gauges shared by the node and pipeline levels.
pub(super) struct FlowSet {
    input: FlowDescs,
    filter: FlowDescs,
    output: FlowDescs,
    queue_backpressure: FlowDescs,
    worker_concurrency: FlowDescs,
    worker_utilization: FlowDescs,
}

impl FlowSet {
    pub fn new(h: &DescHelper, prefix: &str, labels: &[&str]) -> Self {
        let flow = |name: &str, help: &str| {
            FlowDescs::new(h, &format!("{prefix}_{name}"), help, labels)
        };
        Self {
            input: flow("input", "number of events per second entering the inputs."),
            filter: flow("filter", "number of events per second passing through the filters."),
            output: flow("output", "number of events per second leaving the outputs."),
            queue_backpressure: flow(
                "queue_backpressure",
                "time spent by inputs blocked pushing to the queue per second.",
            ),
            worker_concurrency: flow(
                "worker_concurrency",
                "number of workers busy processing events.",
            ),
            worker_utilization: flow(
                "worker_utilization",
                "percentage of available worker time spent processing events.",
            ),
        }
    }

    pub async fn emit(&self, emitter: &Emitter, flow: &Flow, labels: &[&str]) -> Result<(), CollectError> {
        self.input.emit(emitter, flow.input_throughput.as_ref(), labels).await?;
        self.filter.emit(emitter, flow.filter_throughput.as_ref(), labels).await?;
        self.output.emit(emitter, flow.output_throughput.as_ref(), labels).await?;
        self.queue_backpressure
            .emit(emitter, flow.queue_backpressure.as_ref(), labels)
            .await?;
        self.worker_concurrency
            .emit(emitter, flow.worker_concurrency.as_ref(), labels)
            .await?;
        self.worker_utilization
            .emit(emitter, flow.worker_utilization.as_ref(), labels)
            .await
    }
}

struct Descs {
    jvm_threads_count: Arc<Desc>,
    jvm_threads_peak_count: Arc<Desc>,
    jvm_mem_heap_used_percent: Arc<Desc>,
    jvm_mem_heap_committed_bytes: Arc<Desc>,
    jvm_mem_heap_max_bytes: Arc<Desc>,
    jvm_mem_heap_used_bytes: Arc<Desc>,
    jvm_mem_non_heap_used_bytes: Arc<Desc>,
    jvm_mem_non_heap_committed_bytes: Arc<Desc>,
    jvm_mem_pool_peak_used_bytes: Arc<Desc>,
    jvm_mem_pool_used_bytes: Arc<Desc>,
    jvm_mem_pool_peak_max_bytes: Arc<Desc>,
    jvm_mem_pool_max_bytes: Arc<Desc>,
    jvm_mem_pool_committed_bytes: Arc<Desc>,
    jvm_gc_collection_count: Arc<Desc>,
    jvm_gc_collection_time_millis: Arc<Desc>,
    jvm_uptime_millis: Arc<Desc>,

    process_open_file_descriptors: Arc<Desc>,
    process_peak_open_file_descriptors: Arc<Desc>,
    process_max_file_descriptors: Arc<Desc>,
    process_cpu_percent: Arc<Desc>,
    process_cpu_total_millis: Arc<Desc>,
    process_cpu_load_average_1m: Arc<Desc>,
    process_cpu_load_average_5m: Arc<Desc>,
    process_cpu_load_average_15m: Arc<Desc>,
    process_mem_total_virtual_bytes: Arc<Desc>,

    events_in: Arc<Desc>,
    events_filtered: Arc<Desc>,
    events_out: Arc<Desc>,
    events_duration_millis: Arc<Desc>,
    events_queue_push_duration_millis: Arc<Desc>,

    flow: FlowSet,

    reload_successes: Arc<Desc>,
    reload_failures: Arc<Desc>,

    queue_events_count: Arc<Desc>,

    pipeline: PipelineCollector,
}

impl Descs {
    fn new() -> Self {
        let h = DescHelper::new(NAMESPACE, SUBSYSTEM);
        Self {
            jvm_threads_count: h.gauge("jvm_threads_count", "Number of live threads.", &[]),
            jvm_threads_peak_count: h.gauge(
                "jvm_threads_peak_count",
                "Peak number of live threads.",
                &[],
            ),
            jvm_mem_heap_used_percent: h.gauge(
                "jvm_mem_heap_used_percent",
                "Percentage of the heap memory that is used.",
                &[],
            ),
            jvm_mem_heap_committed_bytes: h.gauge(
                "jvm_mem_heap_committed_bytes",
                "Amount of heap memory in bytes that is committed for the JVM to use.",
                &[],
            ),
            jvm_mem_heap_max_bytes: h.gauge(
                "jvm_mem_heap_max_bytes",
                "Maximum amount of heap memory in bytes that can be used.",
                &[],
            ),
            jvm_mem_heap_used_bytes: h.gauge(
                "jvm_mem_heap_used_bytes",
                "Amount of used heap memory in bytes.",
                &[],
            ),
            jvm_mem_non_heap_used_bytes: h.gauge(
                "jvm_mem_non_heap_used_bytes",
                "Amount of used non-heap memory in bytes.",
                &[],
            ),
            jvm_mem_non_heap_committed_bytes: h.gauge(
                "jvm_mem_non_heap_committed_bytes",
                "Amount of non-heap memory in bytes that is committed for the JVM to use.",
                &[],
            ),
            jvm_mem_pool_peak_used_bytes: h.gauge(
                "jvm_mem_pool_peak_used_bytes",
                "Peak used bytes of a given JVM memory pool.",
                &["pool"],
            ),
            jvm_mem_pool_used_bytes: h.gauge(
                "jvm_mem_pool_used_bytes",
                "Currently used bytes of a given JVM memory pool.",
                &["pool"],
            ),
            jvm_mem_pool_peak_max_bytes: h.gauge(
                "jvm_mem_pool_peak_max_bytes",
                "Highest value of bytes that were used in a given JVM memory pool.",
                &["pool"],
            ),
            jvm_mem_pool_max_bytes: h.gauge(
                "jvm_mem_pool_max_bytes",
                "Maximum amount of bytes that can be used in a given JVM memory pool.",
                &["pool"],
            ),
            jvm_mem_pool_committed_bytes: h.gauge(
                "jvm_mem_pool_committed_bytes",
                "Amount of bytes that are committed for the JVM to use in a given JVM memory pool.",
                &["pool"],
            ),
            jvm_gc_collection_count: h.counter(
                "jvm_gc_collection_count",
                "Number of garbage collections run by a given collector.",
                &["collector"],
            ),
            jvm_gc_collection_time_millis: h.counter(
                "jvm_gc_collection_time_millis",
                "Time spent in garbage collection by a given collector, in milliseconds.",
                &["collector"],
            ),
            jvm_uptime_millis: h.gauge(
                "jvm_uptime_millis",
                "Uptime of the JVM in milliseconds.",
                &[],
            ),

            process_open_file_descriptors: h.gauge(
                "process_open_file_descriptors",
                "Number of currently open file descriptors.",
                &[],
            ),
            process_peak_open_file_descriptors: h.gauge(
                "process_peak_open_file_descriptors",
                "Peak number of open file descriptors.",
                &[],
            ),
            process_max_file_descriptors: h.gauge(
                "process_max_file_descriptors",
                "Limit of open file descriptors.",
                &[],
            ),
            process_cpu_percent: h.gauge(
                "process_cpu_percent",
                "CPU usage of the process.",
                &[],
            ),
            process_cpu_total_millis: h.counter(
                "process_cpu_total_millis",
                "Total CPU time used by the process, in milliseconds.",
                &[],
            ),
            process_cpu_load_average_1m: h.gauge(
                "process_cpu_load_average_1m",
                "Total 1m system load average.",
                &[],
            ),
            process_cpu_load_average_5m: h.gauge(
                "process_cpu_load_average_5m",
                "Total 5m system load average.",
                &[],
            ),
            process_cpu_load_average_15m: h.gauge(
                "process_cpu_load_average_15m",
                "Total 15m system load average.",
                &[],
            ),
            process_mem_total_virtual_bytes: h.gauge(
                "process_mem_total_virtual_bytes",
                "Total virtual memory used by the process, in bytes.",
                &[],
            ),

            events_in: h.counter("events_in", "Number of events received.", &[]),
            events_filtered: h.counter("events_filtered", "Number of events filtered out.", &[]),
            events_out: h.counter("events_out", "Number of events out.", &[]),
            events_duration_millis: h.counter(
                "events_duration_millis",
                "Time spent processing events, in milliseconds.",
                &[],
            ),
            events_queue_push_duration_millis: h.counter(
                "events_queue_push_duration_millis",
                "Time spent pushing events into the queue, in milliseconds.",
                &[],
            ),

            flow: FlowSet::new(&h, "flow", &[]),

            reload_successes: h.counter(
                "reload_successes",
                "Number of successful reloads.",
                &[],
            ),
            reload_failures: h.counter("reload_failures", "Number of failed reloads.", &[]),

            queue_events_count: h.gauge(
                "queue_events_count",
                "Number of events in the queue.",
                &[],
            ),

            pipeline: PipelineCollector::new(),
        }
    }
}

/// Emits JVM, process, event, flow, reload and queue metrics from
/// `GET /_node/stats`, then per-pipeline metrics.
pub struct NodeStatsCollector {
    clients: SharedClients,
    descs: Arc<Descs>,
}

impl NodeStatsCollector {
    pub fn new(clients: SharedClients) -> Self {
        Self {
            clients,
            descs: Arc::new(Descs::new()),
        }
    }
}

#[async_trait]
impl Collector for NodeStatsCollector {
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
    let stats = client.get_node_stats(ctx).await?;
    let emitter = Emitter::new(tx, client);

    emit_jvm(descs, &emitter, &stats).await?;
    emit_process(descs, &emitter, &stats).await?;

    let events = &stats.events;
    emitter.emit(&descs.events_in, events.events_in, &[]).await?;
    emitter.emit(&descs.events_filtered, events.filtered, &[]).await?;
    emitter.emit(&descs.events_out, events.out, &[]).await?;
    emitter
        .emit(&descs.events_duration_millis, events.duration_in_millis, &[])
        .await?;
    emitter
        .emit(
            &descs.events_queue_push_duration_millis,
            events.queue_push_duration_in_millis,
            &[],
        )
        .await?;

    descs.flow.emit(&emitter, &stats.flow, &[]).await?;

    emitter
        .emit(&descs.reload_successes, stats.reloads.successes, &[])
        .await?;
    emitter
        .emit(&descs.reload_failures, stats.reloads.failures, &[])
        .await?;

    emitter
        .emit(&descs.queue_events_count, stats.queue.events_count, &[])
        .await?;

    for (pipeline_id, pipeline) in &stats.pipelines {
        descs.pipeline.collect(&emitter, pipeline_id, pipeline).await?;
    }

    Ok(())
}

async fn emit_jvm(descs: &Descs, emitter: &Emitter, stats: &NodeStatsResponse) -> Result<(), CollectError> {
    let jvm = &stats.jvm;

    emitter.emit(&descs.jvm_threads_count, jvm.threads.count, &[]).await?;
    emitter
        .emit(&descs.jvm_threads_peak_count, jvm.threads.peak_count, &[])
        .await?;

    let mem = &jvm.mem;
    emitter
        .emit(&descs.jvm_mem_heap_used_percent, mem.heap_used_percent, &[])
        .await?;
    emitter
        .emit(&descs.jvm_mem_heap_committed_bytes, mem.heap_committed_in_bytes, &[])
        .await?;
    emitter
        .emit(&descs.jvm_mem_heap_max_bytes, mem.heap_max_in_bytes, &[])
        .await?;
    emitter
        .emit(&descs.jvm_mem_heap_used_bytes, mem.heap_used_in_bytes, &[])
        .await?;
    emitter
        .emit(&descs.jvm_mem_non_heap_used_bytes, mem.non_heap_used_in_bytes, &[])
        .await?;
    emitter
        .emit(
            &descs.jvm_mem_non_heap_committed_bytes,
            mem.non_heap_committed_in_bytes,
            &[],
        )
        .await?;

    for (name, pool) in &mem.pools {
        let labels = [name.as_str()];
        emitter
            .emit(&descs.jvm_mem_pool_peak_used_bytes, pool.peak_used_in_bytes, &labels)
            .await?;
        emitter
            .emit(&descs.jvm_mem_pool_used_bytes, pool.used_in_bytes, &labels)
            .await?;
        emitter
            .emit(&descs.jvm_mem_pool_peak_max_bytes, pool.peak_max_in_bytes, &labels)
            .await?;
        emitter
            .emit(&descs.jvm_mem_pool_max_bytes, pool.max_in_bytes, &labels)
            .await?;
        emitter
            .emit(&descs.jvm_mem_pool_committed_bytes, pool.committed_in_bytes, &labels)
            .await?;
    }

    for (name, collector) in &jvm.gc.collectors {
        let labels = [name.as_str()];
        emitter
            .emit(&descs.jvm_gc_collection_count, collector.collection_count, &labels)
            .await?;
        emitter
            .emit(
                &descs.jvm_gc_collection_time_millis,
                collector.collection_time_in_millis,
                &labels,
            )
            .await?;
    }

    emitter
        .emit(&descs.jvm_uptime_millis, jvm.uptime_in_millis, &[])
        .await
}

async fn emit_process(descs: &Descs, emitter: &Emitter, stats: &NodeStatsResponse) -> Result<(), CollectError> {
    let process = &stats.process;

    emitter
        .emit(&descs.process_open_file_descriptors, process.open_file_descriptors, &[])
        .await?;
    emitter
        .emit(
            &descs.process_peak_open_file_descriptors,
            process.peak_open_file_descriptors,
            &[],
        )
        .await?;
    emitter
        .emit(&descs.process_max_file_descriptors, process.max_file_descriptors, &[])
        .await?;
    emitter
        .emit(&descs.process_cpu_percent, process.cpu.percent, &[])
        .await?;
    emitter
        .emit(&descs.process_cpu_total_millis, process.cpu.total_in_millis, &[])
        .await?;

    if let Some(load) = &process.cpu.load_average {
        emitter
            .emit(&descs.process_cpu_load_average_1m, load.one_minute, &[])
            .await?;
        emitter
            .emit(&descs.process_cpu_load_average_5m, load.five_minutes, &[])
            .await?;
        emitter
            .emit(&descs.process_cpu_load_average_15m, load.fifteen_minutes, &[])
            .await?;
    }

    emitter
        .emit(
            &descs.process_mem_total_virtual_bytes,
            process.mem.total_virtual_in_bytes,
            &[],
        )
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::testing::{FakeClient, find, run, shared};

    #[tokio::test]
    async fn test_collect_fixture() {
        let collector = NodeStatsCollector::new(shared(vec![FakeClient::healthy("main")]));
        let (result, metrics) = run(&collector).await;

        assert!(result.is_ok(), "{result:?}");

        assert_eq!(find(&metrics, "logstash_stats_jvm_threads_count")[0].value(), 60.0);
        assert_eq!(
            find(&metrics, "logstash_stats_jvm_mem_heap_max_bytes")[0].value(),
            1_037_959_168.0
        );
        assert_eq!(find(&metrics, "logstash_stats_jvm_mem_pool_used_bytes").len(), 3);

        let gc = find(&metrics, "logstash_stats_jvm_gc_collection_count");
        let old = gc.iter().find(|m| m.label("collector") == Some("old")).unwrap();
        assert_eq!(old.value(), 3.0);

        assert_eq!(
            find(&metrics, "logstash_stats_process_cpu_load_average_5m")[0].value(),
            0.76
        );
        assert_eq!(find(&metrics, "logstash_stats_events_in")[0].value(), 4001.0);

        assert_eq!(
            find(&metrics, "logstash_stats_flow_input_current")[0].value(),
            f64::INFINITY
        );
        assert_eq!(
            find(&metrics, "logstash_stats_flow_queue_backpressure_current")[0].value(),
            f64::NEG_INFINITY
        );
    }

    #[tokio::test]
    async fn test_collect_runs_pipeline_per_id() {
        let collector = NodeStatsCollector::new(shared(vec![FakeClient::healthy("main")]));
        let (_, metrics) = run(&collector).await;

        let events_in = find(&metrics, "logstash_stats_pipeline_events_in");
        let mut pipelines: Vec<&str> = events_in
            .iter()
            .filter_map(|m| m.label("pipeline"))
            .collect();
        pipelines.sort_unstable();
        assert_eq!(pipelines, [".monitoring-logstash", "main"]);
    }

    #[tokio::test]
    async fn test_failed_instance_emits_nothing() {
        let collector = NodeStatsCollector::new(shared(vec![
            FakeClient::healthy("a"),
            FakeClient::failing("b"),
        ]));
        let (result, metrics) = run(&collector).await;

        assert!(matches!(result, Err(CollectError::Client(_))));
        assert!(!metrics.is_empty());
        assert!(metrics.iter().all(|m| m.label("instance_name") == Some("a")));
    }
}
