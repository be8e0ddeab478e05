use std::sync::Arc;

use super::node_stats::{FlowDescs, FlowSet, SUBSYSTEM};
use super::{CollectError, Emitter};
use crate::metrics::{Desc, DescHelper, NAMESPACE};
use crate::responses::{CodecPlugin, Plugin, Reloads, SinglePipelineResponse};

const PLUGIN_LABELS: [&str; 4] = ["plugin_type", "plugin", "plugin_id", "pipeline"];

/// Whether a pipeline counts as healthy given its reload history.
///
/// A pipeline that never failed a reload is healthy. Otherwise it is healthy
/// only if its last successful reload is not older than its last failure.
pub fn pipeline_healthy(reloads: &Reloads) -> bool {
    match (reloads.last_failure_timestamp, reloads.last_success_timestamp) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(failure), Some(success)) => success >= failure,
    }
}

/// Per-pipeline metrics, run by the node stats collector once per pipeline.
pub(super) struct PipelineCollector {
    up: Arc<Desc>,

    events_in: Arc<Desc>,
    events_filtered: Arc<Desc>,
    events_out: Arc<Desc>,
    events_duration: Arc<Desc>,
    events_queue_push_duration: Arc<Desc>,

    reloads_successes: Arc<Desc>,
    reloads_failures: Arc<Desc>,
    reloads_last_success_timestamp: Arc<Desc>,
    reloads_last_failure_timestamp: Arc<Desc>,

    queue_events_count: Arc<Desc>,
    queue_events_queue_size: Arc<Desc>,
    queue_max_size_in_bytes: Arc<Desc>,

    dead_letter_queue_max_size_in_bytes: Arc<Desc>,
    dead_letter_queue_size_in_bytes: Arc<Desc>,
    dead_letter_queue_dropped_events: Arc<Desc>,
    dead_letter_queue_expired_events: Arc<Desc>,

    flow: FlowSet,

    plugin_events_in: Arc<Desc>,
    plugin_events_out: Arc<Desc>,
    plugin_events_duration: Arc<Desc>,
    plugin_events_queue_push_duration: Arc<Desc>,

    plugin_codec_encode_writes_in: Arc<Desc>,
    plugin_codec_encode_duration: Arc<Desc>,
    plugin_codec_decode_writes_in: Arc<Desc>,
    plugin_codec_decode_out: Arc<Desc>,
    plugin_codec_decode_duration: Arc<Desc>,

    plugin_flow_worker_utilization: FlowDescs,
    plugin_flow_worker_millis_per_event: FlowDescs,

    plugin_documents_successes: Arc<Desc>,
    plugin_documents_non_retryable_failures: Arc<Desc>,
    plugin_bulk_requests_successes: Arc<Desc>,
    plugin_bulk_requests_with_errors: Arc<Desc>,
    plugin_bulk_requests_responses: Arc<Desc>,
}

impl PipelineCollector {
    pub fn new() -> Self {
        let h = DescHelper::new(NAMESPACE, SUBSYSTEM);
        let pipeline = &["pipeline"];
        let plugin = &PLUGIN_LABELS;

        Self {
            up: h.gauge(
                "pipeline_up",
                "Whether the pipeline is up (1) or down (0), derived from its reload history.",
                pipeline,
            ),

            events_in: h.counter("pipeline_events_in", "Number of events that have been inputted into this pipeline.", pipeline),
            events_filtered: h.counter("pipeline_events_filtered", "Number of events that have been filtered out by this pipeline.", pipeline),
            events_out: h.counter("pipeline_events_out", "Number of events that have been processed by this pipeline.", pipeline),
            events_duration: h.counter("pipeline_events_duration", "Time needed to process events in this pipeline, in milliseconds.", pipeline),
            events_queue_push_duration: h.counter(
                "pipeline_events_queue_push_duration",
                "Time spent pushing events into the input queue, in milliseconds.",
                pipeline,
            ),

            reloads_successes: h.counter("pipeline_reloads_successes", "Number of successful pipeline reloads.", pipeline),
            reloads_failures: h.counter("pipeline_reloads_failures", "Number of failed pipeline reloads.", pipeline),
            reloads_last_success_timestamp: h.gauge(
                "pipeline_reloads_last_success_timestamp",
                "Timestamp of the last successful pipeline reload, in seconds since the epoch.",
                pipeline,
            ),
            reloads_last_failure_timestamp: h.gauge(
                "pipeline_reloads_last_failure_timestamp",
                "Timestamp of the last failed pipeline reload, in seconds since the epoch.",
                pipeline,
            ),

            queue_events_count: h.gauge("pipeline_queue_events_count", "Number of events in the queue.", pipeline),
            queue_events_queue_size: h.gauge("pipeline_queue_events_queue_size", "Size of the queue in bytes.", pipeline),
            queue_max_size_in_bytes: h.gauge("pipeline_queue_max_size_in_bytes", "Maximum size of the queue in bytes.", pipeline),

            dead_letter_queue_max_size_in_bytes: h.gauge(
                "pipeline_dead_letter_queue_max_size_in_bytes",
                "Maximum size of the dead letter queue in bytes.",
                pipeline,
            ),
            dead_letter_queue_size_in_bytes: h.gauge(
                "pipeline_dead_letter_queue_size_in_bytes",
                "Current size of the dead letter queue in bytes.",
                pipeline,
            ),
            dead_letter_queue_dropped_events: h.counter(
                "pipeline_dead_letter_queue_dropped_events",
                "Number of events dropped by the dead letter queue.",
                pipeline,
            ),
            dead_letter_queue_expired_events: h.counter(
                "pipeline_dead_letter_queue_expired_events",
                "Number of events expired in the dead letter queue.",
                pipeline,
            ),

            flow: FlowSet::new(&h, "pipeline_flow", pipeline),

            plugin_events_in: h.counter("pipeline_plugin_events_in", "Number of events received by this plugin.", plugin),
            plugin_events_out: h.counter("pipeline_plugin_events_out", "Number of events output by this plugin.", plugin),
            plugin_events_duration: h.counter(
                "pipeline_plugin_events_duration",
                "Time spent processing events in this plugin, in milliseconds.",
                plugin,
            ),
            plugin_events_queue_push_duration: h.counter(
                "pipeline_plugin_events_queue_push_duration",
                "Time spent pushing events into the queue by this plugin, in milliseconds.",
                plugin,
            ),

            plugin_codec_encode_writes_in: h.counter(
                "pipeline_plugin_codec_encode_writes_in",
                "Number of events passed to the codec for encoding.",
                plugin,
            ),
            plugin_codec_encode_duration: h.counter(
                "pipeline_plugin_codec_encode_duration",
                "Time spent encoding events, in milliseconds.",
                plugin,
            ),
            plugin_codec_decode_writes_in: h.counter(
                "pipeline_plugin_codec_decode_writes_in",
                "Number of events passed to the codec for decoding.",
                plugin,
            ),
            plugin_codec_decode_out: h.counter(
                "pipeline_plugin_codec_decode_out",
                "Number of events produced by decoding.",
                plugin,
            ),
            plugin_codec_decode_duration: h.counter(
                "pipeline_plugin_codec_decode_duration",
                "Time spent decoding events, in milliseconds.",
                plugin,
            ),

            plugin_flow_worker_utilization: FlowDescs::new(
                &h,
                "pipeline_plugin_flow_worker_utilization",
                "percentage of worker time spent in this plugin.",
                plugin,
            ),
            plugin_flow_worker_millis_per_event: FlowDescs::new(
                &h,
                "pipeline_plugin_flow_worker_millis_per_event",
                "worker milliseconds spent per event in this plugin.",
                plugin,
            ),

            plugin_documents_successes: h.counter(
                "pipeline_plugin_documents_successes",
                "Number of documents successfully sent by this output.",
                plugin,
            ),
            plugin_documents_non_retryable_failures: h.counter(
                "pipeline_plugin_documents_non_retryable_failures",
                "Number of documents rejected by the destination without retry.",
                plugin,
            ),
            plugin_bulk_requests_successes: h.counter(
                "pipeline_plugin_bulk_requests_successes",
                "Number of successful bulk requests sent by this output.",
                plugin,
            ),
            plugin_bulk_requests_with_errors: h.counter(
                "pipeline_plugin_bulk_requests_with_errors",
                "Number of bulk requests with at least one failed document.",
                plugin,
            ),
            plugin_bulk_requests_responses: h.counter(
                "pipeline_plugin_bulk_requests_responses",
                "Number of bulk request responses by HTTP status code.",
                &["plugin_type", "plugin", "plugin_id", "pipeline", "status"],
            ),
        }
    }

    pub async fn collect(
        &self,
        emitter: &Emitter,
        pipeline_id: &str,
        stats: &SinglePipelineResponse,
    ) -> Result<(), CollectError> {
        let labels = [pipeline_id];

        let up = if pipeline_healthy(&stats.reloads) { 1.0 } else { 0.0 };
        emitter.emit(&self.up, up, &labels).await?;

        let events = &stats.events;
        emitter.emit(&self.events_in, events.events_in, &labels).await?;
        emitter.emit(&self.events_filtered, events.filtered, &labels).await?;
        emitter.emit(&self.events_out, events.out, &labels).await?;
        emitter
            .emit(&self.events_duration, events.duration_in_millis, &labels)
            .await?;
        emitter
            .emit(
                &self.events_queue_push_duration,
                events.queue_push_duration_in_millis,
                &labels,
            )
            .await?;

        let reloads = &stats.reloads;
        emitter
            .emit(&self.reloads_successes, reloads.successes, &labels)
            .await?;
        emitter
            .emit(&self.reloads_failures, reloads.failures, &labels)
            .await?;
        if let Some(ts) = reloads.last_success_timestamp {
            emitter
                .emit(&self.reloads_last_success_timestamp, ts.timestamp() as f64, &labels)
                .await?;
        }
        if let Some(ts) = reloads.last_failure_timestamp {
            emitter
                .emit(&self.reloads_last_failure_timestamp, ts.timestamp() as f64, &labels)
                .await?;
        }

        let queue = &stats.queue;
        emitter
            .emit(&self.queue_events_count, queue.events_count, &labels)
            .await?;
        emitter
            .emit(&self.queue_events_queue_size, queue.queue_size_in_bytes, &labels)
            .await?;
        emitter
            .emit(&self.queue_max_size_in_bytes, queue.max_queue_size_in_bytes, &labels)
            .await?;

        if let Some(dlq) = &stats.dead_letter_queue {
            emitter
                .emit(&self.dead_letter_queue_max_size_in_bytes, dlq.max_queue_size_in_bytes, &labels)
                .await?;
            emitter
                .emit(&self.dead_letter_queue_size_in_bytes, dlq.queue_size_in_bytes, &labels)
                .await?;
            emitter
                .emit(&self.dead_letter_queue_dropped_events, dlq.dropped_events, &labels)
                .await?;
            emitter
                .emit(&self.dead_letter_queue_expired_events, dlq.expired_events, &labels)
                .await?;
        }

        self.flow.emit(emitter, &stats.flow, &labels).await?;

        let plugins = &stats.plugins;
        for input in &plugins.inputs {
            self.collect_input(emitter, pipeline_id, input).await?;
        }
        for codec in &plugins.codecs {
            self.collect_codec(emitter, pipeline_id, codec).await?;
        }
        for filter in &plugins.filters {
            self.collect_worker_plugin(emitter, "filter", pipeline_id, filter).await?;
        }
        for output in &plugins.outputs {
            self.collect_worker_plugin(emitter, "output", pipeline_id, output).await?;
            self.collect_output_requests(emitter, pipeline_id, output).await?;
        }

        Ok(())
    }

    async fn collect_input(&self, emitter: &Emitter, pipeline_id: &str, plugin: &Plugin) -> Result<(), CollectError> {
        let labels = ["input", plugin.name.as_str(), plugin.id.as_str(), pipeline_id];

        emitter
            .emit(&self.plugin_events_out, plugin.events.out, &labels)
            .await?;
        emitter
            .emit(
                &self.plugin_events_queue_push_duration,
                plugin.events.queue_push_duration_in_millis,
                &labels,
            )
            .await
    }

    async fn collect_codec(&self, emitter: &Emitter, pipeline_id: &str, codec: &CodecPlugin) -> Result<(), CollectError> {
        let labels = ["codec", codec.name.as_str(), codec.id.as_str(), pipeline_id];

        emitter
            .emit(&self.plugin_codec_encode_writes_in, codec.encode.writes_in, &labels)
            .await?;
        emitter
            .emit(&self.plugin_codec_encode_duration, codec.encode.duration_in_millis, &labels)
            .await?;
        emitter
            .emit(&self.plugin_codec_decode_writes_in, codec.decode.writes_in, &labels)
            .await?;
        emitter
            .emit(&self.plugin_codec_decode_out, codec.decode.out, &labels)
            .await?;
        emitter
            .emit(&self.plugin_codec_decode_duration, codec.decode.duration_in_millis, &labels)
            .await
    }

    /// Filters and outputs share the same event and worker flow metrics.
    async fn collect_worker_plugin(
        &self,
        emitter: &Emitter,
        plugin_type: &str,
        pipeline_id: &str,
        plugin: &Plugin,
    ) -> Result<(), CollectError> {
        let labels = [plugin_type, plugin.name.as_str(), plugin.id.as_str(), pipeline_id];

        emitter
            .emit(&self.plugin_events_in, plugin.events.events_in, &labels)
            .await?;
        emitter
            .emit(&self.plugin_events_out, plugin.events.out, &labels)
            .await?;
        emitter
            .emit(&self.plugin_events_duration, plugin.events.duration_in_millis, &labels)
            .await?;

        self.plugin_flow_worker_utilization
            .emit(emitter, plugin.flow.worker_utilization.as_ref(), &labels)
            .await?;
        self.plugin_flow_worker_millis_per_event
            .emit(emitter, plugin.flow.worker_millis_per_event.as_ref(), &labels)
            .await
    }

    async fn collect_output_requests(
        &self,
        emitter: &Emitter,
        pipeline_id: &str,
        plugin: &Plugin,
    ) -> Result<(), CollectError> {
        let labels = ["output", plugin.name.as_str(), plugin.id.as_str(), pipeline_id];

        if let Some(documents) = &plugin.documents {
            emitter
                .emit(&self.plugin_documents_successes, documents.successes, &labels)
                .await?;
            emitter
                .emit(
                    &self.plugin_documents_non_retryable_failures,
                    documents.non_retryable_failures,
                    &labels,
                )
                .await?;
        }

        if let Some(bulk) = &plugin.bulk_requests {
            emitter
                .emit(&self.plugin_bulk_requests_successes, bulk.successes, &labels)
                .await?;
            emitter
                .emit(&self.plugin_bulk_requests_with_errors, bulk.with_errors, &labels)
                .await?;

            for (status, count) in &bulk.responses {
                let labels = ["output", plugin.name.as_str(), plugin.id.as_str(), pipeline_id, status.as_str()];
                emitter
                    .emit(&self.plugin_bulk_requests_responses, *count, &labels)
                    .await?;
            }
        }

        Ok(())
    }
}
