//! Response of the Logstash node stats API (`GET /_node/stats`).

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::infinity::InfinityFloat;
use super::node_info::PipelineSettings;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeStatsResponse {
    pub host: String,
    pub version: String,
    pub http_address: String,
    pub id: String,
    pub name: String,
    pub ephemeral_id: String,
    pub status: String,
    pub snapshot: bool,
    pub pipeline: PipelineSettings,
    pub jvm: Jvm,
    pub process: Process,
    pub events: Events,
    pub flow: Flow,
    pub reloads: Reloads,
    pub queue: NodeQueue,
    pub pipelines: HashMap<String, SinglePipelineResponse>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Jvm {
    pub threads: JvmThreads,
    pub mem: JvmMem,
    pub gc: JvmGc,
    pub uptime_in_millis: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JvmThreads {
    pub count: f64,
    pub peak_count: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JvmMem {
    pub heap_used_percent: f64,
    pub heap_committed_in_bytes: f64,
    pub heap_max_in_bytes: f64,
    pub heap_used_in_bytes: f64,
    pub non_heap_used_in_bytes: f64,
    pub non_heap_committed_in_bytes: f64,
    /// Keyed by pool name (`young`, `old`, `survivor`).
    pub pools: BTreeMap<String, MemPool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemPool {
    pub peak_used_in_bytes: f64,
    pub used_in_bytes: f64,
    pub peak_max_in_bytes: f64,
    pub max_in_bytes: f64,
    pub committed_in_bytes: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JvmGc {
    /// Keyed by collector name (`young`, `old`).
    pub collectors: BTreeMap<String, GcCollector>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GcCollector {
    pub collection_count: f64,
    pub collection_time_in_millis: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Process {
    pub open_file_descriptors: f64,
    pub peak_open_file_descriptors: f64,
    pub max_file_descriptors: f64,
    pub mem: ProcessMem,
    pub cpu: ProcessCpu,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessMem {
    pub total_virtual_in_bytes: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessCpu {
    pub total_in_millis: f64,
    pub percent: f64,
    /// Absent on platforms without load averages.
    pub load_average: Option<LoadAverage>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadAverage {
    #[serde(rename = "1m")]
    pub one_minute: f64,
    #[serde(rename = "5m")]
    pub five_minutes: f64,
    #[serde(rename = "15m")]
    pub fifteen_minutes: f64,
}

/// Event counters, shared by the node and each pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Events {
    #[serde(rename = "in")]
    pub events_in: f64,
    pub filtered: f64,
    pub out: f64,
    pub duration_in_millis: f64,
    pub queue_push_duration_in_millis: f64,
}

/// Flow metrics; each entry is absent on Logstash versions without it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Flow {
    pub input_throughput: Option<FlowMetric>,
    pub filter_throughput: Option<FlowMetric>,
    pub output_throughput: Option<FlowMetric>,
    pub queue_backpressure: Option<FlowMetric>,
    pub worker_concurrency: Option<FlowMetric>,
    pub worker_utilization: Option<FlowMetric>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowMetric {
    pub current: InfinityFloat,
    pub lifetime: InfinityFloat,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Reloads {
    pub successes: f64,
    pub failures: f64,
    pub last_success_timestamp: Option<DateTime<Utc>>,
    pub last_failure_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeQueue {
    pub events_count: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinglePipelineResponse {
    pub events: Events,
    pub flow: Flow,
    pub plugins: Plugins,
    pub reloads: Reloads,
    pub queue: PipelineQueue,
    pub dead_letter_queue: Option<DeadLetterQueue>,
    pub hash: String,
    pub ephemeral_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineQueue {
    #[serde(rename = "type")]
    pub queue_type: String,
    pub events_count: f64,
    pub queue_size_in_bytes: f64,
    pub max_queue_size_in_bytes: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeadLetterQueue {
    pub max_queue_size_in_bytes: f64,
    pub queue_size_in_bytes: f64,
    pub dropped_events: f64,
    pub expired_events: f64,
    pub storage_policy: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Plugins {
    pub inputs: Vec<Plugin>,
    pub codecs: Vec<CodecPlugin>,
    pub filters: Vec<Plugin>,
    pub outputs: Vec<Plugin>,
}

/// Input, filter or output plugin stats.
///
/// `documents` and `bulk_requests` are only reported by outputs that batch
/// requests (e.g. elasticsearch).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Plugin {
    pub id: String,
    pub name: String,
    pub events: PluginEvents,
    pub flow: PluginFlow,
    pub documents: Option<Documents>,
    pub bulk_requests: Option<BulkRequests>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginEvents {
    #[serde(rename = "in")]
    pub events_in: f64,
    pub out: f64,
    pub duration_in_millis: f64,
    pub queue_push_duration_in_millis: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginFlow {
    pub throughput: Option<FlowMetric>,
    pub worker_utilization: Option<FlowMetric>,
    pub worker_millis_per_event: Option<FlowMetric>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Documents {
    pub successes: f64,
    pub non_retryable_failures: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkRequests {
    pub successes: f64,
    pub with_errors: f64,
    /// Count per HTTP status code, keyed by the code as reported.
    pub responses: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecPlugin {
    pub id: String,
    pub name: String,
    pub decode: CodecDecode,
    pub encode: CodecEncode,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecDecode {
    pub writes_in: f64,
    pub out: f64,
    pub duration_in_millis: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecEncode {
    pub writes_in: f64,
    pub duration_in_millis: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = include_str!("../../tests/fixtures/node_stats.json");

    #[test]
    fn test_deserialize_fixture() {
        let stats: NodeStatsResponse = serde_json::from_str(FIXTURE).unwrap();

        assert_eq!(stats.status, "green");
        assert_eq!(stats.jvm.threads.count, 60.0);
        assert_eq!(stats.jvm.mem.heap_max_in_bytes, 1_037_959_168.0);
        assert_eq!(stats.jvm.mem.pools.len(), 3);
        assert_eq!(stats.jvm.gc.collectors["old"].collection_count, 3.0);
        assert_eq!(stats.process.cpu.load_average.as_ref().unwrap().five_minutes, 0.76);
        assert_eq!(stats.events.events_in, 4001.0);
        assert_eq!(stats.pipelines.len(), 2);

        let main = &stats.pipelines["main"];
        assert_eq!(main.events.events_in, 3751.0);
        assert_eq!(main.plugins.inputs.len(), 1);
        assert_eq!(main.plugins.codecs.len(), 2);
        assert_eq!(main.plugins.filters.len(), 2);
        assert_eq!(main.plugins.outputs.len(), 1);
        assert_eq!(main.queue.queue_type, "memory");
        assert!(main.reloads.last_success_timestamp.is_some());
        assert!(main.reloads.last_failure_timestamp.is_none());

        let output = &main.plugins.outputs[0];
        let bulk = output.bulk_requests.as_ref().unwrap();
        assert_eq!(bulk.responses["200"], 87.0);
        assert_eq!(output.documents.as_ref().unwrap().successes, 1337.0);
    }

    #[test]
    fn test_fixture_infinity_flow_values() {
        let stats: NodeStatsResponse = serde_json::from_str(FIXTURE).unwrap();

        let node_input = stats.flow.input_throughput.unwrap();
        assert_eq!(node_input.current.value(), f64::INFINITY);
        assert_eq!(node_input.lifetime.value(), 117.4);

        let backpressure = stats.flow.queue_backpressure.unwrap();
        assert_eq!(backpressure.current.value(), f64::NEG_INFINITY);
    }

    #[test]
    fn test_fixture_reserialize_preserves_values() {
        let stats: NodeStatsResponse = serde_json::from_str(FIXTURE).unwrap();
        let json = serde_json::to_string(&stats).unwrap();
        let again: NodeStatsResponse = serde_json::from_str(&json).unwrap();

        assert_eq!(stats, again);
        assert!(json.contains("\"current\":\"Infinity\""));
        assert!(json.contains("\"current\":\"-Infinity\""));
    }

    #[test]
    fn test_invalid_flow_strings_fail() {
        for bad in ["\"-infinity\"", "\"--Infinity\"", "\"13.3\""] {
            let json = format!(r#"{{"flow": {{"input_throughput": {{"current": {bad}, "lifetime": 1}}}}}}"#);
            let result: Result<NodeStatsResponse, _> = serde_json::from_str(&json);
            assert!(result.is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_empty_document() {
        let stats: NodeStatsResponse = serde_json::from_str("{}").unwrap();
        assert!(stats.pipelines.is_empty());
        assert!(stats.flow.input_throughput.is_none());
    }
}
