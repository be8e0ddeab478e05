//! Deserialized Logstash monitoring API documents.

mod infinity;
mod node_info;
mod node_stats;

pub use infinity::InfinityFloat;
pub use node_info::{NodeInfoResponse, PipelineSettings};
pub use node_stats::{
    BulkRequests, CodecDecode, CodecEncode, CodecPlugin, DeadLetterQueue, Documents, Events, Flow,
    FlowMetric, GcCollector, Jvm, JvmGc, JvmMem, JvmThreads, LoadAverage, MemPool, NodeQueue,
    NodeStatsResponse, PipelineQueue, Plugin, PluginEvents, PluginFlow, Plugins, Process,
    ProcessCpu, ProcessMem, Reloads, SinglePipelineResponse,
};
