//! Response of the Logstash node info API (`GET /`).

use serde::{Deserialize, Serialize};

/// Node identity, build and pipeline settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeInfoResponse {
    pub host: String,
    pub version: String,
    pub http_address: String,
    pub id: String,
    pub name: String,
    pub ephemeral_id: String,
    pub status: String,
    pub snapshot: bool,
    pub pipeline: PipelineSettings,
    pub build_date: String,
    pub build_sha: String,
    pub build_snapshot: bool,
}

/// Default pipeline settings of the node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub workers: i64,
    pub batch_size: i64,
    pub batch_delay: i64,
}

impl NodeInfoResponse {
    /// Whether the reported status counts as up (`green` or `yellow`).
    pub fn is_up(&self) -> bool {
        matches!(self.status.as_str(), "green" | "yellow")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_node_info() {
        let json = r#"{
            "host": "logstash-0",
            "version": "8.12.0",
            "http_address": "0.0.0.0:9600",
            "id": "a1b2",
            "name": "logstash-0",
            "ephemeral_id": "e1",
            "status": "green",
            "snapshot": false,
            "pipeline": {"workers": 4, "batch_size": 125, "batch_delay": 50},
            "build_date": "2024-01-10T10:00:00Z",
            "build_sha": "deadbeef",
            "build_snapshot": false
        }"#;

        let info: NodeInfoResponse = serde_json::from_str(json).unwrap();
        assert_eq!(info.version, "8.12.0");
        assert_eq!(info.pipeline.workers, 4);
        assert!(info.is_up());
    }

    #[test]
    fn test_status_mapping() {
        let mut info = NodeInfoResponse::default();
        for (status, up) in [("green", true), ("yellow", true), ("red", false), ("", false)] {
            info.status = status.to_string();
            assert_eq!(info.is_up(), up, "status {status:?}");
        }
    }

    #[test]
    fn test_missing_fields_default() {
        let info: NodeInfoResponse = serde_json::from_str(r#"{"status": "yellow"}"#).unwrap();
        assert_eq!(info.pipeline.batch_size, 0);
        assert!(info.is_up());
    }
}
