use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use super::{CollectError, Collector};
use crate::client::ScrapeContext;
use crate::metrics::{Desc, DescHelper, MetricKind, MetricSender, NAMESPACE};

/// Version metadata of this build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildInfo {
    pub version: &'static str,
    pub git_commit: &'static str,
    pub build_date: &'static str,
}

impl BuildInfo {
    /// `GIT_COMMIT` and `BUILD_DATE` are read from the build environment.
    pub const fn current() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            git_commit: match option_env!("GIT_COMMIT") {
                Some(commit) => commit,
                None => "unknown",
            },
            build_date: match option_env!("BUILD_DATE") {
                Some(date) => date,
                None => "unknown",
            },
        }
    }
}

/// Exporter build info and liveness; carries no instance labels.
pub struct SelfInfoCollector {
    build_info: Arc<Desc>,
    self_up: Arc<Desc>,
}

impl SelfInfoCollector {
    pub fn new() -> Self {
        let h = DescHelper::new(NAMESPACE, "exporter");
        Self {
            build_info: h.global(
                "build_info",
                "A metric with a constant '1' value labeled by version, git commit and build date of the exporter.",
                MetricKind::Gauge,
                &["version", "git_commit", "build_date"],
            ),
            self_up: h.global(
                "self_up",
                "Whether the exporter is up (always 1).",
                MetricKind::Gauge,
                &[],
            ),
        }
    }
}

impl Default for SelfInfoCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Collector for SelfInfoCollector {
    async fn collect(&self, _ctx: &ScrapeContext, tx: MetricSender) -> Result<(), CollectError> {
        let info = BuildInfo::current();

        let build = self
            .build_info
            .metric(1.0, &[info.version, info.git_commit, info.build_date])?;
        tx.send(build).await.map_err(|_| CollectError::ReceiverDropped)?;

        let up = self.self_up.metric(1.0, &[])?;
        tx.send(up).await.map_err(|_| CollectError::ReceiverDropped)
    }
}
