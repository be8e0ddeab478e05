//! Prometheus exporter for Logstash.
//!
//! Polls the node info and node stats monitoring APIs of one or more Logstash
//! instances and exposes the values via an HTTP `/metrics` endpoint.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌──────────────────┐     ┌─────────────────┐
//! │    Logstash     │<────│ CollectorManager │<────│   HTTP Server   │
//! │ (/_node/stats)  │     │ (families × inst)│     │   (/metrics)    │
//! └─────────────────┘     └──────────────────┘     └─────────────────┘
//!                                   ^
//!                          StartupManager (reload)
//!                                   ^
//!                              FileWatcher
//! ```
//!
//! # Usage
//!
//! Run the exporter binary with a configuration file:
//!
//! ```bash
//! logstash-exporter --config config.yml --watch
//! ```
//!
//! # Configuration
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod client;
pub mod collectors;
pub mod config;
pub mod exposition;
pub mod http;
pub mod manager;
pub mod metrics;
pub mod registry;
pub mod responses;
pub mod startup;
pub mod watcher;

pub use client::{ClientError, HttpClient, LogstashClient, ScrapeContext};
pub use config::{ConfigManager, ExporterConfig, LogstashInstance};
pub use http::{HttpServer, ServerError};
pub use manager::CollectorManager;
pub use registry::{MetricsRegistry, RegistryError, ScrapeCollector};
pub use startup::{StartupError, StartupManager, StartupOptions};
pub use watcher::FileWatcher;
