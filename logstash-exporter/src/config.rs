//! Configuration for the Logstash exporter.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use logstash_exporter_common::config::duration;
use logstash_exporter_common::{LoggingConfig, load_config, name_from_endpoint, parse_config};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] logstash_exporter_common::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete exporter configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExporterConfig {
    /// Logstash instances to poll.
    #[serde(default)]
    pub logstash: LogstashConfig,

    /// HTTP server exposing the metrics.
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Upstream Logstash settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogstashConfig {
    #[serde(default)]
    pub instances: Vec<LogstashInstance>,

    /// Deadline for one whole scrape across every instance (default: 2s).
    #[serde(default = "default_http_timeout", with = "duration")]
    pub http_timeout: Duration,
}

fn default_http_timeout() -> Duration {
    Duration::from_secs(2)
}

impl Default for LogstashConfig {
    fn default() -> Self {
        Self {
            instances: Vec::new(),
            http_timeout: default_http_timeout(),
        }
    }
}

/// One Logstash node to poll.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogstashInstance {
    /// Base URL of the monitoring API, e.g. `http://localhost:9600`.
    pub host: String,

    /// Display name; derived from `host` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Skip TLS certificate verification.
    #[serde(default)]
    pub http_insecure: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basic_auth: Option<BasicAuth>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<ClientTlsConfig>,
}

impl LogstashInstance {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Configured name, or the sanitized host when none is set.
    pub fn display_name(&self) -> String {
        match self.name.as_deref() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => name_from_endpoint(&self.host),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicAuth {
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// Outbound TLS material for one instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientTlsConfig {
    /// Extra CA bundle trusted for the instance.
    #[serde(default)]
    pub ca_file: Option<PathBuf>,

    /// Client certificate, used together with `key_file`.
    #[serde(default)]
    pub cert_file: Option<PathBuf>,

    #[serde(default)]
    pub key_file: Option<PathBuf>,
}

/// HTTP server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Address to listen on (default: "0.0.0.0").
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on (default: 9198). Port 0 picks a free port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Path for metrics endpoint (default: "/metrics").
    #[serde(default = "default_metrics_path")]
    pub metrics_path: String,

    /// Serve over TLS when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<ServerTlsConfig>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9198
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            metrics_path: default_metrics_path(),
            tls: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerTlsConfig {
    #[serde(default)]
    pub cert_file: Option<PathBuf>,
    #[serde(default)]
    pub key_file: Option<PathBuf>,
}

impl ExporterConfig {
    /// Load and validate configuration from a YAML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: ExporterConfig = load_config(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ExporterConfig = parse_config(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.logstash.http_timeout.is_zero() {
            return Err(ConfigError::Validation(
                "httpTimeout must be > 0".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for instance in &self.logstash.instances {
            validate_host(&instance.host)?;

            let name = instance.display_name();
            if name.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "Cannot derive an instance name from host '{}'",
                    instance.host
                )));
            }
            if !names.insert(name.clone()) {
                return Err(ConfigError::Validation(format!(
                    "Duplicate instance name '{}'",
                    name
                )));
            }

            let partial_identity = instance
                .tls
                .as_ref()
                .is_some_and(|tls| tls.cert_file.is_some() != tls.key_file.is_some());
            if partial_identity {
                return Err(ConfigError::Validation(format!(
                    "Instance '{}': tls certFile and keyFile must be set together",
                    name
                )));
            }
        }

        if !self.server.metrics_path.starts_with('/') {
            return Err(ConfigError::Validation(
                "Metrics path must start with /".to_string(),
            ));
        }

        let partial_server_tls = self
            .server
            .tls
            .as_ref()
            .is_some_and(|tls| tls.cert_file.is_none() || tls.key_file.is_none());
        if partial_server_tls {
            return Err(ConfigError::Validation(
                "Server tls requires both certFile and keyFile".to_string(),
            ));
        }

        if self.logging.level.parse::<tracing::Level>().is_err() {
            return Err(ConfigError::Validation(format!(
                "Invalid log level: {}",
                self.logging.level
            )));
        }

        Ok(())
    }
}

fn validate_host(host: &str) -> Result<(), ConfigError> {
    let url = url::Url::parse(host)
        .map_err(|e| ConfigError::Validation(format!("Invalid instance host '{}': {}", host, e)))?;

    match url.scheme() {
        "http" | "https" if url.has_host() => Ok(()),
        _ => Err(ConfigError::Validation(format!(
            "Instance host '{}' must be an http or https URL",
            host
        ))),
    }
}

/// Holds the last loaded configuration and detects changes on reload.
pub struct ConfigManager {
    path: PathBuf,
    lock: Mutex<()>,
    current: RwLock<Option<ExporterConfig>>,
}

impl ConfigManager {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
            current: RwLock::new(None),
        }
    }

    /// Load the file and report whether it differs from the stored config.
    ///
    /// The first successful load always reports a change. On error the
    /// stored config is left untouched.
    pub fn load_and_compare(&self) -> Result<bool, ConfigError> {
        let _guard = self.lock.lock();

        let loaded = ExporterConfig::load_from_file(&self.path)?;

        let mut current = self.current.write();
        if current.as_ref() == Some(&loaded) {
            debug!(path = %self.path.display(), "Config unchanged");
            return Ok(false);
        }

        *current = Some(loaded);
        Ok(true)
    }

    /// Snapshot of the stored configuration.
    pub fn current(&self) -> Option<ExporterConfig> {
        self.current.read().clone()
    }

    /// Put back a previously stored config after a rejected change.
    pub fn restore(&self, previous: Option<ExporterConfig>) {
        let _guard = self.lock.lock();
        *self.current.write() = previous;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_minimal_config() {
        let config = ExporterConfig::parse("{}").unwrap();

        assert!(config.logstash.instances.is_empty());
        assert_eq!(config.logstash.http_timeout, Duration::from_secs(2));
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 9198);
        assert_eq!(config.server.metrics_path, "/metrics");
        assert!(config.server.tls.is_none());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
logstash:
  instances:
    - host: http://localhost:9600
      name: main
    - host: https://ls-2:9600
      httpInsecure: true
      basicAuth:
        username: elastic
        password: changeme
      tls:
        caFile: /etc/ssl/ca.pem
  httpTimeout: 500ms
server:
  host: 127.0.0.1
  port: 9200
  metricsPath: /prom
  tls:
    certFile: server.pem
    keyFile: server-key.pem
logging:
  level: debug
  format: json
"#;

        let config = ExporterConfig::parse(yaml).unwrap();

        assert_eq!(config.logstash.instances.len(), 2);
        assert_eq!(config.logstash.instances[0].display_name(), "main");
        let second = &config.logstash.instances[1];
        assert!(second.http_insecure);
        assert_eq!(second.basic_auth.as_ref().unwrap().username, "elastic");
        assert_eq!(
            second.tls.as_ref().unwrap().ca_file.as_deref(),
            Some(Path::new("/etc/ssl/ca.pem"))
        );
        assert_eq!(config.logstash.http_timeout, Duration::from_millis(500));
        assert_eq!(config.server.port, 9200);
        assert_eq!(config.server.metrics_path, "/prom");
        assert!(config.server.tls.is_some());
        assert_eq!(
            config.logging.format,
            logstash_exporter_common::LogFormat::Json
        );
    }

    #[test]
    fn test_display_name_defaults_to_sanitized_host() {
        let instance = LogstashInstance::new("http://localhost:9600");
        assert_eq!(instance.display_name(), "localhost_9600");

        let instance = LogstashInstance::new("http://localhost:9600").with_name("");
        assert_eq!(instance.display_name(), "localhost_9600");
    }

    #[test]
    fn test_validate_invalid_host() {
        for host in ["localhost:9600", "ftp://localhost", "not a url"] {
            let yaml = format!("logstash:\n  instances:\n    - host: \"{host}\"\n");
            let err = ExporterConfig::parse(&yaml).unwrap_err();
            assert!(matches!(err, ConfigError::Validation(_)), "{host}");
        }
    }

    #[test]
    fn test_validate_duplicate_names() {
        let yaml = r#"
logstash:
  instances:
    - host: http://localhost:9600
    - host: http://other:9600
      name: localhost_9600
"#;
        let err = ExporterConfig::parse(yaml).unwrap_err();
        assert!(err.to_string().contains("Duplicate instance name"));
    }

    #[test]
    fn test_validate_zero_timeout() {
        let err = ExporterConfig::parse("logstash:\n  httpTimeout: 0s\n").unwrap_err();
        assert!(err.to_string().contains("httpTimeout"));
    }

    #[test]
    fn test_validate_invalid_path() {
        let err = ExporterConfig::parse("server:\n  metricsPath: metrics\n").unwrap_err();
        assert!(err.to_string().contains("must start with /"));
    }

    #[test]
    fn test_validate_partial_server_tls() {
        let err = ExporterConfig::parse("server:\n  tls:\n    certFile: a.pem\n").unwrap_err();
        assert!(err.to_string().contains("certFile and keyFile"));
    }

    #[test]
    fn test_validate_log_level() {
        let err = ExporterConfig::parse("logging:\n  level: loud\n").unwrap_err();
        assert!(err.to_string().contains("Invalid log level"));
    }

    #[test]
    fn test_sample_config_is_valid() {
        let config = ExporterConfig::parse(include_str!("../../config.yml")).unwrap();
        assert_eq!(config.logstash.instances.len(), 1);
        assert_eq!(config.logstash.instances[0].display_name(), "logstash-local");
        assert_eq!(config.server.port, 9198);
    }

    #[test]
    fn test_load_and_compare() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "logstash:\n  instances:\n    - host: http://localhost:9600\n"
        )
        .unwrap();

        let manager = ConfigManager::new(file.path());
        assert!(manager.current().is_none());

        assert!(manager.load_and_compare().unwrap());
        let first = manager.current().unwrap();

        assert!(!manager.load_and_compare().unwrap());
        assert_eq!(manager.current().unwrap(), first);
    }

    #[test]
    fn test_load_and_compare_detects_order_change() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let a = "    - host: http://a:9600\n";
        let b = "    - host: http://b:9600\n";

        std::fs::write(file.path(), format!("logstash:\n  instances:\n{a}{b}")).unwrap();
        let manager = ConfigManager::new(file.path());
        assert!(manager.load_and_compare().unwrap());

        std::fs::write(file.path(), format!("logstash:\n  instances:\n{b}{a}")).unwrap();
        assert!(manager.load_and_compare().unwrap());
        assert_eq!(
            manager.current().unwrap().logstash.instances[0].host,
            "http://b:9600"
        );
    }

    #[test]
    fn test_load_error_keeps_current() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "server:\n  port: 9300\n").unwrap();

        let manager = ConfigManager::new(file.path());
        assert!(manager.load_and_compare().unwrap());

        std::fs::write(file.path(), "server: [not, a, map]\n").unwrap();
        assert!(manager.load_and_compare().is_err());
        assert_eq!(manager.current().unwrap().server.port, 9300);
    }

    #[test]
    fn test_restore_reverts_change() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "server:\n  port: 9300\n").unwrap();

        let manager = ConfigManager::new(file.path());
        assert!(manager.load_and_compare().unwrap());
        let previous = manager.current();

        std::fs::write(file.path(), "server:\n  port: 9400\n").unwrap();
        assert!(manager.load_and_compare().unwrap());
        manager.restore(previous);
        assert_eq!(manager.current().unwrap().server.port, 9300);

        // the rejected file counts as a change again
        assert!(manager.load_and_compare().unwrap());
    }
}
