//! HTTP client for the Logstash monitoring API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Certificate, Client, Identity, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

use crate::config::{BasicAuth, LogstashInstance};
use crate::responses::{NodeInfoResponse, NodeStatsResponse};

const NODE_INFO_PATH: &str = "/";
const NODE_STATS_PATH: &str = "/_node/stats";

/// Errors raised while talking to a Logstash instance.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to build client for {endpoint}: {message}")]
    Build { endpoint: String, message: String },

    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {url} returned status {status}")]
    Status { url: String, status: StatusCode },

    #[error("request to {url} exceeded the scrape deadline")]
    Timeout { url: String },

    #[error("failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Deadline shared by every upstream request of one scrape.
#[derive(Debug, Clone, Copy)]
pub struct ScrapeContext {
    deadline: Instant,
}

impl ScrapeContext {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now() + timeout,
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

/// Access to one Logstash node.
#[async_trait]
pub trait LogstashClient: Send + Sync {
    /// `GET /`
    async fn get_node_info(&self, ctx: &ScrapeContext) -> Result<NodeInfoResponse, ClientError>;

    /// `GET /_node/stats`
    async fn get_node_stats(&self, ctx: &ScrapeContext) -> Result<NodeStatsResponse, ClientError>;

    /// Base URL of the instance, used as the `hostname` label.
    fn endpoint(&self) -> &str;

    /// Display name, used as the `instance_name` label.
    fn name(&self) -> &str;
}

/// [`LogstashClient`] backed by reqwest.
pub struct HttpClient {
    http: Client,
    endpoint: String,
    name: String,
    basic_auth: Option<BasicAuth>,
}

impl HttpClient {
    /// Build a client from the instance's TLS and auth settings.
    pub fn new(instance: &LogstashInstance) -> Result<Self, ClientError> {
        let build_error = |message: String| ClientError::Build {
            endpoint: instance.host.clone(),
            message,
        };

        let mut builder = Client::builder().danger_accept_invalid_certs(instance.http_insecure);

        if let Some(tls) = &instance.tls {
            if let Some(ca_file) = &tls.ca_file {
                let pem = std::fs::read(ca_file).map_err(|e| {
                    build_error(format!("failed to read CA file {}: {}", ca_file.display(), e))
                })?;
                let certificate =
                    Certificate::from_pem(&pem).map_err(|e| build_error(e.to_string()))?;
                builder = builder.add_root_certificate(certificate);
            }

            if let (Some(cert_file), Some(key_file)) = (&tls.cert_file, &tls.key_file) {
                let mut pem = Vec::new();
                for file in [cert_file, key_file] {
                    let mut content = std::fs::read(file).map_err(|e| {
                        build_error(format!("failed to read {}: {}", file.display(), e))
                    })?;
                    pem.append(&mut content);
                    pem.push(b'\n');
                }
                let identity = Identity::from_pem(&pem).map_err(|e| build_error(e.to_string()))?;
                builder = builder.identity(identity);
            }
        }

        let http = builder.build().map_err(|e| build_error(e.to_string()))?;

        Ok(Self {
            http,
            endpoint: instance.host.clone(),
            name: instance.display_name(),
            basic_auth: instance.basic_auth.clone(),
        })
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        ctx: &ScrapeContext,
    ) -> Result<T, ClientError> {
        let url = format!("{}{}", self.endpoint.trim_end_matches('/'), path);

        let fetch = async {
            let mut request = self.http.get(&url);
            if let Some(auth) = &self.basic_auth {
                request = request.basic_auth(&auth.username, Some(&auth.password));
            }

            let response = request.send().await.map_err(|source| ClientError::Request {
                url: url.clone(),
                source,
            })?;

            let status = response.status();
            if !status.is_success() {
                return Err(ClientError::Status {
                    url: url.clone(),
                    status,
                });
            }

            let body = response.bytes().await.map_err(|source| ClientError::Request {
                url: url.clone(),
                source,
            })?;

            serde_json::from_slice(&body).map_err(|source| ClientError::Decode {
                url: url.clone(),
                source,
            })
        };

        let result = tokio::time::timeout_at(ctx.deadline(), fetch)
            .await
            .map_err(|_| ClientError::Timeout { url: url.clone() })?;

        if result.is_ok() {
            debug!(instance = %self.name, %url, "Fetched");
        }
        result
    }
}

#[async_trait]
impl LogstashClient for HttpClient {
    async fn get_node_info(&self, ctx: &ScrapeContext) -> Result<NodeInfoResponse, ClientError> {
        self.get(NODE_INFO_PATH, ctx).await
    }

    async fn get_node_stats(&self, ctx: &ScrapeContext) -> Result<NodeStatsResponse, ClientError> {
        self.get(NODE_STATS_PATH, ctx).await
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientTlsConfig;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ctx() -> ScrapeContext {
        ScrapeContext::with_timeout(Duration::from_secs(5))
    }

    #[test]
    fn test_name_defaults_to_sanitized_endpoint() {
        let client = HttpClient::new(&LogstashInstance::new("http://localhost:9600")).unwrap();
        assert_eq!(client.name(), "localhost_9600");
        assert_eq!(client.endpoint(), "http://localhost:9600");

        let client =
            HttpClient::new(&LogstashInstance::new("http://localhost:9600").with_name("main"))
                .unwrap();
        assert_eq!(client.name(), "main");
    }

    #[test]
    fn test_missing_ca_file_fails_build() {
        let mut instance = LogstashInstance::new("https://localhost:9600");
        instance.tls = Some(ClientTlsConfig {
            ca_file: Some("/nonexistent/ca.pem".into()),
            ..Default::default()
        });

        let err = HttpClient::new(&instance).err().unwrap();
        assert!(matches!(err, ClientError::Build { .. }));
    }

    #[tokio::test]
    async fn test_get_node_info() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"status": "green", "version": "8.12.0"}"#),
            )
            .mount(&server)
            .await;

        let client = HttpClient::new(&LogstashInstance::new(server.uri())).unwrap();
        let info = client.get_node_info(&ctx()).await.unwrap();

        assert_eq!(info.version, "8.12.0");
        assert!(info.is_up());
    }

    #[tokio::test]
    async fn test_basic_auth_header_sent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_node/stats"))
            .and(header("authorization", "Basic dXNlcjpwYXNz"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .mount(&server)
            .await;

        let mut instance = LogstashInstance::new(server.uri());
        instance.basic_auth = Some(BasicAuth {
            username: "user".to_string(),
            password: "pass".to_string(),
        });

        let client = HttpClient::new(&instance).unwrap();
        assert!(client.get_node_stats(&ctx()).await.is_ok());
    }

    #[tokio::test]
    async fn test_non_success_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = HttpClient::new(&LogstashInstance::new(server.uri())).unwrap();
        let err = client.get_node_info(&ctx()).await.unwrap_err();

        assert!(matches!(
            err,
            ClientError::Status {
                status: StatusCode::SERVICE_UNAVAILABLE,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_node/stats"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"flow": {"input_throughput": {"current": "--Infinity"}}}"#,
            ))
            .mount(&server)
            .await;

        let client = HttpClient::new(&LogstashInstance::new(server.uri())).unwrap();
        let err = client.get_node_stats(&ctx()).await.unwrap_err();

        assert!(matches!(err, ClientError::Decode { .. }));
    }

    #[tokio::test]
    async fn test_deadline_exceeded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("{}")
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let client = HttpClient::new(&LogstashInstance::new(server.uri())).unwrap();
        let ctx = ScrapeContext::with_timeout(Duration::from_millis(100));
        let err = client.get_node_info(&ctx).await.unwrap_err();

        assert!(matches!(err, ClientError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let client = HttpClient::new(&LogstashInstance::new("http://127.0.0.1:1")).unwrap();
        let err = client.get_node_info(&ctx()).await.unwrap_err();

        assert!(matches!(err, ClientError::Request { .. }));
    }
}
