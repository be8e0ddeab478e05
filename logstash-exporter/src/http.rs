//! HTTP server for the metrics, health and version endpoints.

use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use hyper_util::service::TowerToHyperService;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use crate::collectors::BuildInfo;
use crate::config::{ServerConfig, ServerTlsConfig};
use crate::exposition;
use crate::registry::MetricsRegistry;

/// HTTP server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The server stopped after a shutdown request.
    #[error("server closed")]
    Closed,

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP server error: {0}")]
    Serve(#[source] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(String),
}

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    registry: Arc<MetricsRegistry>,
}

/// Create the HTTP router.
fn create_router(registry: Arc<MetricsRegistry>, metrics_path: &str) -> Router {
    let state = AppState { registry };

    Router::new()
        .route(metrics_path, get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Handler for the metrics endpoint.
async fn metrics_handler(State(state): State<AppState>) -> Response {
    let body = state.registry.gather().await;

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, exposition::CONTENT_TYPE)],
        body,
    )
        .into_response()
}

/// Handler for the /health endpoint.
async fn health_handler() -> Response {
    (StatusCode::OK, "healthy").into_response()
}

/// Handler for the /version endpoint.
async fn version_handler() -> Json<BuildInfo> {
    Json(BuildInfo::current())
}

/// Bound HTTP(S) server, ready to run.
pub struct HttpServer {
    listener: TcpListener,
    router: Router,
    tls: Option<TlsAcceptor>,
    local_addr: SocketAddr,
}

impl HttpServer {
    /// Load TLS material and bind the listener.
    pub async fn bind(config: &ServerConfig, registry: Arc<MetricsRegistry>) -> Result<Self, ServerError> {
        let tls = config.tls.as_ref().map(load_tls_acceptor).transpose()?;

        let addr = format!("{}:{}", config.host, config.port);
        let listener = TcpListener::bind((config.host.as_str(), config.port))
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { addr, source })?;

        Ok(Self {
            listener,
            router: create_router(registry, &config.metrics_path),
            tls,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve until the shutdown flag flips to `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), ServerError> {
        let addr = self.local_addr;

        match self.tls {
            Some(acceptor) => {
                info!(%addr, "HTTPS server listening");
                serve_tls(self.listener, self.router, acceptor, shutdown).await?;
            }
            None => {
                info!(%addr, "HTTP server listening");
                axum::serve(self.listener, self.router)
                    .with_graceful_shutdown(async move {
                        wait_for_shutdown(&mut shutdown).await;
                        info!(%addr, "HTTP server shutting down");
                    })
                    .await
                    .map_err(ServerError::Serve)?;
            }
        }

        info!(%addr, "HTTP server stopped");
        Ok(())
    }
}

/// Resolve once the flag is `true` or the sender is gone.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

async fn serve_tls(
    listener: TcpListener,
    router: Router,
    acceptor: TlsAcceptor,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ServerError> {
    let builder = Arc::new(ConnBuilder::new(TokioExecutor::new()));
    let mut connections = JoinSet::new();

    loop {
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "Failed to accept connection");
                    continue;
                }
            },
            _ = wait_for_shutdown(&mut shutdown) => break,
        };

        let acceptor = acceptor.clone();
        let router = router.clone();
        let builder = Arc::clone(&builder);
        let mut conn_shutdown = shutdown.clone();

        connections.spawn(async move {
            let stream = match acceptor.accept(stream).await {
                Ok(stream) => stream,
                Err(e) => {
                    debug!(%peer, error = %e, "TLS handshake failed");
                    return;
                }
            };

            let conn = builder.serve_connection(TokioIo::new(stream), TowerToHyperService::new(router));
            tokio::pin!(conn);

            let mut shutting_down = false;
            loop {
                tokio::select! {
                    result = conn.as_mut() => {
                        if let Err(e) = result {
                            debug!(%peer, error = %e, "Connection error");
                        }
                        break;
                    }
                    _ = wait_for_shutdown(&mut conn_shutdown), if !shutting_down => {
                        shutting_down = true;
                        conn.as_mut().graceful_shutdown();
                    }
                }
            }
        });

        while connections.try_join_next().is_some() {}
    }

    drop(listener);
    info!("HTTPS server shutting down");
    while connections.join_next().await.is_some() {}
    Ok(())
}

fn load_tls_acceptor(tls: &ServerTlsConfig) -> Result<TlsAcceptor, ServerError> {
    let (Some(cert_file), Some(key_file)) = (&tls.cert_file, &tls.key_file) else {
        return Err(ServerError::Tls(
            "both certFile and keyFile are required".to_string(),
        ));
    };

    let certs = load_certs(cert_file)?;
    let key = load_private_key(key_file)?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| ServerError::Tls(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ServerError::Tls(e.to_string()))?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn open_pem(path: &Path) -> Result<BufReader<File>, ServerError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| ServerError::Tls(format!("failed to open {}: {}", path.display(), e)))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ServerError> {
    let mut reader = open_pem(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ServerError::Tls(format!("invalid certificate in {}: {}", path.display(), e)))?;

    if certs.is_empty() {
        return Err(ServerError::Tls(format!(
            "no certificate found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, ServerError> {
    let mut reader = open_pem(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| ServerError::Tls(format!("invalid private key in {}: {}", path.display(), e)))?
        .ok_or_else(|| ServerError::Tls(format!("no private key found in {}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn make_router(path: &str) -> Router {
        create_router(Arc::new(MetricsRegistry::new()), path)
    }

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let router = make_router("/metrics");

        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let content_type = response.headers().get("content-type").unwrap();
        assert_eq!(content_type.to_str().unwrap(), exposition::CONTENT_TYPE);
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let response = make_router("/metrics")
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "healthy");
    }

    #[tokio::test]
    async fn test_version_endpoint() {
        let response = make_router("/metrics")
            .oneshot(Request::get("/version").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
        assert!(json.get("git_commit").is_some());
    }

    #[tokio::test]
    async fn test_custom_metrics_path() {
        let router = make_router("/prometheus/metrics");

        let response = router
            .clone()
            .oneshot(
                Request::get("/prometheus/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_bind_port_zero_and_shutdown() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..Default::default()
        };
        let server = HttpServer::bind(&config, Arc::new(MetricsRegistry::new()))
            .await
            .unwrap();
        let addr = server.local_addr();
        assert_ne!(addr.port(), 0);

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(server.run(rx));

        let body = reqwest::get(format!("http://{addr}/health"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, "healthy");

        tx.send(true).unwrap();
        let result = tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_bind_conflict() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..Default::default()
        };
        let first = HttpServer::bind(&config, Arc::new(MetricsRegistry::new()))
            .await
            .unwrap();

        let taken = ServerConfig {
            port: first.local_addr().port(),
            ..config
        };
        let err = HttpServer::bind(&taken, Arc::new(MetricsRegistry::new()))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ServerError::Bind { .. }));
    }

    #[tokio::test]
    async fn test_missing_tls_files() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            tls: Some(ServerTlsConfig {
                cert_file: Some("/nonexistent/server.pem".into()),
                key_file: Some("/nonexistent/server-key.pem".into()),
            }),
            ..Default::default()
        };

        let err = HttpServer::bind(&config, Arc::new(MetricsRegistry::new()))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ServerError::Tls(_)));
    }

    #[test]
    fn test_empty_certificate_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let err = load_certs(file.path()).unwrap_err();
        assert!(err.to_string().contains("no certificate found"));
    }
}
