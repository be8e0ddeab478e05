//! Startup and hot-reload orchestration.
//!
//! The [`StartupManager`] owns one generation at a time: the configuration,
//! the [`CollectorManager`] built from it and the HTTP server exposing it.
//! A reload tears the whole generation down and builds the next one under a
//! single async lock.

use std::future::Future;
use std::net::SocketAddr;
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use logstash_exporter_common::init_tracing;

use crate::client::ClientError;
use crate::config::{ConfigError, ConfigManager, ExporterConfig, ServerConfig};
use crate::http::{HttpServer, ServerError};
use crate::manager::CollectorManager;
use crate::registry::{MetricsRegistry, RegistryError, ScrapeCollector};
use crate::watcher::{DEFAULT_WATCH_INTERVAL, FileWatcher};

/// Time a stopping server gets to drain its connections before being aborted.
const SERVER_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Fatal startup and reload errors.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("config is nil")]
    NilConfig,

    #[error("failed to create clients: {0}")]
    Client(#[from] ClientError),

    #[error("failed to register collector manager: {0}")]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Server(#[from] ServerError),
}

/// Process-level settings that do not come from the config file.
#[derive(Debug, Clone)]
pub struct StartupOptions {
    pub config_path: PathBuf,
    /// Reload automatically when the config file changes.
    pub watch: bool,
    pub watch_interval: Duration,
    /// Overrides `logging.level` from the config file.
    pub log_level: Option<String>,
}

impl StartupOptions {
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            watch: false,
            watch_interval: DEFAULT_WATCH_INTERVAL,
            log_level: None,
        }
    }
}

struct RunningServer {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
    addr: SocketAddr,
}

#[derive(Default)]
struct State {
    collector_manager: Option<Arc<CollectorManager>>,
    server: Option<RunningServer>,
}

pub struct StartupManager {
    options: StartupOptions,
    config: ConfigManager,
    registry: Arc<MetricsRegistry>,
    state: Mutex<State>,
    errors_tx: mpsc::UnboundedSender<StartupError>,
    errors_rx: Mutex<mpsc::UnboundedReceiver<StartupError>>,
    watcher: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl StartupManager {
    pub fn new(options: StartupOptions) -> Arc<Self> {
        Self::with_registry(options, Arc::new(MetricsRegistry::new()))
    }

    pub fn with_registry(options: StartupOptions, registry: Arc<MetricsRegistry>) -> Arc<Self> {
        let (errors_tx, errors_rx) = mpsc::unbounded_channel();

        Arc::new(Self {
            config: ConfigManager::new(options.config_path.clone()),
            options,
            registry,
            state: Mutex::new(State::default()),
            errors_tx,
            errors_rx: Mutex::new(errors_rx),
            watcher: parking_lot::Mutex::new(None),
        })
    }

    pub fn registry(&self) -> &Arc<MetricsRegistry> {
        &self.registry
    }

    /// Current configuration snapshot, once loaded.
    pub fn config(&self) -> Option<ExporterConfig> {
        self.config.current()
    }

    /// Address of the running server.
    pub async fn server_addr(&self) -> Option<SocketAddr> {
        self.state.lock().await.server.as_ref().map(|s| s.addr)
    }

    /// Collector manager of the current generation.
    pub async fn collector_manager(&self) -> Option<Arc<CollectorManager>> {
        self.state.lock().await.collector_manager.clone()
    }

    /// Start, then block until `shutdown` resolves or a fatal error occurs.
    pub async fn initialize<F>(self: &Arc<Self>, shutdown: F) -> Result<(), StartupError>
    where
        F: Future<Output = ()>,
    {
        self.start().await?;

        let mut errors = self.errors_rx.lock().await;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    self.shutdown().await;
                    return Ok(());
                }
                Some(err) = errors.recv() => match err {
                    StartupError::Server(ServerError::Closed) if self.options.watch => {
                        info!("Server closed, expecting a new one from reload");
                    }
                    err => {
                        error!(error = %err, "Fatal error");
                        self.shutdown().await;
                        return Err(err);
                    }
                },
            }
        }
    }

    /// Load the config, set up logging, register collectors and start serving.
    pub async fn start(self: &Arc<Self>) -> Result<(), StartupError> {
        let mut state = self.state.lock().await;

        self.config.load_and_compare()?;
        let config = self.config.current().ok_or(StartupError::NilConfig)?;

        let mut logging = config.logging.clone();
        if let Some(level) = &self.options.log_level {
            logging.level = level.clone();
        }
        if let Err(e) = init_tracing(&logging) {
            debug!(error = %e, "Logging already initialized");
        }

        info!(
            version = env!("CARGO_PKG_VERSION"),
            config = %self.options.config_path.display(),
            instances = config.logstash.instances.len(),
            "Starting Logstash exporter"
        );

        let manager = build_manager(&config)?;
        self.activate(&mut state, manager, &config).await?;
        drop(state);

        if self.options.watch {
            self.spawn_watcher();
        }

        Ok(())
    }

    /// Rebuild collectors and server if the config file changed.
    ///
    /// Returns whether a new generation was started.
    pub async fn reload(&self) -> Result<bool, StartupError> {
        let mut state = self.state.lock().await;

        let previous = self.config.current();
        if !self.config.load_and_compare()? {
            debug!("Config unchanged, skipping reload");
            return Ok(false);
        }
        let config = self.config.current().ok_or(StartupError::NilConfig)?;

        info!(
            instances = config.logstash.instances.len(),
            "Config changed, reloading"
        );

        // New clients must build before the running generation is torn down.
        let manager = match build_manager(&config) {
            Ok(manager) => manager,
            Err(e) => {
                self.config.restore(previous);
                return Err(e);
            }
        };

        self.deactivate(&mut state).await;
        self.activate(&mut state, manager, &config).await?;

        info!("Reload complete");
        Ok(true)
    }

    /// Unregister the collectors and stop the server. Safe to call twice.
    pub async fn shutdown(&self) {
        let watcher = self.watcher.lock().take();
        if let Some(watcher) = watcher {
            watcher.abort();
        }

        let mut state = self.state.lock().await;
        self.deactivate(&mut state).await;
    }

    async fn activate(
        &self,
        state: &mut State,
        manager: Arc<CollectorManager>,
        config: &ExporterConfig,
    ) -> Result<(), StartupError> {
        let manager = match self.registry.register(manager.clone()) {
            Ok(()) => manager,
            Err(RegistryError::AlreadyRegistered { existing }) => {
                match Arc::clone(&existing).as_any().downcast::<CollectorManager>() {
                    Ok(existing) => {
                        warn!("Collector manager already registered, reusing it");
                        existing
                    }
                    Err(_) => return Err(RegistryError::AlreadyRegistered { existing }.into()),
                }
            }
            Err(e) => return Err(e.into()),
        };
        state.collector_manager = Some(manager);

        state.server = Some(self.start_server(&config.server).await?);
        Ok(())
    }

    async fn deactivate(&self, state: &mut State) {
        if let Some(manager) = state.collector_manager.take() {
            let manager: Arc<dyn ScrapeCollector> = manager;
            if !self.registry.unregister(&manager) {
                debug!("Collector manager was not registered");
            }
        }

        if let Some(server) = state.server.take() {
            stop_server(server).await;
        }
    }

    async fn start_server(&self, config: &ServerConfig) -> Result<RunningServer, StartupError> {
        let server = HttpServer::bind(config, Arc::clone(&self.registry)).await?;
        let addr = server.local_addr();

        let (shutdown, shutdown_rx) = watch::channel(false);
        let errors = self.errors_tx.clone();
        let handle = tokio::spawn(async move {
            let err = match server.run(shutdown_rx).await {
                Ok(()) => ServerError::Closed,
                Err(e) => e,
            };
            let _ = errors.send(StartupError::Server(err));
        });

        info!(%addr, path = %config.metrics_path, "Serving metrics");
        Ok(RunningServer {
            shutdown,
            handle,
            addr,
        })
    }

    fn spawn_watcher(self: &Arc<Self>) {
        let watcher = FileWatcher::new(
            self.options.config_path.clone(),
            self.options.watch_interval,
        );
        let manager = Arc::downgrade(self);

        let handle = tokio::spawn(watcher.run(move || {
            let manager = manager.clone();
            async move {
                let Some(manager) = manager.upgrade() else {
                    return ControlFlow::Break(());
                };

                match manager.reload().await {
                    Ok(_) => {}
                    Err(e @ (StartupError::Config(_) | StartupError::Client(_))) => {
                        warn!(error = %e, "Rejected config change, keeping current configuration");
                    }
                    Err(e) => {
                        error!(error = %e, "Reload failed");
                        let _ = manager.errors_tx.send(e);
                    }
                }
                ControlFlow::Continue(())
            }
        }));

        let previous = self.watcher.lock().replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }
}

fn build_manager(config: &ExporterConfig) -> Result<Arc<CollectorManager>, StartupError> {
    let manager = CollectorManager::new(&config.logstash.instances, config.logstash.http_timeout)?;
    Ok(Arc::new(manager))
}

async fn stop_server(server: RunningServer) {
    let RunningServer {
        shutdown,
        mut handle,
        addr,
    } = server;

    let _ = shutdown.send(true);
    if tokio::time::timeout(SERVER_SHUTDOWN_GRACE, &mut handle)
        .await
        .is_err()
    {
        warn!(%addr, "Server did not stop in time, aborting");
        handle.abort();
    }
}
