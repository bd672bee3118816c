//! Bridge runner for lifecycle management.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;

use nerves_common::ssdp;
use nerves_common::{LoggingConfig, init_tracing};

use crate::BridgeArgs;
use crate::advertiser::{Advertiser, PingApi, advertise_host};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::service::{BridgeApi, BridgeBackend};

/// How long `run` waits for tasks after signalling shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Runner that manages the lifecycle of a bridge or hub.
///
/// Handles:
/// - Logging initialization
/// - Serving `BridgeService` and `PingService` over gRPC
/// - SSDP advertisement
/// - Task spawning and graceful shutdown on Ctrl+C / SIGTERM
///
/// # Example
///
/// ```ignore
/// use nerves_bridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let args = BridgeArgs::parse_with_default("mybridge.json5");
///     let config = MyBridgeConfig::load(&args.config)?;
///
///     let mut runner = BridgeRunner::new_with_args("mybridge", config, Some(&args))?;
///     let service = Arc::new(SyncBridgeService::new(info, devices, MyDriver::open()?));
///
///     runner.serve(service.clone()).await?;
///     runner.advertise(service.bridge_id()).await?;
///     runner.run().await
/// }
/// ```
pub struct BridgeRunner<C: BridgeConfig> {
    /// Name used in logs.
    name: String,
    version: String,
    config: C,
    shutdown_tx: watch::Sender<bool>,
    /// Bound gRPC address once `serve` has run.
    local_addr: Option<SocketAddr>,
    tasks: Vec<JoinHandle<()>>,
}

impl<C: BridgeConfig> BridgeRunner<C> {
    /// Create a runner and initialize logging from the configuration.
    pub fn new(name: impl Into<String>, config: C) -> Result<Self> {
        Self::new_with_args(name, config, None)
    }

    /// Create a runner with CLI args for log level override.
    pub fn new_with_args(
        name: impl Into<String>,
        config: C,
        args: Option<&BridgeArgs>,
    ) -> Result<Self> {
        let log_config = match args.and_then(|a| a.log_level.as_ref()) {
            Some(level) => LoggingConfig {
                level: level.clone(),
                format: config.logging().format,
            },
            None => config.logging().clone(),
        };

        init_tracing(&log_config).map_err(|e| BridgeError::config(e.to_string()))?;

        Ok(Self::without_tracing(name, config))
    }

    /// Create a runner that leaves the global subscriber alone.
    pub fn without_tracing(name: impl Into<String>, config: C) -> Self {
        let name = name.into();
        let version = env!("CARGO_PKG_VERSION").to_string();
        let (shutdown_tx, _) = watch::channel(false);

        tracing::info!(bridge = %name, version = %version, "Starting");

        Self {
            name,
            version,
            config,
            shutdown_tx,
            local_addr: None,
            tasks: Vec::new(),
        }
    }

    /// Get the bridge name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the bridge version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Get a reference to the configuration.
    pub fn config(&self) -> &C {
        &self.config
    }

    /// Address the gRPC server is bound to, once serving.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// A receiver that flips to `true` when shutdown begins.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Bind the configured listen address and serve `backend` until shutdown.
    pub async fn serve<B: BridgeBackend>(&mut self, backend: Arc<B>) -> Result<SocketAddr> {
        let listen = &self.config.server().listen;
        let addr: SocketAddr = listen
            .parse()
            .map_err(|e| BridgeError::address(listen.as_str(), e))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| BridgeError::with_context(format!("Failed to bind {}", addr), e))?;
        let local_addr = listener.local_addr()?;
        self.local_addr = Some(local_addr);

        let mut shutdown = self.shutdown_signal();
        let router = Server::builder()
            .add_service(BridgeApi::new(backend).into_server())
            .add_service(PingApi.into_server());

        tracing::info!(listen = %local_addr, "gRPC server listening");

        self.spawn_with_error("grpc-server".to_string(), async move {
            router
                .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                    let _ = shutdown.wait_for(|stop| *stop).await;
                })
                .await
        });

        Ok(local_addr)
    }

    /// Start announcing `bridge_id` over SSDP, if discovery is enabled.
    ///
    /// Call after [`serve`](Self::serve) so the bound port is announced.
    pub async fn advertise(&mut self, bridge_id: &str) -> Result<()> {
        let discovery = self.config.discovery();
        if !discovery.enabled {
            tracing::info!("SSDP discovery disabled, not advertising");
            return Ok(());
        }

        let listen = match self.local_addr {
            Some(addr) => addr,
            None => {
                let listen = &self.config.server().listen;
                listen
                    .parse()
                    .map_err(|e| BridgeError::address(listen.as_str(), e))?
            }
        };
        let target: SocketAddr = discovery
            .multicast
            .parse()
            .map_err(|e| BridgeError::address(&discovery.multicast, e))?;

        let host = advertise_host(self.config.server(), listen, target);
        let location = ssdp::grpc_location(&host, listen.port());
        let advertiser = Advertiser::new(bridge_id, location, discovery).await?;

        let shutdown = self.shutdown_signal();
        self.spawn_with_error("advertiser".to_string(), advertiser.run(shutdown));
        Ok(())
    }

    /// Spawn a worker task.
    ///
    /// Workers should watch [`shutdown_signal`](Self::shutdown_signal); any
    /// still running after the grace period are aborted.
    pub fn spawn<F>(&mut self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        self.tasks.push(handle);
    }

    /// Spawn a worker task that returns a Result.
    ///
    /// Errors are logged automatically.
    pub fn spawn_with_error<F, E>(&mut self, name: String, future: F)
    where
        F: Future<Output = std::result::Result<(), E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            if let Err(e) = future.await {
                tracing::error!(worker = %name, error = %e, "Worker failed");
            }
        });
        self.tasks.push(handle);
    }

    /// Run until Ctrl+C or SIGTERM is received.
    pub async fn run(self) -> Result<()> {
        self.run_until(wait_for_signal()).await
    }

    /// Run until `stop` completes, then shut down.
    ///
    /// This will:
    /// 1. Flip the shutdown signal (the advertiser sends `ssdp:byebye`)
    /// 2. Wait up to five seconds for tasks to finish
    /// 3. Abort whatever is still running
    pub async fn run_until<F: Future<Output = ()>>(self, stop: F) -> Result<()> {
        tracing::info!(
            bridge = %self.name,
            tasks = self.tasks.len(),
            "Running. Press Ctrl+C to stop."
        );

        stop.await;

        tracing::info!(bridge = %self.name, "Shutting down");
        self.shutdown_tx.send_replace(true);

        let mut tasks = self.tasks;
        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            for task in tasks.iter_mut() {
                let _ = task.await;
            }
        })
        .await;

        if drained.is_err() {
            tracing::warn!(bridge = %self.name, "Tasks still running after grace period, aborting");
            for task in &tasks {
                task.abort();
            }
        }

        tracing::info!(bridge = %self.name, "Goodbye!");

        Ok(())
    }
}

async fn wait_for_signal() {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
            tracing::info!("Received Ctrl+C");
        }
        _ = async {
            #[cfg(unix)]
            {
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to listen for SIGTERM");
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            tracing::info!("Received SIGTERM");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nerves_common::{DiscoveryConfig, ServerConfig};
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct TestConfig {
        server: ServerConfig,
        discovery: DiscoveryConfig,
        logging: LoggingConfig,
    }

    impl BridgeConfig for TestConfig {
        fn server(&self) -> &ServerConfig {
            &self.server
        }

        fn discovery(&self) -> &DiscoveryConfig {
            &self.discovery
        }

        fn logging(&self) -> &LoggingConfig {
            &self.logging
        }
    }

    fn config() -> TestConfig {
        TestConfig {
            server: ServerConfig {
                listen: "127.0.0.1:0".into(),
                advertise_host: None,
            },
            discovery: DiscoveryConfig {
                enabled: false,
                ..Default::default()
            },
            logging: LoggingConfig::default(),
        }
    }

    #[tokio::test]
    async fn test_run_until_stops_workers() {
        let mut runner = BridgeRunner::without_tracing("test", config());
        let mut signal = runner.shutdown_signal();
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();

        runner.spawn(async move {
            let _ = signal.wait_for(|stop| *stop).await;
            let _ = done_tx.send(());
        });

        runner.run_until(async {}).await.unwrap();
        assert!(done_rx.await.is_ok());
    }

    #[tokio::test]
    async fn test_advertise_disabled_spawns_nothing() {
        let mut runner = BridgeRunner::without_tracing("test", config());
        runner.advertise("x10-bridge").await.unwrap();
        assert!(runner.tasks.is_empty());
    }
}
