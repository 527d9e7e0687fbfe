//! # Server Lifecycle
//!
//! [`Minihull`] owns one [`Platform`] and the HTTP listener serving it.
//! `listen` binds and serves in the background; `close` stops accepting
//! connections and waits for the server task, leaving already spawned
//! notification deliveries to finish on their own.

use crate::api::create_router;
use crate::config::Config;
use crate::platform::Platform;
use minihull_core::MinihullError;
use std::net::SocketAddr;
use std::ops::Deref;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;

struct Running {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<Result<(), std::io::Error>>,
}

/// A mock platform instance with its HTTP server.
pub struct Minihull {
    platform: Platform,
    host: String,
    running: Mutex<Option<Running>>,
}

impl Minihull {
    pub fn new(config: Config) -> Self {
        Self {
            platform: Platform::new(&config),
            host: config.host,
            running: Mutex::new(None),
        }
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    /// Bind `host:port` and start serving. Port `0` picks a free port;
    /// the organization address follows the port actually bound.
    pub async fn listen(&self, port: u16) -> Result<SocketAddr, MinihullError> {
        let mut running = self.running.lock().await;
        if let Some(current) = running.as_ref() {
            return Err(MinihullError::InvalidArguments(format!(
                "already listening on {}",
                current.addr
            )));
        }

        let bind = format!("{}:{}", self.host, port);
        let listener = tokio::net::TcpListener::bind(&bind)
            .await
            .map_err(|e| MinihullError::IoError(format!("Bind failed on {}: {}", bind, e)))?;
        let addr = listener
            .local_addr()
            .map_err(|e| MinihullError::IoError(format!("No local address: {}", e)))?;
        self.platform.address().set_port(addr.port());

        let router = create_router(self.platform.clone());
        let (shutdown, signal) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    // A dropped sender also shuts the server down.
                    let _ = signal.await;
                })
                .await
        });

        tracing::info!(
            %addr,
            organization = %self.platform.org_addr(),
            "minihull listening"
        );
        *running = Some(Running {
            addr,
            shutdown,
            task,
        });
        Ok(addr)
    }

    /// Address the server is bound to, while listening.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|r| r.addr)
    }

    /// Stop accepting connections and wait for open ones to finish.
    ///
    /// Closing a server that is not listening does nothing.
    pub async fn close(&self) -> Result<(), MinihullError> {
        let Some(running) = self.running.lock().await.take() else {
            return Ok(());
        };
        // The server may already have stopped on its own.
        let _ = running.shutdown.send(());
        match running.task.await {
            Ok(Ok(())) => {
                tracing::info!(addr = %running.addr, "minihull closed");
                Ok(())
            }
            Ok(Err(e)) => Err(MinihullError::IoError(format!("Server error: {}", e))),
            Err(e) => Err(MinihullError::IoError(format!("Server task failed: {}", e))),
        }
    }
}

impl Deref for Minihull {
    type Target = Platform;

    fn deref(&self) -> &Platform {
        &self.platform
    }
}
