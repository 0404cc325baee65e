use std::net::SocketAddr;

use axum::routing::MethodRouter;
use axum::Router;
use error_stack::{Result, ResultExt};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::api::DemoApi;

pub const METRICS_ROUTE: &str = "/metrics";

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to start http server")]
    Start,
    #[error("http server failed while running")]
    WhileRunning,
    #[error("failed to check server bind address")]
    SocketAddr,
}

/// Where the server should accept connections: an address to bind, or a listener
/// that is already bound (e.g. to an OS-assigned port).
pub enum TcpConnector {
    Address(SocketAddr),
    Listener(TcpListener),
}

impl TcpConnector {
    pub async fn connect(self) -> Result<TcpListener, Error> {
        match self {
            TcpConnector::Address(addr) => TcpListener::bind(addr)
                .await
                .change_context(Error::Start)
                .attach_printable(addr),
            TcpConnector::Listener(listener) => Ok(listener),
        }
    }
}

impl From<SocketAddr> for TcpConnector {
    fn from(addr: SocketAddr) -> Self {
        TcpConnector::Address(addr)
    }
}

impl From<TcpListener> for TcpConnector {
    fn from(listener: TcpListener) -> Self {
        TcpConnector::Listener(listener)
    }
}

/// Serves the demo API routes together with the metrics scrape endpoint.
pub struct Server {
    router: Router,
    tcp_connector: TcpConnector,
}

impl Server {
    pub fn new(
        tcp_connector: impl Into<TcpConnector>,
        api: &DemoApi,
        metrics: MethodRouter,
    ) -> Self {
        let router = api.router().route(METRICS_ROUTE, metrics);

        Self {
            router,
            tcp_connector: tcp_connector.into(),
        }
    }

    /// Accepts connections until the token is cancelled, then finishes in-flight
    /// requests and returns. Every request is handled on its own task.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), Error> {
        let listener = self.tcp_connector.connect().await?;

        info!(
            address = listener
                .local_addr()
                .change_context(Error::SocketAddr)?
                .to_string(),
            "starting http server"
        );

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                cancel.cancelled().await;
                info!("shutting down http server")
            })
            .await
            .change_context(Error::WhileRunning)
    }
}
