pub mod api;
pub mod asyncutil;
pub mod background;
pub mod config;
pub mod jitter;
pub mod metrics;
pub mod server;

use api::DemoApi;
use asyncutil::task::{CancellableTask, Task, TaskError, TaskGroup};
use background::BackgroundTask;
use error_stack::{FutureExt, Result, ResultExt};
use server::Server;
use thiserror::Error;
use tokio::select;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;

pub async fn run(cfg: Config) -> Result<(), Error> {
    prepare_app(cfg)?.run(CancellationToken::new()).await
}

/// Creates the metrics registry and every component that records into it.
fn prepare_app(cfg: Config) -> Result<App, Error> {
    let Config {
        listen_addr,
        background_task,
    } = cfg;

    let mut registry = metrics::Registry::new();

    let api = DemoApi::new(&mut registry).change_context(Error::Metrics)?;
    let background_task =
        BackgroundTask::new(background_task, &mut registry).change_context(Error::Metrics)?;
    let server = Server::new(listen_addr, &api, metrics::endpoint(registry));

    Ok(App {
        server,
        background_task,
    })
}

struct App {
    server: Server,
    background_task: BackgroundTask,
}

impl App {
    async fn run(self, token: CancellationToken) -> Result<(), Error> {
        let Self {
            server,
            background_task,
        } = self;

        TaskGroup::new("demo-api")
            .add_task(
                "signal-listener",
                CancellableTask::create(wait_for_shutdown_signal),
            )
            .add_task(
                "http-server",
                CancellableTask::create(|token| {
                    server.run(token).change_context(Error::HttpServer)
                }),
            )
            .add_task(
                "background-task",
                CancellableTask::create(|token| async move {
                    background_task.run(token).await;
                    Ok(())
                }),
            )
            .run(token)
            .await
            .change_context(Error::AppFailure)
    }
}

async fn wait_for_shutdown_signal(token: CancellationToken) -> Result<(), Error> {
    let mut sigint = signal(SignalKind::interrupt()).change_context(Error::SignalHandler)?;
    let mut sigterm = signal(SignalKind::terminate()).change_context(Error::SignalHandler)?;

    select! {
        _ = sigint.recv() => {},
        _ = sigterm.recv() => {},
        _ = token.cancelled() => return Ok(()),
    }

    info!("signal received, waiting for program to exit gracefully");
    Ok(())
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to register metrics")]
    Metrics,
    #[error("http server failed")]
    HttpServer,
    #[error("failed to install signal handler")]
    SignalHandler,
    #[error("task execution failed")]
    Task(#[from] TaskError),
    #[error("app failed")]
    AppFailure,
}
