use std::time::{Duration, SystemTime, UNIX_EPOCH};

use error_stack::Result;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::gauge::Gauge;
use tokio::select;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::jitter::jittered;
use crate::metrics::{self, Registry};

/// Timing and failure behaviour of the simulated background job.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// Time between the starts of two consecutive runs, measured from the start of the loop
    pub interval: Duration,
    /// Minimum duration of a single run
    pub work_duration: Duration,
    /// Upper bound of the random extra time added to each run
    pub work_jitter: Duration,
    /// A run fails when a uniform sample from [0, 1) does not exceed this value
    pub failure_rate: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            work_duration: Duration::from_secs(1),
            work_jitter: Duration::from_millis(500),
            failure_rate: 0.3,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Outcome {
    Success,
    Failure,
}

#[derive(Clone, Debug)]
struct TaskMetrics {
    runs: Counter,
    failures: Counter,
    last_success: Gauge,
}

impl TaskMetrics {
    fn new() -> Self {
        Self {
            runs: Counter::default(),
            failures: Counter::default(),
            last_success: Gauge::default(),
        }
    }

    fn register(&self, registry: &mut Registry) -> Result<(), metrics::Error> {
        registry.register(
            "background_task_runs",
            "The total number of background task runs",
            self.runs.clone(),
        )?;
        registry.register(
            "background_task_failures",
            "The total number of background task failures",
            self.failures.clone(),
        )?;
        registry.register(
            "background_task_last_success_timestamp_seconds",
            "The Unix timestamp in seconds of the last successful background task run",
            self.last_success.clone(),
        )
    }

    fn record(&self, outcome: Outcome) {
        match outcome {
            Outcome::Success => self.record_success(),
            Outcome::Failure => {
                self.failures.inc();
            }
        }

        self.runs.inc();
    }

    // the gauge has a single writer, so the read-compare-set cannot race
    fn record_success(&self) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .ok()
            .and_then(|since_epoch| i64::try_from(since_epoch.as_secs()).ok());

        match now {
            Some(now) if now > self.last_success.get() => {
                self.last_success.set(now);
            }
            Some(_) => (),
            None => warn!("system clock is before the Unix epoch, last success time not updated"),
        }
    }
}

/// Periodic job that simulates work and records how each run went.
pub struct BackgroundTask {
    config: Config,
    metrics: TaskMetrics,
}

impl BackgroundTask {
    pub fn new(config: Config, registry: &mut Registry) -> Result<Self, metrics::Error> {
        let metrics = TaskMetrics::new();
        metrics.register(registry)?;

        Ok(Self { config, metrics })
    }

    /// Runs the job once per tick until the token is cancelled.
    ///
    /// The first run starts immediately. A run that takes longer than the interval
    /// makes the pending tick fire as soon as the run is done, and later ticks stay
    /// on the schedule measured from the loop start; missed ticks are never replayed.
    pub async fn run(self, token: CancellationToken) {
        info!("starting background task loop");

        let mut interval = time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            select! {
                _ = interval.tick() => {
                    let outcome = self.perform().await;
                    self.metrics.record(outcome);
                },
                _ = token.cancelled() => {
                    info!("background task loop exiting");

                    return
                },
            }
        }
    }

    async fn perform(&self) -> Outcome {
        info!("performing background task");
        time::sleep(jittered(self.config.work_duration, self.config.work_jitter)).await;

        if rand::random::<f64>() > self.config.failure_rate {
            info!("background task completed successfully");
            Outcome::Success
        } else {
            warn!("background task failed");
            Outcome::Failure
        }
    }
}
