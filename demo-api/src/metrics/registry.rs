use std::collections::HashSet;

use error_stack::{bail, Result};
use prometheus_client::encoding::text::encode;
use prometheus_client::registry::{Metric, Registry as PrometheusRegistry};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("metric {0} is already registered")]
    DuplicateMetric(String),
}

/// Collection of all metrics exposed by the daemon.
///
/// Names must be unique. A second registration under the same name is a
/// programming error and is reported as [`Error::DuplicateMetric`].
#[derive(Debug, Default)]
pub struct Registry {
    inner: PrometheusRegistry,
    names: HashSet<String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `metric` under `name`.
    ///
    /// Counters are exposed with a `_total` suffix, so they should be registered without one.
    pub fn register(
        &mut self,
        name: &str,
        help: &str,
        metric: impl Metric,
    ) -> Result<(), Error> {
        if !self.names.insert(name.to_string()) {
            bail!(Error::DuplicateMetric(name.to_string()));
        }

        self.inner.register(name, help, metric);
        Ok(())
    }

    /// Writes the current value of every registered metric to `buffer`.
    pub fn encode(&self, buffer: &mut String) -> std::fmt::Result {
        encode(buffer, &self.inner)
    }
}
