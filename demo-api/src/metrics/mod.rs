//! Metrics registry and scrape endpoint
//!
//! Components register their metrics on a [`Registry`] while the daemon is being
//! assembled. Once everything is registered, the registry is frozen and handed to
//! [`endpoint`], which serves the current values in the OpenMetrics text format.
//!
//! Metric handles (counters, gauges, histogram families) are cheap to clone and
//! update atomically, so components keep their own clones and record directly
//! from any task.

mod endpoint;
mod registry;

pub use endpoint::endpoint;
pub use registry::{Error, Registry};
