//! Simulated API endpoints
//!
//! Both handlers stand in for real work by sleeping for a random duration, and every
//! call is timed by [`instrument`], which records the latency under the handler's label.

use std::fmt::Write;
use std::time::Duration;

use axum::routing::any;
use axum::Router;
use error_stack::Result;
use futures::future::BoxFuture;
use futures::FutureExt;
use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue, LabelValueEncoder};
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{linear_buckets, Histogram};
use tokio::time::{self, Instant};
use tracing::info;

use crate::jitter::jittered;
use crate::metrics::{self, Registry};

pub const FOO_ROUTE: &str = "/api/foo";
pub const BAR_ROUTE: &str = "/api/bar";

const FOO_LATENCY: Duration = Duration::from_millis(75);
const FOO_LATENCY_JITTER: Duration = Duration::from_millis(50);
const BAR_LATENCY: Duration = Duration::from_millis(150);
const BAR_LATENCY_JITTER: Duration = Duration::from_millis(100);

/// The operations served by the demo API. Each one is a separate series of the
/// request duration histogram.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum Handler {
    Foo,
    Bar,
}

impl Handler {
    pub fn as_str(&self) -> &'static str {
        match self {
            Handler::Foo => "foo",
            Handler::Bar => "bar",
        }
    }
}

impl EncodeLabelValue for Handler {
    fn encode(&self, encoder: &mut LabelValueEncoder) -> std::result::Result<(), std::fmt::Error> {
        encoder.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct HandlerLabel {
    handler: Handler,
}

/// Histogram of request latencies, one series per [`Handler`].
#[derive(Clone, Debug)]
pub struct RequestDurations {
    duration: Family<HandlerLabel, Histogram>,
}

impl Default for RequestDurations {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestDurations {
    pub fn new() -> Self {
        let duration = Family::<HandlerLabel, Histogram>::new_with_constructor(|| {
            Histogram::new(linear_buckets(0.05, 0.025, 10))
        });
        Self { duration }
    }

    pub fn register(&self, registry: &mut Registry) -> Result<(), metrics::Error> {
        registry.register(
            "some_api_http_request_duration_seconds",
            "A histogram of the demo API request durations in seconds",
            self.duration.clone(),
        )
    }

    fn record(&self, handler: Handler, duration: Duration) {
        self.duration
            .get_or_create(&HandlerLabel { handler })
            .observe(duration.as_secs_f64());
    }
}

/// Wraps `work` so that every invocation is timed and recorded as exactly one
/// observation under `handler`.
///
/// The wrapped work runs on its own task, so it is finished and recorded even when
/// the caller stops waiting for it (e.g. the client disconnects). The returned
/// closure can be used directly as an axum handler.
pub fn instrument<W, Fut>(
    durations: RequestDurations,
    handler: Handler,
    work: W,
) -> impl Fn() -> BoxFuture<'static, Fut::Output> + Clone + Send + Sync + 'static
where
    W: Fn() -> Fut + Clone + Send + Sync + 'static,
    Fut: std::future::Future + Send + 'static,
    Fut::Output: Send + 'static,
{
    move || {
        let durations = durations.clone();
        let work = work.clone();

        let timed = tokio::spawn(async move {
            let start = Instant::now();
            let response = work().await;
            durations.record(handler, start.elapsed());

            response
        });

        // the handle is never aborted, so a join error can only carry a panic
        async move {
            timed
                .await
                .unwrap_or_else(|err| std::panic::resume_unwind(err.into_panic()))
        }
        .boxed()
    }
}

/// The demo API: two simulated operations with their latency histogram.
pub struct DemoApi {
    request_durations: RequestDurations,
}

impl DemoApi {
    pub fn new(registry: &mut Registry) -> Result<Self, metrics::Error> {
        let request_durations = RequestDurations::new();
        request_durations.register(registry)?;

        Ok(Self { request_durations })
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route(
                FOO_ROUTE,
                any(instrument(self.request_durations.clone(), Handler::Foo, foo)),
            )
            .route(
                BAR_ROUTE,
                any(instrument(self.request_durations.clone(), Handler::Bar, bar)),
            )
    }
}

async fn foo() -> &'static str {
    info!(handler = Handler::Foo.as_str(), "handling request");
    time::sleep(jittered(FOO_LATENCY, FOO_LATENCY_JITTER)).await;

    "Handled foo"
}

async fn bar() -> &'static str {
    info!(handler = Handler::Bar.as_str(), "handling request");
    time::sleep(jittered(BAR_LATENCY, BAR_LATENCY_JITTER)).await;

    "Handled bar"
}

#[cfg(test)]
mod tests {
    use std::future::IntoFuture;
    use std::time::Duration;

    use axum::http::StatusCode;
    use axum_test::TestServer;
    use futures::future::join_all;
    use tracing_test::traced_test;

    use super::*;
    use crate::metrics::test_utils::{buckets, sample_value};

    const HISTOGRAM: &str = "some_api_http_request_duration_seconds";

    fn test_server() -> (TestServer, Registry) {
        let mut registry = Registry::new();
        let api = DemoApi::new(&mut registry).unwrap();

        (TestServer::new(api.router()).unwrap(), registry)
    }

    fn scrape(registry: &Registry) -> String {
        let mut buffer = String::new();
        registry.encode(&mut buffer).unwrap();
        buffer
    }

    fn observation_count(text: &str, handler: &str) -> f64 {
        sample_value(
            text,
            &format!("{HISTOGRAM}_count"),
            &[&format!("handler=\"{handler}\"")],
        )
        .unwrap_or(0.0)
    }

    fn observation_sum(text: &str, handler: &str) -> f64 {
        sample_value(
            text,
            &format!("{HISTOGRAM}_sum"),
            &[&format!("handler=\"{handler}\"")],
        )
        .unwrap_or(0.0)
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_foo_requests_are_each_recorded_once() {
        let (server, registry) = test_server();
        let requests = 20;

        let responses = join_all((0..requests).map(|_| server.get(FOO_ROUTE).into_future())).await;

        for response in responses {
            response.assert_status_ok();
            response.assert_text("Handled foo");
        }

        let text = scrape(&registry);
        assert_eq!(observation_count(&text, "foo"), 20.0);
        assert_eq!(observation_count(&text, "bar"), 0.0);

        // the tokio timer works in whole milliseconds, so allow one millisecond of rounding
        let sum = observation_sum(&text, "foo");
        assert!(sum >= 0.075 * 20.0 - 1e-9, "sum {sum} below minimum latency");
        assert!(sum <= 0.126 * 20.0, "sum {sum} above maximum latency");

        let foo_buckets = buckets(&text, HISTOGRAM, &["handler=\"foo\""]);
        assert_eq!(foo_buckets.first(), Some(&(0.05, 0)));
        assert_eq!(foo_buckets.last(), Some(&(f64::INFINITY, 20)));
        assert!(foo_buckets
            .iter()
            .filter(|(bound, _)| *bound >= 0.126)
            .all(|(_, count)| *count == 20));
    }

    #[tokio::test(start_paused = true)]
    async fn bar_requests_are_recorded_independently_of_foo() {
        let (server, registry) = test_server();

        server.get(FOO_ROUTE).await.assert_status_ok();
        let responses = join_all((0..10).map(|_| server.post(BAR_ROUTE).into_future())).await;

        for response in responses {
            response.assert_status_ok();
            response.assert_text("Handled bar");
        }

        let text = scrape(&registry);
        assert_eq!(observation_count(&text, "bar"), 10.0);
        assert_eq!(observation_count(&text, "foo"), 1.0);

        let sum = observation_sum(&text, "bar");
        assert!(sum >= 0.150 * 10.0 - 1e-9, "sum {sum} below minimum latency");
        assert!(sum <= 0.251 * 10.0, "sum {sum} above maximum latency");

        let bar_buckets = buckets(&text, HISTOGRAM, &["handler=\"bar\""]);
        assert_eq!(bar_buckets.len(), 11);
        assert!(bar_buckets
            .iter()
            .filter(|(bound, _)| *bound < 0.149)
            .all(|(_, count)| *count == 0));
        assert_eq!(bar_buckets.last(), Some(&(f64::INFINITY, 10)));
    }

    #[tokio::test(start_paused = true)]
    async fn sequential_foo_requests_complete_quickly_and_add_one_observation_each() {
        let (server, registry) = test_server();

        for expected in 1..=2 {
            let start = Instant::now();
            server.get(FOO_ROUTE).await.assert_status_ok();
            assert!(start.elapsed() < Duration::from_millis(130));

            assert_eq!(observation_count(&scrape(&registry), "foo"), f64::from(expected));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_route_is_not_found_and_not_recorded() {
        let (server, registry) = test_server();
        let before = scrape(&registry);

        server
            .get("/api/baz")
            .expect_failure()
            .await
            .assert_status(StatusCode::NOT_FOUND);

        assert_eq!(scrape(&registry), before);
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn handlers_log_before_doing_work() {
        let (server, _) = test_server();

        server.get(FOO_ROUTE).await.assert_status_ok();
        server.get(BAR_ROUTE).await.assert_status_ok();

        assert!(logs_contain("handling request"));
        assert!(logs_contain("handler=\"foo\""));
        assert!(logs_contain("handler=\"bar\""));
    }

    #[tokio::test(start_paused = true)]
    async fn instrument_records_one_observation_per_call_whatever_the_outcome() {
        let durations = RequestDurations::new();
        let mut registry = Registry::new();
        durations.register(&mut registry).unwrap();

        let failing = instrument(durations.clone(), Handler::Bar, || async {
            time::sleep(Duration::from_millis(200)).await;
            StatusCode::INTERNAL_SERVER_ERROR
        });

        assert_eq!(failing().await, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(failing().await, StatusCode::INTERNAL_SERVER_ERROR);

        let text = scrape(&registry);
        assert_eq!(observation_count(&text, "bar"), 2.0);
        let sum = observation_sum(&text, "bar");
        assert!((sum - 0.4).abs() < 0.003, "unexpected sum {sum}");
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_calls_still_run_to_completion_and_are_recorded() {
        let durations = RequestDurations::new();
        let mut registry = Registry::new();
        durations.register(&mut registry).unwrap();

        let slow = instrument(durations, Handler::Bar, || async {
            time::sleep(Duration::from_millis(200)).await;
            "done"
        });

        for _ in 0..5 {
            assert!(time::timeout(Duration::from_millis(20), slow())
                .await
                .is_err());
        }
        assert_eq!(observation_count(&scrape(&registry), "bar"), 0.0);

        time::sleep(Duration::from_millis(500)).await;

        let text = scrape(&registry);
        assert_eq!(observation_count(&text, "bar"), 5.0);
        let sum = observation_sum(&text, "bar");
        assert!(sum >= 0.2 * 5.0 - 1e-9, "sum {sum} below the full work duration");
    }

    #[test]
    fn request_histogram_cannot_be_registered_twice() {
        let mut registry = Registry::new();
        assert!(DemoApi::new(&mut registry).is_ok());

        let err = DemoApi::new(&mut registry).err().unwrap();
        assert!(matches!(
            err.current_context(),
            metrics::Error::DuplicateMetric(_)
        ));
    }
}
