//! Latency observer for database client hooks.
//!
//! [`QueryMeter`] times connect, prepare, query and batch operations and
//! records each elapsed time, in fractional milliseconds, into a single
//! histogram tagged with `method` and, when the client knows it, `db`.
//!
//! The start instant travels in the per-call [`Context`] under a key
//! only this module can name, scoped to one meter instance. A meter
//! therefore never reads a timestamp another meter stashed, and a
//! context that never went through the matching start hook is skipped
//! without recording anything.

mod builder;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use opentelemetry::metrics::Histogram;
use opentelemetry::KeyValue;

use crate::context::Context;
use crate::error::InstrumentError;
use crate::tracer::{
    BatchEndData, BatchQueryData, BatchStartData, ConnInfo, ConnectEndData, ConnectStartData,
    OperationKind, PrepareEndData, PrepareStartData, QueryEndData, QueryStartData, QueryTracer,
};

pub use builder::{QueryMeterBuilder, DEFAULT_BOUNDARIES};

/// Meter scope the latency histogram is registered under.
pub const METER_SCOPE: &str = "db-latency-meter";
pub const LATENCY_INSTRUMENT: &str = "db.latency";
pub const LATENCY_DESCRIPTION: &str = "The latency of calls in milliseconds";
pub const LATENCY_UNIT: &str = "ms";

pub const METHOD_ATTRIBUTE: &str = "method";
pub const DB_ATTRIBUTE: &str = "db";

static NEXT_METER_ID: AtomicU64 = AtomicU64::new(0);

/// Context key for the start instant. Private, and carrying the owning
/// meter's id, so no other code can read or overwrite the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StartedAt {
    meter: u64,
}

/// Times database operations and records their latency.
///
/// Holds no per-operation state; one instance serves any number of
/// concurrent operations.
pub struct QueryMeter {
    id: u64,
    latency: Histogram<f64>,
    downstream: Option<Arc<dyn QueryTracer>>,
}

impl QueryMeter {
    /// A meter on the global OpenTelemetry provider, with no downstream.
    pub fn new() -> Result<Self, InstrumentError> {
        Self::builder().build()
    }

    pub fn builder() -> QueryMeterBuilder {
        QueryMeterBuilder::default()
    }

    fn from_parts(latency: Histogram<f64>, downstream: Option<Arc<dyn QueryTracer>>) -> Self {
        Self {
            id: NEXT_METER_ID.fetch_add(1, Ordering::Relaxed),
            latency,
            downstream,
        }
    }

    pub fn has_downstream(&self) -> bool {
        self.downstream.is_some()
    }

    fn key(&self) -> StartedAt {
        StartedAt { meter: self.id }
    }

    fn stash_start(&self, ctx: Context) -> Context {
        ctx.with_value(self.key(), Instant::now())
    }

    fn record(&self, ctx: &Context, finished: Instant, kind: OperationKind, target: Option<&str>) {
        let Some(started) = ctx.value::<_, Instant>(&self.key()) else {
            tracing::trace!(meter = self.id, method = %kind, "no start time in context, skipping");
            return;
        };

        let elapsed = finished.saturating_duration_since(*started);
        let mut attributes = vec![KeyValue::new(METHOD_ATTRIBUTE, kind.as_str())];
        if let Some(db) = target {
            attributes.push(KeyValue::new(DB_ATTRIBUTE, db.to_owned()));
        }
        self.latency.record(elapsed.as_secs_f64() * 1_000.0, &attributes);
    }
}

// Start hooks let the downstream tracer run first and stamp afterwards;
// end hooks read the clock first and record afterwards. The downstream
// window thus encloses this meter's window.
impl QueryTracer for QueryMeter {
    fn connect_start(&self, ctx: Context, data: &ConnectStartData) -> Context {
        let ctx = match &self.downstream {
            Some(d) => d.connect_start(ctx, data),
            None => ctx,
        };
        self.stash_start(ctx)
    }

    fn connect_end(&self, ctx: &Context, data: &ConnectEndData) {
        let finished = Instant::now();
        if let Some(d) = &self.downstream {
            d.connect_end(ctx, data);
        }
        self.record(ctx, finished, OperationKind::Connect, data.config.target());
    }

    fn prepare_start(&self, ctx: Context, conn: &ConnInfo, data: &PrepareStartData) -> Context {
        let ctx = match &self.downstream {
            Some(d) => d.prepare_start(ctx, conn, data),
            None => ctx,
        };
        self.stash_start(ctx)
    }

    fn prepare_end(&self, ctx: &Context, conn: &ConnInfo, data: &PrepareEndData) {
        let finished = Instant::now();
        if let Some(d) = &self.downstream {
            d.prepare_end(ctx, conn, data);
        }
        self.record(ctx, finished, OperationKind::Prepare, conn.target());
    }

    fn query_start(&self, ctx: Context, conn: &ConnInfo, data: &QueryStartData) -> Context {
        let ctx = match &self.downstream {
            Some(d) => d.query_start(ctx, conn, data),
            None => ctx,
        };
        self.stash_start(ctx)
    }

    fn query_end(&self, ctx: &Context, conn: &ConnInfo, data: &QueryEndData) {
        let finished = Instant::now();
        if let Some(d) = &self.downstream {
            d.query_end(ctx, conn, data);
        }
        self.record(ctx, finished, OperationKind::Query, conn.target());
    }

    fn batch_start(&self, ctx: Context, conn: &ConnInfo, data: &BatchStartData) -> Context {
        let ctx = match &self.downstream {
            Some(d) => d.batch_start(ctx, conn, data),
            None => ctx,
        };
        self.stash_start(ctx)
    }

    /// Pass-through only: individual batch items are not timed.
    fn batch_query(&self, ctx: &Context, conn: &ConnInfo, data: &BatchQueryData) {
        if let Some(d) = &self.downstream {
            d.batch_query(ctx, conn, data);
        }
    }

    fn batch_end(&self, ctx: &Context, conn: &ConnInfo, data: &BatchEndData) {
        let finished = Instant::now();
        if let Some(d) = &self.downstream {
            d.batch_end(ctx, conn, data);
        }
        self.record(ctx, finished, OperationKind::Batch, conn.target());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry_sdk::metrics::data::{self, ResourceMetrics};
    use opentelemetry_sdk::metrics::{InMemoryMetricExporter, PeriodicReader, SdkMeterProvider};

    struct Sink {
        provider: SdkMeterProvider,
        exporter: InMemoryMetricExporter,
    }

    impl Sink {
        fn new() -> Self {
            let exporter = InMemoryMetricExporter::default();
            let provider = SdkMeterProvider::builder()
                .with_reader(PeriodicReader::builder(exporter.clone()).build())
                .build();
            Self { provider, exporter }
        }

        fn meter(&self) -> QueryMeter {
            QueryMeter::builder()
                .meter_provider(Arc::new(self.provider.clone()))
                .build()
                .unwrap()
        }

        /// `(attributes, count, sum)` per series, attributes sorted by key.
        fn series(&self) -> Vec<(Vec<(String, String)>, u64, f64)> {
            self.provider.force_flush().unwrap();
            let exported = self.exporter.get_finished_metrics().unwrap();
            let Some(last) = exported.last() else {
                return vec![];
            };
            latency_points(last)
        }
    }

    fn latency_points(metrics: &ResourceMetrics) -> Vec<(Vec<(String, String)>, u64, f64)> {
        let mut series = Vec::new();
        for metric in metrics
            .scope_metrics
            .iter()
            .flat_map(|scope| &scope.metrics)
            .filter(|metric| metric.name == LATENCY_INSTRUMENT)
        {
            let any = metric.data.as_any();
            let Some(histogram) = any.downcast_ref::<data::Histogram<f64>>() else {
                continue;
            };
            for point in &histogram.data_points {
                let mut attributes: Vec<_> = point
                    .attributes
                    .iter()
                    .map(|kv| (kv.key.as_str().to_owned(), kv.value.to_string()))
                    .collect();
                attributes.sort();
                series.push((attributes, point.count, point.sum));
            }
        }
        series.sort_by(|a, b| a.0.cmp(&b.0));
        series
    }

    fn recorded(sink: &Sink) -> u64 {
        sink.series().iter().map(|(_, count, _)| count).sum()
    }

    fn query_end() -> QueryEndData {
        QueryEndData {
            command_tag: "OK".into(),
            error: None,
        }
    }

    #[test]
    fn each_meter_gets_its_own_key() {
        let sink = Sink::new();
        let a = sink.meter();
        let b = sink.meter();
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn mistyped_start_value_is_skipped() {
        let sink = Sink::new();
        let meter = sink.meter();
        let ctx = Context::new().with_value(meter.key(), "not an instant");

        meter.query_end(&ctx, &ConnInfo::new("localhost", 6379), &query_end());
        assert_eq!(recorded(&sink), 0);
    }

    #[test]
    fn finish_before_start_clamps_to_zero() {
        let sink = Sink::new();
        let meter = sink.meter();
        let ctx = meter.stash_start(Context::new());
        let earlier = Instant::now() - std::time::Duration::from_millis(50);

        meter.record(&ctx, earlier, OperationKind::Query, None);

        let series = sink.series();
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].1, 1);
        assert_eq!(series[0].2, 0.0);
    }

    #[test]
    fn db_attribute_only_when_target_known() {
        let sink = Sink::new();
        let meter = sink.meter();
        let anonymous = ConnInfo::new("localhost", 6379);
        let named = ConnInfo::new("localhost", 6379).with_database("3");

        for conn in [&anonymous, &named] {
            let ctx = meter.query_start(
                Context::new(),
                conn,
                &QueryStartData {
                    sql: "PING".into(),
                    args: vec![],
                },
            );
            meter.query_end(&ctx, conn, &query_end());
        }

        let attributes: Vec<Vec<(String, String)>> =
            sink.series().into_iter().map(|(attrs, _, _)| attrs).collect();
        let pair = |k: &str, v: &str| (k.to_owned(), v.to_owned());
        assert_eq!(
            attributes,
            vec![
                vec![pair("db", "3"), pair("method", "query")],
                vec![pair("method", "query")],
            ]
        );
    }
}
