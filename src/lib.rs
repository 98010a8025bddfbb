//! Latency metrics for database client instrumentation hooks.
//!
//! A database client calls a [`QueryTracer`]'s start hook when an
//! operation begins and the matching end hook when it finishes, threading
//! a [`Context`] between the two. [`QueryMeter`] is a tracer that turns
//! each start/end pair into one histogram sample, in milliseconds, tagged
//! with the operation kind. Meters can be chained in front of any other
//! tracer through [`QueryMeterBuilder::downstream`].
//!
//! Samples go to an OpenTelemetry `f64` histogram, `db.latency`, on the
//! meter provider given to the builder or on the global one.
//!
//! ```rust
//! use std::sync::Arc;
//! use db_latency_meter::{
//!     ConnInfo, Context, QueryEndData, QueryMeter, QueryStartData, QueryTracer,
//! };
//! use opentelemetry_sdk::metrics::SdkMeterProvider;
//!
//! let provider = SdkMeterProvider::builder().build();
//! let meter = QueryMeter::builder()
//!     .meter_provider(Arc::new(provider.clone()))
//!     .build()
//!     .unwrap();
//!
//! let conn = ConnInfo::new("localhost", 6379).with_database("0");
//! let start = QueryStartData { sql: "GET".into(), args: vec!["user:1".into()] };
//! let ctx = meter.query_start(Context::new(), &conn, &start);
//! meter.query_end(&ctx, &conn, &QueryEndData { command_tag: "OK".into(), error: None });
//! ```

pub mod context;
pub mod error;
pub mod logger;
pub mod meter;
pub mod tracer;

pub use context::Context;
pub use error::InstrumentError;
pub use logger::QueryLogger;
pub use meter::{QueryMeter, QueryMeterBuilder};
pub use tracer::{
    BatchEndData, BatchQueryData, BatchStartData, ConnInfo, ConnectEndData, ConnectStartData,
    OperationKind, PrepareEndData, PrepareStartData, QueryEndData, QueryStartData, QueryTracer,
};
