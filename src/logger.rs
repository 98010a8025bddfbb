use crate::context::Context;
use crate::tracer::{
    BatchEndData, BatchQueryData, BatchStartData, ConnInfo, ConnectEndData, ConnectStartData,
    PrepareEndData, PrepareStartData, QueryEndData, QueryStartData, QueryTracer,
};

/// Emits a `tracing` event per hook. Failed operations log at `warn`,
/// everything else at `debug`. Stores nothing in the context.
///
/// Usually chained behind a [`QueryMeter`](crate::QueryMeter) as its
/// downstream tracer.
#[derive(Debug, Default, Clone, Copy)]
pub struct QueryLogger;

impl QueryLogger {
    pub fn new() -> Self {
        Self
    }
}

fn log_end(operation: &str, conn: &ConnInfo, error: Option<&str>) {
    match error {
        Some(error) => tracing::warn!(
            host = %conn.host,
            port = conn.port,
            db = conn.target(),
            error,
            "{operation} failed"
        ),
        None => tracing::debug!(
            host = %conn.host,
            port = conn.port,
            db = conn.target(),
            "{operation} done"
        ),
    }
}

impl QueryTracer for QueryLogger {
    fn connect_start(&self, ctx: Context, data: &ConnectStartData) -> Context {
        tracing::debug!(host = %data.config.host, port = data.config.port, "connecting");
        ctx
    }

    fn connect_end(&self, _ctx: &Context, data: &ConnectEndData) {
        log_end("connect", &data.config, data.error.as_deref());
    }

    fn prepare_start(&self, ctx: Context, _conn: &ConnInfo, data: &PrepareStartData) -> Context {
        tracing::debug!(name = %data.name, "preparing statement");
        ctx
    }

    fn prepare_end(&self, _ctx: &Context, conn: &ConnInfo, data: &PrepareEndData) {
        if data.already_prepared {
            tracing::trace!("statement already prepared");
        }
        log_end("prepare", conn, data.error.as_deref());
    }

    fn query_start(&self, ctx: Context, _conn: &ConnInfo, data: &QueryStartData) -> Context {
        tracing::debug!(sql = %data.sql, args = data.args.len(), "query");
        ctx
    }

    fn query_end(&self, _ctx: &Context, conn: &ConnInfo, data: &QueryEndData) {
        log_end("query", conn, data.error.as_deref());
    }

    fn batch_start(&self, ctx: Context, _conn: &ConnInfo, data: &BatchStartData) -> Context {
        tracing::debug!(size = data.queries.len(), "batch");
        ctx
    }

    fn batch_query(&self, _ctx: &Context, _conn: &ConnInfo, data: &BatchQueryData) {
        match &data.error {
            Some(error) => tracing::warn!(sql = %data.sql, %error, "batch item failed"),
            None => tracing::trace!(sql = %data.sql, tag = %data.command_tag, "batch item"),
        }
    }

    fn batch_end(&self, _ctx: &Context, conn: &ConnInfo, data: &BatchEndData) {
        log_end("batch", conn, data.error.as_deref());
    }
}
