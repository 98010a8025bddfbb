use std::fmt;

use serde::Serialize;

use crate::context::Context;

// ─── Operation kinds ─────────────────────────────────────────────

/// Category of database interaction being timed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Connect,
    Prepare,
    Query,
    Batch,
}

impl OperationKind {
    pub const ALL: [OperationKind; 4] = [
        OperationKind::Connect,
        OperationKind::Prepare,
        OperationKind::Query,
        OperationKind::Batch,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Prepare => "prepare",
            Self::Query => "query",
            Self::Batch => "batch",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Event metadata ──────────────────────────────────────────────

/// Where an operation is sent. `database` is the target identifier
/// attached to measurements when present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnInfo {
    pub host: String,
    pub port: u16,
    pub database: Option<String>,
}

impl ConnInfo {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            database: None,
        }
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Target identifier, if the client knows one.
    pub fn target(&self) -> Option<&str> {
        self.database.as_deref()
    }
}

#[derive(Debug, Clone)]
pub struct ConnectStartData {
    pub config: ConnInfo,
}

#[derive(Debug, Clone)]
pub struct ConnectEndData {
    pub config: ConnInfo,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PrepareStartData {
    pub name: String,
    pub sql: String,
}

#[derive(Debug, Clone)]
pub struct PrepareEndData {
    /// The statement was already known to the client; nothing was sent.
    pub already_prepared: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct QueryStartData {
    pub sql: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct QueryEndData {
    pub command_tag: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BatchStartData {
    /// One entry per queued statement, in submission order.
    pub queries: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct BatchQueryData {
    pub sql: String,
    pub args: Vec<String>,
    pub command_tag: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BatchEndData {
    pub error: Option<String>,
}

// ─── Hook contract ───────────────────────────────────────────────

/// Instrumentation hooks a database client calls around each operation.
///
/// For every operation the client calls a `*_start` hook, keeps the
/// returned [`Context`], and later passes it to the matching `*_end`
/// hook. Between `batch_start` and `batch_end` it calls `batch_query`
/// once per item of the batch.
///
/// Every method defaults to a no-op so an implementation only overrides
/// the events it cares about. Hooks must not block.
pub trait QueryTracer: Send + Sync {
    fn connect_start(&self, ctx: Context, _data: &ConnectStartData) -> Context {
        ctx
    }

    fn connect_end(&self, _ctx: &Context, _data: &ConnectEndData) {}

    fn prepare_start(&self, ctx: Context, _conn: &ConnInfo, _data: &PrepareStartData) -> Context {
        ctx
    }

    fn prepare_end(&self, _ctx: &Context, _conn: &ConnInfo, _data: &PrepareEndData) {}

    fn query_start(&self, ctx: Context, _conn: &ConnInfo, _data: &QueryStartData) -> Context {
        ctx
    }

    fn query_end(&self, _ctx: &Context, _conn: &ConnInfo, _data: &QueryEndData) {}

    fn batch_start(&self, ctx: Context, _conn: &ConnInfo, _data: &BatchStartData) -> Context {
        ctx
    }

    fn batch_query(&self, _ctx: &Context, _conn: &ConnInfo, _data: &BatchQueryData) {}

    fn batch_end(&self, _ctx: &Context, _conn: &ConnInfo, _data: &BatchEndData) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Silent;

    impl QueryTracer for Silent {}

    #[test]
    fn operation_kind_names() {
        let names: Vec<_> = OperationKind::ALL.iter().map(|k| k.to_string()).collect();
        assert_eq!(names, ["connect", "prepare", "query", "batch"]);
        assert_eq!(
            serde_json::to_string(&OperationKind::Batch).unwrap(),
            "\"batch\""
        );
    }

    #[test]
    fn default_hooks_pass_context_through() {
        #[derive(PartialEq)]
        struct Marker;

        let conn = ConnInfo::new("localhost", 6379);
        let ctx = Context::new().with_value(Marker, 1u8);
        let ctx = Silent.query_start(
            ctx,
            &conn,
            &QueryStartData {
                sql: "GET".into(),
                args: vec![],
            },
        );
        assert_eq!(ctx.value::<_, u8>(&Marker), Some(&1));
        assert_eq!(ctx.len(), 1);
    }

    #[test]
    fn target_comes_from_database() {
        let conn = ConnInfo::new("db.internal", 5432);
        assert_eq!(conn.target(), None);
        assert_eq!(conn.with_database("orders").target(), Some("orders"));
    }
}
