use std::collections::HashSet;
use std::sync::Arc;

use db_latency_meter::{
    BatchEndData, BatchQueryData, BatchStartData, ConnInfo, ConnectEndData, ConnectStartData,
    Context, PrepareEndData, PrepareStartData, QueryEndData, QueryStartData, QueryTracer,
};
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::{Arg, Cmd, ConnectionAddr, FromRedisValue, RedisResult, Value};

/// Redis connection that reports every operation to a [`QueryTracer`].
///
/// `ConnectionManager` is cheaply cloneable — every clone shares the same
/// underlying multiplexed TCP connection — so `TracedRedis` is too.
#[derive(Clone)]
pub struct TracedRedis {
    conn: ConnectionManager,
    info: ConnInfo,
    tracer: Arc<dyn QueryTracer>,
    /// SHA1s of scripts already loaded through this client.
    prepared: Arc<Mutex<HashSet<String>>>,
}

/// Opens the connection, wrapped in the tracer's connect hooks.
pub async fn connect(url: &str, tracer: Arc<dyn QueryTracer>) -> RedisResult<TracedRedis> {
    let client = redis::Client::open(url)?;
    let info = conn_info(client.get_connection_info());

    let ctx = tracer.connect_start(
        Context::new(),
        &ConnectStartData {
            config: info.clone(),
        },
    );
    let result = ConnectionManager::new(client).await;
    tracer.connect_end(
        &ctx,
        &ConnectEndData {
            config: info.clone(),
            error: result.as_ref().err().map(ToString::to_string),
        },
    );

    Ok(TracedRedis {
        conn: result?,
        info,
        tracer,
        prepared: Arc::new(Mutex::new(HashSet::new())),
    })
}

impl TracedRedis {
    pub fn info(&self) -> &ConnInfo {
        &self.info
    }

    /// Runs a single command.
    pub async fn query<T: FromRedisValue>(&self, cmd: &Cmd) -> RedisResult<T> {
        let (name, args) = describe(cmd);
        let ctx = self.tracer.query_start(
            Context::new(),
            &self.info,
            &QueryStartData {
                sql: name.clone(),
                args,
            },
        );

        let mut conn = self.conn.clone();
        let result: RedisResult<T> = cmd.query_async(&mut conn).await;

        self.tracer.query_end(
            &ctx,
            &self.info,
            &QueryEndData {
                command_tag: name,
                error: result.as_ref().err().map(ToString::to_string),
            },
        );
        result
    }

    /// Loads a Lua script into the server's script cache and returns its
    /// SHA1. Scripts this client already loaded are not sent again.
    pub async fn prepare(&self, name: &str, source: &str) -> RedisResult<String> {
        let hash = redis::Script::new(source).get_hash().to_owned();
        let ctx = self.tracer.prepare_start(
            Context::new(),
            &self.info,
            &PrepareStartData {
                name: name.to_owned(),
                sql: source.to_owned(),
            },
        );

        let already_prepared = self.prepared.lock().contains(&hash);
        let result: RedisResult<String> = if already_prepared {
            Ok(hash.clone())
        } else {
            let mut conn = self.conn.clone();
            redis::cmd("SCRIPT")
                .arg("LOAD")
                .arg(source)
                .query_async(&mut conn)
                .await
        };

        if let Ok(loaded) = &result {
            self.prepared.lock().insert(loaded.clone());
        }
        self.tracer.prepare_end(
            &ctx,
            &self.info,
            &PrepareEndData {
                already_prepared,
                error: result.as_ref().err().map(ToString::to_string),
            },
        );
        result
    }

    /// Sends `cmds` as one pipeline. The tracer sees one `batch_query`
    /// per command, in order, before the batch ends.
    pub async fn batch(&self, cmds: &[Cmd]) -> RedisResult<Vec<Value>> {
        let described: Vec<(String, Vec<String>)> = cmds.iter().map(describe).collect();
        let ctx = self.tracer.batch_start(
            Context::new(),
            &self.info,
            &BatchStartData {
                queries: described.iter().map(|(name, _)| name.clone()).collect(),
            },
        );

        let mut pipe = redis::pipe();
        for cmd in cmds {
            pipe.add_command(cmd.clone());
        }
        let mut conn = self.conn.clone();
        let result: RedisResult<Vec<Value>> = pipe.query_async(&mut conn).await;

        for (i, (name, args)) in described.into_iter().enumerate() {
            let (command_tag, error) = match &result {
                Ok(values) => (
                    values.get(i).map(command_tag).unwrap_or_default(),
                    None,
                ),
                Err(e) => (String::new(), Some(e.to_string())),
            };
            self.tracer.batch_query(
                &ctx,
                &self.info,
                &BatchQueryData {
                    sql: name,
                    args,
                    command_tag,
                    error,
                },
            );
        }

        self.tracer.batch_end(
            &ctx,
            &self.info,
            &BatchEndData {
                error: result.as_ref().err().map(ToString::to_string),
            },
        );
        result
    }
}

// ─── Helpers ─────────────────────────────────────────────────────

fn conn_info(info: &redis::ConnectionInfo) -> ConnInfo {
    let base = match &info.addr {
        ConnectionAddr::Tcp(host, port) => ConnInfo::new(host.clone(), *port),
        ConnectionAddr::TcpTls { host, port, .. } => ConnInfo::new(host.clone(), *port),
        ConnectionAddr::Unix(path) => ConnInfo::new(path.display().to_string(), 0),
    };
    base.with_database(info.redis.db.to_string())
}

/// Command name (upper-cased) and remaining arguments, lossily decoded.
fn describe(cmd: &Cmd) -> (String, Vec<String>) {
    let mut parts = cmd.args_iter().map(|arg| match arg {
        Arg::Simple(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        Arg::Cursor => "<cursor>".to_owned(),
    });
    let name = parts
        .next()
        .map(|n| n.to_ascii_uppercase())
        .unwrap_or_else(|| "UNKNOWN".to_owned());
    (name, parts.collect())
}

fn command_tag(value: &Value) -> String {
    match value {
        Value::Okay => "OK".to_owned(),
        Value::Status(s) => s.clone(),
        Value::Int(n) => n.to_string(),
        Value::Nil => "NIL".to_owned(),
        Value::Data(_) => "DATA".to_owned(),
        Value::Bulk(items) => format!("BULK {}", items.len()),
    }
}
