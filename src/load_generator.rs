use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::redis_client::TracedRedis;

/// Lua script every worker prepares once and then calls by SHA1.
const TOUCH_SCRIPT: &str = r#"
local n = redis.call('INCR', KEYS[1])
redis.call('EXPIRE', KEYS[1], ARGV[1])
return n
"#;

/// Mix of operations, in percent. Whatever is left over after reads,
/// scripts and batches is single-command writes.
#[derive(Debug, Clone, Copy)]
pub struct Mix {
    pub read_pct: u8,
    pub script_pct: u8,
    pub batch_pct: u8,
}

// ─── Public entry point ──────────────────────────────────────────

/// Spawns `concurrency` Tokio tasks that drive Redis through the traced
/// client until the deadline or the `running` flag is set to false.
pub async fn run(
    running: Arc<AtomicBool>,
    redis: TracedRedis,
    concurrency: u32,
    duration_secs: u64,
    mix: Mix,
) {
    let deadline = Instant::now() + Duration::from_secs(duration_secs);

    let mut handles = Vec::with_capacity(concurrency as usize);

    for worker_id in 0..concurrency {
        let running = running.clone();
        let redis = redis.clone();

        handles.push(tokio::spawn(async move {
            worker(worker_id, running, redis, deadline, mix).await;
        }));
    }

    for h in handles {
        if let Err(e) = h.await {
            tracing::error!(error = %e, "load worker panicked");
        }
    }

    running.store(false, Ordering::SeqCst);
    tracing::info!("load run finished");
}

// ─── Worker loop ─────────────────────────────────────────────────

async fn worker(
    id: u32,
    running: Arc<AtomicBool>,
    redis: TracedRedis,
    deadline: Instant,
    mix: Mix,
) {
    // Each worker gets its own deterministic RNG seeded uniquely.
    let mut rng = StdRng::seed_from_u64(1000 + id as u64);

    let script = match redis.prepare("touch", TOUCH_SCRIPT).await {
        Ok(sha) => Some(sha),
        Err(e) => {
            tracing::warn!(worker = id, error = %e, "script load failed, skipping scripted ops");
            None
        }
    };

    while running.load(Ordering::Relaxed) && Instant::now() < deadline {
        let roll = rng.gen_range(0u8..100);
        let result = if roll < mix.read_pct {
            do_read(&mut rng, &redis).await
        } else if roll < mix.read_pct.saturating_add(mix.script_pct) {
            match &script {
                Some(sha) => do_script(&mut rng, &redis, sha).await,
                None => do_read(&mut rng, &redis).await,
            }
        } else if roll
            < mix
                .read_pct
                .saturating_add(mix.script_pct)
                .saturating_add(mix.batch_pct)
        {
            do_batch(&mut rng, &redis).await
        } else {
            do_write(&mut rng, &redis).await
        };

        if let Err(e) = result {
            tracing::debug!(worker = id, error = %e, "operation failed");
        }
    }
}

// ─── Operations ──────────────────────────────────────────────────

async fn do_read(rng: &mut StdRng, redis: &TracedRedis) -> redis::RedisResult<()> {
    let id = rng.gen_range(1..=10_000u32);
    let mut cmd = redis::cmd("HGETALL");
    cmd.arg(format!("user:usr_{id:08}"));
    let _: HashMap<String, String> = redis.query(&cmd).await?;
    Ok(())
}

async fn do_write(rng: &mut StdRng, redis: &TracedRedis) -> redis::RedisResult<()> {
    let sess_id = format!("sess_{:08x}", rng.gen::<u32>());
    let json = serde_json::json!({
        "id":       sess_id,
        "user_id":  format!("usr_{:08}", rng.gen_range(1..=10_000u32)),
        "token":    format!("tok_{:016x}", rng.gen::<u64>()),
        "ttl_secs": 300,
    })
    .to_string();

    let mut cmd = redis::cmd("SET");
    cmd.arg(format!("session:{sess_id}"))
        .arg(json)
        .arg("EX")
        .arg(300u64);
    redis.query::<()>(&cmd).await
}

async fn do_script(rng: &mut StdRng, redis: &TracedRedis, sha: &str) -> redis::RedisResult<()> {
    let mut cmd = redis::cmd("EVALSHA");
    cmd.arg(sha)
        .arg(1)
        .arg(format!("counter:{}", rng.gen_range(1..=100u32)))
        .arg(60u64);
    let _: i64 = redis.query(&cmd).await?;
    Ok(())
}

async fn do_batch(rng: &mut StdRng, redis: &TracedRedis) -> redis::RedisResult<()> {
    let i = rng.gen_range(10_001..=99_999u32);
    let key = format!("user:usr_{i:08}");

    let mut hset = redis::cmd("HSET");
    hset.arg(&key)
        .arg("id")
        .arg(format!("usr_{i:08}"))
        .arg("name")
        .arg("Bench User")
        .arg("email")
        .arg(format!("bench{i}@test.com"));
    let mut expire = redis::cmd("EXPIRE");
    expire.arg(&key).arg(600u64);

    redis.batch(&[hset, expire]).await.map(|_| ())
}
