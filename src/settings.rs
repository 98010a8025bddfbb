use std::net::SocketAddr;

use config::{Config, Environment, File};
use serde::Deserialize;

pub const SERVICE_NAME: &str = "DB_LATENCY_METER";

/// Runtime settings for the demo server.
///
/// Read from an optional file named by `DB_LATENCY_METER__CONFIG`, then
/// from `DB_LATENCY_METER__*` environment variables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub redis_url: String,
    pub listen_addr: SocketAddr,
    /// Chain a `QueryLogger` behind the meter.
    pub log_queries: bool,
    /// Histogram bucket upper bounds (ms); the meter's defaults if unset.
    pub bucket_boundaries: Option<Vec<f64>>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379/".into(),
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            log_queries: true,
            bucket_boundaries: None,
        }
    }
}

impl Settings {
    pub fn build() -> anyhow::Result<Self> {
        let config_path_name = format!("{SERVICE_NAME}__CONFIG");

        let mut builder = Config::builder();
        if let Ok(config_path) = std::env::var(&config_path_name) {
            builder = builder.add_source(File::with_name(&config_path));
            std::env::remove_var(&config_path_name);
        }
        // `__` so keys with underscores (e.g. `redis_url`) stay addressable
        builder = builder.add_source(
            Environment::with_prefix(SERVICE_NAME)
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("bucket_boundaries"),
        );

        let settings: Self = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if let Some(bounds) = &self.bucket_boundaries {
            anyhow::ensure!(
                bounds.windows(2).all(|w| w[0] < w[1]),
                "bucket_boundaries must be strictly increasing"
            );
        }
        Ok(())
    }
}
