#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use db_latency_meter::meter::LATENCY_INSTRUMENT;
use opentelemetry::metrics::MeterProvider;
use opentelemetry_sdk::metrics::data::{self, ResourceMetrics};
use opentelemetry_sdk::metrics::{InMemoryMetricExporter, PeriodicReader, SdkMeterProvider};

/// One exported histogram data point of the latency instrument.
#[derive(Debug, Clone)]
pub struct Series {
    pub attributes: BTreeMap<String, String>,
    pub unit: String,
    pub count: u64,
    pub sum: f64,
    pub bounds: Vec<f64>,
    pub bucket_counts: Vec<u64>,
}

impl Series {
    pub fn method(&self) -> Option<&str> {
        self.attributes.get("method").map(String::as_str)
    }

    pub fn db(&self) -> Option<&str> {
        self.attributes.get("db").map(String::as_str)
    }
}

/// SDK meter provider exporting into memory, flushed on every read.
pub struct TestMetrics {
    provider: SdkMeterProvider,
    exporter: InMemoryMetricExporter,
}

impl TestMetrics {
    pub fn new() -> Self {
        let exporter = InMemoryMetricExporter::default();
        let provider = SdkMeterProvider::builder()
            .with_reader(PeriodicReader::builder(exporter.clone()).build())
            .build();
        Self { provider, exporter }
    }

    pub fn provider(&self) -> Arc<dyn MeterProvider + Send + Sync> {
        Arc::new(self.provider.clone())
    }

    /// Cumulative latency series as of now, one per attribute set.
    pub fn series(&self) -> Vec<Series> {
        self.provider.force_flush().expect("flush metrics");
        let exported = self
            .exporter
            .get_finished_metrics()
            .expect("read exported metrics");
        exported.last().map(latency_series).unwrap_or_default()
    }

    pub fn total_count(&self) -> u64 {
        self.series().iter().map(|s| s.count).sum()
    }

    /// The single series with `method`, panicking if there is not exactly one.
    pub fn only(&self, method: &str) -> Series {
        let mut matching: Vec<_> = self
            .series()
            .into_iter()
            .filter(|s| s.method() == Some(method))
            .collect();
        assert_eq!(matching.len(), 1, "series for method {method}");
        matching.remove(0)
    }
}

fn latency_series(metrics: &ResourceMetrics) -> Vec<Series> {
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
        series.extend(histogram.data_points.iter().map(|point| Series {
            attributes: point
                .attributes
                .iter()
                .map(|kv| (kv.key.as_str().to_owned(), kv.value.to_string()))
                .collect(),
            unit: metric.unit.to_string(),
            count: point.count,
            sum: point.sum,
            bounds: point.bounds.clone(),
            bucket_counts: point.bucket_counts.clone(),
        }));
    }
    series
}
