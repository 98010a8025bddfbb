use std::sync::Arc;

use opentelemetry::global;
use opentelemetry::metrics::MeterProvider;

use super::{QueryMeter, LATENCY_DESCRIPTION, LATENCY_INSTRUMENT, LATENCY_UNIT, METER_SCOPE};
use crate::error::InstrumentError;
use crate::tracer::QueryTracer;

/// Default bucket upper bounds, in milliseconds.
pub const DEFAULT_BOUNDARIES: [f64; 9] = [0.5, 1.0, 1.5, 2.0, 3.0, 4.0, 5.0, 10.0, 15.0];

/// Construction options for [`QueryMeter`].
pub struct QueryMeterBuilder {
    provider: Option<Arc<dyn MeterProvider + Send + Sync>>,
    downstream: Option<Arc<dyn QueryTracer>>,
    boundaries: Vec<f64>,
}

impl Default for QueryMeterBuilder {
    fn default() -> Self {
        Self {
            provider: None,
            downstream: None,
            boundaries: DEFAULT_BOUNDARIES.to_vec(),
        }
    }
}

impl QueryMeterBuilder {
    /// Record through `provider` instead of the one installed with
    /// [`opentelemetry::global::set_meter_provider`].
    pub fn meter_provider(mut self, provider: Arc<dyn MeterProvider + Send + Sync>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Chain `tracer`: each hook is forwarded to it before the meter does
    /// its own bookkeeping.
    pub fn downstream<T: QueryTracer + 'static>(self, tracer: T) -> Self {
        self.downstream_arc(Arc::new(tracer))
    }

    pub fn downstream_arc(mut self, tracer: Arc<dyn QueryTracer>) -> Self {
        self.downstream = Some(tracer);
        self
    }

    /// Override the histogram's explicit bucket upper bounds (ms).
    pub fn bucket_boundaries(mut self, boundaries: impl Into<Vec<f64>>) -> Self {
        self.boundaries = boundaries.into();
        self
    }

    pub fn build(self) -> Result<QueryMeter, InstrumentError> {
        check_boundaries(&self.boundaries)?;
        let provider = self.provider.unwrap_or_else(global::meter_provider);

        let latency = provider
            .meter(METER_SCOPE)
            .f64_histogram(LATENCY_INSTRUMENT)
            .with_description(LATENCY_DESCRIPTION)
            .with_unit(LATENCY_UNIT)
            .with_boundaries(self.boundaries)
            .build();

        let meter = QueryMeter::from_parts(latency, self.downstream);
        tracing::debug!(
            meter = meter.id,
            chained = meter.has_downstream(),
            "query meter ready"
        );
        Ok(meter)
    }
}

// The SDK only logs an instrument with bad boundaries and hands back a no-op.
fn check_boundaries(boundaries: &[f64]) -> Result<(), InstrumentError> {
    let invalid = |reason: &str| InstrumentError::InvalidBoundaries {
        name: LATENCY_INSTRUMENT.to_owned(),
        reason: reason.to_owned(),
    };
    if boundaries.iter().any(|b| !b.is_finite()) {
        return Err(invalid("boundaries must be finite"));
    }
    if boundaries.windows(2).any(|w| w[0] >= w[1]) {
        return Err(invalid("boundaries must be strictly increasing"));
    }
    Ok(())
}
