use serde::{Deserialize, Serialize};

/// `[observability]`: optional OTLP trace export for `serve`.
///
/// Without an endpoint only the JSON log stream is produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// OTLP gRPC collector, e.g. `http://localhost:4317`.
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
    #[serde(default = "d_service_name")]
    pub service_name: String,
    /// Fraction of traces kept, `0.0..=1.0`.
    #[serde(default = "d_sample_rate")]
    pub sample_rate: f64,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: None,
            service_name: d_service_name(),
            sample_rate: d_sample_rate(),
        }
    }
}

fn d_service_name() -> String {
    "safetrack".into()
}

fn d_sample_rate() -> f64 {
    1.0
}
