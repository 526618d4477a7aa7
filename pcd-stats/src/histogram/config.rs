use serde::{Deserialize, Serialize};

/// Which histograms to collect, as loaded from JSON or assembled from
/// command-line flags.
///
/// ```json
/// {
///   "histograms": [{ "channel": "z", "step": 0.5 }],
///   "averages": [{ "channel": "scan_angle", "step": 1, "average_of": "intensity" }]
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistogramConfig {
    pub histograms: Vec<HistogramSpec>,
    pub averages: Vec<AverageSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramSpec {
    pub channel: String,
    pub step: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AverageSpec {
    pub channel: String,
    pub step: f64,
    pub average_of: String,
}

impl HistogramConfig {
    pub fn is_empty(&self) -> bool {
        self.histograms.is_empty() && self.averages.is_empty()
    }
}
