mod bin;
mod catalog;
mod config;
mod format;

pub use bin::{Histogram, HistogramBin};
pub use catalog::{AverageChannel, HistogramCatalog, HistogramChannel};
pub use config::{AverageSpec, HistogramConfig, HistogramSpec};
