//! Streaming statistics over point records.
//!
//! Every aggregator here is fed one point at a time and never needs the full
//! point cloud in memory:
//!
//! - [`ExtentTracker`]: point count, per-return counts and integer bounding box.
//! - [`PointSummary`]: per-field min/max envelope, tallies and coordinate fluff.
//! - [`Histogram`] and [`HistogramCatalog`]: sparse, self-anchoring histograms.
//! - [`OccupancyGrid`]: sparse 2-D occupancy bitmap.
//!
//! None of them are thread-safe; shard the stream and [`merge`](Histogram::merge)
//! independent instances instead.

pub mod error;
pub mod histogram;
pub mod inventory;
pub mod occupancy;
mod sparse;
pub mod summary;

pub use error::StatsError;
pub use histogram::{
    AverageChannel, Histogram, HistogramCatalog, HistogramChannel, HistogramConfig,
};
pub use inventory::ExtentTracker;
pub use occupancy::{CellBounds, OccupancyGrid};
pub use sparse::GrowthPolicy;
pub use summary::PointSummary;
