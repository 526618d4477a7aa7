use serde::{Deserialize, Serialize};

use crate::pointcloud::point::Axis;

// This represents the maximum and minimum values of the user-unit coordinates
// obtained by combining the scale and offset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingVolume {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

/// Point counts, quantization and bounds of a LAS-like file header.
///
/// Counts are stored twice: the legacy 32-bit fields and the 64-bit
/// extended fields introduced with LAS 1.4.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PointHeader {
    pub version_major: u8,
    pub version_minor: u8,
    pub point_format: u8,
    pub number_of_point_records: u32,
    pub number_of_points_by_return: [u32; 5],
    pub extended_number_of_point_records: u64,
    pub extended_number_of_points_by_return: [u64; 15],
    pub scale: [f64; 3],
    pub offset: [f64; 3],
    pub bounding_volume: BoundingVolume,
}

impl PointHeader {
    pub fn new(scale: [f64; 3], offset: [f64; 3]) -> Self {
        Self {
            version_major: 1,
            version_minor: 2,
            scale,
            offset,
            ..Default::default()
        }
    }

    /// Whether the format can represent point totals beyond `u32::MAX`.
    pub fn supports_extended_counts(&self) -> bool {
        self.version_major > 1 || self.version_minor >= 4
    }

    pub fn same_quantization(&self, other: &PointHeader) -> bool {
        self.scale == other.scale && self.offset == other.offset
    }

    pub fn to_raw(&self, axis: Axis, value: f64) -> i32 {
        let i = axis.index();
        ((value - self.offset[i]) / self.scale[i]).round() as i32
    }

    pub fn to_coordinate(&self, axis: Axis, raw: i32) -> f64 {
        let i = axis.index();
        self.scale[i] * raw as f64 + self.offset[i]
    }

    /// Total number of points, preferring the legacy field when it is set.
    pub fn point_count(&self) -> u64 {
        if self.number_of_point_records > 0 {
            self.number_of_point_records as u64
        } else {
            self.extended_number_of_point_records
        }
    }

    /// Points with the given return number (1..=15), preferring the legacy
    /// field when it is set.
    pub fn points_by_return(&self, return_number: usize) -> u64 {
        match return_number {
            1..=5 if self.number_of_points_by_return[return_number - 1] > 0 => {
                self.number_of_points_by_return[return_number - 1] as u64
            }
            1..=15 => self.extended_number_of_points_by_return[return_number - 1],
            _ => 0,
        }
    }
}
