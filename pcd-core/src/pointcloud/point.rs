use serde::{Deserialize, Serialize};

use crate::pointcloud::header::PointHeader;

/// Coordinate axis of a point record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: u16,
    pub g: u16,
    pub b: u16,
}

/// Fields only carried by the extended point formats (LAS 1.4, formats 6-10).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtendedFields {
    pub classification: u8,
    pub return_number: u8,
    pub number_of_returns: u8,
    /// Scan angle in units of 0.006 degrees.
    pub scan_angle: i16,
    pub scanner_channel: u8,
    pub overlap: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Wavepacket {
    pub index: u8,
    pub offset: u64,
    pub size: u32,
    pub location: f32,
    pub direction: [f32; 3],
}

// LAS data coordinates are stored as i32
// The user-unit coordinates are calculated from scale and offset, as follows
// x = (raw_x * scale[0]) + offset[0]
// Both representations are carried on the record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PointRecord {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub raw_x: i32,
    pub raw_y: i32,
    pub raw_z: i32,
    pub intensity: u16,
    pub return_number: u8,
    pub number_of_returns: u8,
    pub scan_direction_flag: u8,
    pub edge_of_flight_line: u8,
    pub classification: u8,
    pub synthetic: bool,
    pub keypoint: bool,
    pub withheld: bool,
    pub scan_angle_rank: i8,
    pub user_data: u8,
    pub point_source_id: u16,
    pub gps_time: Option<f64>,
    pub color: Option<Color>,
    pub nir: Option<u16>,
    pub extended: Option<ExtendedFields>,
    pub wavepacket: Option<Wavepacket>,
    pub attributes: Vec<f64>,
}

impl PointRecord {
    /// Re-derives the integer coordinates from the user-unit ones under the
    /// scale and offset of `header`.
    pub fn requantize(&mut self, header: &PointHeader) {
        self.raw_x = header.to_raw(Axis::X, self.x);
        self.raw_y = header.to_raw(Axis::Y, self.y);
        self.raw_z = header.to_raw(Axis::Z, self.z);
    }

    pub fn raw(&self, axis: Axis) -> i32 {
        match axis {
            Axis::X => self.raw_x,
            Axis::Y => self.raw_y,
            Axis::Z => self.raw_z,
        }
    }

    pub fn coordinate(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }

    pub fn is_extended(&self) -> bool {
        self.extended.is_some()
    }

    pub fn effective_return_number(&self) -> u8 {
        match &self.extended {
            Some(ext) => ext.return_number,
            None => self.return_number,
        }
    }

    pub fn effective_number_of_returns(&self) -> u8 {
        match &self.extended {
            Some(ext) => ext.number_of_returns,
            None => self.number_of_returns,
        }
    }

    pub fn effective_classification(&self) -> u8 {
        match &self.extended {
            Some(ext) => ext.classification,
            None => self.classification,
        }
    }

    /// Scan angle in degrees, taken from the extended field when present.
    pub fn scan_angle(&self) -> f32 {
        match &self.extended {
            Some(ext) => 0.006 * ext.scan_angle as f32,
            None => self.scan_angle_rank as f32,
        }
    }

    pub fn extended_scan_angle(&self) -> i16 {
        self.extended.map(|ext| ext.scan_angle).unwrap_or(0)
    }

    pub fn scanner_channel(&self) -> u8 {
        self.extended.map(|ext| ext.scanner_channel).unwrap_or(0)
    }

    pub fn overlap(&self) -> bool {
        self.extended.map(|ext| ext.overlap).unwrap_or(false)
    }

    pub fn gps_time_or_zero(&self) -> f64 {
        self.gps_time.unwrap_or(0.0)
    }

    /// Color channels as R, G, B, NIR with zero for absent data.
    pub fn rgbi(&self) -> [u16; 4] {
        let color = self.color.unwrap_or_default();
        [color.r, color.g, color.b, self.nir.unwrap_or(0)]
    }

    pub fn attribute(&self, index: usize) -> f64 {
        self.attributes.get(index).copied().unwrap_or(0.0)
    }
}
