use std::path::PathBuf;

use las::{point::ScanDirection, Reader};
use pcd_core::pointcloud::{
    header::{BoundingVolume, PointHeader},
    point::{Axis, Color, ExtendedFields, PointRecord, Wavepacket},
};

use super::PointReader;
use crate::error::ReadError;

/// Extended scan angles are stored in units of 0.006 degrees.
const SCAN_ANGLE_UNIT: f32 = 0.006;

pub struct LasPointReader {
    files: Vec<PathBuf>,
    current_file_index: usize,
    current_reader: Option<Reader>,
    header: Option<PointHeader>,
    extended: bool,
}

impl LasPointReader {
    pub fn new(files: Vec<PathBuf>) -> Result<Self, ReadError> {
        let mut reader = Self {
            files,
            current_file_index: 0,
            current_reader: None,
            header: None,
            extended: false,
        };
        reader.open_next_file()?;
        Ok(reader)
    }

    fn open_next_file(&mut self) -> Result<(), ReadError> {
        let Some(path) = self.files.get(self.current_file_index) else {
            self.current_reader = None;
            return Ok(());
        };
        self.current_file_index += 1;

        let reader = Reader::from_path(path)?;
        let header = convert_header(reader.header())?;
        log::debug!(
            "opened {:?}: LAS {}.{}, point format {}, {} points",
            path,
            header.version_major,
            header.version_minor,
            header.point_format,
            header.point_count()
        );
        self.extended = reader.header().point_format().is_extended;
        self.header = Some(header);
        self.current_reader = Some(reader);
        Ok(())
    }

    fn convert_point(&self, header: &PointHeader, las_point: las::Point) -> PointRecord {
        let classification = u8::from(las_point.classification);
        let extended = self.extended.then(|| ExtendedFields {
            classification,
            return_number: las_point.return_number,
            number_of_returns: las_point.number_of_returns,
            scan_angle: (las_point.scan_angle / SCAN_ANGLE_UNIT).round() as i16,
            scanner_channel: las_point.scanner_channel,
            overlap: las_point.is_overlap,
        });

        PointRecord {
            x: las_point.x,
            y: las_point.y,
            z: las_point.z,
            raw_x: header.to_raw(Axis::X, las_point.x),
            raw_y: header.to_raw(Axis::Y, las_point.y),
            raw_z: header.to_raw(Axis::Z, las_point.z),
            intensity: las_point.intensity,
            return_number: las_point.return_number.min(7),
            number_of_returns: las_point.number_of_returns.min(7),
            scan_direction_flag: u8::from(las_point.scan_direction == ScanDirection::LeftToRight),
            edge_of_flight_line: u8::from(las_point.is_edge_of_flight_line),
            classification: classification.min(31),
            synthetic: las_point.is_synthetic,
            keypoint: las_point.is_key_point,
            withheld: las_point.is_withheld,
            scan_angle_rank: las_point.scan_angle.round().clamp(-128.0, 127.0) as i8,
            user_data: las_point.user_data,
            point_source_id: las_point.point_source_id,
            gps_time: las_point.gps_time,
            color: las_point.color.map(|c| Color {
                r: c.red,
                g: c.green,
                b: c.blue,
            }),
            nir: las_point.nir,
            extended,
            wavepacket: las_point.waveform.map(|w| Wavepacket {
                index: w.wave_packet_descriptor_index,
                offset: w.byte_offset_to_waveform_data,
                size: w.waveform_packet_size_in_bytes,
                location: w.return_point_waveform_location,
                direction: [w.x_t, w.y_t, w.z_t],
            }),
            attributes: Vec::new(),
        }
    }
}

fn convert_header(las_header: &las::Header) -> Result<PointHeader, ReadError> {
    let transforms = las_header.transforms();
    let bounds = las_header.bounds();
    let version = las_header.version();
    let point_count = las_header.number_of_points();

    let mut header = PointHeader::new(
        [transforms.x.scale, transforms.y.scale, transforms.z.scale],
        [transforms.x.offset, transforms.y.offset, transforms.z.offset],
    );
    header.version_major = version.major;
    header.version_minor = version.minor;
    header.point_format = las_header.point_format().to_u8()?;
    header.number_of_point_records = u32::try_from(point_count).unwrap_or(0);
    header.extended_number_of_point_records = point_count;
    for return_number in 1..=15u8 {
        let count = las_header
            .number_of_points_by_return(return_number)
            .unwrap_or(0);
        let i = usize::from(return_number) - 1;
        if i < 5 {
            header.number_of_points_by_return[i] = u32::try_from(count).unwrap_or(0);
        }
        header.extended_number_of_points_by_return[i] = count;
    }
    header.bounding_volume = BoundingVolume {
        min: [bounds.min.x, bounds.min.y, bounds.min.z],
        max: [bounds.max.x, bounds.max.y, bounds.max.z],
    };
    Ok(header)
}

impl PointReader for LasPointReader {
    fn next_point(&mut self) -> Result<Option<PointRecord>, ReadError> {
        loop {
            let Some(reader) = self.current_reader.as_mut() else {
                return Ok(None);
            };
            let next = reader.points().next();
            match next {
                Some(Ok(las_point)) => {
                    let Some(header) = self.header.as_ref() else {
                        return Ok(None);
                    };
                    return Ok(Some(self.convert_point(header, las_point)));
                }
                Some(Err(e)) => {
                    log::error!("Error reading LAS point: {}", e);
                    return Err(e.into());
                }
                None => self.open_next_file()?,
            }
        }
    }

    fn header(&self) -> Option<&PointHeader> {
        self.header.as_ref()
    }
}
