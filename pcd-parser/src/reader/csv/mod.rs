use std::{
    collections::HashMap,
    fs::File,
    io::{BufRead as _, BufReader},
    path::{Path, PathBuf},
};

use csv::{ReaderBuilder, StringRecord, Trim};
use pcd_core::pointcloud::{
    header::PointHeader,
    point::{Axis, Color, ExtendedFields, PointRecord},
};

use super::PointReader;
use crate::error::ReadError;

const ATTRIBUTE_NAMES: [&str; 18] = [
    "x",
    "y",
    "z",
    "intensity",
    "return_number",
    "number_of_returns",
    "classification",
    "scan_angle",
    "user_data",
    "point_source_id",
    "gps_time",
    "r",
    "g",
    "b",
    "red",
    "green",
    "blue",
    "nir",
];

/// Extended scan angle increment in degrees.
const SCAN_ANGLE_UNIT: f64 = 0.006;

fn normalize(name: &str) -> String {
    name.trim().to_lowercase().replace(['_', '-', ' '], "")
}

/// Maps known column names to their index. Columns with unknown names are
/// returned separately and read as extra attributes.
fn create_field_mapping(
    headers: &StringRecord,
    has_headers: bool,
) -> Result<(HashMap<String, usize>, Vec<usize>), ReadError> {
    let mut mapping = HashMap::new();
    let mut extra = Vec::new();

    if has_headers {
        for (index, header) in headers.iter().enumerate() {
            let normalized_header = normalize(header);
            match ATTRIBUTE_NAMES
                .iter()
                .find(|attr_name| normalize(attr_name) == normalized_header)
            {
                Some(attr_name) => {
                    mapping.insert(attr_name.to_string(), index);
                }
                None => extra.push(index),
            }
        }
    } else {
        for (index, attr_name) in ATTRIBUTE_NAMES.iter().enumerate().take(headers.len()) {
            mapping.insert(attr_name.to_string(), index);
        }
    }

    for attr_name in ["x", "y", "z"] {
        if !mapping.contains_key(attr_name) {
            return Err(ReadError::MissingField(attr_name.to_string()));
        }
    }

    Ok((mapping, extra))
}

fn get_field_value<'a>(
    record: &'a StringRecord,
    field_mapping: &HashMap<String, usize>,
    field_name: &str,
) -> Option<&'a str> {
    field_mapping
        .get(field_name)
        .and_then(|&index| record.get(index))
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn parse_number(field: &str, value: &str) -> Result<f64, ReadError> {
    value.parse().map_err(|_| ReadError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    })
}

fn parse_optional_field(
    record: &StringRecord,
    field_mapping: &HashMap<String, usize>,
    field_name: &str,
) -> Result<Option<f64>, ReadError> {
    get_field_value(record, field_mapping, field_name)
        .map(|value| parse_number(field_name, value))
        .transpose()
}

/// Picks `,`, tab or space from the first line of the file.
fn sniff_delimiter(path: &Path) -> Result<u8, ReadError> {
    let mut first_line = String::new();
    BufReader::new(File::open(path)?).read_line(&mut first_line)?;
    Ok(if first_line.contains(',') {
        b','
    } else if first_line.contains('\t') {
        b'\t'
    } else {
        b' '
    })
}

/// Reads delimited text files with one point per row.
///
/// A first row whose fields are not all numeric is taken as a header row;
/// otherwise columns are read positionally as x, y, z, intensity, ...
/// Integer coordinates are derived with the given scale and a zero offset.
pub struct CsvPointReader {
    files: Vec<PathBuf>,
    current_file_index: usize,
    quantization: PointHeader,
    current_reader: Option<csv::Reader<File>>,
    field_mapping: HashMap<String, usize>,
    extra_columns: Vec<usize>,
    pending: Option<StringRecord>,
    header: Option<PointHeader>,
}

impl CsvPointReader {
    pub fn new(files: Vec<PathBuf>, scale: [f64; 3]) -> Result<Self, ReadError> {
        let mut reader = CsvPointReader {
            files,
            current_file_index: 0,
            quantization: PointHeader::new(scale, [0.0; 3]),
            current_reader: None,
            field_mapping: HashMap::new(),
            extra_columns: Vec::new(),
            pending: None,
            header: None,
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

        let mut rdr = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(Trim::All)
            .delimiter(sniff_delimiter(path)?)
            .from_path(path)?;

        let mut first = StringRecord::new();
        if !rdr.read_record(&mut first)? {
            log::warn!("{:?} is empty", path);
        }
        let has_headers = first
            .iter()
            .filter(|field| !field.is_empty())
            .any(|field| field.parse::<f64>().is_err());

        let (mapping, extra) = create_field_mapping(&first, has_headers)?;
        log::debug!(
            "opened {:?} with {} columns (header row: {})",
            path,
            first.len(),
            has_headers
        );
        self.field_mapping = mapping;
        self.extra_columns = extra;
        self.pending = (!has_headers && !first.is_empty()).then_some(first);
        self.header = Some(self.quantization.clone());
        self.current_reader = Some(rdr);
        Ok(())
    }

    fn parse_point(&self, record: &StringRecord) -> Result<PointRecord, ReadError> {
        let mapping = &self.field_mapping;
        let required = |name: &str| -> Result<f64, ReadError> {
            let value = get_field_value(record, mapping, name)
                .ok_or_else(|| ReadError::MissingField(name.to_string()))?;
            parse_number(name, value)
        };
        let x = required("x")?;
        let y = required("y")?;
        let z = required("z")?;
        let optional = |name: &str| parse_optional_field(record, mapping, name);
        let either = |short: &str, long: &str| -> Result<Option<f64>, ReadError> {
            Ok(optional(short)?.or(optional(long)?))
        };

        let red = either("r", "red")?;
        let green = either("g", "green")?;
        let blue = either("b", "blue")?;
        let color = (red.is_some() || green.is_some() || blue.is_some()).then(|| Color {
            r: red.unwrap_or(0.0).floor() as u16,
            g: green.unwrap_or(0.0).floor() as u16,
            b: blue.unwrap_or(0.0).floor() as u16,
        });

        let attributes = self
            .extra_columns
            .iter()
            .map(|&index| match record.get(index).filter(|v| !v.is_empty()) {
                Some(value) => parse_number("attribute", value),
                None => Ok(0.0),
            })
            .collect::<Result<Vec<f64>, ReadError>>()?;

        let classification = optional("classification")?.unwrap_or(0.0) as u8;
        let return_number = optional("return_number")?.unwrap_or(1.0) as u8;
        let number_of_returns = optional("number_of_returns")?.unwrap_or(1.0) as u8;
        let scan_angle = optional("scan_angle")?.unwrap_or(0.0);
        // values the legacy bit fields cannot hold go to the extended group
        let extended = (classification > 31 || return_number > 7 || number_of_returns > 7)
            .then(|| ExtendedFields {
                classification,
                return_number,
                number_of_returns,
                scan_angle: (scan_angle / SCAN_ANGLE_UNIT).round() as i16,
                ..Default::default()
            });

        let header = &self.quantization;
        Ok(PointRecord {
            x,
            y,
            z,
            raw_x: header.to_raw(Axis::X, x),
            raw_y: header.to_raw(Axis::Y, y),
            raw_z: header.to_raw(Axis::Z, z),
            intensity: optional("intensity")?.unwrap_or(0.0) as u16,
            return_number: return_number.min(7),
            number_of_returns: number_of_returns.min(7),
            classification: classification.min(31),
            scan_angle_rank: scan_angle.round().clamp(-128.0, 127.0) as i8,
            user_data: optional("user_data")?.unwrap_or(0.0) as u8,
            point_source_id: optional("point_source_id")?.unwrap_or(0.0) as u16,
            gps_time: optional("gps_time")?,
            color,
            nir: optional("nir")?.map(|nir| nir as u16),
            extended,
            attributes,
            ..Default::default()
        })
    }
}

impl PointReader for CsvPointReader {
    fn next_point(&mut self) -> Result<Option<PointRecord>, ReadError> {
        loop {
            if let Some(record) = self.pending.take() {
                return self.parse_point(&record).map(Some);
            }
            let Some(reader) = self.current_reader.as_mut() else {
                return Ok(None);
            };
            let mut record = StringRecord::new();
            if reader.read_record(&mut record)? {
                if record.iter().all(str::is_empty) {
                    continue;
                }
                return match self.parse_point(&record) {
                    Ok(point) => Ok(Some(point)),
                    Err(e) => {
                        log::error!("Error parsing CSV point: {}", e);
                        Err(e)
                    }
                };
            }
            self.open_next_file()?;
        }
    }

    fn header(&self) -> Option<&PointHeader> {
        self.header.as_ref()
    }
}
