pub mod csv;
pub mod las;

use std::{ffi::OsStr, path::Path, path::PathBuf};

use pcd_core::pointcloud::{header::PointHeader, point::PointRecord};

use crate::error::ReadError;

/// Streams decoded points from one or more files.
pub trait PointReader {
    fn next_point(&mut self) -> Result<Option<PointRecord>, ReadError>;

    /// Header of the file currently being read, once a file is open.
    fn header(&self) -> Option<&PointHeader>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extension {
    Las,
    Laz,
    Csv,
    Txt,
}

pub fn get_extension(extension: &str) -> Result<Extension, ReadError> {
    match extension.to_ascii_lowercase().as_str() {
        "las" => Ok(Extension::Las),
        "laz" => Ok(Extension::Laz),
        "csv" => Ok(Extension::Csv),
        "txt" => Ok(Extension::Txt),
        _ => Err(ReadError::UnsupportedExtension(extension.to_string())),
    }
}

pub fn extension_of(path: &Path) -> Result<Extension, ReadError> {
    let extension = path
        .extension()
        .and_then(OsStr::to_str)
        .ok_or_else(|| ReadError::UnsupportedExtension(path.display().to_string()))?;
    get_extension(extension)
}

/// Opens a reader for `files`, which must all share one extension. Text
/// formats carry no quantization, so `scale` is used for their integer
/// coordinates.
pub fn open_reader(
    files: Vec<PathBuf>,
    scale: [f64; 3],
) -> Result<Box<dyn PointReader>, ReadError> {
    let Some(first) = files.first() else {
        return Err(ReadError::NoInput);
    };
    let extension = extension_of(first)?;
    for path in &files[1..] {
        if extension_of(path)? != extension {
            return Err(ReadError::UnsupportedExtension(format!(
                "mixed extensions in {}",
                path.display()
            )));
        }
    }
    match extension {
        Extension::Las | Extension::Laz => Ok(Box::new(las::LasPointReader::new(files)?)),
        Extension::Csv | Extension::Txt => Ok(Box::new(csv::CsvPointReader::new(files, scale)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extensions_are_case_insensitive() {
        assert_eq!(get_extension("LAZ").unwrap(), Extension::Laz);
        assert_eq!(
            extension_of(Path::new("/data/tile.csv")).unwrap(),
            Extension::Csv
        );
        assert!(matches!(
            get_extension("ply"),
            Err(ReadError::UnsupportedExtension(_))
        ));
        assert!(extension_of(Path::new("/data/noext")).is_err());
    }

    #[test]
    fn mixed_inputs_are_rejected() {
        let files = vec![PathBuf::from("a.las"), PathBuf::from("b.csv")];
        assert!(open_reader(files, [0.01; 3]).is_err());
        assert!(open_reader(vec![], [0.01; 3]).is_err());
    }
}
