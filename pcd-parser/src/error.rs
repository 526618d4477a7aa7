use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReadError {
    #[error("LAS error: {0}")]
    Las(#[from] las::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("required field '{0}' is missing")]
    MissingField(String),
    #[error("invalid value '{value}' for field '{field}'")]
    InvalidValue { field: String, value: String },
    #[error("no input files")]
    NoInput,
    #[error("unsupported extension: {0}")]
    UnsupportedExtension(String),
}
