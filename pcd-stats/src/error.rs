use std::{collections::TryReserveError, io, path::PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StatsError {
    #[error("histogram of '{0}' not implemented")]
    UnknownChannel(String),
    #[error("histogram of '{channel}' with '{average_of}' averages not implemented")]
    UnsupportedAverage { channel: String, average_of: String },
    #[error("invalid bin size {0}")]
    InvalidStep(f64),
    #[error("value {value} with bin size {step} is outside the representable bins")]
    BinOutOfRange { value: f64, step: f64 },
    #[error("invalid grid spacing {0}")]
    InvalidSpacing(f64),
    #[error("no prior header totals to initialize from")]
    MissingHeader,
    #[error("{field} of {count} does not fit into 32 bits for LAS 1.{version_minor}")]
    CountOverflow {
        field: &'static str,
        count: u64,
        version_minor: u8,
    },
    #[error("failed to grow {what} to {len} entries")]
    Allocation {
        what: &'static str,
        len: usize,
        #[source]
        source: TryReserveError,
    },
    #[error("cannot merge: {0}")]
    IncompatibleMerge(String),
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
