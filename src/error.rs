use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Missing or malformed configuration key, or an unsupported setting.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Crop rectangle with non-positive size or outside the frame.
    #[error("invalid region: {0}")]
    InvalidRegion(String),

    #[error("{axis} index {index} out of range (count: {count})")]
    IndexOutOfRange {
        axis: &'static str,
        index: usize,
        count: usize,
    },

    #[error("cannot write to {path:?}: {source}")]
    PathUnwritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("invalid file format: {0}")]
    InvalidFormat(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    #[error("MRC error: {0}")]
    Mrc(#[from] mrc::Error),

    #[error("INI error: {0}")]
    Ini(#[from] ini::Error),
}

impl Error {
    pub(crate) fn out_of_range(axis: &'static str, index: usize, count: usize) -> Self {
        Error::IndexOutOfRange { axis, index, count }
    }
}
