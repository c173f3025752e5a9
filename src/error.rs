use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Image(#[from] image_fmt::Error),

    #[error(transparent)]
    Calibration(#[from] sensor_response::Error),

    #[error("{0} is not a directory")]
    NotADirectory(PathBuf),

    #[error("{path}: {reason}")]
    InvalidFile { path: PathBuf, reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;
