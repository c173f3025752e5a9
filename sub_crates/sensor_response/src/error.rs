use thiserror::Error;

/// Image shape as `(width, height, channels)`.
pub type Shape = (usize, usize, usize);

#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum Error {
    #[error("image of shape {actual:?} does not match the dataset shape {expected:?}")]
    SizeMismatch { expected: Shape, actual: Shape },

    #[error("exposure time must be a positive integer, got {0}")]
    InvalidExposureTime(u32),

    #[error("images must have 1 or 3 channels, got {0}")]
    UnsupportedChannels(usize),

    #[error("image buffer holds {actual} bytes, but its shape needs {expected}")]
    BufferSize { expected: usize, actual: usize },

    #[error("cannot calibrate from an empty dataset")]
    EmptyDataset,

    #[error("invalid valid-pixel range [{min}, {max}]")]
    InvalidValidRange { min: u8, max: u8 },

    #[error("calibration method \"{0}\" is unavailable in this build")]
    MethodUnavailable(&'static str),

    #[error("unknown calibration method \"{0}\", expected \"engel\" or \"debevec\"")]
    UnknownMethod(String),

    #[error("expected {expected} channel(s), got {actual}")]
    ChannelMismatch { expected: usize, actual: usize },

    #[error("invalid radiometric response: {0}")]
    InvalidResponse(String),
}

pub type Result<T> = std::result::Result<T, Error>;
