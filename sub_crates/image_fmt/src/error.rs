use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("UnknownFormat: could not determine the image file format.")]
    UnknownFormat,

    #[error("UnsupportedFeature: {0}")]
    UnsupportedFeature(&'static str),

    #[error(transparent)]
    PngDecode(#[from] png::DecodingError),

    #[error(transparent)]
    PngEncode(#[from] png::EncodingError),

    #[error("InvalidMat: {0}")]
    InvalidMat(String),
}

pub type Result<T> = std::result::Result<T, Error>;
