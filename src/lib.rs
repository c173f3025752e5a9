//! File handling and logging for the response calibration tools.

mod error;

pub mod dataset_io;
pub mod logger;

pub use error::{Error, Result};
