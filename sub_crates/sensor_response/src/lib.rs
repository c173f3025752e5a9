//! Radiometric response calibration.
//!
//! Given a set of 8-bit images of a static scene captured at several
//! exposure times, estimates the inverse camera response of each
//! channel: the map from recorded brightness to relative irradiance.
//!
//! Two methods are provided.  The alternating method solves in closed
//! form for the response and the per-pixel irradiance in turn, using
//! every pixel.  The robust method samples pixels so every intensity
//! level is covered and solves a regularized nonlinear least squares
//! problem; it needs the `robust` feature.

mod calibration;
mod channel;
mod dataset;
mod engel;
mod error;
mod histogram;
mod plot;
mod response;
mod robust;
#[cfg(feature = "robust")]
mod solver;

pub use calibration::{
    post_process, Calibration, CalibrationOptions, ChannelContext, Method, ProgressHook,
};
pub use channel::{colors, Channel};
pub use dataset::{Dataset, Image};
pub use engel::{AlternatingCalibration, AlternatingOptions};
pub use error::{Error, Result, Shape};
pub use histogram::Histogram;
pub use plot::{draw_line_segments, draw_points, plot_response};
pub use response::RadiometricResponse;
pub use robust::{select_pixels, PixelSample, RobustCalibration, RobustOptions};

/// Whether the robust method was compiled in.
pub const ROBUST_SOLVER_AVAILABLE: bool = cfg!(feature = "robust");
