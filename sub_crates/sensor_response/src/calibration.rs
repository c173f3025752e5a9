//! Per-channel calibration driver shared by all methods.

use image::RgbImage;
use tracing::{debug, info};

use crate::{
    channel::Channel,
    dataset::Dataset,
    engel::{AlternatingCalibration, AlternatingOptions},
    error::{Error, Result},
    response::RadiometricResponse,
    robust::{RobustCalibration, RobustOptions},
};

/// Callback that receives intermediate plots while a calibration runs.
///
/// It's invoked synchronously and may block.
pub type ProgressHook = Box<dyn FnMut(&RgbImage)>;

/// Options shared by every calibration method.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct CalibrationOptions {
    /// Cap on the number of iterations run per channel.
    pub max_num_iterations: usize,

    /// 0 is silent, 1 prints a per-iteration table, 2 adds solver
    /// summaries.
    pub verbosity: u32,

    /// Inclusive range of intensities the sensor records faithfully.
    ///
    /// Pixels outside it are left out of irradiance estimation, and
    /// the calibrated curve is clamped to 0/1 outside it.
    pub valid_pixel_range: (u8, u8),
}

impl Default for CalibrationOptions {
    fn default() -> Self {
        CalibrationOptions {
            max_num_iterations: 30,
            verbosity: 0,
            valid_pixel_range: (1, 254),
        }
    }
}

impl CalibrationOptions {
    pub fn max_num_iterations(mut self, n: usize) -> Self {
        self.max_num_iterations = n;
        self
    }

    pub fn verbosity(mut self, level: u32) -> Self {
        self.verbosity = level;
        self
    }

    pub fn valid_pixel_range(mut self, min_valid: u8, max_valid: u8) -> Self {
        self.valid_pixel_range = (min_valid, max_valid);
        self
    }

    pub fn validate(&self) -> Result<()> {
        let (min, max) = self.valid_pixel_range;
        if min >= max {
            return Err(Error::InvalidValidRange { min, max });
        }
        Ok(())
    }

    #[inline]
    pub fn is_valid(&self, pixel: u8) -> bool {
        pixel >= self.valid_pixel_range.0 && pixel <= self.valid_pixel_range.1
    }
}

/// Prints the per-iteration residual table.
#[derive(Debug)]
pub(crate) struct ProgressTable {
    enabled: bool,
    name: String,
}

impl ProgressTable {
    fn new(enabled: bool, name: String) -> ProgressTable {
        ProgressTable {
            enabled: enabled,
            name: name,
        }
    }

    fn header(&self) {
        if self.enabled {
            println!(
                "| {:^7} | {:^5} | {:^14} | {:^14} |",
                "Channel", "Iter", "Residual", "Delta"
            );
        }
    }

    fn row(&self, iteration: usize, residual: f64, delta: f64, marker: char) {
        if !self.enabled {
            return;
        }
        if iteration == 1 {
            println!(
                "| {:^7} | {:^4}{} | {:>14.6} | {:^14} |",
                self.name, iteration, marker, residual, ""
            );
        } else {
            println!(
                "| {:^7} | {:^4}{} | {:>14.6} | {:>14.6} |",
                "", iteration, marker, residual, delta
            );
        }
    }

    fn footer(&self) {
        if self.enabled {
            println!("{}", "-".repeat(53));
        }
    }
}

/// Everything a method needs to know about the channel it is
/// calibrating, besides the data itself.
pub struct ChannelContext<'a> {
    pub channel: Channel,
    pub channel_count: usize,
    pub options: &'a CalibrationOptions,
    table: ProgressTable,
    hook: Option<&'a mut ProgressHook>,
}

impl<'a> ChannelContext<'a> {
    pub(crate) fn new(
        channel: Channel,
        channel_count: usize,
        options: &'a CalibrationOptions,
        hook: Option<&'a mut ProgressHook>,
    ) -> ChannelContext<'a> {
        ChannelContext {
            channel: channel,
            channel_count: channel_count,
            options: options,
            table: ProgressTable::new(options.verbosity > 0, channel.display_name(channel_count)),
            hook: hook,
        }
    }

    #[inline]
    pub fn is_valid(&self, pixel: u8) -> bool {
        self.options.is_valid(pixel)
    }

    pub fn begin(&self) {
        self.table.header();
    }

    pub fn end(&self) {
        self.table.footer();
    }

    /// Reports one iteration.  `marker` tags which step produced it.
    pub fn report(&self, iteration: usize, residual: f64, delta: f64, marker: char) {
        self.table.row(iteration, residual, delta, marker);
    }

    pub fn wants_preview(&self) -> bool {
        self.hook.is_some()
    }

    /// Builds a preview with `make` and hands it to the progress hook.
    /// Nothing is built when no hook is installed.
    pub fn preview<F>(&mut self, make: F)
    where
        F: FnOnce(Channel, usize) -> RgbImage,
    {
        if let Some(hook) = self.hook.as_mut() {
            let img = make(self.channel, self.channel_count);
            (*hook)(&img);
        }
    }
}

/// The available calibration algorithms.
#[derive(Debug, Clone)]
pub enum Method {
    Alternating(AlternatingCalibration),
    Robust(RobustCalibration),
}

impl Method {
    /// Picks a method with default settings by name: `"engel"` or
    /// `"debevec"`.
    pub fn from_name(name: &str) -> Result<Method> {
        match name.to_lowercase().as_str() {
            "engel" => Ok(Method::Alternating(AlternatingCalibration::new(
                AlternatingOptions::default(),
            ))),
            "debevec" => Ok(Method::Robust(RobustCalibration::new(RobustOptions::default())?)),
            _ => Err(Error::UnknownMethod(name.into())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Method::Alternating(_) => "Engel",
            Method::Robust(_) => "Debevec",
        }
    }

    fn calibrate_channel(&self, dataset: &Dataset, ctx: &mut ChannelContext) -> Result<Vec<f64>> {
        match self {
            Method::Alternating(m) => Ok(m.calibrate_channel(dataset, ctx)),
            Method::Robust(m) => m.calibrate_channel(dataset, ctx),
        }
    }
}

/// Jointly estimates the inverse response of each channel and the
/// scene irradiance from a multi-exposure dataset.
pub struct Calibration {
    pub options: CalibrationOptions,
    pub method: Method,
    hook: Option<ProgressHook>,
}

impl Calibration {
    pub fn new(method: Method, options: CalibrationOptions) -> Calibration {
        Calibration {
            options: options,
            method: method,
            hook: None,
        }
    }

    /// Installs a callback that receives a plot of the current estimate
    /// after every iteration.
    pub fn set_progress_hook<F>(&mut self, hook: F)
    where
        F: FnMut(&RgbImage) + 'static,
    {
        self.hook = Some(Box::new(hook));
    }

    pub fn clear_progress_hook(&mut self) {
        self.hook = None;
    }

    /// Calibrates every channel of `dataset` independently and returns
    /// the combined, post-processed inverse response.
    pub fn calibrate(&mut self, dataset: &Dataset) -> Result<RadiometricResponse> {
        self.options.validate()?;
        if dataset.is_empty() {
            return Err(Error::EmptyDataset);
        }

        info!(
            "Starting {} calibration ({} images, {} exposure times)",
            self.method.name(),
            dataset.num_images(),
            dataset.exposure_times().len()
        );

        let channels = dataset.split_channels();
        let channel_count = channels.len();
        let (min_valid, max_valid) = self.options.valid_pixel_range;

        let mut curves = Vec::with_capacity(channel_count);
        for (c, channel_data) in channels.iter().enumerate() {
            let mut ctx = ChannelContext::new(
                Channel::new(c),
                channel_count,
                &self.options,
                self.hook.as_mut(),
            );
            let raw = self.method.calibrate_channel(channel_data, &mut ctx)?;
            debug!(
                "{} channel done",
                Channel::new(c).display_name(channel_count)
            );
            curves.push(post_process(&raw, min_valid, max_valid));
        }

        info!("{} calibration finished", self.method.name());
        RadiometricResponse::new(curves)
    }
}

/// Turns a raw inverse response into an invertible lookup table.
///
/// The curve is scaled so its maximum over the valid range is 1, levels
/// below `min_valid`
/// become 0, levels above `max_valid` become 1, and the result is sorted
/// so it is monotonically non-decreasing.  Scaled values are clamped to
/// [0, 1] first, so sorting can't move anything but zeros below
/// `min_valid` or anything but ones above `max_valid`.
pub fn post_process(curve: &[f64], min_valid: u8, max_valid: u8) -> Vec<f32> {
    let valid = (min_valid as usize).min(curve.len())..(max_valid as usize + 1).min(curve.len());
    let max = curve[valid]
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(std::f64::NEG_INFINITY, f64::max);
    let norm = if max.is_finite() && max > 0.0 { 1.0 / max } else { 1.0 };

    let mut out: Vec<f32> = curve
        .iter()
        .enumerate()
        .map(|(k, &v)| {
            if k < min_valid as usize {
                0.0
            } else if k > max_valid as usize {
                1.0
            } else if v.is_finite() {
                (v * norm).max(0.0).min(1.0) as f32
            } else {
                0.0
            }
        })
        .collect();
    out.sort_by(|a, b| a.total_cmp(b));
    out
}
