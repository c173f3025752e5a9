//! Robust joint estimation on a stratified sample of pixels.
//!
//! Rather than every pixel, a set of locations is picked so each
//! intensity level is observed a minimum number of times.  The log
//! inverse response and the log irradiance of those locations are then
//! solved for jointly under a Huber loss, with a smoothness penalty on
//! the curve.  The curve is pinned at level 128 to fix its scale.

#[cfg(feature = "robust")]
use tracing::debug;

use crate::{
    calibration::ChannelContext,
    dataset::Dataset,
    error::{Error, Result},
    histogram::Histogram,
    ROBUST_SOLVER_AVAILABLE,
};

#[cfg(feature = "robust")]
use image::RgbImage;

#[cfg(feature = "robust")]
use crate::{
    channel::Channel,
    plot::{curve_points, draw_line_segments, draw_points, finite_range, PREVIEW_SIZE},
    solver::{Observation, ResponseProblem, SolverOptions, LEVELS},
};

const METHOD_NAME: &str = "Debevec";

/// The intensity level whose log response is held at its initial value.
#[cfg(feature = "robust")]
const FIXED_LEVEL: usize = 128;

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct RobustOptions {
    /// Sampling continues until every valid level has been observed at
    /// least this many times (or the pixels run out).
    pub min_samples_per_level: usize,

    /// Weight of the second-difference smoothness penalty.  Its square
    /// scales the penalty.
    pub smoothing_lambda: f64,

    /// Huber threshold, in log units.  Zero or negative selects a plain
    /// squared loss.
    pub huber_scale: f64,
}

impl Default for RobustOptions {
    fn default() -> Self {
        RobustOptions {
            min_samples_per_level: 5,
            smoothing_lambda: 50.0,
            huber_scale: 0.05,
        }
    }
}

impl RobustOptions {
    pub fn min_samples_per_level(mut self, n: usize) -> Self {
        self.min_samples_per_level = n;
        self
    }

    pub fn smoothing_lambda(mut self, lambda: f64) -> Self {
        self.smoothing_lambda = lambda;
        self
    }

    pub fn huber_scale(mut self, scale: f64) -> Self {
        self.huber_scale = scale;
        self
    }
}

#[derive(Debug, Clone)]
pub struct RobustCalibration {
    pub options: RobustOptions,
}

impl RobustCalibration {
    /// Fails with `MethodUnavailable` when the crate was built without
    /// the `robust` feature.
    pub fn new(options: RobustOptions) -> Result<RobustCalibration> {
        if !ROBUST_SOLVER_AVAILABLE {
            return Err(Error::MethodUnavailable(METHOD_NAME));
        }
        Ok(RobustCalibration { options: options })
    }

    #[cfg(not(feature = "robust"))]
    pub(crate) fn calibrate_channel(
        &self,
        _dataset: &Dataset,
        _ctx: &mut ChannelContext,
    ) -> Result<Vec<f64>> {
        Err(Error::MethodUnavailable(METHOD_NAME))
    }

    #[cfg(feature = "robust")]
    pub(crate) fn calibrate_channel(
        &self,
        dataset: &Dataset,
        ctx: &mut ChannelContext,
    ) -> Result<Vec<f64>> {
        debug_assert_eq!(dataset.channels(), 1);
        let name = ctx.channel.display_name(ctx.channel_count);

        let sample = select_pixels(
            dataset,
            self.options.min_samples_per_level,
            ctx.options.valid_pixel_range,
        );
        let (min_valid, max_valid) = ctx.options.valid_pixel_range;
        let short = (min_valid..=max_valid)
            .filter(|&k| sample.histogram.count(k as usize) < self.options.min_samples_per_level)
            .count();
        debug!(
            "{}: sampled {} locations, {} levels below {} samples",
            name,
            sample.locations.len(),
            short,
            self.options.min_samples_per_level
        );

        let mut observations = Vec::new();
        for (t, image) in dataset.iter() {
            let log_time = (t as f64).ln();
            for (i, &index) in sample.locations.iter().enumerate() {
                let p = image.data[index];
                if ctx.is_valid(p) {
                    observations.push(Observation {
                        location: i,
                        level: p,
                        log_time: log_time,
                    });
                }
            }
        }

        let mut a: Vec<f64> = (0..LEVELS)
            .map(|k| (0.5 + k as f64 / 256.0).ln())
            .collect();
        let mut x = initial_irradiance(&a, &observations, sample.locations.len());

        let problem = ResponseProblem {
            observations: observations,
            num_locations: sample.locations.len(),
            huber_scale: self.options.huber_scale,
            smoothing: self.options.smoothing_lambda,
            fixed_level: FIXED_LEVEL,
        };
        let solver_options = SolverOptions::default().max_num_iterations(ctx.options.max_num_iterations);

        ctx.begin();
        let summary = problem.solve(&mut a, &mut x, &solver_options, |it, a, x| {
            ctx.report(it.iteration + 1, it.cost, it.cost_change, ' ');
            if ctx.wants_preview() {
                ctx.preview(|channel, count| plot_progress(&problem.observations, a, x, channel, count));
            }
        });
        ctx.end();

        if ctx.options.verbosity > 1 {
            println!("{}", summary.full_report());
        }
        debug!(
            "{}: {:?} after {} iterations, cost {} -> {}",
            name,
            summary.termination,
            summary.iterations(),
            summary.initial_cost,
            summary.final_cost
        );

        Ok(a.iter().map(|v| v.exp()).collect())
    }
}

/// Initial log irradiance of each location: the mean of
/// `a[p] - ln(t)` over its observations.
#[cfg(feature = "robust")]
fn initial_irradiance(a: &[f64], observations: &[Observation], num_locations: usize) -> Vec<f64> {
    let mut x = vec![0.0f64; num_locations];
    let mut count = vec![0usize; num_locations];
    for o in observations.iter() {
        x[o.location] += a[o.level as usize] - o.log_time;
        count[o.location] += 1;
    }
    for (x, &c) in x.iter_mut().zip(count.iter()) {
        if c > 0 {
            *x /= c as f64;
        }
    }
    x
}

/// Current curve plus the scattered observations it is fitted to.
#[cfg(feature = "robust")]
fn plot_progress(
    observations: &[Observation],
    a: &[f64],
    x: &[f64],
    channel: Channel,
    channel_count: usize,
) -> RgbImage {
    let response: Vec<f64> = a.iter().map(|v| v.exp()).collect();
    let (lo, hi) = finite_range(&response);
    let norm = if hi > lo { 1.0 / (hi - lo) } else { 0.0 };

    let mut img = RgbImage::new(PREVIEW_SIZE, PREVIEW_SIZE);
    draw_points(
        &mut img,
        observations.iter().map(|o| {
            let v = (x[o.location] + o.log_time).exp();
            (o.level as f32 / 255.0, ((v - lo) * norm) as f32)
        }),
        channel.light_color(channel_count),
    );
    draw_line_segments(&mut img, curve_points(&response, lo, hi), channel.color(channel_count));
    img
}

/// Pixel locations picked for the robust method, and how often each
/// level is observed across them.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelSample {
    /// Flat pixel indices.
    pub locations: Vec<usize>,
    pub histogram: Histogram,
}

/// Picks pixel locations so that every level in `valid_pixel_range` is
/// observed at least `min_samples` times, where possible.
///
/// Selection is driven by the first image of the longest exposure.  Its
/// pixels are visited from brightest to darkest, and for each level a
/// pixel showing that level is taken while the level's count is short.
/// Every taken location is then read back from the first image of each
/// exposure and whatever valid level it shows there is counted, so a
/// location can fill several levels at once.
///
/// `dataset` is expected to have a single channel.
pub fn select_pixels(dataset: &Dataset, min_samples: usize, valid_pixel_range: (u8, u8)) -> PixelSample {
    let (min_valid, max_valid) = valid_pixel_range;
    let mut sample = PixelSample {
        locations: Vec::new(),
        histogram: Histogram::for_u8(),
    };

    let times = dataset.exposure_times();
    let firsts: Vec<&[u8]> = times
        .iter()
        .filter_map(|&t| dataset.images(t).first())
        .map(|img| &img.data[..])
        .collect();
    let reference = match firsts.first() {
        Some(&r) => r,
        None => return sample,
    };
    if min_valid > max_valid {
        return sample;
    }

    let mut order: Vec<usize> = (0..reference.len()).collect();
    order.sort_by(|&a, &b| reference[b].cmp(&reference[a]));

    let mut next = 0;
    for level in (min_valid..=max_valid).rev() {
        while sample.histogram.count(level as usize) < min_samples && next < order.len() {
            let index = order[next];
            let p = reference[index];
            if p > level {
                next += 1;
                continue;
            }
            if p < level {
                break;
            }
            next += 1;

            sample.locations.push(index);
            for img in firsts.iter() {
                let p = img[index];
                if p >= min_valid && p <= max_valid {
                    sample.histogram.add(p as usize);
                }
            }
        }
    }

    sample
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::dataset::Image;

    #[test]
    fn sampling_covers_every_level() {
        // Every level appears 16 times in the longest exposure.
        let mut ds = Dataset::new();
        ds.insert(8, Image::from_fn(64, 64, |x, y| ((x + 64 * y) % 256) as u8))
            .unwrap();
        ds.insert(1, Image::from_fn(64, 64, |x, y| ((x + 64 * y) % 256 / 8) as u8))
            .unwrap();

        let sample = select_pixels(&ds, 5, (1, 254));
        for k in 1..=254 {
            assert!(sample.histogram.count(k) >= 5, "level {}", k);
        }
        assert_eq!(sample.histogram.count(0), 0);
        assert_eq!(sample.histogram.count(255), 0);

        // A level never takes more than it needs.
        let reference = &ds.images(8)[0].data;
        let mut per_level = [0usize; 256];
        for &index in sample.locations.iter() {
            let p = reference[index];
            assert!(p >= 1 && p <= 254);
            per_level[p as usize] += 1;
        }
        assert!(per_level.iter().all(|&n| n <= 5));

        let mut unique = sample.locations.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), sample.locations.len());
    }

    #[test]
    fn other_exposures_fill_other_levels() {
        // The longest exposure only shows 200, the shorter one only 100.
        let mut ds = Dataset::new();
        ds.insert(4, Image::from_fn(4, 4, |_, _| 200)).unwrap();
        ds.insert(2, Image::from_fn(4, 4, |_, _| 100)).unwrap();

        let sample = select_pixels(&ds, 5, (1, 254));
        assert_eq!(sample.locations.len(), 5);
        assert_eq!(sample.histogram.count(200), 5);
        assert_eq!(sample.histogram.count(100), 5);
        assert_eq!(sample.histogram.total_samples, 10);
    }

    #[test]
    fn runs_out_of_pixels() {
        let mut ds = Dataset::new();
        ds.insert(1, Image::from_fn(2, 1, |x, _| 50 + x as u8)).unwrap();
        let sample = select_pixels(&ds, 5, (1, 254));
        assert_eq!(sample.locations, vec![1, 0]);
        assert_eq!(sample.histogram.count(51), 1);
        assert_eq!(sample.histogram.count(50), 1);
    }

    #[test]
    fn empty_dataset_samples_nothing() {
        let sample = select_pixels(&Dataset::new(), 5, (1, 254));
        assert!(sample.locations.is_empty());
        assert_eq!(sample.histogram.total_samples, 0);
    }

    #[cfg(not(feature = "robust"))]
    #[test]
    fn unavailable_without_solver() {
        assert_eq!(
            RobustCalibration::new(RobustOptions::default()).err(),
            Some(Error::MethodUnavailable("Debevec"))
        );
    }

    #[cfg(feature = "robust")]
    #[test]
    fn recovers_linear_response() {
        use crate::calibration::{post_process, CalibrationOptions};

        let width = 32;
        let irradiance: Vec<f64> = (0..1024).map(|i| (i as f64 + 0.5) / 1024.0).collect();
        let mut ds = Dataset::new();
        for &t in &[16u32, 32, 64, 128, 256] {
            ds.insert(
                t,
                Image::from_fn(width, 32, |x, y| {
                    (t as f64 * irradiance[y * width + x]).round().min(255.0) as u8
                }),
            )
            .unwrap();
        }

        let options = CalibrationOptions::default().max_num_iterations(50);
        let calib = RobustCalibration::new(RobustOptions::default()).unwrap();
        let mut ctx = ChannelContext::new(Channel::new(0), 1, &options, None);
        let raw = calib.calibrate_channel(&ds, &mut ctx).unwrap();
        assert_eq!(raw.len(), 256);
        assert!(raw.iter().all(|v| v.is_finite() && *v > 0.0));
        // Level 128 starts at ln(1) and never moves.
        assert!((raw[128] - 1.0).abs() < 1e-12);

        let curve = post_process(&raw, 1, 254);
        assert!(curve.windows(2).all(|w| w[0] <= w[1]));
        let reference = curve[200] as f64 / 200.0;
        for k in 64..=250 {
            let expected = reference * k as f64;
            assert!(
                (curve[k] as f64 - expected).abs() < 0.05,
                "level {}: {} vs {}",
                k,
                curve[k],
                expected
            );
        }
    }

    #[cfg(feature = "robust")]
    #[test]
    fn initial_irradiance_is_mean() {
        let a: Vec<f64> = (0..256).map(|k| k as f64).collect();
        let observations = vec![
            Observation { location: 0, level: 10, log_time: 1.0 },
            Observation { location: 0, level: 20, log_time: 3.0 },
            Observation { location: 2, level: 5, log_time: 0.0 },
        ];
        let x = initial_irradiance(&a, &observations, 3);
        assert_eq!(x, vec![13.0, 0.0, 5.0]);
    }
}
