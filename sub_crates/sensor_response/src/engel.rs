//! Alternating estimation of the inverse response and the irradiance map.
//!
//! Each iteration first solves for the per-pixel irradiance with the
//! inverse response held fixed, then for the inverse response with the
//! irradiance held fixed.  Both steps have closed-form solutions.  The
//! pair is only defined up to a common scale factor, so after every
//! iteration both are rescaled such that `U[128] == 1`.

use image::RgbImage;
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::{
    calibration::ChannelContext,
    channel::Channel,
    dataset::Dataset,
    plot::{curve_points, draw_line_segments, finite_range, PREVIEW_SIZE},
};

/// The intensity level the inverse response is anchored to.
const ANCHOR_LEVEL: usize = 128;

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct AlternatingOptions {
    /// Iteration stops once a half-step lowers the energy by less than
    /// this.
    pub convergence_threshold: f64,
}

impl Default for AlternatingOptions {
    fn default() -> Self {
        AlternatingOptions {
            convergence_threshold: 1e-5,
        }
    }
}

impl AlternatingOptions {
    pub fn convergence_threshold(mut self, threshold: f64) -> Self {
        self.convergence_threshold = threshold;
        self
    }
}

#[derive(Debug, Clone)]
pub struct AlternatingCalibration {
    pub options: AlternatingOptions,
}

impl AlternatingCalibration {
    pub fn new(options: AlternatingOptions) -> AlternatingCalibration {
        AlternatingCalibration { options: options }
    }

    pub(crate) fn calibrate_channel(&self, dataset: &Dataset, ctx: &mut ChannelContext) -> Vec<f64> {
        let initial: Vec<f64> = (0..256).map(|k| k as f64 / 255.0).collect();
        let outcome = self.run(dataset, ctx, initial);

        let name = ctx.channel.display_name(ctx.channel_count);
        if outcome.converged {
            debug!("{}: converged after {} half-steps", name, outcome.half_steps);
        } else {
            warn!(
                "{}: stopped at the iteration cap ({} half-steps) without converging",
                name, outcome.half_steps
            );
        }
        outcome.response
    }

    fn run(&self, dataset: &Dataset, ctx: &mut ChannelContext, initial: Vec<f64>) -> Outcome {
        debug_assert_eq!(dataset.channels(), 1);
        let max_iterations = ctx.options.max_num_iterations;
        let threshold = self.options.convergence_threshold;
        let mut state = AlternatingState::new(dataset, ctx.options.valid_pixel_range, initial);

        ctx.begin();

        let mut iteration = 0;
        let mut energy = 0.0;
        let mut delta = 0.0;
        let mut converged = false;
        while iteration < max_iterations {
            state.irradiance_step();
            let e = state.energy();
            if iteration > 0 {
                delta = energy - e;
                if delta < threshold {
                    converged = true;
                }
            }
            energy = e;
            iteration += 1;
            ctx.report(iteration, energy, delta, 'B');

            state.response_step();
            let e = state.energy();
            delta = energy - e;
            if energy > 0.0 && delta < threshold {
                converged = true;
            }
            energy = e;
            iteration += 1;
            ctx.report(iteration, energy, delta, 'U');

            state.rescale();
            ctx.preview(|channel, count| state.plot(channel, count));

            if converged {
                break;
            }
        }

        ctx.end();
        debug!("final energy {}", energy);

        Outcome {
            response: state.u,
            half_steps: iteration,
            converged: converged,
        }
    }
}

struct Outcome {
    response: Vec<f64>,
    half_steps: usize,
    converged: bool,
}

/// Working arrays for one channel.
struct AlternatingState<'a> {
    /// `(exposure_time, pixels)` for every image in the dataset.
    samples: Vec<(f64, &'a [u8])>,
    pixel_count: usize,
    min_valid: u8,
    max_valid: u8,

    /// Inverse response, one entry per intensity level.
    u: Vec<f64>,
    /// Irradiance, one entry per pixel.
    b: Vec<f64>,
    /// Product of all rescalings applied so far.
    scale: f64,
}

impl<'a> AlternatingState<'a> {
    fn new(dataset: &'a Dataset, valid_pixel_range: (u8, u8), initial: Vec<f64>) -> Self {
        let (w, h) = dataset.image_size();
        AlternatingState {
            samples: dataset
                .iter()
                .map(|(t, img)| (t as f64, &img.data[..]))
                .collect(),
            pixel_count: w * h,
            min_valid: valid_pixel_range.0,
            max_valid: valid_pixel_range.1,
            u: initial,
            b: vec![0.0; w * h],
            scale: 1.0,
        }
    }

    /// Closed-form irradiance for the current inverse response:
    /// `B(x) = sum_t U[I_t(x)] t / sum_t t^2` over the valid samples of
    /// each pixel.
    fn irradiance_step(&mut self) {
        let (min, max) = (self.min_valid, self.max_valid);
        let mut numer = vec![0.0f64; self.pixel_count];
        let mut denom = vec![0.0f64; self.pixel_count];

        let u = &self.u;
        for &(t, pixels) in self.samples.iter() {
            numer
                .par_iter_mut()
                .zip(denom.par_iter_mut())
                .zip(pixels.par_iter())
                .for_each(|((n, d), &p)| {
                    if p >= min && p <= max {
                        *n += u[p as usize] * t;
                        *d += t * t;
                    }
                });
        }

        // Pixels that are never validly exposed carry no information.
        self.b = numer
            .into_par_iter()
            .zip(denom)
            .map(|(n, d)| if d > 0.0 { n / d } else { 0.0 })
            .collect();
    }

    /// Closed-form inverse response for the current irradiance:
    /// `U[k]` is the mean of `t B(x)` over all observations of level `k`.
    fn response_step(&mut self) {
        let mut sums = [0.0f64; 256];
        let mut counts = [0usize; 256];
        for &(t, pixels) in self.samples.iter() {
            for (&p, &b) in pixels.iter().zip(self.b.iter()) {
                sums[p as usize] += t * b;
                counts[p as usize] += 1;
            }
        }

        let (min, max) = (self.min_valid as usize, self.max_valid as usize);
        let mut u = vec![0.0f64; 256];
        let mut observed = Vec::new();
        for k in min..=max {
            if counts[k] > 0 {
                u[k] = sums[k] / counts[k] as f64;
                observed.push(k);
            }
        }
        fill_unobserved(&mut u, &observed, min, max);

        let top = 2.0 * u[max] - u[max - 1];
        for v in u[(max + 1)..].iter_mut() {
            *v = top;
        }

        self.u = u;
    }

    /// Root-mean-square residual over the valid observations, expressed
    /// in the scale of the initial guess.
    fn energy(&self) -> f64 {
        let mut energy = 0.0f64;
        let mut num = 0usize;
        for &(t, pixels) in self.samples.iter() {
            for (&p, &b) in pixels.iter().zip(self.b.iter()) {
                if p >= self.min_valid && p <= self.max_valid {
                    let r = self.u[p as usize] - t * b;
                    energy += r * r;
                    num += 1;
                }
            }
        }
        if num == 0 {
            return 0.0;
        }
        (energy / num as f64).sqrt() / self.scale
    }

    fn rescale(&mut self) {
        let mut anchor = self.u[ANCHOR_LEVEL];
        if !(anchor.is_finite() && anchor > 0.0) {
            anchor = self
                .u
                .iter()
                .copied()
                .filter(|v| v.is_finite())
                .fold(0.0, f64::max);
        }
        if !(anchor.is_finite() && anchor > 0.0) {
            return;
        }

        let s = 1.0 / anchor;
        self.u.iter_mut().for_each(|v| *v *= s);
        self.b.par_iter_mut().for_each(|v| *v *= s);
        self.scale *= s;
    }

    fn plot(&self, channel: Channel, channel_count: usize) -> RgbImage {
        let mut img = RgbImage::new(PREVIEW_SIZE, PREVIEW_SIZE);
        let (lo, hi) = finite_range(&self.u);
        draw_line_segments(&mut img, curve_points(&self.u, lo, hi), channel.color(channel_count));
        img
    }
}

/// Fills the levels in `[lo, hi]` that have no observations.
///
/// Gaps between observed levels are linearly interpolated.  Levels before
/// the first observed level take its value, and levels after the last one
/// are extrapolated along the line through the two highest observed
/// levels.
fn fill_unobserved(u: &mut [f64], observed: &[usize], lo: usize, hi: usize) {
    match observed.len() {
        0 => return,
        1 => {
            let v = u[observed[0]];
            for x in u[lo..=hi].iter_mut() {
                *x = v;
            }
            return;
        }
        _ => {}
    }

    let line = |u: &[f64], a: usize, b: usize, k: usize| -> f64 {
        let slope = (u[b] - u[a]) / (b - a) as f64;
        u[a] + slope * (k as f64 - a as f64)
    };

    // Leading gap.  Extrapolating downwards can cross zero.
    let first = observed[0];
    let v = u[first];
    for x in u[lo..first].iter_mut() {
        *x = v;
    }

    // Interior gaps.
    for pair in observed.windows(2) {
        for k in (pair[0] + 1)..pair[1] {
            let v = line(u, pair[0], pair[1], k);
            u[k] = v;
        }
    }

    // Trailing gap.
    let (prev, last) = (observed[observed.len() - 2], observed[observed.len() - 1]);
    for k in (last + 1)..=hi {
        let v = line(u, prev, last, k);
        u[k] = v;
    }
}
