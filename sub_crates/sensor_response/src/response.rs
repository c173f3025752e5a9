use image::RgbImage;

use crate::{
    dataset::Image,
    error::{Error, Result},
    plot::plot_response,
};

/// A calibrated inverse response: for each channel, a 256-entry table
/// from 8-bit brightness to relative irradiance.
#[derive(Debug, Clone, PartialEq)]
pub struct RadiometricResponse {
    curves: Vec<Vec<f32>>,
    log_curves: Vec<Vec<f32>>,
}

impl RadiometricResponse {
    /// Takes one 256-entry curve per channel.  Only 1 or 3 channels are
    /// accepted, and every entry must be finite.
    pub fn new(curves: Vec<Vec<f32>>) -> Result<RadiometricResponse> {
        if curves.len() != 1 && curves.len() != 3 {
            return Err(Error::InvalidResponse(format!(
                "expected 1 or 3 channels, got {}",
                curves.len()
            )));
        }
        for (c, curve) in curves.iter().enumerate() {
            if curve.len() != 256 {
                return Err(Error::InvalidResponse(format!(
                    "channel {} has {} entries instead of 256",
                    c,
                    curve.len()
                )));
            }
            if let Some(k) = curve.iter().position(|v| !v.is_finite()) {
                return Err(Error::InvalidResponse(format!(
                    "channel {} has a non-finite value at level {}",
                    c, k
                )));
            }
        }

        let log_curves = curves
            .iter()
            .map(|curve| curve.iter().map(|v| v.ln()).collect())
            .collect();
        Ok(RadiometricResponse {
            curves: curves,
            log_curves: log_curves,
        })
    }

    pub fn channels(&self) -> usize {
        self.curves.len()
    }

    pub fn curve(&self, channel: usize) -> &[f32] {
        &self.curves[channel]
    }

    pub fn curves(&self) -> &[Vec<f32>] {
        &self.curves
    }

    fn check_channels(&self, n: usize) -> Result<()> {
        if n != self.channels() {
            return Err(Error::ChannelMismatch {
                expected: self.channels(),
                actual: n,
            });
        }
        Ok(())
    }

    /// Irradiance of one pixel, given its brightness in every channel.
    pub fn inverse_map(&self, brightness: &[u8]) -> Result<Vec<f32>> {
        self.check_channels(brightness.len())?;
        Ok(brightness
            .iter()
            .zip(self.curves.iter())
            .map(|(&b, curve)| curve[b as usize])
            .collect())
    }

    /// Natural log of `inverse_map()`.  Levels that map to zero
    /// irradiance give negative infinity.
    pub fn inverse_log_map(&self, brightness: &[u8]) -> Result<Vec<f32>> {
        self.check_channels(brightness.len())?;
        Ok(brightness
            .iter()
            .zip(self.log_curves.iter())
            .map(|(&b, curve)| curve[b as usize])
            .collect())
    }

    /// Brightness the sensor would record for the given irradiance: the
    /// lowest level whose irradiance is not below it, or 255 if every
    /// level is.
    pub fn direct_map(&self, irradiance: &[f32]) -> Result<Vec<u8>> {
        self.check_channels(irradiance.len())?;
        Ok(irradiance
            .iter()
            .zip(self.curves.iter())
            .map(|(&e, curve)| lower_bound(curve, e))
            .collect())
    }

    /// Applies `inverse_map()` to every pixel.  The result is interleaved
    /// like the image.
    pub fn inverse_map_image(&self, image: &Image) -> Result<Vec<f32>> {
        self.check_channels(image.channels)?;
        let n = self.channels();
        Ok(image
            .data
            .iter()
            .enumerate()
            .map(|(i, &b)| self.curves[i % n][b as usize])
            .collect())
    }

    pub fn inverse_log_map_image(&self, image: &Image) -> Result<Vec<f32>> {
        self.check_channels(image.channels)?;
        let n = self.channels();
        Ok(image
            .data
            .iter()
            .enumerate()
            .map(|(i, &b)| self.log_curves[i % n][b as usize])
            .collect())
    }

    /// Applies `direct_map()` to an interleaved irradiance buffer.
    pub fn direct_map_image(&self, width: usize, height: usize, irradiance: &[f32]) -> Result<Image> {
        let n = self.channels();
        if irradiance.len() != width * height * n {
            return Err(Error::BufferSize {
                expected: width * height * n,
                actual: irradiance.len(),
            });
        }
        let data = irradiance
            .iter()
            .enumerate()
            .map(|(i, &e)| lower_bound(&self.curves[i % n], e))
            .collect();
        Image::new(width, height, n, data)
    }

    /// Plots every channel's curve.
    pub fn plot(&self, width: u32, height: u32) -> RgbImage {
        let curves: Vec<Vec<f64>> = self
            .curves
            .iter()
            .map(|c| c.iter().map(|&v| v as f64).collect())
            .collect();
        plot_response(&curves, width, height)
    }
}

/// Index of the first entry of a non-decreasing `curve` that is not less
/// than `value`, clamped to 255.
fn lower_bound(curve: &[f32], value: f32) -> u8 {
    curve.partition_point(|&v| v < value).min(255) as u8
}
