use std::collections::BTreeMap;

use crate::error::{Error, Result, Shape};

/// An 8-bit image with interleaved channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    pub data: Vec<u8>,
}

impl Image {
    /// Wraps an interleaved buffer.  Only gray (1) and color (3)
    /// channel counts are accepted.
    pub fn new(width: usize, height: usize, channels: usize, data: Vec<u8>) -> Result<Image> {
        check_channels(channels)?;
        let expected = width * height * channels;
        if data.len() != expected {
            return Err(Error::BufferSize {
                expected,
                actual: data.len(),
            });
        }
        Ok(Image {
            width: width,
            height: height,
            channels: channels,
            data: data,
        })
    }

    /// Builds a single-channel image by evaluating `f(x, y)` for every pixel.
    pub fn from_fn<F>(width: usize, height: usize, mut f: F) -> Image
    where
        F: FnMut(usize, usize) -> u8,
    {
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Image {
            width: width,
            height: height,
            channels: 1,
            data: data,
        }
    }

    pub fn shape(&self) -> Shape {
        (self.width, self.height, self.channels)
    }

    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    /// Decomposes the image into one single-channel image per channel.
    pub fn split_channels(&self) -> Vec<Image> {
        if self.channels == 1 {
            return vec![self.clone()];
        }
        (0..self.channels)
            .map(|c| Image {
                width: self.width,
                height: self.height,
                channels: 1,
                data: self
                    .data
                    .chunks(self.channels)
                    .map(|px| px[c])
                    .collect(),
            })
            .collect()
    }
}

fn check_channels(channels: usize) -> Result<()> {
    match channels {
        1 | 3 => Ok(()),
        n => Err(Error::UnsupportedChannels(n)),
    }
}

/// A set of images of a static scene, each tagged with the exposure
/// time it was captured at.
///
/// Several images may share an exposure time.  All images in a dataset
/// have the same size and channel count.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    shape: Option<Shape>,
    num_images: usize,
    data: BTreeMap<u32, Vec<Image>>,
}

impl Dataset {
    pub fn new() -> Dataset {
        Dataset::default()
    }

    /// Adds an image taken at `exposure_time`.
    ///
    /// The first image fixes the size and channel count of the dataset;
    /// later images that don't match are rejected.
    pub fn insert(&mut self, exposure_time: u32, image: Image) -> Result<()> {
        if exposure_time == 0 {
            return Err(Error::InvalidExposureTime(exposure_time));
        }
        check_channels(image.channels)?;
        match self.shape {
            Some(shape) if shape != image.shape() => {
                return Err(Error::SizeMismatch {
                    expected: shape,
                    actual: image.shape(),
                });
            }
            Some(_) => {}
            None => self.shape = Some(image.shape()),
        }

        self.data.entry(exposure_time).or_default().push(image);
        self.num_images += 1;
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.num_images == 0
    }

    /// Image size as `(width, height)`, or `(0, 0)` for an empty dataset.
    pub fn image_size(&self) -> (usize, usize) {
        self.shape.map(|s| (s.0, s.1)).unwrap_or((0, 0))
    }

    pub fn channels(&self) -> usize {
        self.shape.map(|s| s.2).unwrap_or(0)
    }

    pub fn num_images(&self) -> usize {
        self.num_images
    }

    pub fn num_images_at(&self, exposure_time: u32) -> usize {
        self.data.get(&exposure_time).map(|v| v.len()).unwrap_or(0)
    }

    /// All distinct exposure times, longest first.
    pub fn exposure_times(&self) -> Vec<u32> {
        self.data.keys().rev().copied().collect()
    }

    /// All images taken at `exposure_time`, in insertion order.
    pub fn images(&self, exposure_time: u32) -> &[Image] {
        self.data
            .get(&exposure_time)
            .map(|v| &v[..])
            .unwrap_or(&[])
    }

    /// Iterates over every `(exposure_time, image)` sample, longest
    /// exposure first.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &Image)> + '_ {
        self.data
            .iter()
            .rev()
            .flat_map(|(&t, images)| images.iter().map(move |img| (t, img)))
    }

    /// Splits a multi-channel dataset into one single-channel dataset per
    /// channel.  A single-channel dataset is returned as-is.
    pub fn split_channels(&self) -> Vec<Dataset> {
        if self.channels() <= 1 {
            return vec![self.clone()];
        }

        let mut split = vec![Dataset::new(); self.channels()];
        for (&t, images) in self.data.iter() {
            for image in images {
                for (c, plane) in image.split_channels().into_iter().enumerate() {
                    let ds = &mut split[c];
                    ds.shape = Some(plane.shape());
                    ds.data.entry(t).or_default().push(plane);
                    ds.num_images += 1;
                }
            }
        }
        split
    }
}
