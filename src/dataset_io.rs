//! Reading and writing datasets and calibrated responses.
//!
//! A dataset is stored as a directory of images named
//! `TTTTTT_III.ext`: the exposure time zero-padded to six digits, then
//! the index of the image among those sharing that exposure time.  Both
//! PNG and raw matrix (`.mat`) images are read; datasets are written as
//! raw matrices.  Three-channel images are kept in blue, green, red
//! order, so PNGs are swizzled on load.

use std::{
    fs::{self, File},
    io::{BufReader, BufWriter},
    path::{Path, PathBuf},
};

use image::RgbImage;
use tracing::{debug, info, warn};

use image_fmt::ImageBuf;
use sensor_response::{Dataset, Image, RadiometricResponse};

use crate::error::{Error, Result};

/// Exposure time encoded in a dataset file name, if any.
pub fn exposure_time_from_name(path: &Path) -> Option<u32> {
    let stem = path.file_stem()?.to_str()?;
    let digits = stem.get(0..6)?;
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

pub fn sample_file_name(exposure_time: u32, index: usize) -> String {
    format!("{:06}_{:03}.mat", exposure_time, index)
}

fn is_image_file(path: &Path) -> bool {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => ext.eq_ignore_ascii_case("png") || ext.eq_ignore_ascii_case("mat"),
        None => false,
    }
}

/// Converts a decoded 8-bit image into a dataset image.
fn to_dataset_image(image: image_fmt::Image, swap_red_blue: bool) -> std::result::Result<Image, String> {
    let (width, height) = image.dimensions;
    let (channels, mut data) = match image.data {
        ImageBuf::Gray8(d) => (1, d),
        ImageBuf::Color8(d) => (3, d),
        ImageBuf::Gray32F(_) | ImageBuf::Color32F(_) => {
            return Err("floating point images can't be used as samples".into());
        }
    };
    if channels == 3 && swap_red_blue {
        for px in data.chunks_mut(3) {
            px.swap(0, 2);
        }
    }
    Image::new(width, height, channels, data).map_err(|e| e.to_string())
}

/// Loads every parsable sample in `dir`.
///
/// Files whose names don't carry an exposure time, that fail to decode,
/// or that don't match the shape of the first loaded image are skipped
/// with a warning.
pub fn load_dataset<P: AsRef<Path>>(dir: P) -> Result<Dataset> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(Error::NotADirectory(dir.into()));
    }

    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && is_image_file(p))
        .collect();
    paths.sort();

    let mut dataset = Dataset::new();
    for path in paths.iter() {
        let exposure_time = match exposure_time_from_name(path) {
            Some(t) => t,
            None => {
                warn!("Skipping {}: no exposure time in file name", path.display());
                continue;
            }
        };

        let is_png = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("png"))
            .unwrap_or(false);
        let image = match image_fmt::load_path(path) {
            Ok(img) => img,
            Err(e) => {
                warn!("Skipping {}: {}", path.display(), e);
                continue;
            }
        };
        let image = match to_dataset_image(image, is_png) {
            Ok(img) => img,
            Err(e) => {
                warn!("Skipping {}: {}", path.display(), e);
                continue;
            }
        };

        if let Err(e) = dataset.insert(exposure_time, image) {
            warn!("Skipping {}: {}", path.display(), e);
            continue;
        }
        debug!("Loaded {} (exposure time {})", path.display(), exposure_time);
    }

    let (width, height) = dataset.image_size();
    info!(
        "Loaded {} images at {} exposure times ({}x{}, {} channels) from {}",
        dataset.num_images(),
        dataset.exposure_times().len(),
        width,
        height,
        dataset.channels(),
        dir.display()
    );
    Ok(dataset)
}

/// Writes every sample of `dataset` into `dir` as a raw matrix,
/// creating the directory if needed.
pub fn save_dataset<P: AsRef<Path>>(dataset: &Dataset, dir: P) -> Result<()> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;

    for t in dataset.exposure_times() {
        for (i, image) in dataset.images(t).iter().enumerate() {
            let data = match image.channels {
                1 => ImageBuf::Gray8(image.data.clone()),
                3 => ImageBuf::Color8(image.data.clone()),
                n => {
                    return Err(Error::InvalidFile {
                        path: dir.join(sample_file_name(t, i)),
                        reason: format!("{} channel images can't be stored", n),
                    });
                }
            };
            let out = image_fmt::Image {
                dimensions: (image.width, image.height),
                data: data,
            };
            let file = BufWriter::new(File::create(dir.join(sample_file_name(t, i)))?);
            image_fmt::mat_fmt::save(file, &out)?;
        }
    }

    info!("Saved {} images to {}", dataset.num_images(), dir.display());
    Ok(())
}

/// Writes the response as a 256x1 float matrix with one channel per
/// response channel.
pub fn save_response<P: AsRef<Path>>(response: &RadiometricResponse, path: P) -> Result<()> {
    let n = response.channels();
    let mut data = vec![0.0f32; 256 * n];
    for (c, curve) in response.curves().iter().enumerate() {
        for (k, &v) in curve.iter().enumerate() {
            data[k * n + c] = v;
        }
    }
    let out = image_fmt::Image {
        dimensions: (1, 256),
        data: if n == 1 {
            ImageBuf::Gray32F(data)
        } else {
            ImageBuf::Color32F(data)
        },
    };

    let file = BufWriter::new(File::create(path.as_ref())?);
    image_fmt::mat_fmt::save(file, &out)?;
    Ok(())
}

pub fn load_response<P: AsRef<Path>>(path: P) -> Result<RadiometricResponse> {
    let path = path.as_ref();
    let image = image_fmt::mat_fmt::load(BufReader::new(File::open(path)?))?;
    let invalid = |reason: &str| Error::InvalidFile {
        path: path.into(),
        reason: reason.into(),
    };

    if image.dimensions.0 * image.dimensions.1 != 256 {
        return Err(invalid("a response must have 256 entries"));
    }
    let (n, data) = match image.data {
        ImageBuf::Gray32F(d) => (1, d),
        ImageBuf::Color32F(d) => (3, d),
        _ => return Err(invalid("a response must hold floating point values")),
    };

    let curves = (0..n)
        .map(|c| data.iter().skip(c).step_by(n).copied().collect())
        .collect();
    Ok(RadiometricResponse::new(curves)?)
}

/// Saves a plot as an RGB PNG.
pub fn save_plot<P: AsRef<Path>>(plot: &RgbImage, path: P) -> Result<()> {
    let out = image_fmt::Image {
        dimensions: (plot.width() as usize, plot.height() as usize),
        data: ImageBuf::Color8(plot.as_raw().clone()),
    };
    let file = BufWriter::new(File::create(path.as_ref())?);
    image_fmt::png_fmt::save(file, &out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_png(path: &Path, image: &image_fmt::Image) {
        let file = BufWriter::new(File::create(path).unwrap());
        image_fmt::png_fmt::save(file, image).unwrap();
    }

    #[test]
    fn parses_file_names() {
        assert_eq!(exposure_time_from_name(Path::new("a/000120_003.png")), Some(120));
        assert_eq!(exposure_time_from_name(Path::new("000007.mat")), Some(7));
        assert_eq!(exposure_time_from_name(Path::new("12_000.mat")), None);
        assert_eq!(exposure_time_from_name(Path::new("abcdef_000.mat")), None);
        assert_eq!(exposure_time_from_name(Path::new("+00012_000.mat")), None);
        assert_eq!(sample_file_name(40, 2), "000040_002.mat");
    }

    #[test]
    fn dataset_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut ds = Dataset::new();
        for &t in &[5u32, 10, 10, 300] {
            let data: Vec<u8> = (0..24).map(|i| (i as u32 * t % 256) as u8).collect();
            ds.insert(t, Image::new(4, 2, 3, data).unwrap()).unwrap();
        }

        let out = dir.path().join("nested");
        save_dataset(&ds, &out).unwrap();
        assert!(out.join("000010_001.mat").is_file());
        assert!(out.join("000300_000.mat").is_file());

        let loaded = load_dataset(&out).unwrap();
        assert_eq!(loaded.exposure_times(), vec![300, 10, 5]);
        assert_eq!(loaded.num_images(), 4);
        for t in ds.exposure_times() {
            assert_eq!(loaded.images(t), ds.images(t));
        }
    }

    #[test]
    fn skips_unusable_files() {
        let dir = tempfile::tempdir().unwrap();
        let gray = |v: u8, w: usize| image_fmt::Image {
            dimensions: (w, 2),
            data: ImageBuf::Gray8(vec![v; w * 2]),
        };
        write_png(&dir.path().join("000010_000.png"), &gray(10, 3));
        write_png(&dir.path().join("000020_000.png"), &gray(20, 3));
        // Wrong size.
        write_png(&dir.path().join("000030_000.png"), &gray(30, 4));
        // No exposure time.
        write_png(&dir.path().join("preview.png"), &gray(40, 3));
        // Not an image.
        fs::write(dir.path().join("000050_000.mat"), b"junk").unwrap();
        fs::write(dir.path().join("notes.txt"), b"hello").unwrap();

        let ds = load_dataset(dir.path()).unwrap();
        assert_eq!(ds.exposure_times(), vec![20, 10]);
        assert_eq!(ds.images(20)[0].data, vec![20; 6]);
    }

    #[test]
    fn png_colors_become_bgr() {
        let dir = tempfile::tempdir().unwrap();
        let rgb = image_fmt::Image {
            dimensions: (1, 1),
            data: ImageBuf::Color8(vec![200, 100, 50]),
        };
        write_png(&dir.path().join("000001_000.png"), &rgb);
        let ds = load_dataset(dir.path()).unwrap();
        assert_eq!(ds.images(1)[0].data, vec![50, 100, 200]);
    }

    #[test]
    fn missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        match load_dataset(dir.path().join("nope")) {
            Err(Error::NotADirectory(_)) => {}
            r => panic!("unexpected result: {:?}", r.map(|d| d.num_images())),
        }
    }

    #[test]
    fn response_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let curves: Vec<Vec<f32>> = (0..3)
            .map(|c| (0..256).map(|k| (k as f32 / 255.0).powf(1.0 + c as f32)).collect())
            .collect();
        let response = RadiometricResponse::new(curves).unwrap();

        let path = dir.path().join("response.mat");
        save_response(&response, &path).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), 20 + 256 * 3 * 4);
        assert_eq!(load_response(&path).unwrap(), response);

        let gray = RadiometricResponse::new(vec![vec![0.5; 256]]).unwrap();
        save_response(&gray, &path).unwrap();
        assert_eq!(load_response(&path).unwrap().channels(), 1);
    }

    #[test]
    fn rejects_non_response_matrix() {
        let dir = tempfile::tempdir().unwrap();
        let mut ds = Dataset::new();
        ds.insert(1, Image::from_fn(16, 16, |x, _| x as u8)).unwrap();
        save_dataset(&ds, dir.path()).unwrap();
        assert!(load_response(dir.path().join("000001_000.mat")).is_err());
    }

    #[test]
    fn plot_to_png() {
        let dir = tempfile::tempdir().unwrap();
        let plot = sensor_response::plot_response(&[vec![0.0, 1.0]], 8, 4);
        let path = dir.path().join("plot.png");
        save_plot(&plot, &path).unwrap();
        let img = image_fmt::load_path(&path).unwrap();
        assert_eq!(img.dimensions, (8, 4));
        assert_eq!(img.data, ImageBuf::Color8(plot.into_raw()));
    }
}
