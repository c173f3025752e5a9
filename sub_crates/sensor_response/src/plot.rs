//! Response curve plots for calibration previews.

use image::{Rgb, RgbImage};

use crate::channel::Channel;

/// Side length of the progress previews.
pub(crate) const PREVIEW_SIZE: u32 = 512;

/// Adds `color` onto the pixel at `(x, y)`, saturating each channel.
fn add_pixel(img: &mut RgbImage, x: u32, y: u32, color: Rgb<u8>) {
    let c = *img.get_pixel(x, y);
    img.put_pixel(
        x,
        y,
        Rgb([
            c[0].saturating_add(color[0]),
            c[1].saturating_add(color[1]),
            c[2].saturating_add(color[2]),
        ]),
    );
}

/// Draws a polyline through `points`, given in [0.0, 1.0] on both axes
/// with y pointing up.
pub fn draw_line_segments<Itr>(img: &mut RgbImage, points: Itr, color: Rgb<u8>)
where
    Itr: std::iter::Iterator<Item = (f32, f32)>,
{
    let (w, h) = (img.width(), img.height());
    if w == 0 || h == 0 {
        return;
    }
    let to_px = |p: (f32, f32)| {
        (
            (p.0.max(0.0) * (w - 1) as f32).min((w - 1) as f32) as u32,
            (p.1.max(0.0) * (h - 1) as f32).min((h - 1) as f32) as u32,
        )
    };
    let mut points = points.filter(|p| p.0.is_finite() && p.1.is_finite()).peekable();

    while let Some(p1) = points.next() {
        if let Some(&p2) = points.peek() {
            let (mut x1, mut y1) = to_px(p1);
            let (mut x2, mut y2) = to_px(p2);

            if (y2 as i64 - y1 as i64).abs() < (x2 as i64 - x1 as i64).abs() {
                if x1 > x2 {
                    std::mem::swap(&mut x1, &mut x2);
                    std::mem::swap(&mut y1, &mut y2);
                }
                let mut y = y1 as f32;
                let dy = (y2 as f32 - y1 as f32) / (x2 as f32 - x1 as f32);
                for x in x1..=x2 {
                    add_pixel(img, x, h - 1 - (y as u32).min(h - 1), color);
                    y += dy;
                }
            } else {
                if y1 > y2 {
                    std::mem::swap(&mut x1, &mut x2);
                    std::mem::swap(&mut y1, &mut y2);
                }
                let mut x = x1 as f32;
                let dx = if y2 == y1 {
                    0.0
                } else {
                    (x2 as f32 - x1 as f32) / (y2 as f32 - y1 as f32)
                };
                for y in y1..=y2 {
                    add_pixel(img, (x as u32).min(w - 1), h - 1 - y, color);
                    x += dx;
                }
            }
        }
    }
}

/// Plots individual points, same coordinate convention as
/// `draw_line_segments()`.
pub fn draw_points<Itr>(img: &mut RgbImage, points: Itr, color: Rgb<u8>)
where
    Itr: std::iter::Iterator<Item = (f32, f32)>,
{
    let (w, h) = (img.width(), img.height());
    if w == 0 || h == 0 {
        return;
    }
    for point in points.filter(|p| p.0.is_finite() && p.1.is_finite()) {
        let x = (point.0.max(0.0) * (w - 1) as f32).min((w - 1) as f32) as u32;
        let y = (point.1.max(0.0) * (h - 1) as f32).min((h - 1) as f32) as u32;
        add_pixel(img, x, h - 1 - y, color);
    }
}

/// Maps a curve onto plot coordinates, normalizing its values to
/// `[lo, hi]`.
pub(crate) fn curve_points<'a>(
    curve: &'a [f64],
    lo: f64,
    hi: f64,
) -> impl Iterator<Item = (f32, f32)> + 'a {
    let norm = if hi > lo { 1.0 / (hi - lo) } else { 0.0 };
    let x_norm = 1.0 / (curve.len().max(2) - 1) as f32;
    curve
        .iter()
        .enumerate()
        .map(move |(i, &v)| (i as f32 * x_norm, ((v - lo) * norm) as f32))
}

/// Finite min/max of a curve.
pub(crate) fn finite_range(curve: &[f64]) -> (f64, f64) {
    curve
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold((std::f64::INFINITY, std::f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        })
}

/// Plots one or more response curves, each stretched to fill the image
/// vertically.
///
/// `curves[c]` is drawn in the display color of channel `c` out of
/// `curves.len()`.
pub fn plot_response(curves: &[Vec<f64>], width: u32, height: u32) -> RgbImage {
    let mut img = RgbImage::from_pixel(width, height, Rgb([0u8, 0, 0]));
    for (c, curve) in curves.iter().enumerate() {
        let (lo, hi) = finite_range(curve);
        let color = Channel::new(c).color(curves.len());
        draw_line_segments(&mut img, curve_points(curve, lo, hi), color);
    }
    img
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_covers_diagonal() {
        let mut img = RgbImage::new(8, 8);
        draw_line_segments(
            &mut img,
            [(0.0, 0.0), (1.0, 1.0)].iter().copied(),
            Rgb([255, 255, 255]),
        );
        // Bottom-left and top-right corners are lit.
        assert_eq!(*img.get_pixel(0, 7), Rgb([255, 255, 255]));
        assert_eq!(*img.get_pixel(7, 0), Rgb([255, 255, 255]));
        assert_eq!(*img.get_pixel(7, 7), Rgb([0, 0, 0]));
    }

    #[test]
    fn colors_saturate() {
        let mut img = RgbImage::new(2, 2);
        draw_points(&mut img, [(0.0, 0.0), (0.0, 0.0)].iter().copied(), Rgb([200, 10, 0]));
        assert_eq!(*img.get_pixel(0, 1), Rgb([255, 20, 0]));
    }

    #[test]
    fn plot_ignores_non_finite() {
        let curve = vec![0.0, std::f64::NAN, 1.0, 2.0];
        let img = plot_response(&[curve], 16, 16);
        assert_eq!(img.dimensions(), (16, 16));
        assert!(img.pixels().any(|p| *p != Rgb([0, 0, 0])));
    }

    #[test]
    fn empty_image_is_left_alone() {
        let mut img = RgbImage::new(0, 4);
        draw_line_segments(&mut img, [(0.0, 0.0), (1.0, 1.0)].iter().copied(), Rgb([9, 9, 9]));
        draw_points(&mut img, [(0.5, 0.5)].iter().copied(), Rgb([9, 9, 9]));
        assert_eq!(img.dimensions(), (0, 4));
    }
}
