use std::io::{Read, Write};

use crate::{
    error::{Error, Result},
    Image, ImageBuf,
};

/// Decodes a PNG into 8-bit gray or RGB.
///
/// Palettes are expanded, 16-bit samples are truncated to 8 bits, and
/// alpha is dropped.
pub fn load<R: Read>(mut reader: R) -> Result<Image> {
    let mut decoder = png::Decoder::new_with_limits(
        &mut reader,
        png::Limits {
            bytes: std::usize::MAX,
        },
    );
    decoder.set_transformations(png::Transformations::EXPAND | png::Transformations::STRIP_16);
    let mut reader = decoder.read_info()?;

    let info = reader.info();
    let dimensions = (info.width as usize, info.height as usize);
    let (color_type, bit_depth) = reader.output_color_type();
    if bit_depth != png::BitDepth::Eight {
        return Err(Error::UnsupportedFeature("PNG with less than 8 bits per sample"));
    }

    let mut pixel_data = vec![0u8; reader.output_buffer_size()];
    let frame = reader.next_frame(&mut pixel_data)?;
    pixel_data.truncate(frame.buffer_size());

    use png::ColorType::*;
    let data = match color_type {
        Grayscale => ImageBuf::Gray8(pixel_data),
        Rgb => ImageBuf::Color8(pixel_data),
        GrayscaleAlpha => ImageBuf::Gray8(pixel_data.chunks(2).map(|c| c[0]).collect()),
        Rgba => ImageBuf::Color8(
            pixel_data
                .chunks(4)
                .map(|c| [c[0], c[1], c[2]])
                .flatten()
                .collect(),
        ),
        Indexed => return Err(Error::UnsupportedFeature("unexpanded PNG palette")),
    };

    Ok(Image {
        dimensions: dimensions,
        data: data,
    })
}

/// Encodes an 8-bit gray or RGB image.
pub fn save<W: Write>(writer: W, image: &Image) -> Result<()> {
    let (color_type, bytes) = match image.data {
        ImageBuf::Gray8(ref d) => (png::ColorType::Grayscale, d),
        ImageBuf::Color8(ref d) => (png::ColorType::Rgb, d),
        _ => return Err(Error::UnsupportedFeature("PNG output of float images")),
    };

    let (width, height) = image.dimensions;
    let mut encoder = png::Encoder::new(writer, width as u32, height as u32);
    encoder.set_color(color_type);
    encoder.set_depth(png::BitDepth::Eight);
    let mut writer = encoder.write_header()?;
    writer.write_image_data(bytes)?;
    writer.finish()?;
    Ok(())
}
