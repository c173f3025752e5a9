//! A minimal raw matrix container.
//!
//! Layout, all little-endian:
//!
//! ```text
//! u32 magic (0xC4A1FDD9)
//! u32 element type
//! u32 dims (at most 2)
//! u32 rows
//! u32 cols
//! rows * cols * channels elements, row-major, channels interleaved
//! ```
//!
//! Element type codes follow the usual 8-bit/32-bit-float numbering:
//! 0 and 16 are 8-bit with 1 and 3 channels, 5 and 21 are 32-bit float
//! with 1 and 3 channels.

use std::io::{Read, Write};

use crate::{
    error::{Error, Result},
    Image, ImageBuf,
};

pub const MAGIC: u32 = 0xC4A1FDD9;

const TYPE_8UC1: u32 = 0;
const TYPE_8UC3: u32 = 16;
const TYPE_32FC1: u32 = 5;
const TYPE_32FC3: u32 = 21;

/// Reads a matrix as an image with `dimensions == (cols, rows)`.
pub fn load<R: Read>(mut reader: R) -> Result<Image> {
    let magic = read_u32(&mut reader)?;
    if magic != MAGIC {
        return Err(Error::InvalidMat(format!("bad magic number {:#010x}", magic)));
    }
    let kind = read_u32(&mut reader)?;
    let dims = read_u32(&mut reader)?;
    if dims > 2 {
        return Err(Error::InvalidMat(format!(
            "{} dimensions, only 1 or 2 are supported",
            dims
        )));
    }
    let rows = read_u32(&mut reader)? as usize;
    let cols = read_u32(&mut reader)? as usize;

    let (channels, elem_size) = match kind {
        TYPE_8UC1 => (1, 1),
        TYPE_8UC3 => (3, 1),
        TYPE_32FC1 => (1, 4),
        TYPE_32FC3 => (3, 4),
        _ => return Err(Error::InvalidMat(format!("unsupported element type {}", kind))),
    };

    let byte_len = rows
        .checked_mul(cols)
        .and_then(|n| n.checked_mul(channels * elem_size))
        .ok_or_else(|| Error::InvalidMat(format!("{}x{} matrix is too large", rows, cols)))?;
    let mut bytes = Vec::new();
    reader.take(byte_len as u64).read_to_end(&mut bytes)?;
    if bytes.len() != byte_len {
        return Err(Error::InvalidMat(format!(
            "truncated data: expected {} bytes, got {}",
            byte_len,
            bytes.len()
        )));
    }

    let data = match kind {
        TYPE_8UC1 => ImageBuf::Gray8(bytes),
        TYPE_8UC3 => ImageBuf::Color8(bytes),
        TYPE_32FC1 => ImageBuf::Gray32F(to_floats(&bytes)),
        _ => ImageBuf::Color32F(to_floats(&bytes)),
    };

    Ok(Image {
        dimensions: (cols, rows),
        data: data,
    })
}

/// Writes `image` as a `height x width` matrix.
pub fn save<W: Write>(mut writer: W, image: &Image) -> Result<()> {
    let (width, height) = image.dimensions;
    let expected = width * height * image.channels();
    if image.data.len() != expected {
        return Err(Error::InvalidMat(format!(
            "buffer holds {} elements, dimensions need {}",
            image.data.len(),
            expected
        )));
    }

    let kind = match image.data {
        ImageBuf::Gray8(_) => TYPE_8UC1,
        ImageBuf::Color8(_) => TYPE_8UC3,
        ImageBuf::Gray32F(_) => TYPE_32FC1,
        ImageBuf::Color32F(_) => TYPE_32FC3,
    };
    for v in [MAGIC, kind, 2, height as u32, width as u32].iter() {
        writer.write_all(&v.to_le_bytes())?;
    }

    match image.data {
        ImageBuf::Gray8(ref d) | ImageBuf::Color8(ref d) => writer.write_all(d)?,
        ImageBuf::Gray32F(ref d) | ImageBuf::Color32F(ref d) => {
            for v in d.iter() {
                writer.write_all(&v.to_le_bytes())?;
            }
        }
    }
    writer.flush()?;
    Ok(())
}

fn to_floats(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    match reader.read_exact(&mut buf) {
        Ok(()) => Ok(u32::from_le_bytes(buf)),
        Err(ref e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(Error::InvalidMat("truncated header".into()))
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(kind: u32, dims: u32, rows: u32, cols: u32) -> Vec<u8> {
        [MAGIC, kind, dims, rows, cols]
            .iter()
            .flat_map(|v| v.to_le_bytes().to_vec())
            .collect()
    }

    #[test]
    fn float_round_trip() {
        // A 256x1 three-channel response table.
        let img = Image {
            dimensions: (1, 256),
            data: ImageBuf::Color32F((0..768).map(|i| i as f32 / 767.0).collect()),
        };
        let mut bytes = Vec::new();
        save(&mut bytes, &img).unwrap();
        assert_eq!(bytes.len(), 20 + 768 * 4);
        assert_eq!(&bytes[..20], &header(21, 2, 256, 1)[..]);
        assert_eq!(load(&bytes[..]).unwrap(), img);
    }

    #[test]
    fn reads_hand_written_file() {
        let mut bytes = header(0, 2, 2, 3);
        bytes.extend_from_slice(&[1, 2, 3, 4, 5, 6]);
        let img = load(&bytes[..]).unwrap();
        assert_eq!(img.dimensions, (3, 2));
        assert_eq!(img.data, ImageBuf::Gray8(vec![1, 2, 3, 4, 5, 6]));
    }

    #[test]
    fn rejects_bad_input() {
        let mut bad_magic = header(0, 2, 1, 1);
        bad_magic[0] ^= 0xFF;
        bad_magic.push(0);
        assert!(matches!(load(&bad_magic[..]), Err(Error::InvalidMat(_))));

        let mut three_dims = header(0, 3, 1, 1);
        three_dims.push(0);
        assert!(matches!(load(&three_dims[..]), Err(Error::InvalidMat(_))));

        let mut unknown_type = header(6, 2, 1, 1);
        unknown_type.extend_from_slice(&[0; 8]);
        assert!(matches!(load(&unknown_type[..]), Err(Error::InvalidMat(_))));

        let mut truncated = header(5, 2, 2, 2);
        truncated.extend_from_slice(&[0; 15]);
        assert!(matches!(load(&truncated[..]), Err(Error::InvalidMat(_))));

        assert!(matches!(load(&header(0, 2, 1, 1)[..8]), Err(Error::InvalidMat(_))));
    }

    #[test]
    fn save_checks_buffer_size() {
        let img = Image {
            dimensions: (2, 2),
            data: ImageBuf::Gray8(vec![0; 3]),
        };
        assert!(save(Vec::new(), &img).is_err());
    }
}
