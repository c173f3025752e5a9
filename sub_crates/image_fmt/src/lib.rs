//! Loading and saving 8-bit images and raw float matrices.

mod error;
pub mod mat_fmt;
pub mod png_fmt;

use std::{
    fs::File,
    io::{BufReader, Read, Seek, SeekFrom},
    path::Path,
};

pub use error::{Error, Result};

/// Pixel data, row-major with interleaved channels.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageBuf {
    Gray8(Vec<u8>),
    /// Three 8-bit channels, in the order they are stored in the file.
    Color8(Vec<u8>),
    Gray32F(Vec<f32>),
    Color32F(Vec<f32>),
}

impl ImageBuf {
    pub fn channels(&self) -> usize {
        match self {
            ImageBuf::Gray8(_) | ImageBuf::Gray32F(_) => 1,
            ImageBuf::Color8(_) | ImageBuf::Color32F(_) => 3,
        }
    }

    /// Number of scalar elements.
    pub fn len(&self) -> usize {
        match self {
            ImageBuf::Gray8(d) | ImageBuf::Color8(d) => d.len(),
            ImageBuf::Gray32F(d) | ImageBuf::Color32F(d) => d.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    /// `(width, height)`.
    pub dimensions: (usize, usize),
    pub data: ImageBuf,
}

impl Image {
    pub fn channels(&self) -> usize {
        self.data.channels()
    }
}

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Loads an image, detecting the format from its leading bytes.
pub fn load<R: Read + Seek>(mut reader: R) -> Result<Image> {
    let start = reader.stream_position()?;
    let mut head = [0u8; 8];
    let n = read_up_to(&mut reader, &mut head)?;
    reader.seek(SeekFrom::Start(start))?;
    let head = &head[..n];

    if head.starts_with(&PNG_SIGNATURE) {
        return png_fmt::load(reader);
    }
    if head.len() >= 4 && u32::from_le_bytes([head[0], head[1], head[2], head[3]]) == mat_fmt::MAGIC {
        return mat_fmt::load(reader);
    }

    // No formats matched.
    Err(Error::UnknownFormat)
}

pub fn load_path<P: AsRef<Path>>(path: P) -> Result<Image> {
    load(BufReader::new(File::open(path)?))
}

/// Like `read_exact()`, but stops early at end of file and returns how
/// many bytes were read.
fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Cursor;

    #[test]
    fn detects_format() {
        let img = Image {
            dimensions: (3, 2),
            data: ImageBuf::Gray8(vec![0, 1, 2, 3, 4, 5]),
        };

        let mut png = Vec::new();
        png_fmt::save(&mut png, &img).unwrap();
        assert_eq!(load(Cursor::new(png)).unwrap(), img);

        let mut mat = Vec::new();
        mat_fmt::save(&mut mat, &img).unwrap();
        assert_eq!(load(Cursor::new(mat)).unwrap(), img);
    }

    #[test]
    fn unknown_format() {
        match load(Cursor::new(b"GIF89a".to_vec())) {
            Err(Error::UnknownFormat) => {}
            r => panic!("unexpected result: {:?}", r),
        }
        match load(Cursor::new(Vec::new())) {
            Err(Error::UnknownFormat) => {}
            r => panic!("unexpected result: {:?}", r),
        }
    }
}
