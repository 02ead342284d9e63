//! PNG dump of rendered pages

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use log::debug;

use crate::render::{PageBitmap, Pixmap};

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode page {page}: {source}")]
    Encode {
        page: usize,
        #[source]
        source: png::EncodingError,
    },
}

/// File name for `page` inside a dump directory: `page-0007.png`
#[must_use]
pub fn dump_path(dir: &Path, page: usize) -> PathBuf {
    dir.join(format!("page-{page:04}.png"))
}

/// Write `bitmap` as an 8-bit RGB PNG at `path`
pub fn write_png(bitmap: &PageBitmap, path: &Path) -> Result<(), ExportError> {
    let io_error = |source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    };
    let encode_error = |source| ExportError::Encode {
        page: bitmap.page,
        source,
    };

    let file = File::create(path).map_err(io_error)?;
    let pixmap = &bitmap.pixmap;

    let mut encoder = png::Encoder::new(BufWriter::new(file), pixmap.width, pixmap.height);
    encoder.set_color(png::ColorType::Rgb);
    encoder.set_depth(png::BitDepth::Eight);
    encoder.set_compression(png::Compression::Fast);

    let mut writer = encoder.write_header().map_err(encode_error)?;
    writer
        .write_image_data(&pixmap.pixels)
        .map_err(encode_error)?;
    writer.finish().map_err(encode_error)?;

    debug!(
        "Wrote page {} ({}x{}) to {path:?}",
        bitmap.page, pixmap.width, pixmap.height
    );
    Ok(())
}

/// Write `bitmap` under `dir` with its [`dump_path`] name, creating `dir`
/// when needed.
pub fn dump_page(bitmap: &PageBitmap, dir: &Path) -> Result<PathBuf, ExportError> {
    fs::create_dir_all(dir).map_err(|source| ExportError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let path = dump_path(dir, bitmap.page);
    write_png(bitmap, &path)?;
    Ok(path)
}

/// Decode a PNG written by [`write_png`]
pub fn read_png(path: &Path) -> Result<Pixmap, ExportError> {
    let file = File::open(path).map_err(|source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = png::Decoder::new(file).read_info().map_err(|e| ExportError::Io {
        path: path.to_path_buf(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
    })?;
    let mut pixels = vec![0; reader.output_buffer_size()];
    let info = reader.next_frame(&mut pixels).map_err(|e| ExportError::Io {
        path: path.to_path_buf(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
    })?;
    pixels.truncate(info.buffer_size());

    Pixmap::from_rgb(info.width, info.height, pixels).map_err(|e| ExportError::Io {
        path: path.to_path_buf(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn bitmap(page: usize) -> PageBitmap {
        let mut pixels = Vec::new();
        for i in 0..6u8 {
            pixels.extend_from_slice(&[i * 40, 255 - i * 40, i]);
        }
        PageBitmap::from_pixmap(page, 1.0, Pixmap::from_rgb(3, 2, pixels).unwrap())
    }

    #[test]
    fn dump_names_are_zero_padded() {
        let dir = Path::new("/tmp/out");
        assert_eq!(dump_path(dir, 7), dir.join("page-0007.png"));
        assert_eq!(dump_path(dir, 12345), dir.join("page-12345.png"));
    }

    #[test]
    fn written_png_decodes_to_same_pixels() {
        let dir = TempDir::new().unwrap();
        let page = bitmap(3);
        let path = dump_page(&page, &dir.path().join("dump")).unwrap();

        assert_eq!(path.file_name().unwrap(), "page-0003.png");
        assert_eq!(read_png(&path).unwrap(), page.pixmap);
    }

    #[test]
    fn unwritable_target_is_io_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing").join("page.png");
        assert!(matches!(
            write_png(&bitmap(0), &path),
            Err(ExportError::Io { .. })
        ));
    }
}
