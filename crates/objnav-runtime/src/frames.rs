//! PNG encoding of camera frames, for policy requests and frame dumps.

use std::io::Cursor;
use std::path::Path;

use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
use objnav_env::Frame;
use objnav_types::NavError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("frame buffer of {len} bytes does not match {width}x{height} RGB24")]
    Layout { width: u32, height: u32, len: usize },
    #[error("PNG encoding failed: {0}")]
    Encode(#[from] image::ImageError),
    #[error("failed to write frame to {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl From<FrameError> for NavError {
    fn from(e: FrameError) -> Self {
        match e {
            FrameError::Io { path, source } => NavError::Io { path, source },
            other => NavError::Artifact(other.to_string()),
        }
    }
}

fn to_image(frame: &Frame) -> Result<DynamicImage, FrameError> {
    let buffer: ImageBuffer<Rgb<u8>, Vec<u8>> =
        ImageBuffer::from_raw(frame.width, frame.height, frame.data.clone()).ok_or(
            FrameError::Layout {
                width: frame.width,
                height: frame.height,
                len: frame.data.len(),
            },
        )?;
    Ok(DynamicImage::ImageRgb8(buffer))
}

/// Encode `frame` as PNG bytes.
pub fn encode_png(frame: &Frame) -> Result<Vec<u8>, FrameError> {
    let mut bytes = Vec::new();
    to_image(frame)?.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}

/// Write `frame` to `path` as PNG, creating parent directories.
pub fn save_png(frame: &Frame, path: &Path) -> Result<(), FrameError> {
    let io_err = |source: std::io::Error| FrameError::Io {
        path: path.display().to_string(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let bytes = encode_png(frame)?;
    std::fs::write(path, bytes).map_err(io_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    #[test]
    fn encodes_png_signature() {
        let bytes = encode_png(&Frame::filled(4, 3, [1, 2, 3])).unwrap();
        assert_eq!(&bytes[..8], &PNG_MAGIC);
    }

    #[test]
    fn short_buffer_is_a_layout_error() {
        let frame = Frame {
            width: 10,
            height: 10,
            data: vec![0; 5],
        };
        assert!(matches!(encode_png(&frame), Err(FrameError::Layout { len: 5, .. })));
    }

    #[test]
    fn save_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frames").join("episode_000").join("step_00000.png");
        save_png(&Frame::filled(2, 2, [0, 0, 0]), &path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn write_failure_maps_to_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("frames");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let path = blocker.join("step_00000.png");

        let err = save_png(&Frame::filled(2, 2, [0, 0, 0]), &path).unwrap_err();
        assert!(matches!(err, FrameError::Io { .. }));
        assert!(matches!(NavError::from(err), NavError::Io { .. }));
    }

    #[test]
    fn layout_failure_maps_to_artifact_error() {
        let frame = Frame {
            width: 3,
            height: 3,
            data: vec![0; 2],
        };
        let err = NavError::from(encode_png(&frame).unwrap_err());
        assert!(matches!(err, NavError::Artifact(_)));
    }
}
