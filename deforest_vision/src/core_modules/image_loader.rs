//! Turning files and uploaded bytes into grayscale frames.
//!
//! A [`Frame`] keeps its name even when decoding fails, so a sequence can
//! still report which slot was unusable instead of shifting every later label.

use crate::error::{Result, VisionError};
use image::GrayImage;
use std::path::Path;
use tracing::{debug, warn};

/// Extensions accepted by the directory loader and the upload endpoint.
pub const DEFAULT_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp"];

/// One slot of an ordered image series.
#[derive(Debug, Clone)]
pub enum Frame {
    Decoded { name: String, image: GrayImage },
    Undecodable { name: String, reason: String },
}

impl Frame {
    /// Decodes `bytes` into a frame, capturing a failure instead of returning it.
    pub fn from_bytes(name: impl Into<String>, bytes: &[u8]) -> Self {
        let name = name.into();
        match decode_gray(&name, bytes) {
            Ok(image) => Frame::Decoded { name, image },
            Err(e) => {
                warn!(frame = %name, error = %e, "frame could not be decoded");
                Frame::Undecodable {
                    name,
                    reason: e.to_string(),
                }
            }
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Frame::Decoded { name, .. } | Frame::Undecodable { name, .. } => name,
        }
    }

    pub fn image(&self) -> Option<&GrayImage> {
        match self {
            Frame::Decoded { image, .. } => Some(image),
            Frame::Undecodable { .. } => None,
        }
    }

    /// The decoded image, or the `DecodeFailure` that replaced it.
    pub fn require_image(&self) -> Result<&GrayImage> {
        match self {
            Frame::Decoded { image, .. } => Ok(image),
            Frame::Undecodable { name, reason } => Err(VisionError::decode(name.clone(), reason)),
        }
    }
}

/// Decodes any supported format and converts it to 8-bit grayscale.
pub fn decode_gray(source_name: &str, bytes: &[u8]) -> Result<GrayImage> {
    image::load_from_memory(bytes)
        .map(|img| img.to_luma8())
        .map_err(|e| VisionError::decode(source_name, e))
}

/// Reads and decodes a single file.
pub fn load_gray(path: &Path) -> Result<GrayImage> {
    let bytes = std::fs::read(path).map_err(|e| VisionError::io(path, e))?;
    decode_gray(&path.display().to_string(), &bytes)
}

/// Case-insensitive extension check against `extensions`.
pub fn has_allowed_extension(file_name: &str, extensions: &[&str]) -> bool {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|a| a.eq_ignore_ascii_case(ext)))
}

/// Lists `dir` in ascending filename order and decodes every regular file
/// with an allowed extension. Undecodable files become `Frame::Undecodable`.
pub fn load_directory(dir: &Path, extensions: &[&str]) -> Result<Vec<Frame>> {
    let entries = std::fs::read_dir(dir).map_err(|e| VisionError::io(dir, e))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| VisionError::io(dir, e))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_owned) else {
            continue;
        };
        if has_allowed_extension(&name, extensions) {
            files.push((name, path));
        } else {
            debug!(file = %name, "skipping file with unsupported extension");
        }
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));

    let mut frames = Vec::with_capacity(files.len());
    for (name, path) in files {
        let bytes = std::fs::read(&path).map_err(|e| VisionError::io(&path, e))?;
        frames.push(Frame::from_bytes(name, &bytes));
    }
    debug!(dir = %dir.display(), count = frames.len(), "loaded frames");
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::utils::image_helper::image_helper::{encode_gray_png, save_gray_png};
    use image::Luma;

    #[test]
    fn extension_filter_is_case_insensitive() {
        assert!(has_allowed_extension("a.PNG", DEFAULT_EXTENSIONS));
        assert!(has_allowed_extension("scene.jpeg", DEFAULT_EXTENSIONS));
        assert!(!has_allowed_extension("notes.txt", DEFAULT_EXTENSIONS));
        assert!(!has_allowed_extension("README", DEFAULT_EXTENSIONS));
    }

    #[test]
    fn bytes_decode_to_gray() {
        let img = GrayImage::from_pixel(4, 3, Luma([77]));
        let png = encode_gray_png(&img).unwrap();
        let frame = Frame::from_bytes("x.png", &png);
        let decoded = frame.require_image().unwrap();
        assert_eq!(decoded.dimensions(), (4, 3));
        assert_eq!(decoded.get_pixel(2, 2).0[0], 77);
    }

    #[test]
    fn garbage_becomes_undecodable_frame() {
        let frame = Frame::from_bytes("broken.png", b"definitely not a png");
        assert!(frame.image().is_none());
        assert_eq!(frame.name(), "broken.png");
        assert!(matches!(
            frame.require_image(),
            Err(VisionError::DecodeFailure { .. })
        ));
    }

    #[test]
    fn directory_is_loaded_in_sorted_order() {
        let dir = tempfile::tempdir().unwrap();
        for (name, value) in [("c.png", 30u8), ("a.png", 10), ("b.png", 20)] {
            save_gray_png(&GrayImage::from_pixel(2, 2, Luma([value])), &dir.path().join(name))
                .unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        std::fs::write(dir.path().join("d.bmp"), "corrupt").unwrap();
        std::fs::create_dir(dir.path().join("nested.png")).unwrap();

        let frames = load_directory(dir.path(), DEFAULT_EXTENSIONS).unwrap();
        let names: Vec<&str> = frames.iter().map(Frame::name).collect();
        assert_eq!(names, ["a.png", "b.png", "c.png", "d.bmp"]);
        assert_eq!(frames[1].image().unwrap().get_pixel(0, 0).0[0], 20);
        assert!(frames[3].image().is_none());
    }

    #[test]
    fn missing_directory_is_io_error() {
        let err = load_directory(Path::new("/definitely/not/here"), DEFAULT_EXTENSIONS).unwrap_err();
        assert!(matches!(err, VisionError::Io { .. }));
    }
}
