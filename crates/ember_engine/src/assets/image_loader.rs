//! Image file loading dispatch
//!
//! Routes files to the right decoder by extension and normalizes every
//! result to tightly packed RGBA8. Three-channel sources gain an opaque
//! alpha channel here, so the GPU upload path only ever sees four channels.

use std::path::Path;

use crate::assets::tga::{self, TgaImage};
use crate::assets::{AssetError, AssetResult};

/// Decoded image data ready for texture upload
#[derive(Debug, Clone)]
pub struct ImageData {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// RGBA8 pixels, rows from the top
    pub pixels: Vec<u8>,
}

impl From<TgaImage> for ImageData {
    fn from(image: TgaImage) -> Self {
        Self {
            width: image.width,
            height: image.height,
            pixels: image.pixels,
        }
    }
}

/// Load an image file, decoding by extension
pub fn load_image(path: &Path) -> AssetResult<ImageData> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match extension.as_str() {
        "tga" => {
            let bytes = std::fs::read(path)?;
            Ok(tga::decode(&bytes)?.into())
        }
        "png" => {
            let decoded = image::open(path)
                .map_err(|e| AssetError::Malformed(format!("{}: {e}", path.display())))?;
            let rgba = decoded.to_rgba8();
            Ok(ImageData {
                width: rgba.width(),
                height: rgba.height(),
                pixels: rgba.into_raw(),
            })
        }
        other => Err(AssetError::UnsupportedFormat(format!(
            "{} (file {})",
            if other.is_empty() { "<none>" } else { other },
            path.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_extension_is_unsupported() {
        let result = load_image(Path::new("texture.webp"));
        assert!(matches!(result, Err(AssetError::UnsupportedFormat(_))));
    }

    #[test]
    fn tga_files_round_trip_through_the_loader() {
        let image = TgaImage {
            width: 1,
            height: 1,
            pixels: vec![1, 2, 3, 4],
        };
        let dir = std::env::temp_dir().join("ember_engine_loader_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("pixel.tga");
        std::fs::write(&path, tga::encode_raw(&image)).unwrap();

        let loaded = load_image(&path).unwrap();
        assert_eq!(loaded.width, 1);
        assert_eq!(loaded.pixels, image.pixels);

        std::fs::remove_file(&path).ok();
    }
}
