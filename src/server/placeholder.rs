//! Placeholder images sent in place of JSON error replies.

use std::io::Cursor;
use std::path::Path;

use bytes::Bytes;
use image::{ImageFormat, Rgb, RgbImage};

use crate::engine::{EngineOptions, Image, ImageEngine, ImageType};
use crate::error::EngineError;
use crate::options::TransformOptions;

/// Side length of the generated placeholder.
pub const DEFAULT_PLACEHOLDER_SIZE: u32 = 1200;

const PLACEHOLDER_GREY: Rgb<u8> = Rgb([0xf0, 0xf0, 0xf0]);

/// Source image for placeholder replies.
#[derive(Debug, Clone)]
pub struct Placeholder {
    image: Bytes,
}

impl Placeholder {
    /// A plain light-grey square.
    pub fn generated() -> Result<Self, String> {
        let canvas = RgbImage::from_pixel(
            DEFAULT_PLACEHOLDER_SIZE,
            DEFAULT_PLACEHOLDER_SIZE,
            PLACEHOLDER_GREY,
        );
        let mut buf = Cursor::new(Vec::new());
        canvas
            .write_to(&mut buf, ImageFormat::Png)
            .map_err(|e| format!("cannot encode placeholder: {}", e))?;
        Ok(Self {
            image: Bytes::from(buf.into_inner()),
        })
    }

    /// Load a placeholder from disk, checking it is a supported image.
    pub fn from_file(path: &Path, engine: &dyn ImageEngine) -> Result<Self, String> {
        let data = std::fs::read(path)
            .map_err(|e| format!("cannot read placeholder image {}: {}", path.display(), e))?;
        if !engine.detect_type(&data).is_known() {
            return Err(format!(
                "placeholder image {} is not a supported image type",
                path.display()
            ));
        }
        Ok(Self {
            image: Bytes::from(data),
        })
    }

    pub fn bytes(&self) -> &Bytes {
        &self.image
    }

    /// Engine instructions that stretch the placeholder to the requested size.
    pub fn render_options(query: &str) -> Result<EngineOptions, String> {
        let options = TransformOptions::from_query(query).map_err(|e| e.to_string())?;
        Ok(EngineOptions {
            width: options.width,
            height: options.height,
            force: true,
            crop: true,
            enlarge: true,
            output: match ImageType::from_name(&options.image_type) {
                ImageType::Unknown => None,
                known => Some(known),
            },
            ..Default::default()
        })
    }

    pub fn render(&self, engine: &dyn ImageEngine, options: &EngineOptions) -> Result<Image, EngineError> {
        engine.transform(&self.image, options)
    }
}
