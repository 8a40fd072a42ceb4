//! Image engine contract.
//!
//! Operations never touch pixels themselves. They build an [`EngineOptions`]
//! instruction set and hand it to an [`ImageEngine`] together with the input
//! bytes. [`RasterEngine`] is the bundled implementation.

mod orientation;
mod raster;
mod text;

use bytes::Bytes;
use serde::Serialize;

use crate::error::EngineError;
use crate::options::{flag, Colorspace, Extend, Gravity, TransformOptions};

pub use orientation::{read_orientation, Orientation};
pub use raster::RasterEngine;
pub use text::load_font;

// =============================================================================
// Image types
// =============================================================================

/// Image types the server can read and produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageType {
    Jpeg,
    Png,
    Webp,
    Gif,
    Tiff,
    Unknown,
}

impl ImageType {
    /// Parse a user-supplied type name (`jpeg`, `jpg`, `png`, ...).
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "jpeg" | "jpg" => ImageType::Jpeg,
            "png" => ImageType::Png,
            "webp" => ImageType::Webp,
            "gif" => ImageType::Gif,
            "tiff" | "tif" => ImageType::Tiff,
            _ => ImageType::Unknown,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ImageType::Jpeg => "jpeg",
            ImageType::Png => "png",
            ImageType::Webp => "webp",
            ImageType::Gif => "gif",
            ImageType::Tiff => "tiff",
            ImageType::Unknown => "unknown",
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            ImageType::Jpeg => "image/jpeg",
            ImageType::Png => "image/png",
            ImageType::Webp => "image/webp",
            ImageType::Gif => "image/gif",
            ImageType::Tiff => "image/tiff",
            ImageType::Unknown => "application/octet-stream",
        }
    }

    pub fn is_known(&self) -> bool {
        *self != ImageType::Unknown
    }
}

// =============================================================================
// Engine I/O
// =============================================================================

/// An encoded image, or a JSON document for metadata replies.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pub body: Bytes,
    pub mime: &'static str,
}

impl Image {
    pub fn new(body: impl Into<Bytes>, mime: &'static str) -> Self {
        Self {
            body: body.into(),
            mime,
        }
    }
}

/// Image properties reported by [`ImageEngine::metadata`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageMetadata {
    pub width: u32,
    pub height: u32,
    #[serde(rename = "type")]
    pub image_type: &'static str,
    pub space: &'static str,
    pub channels: u8,
    pub has_alpha: bool,
    pub has_profile: bool,
    /// EXIF orientation, 0 when absent
    pub orientation: u16,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussianBlur {
    pub sigma: f64,
    pub min_ampl: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextWatermark {
    pub text: String,
    pub font: String,
    pub dpi: u32,
    pub margin: u32,
    pub width: u32,
    pub opacity: f32,
    pub no_replicate: bool,
    pub color: [u8; 3],
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageOverlay {
    pub buf: Bytes,
    pub top: u32,
    pub left: u32,
    pub opacity: f32,
}

/// Fully resolved instructions for one engine call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineOptions {
    pub width: u32,
    pub height: u32,

    // Region extraction, applied before resizing
    pub top: u32,
    pub left: u32,
    pub area_width: u32,
    pub area_height: u32,

    pub crop: bool,
    pub enlarge: bool,
    pub embed: bool,
    pub force: bool,
    pub zoom: u32,

    pub rotate: u32,
    pub flip: bool,
    pub flop: bool,
    pub no_auto_rotate: bool,
    pub no_profile: bool,
    pub strip_metadata: bool,
    pub interlace: bool,

    pub quality: u32,
    pub compression: u32,
    /// Output type; `None` keeps the input type
    pub output: Option<ImageType>,

    pub gravity: Gravity,
    pub colorspace: Colorspace,
    pub extend: Extend,
    pub background: Option<[u8; 3]>,

    pub blur: Option<GaussianBlur>,
    pub watermark: Option<TextWatermark>,
    pub overlay: Option<ImageOverlay>,
}

/// First three channels of a colour list, if present.
pub fn rgb(color: &[u8]) -> Option<[u8; 3]> {
    match color {
        [r, g, b, ..] => Some([*r, *g, *b]),
        _ => None,
    }
}

impl From<&TransformOptions> for EngineOptions {
    fn from(o: &TransformOptions) -> Self {
        let output = match ImageType::from_name(&o.image_type) {
            ImageType::Unknown => None,
            known => Some(known),
        };

        let blur = (o.sigma > 0.0 || o.min_ampl > 0.0).then_some(GaussianBlur {
            sigma: o.sigma,
            min_ampl: o.min_ampl,
        });

        EngineOptions {
            width: o.width,
            height: o.height,
            rotate: o.rotate,
            flip: flag(o.flip),
            flop: flag(o.flop),
            force: flag(o.force),
            embed: flag(o.embed),
            no_auto_rotate: flag(o.no_rotation),
            no_profile: flag(o.no_profile),
            strip_metadata: flag(o.strip_meta),
            interlace: flag(o.interlace),
            quality: o.quality,
            compression: o.compression,
            output,
            gravity: o.gravity,
            colorspace: o.colorspace,
            extend: o.extend,
            background: rgb(&o.background),
            blur,
            ..Default::default()
        }
    }
}

// =============================================================================
// Engine trait
// =============================================================================

/// The pixel-processing backend.
///
/// Implementations are synchronous and CPU-bound; callers run them on the
/// blocking thread pool.
pub trait ImageEngine: Send + Sync {
    /// Engine name reported by the index route.
    fn name(&self) -> &'static str;

    /// Apply `options` to `input` and encode the result.
    fn transform(&self, input: &[u8], options: &EngineOptions) -> Result<Image, EngineError>;

    /// Read dimensions and properties without transforming.
    fn metadata(&self, input: &[u8]) -> Result<ImageMetadata, EngineError>;

    /// Sniff the image type from magic bytes.
    fn detect_type(&self, input: &[u8]) -> ImageType;
}
