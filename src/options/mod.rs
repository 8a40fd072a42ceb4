//! Typed transformation options.
//!
//! Requests carry loosely-typed parameters: query strings, or JSON objects
//! inside a pipeline step. [`TransformOptions`] is the validated, strongly-typed
//! form every operation works from. Conversion lives in [`coerce`].
//!
//! Boolean flags are `Option<bool>`: `None` means the caller never sent the
//! key, `Some(false)` means it was sent as false (or empty). Operations such as
//! resize pick a different crop default depending on which one they see.

pub mod coerce;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use coerce::{coerce, parse_color, parse_operations, UnknownParams};

use crate::error::CoerceError;

/// Anchor used when cropping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Gravity {
    #[default]
    Centre,
    North,
    South,
    East,
    West,
    /// Attention-based crop; engines without saliency detection fall back to centre
    Smart,
}

impl Gravity {
    /// Parse a gravity name, defaulting to centre.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "south" => Gravity::South,
            "north" => Gravity::North,
            "east" => Gravity::East,
            "west" => Gravity::West,
            "smart" => Gravity::Smart,
            _ => Gravity::Centre,
        }
    }
}

/// Output colour interpretation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Colorspace {
    #[default]
    Srgb,
    /// Black and white
    Bw,
}

impl Colorspace {
    pub fn parse(value: &str) -> Self {
        match value {
            "bw" => Colorspace::Bw,
            _ => Colorspace::Srgb,
        }
    }
}

/// How to fill the canvas when an image is embedded into a larger box.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Extend {
    #[default]
    Black,
    White,
    /// Repeat the edge pixels
    Copy,
    /// Reflect the image at its edges
    Mirror,
    /// Use the `background` colour
    Background,
}

impl Extend {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "white" => Extend::White,
            "copy" => Extend::Copy,
            "mirror" => Extend::Mirror,
            "background" => Extend::Background,
            _ => Extend::Black,
        }
    }
}

/// One step of a pipeline, as decoded from the `operations` JSON parameter.
///
/// Unknown fields at this level are ignored; the `params` object is checked
/// strictly when the step is resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStep {
    /// Operation name, e.g. `crop` or `watermarkImage`
    #[serde(rename = "operation")]
    pub name: String,

    /// Raw parameters for this step
    #[serde(default)]
    pub params: Map<String, Value>,

    /// Keep going with the previous image if this step fails
    #[serde(default)]
    pub ignore_failure: bool,
}

/// Every transformation parameter a request can carry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformOptions {
    // Geometry
    pub width: u32,
    pub height: u32,
    pub area_width: u32,
    pub area_height: u32,
    pub top: u32,
    pub left: u32,
    pub factor: u32,
    pub rotate: u32,
    pub margin: u32,

    // Encoding
    pub quality: u32,
    pub compression: u32,

    // Watermark text
    pub dpi: u32,
    pub text_width: u32,
    pub opacity: f32,
    pub text: String,
    pub font: String,
    pub color: Vec<u8>,

    /// Overlay image URL for watermarkImage
    pub image: String,

    // Blur
    pub sigma: f64,
    pub min_ampl: f64,

    // Flags
    pub flip: Option<bool>,
    pub flop: Option<bool>,
    pub no_crop: Option<bool>,
    pub no_profile: Option<bool>,
    pub no_rotation: Option<bool>,
    pub no_replicate: Option<bool>,
    pub force: Option<bool>,
    pub embed: Option<bool>,
    pub strip_meta: Option<bool>,
    pub interlace: Option<bool>,

    /// Requested output type name; empty keeps the input type
    pub image_type: String,
    pub background: Vec<u8>,
    pub colorspace: Colorspace,
    pub gravity: Gravity,
    pub extend: Extend,

    pub operations: Vec<PipelineStep>,
}

impl TransformOptions {
    /// Build options from a raw query string.
    ///
    /// Only the first value of a repeated key is used, and unknown keys are
    /// ignored so clients can send parameters meant for other layers.
    pub fn from_query(query: &str) -> Result<Self, CoerceError> {
        let mut seen: Vec<(String, Value)> = Vec::new();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            if seen.iter().any(|(k, _)| k.as_str() == key) {
                continue;
            }
            seen.push((key.into_owned(), Value::String(value.into_owned())));
        }

        coerce(
            seen.iter().map(|(k, v)| (k.as_str(), v)),
            UnknownParams::Ignore,
        )
    }

    /// Build options from the parameter object of a pipeline step.
    ///
    /// Unknown parameter names are rejected.
    pub fn from_params(params: &Map<String, Value>) -> Result<Self, CoerceError> {
        coerce(
            params.iter().map(|(k, v)| (k.as_str(), v)),
            UnknownParams::Reject,
        )
    }
}

/// Read a flag, treating "never supplied" as false.
pub fn flag(value: Option<bool>) -> bool {
    value.unwrap_or(false)
}
