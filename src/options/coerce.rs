//! Parameter coercion.
//!
//! Each recognized parameter name maps to exactly one typed coercion. Values
//! are either strings (query strings) or JSON values (pipeline steps); both go
//! through the same path. The first failing field aborts the whole call.

use std::num::IntErrorKind;

use serde_json::Value;

use super::{Colorspace, Extend, Gravity, PipelineStep, TransformOptions};
use crate::error::CoerceError;

/// What to do with parameter names that are not recognized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnknownParams {
    Ignore,
    Reject,
}

/// Coerce raw parameters into [`TransformOptions`].
pub fn coerce<'a, I>(params: I, unknown: UnknownParams) -> Result<TransformOptions, CoerceError>
where
    I: IntoIterator<Item = (&'a str, &'a Value)>,
{
    let mut options = TransformOptions::default();

    for (key, value) in params {
        match apply(&mut options, key, value) {
            Ok(true) => {}
            Ok(false) if unknown == UnknownParams::Ignore => {}
            Ok(false) => return Err(CoerceError::UnknownParam(key.to_string())),
            Err(reason) => {
                return Err(CoerceError::InvalidParam {
                    key: key.to_string(),
                    value: display_value(value),
                    reason,
                })
            }
        }
    }

    Ok(options)
}

/// Apply one parameter. Returns `Ok(false)` if the name is not recognized.
fn apply(options: &mut TransformOptions, key: &str, value: &Value) -> Result<bool, String> {
    match key {
        "width" => options.width = to_int(value)?,
        "height" => options.height = to_int(value)?,
        "quality" => options.quality = to_int(value)?,
        "top" => options.top = to_int(value)?,
        "left" => options.left = to_int(value)?,
        "areawidth" => options.area_width = to_int(value)?,
        "areaheight" => options.area_height = to_int(value)?,
        "compression" => options.compression = to_int(value)?,
        "rotate" => options.rotate = to_int(value)?,
        "margin" => options.margin = to_int(value)?,
        "factor" => options.factor = to_int(value)?,
        "dpi" => options.dpi = to_int(value)?,
        "textwidth" => options.text_width = to_int(value)?,

        "opacity" => options.opacity = to_float(value)? as f32,
        "sigma" => options.sigma = to_float(value)?,
        "minampl" => options.min_ampl = to_float(value)?,

        "flip" => options.flip = Some(to_bool(value)?),
        "flop" => options.flop = Some(to_bool(value)?),
        "nocrop" => options.no_crop = Some(to_bool(value)?),
        "noprofile" => options.no_profile = Some(to_bool(value)?),
        "norotation" => options.no_rotation = Some(to_bool(value)?),
        "noreplicate" => options.no_replicate = Some(to_bool(value)?),
        "force" => options.force = Some(to_bool(value)?),
        "embed" => options.embed = Some(to_bool(value)?),
        "stripmeta" => options.strip_meta = Some(to_bool(value)?),
        "interlace" => options.interlace = Some(to_bool(value)?),

        "text" => options.text = to_string(value)?,
        "font" => options.font = to_string(value)?,
        "image" => options.image = to_string(value)?,
        "type" => options.image_type = to_string(value)?,

        "color" => options.color = parse_color(&to_string(value)?),
        "background" => options.background = parse_color(&to_string(value)?),

        "colorspace" => options.colorspace = Colorspace::parse(&to_string(value)?),
        "gravity" => options.gravity = Gravity::parse(&to_string(value)?),
        "extend" => options.extend = Extend::parse(&to_string(value)?),

        "operations" => options.operations = to_operations(value)?,

        _ => return Ok(false),
    }

    Ok(true)
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Round half up on the magnitude; negative geometry is taken as its absolute value.
fn round_abs(value: f64) -> u32 {
    (value.abs() + 0.5).floor() as u32
}

fn to_int(value: &Value) -> Result<u32, String> {
    to_float(value).map(round_abs)
}

fn to_float(value: &Value) -> Result<f64, String> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .map(f64::abs)
            .ok_or_else(|| "number out of range".to_string()),
        Value::String(s) if s.is_empty() => Ok(0.0),
        Value::String(s) => s
            .parse::<f64>()
            .map(f64::abs)
            .map_err(|e| e.to_string()),
        _ => Err("expected a number".to_string()),
    }
}

fn to_bool(value: &Value) -> Result<bool, String> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::String(s) => match s.as_str() {
            "" => Ok(false),
            "1" | "t" | "T" | "TRUE" | "true" | "True" => Ok(true),
            "0" | "f" | "F" | "FALSE" | "false" | "False" => Ok(false),
            other => Err(format!("invalid boolean: {:?}", other)),
        },
        _ => Err("expected a boolean".to_string()),
    }
}

fn to_string(value: &Value) -> Result<String, String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        _ => Err("expected a string".to_string()),
    }
}

fn to_operations(value: &Value) -> Result<Vec<PipelineStep>, String> {
    match value {
        Value::String(s) => parse_operations(s),
        Value::Array(_) => serde_json::from_value(value.clone()).map_err(|e| e.to_string()),
        _ => Err("expected a JSON array of operations".to_string()),
    }
}

/// Decode the `operations` JSON parameter.
///
/// Anything shorter than two characters is treated as an empty list.
pub fn parse_operations(raw: &str) -> Result<Vec<PipelineStep>, String> {
    if raw.len() < 2 {
        return Ok(Vec::new());
    }
    serde_json::from_str(raw).map_err(|e| e.to_string())
}

/// Parse a comma-separated list of colour channels.
///
/// Out-of-range numerals clamp to 255; anything unparsable becomes 0.
pub fn parse_color(raw: &str) -> Vec<u8> {
    if raw.is_empty() {
        return Vec::new();
    }

    raw.split(',')
        .map(|token| match token.trim().parse::<u64>() {
            Ok(n) => n.min(255) as u8,
            Err(e) if *e.kind() == IntErrorKind::PosOverflow => 255,
            Err(_) => 0,
        })
        .collect()
}
