//! Text watermark rendering.
//!
//! Text is laid out into a block no wider than the requested text width,
//! rendered once to a transparent RGBA layer and blended onto the image,
//! either once at the margin or tiled across the whole image.

use std::path::Path;

use ab_glyph::{Font, FontArc, GlyphId, PxScale, ScaleFont};
use image::{Rgba, RgbaImage};

use super::raster::MAX_DIMENSION;
use super::TextWatermark;
use crate::error::EngineError;

const DEFAULT_DPI: u32 = 75;
const DEFAULT_POINT_SIZE: f32 = 10.0;
const DEFAULT_OPACITY: f32 = 0.25;

/// Largest glyph size in pixels, whatever the point size and dpi.
pub(crate) const MAX_FONT_PX: f32 = 1024.0;

/// Load a TrueType or OpenType font from disk.
pub fn load_font(path: &Path) -> Result<FontArc, EngineError> {
    let data = std::fs::read(path)
        .map_err(|e| EngineError::Unsupported(format!("cannot read font {}: {}", path.display(), e)))?;
    FontArc::try_from_vec(data)
        .map_err(|e| EngineError::Unsupported(format!("invalid font {}: {}", path.display(), e)))
}

/// Pixel size for a Pango-style font description such as `sans bold 12`.
///
/// The trailing number is the size in points; it defaults to 10pt.
pub(crate) fn font_size_px(description: &str, dpi: u32) -> f32 {
    let points = description
        .split_whitespace()
        .last()
        .and_then(|token| token.parse::<f32>().ok())
        .filter(|size| size.is_finite() && *size > 0.0)
        .unwrap_or(DEFAULT_POINT_SIZE);
    let dpi = if dpi == 0 { DEFAULT_DPI } else { dpi };
    (points * dpi as f32 / 72.0).clamp(1.0, MAX_FONT_PX)
}

/// Reject text layers the engine would refuse as an output image.
pub(crate) fn check_layer(width: u32, height: u32) -> Result<(), EngineError> {
    if width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(EngineError::Geometry(format!(
            "watermark text block {}x{} exceeds the {}px limit",
            width, height, MAX_DIMENSION
        )));
    }
    Ok(())
}

fn line_width<F: Font>(font: &F, scale: PxScale, line: &str) -> f32 {
    let scaled = font.as_scaled(scale);
    let mut width = 0.0f32;
    let mut prev: Option<GlyphId> = None;

    for c in line.chars() {
        let id = scaled.glyph_id(c);
        if let Some(prev) = prev {
            width += scaled.kern(prev, id);
        }
        width += scaled.h_advance(id);
        prev = Some(id);
    }
    width
}

/// Greedy word wrap to `max_width` pixels. Words longer than a line stay whole.
pub(crate) fn wrap<F: Font>(font: &F, scale: PxScale, text: &str, max_width: f32) -> Vec<String> {
    let mut lines = Vec::new();

    for paragraph in text.lines() {
        let mut current = String::new();
        for word in paragraph.split_whitespace() {
            let candidate = if current.is_empty() {
                word.to_string()
            } else {
                format!("{} {}", current, word)
            };

            if !current.is_empty() && line_width(font, scale, &candidate) > max_width {
                lines.push(std::mem::take(&mut current));
                current = word.to_string();
            } else {
                current = candidate;
            }
        }
        lines.push(current);
    }

    lines
}

/// Render the watermark text to a transparent layer.
pub(crate) fn render_block<F: Font>(
    font: &F,
    watermark: &TextWatermark,
    max_width: u32,
) -> Result<RgbaImage, EngineError> {
    let scale = PxScale::from(font_size_px(&watermark.font, watermark.dpi));
    let scaled = font.as_scaled(scale);
    let lines = wrap(font, scale, &watermark.text, max_width as f32);

    let line_height = scaled.height() + scaled.line_gap();
    let width = lines
        .iter()
        .map(|line| line_width(font, scale, line).ceil() as u32)
        .max()
        .unwrap_or(0)
        .max(1);
    let height = ((line_height * lines.len() as f32).ceil() as u32).max(1);
    check_layer(width, height)?;

    let mut layer = RgbaImage::new(width, height);
    let [r, g, b] = watermark.color;

    for (row, line) in lines.iter().enumerate() {
        let baseline = row as f32 * line_height + scaled.ascent();
        let mut cursor_x = 0.0f32;
        let mut prev: Option<GlyphId> = None;

        for c in line.chars() {
            let id = scaled.glyph_id(c);
            if let Some(prev) = prev {
                cursor_x += scaled.kern(prev, id);
            }

            let glyph = id.with_scale_and_position(scale, ab_glyph::point(cursor_x, baseline));
            if let Some(outlined) = font.outline_glyph(glyph) {
                let bounds = outlined.px_bounds();
                outlined.draw(|px, py, coverage| {
                    let x = px as i32 + bounds.min.x as i32;
                    let y = py as i32 + bounds.min.y as i32;
                    if x >= 0 && y >= 0 && (x as u32) < width && (y as u32) < height {
                        let alpha = (coverage.clamp(0.0, 1.0) * 255.0) as u8;
                        let existing = *layer.get_pixel(x as u32, y as u32);
                        let blended = blend_pixels(existing, Rgba([r, g, b, alpha]), 1.0);
                        layer.put_pixel(x as u32, y as u32, blended);
                    }
                });
            }

            cursor_x += scaled.h_advance(id);
            prev = Some(id);
        }
    }

    Ok(layer)
}

/// Draw a text watermark onto `target`.
pub(crate) fn draw_watermark<F: Font>(
    target: &mut RgbaImage,
    font: &F,
    watermark: &TextWatermark,
) -> Result<(), EngineError> {
    let text_width = if watermark.width == 0 {
        (target.width() / 6).max(1)
    } else {
        watermark.width
    };
    let margin = if watermark.margin == 0 {
        text_width
    } else {
        watermark.margin
    };
    let opacity = if watermark.opacity <= 0.0 {
        DEFAULT_OPACITY
    } else {
        watermark.opacity.min(1.0)
    };

    let layer = render_block(font, watermark, text_width)?;

    if watermark.no_replicate {
        blend_layer(target, &layer, margin as i64, margin as i64, opacity);
        return Ok(());
    }

    let step_x = (layer.width() + margin) as usize;
    let step_y = (layer.height() + margin) as usize;
    for y in (0..target.height()).step_by(step_y.max(1)) {
        for x in (0..target.width()).step_by(step_x.max(1)) {
            blend_layer(target, &layer, x as i64, y as i64, opacity);
        }
    }
    Ok(())
}

/// Blend `layer` onto `target` at (`x`, `y`), clipping to the target bounds.
pub(crate) fn blend_layer(target: &mut RgbaImage, layer: &RgbaImage, x: i64, y: i64, opacity: f32) {
    let target_width = target.width() as i64;
    let target_height = target.height() as i64;

    let x_start = x.max(0);
    let y_start = y.max(0);
    let x_end = (x + layer.width() as i64).min(target_width);
    let y_end = (y + layer.height() as i64).min(target_height);

    for ty in y_start..y_end {
        for tx in x_start..x_end {
            let fg = *layer.get_pixel((tx - x) as u32, (ty - y) as u32);
            let bg = *target.get_pixel(tx as u32, ty as u32);
            target.put_pixel(tx as u32, ty as u32, blend_pixels(bg, fg, opacity));
        }
    }
}

/// Porter-Duff "over" with an extra opacity factor on the foreground.
pub(crate) fn blend_pixels(background: Rgba<u8>, foreground: Rgba<u8>, opacity: f32) -> Rgba<u8> {
    let fg_alpha = (foreground[3] as f32 / 255.0) * opacity.clamp(0.0, 1.0);
    let bg_alpha = background[3] as f32 / 255.0;

    let out_alpha = fg_alpha + bg_alpha * (1.0 - fg_alpha);
    if out_alpha < 0.001 {
        return Rgba([0, 0, 0, 0]);
    }

    let blend_channel = |fg: u8, bg: u8| -> u8 {
        let fg = fg as f32 / 255.0;
        let bg = bg as f32 / 255.0;
        let result = (fg * fg_alpha + bg * bg_alpha * (1.0 - fg_alpha)) / out_alpha;
        (result * 255.0).round().clamp(0.0, 255.0) as u8
    };

    Rgba([
        blend_channel(foreground[0], background[0]),
        blend_channel(foreground[1], background[1]),
        blend_channel(foreground[2], background[2]),
        (out_alpha * 255.0).round() as u8,
    ])
}
