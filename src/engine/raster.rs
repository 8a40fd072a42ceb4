//! Pure Rust engine built on the `image` crate.
//!
//! Processing order for one call:
//! decode, extract area, zoom, resize (force / crop / contain / embed),
//! EXIF auto-orientation, rotate, flip/flop, blur, colorspace, text
//! watermark, image overlay, background flatten, encode.
//!
//! Geometry is applied in stored orientation and the EXIF rotation comes
//! after it, so callers that reason about displayed dimensions must swap
//! width and height themselves (see the fit operation).

use std::io::Cursor;

use ab_glyph::FontArc;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::codecs::webp::WebPEncoder;
use image::imageops::FilterType;
use image::{
    DynamicImage, GenericImageView, ImageDecoder, ImageFormat, ImageReader, Rgba, RgbaImage,
};
use tracing::debug;

use super::orientation::read_orientation;
use super::text::{blend_layer, draw_watermark};
use super::{EngineOptions, Image, ImageEngine, ImageMetadata, ImageType};
use crate::error::EngineError;
use crate::options::{Colorspace, Extend, Gravity};

/// Default JPEG quality when none is requested.
pub const DEFAULT_QUALITY: u8 = 80;

/// Largest output side the engine will produce.
pub const MAX_DIMENSION: u32 = 16_384;

/// Largest gaussian blur sigma accepted.
pub const MAX_BLUR_SIGMA: f64 = 100.0;

const RESIZE_FILTER: FilterType = FilterType::Lanczos3;

/// The bundled engine. Text watermarks need a font loaded at startup.
#[derive(Clone, Default)]
pub struct RasterEngine {
    font: Option<FontArc>,
}

impl RasterEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_font(font: FontArc) -> Self {
        Self { font: Some(font) }
    }
}

// =============================================================================
// Format mapping
// =============================================================================

fn image_type_of(format: ImageFormat) -> ImageType {
    match format {
        ImageFormat::Jpeg => ImageType::Jpeg,
        ImageFormat::Png => ImageType::Png,
        ImageFormat::WebP => ImageType::Webp,
        ImageFormat::Gif => ImageType::Gif,
        ImageFormat::Tiff => ImageType::Tiff,
        _ => ImageType::Unknown,
    }
}

fn format_of(image_type: ImageType) -> Option<ImageFormat> {
    match image_type {
        ImageType::Jpeg => Some(ImageFormat::Jpeg),
        ImageType::Png => Some(ImageFormat::Png),
        ImageType::Webp => Some(ImageFormat::WebP),
        ImageType::Gif => Some(ImageFormat::Gif),
        ImageType::Tiff => Some(ImageFormat::Tiff),
        ImageType::Unknown => None,
    }
}

// =============================================================================
// Geometry
// =============================================================================

/// Fill a missing target dimension from the source aspect ratio.
pub(crate) fn target_size(src_w: u32, src_h: u32, width: u32, height: u32) -> (u32, u32) {
    match (width, height) {
        (0, 0) => (src_w, src_h),
        (w, 0) => (
            w,
            ((src_h as f64 * w as f64 / src_w as f64).round() as u32).max(1),
        ),
        (0, h) => (
            ((src_w as f64 * h as f64 / src_h as f64).round() as u32).max(1),
            h,
        ),
        (w, h) => (w, h),
    }
}

/// Top-left corner of a `w`x`h` window inside `src_w`x`src_h`.
pub(crate) fn gravity_offset(gravity: Gravity, src_w: u32, src_h: u32, w: u32, h: u32) -> (u32, u32) {
    let free_x = src_w.saturating_sub(w);
    let free_y = src_h.saturating_sub(h);
    match gravity {
        Gravity::North => (free_x / 2, 0),
        Gravity::South => (free_x / 2, free_y),
        Gravity::East => (free_x, free_y / 2),
        Gravity::West => (0, free_y / 2),
        // No saliency detection here, smart falls back to centre
        Gravity::Centre | Gravity::Smart => (free_x / 2, free_y / 2),
    }
}

fn scaled(len: u32, scale: f64) -> u32 {
    ((len as f64 * scale).round() as u32).max(1)
}

fn check_dimensions(w: u32, h: u32) -> Result<(), EngineError> {
    if w > MAX_DIMENSION || h > MAX_DIMENSION {
        return Err(EngineError::Geometry(format!(
            "output size {}x{} exceeds the {}px limit",
            w, h, MAX_DIMENSION
        )));
    }
    Ok(())
}

fn extract(img: DynamicImage, o: &EngineOptions) -> Result<DynamicImage, EngineError> {
    if o.area_width == 0 || o.area_height == 0 {
        return Ok(img);
    }

    let (w, h) = img.dimensions();
    let fits_x = o.left.checked_add(o.area_width).is_some_and(|right| right <= w);
    let fits_y = o.top.checked_add(o.area_height).is_some_and(|bottom| bottom <= h);
    if !fits_x || !fits_y {
        return Err(EngineError::Geometry(format!(
            "extract area {}x{}+{}+{} is outside the {}x{} image",
            o.area_width, o.area_height, o.left, o.top, w, h
        )));
    }

    Ok(img.crop_imm(o.left, o.top, o.area_width, o.area_height))
}

fn zoom(img: DynamicImage, factor: u32) -> Result<DynamicImage, EngineError> {
    if factor <= 1 {
        return Ok(img);
    }
    let (w, h) = img.dimensions();
    let zw = w.saturating_mul(factor);
    let zh = h.saturating_mul(factor);
    check_dimensions(zw, zh)?;
    Ok(img.resize_exact(zw, zh, FilterType::Nearest))
}

fn resize(img: DynamicImage, o: &EngineOptions) -> Result<DynamicImage, EngineError> {
    if o.width == 0 && o.height == 0 {
        return Ok(img);
    }

    let (src_w, src_h) = img.dimensions();
    let (tw, th) = target_size(src_w, src_h, o.width, o.height);
    check_dimensions(tw, th)?;

    if o.force {
        return Ok(img.resize_exact(tw, th, RESIZE_FILTER));
    }

    let x_scale = tw as f64 / src_w as f64;
    let y_scale = th as f64 / src_h as f64;

    if o.crop {
        let mut scale = x_scale.max(y_scale);
        if !o.enlarge {
            scale = scale.min(1.0);
        }
        let (rw, rh) = (scaled(src_w, scale), scaled(src_h, scale));
        let resized = if (rw, rh) == (src_w, src_h) {
            img
        } else {
            img.resize_exact(rw, rh, RESIZE_FILTER)
        };

        let (cw, ch) = (tw.min(rw), th.min(rh));
        let (x, y) = gravity_offset(o.gravity, rw, rh, cw, ch);
        return Ok(resized.crop_imm(x, y, cw, ch));
    }

    // Small images are left alone unless enlarging is allowed
    if !o.enlarge && src_w <= tw && src_h <= th {
        return Ok(img);
    }

    let mut scale = x_scale.min(y_scale);
    if !o.enlarge {
        scale = scale.min(1.0);
    }
    let (rw, rh) = (scaled(src_w, scale), scaled(src_h, scale));
    let resized = img.resize_exact(rw, rh, RESIZE_FILTER);

    if o.embed && o.width > 0 && o.height > 0 && (rw != tw || rh != th) {
        return Ok(embed(&resized, tw, th, o.extend, o.background));
    }
    Ok(resized)
}

/// Map a canvas coordinate back into the source for edge-extending modes.
fn edge_coord(pos: i64, len: u32, mirror: bool) -> u32 {
    let len = len as i64;
    if !mirror {
        return pos.clamp(0, len - 1) as u32;
    }
    let period = 2 * len;
    let m = pos.rem_euclid(period);
    (if m < len { m } else { period - 1 - m }) as u32
}

/// Centre `img` on a `w`x`h` canvas and fill the rest per `extend`.
fn embed(img: &DynamicImage, w: u32, h: u32, extend: Extend, background: Option<[u8; 3]>) -> DynamicImage {
    let src = img.to_rgba8();
    let (sw, sh) = src.dimensions();
    let ox = (w as i64 - sw as i64) / 2;
    let oy = (h as i64 - sh as i64) / 2;

    let fill = match extend {
        Extend::White => Rgba([255, 255, 255, 255]),
        Extend::Background => {
            let [r, g, b] = background.unwrap_or([0, 0, 0]);
            Rgba([r, g, b, 255])
        }
        _ => Rgba([0, 0, 0, 255]),
    };

    let canvas = RgbaImage::from_fn(w, h, |x, y| {
        let sx = x as i64 - ox;
        let sy = y as i64 - oy;
        let inside = sx >= 0 && sy >= 0 && sx < sw as i64 && sy < sh as i64;
        if inside {
            return *src.get_pixel(sx as u32, sy as u32);
        }
        match extend {
            Extend::Copy | Extend::Mirror => {
                let mirror = extend == Extend::Mirror;
                *src.get_pixel(edge_coord(sx, sw, mirror), edge_coord(sy, sh, mirror))
            }
            _ => fill,
        }
    });

    if img.color().has_alpha() {
        DynamicImage::ImageRgba8(canvas)
    } else {
        DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(canvas).to_rgb8())
    }
}

fn rotate(img: DynamicImage, degrees: u32) -> DynamicImage {
    match (degrees % 360) / 90 * 90 {
        90 => img.rotate90(),
        180 => img.rotate180(),
        270 => img.rotate270(),
        _ => img,
    }
}

fn flatten(img: DynamicImage, background: [u8; 3]) -> DynamicImage {
    let [r, g, b] = background;
    let mut canvas = RgbaImage::from_pixel(img.width(), img.height(), Rgba([r, g, b, 255]));
    blend_layer(&mut canvas, &img.to_rgba8(), 0, 0, 1.0);
    DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(canvas).to_rgb8())
}

// =============================================================================
// Encoding
// =============================================================================

fn png_compression(level: u32) -> CompressionType {
    match level {
        0 => CompressionType::Default,
        1..=3 => CompressionType::Fast,
        4..=6 => CompressionType::Default,
        _ => CompressionType::Best,
    }
}

fn encode(img: &DynamicImage, output: ImageType, o: &EngineOptions) -> Result<Vec<u8>, EngineError> {
    let mut buf = Cursor::new(Vec::new());
    let encode_err = |e: image::ImageError| EngineError::Encode(format!("{} ({})", e, output.name()));

    match output {
        ImageType::Jpeg => {
            let quality = match o.quality {
                0 => DEFAULT_QUALITY,
                q => q.clamp(1, 100) as u8,
            };
            let encoder = JpegEncoder::new_with_quality(&mut buf, quality);
            if img.color().has_color() {
                img.to_rgb8().write_with_encoder(encoder).map_err(encode_err)?;
            } else {
                img.to_luma8().write_with_encoder(encoder).map_err(encode_err)?;
            }
        }
        ImageType::Png => {
            let encoder =
                PngEncoder::new_with_quality(&mut buf, png_compression(o.compression), PngFilter::Adaptive);
            img.write_with_encoder(encoder).map_err(encode_err)?;
        }
        ImageType::Webp => {
            // Only lossless WebP encoding is available
            let encoder = WebPEncoder::new_lossless(&mut buf);
            if img.color().has_alpha() {
                img.to_rgba8().write_with_encoder(encoder).map_err(encode_err)?;
            } else {
                img.to_rgb8().write_with_encoder(encoder).map_err(encode_err)?;
            }
        }
        ImageType::Gif => {
            DynamicImage::ImageRgba8(img.to_rgba8())
                .write_to(&mut buf, ImageFormat::Gif)
                .map_err(encode_err)?;
        }
        ImageType::Tiff => {
            let normalized = if img.color().has_alpha() {
                DynamicImage::ImageRgba8(img.to_rgba8())
            } else {
                DynamicImage::ImageRgb8(img.to_rgb8())
            };
            normalized
                .write_to(&mut buf, ImageFormat::Tiff)
                .map_err(encode_err)?;
        }
        ImageType::Unknown => return Err(EngineError::UnsupportedType),
    }

    Ok(buf.into_inner())
}

// =============================================================================
// Engine
// =============================================================================

impl ImageEngine for RasterEngine {
    fn name(&self) -> &'static str {
        "raster"
    }

    fn transform(&self, input: &[u8], o: &EngineOptions) -> Result<Image, EngineError> {
        let input_type = self.detect_type(input);
        let format = format_of(input_type).ok_or(EngineError::UnsupportedType)?;
        let output = o.output.unwrap_or(input_type);

        if o.watermark.is_some() && self.font.is_none() {
            return Err(EngineError::Unsupported(
                "text watermarks need a font configured with --font".to_string(),
            ));
        }

        let mut img = image::load_from_memory_with_format(input, format)
            .map_err(|e| EngineError::Decode(e.to_string()))?;
        debug!(
            width = img.width(),
            height = img.height(),
            input = input_type.name(),
            output = output.name(),
            "transforming image"
        );

        img = extract(img, o)?;
        img = zoom(img, o.zoom)?;
        img = resize(img, o)?;

        if !o.no_auto_rotate {
            if let Some(orientation) = read_orientation(input) {
                img = orientation.apply(img);
            }
        }

        img = rotate(img, o.rotate);
        if o.flip {
            img = img.flipv();
        }
        if o.flop {
            img = img.fliph();
        }

        if let Some(blur) = o.blur {
            let sigma = if blur.sigma > 0.0 { blur.sigma } else { 1.0 };
            if !sigma.is_finite() || sigma > MAX_BLUR_SIGMA {
                return Err(EngineError::Unsupported(format!(
                    "blur sigma {} exceeds the limit of {}",
                    sigma, MAX_BLUR_SIGMA
                )));
            }
            img = img.blur(sigma as f32);
        }

        if o.colorspace == Colorspace::Bw {
            img = if img.color().has_alpha() {
                DynamicImage::ImageLumaA8(img.to_luma_alpha8())
            } else {
                DynamicImage::ImageLuma8(img.to_luma8())
            };
        }

        if let (Some(watermark), Some(font)) = (&o.watermark, &self.font) {
            let mut canvas = img.to_rgba8();
            draw_watermark(&mut canvas, font, watermark)?;
            img = DynamicImage::ImageRgba8(canvas);
        }

        if let Some(overlay) = &o.overlay {
            let layer = image::load_from_memory(&overlay.buf)
                .map_err(|e| EngineError::Decode(format!("watermark image: {}", e)))?
                .to_rgba8();
            let opacity = if overlay.opacity <= 0.0 { 1.0 } else { overlay.opacity };
            let had_alpha = img.color().has_alpha();
            let mut canvas = img.to_rgba8();
            blend_layer(&mut canvas, &layer, overlay.left as i64, overlay.top as i64, opacity);
            img = DynamicImage::ImageRgba8(canvas);
            if !had_alpha {
                img = DynamicImage::ImageRgb8(img.to_rgb8());
            }
        }

        if let Some(background) = o.background {
            if img.color().has_alpha() {
                img = flatten(img, background);
            }
        }

        let body = encode(&img, output, o)?;
        Ok(Image::new(body, output.mime()))
    }

    fn metadata(&self, input: &[u8]) -> Result<ImageMetadata, EngineError> {
        let reader = ImageReader::new(Cursor::new(input))
            .with_guessed_format()
            .map_err(|e| EngineError::Decode(e.to_string()))?;
        let image_type = reader
            .format()
            .map(image_type_of)
            .filter(ImageType::is_known)
            .ok_or(EngineError::UnsupportedType)?;

        let mut decoder = reader
            .into_decoder()
            .map_err(|e| EngineError::Decode(e.to_string()))?;
        let (width, height) = decoder.dimensions();
        let color = decoder.color_type();
        let has_profile = decoder.icc_profile().ok().flatten().is_some();

        Ok(ImageMetadata {
            width,
            height,
            image_type: image_type.name(),
            space: if color.has_color() { "srgb" } else { "b-w" },
            channels: color.channel_count(),
            has_alpha: color.has_alpha(),
            has_profile,
            orientation: read_orientation(input).map(|o| o as u16).unwrap_or(0),
        })
    }

    fn detect_type(&self, input: &[u8]) -> ImageType {
        image::guess_format(input)
            .map(image_type_of)
            .unwrap_or(ImageType::Unknown)
    }
}
