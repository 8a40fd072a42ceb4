//! Named image operations.
//!
//! Each operation validates its own required parameters, turns the request
//! options into engine instructions and runs the engine on the blocking pool.
//! Pipelines chain the single operations (see [`pipeline`]).

mod fit;
pub mod pipeline;

use std::sync::Arc;

use bytes::Bytes;
use http::HeaderMap;
use tracing::debug;
use url::Url;

use crate::engine::{
    rgb, EngineOptions, Image, ImageEngine, ImageMetadata, ImageOverlay, ImageType, TextWatermark,
};
use crate::error::{EngineError, OperationError};
use crate::options::{flag, Gravity, TransformOptions};
use crate::source::fetch_image;

pub use fit::fit_dimensions;
pub use pipeline::{carry, resolve_steps, run_pipeline, ResolvedStep, MAX_PIPELINE_STEPS};

/// Largest overlay image fetched for watermarkImage.
pub const MAX_OVERLAY_SIZE: u64 = 1024 * 1024;

/// Shared collaborators for running operations.
#[derive(Clone)]
pub struct OperationContext {
    pub engine: Arc<dyn ImageEngine>,
    pub http: reqwest::Client,
}

impl OperationContext {
    pub fn new(engine: Arc<dyn ImageEngine>, http: reqwest::Client) -> Self {
        Self { engine, http }
    }

    pub async fn transform(&self, buf: Bytes, options: EngineOptions) -> Result<Image, EngineError> {
        let engine = self.engine.clone();
        tokio::task::spawn_blocking(move || engine.transform(&buf, &options))
            .await
            .map_err(|e| EngineError::Internal(e.to_string()))?
    }

    pub async fn metadata(&self, buf: Bytes) -> Result<ImageMetadata, EngineError> {
        let engine = self.engine.clone();
        tokio::task::spawn_blocking(move || engine.metadata(&buf))
            .await
            .map_err(|e| EngineError::Internal(e.to_string()))?
    }
}

/// Every operation the server exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Resize,
    Fit,
    Enlarge,
    Extract,
    Crop,
    SmartCrop,
    Rotate,
    Flip,
    Flop,
    Thumbnail,
    Zoom,
    Convert,
    Watermark,
    WatermarkImage,
    Info,
    Blur,
    Pipeline,
}

impl Operation {
    pub const ALL: [Operation; 17] = [
        Operation::Resize,
        Operation::Fit,
        Operation::Enlarge,
        Operation::Extract,
        Operation::Crop,
        Operation::SmartCrop,
        Operation::Rotate,
        Operation::Flip,
        Operation::Flop,
        Operation::Thumbnail,
        Operation::Zoom,
        Operation::Convert,
        Operation::Watermark,
        Operation::WatermarkImage,
        Operation::Info,
        Operation::Blur,
        Operation::Pipeline,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Operation::Resize => "resize",
            Operation::Fit => "fit",
            Operation::Enlarge => "enlarge",
            Operation::Extract => "extract",
            Operation::Crop => "crop",
            Operation::SmartCrop => "smartcrop",
            Operation::Rotate => "rotate",
            Operation::Flip => "flip",
            Operation::Flop => "flop",
            Operation::Thumbnail => "thumbnail",
            Operation::Zoom => "zoom",
            Operation::Convert => "convert",
            Operation::Watermark => "watermark",
            Operation::WatermarkImage => "watermarkImage",
            Operation::Info => "info",
            Operation::Blur => "blur",
            Operation::Pipeline => "pipeline",
        }
    }

    /// HTTP route path.
    pub fn route(&self) -> &'static str {
        match self {
            Operation::Resize => "/resize",
            Operation::Fit => "/fit",
            Operation::Enlarge => "/enlarge",
            Operation::Extract => "/extract",
            Operation::Crop => "/crop",
            Operation::SmartCrop => "/smartcrop",
            Operation::Rotate => "/rotate",
            Operation::Flip => "/flip",
            Operation::Flop => "/flop",
            Operation::Thumbnail => "/thumbnail",
            Operation::Zoom => "/zoom",
            Operation::Convert => "/convert",
            Operation::Watermark => "/watermark",
            Operation::WatermarkImage => "/watermarkimage",
            Operation::Info => "/info",
            Operation::Blur => "/blur",
            Operation::Pipeline => "/pipeline",
        }
    }

    /// Look up an operation usable as a pipeline step.
    ///
    /// `info` and `pipeline` itself cannot be chained.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .filter(|op| !matches!(op, Operation::Info | Operation::Pipeline))
            .find(|op| op.name() == name)
    }

    /// Run the operation on `buf`.
    pub async fn run(
        self,
        ctx: &OperationContext,
        buf: Bytes,
        options: &TransformOptions,
    ) -> Result<Image, OperationError> {
        match self {
            Operation::Pipeline => run_pipeline(ctx, buf, options).await,
            single => single.apply(ctx, buf, options).await,
        }
    }

    /// Run a single, non-pipeline operation.
    pub(crate) async fn apply(
        self,
        ctx: &OperationContext,
        buf: Bytes,
        o: &TransformOptions,
    ) -> Result<Image, OperationError> {
        match self {
            Operation::Info => {
                let meta = ctx.metadata(buf).await?;
                let body = serde_json::to_vec(&meta)
                    .map_err(|e| EngineError::Internal(e.to_string()))?;
                Ok(Image::new(body, "application/json"))
            }
            Operation::Fit => {
                if o.width == 0 || o.height == 0 {
                    return Err(OperationError::MissingParam("height, width"));
                }
                let meta = ctx.metadata(buf.clone()).await?;
                let options = fit_options(o, &meta)?;
                Ok(ctx.transform(buf, options).await?)
            }
            Operation::WatermarkImage => {
                if o.image.is_empty() {
                    return Err(OperationError::MissingParam("image"));
                }
                let overlay = fetch_overlay(&ctx.http, &o.image).await?;

                let mut options = EngineOptions::from(o);
                options.overlay = Some(ImageOverlay {
                    buf: overlay,
                    top: o.top,
                    left: o.left,
                    opacity: o.opacity,
                });
                Ok(ctx.transform(buf, options).await?)
            }
            Operation::Pipeline => Err(OperationError::UnknownOperation(self.name().to_string())),
            other => {
                let options = other.engine_options(o)?;
                Ok(ctx.transform(buf, options).await?)
            }
        }
    }

    /// Validate and build engine instructions for operations that need no I/O.
    pub fn engine_options(&self, o: &TransformOptions) -> Result<EngineOptions, OperationError> {
        let mut opts = EngineOptions::from(o);

        match self {
            Operation::Resize => {
                require_width_or_height(o)?;
                opts.embed = true;
                if let Some(no_crop) = o.no_crop {
                    opts.crop = !no_crop;
                }
            }
            Operation::Enlarge => {
                if o.width == 0 || o.height == 0 {
                    return Err(OperationError::MissingParam("height, width"));
                }
                opts.enlarge = true;
                // Both sides are given, so cropping is the default
                opts.crop = !flag(o.no_crop);
            }
            Operation::Extract => {
                if o.area_width == 0 || o.area_height == 0 {
                    return Err(OperationError::MissingParam("areawidth or areaheight"));
                }
                set_area(&mut opts, o);
            }
            Operation::Crop => {
                require_width_or_height(o)?;
                opts.crop = true;
            }
            Operation::SmartCrop => {
                require_width_or_height(o)?;
                opts.crop = true;
                opts.gravity = Gravity::Smart;
            }
            Operation::Rotate => {
                if o.rotate == 0 {
                    return Err(OperationError::MissingParam("rotate"));
                }
            }
            Operation::Flip => opts.flip = true,
            Operation::Flop => opts.flop = true,
            Operation::Thumbnail => {
                require_width_or_height(o)?;
                opts.crop = true;
            }
            Operation::Zoom => {
                if o.factor == 0 {
                    return Err(OperationError::MissingParam("factor"));
                }
                if o.top > 0 || o.left > 0 {
                    if o.area_width == 0 && o.area_height == 0 {
                        return Err(OperationError::MissingParam("areawidth, areaheight"));
                    }
                    set_area(&mut opts, o);
                    if let Some(no_crop) = o.no_crop {
                        opts.crop = !no_crop;
                    }
                }
                opts.zoom = o.factor;
            }
            Operation::Convert => {
                if o.image_type.is_empty() {
                    return Err(OperationError::MissingParam("type"));
                }
                if !ImageType::from_name(&o.image_type).is_known() {
                    return Err(OperationError::InvalidType(o.image_type.clone()));
                }
            }
            Operation::Watermark => {
                if o.text.is_empty() {
                    return Err(OperationError::MissingParam("text"));
                }
                opts.watermark = Some(TextWatermark {
                    text: o.text.clone(),
                    font: o.font.clone(),
                    dpi: o.dpi,
                    margin: o.margin,
                    width: o.text_width,
                    opacity: o.opacity,
                    no_replicate: flag(o.no_replicate),
                    color: rgb(&o.color).unwrap_or([255, 255, 255]),
                });
            }
            Operation::Blur => {
                if o.sigma == 0.0 && o.min_ampl == 0.0 {
                    return Err(OperationError::MissingParam("sigma or minampl"));
                }
            }
            Operation::Fit | Operation::WatermarkImage | Operation::Info | Operation::Pipeline => {}
        }

        Ok(opts)
    }
}

fn require_width_or_height(o: &TransformOptions) -> Result<(), OperationError> {
    if o.width == 0 && o.height == 0 {
        return Err(OperationError::MissingParam("height or width"));
    }
    Ok(())
}

fn set_area(opts: &mut EngineOptions, o: &TransformOptions) {
    opts.top = o.top;
    opts.left = o.left;
    opts.area_width = o.area_width;
    opts.area_height = o.area_height;
}

/// Engine instructions for fit, computed in displayed orientation.
pub(crate) fn fit_options(o: &TransformOptions, meta: &ImageMetadata) -> Result<EngineOptions, OperationError> {
    if meta.width == 0 || meta.height == 0 {
        return Err(OperationError::NotAcceptable(
            "Width or height of requested image is zero".to_string(),
        ));
    }

    // Orientations 5-8 swap the displayed width and height
    let swap = !flag(o.no_rotation) && meta.orientation > 4;
    let (fit_w, fit_h) = if swap {
        fit_dimensions(meta.height, meta.width, o.height, o.width)
    } else {
        fit_dimensions(meta.width, meta.height, o.width, o.height)
    };
    let (width, height) = if swap { (fit_h, fit_w) } else { (fit_w, fit_h) };

    if width == 0 || height == 0 {
        return Err(OperationError::NotAcceptable(
            "Computed fit dimensions are zero".to_string(),
        ));
    }

    let mut opts = EngineOptions::from(o);
    opts.width = width;
    opts.height = height;
    opts.embed = true;
    Ok(opts)
}

async fn fetch_overlay(client: &reqwest::Client, raw: &str) -> Result<Bytes, OperationError> {
    let url = Url::parse(raw).map_err(|_| OperationError::Overlay(raw.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(OperationError::Overlay(raw.to_string()));
    }

    debug!(host = url.host_str().unwrap_or_default(), "fetching watermark image");
    let buf = fetch_image(client, &url, HeaderMap::new(), MAX_OVERLAY_SIZE)
        .await
        .map_err(|e| OperationError::Overlay(e.to_string()))?;

    if buf.is_empty() {
        return Err(OperationError::Overlay("empty watermark image".to_string()));
    }
    Ok(buf)
}
