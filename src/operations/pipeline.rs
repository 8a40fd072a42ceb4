//! Chained operations.
//!
//! A pipeline is validated as a whole before anything runs, then folded over
//! its steps carrying the last good image. A failed step either aborts the
//! fold or, when marked `ignore_failure`, leaves the carried image untouched.

use bytes::Bytes;
use tracing::{debug, warn};

use super::{Operation, OperationContext};
use crate::engine::Image;
use crate::error::OperationError;
use crate::options::{PipelineStep, TransformOptions};

/// Most steps a single pipeline may carry.
pub const MAX_PIPELINE_STEPS: usize = 10;

/// A validated pipeline step, ready to run.
#[derive(Debug, Clone)]
pub struct ResolvedStep {
    pub operation: Operation,
    pub options: TransformOptions,
    pub ignore_failure: bool,
}

/// Validate every step and coerce its parameters.
///
/// Fails on the first invalid step, before any step runs.
pub fn resolve_steps(steps: &[PipelineStep]) -> Result<Vec<ResolvedStep>, OperationError> {
    if steps.is_empty() {
        return Err(OperationError::EmptyPipeline);
    }
    if steps.len() > MAX_PIPELINE_STEPS {
        return Err(OperationError::TooManySteps);
    }

    steps
        .iter()
        .map(|step| {
            let operation = Operation::from_name(&step.name)
                .ok_or_else(|| OperationError::UnknownOperation(step.name.clone()))?;
            let options = TransformOptions::from_params(&step.params).map_err(|source| {
                OperationError::StepParams {
                    operation: step.name.clone(),
                    source,
                }
            })?;

            Ok(ResolvedStep {
                operation,
                options,
                ignore_failure: step.ignore_failure,
            })
        })
        .collect()
}

/// One fold step: combine the carried image with a step's outcome.
///
/// A success replaces the carried image. An ignored failure keeps it.
/// Any other failure ends the fold.
pub fn carry(
    acc: Image,
    outcome: Result<Image, OperationError>,
    ignore_failure: bool,
) -> Result<Image, OperationError> {
    match outcome {
        Ok(image) => Ok(image),
        Err(_) if ignore_failure => Ok(acc),
        Err(e) => Err(e),
    }
}

/// Run the pipeline carried in `options.operations` on `buf`.
pub async fn run_pipeline(
    ctx: &OperationContext,
    buf: Bytes,
    options: &TransformOptions,
) -> Result<Image, OperationError> {
    let steps = resolve_steps(&options.operations)?;

    let mime = ctx.engine.detect_type(&buf).mime();
    let mut acc = Image::new(buf, mime);

    for (index, step) in steps.into_iter().enumerate() {
        let outcome = step
            .operation
            .apply(ctx, acc.body.clone(), &step.options)
            .await;

        match &outcome {
            Ok(_) => debug!(step = index, operation = step.operation.name(), "pipeline step done"),
            Err(e) if step.ignore_failure => warn!(
                step = index,
                operation = step.operation.name(),
                error = %e,
                "ignoring failed pipeline step"
            ),
            Err(_) => {}
        }

        acc = carry(acc, outcome, step.ignore_failure)?;
    }

    Ok(acc)
}
