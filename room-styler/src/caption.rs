use std::path::Path;
use std::time::Instant;

use anyhow::Context;

use crate::config::CaptionConfig;
use crate::models::{ModelLoader, RunContext};

/// Describes the room in `image_path` with one sentence.
///
/// Only the first candidate the model returns is used.
pub fn generate_caption(
    image_path: &Path,
    loader: &dyn ModelLoader,
    config: &CaptionConfig,
    context: &RunContext,
) -> anyhow::Result<String> {
    let image = crate::load_rgb(image_path)?;

    let started = Instant::now();
    let mut model = loader.load_captioner(config, context)?;
    tracing::info!(
        model_id = %config.model_id,
        device = %context.device,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "caption model loaded"
    );

    let candidates = model.captions(&image)?;
    tracing::debug!(candidates = candidates.len(), "caption candidates");

    candidates
        .into_iter()
        .next()
        .context("Caption model returned no candidates")
}
