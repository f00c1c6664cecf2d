use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use image::imageops::FilterType;

use crate::config::SynthesisConfig;
use crate::models::{ModelLoader, RunContext};

/// Restyles the image at `source` according to `prompt` and writes the
/// result to `destination`, replacing any existing file.
///
/// The source is read from disk again and resized to the configured square.
/// The parent directory of `destination` is not created.
pub fn generate_styled_image(
    prompt: &str,
    source: &Path,
    destination: &Path,
    loader: &dyn ModelLoader,
    config: &SynthesisConfig,
    context: &RunContext,
) -> anyhow::Result<PathBuf> {
    let params = config.params();
    params.validate()?;

    let init_image =
        crate::load_rgb(source)?.resize_exact(config.size, config.size, FilterType::CatmullRom);

    let started = Instant::now();
    let mut model = loader.load_styler(config, context)?;
    tracing::info!(
        model_id = %config.model_id,
        device = %context.device,
        dtype = ?context.device.dtype(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "diffusion model loaded"
    );

    let started = Instant::now();
    let images = model.restyle(prompt, &init_image, &params)?;
    tracing::info!(
        steps = params.steps,
        guidance_scale = params.guidance_scale,
        strength = params.strength,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "image generated"
    );

    let image = images
        .into_iter()
        .next()
        .context("Diffusion model returned no images")?;
    image
        .save(destination)
        .with_context(|| format!("Failed to save output image {}", destination.display()))?;

    Ok(destination.to_path_buf())
}
