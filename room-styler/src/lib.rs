//! Restyles a room photograph in three stages: caption the photo, combine the
//! caption with a style label into a prompt, and run image-to-image diffusion
//! on the photo with that prompt.
//!
//! The binary is meant to be spawned by another program. Stdout carries
//! exactly one JSON line per run, either
//! `{"caption": .., "prompt": .., "output_path": ..}` with exit code 0 or
//! `{"error": ..}` with exit code 1. Everything else goes to stderr.

pub mod caption;
pub mod cli;
pub mod config;
pub mod device;
pub mod diagnostics;
pub mod error;
pub mod models;
pub mod prompt;
pub mod report;
pub mod synthesis;

#[cfg(test)]
mod testing;

use std::ffi::OsString;
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use image::DynamicImage;
use tracing_subscriber::fmt::MakeWriter;

pub use crate::config::{CONFIG_ENV, PipelineConfig};
pub use crate::models::{ModelLoader, PretrainedModels, RunContext};
pub use crate::report::Report;

/// Runs the tool with the pretrained models, reading the optional config file
/// named by [`CONFIG_ENV`].
pub fn run<I, T, W, D>(args: I, stdout: &mut W, diagnostics: D) -> ExitCode
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
    W: Write,
    D: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    App::new(PretrainedModels)
        .with_config_path(std::env::var_os(CONFIG_ENV).map(PathBuf::from))
        .run(args, stdout, diagnostics)
}

pub struct App<L> {
    loader: L,
    config_path: Option<PathBuf>,
}

impl<L: ModelLoader> App<L> {
    pub fn new(loader: L) -> Self {
        Self {
            loader,
            config_path: None,
        }
    }

    pub fn with_config_path(mut self, config_path: Option<PathBuf>) -> Self {
        self.config_path = config_path;
        self
    }

    /// Executes one invocation and writes its report to `stdout`.
    ///
    /// Diagnostics are routed to `diagnostics` for the duration of the call
    /// only; no global subscriber is installed.
    pub fn run<I, T, W, D>(&self, args: I, stdout: &mut W, diagnostics: D) -> ExitCode
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
        W: Write,
        D: for<'w> MakeWriter<'w> + Send + Sync + 'static,
    {
        tracing::subscriber::with_default(diagnostics::subscriber(diagnostics), || {
            let report = match panic::catch_unwind(AssertUnwindSafe(|| self.execute(args))) {
                Ok(Ok(report)) => report,
                Ok(Err(error)) => {
                    tracing::error!("{error:#}");
                    Report::failure(error)
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    tracing::error!(%message, "pipeline panicked");
                    Report::failure(anyhow::anyhow!("Internal error: {message}"))
                }
            };

            match report.emit(stdout) {
                Ok(()) => report.exit_code(),
                Err(error) => {
                    tracing::error!(%error, "failed to write result record");
                    ExitCode::FAILURE
                }
            }
        })
    }

    fn execute<I, T>(&self, args: I) -> anyhow::Result<Report>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let request = cli::parse_request(args)?;
        let config = PipelineConfig::load(self.config_path.as_deref())?;
        let context = RunContext::detect(&config)?;
        tracing::info!(
            source = %request.source.display(),
            style = %request.style,
            destination = %request.destination.display(),
            device = %context.device,
            "restyling room"
        );

        let caption =
            caption::generate_caption(&request.source, &self.loader, &config.caption, &context)?;
        tracing::info!(%caption, "caption generated");

        let prompt = prompt::build_prompt(&caption, &request.style);

        let output_path = synthesis::generate_styled_image(
            &prompt,
            &request.source,
            &request.destination,
            &self.loader,
            &config.synthesis,
            &context,
        )?;
        tracing::info!(output = %output_path.display(), "styled image written");

        Ok(Report::success(caption, prompt, &output_path))
    }
}

/// Opens an image and converts it to 8-bit RGB. The decoder is chosen from the
/// file contents, so the extension does not have to match the format.
pub(crate) fn load_rgb(path: &Path) -> anyhow::Result<DynamicImage> {
    let decode = || -> anyhow::Result<DynamicImage> {
        Ok(image::ImageReader::open(path)?
            .with_guessed_format()?
            .decode()?)
    };
    let image = decode().with_context(|| format!("Failed to open image {}", path.display()))?;
    Ok(DynamicImage::ImageRgb8(image.to_rgb8()))
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
