use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use sd_img2img::Img2ImgParams;
use serde::Deserialize;

use crate::device::DevicePreference;

/// Environment variable naming an optional TOML config file.
pub const CONFIG_ENV: &str = "ROOM_STYLER_CONFIG";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub device: DevicePreference,
    /// Overrides the Hugging Face cache location (`HF_HOME` otherwise).
    pub cache_dir: Option<PathBuf>,
    pub caption: CaptionConfig,
    pub synthesis: SynthesisConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CaptionConfig {
    pub model_id: String,
    pub max_new_tokens: usize,
}

impl Default for CaptionConfig {
    fn default() -> Self {
        Self {
            model_id: vit_gpt2::DEFAULT_MODEL_ID.to_string(),
            max_new_tokens: vit_gpt2::DEFAULT_MAX_NEW_TOKENS,
        }
    }
}

/// Image-to-image settings. The defaults are the tuned values the tool has
/// always shipped with: 20 steps, guidance 7.5, strength 0.7 at 512x512.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SynthesisConfig {
    pub model_id: String,
    pub tokenizer_id: String,
    pub steps: usize,
    pub guidance_scale: f64,
    pub strength: f64,
    /// Side of the square the source image is resized to.
    pub size: u32,
    pub seed: Option<u64>,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        let params = Img2ImgParams::default();
        Self {
            model_id: sd_img2img::DEFAULT_MODEL_ID.to_string(),
            tokenizer_id: sd_img2img::DEFAULT_TOKENIZER_ID.to_string(),
            steps: params.steps,
            guidance_scale: params.guidance_scale,
            strength: params.strength,
            size: params.width as u32,
            seed: params.seed,
        }
    }
}

impl SynthesisConfig {
    pub fn params(&self) -> Img2ImgParams {
        Img2ImgParams {
            steps: self.steps,
            guidance_scale: self.guidance_scale,
            strength: self.strength,
            seed: self.seed,
            width: self.size as usize,
            height: self.size as usize,
        }
    }
}

impl PipelineConfig {
    /// Reads the file at `path` when given, otherwise returns the defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file at {}", path.display()))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.caption.max_new_tokens == 0 {
            anyhow::bail!("caption.max_new_tokens must be at least 1");
        }
        self.synthesis
            .params()
            .validate()
            .context("Invalid synthesis configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_match_shipped_values() {
        let config = PipelineConfig::load(None).unwrap();

        assert_eq!(config.device, DevicePreference::Auto);
        assert_eq!(config.cache_dir, None);
        assert_eq!(config.caption.model_id, "Xenova/vit-gpt2-image-captioning");
        assert_eq!(config.synthesis.model_id, "stabilityai/stable-diffusion-2-1");

        let params = config.synthesis.params();
        assert_eq!(params.steps, 20);
        assert_eq!(params.guidance_scale, 7.5);
        assert_eq!(params.strength, 0.7);
        assert_eq!((params.width, params.height), (512, 512));
        assert_eq!(params.seed, None);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let file = write_config(
            r#"
device = "cpu"

[synthesis]
steps = 30
seed = 7
"#,
        );
        let config = PipelineConfig::load(Some(file.path())).unwrap();

        assert_eq!(config.device, DevicePreference::Cpu);
        assert_eq!(config.synthesis.steps, 30);
        assert_eq!(config.synthesis.seed, Some(7));
        assert_eq!(config.synthesis.strength, 0.7);
        assert_eq!(config.caption, CaptionConfig::default());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let file = write_config("[synthesis]\nnum_steps = 30\n");
        let error = PipelineConfig::load(Some(file.path())).unwrap_err();

        assert!(format!("{error:#}").contains("Failed to parse config file"));
    }

    #[test]
    fn out_of_range_strength_is_rejected() {
        let file = write_config("[synthesis]\nstrength = 1.5\n");
        let error = PipelineConfig::load(Some(file.path())).unwrap_err();

        assert!(format!("{error:#}").contains("Strength must be between 0 and 1"));
    }

    #[test]
    fn missing_file_is_an_error() {
        let error = PipelineConfig::load(Some(Path::new("/no/such/room-styler.toml"))).unwrap_err();
        assert!(error.to_string().contains("/no/such/room-styler.toml"));
    }
}
