use std::path::PathBuf;

use hf_hub::api::sync::{Api, ApiBuilder};
use image::DynamicImage;
use sd_img2img::{Img2ImgParams, StableDiffusion};
use vit_gpt2::ImageCaptioner;

use crate::config::{CaptionConfig, PipelineConfig, SynthesisConfig};
use crate::device::DeviceConfig;

/// Produces ranked caption candidates for an RGB image.
pub trait CaptionModel {
    fn captions(&mut self, image: &DynamicImage) -> anyhow::Result<Vec<String>>;
}

/// Produces a batch of images conditioned on a prompt and a source image.
pub trait StyleModel {
    fn restyle(
        &mut self,
        prompt: &str,
        image: &DynamicImage,
        params: &Img2ImgParams,
    ) -> anyhow::Result<Vec<DynamicImage>>;
}

/// How the stages obtain their models. Loading happens inside each stage so a
/// run that fails earlier never pays for it.
pub trait ModelLoader {
    fn load_captioner(
        &self,
        config: &CaptionConfig,
        context: &RunContext,
    ) -> anyhow::Result<Box<dyn CaptionModel>>;

    fn load_styler(
        &self,
        config: &SynthesisConfig,
        context: &RunContext,
    ) -> anyhow::Result<Box<dyn StyleModel>>;
}

/// Per-run facts shared by both stages.
#[derive(Debug, Clone, PartialEq)]
pub struct RunContext {
    pub device: DeviceConfig,
    pub cache_dir: Option<PathBuf>,
}

impl RunContext {
    pub fn detect(config: &PipelineConfig) -> anyhow::Result<Self> {
        Ok(Self {
            device: DeviceConfig::detect(config.device)?,
            cache_dir: config.cache_dir.clone(),
        })
    }

    pub fn hub_api(&self) -> anyhow::Result<Api> {
        let mut builder = ApiBuilder::new();
        if let Some(cache_dir) = &self.cache_dir {
            builder = builder.with_cache_dir(cache_dir.clone());
        }
        Ok(builder.build()?)
    }
}

/// Loads the pretrained models from the Hugging Face hub, downloading them on
/// first use.
#[derive(Debug, Default, Clone, Copy)]
pub struct PretrainedModels;

impl ModelLoader for PretrainedModels {
    fn load_captioner(
        &self,
        config: &CaptionConfig,
        context: &RunContext,
    ) -> anyhow::Result<Box<dyn CaptionModel>> {
        let api = context.hub_api()?;
        let captioner = ImageCaptioner::new(&api, &config.model_id, context.device.is_cuda())?
            .with_max_new_tokens(config.max_new_tokens);
        Ok(Box::new(captioner))
    }

    fn load_styler(
        &self,
        config: &SynthesisConfig,
        context: &RunContext,
    ) -> anyhow::Result<Box<dyn StyleModel>> {
        let api = context.hub_api()?;
        let device = context.device.device()?;
        let model = StableDiffusion::new(
            &api,
            &config.model_id,
            &config.tokenizer_id,
            &device,
            context.device.dtype(),
        )?;
        Ok(Box::new(model))
    }
}

impl CaptionModel for ImageCaptioner {
    fn captions(&mut self, image: &DynamicImage) -> anyhow::Result<Vec<String>> {
        self.inference(image)
    }
}

impl StyleModel for StableDiffusion {
    fn restyle(
        &mut self,
        prompt: &str,
        image: &DynamicImage,
        params: &Img2ImgParams,
    ) -> anyhow::Result<Vec<DynamicImage>> {
        self.inference(prompt, image, params)
    }
}
