use anyhow::Context;
use candle_core::{DType, Device, IndexOp, Module, Tensor};
use candle_transformers::models::stable_diffusion::{
    self, StableDiffusionConfig, clip::ClipTextTransformer, schedulers::Scheduler,
    unet_2d::UNet2DConditionModel, vae::AutoEncoderKL,
};
use hf_hub::api::sync::Api;
use image::{DynamicImage, RgbImage, imageops::FilterType};
use tokenizers::Tokenizer;

pub const DEFAULT_MODEL_ID: &str = "stabilityai/stable-diffusion-2-1";
pub const DEFAULT_TOKENIZER_ID: &str = "openai/clip-vit-base-patch32";

const VAE_SCALE: f64 = 0.18215;

/// Sampling parameters for one image-to-image run.
#[derive(Debug, Clone, PartialEq)]
pub struct Img2ImgParams {
    pub steps: usize,
    pub guidance_scale: f64,
    /// 0.0 keeps the source image, 1.0 regenerates it entirely.
    pub strength: f64,
    pub seed: Option<u64>,
    pub width: usize,
    pub height: usize,
}

impl Default for Img2ImgParams {
    fn default() -> Self {
        Self {
            steps: 20,
            guidance_scale: 7.5,
            strength: 0.7,
            seed: None,
            width: 512,
            height: 512,
        }
    }
}

impl Img2ImgParams {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.steps == 0 {
            anyhow::bail!("Inference steps must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.strength) {
            anyhow::bail!("Strength must be between 0 and 1, got {}", self.strength);
        }
        if self.width == 0 || self.height == 0 || self.width % 8 != 0 || self.height % 8 != 0 {
            anyhow::bail!(
                "Image size must be a non-zero multiple of 8, got {}x{}",
                self.width,
                self.height
            );
        }
        Ok(())
    }

    /// Index of the first scheduler timestep that is actually denoised.
    pub fn start_step(&self) -> usize {
        let noised = (self.steps as f64 * self.strength) as usize;
        self.steps - noised.min(self.steps)
    }
}

pub struct StableDiffusion {
    config: StableDiffusionConfig,
    tokenizer: Tokenizer,
    pad_id: u32,
    text_model: ClipTextTransformer,
    vae: AutoEncoderKL,
    unet: UNet2DConditionModel,
    device: Device,
    dtype: DType,
}

impl StableDiffusion {
    pub fn new(
        api: &Api,
        model_id: &str,
        tokenizer_id: &str,
        device: &Device,
        dtype: DType,
    ) -> anyhow::Result<Self> {
        let repo = api.model(model_id.to_string());
        let weights = |file: &str| {
            repo.get(file)
                .with_context(|| format!("Failed to fetch {file} from {model_id}"))
        };
        let variant = if dtype == DType::F16 { ".fp16" } else { "" };
        let clip_weights = weights("text_encoder/model.safetensors")?;
        let vae_file = format!("vae/diffusion_pytorch_model{variant}.safetensors");
        let unet_file = format!("unet/diffusion_pytorch_model{variant}.safetensors");
        let vae_weights = weights(vae_file.as_str())?;
        let unet_weights = weights(unet_file.as_str())?;
        let tokenizer_path = api
            .model(tokenizer_id.to_string())
            .get("tokenizer.json")
            .with_context(|| format!("Failed to fetch tokenizer from {tokenizer_id}"))?;

        let config = StableDiffusionConfig::v2_1(None, None, None);

        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| anyhow::anyhow!("Failed to read tokenizer file: {e}"))?;
        let pad_token = config.clip.pad_with.as_deref().unwrap_or("<|endoftext|>");
        let pad_id = tokenizer
            .token_to_id(pad_token)
            .with_context(|| format!("Tokenizer has no pad token {pad_token:?}"))?;

        // the text encoder always runs in full precision
        tracing::debug!(model_id, "loading text encoder");
        let text_model = stable_diffusion::build_clip_transformer(
            &config.clip,
            clip_weights,
            device,
            DType::F32,
        )?;
        tracing::debug!(model_id, ?dtype, "loading vae");
        let vae = config.build_vae(vae_weights, device, dtype)?;
        tracing::debug!(model_id, ?dtype, "loading unet");
        let unet = config.build_unet(unet_weights, device, 4, false, dtype)?;

        Ok(Self {
            config,
            tokenizer,
            pad_id,
            text_model,
            vae,
            unet,
            device: device.clone(),
            dtype,
        })
    }

    /// Runs image-to-image generation conditioned on `prompt` and returns the
    /// decoded batch.
    pub fn inference(
        &self,
        prompt: &str,
        image: &DynamicImage,
        params: &Img2ImgParams,
    ) -> anyhow::Result<Vec<DynamicImage>> {
        params.validate()?;
        if let Some(seed) = params.seed {
            self.device.set_seed(seed)?;
        }

        let text_embeddings = {
            let cond = self.encode_prompt(prompt)?;
            let uncond = self.encode_prompt("")?;
            Tensor::cat(&[uncond, cond], 0)?.to_dtype(self.dtype)?
        };

        let init_image = image_to_tensor(image, params.width, params.height)?
            .to_device(&self.device)?
            .to_dtype(self.dtype)?;
        let init_latents = (self.vae.encode(&init_image)?.sample()? * VAE_SCALE)?;

        let mut scheduler = self.config.build_scheduler(params.steps)?;
        let timesteps = scheduler.timesteps().to_vec();
        let t_start = params.start_step();

        let mut latents = if t_start < timesteps.len() {
            let noise = init_latents.randn_like(0f64, 1f64)?;
            scheduler.add_noise(&init_latents, noise, timesteps[t_start])?
        } else {
            init_latents
        }
        .to_dtype(self.dtype)?;

        for (index, &timestep) in timesteps.iter().enumerate().skip(t_start) {
            let started = std::time::Instant::now();
            let latent_model_input = Tensor::cat(&[&latents, &latents], 0)?;
            let latent_model_input = scheduler.scale_model_input(latent_model_input, timestep)?;
            let noise_pred =
                self.unet
                    .forward(&latent_model_input, timestep as f64, &text_embeddings)?;

            let noise_pred = noise_pred.chunk(2, 0)?;
            let (noise_pred_uncond, noise_pred_text) = (&noise_pred[0], &noise_pred[1]);
            let noise_pred = (noise_pred_uncond
                + ((noise_pred_text - noise_pred_uncond)? * params.guidance_scale)?)?;

            latents = scheduler.step(&noise_pred, timestep, &latents)?;
            tracing::debug!(
                step = index + 1,
                total = timesteps.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "denoising step"
            );
        }

        let decoded = self.vae.decode(&(&latents / VAE_SCALE)?)?;
        tensor_to_images(&decoded)
    }

    fn encode_prompt(&self, prompt: &str) -> anyhow::Result<Tensor> {
        let tokens = self
            .tokenizer
            .encode(prompt, true)
            .map_err(|e| anyhow::anyhow!("Failed to tokenize prompt: {e}"))?
            .get_ids()
            .to_vec();
        let max_len = self.config.clip.max_position_embeddings;
        if tokens.len() > max_len {
            tracing::warn!(
                tokens = tokens.len(),
                max_len,
                "prompt exceeds the text encoder context and will be truncated"
            );
        }
        let tokens = pad_tokens(tokens, max_len, self.pad_id);
        let tokens = Tensor::new(tokens.as_slice(), &self.device)?.unsqueeze(0)?;
        Ok(self.text_model.forward(&tokens)?)
    }
}

/// Truncates or pads a token sequence to exactly `max_len` entries. A
/// truncated sequence keeps its final (end of text) token in the last slot.
fn pad_tokens(mut tokens: Vec<u32>, max_len: usize, pad_id: u32) -> Vec<u32> {
    if tokens.len() > max_len {
        let end = tokens[tokens.len() - 1];
        tokens.truncate(max_len.saturating_sub(1));
        tokens.push(end);
        tokens.truncate(max_len);
    }
    tokens.resize(max_len, pad_id);
    tokens
}

/// Converts an image into a `(1, 3, height, width)` f32 tensor in [-1, 1] on
/// the CPU.
pub fn image_to_tensor(
    image: &DynamicImage,
    width: usize,
    height: usize,
) -> anyhow::Result<Tensor> {
    let image = image
        .resize_exact(width as u32, height as u32, FilterType::CatmullRom)
        .to_rgb8();
    let tensor = Tensor::from_vec(image.into_raw(), (height, width, 3), &Device::Cpu)?
        .permute((2, 0, 1))?
        .to_dtype(DType::F32)?
        .affine(2. / 255., -1.)?
        .unsqueeze(0)?;
    Ok(tensor)
}

/// Maps a decoded `(batch, 3, height, width)` tensor in [-1, 1] back to RGB
/// images.
pub fn tensor_to_images(tensor: &Tensor) -> anyhow::Result<Vec<DynamicImage>> {
    let tensor = tensor.to_device(&Device::Cpu)?.to_dtype(DType::F32)?;
    let tensor = ((tensor / 2.)? + 0.5)?;
    let tensor = (tensor.clamp(0f32, 1f32)? * 255.)?.to_dtype(DType::U8)?;
    let (batch, channels, height, width) = tensor.dims4()?;
    if channels != 3 {
        anyhow::bail!("Expected 3 channels in decoded image, got {channels}");
    }

    (0..batch)
        .map(|i| {
            let pixels = tensor.i(i)?.permute((1, 2, 0))?.flatten_all()?.to_vec1::<u8>()?;
            let image = RgbImage::from_raw(width as u32, height as u32, pixels)
                .context("Decoded tensor does not match image dimensions")?;
            Ok(DynamicImage::ImageRgb8(image))
        })
        .collect()
}
