use std::thread;

use anyhow::Context;
use hf_hub::api::sync::Api;
use image::{DynamicImage, imageops::FilterType};
use ndarray::{Array, Array4, s};
use ort::{
    execution_providers::CUDAExecutionProvider,
    inputs,
    session::{
        Session,
        builder::{GraphOptimizationLevel, SessionBuilder},
    },
    value::Tensor,
};
use tokenizers::Tokenizer;

pub const DEFAULT_MODEL_ID: &str = "Xenova/vit-gpt2-image-captioning";
pub const DEFAULT_MAX_NEW_TOKENS: usize = 20;

const IMAGE_SIZE: u32 = 224;
// GPT-2 uses `<|endoftext|>` both to start decoding and to end it.
const END_OF_TEXT: i64 = 50256;

pub struct ImageCaptioner {
    encoder_model: Session,
    decoder_model: Session,
    tokenizer: Tokenizer,
    max_new_tokens: usize,
}

impl ImageCaptioner {
    pub fn new(api: &Api, model_id: &str, use_cuda: bool) -> anyhow::Result<Self> {
        let repo = api.model(model_id.to_string());
        let encoder_model_path = repo
            .get("onnx/encoder_model.onnx")
            .with_context(|| format!("Failed to fetch encoder for {model_id}"))?;
        let decoder_model_path = repo
            .get("onnx/decoder_model.onnx")
            .with_context(|| format!("Failed to fetch decoder for {model_id}"))?;
        let tokenizer_path = repo
            .get("tokenizer.json")
            .with_context(|| format!("Failed to fetch tokenizer for {model_id}"))?;

        let encoder_model = build_session(use_cuda)?.commit_from_file(encoder_model_path)?;
        let decoder_model = build_session(use_cuda)?.commit_from_file(decoder_model_path)?;

        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| anyhow::anyhow!("Failed to read tokenizer file: {e}"))?;

        Ok(Self {
            encoder_model,
            decoder_model,
            tokenizer,
            max_new_tokens: DEFAULT_MAX_NEW_TOKENS,
        })
    }

    pub fn with_max_new_tokens(mut self, max_new_tokens: usize) -> Self {
        self.max_new_tokens = max_new_tokens;
        self
    }

    /// Describes the image in one sentence.
    ///
    /// Greedy decoding yields a single candidate, but the result is kept as a
    /// list so callers choose how to pick among candidates.
    pub fn inference(&mut self, image: &DynamicImage) -> anyhow::Result<Vec<String>> {
        let pixel_values = Tensor::from_array(preprocess(image))?;

        // save encoder hidden state
        let encoder_hidden_states = {
            let outputs = self
                .encoder_model
                .run(inputs!["pixel_values" => pixel_values])?;
            let hidden = outputs["last_hidden_state"].try_extract_array::<f32>()?;
            Tensor::from_array(hidden.to_owned())?
        };

        let mut token_ids: Vec<i64> = vec![END_OF_TEXT];

        for _ in 0..self.max_new_tokens {
            let input_ids = Array::from_shape_vec((1, token_ids.len()), token_ids.clone())?;
            let outputs = self.decoder_model.run(inputs![
                "input_ids" => Tensor::from_array(input_ids)?,
                "encoder_hidden_states" => encoder_hidden_states.view(),
            ])?;

            let logits = outputs["logits"].try_extract_array::<f32>()?;
            let last_token_logits = logits.slice(s![0, -1, ..]);
            let token_id = argmax(last_token_logits.iter())
                .context("Decoder returned empty logits")? as i64;

            if token_id == END_OF_TEXT {
                break;
            }
            token_ids.push(token_id);
        }

        tracing::debug!(tokens = token_ids.len() - 1, "caption decoded");

        let ids = token_ids[1..]
            .iter()
            .map(|&id| id as u32)
            .collect::<Vec<_>>();
        let text = self
            .tokenizer
            .decode(&ids, true)
            .map_err(|e| anyhow::anyhow!("Failed to decode caption tokens: {e}"))?;

        Ok(vec![text.trim().to_string()])
    }
}

fn build_session(use_cuda: bool) -> anyhow::Result<SessionBuilder> {
    let mut builder = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(thread::available_parallelism()?.get())?;
    if use_cuda {
        // ORT falls back to the CPU provider when CUDA cannot be registered
        builder = builder.with_execution_providers([CUDAExecutionProvider::default().build()])?;
    }
    Ok(builder)
}

/// Converts any color layout to RGB, resizes to the ViT input size and
/// normalizes from [0, 255] to [-1, 1].
pub fn preprocess(image: &DynamicImage) -> Array4<f32> {
    let image = image.to_rgb8();
    let image = image::imageops::resize(&image, IMAGE_SIZE, IMAGE_SIZE, FilterType::Triangle);

    let size = IMAGE_SIZE as usize;
    let mut tensor = Array4::zeros((1, 3, size, size));
    for (x, y, pixel) in image.enumerate_pixels() {
        let x = x as usize;
        let y = y as usize;

        for c in 0..3 {
            tensor[[0, c, y, x]] = (pixel[c] as f32 / 255.0 - 0.5) / 0.5;
        }
    }
    tensor
}

fn argmax<'a>(values: impl Iterator<Item = &'a f32>) -> Option<usize> {
    values
        .enumerate()
        .max_by(|(_, a), (_, b)| a.total_cmp(b))
        .map(|(index, _)| index)
}
