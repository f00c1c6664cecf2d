use candle_core::{DType, Device};
use clap::Parser;
use hf_hub::api::sync::Api;
use sd_img2img::{DEFAULT_MODEL_ID, DEFAULT_TOKENIZER_ID, Img2ImgParams, StableDiffusion};

#[derive(Parser)]
struct Cli {
    #[arg(long, default_value = "test.png")]
    image: String,

    #[arg(long)]
    prompt: String,

    #[arg(long, default_value = "output.png")]
    output: String,

    #[arg(long, default_value = DEFAULT_MODEL_ID)]
    model: String,

    #[arg(long, default_value_t = 20)]
    steps: usize,

    #[arg(long, default_value_t = 7.5)]
    guidance_scale: f64,

    #[arg(long, default_value_t = 0.7)]
    strength: f64,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long)]
    cpu: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    let device = if args.cpu {
        Device::Cpu
    } else {
        Device::cuda_if_available(0)?
    };
    let dtype = if device.is_cuda() { DType::F16 } else { DType::F32 };

    let api = Api::new()?;
    let model = StableDiffusion::new(&api, &args.model, DEFAULT_TOKENIZER_ID, &device, dtype)?;

    let image =
        image::open(&args.image).map_err(|e| anyhow::anyhow!("Failed to open image: {e}"))?;
    let params = Img2ImgParams {
        steps: args.steps,
        guidance_scale: args.guidance_scale,
        strength: args.strength,
        seed: args.seed,
        ..Default::default()
    };

    let images = model.inference(&args.prompt, &image, &params)?;
    let output = images
        .first()
        .ok_or_else(|| anyhow::anyhow!("Model returned no images"))?;
    output
        .save(&args.output)
        .map_err(|e| anyhow::anyhow!("Failed to save output image: {e}"))?;

    println!("Successfully processed and saved image to {}", args.output);

    Ok(())
}
