use clap::Parser;
use hf_hub::api::sync::Api;
use vit_gpt2::{DEFAULT_MAX_NEW_TOKENS, DEFAULT_MODEL_ID, ImageCaptioner};

#[derive(Parser, Debug)]
struct Args {
    #[arg(long)]
    image: String,

    #[arg(long, default_value = DEFAULT_MODEL_ID)]
    model: String,

    #[arg(long, default_value_t = DEFAULT_MAX_NEW_TOKENS)]
    max_new_tokens: usize,

    #[arg(long)]
    cuda: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let image =
        image::open(&args.image).map_err(|e| anyhow::anyhow!("Failed to open image: {e}"))?;

    let api = Api::new()?;
    let mut captioner = ImageCaptioner::new(&api, &args.model, args.cuda)?
        .with_max_new_tokens(args.max_new_tokens);

    for caption in captioner.inference(&image)? {
        println!("Generated caption: {caption}");
    }

    Ok(())
}
