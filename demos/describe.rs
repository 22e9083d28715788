use argh::FromArgs;
use kornia_describer::{
    BlipConfig, BlipLoader, DEFAULT_MAX_NEW_TOKENS, DEFAULT_MODEL_ID, DescriberConfig,
    DescriptionRequest, GenerationConfig, ModelHandle, SEARCH_QUERY_PROMPT,
    io::read_image_from_path,
};
use serde::Serialize;
use std::{path::PathBuf, time::Duration};

// defaults for the demo
const DEFAULT_IMAGE_PATH: &str = "images.jpeg";

#[derive(FromArgs)]
/// Describe the clothing item shown in an image.
struct DescribeArgs {
    /// the path to the image
    #[argh(option, short = 'i', default = "PathBuf::from(DEFAULT_IMAGE_PATH)")]
    image_path: PathBuf,

    /// the prompt to use
    #[argh(option, short = 'p', default = "SEARCH_QUERY_PROMPT.to_string()")]
    prompt: String,

    /// the maximum number of generated tokens
    #[argh(option, short = 'n', default = "DEFAULT_MAX_NEW_TOKENS")]
    max_new_tokens: usize,

    /// the hugging face model to load
    #[argh(option, default = "DEFAULT_MODEL_ID.to_string()")]
    model_id: String,

    /// the hub revision holding the model weights
    #[argh(option)]
    revision: Option<String>,

    /// the seed used when sampling
    #[argh(option)]
    seed: Option<u64>,

    /// the sampling temperature, decodes greedily when omitted
    #[argh(option)]
    temperature: Option<f64>,

    /// the nucleus sampling threshold
    #[argh(option)]
    top_p: Option<f64>,

    /// print the result as json
    #[argh(switch)]
    json: bool,
}

#[derive(Serialize)]
struct DescribeOutput {
    image_path: PathBuf,
    prompt: String,
    description: String,
    duration: Duration,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: DescribeArgs = argh::from_env();

    let defaults = BlipConfig::default();
    let blip_config = BlipConfig {
        revision: args.revision.unwrap_or(defaults.revision),
        generation: GenerationConfig {
            seed: args.seed.unwrap_or(defaults.generation.seed),
            temp: args.temperature,
            top_p: args.top_p,
        },
    };

    let mut handle = ModelHandle::new(
        BlipLoader::new(blip_config),
        DescriberConfig {
            model_id: args.model_id,
            max_new_tokens: args.max_new_tokens,
        },
    );

    let image = read_image_from_path(&args.image_path)?;
    let response = handle.run(DescriptionRequest {
        image,
        prompt: args.prompt.clone(),
        max_new_tokens: args.max_new_tokens,
    })?;

    if args.json {
        let output = DescribeOutput {
            image_path: args.image_path,
            prompt: args.prompt,
            description: response.description,
            duration: response.duration,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("{}", "-".repeat(20));
    println!("Image: {}", args.image_path.display());
    println!("Prompt: {}", args.prompt);
    println!("Generated Description: {}", response.description);
    println!("Duration: {:?}", response.duration);
    println!("{}", "-".repeat(20));

    Ok(())
}
