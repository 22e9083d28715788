use candle_core::{DType, Device, Module, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::{
    generation::LogitsProcessor,
    models::blip::{BlipForConditionalGeneration, Config},
};
use hf_hub::{Repo, RepoType, api::sync::Api};
use kornia_image::{Image, allocator::CpuAllocator};
use kornia_imgproc::{interpolation::InterpolationMode, resize::resize_fast_rgb as resize_fast};
use tokenizers::Tokenizer;

use crate::{
    model::{DescriptionModel, DescriptionOutput, DescriptionRequest, ModelLoader},
    profile::{Precision, RuntimeProfile},
};

/// Side of the square image fed to the vision tower.
const IMAGE_SIZE: usize = 384;

/// Token that starts the text decoder sequence.
const BOS_TOKEN_ID: u32 = 30522;

/// `[SEP]`, emitted by the decoder at the end of a caption.
const SEP_TOKEN_ID: u32 = 102;

const IMAGE_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];
const IMAGE_STD: [f32; 3] = [0.268_629_54, 0.261_302_6, 0.275_777_1];

#[derive(thiserror::Error, Debug)]
pub enum BlipError {
    #[error(transparent)]
    FailedToLoadModel(#[from] hf_hub::api::sync::ApiError),

    #[error(transparent)]
    CandleError(#[from] candle_core::Error),

    #[error(transparent)]
    ImageError(#[from] kornia_image::ImageError),

    #[error(transparent)]
    TokenizerError(#[from] tokenizers::Error),

    #[error(transparent)]
    IoError(#[from] std::io::Error),
}

/// Sampling parameters for the text decoder.
#[derive(Clone, Debug)]
pub struct GenerationConfig {
    pub seed: u64,
    /// Sampling temperature, `None` decodes greedily.
    pub temp: Option<f64>,
    pub top_p: Option<f64>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            seed: 299792458,
            temp: None,
            top_p: None,
        }
    }
}

/// Configuration for the [`BlipLoader`]
#[derive(Clone, Debug)]
pub struct BlipConfig {
    /// Hub revision holding the safetensors weights.
    pub revision: String,
    pub generation: GenerationConfig,
}

impl Default for BlipConfig {
    fn default() -> Self {
        Self {
            revision: "refs/pr/18".to_string(),
            generation: GenerationConfig::default(),
        }
    }
}

/// Loads BLIP captioning models from the Hugging Face hub.
#[derive(Default)]
pub struct BlipLoader {
    config: BlipConfig,
}

impl BlipLoader {
    pub fn new(config: BlipConfig) -> Self {
        Self { config }
    }
}

impl ModelLoader for BlipLoader {
    type Model = BlipCaptioner;
    type Error = BlipError;

    fn load(&mut self, model_id: &str, profile: RuntimeProfile) -> Result<BlipCaptioner, BlipError> {
        let device = profile.device()?;
        let dtype = compute_dtype(profile);

        let api = Api::new()?;
        let repo = api.repo(Repo::with_revision(
            model_id.to_string(),
            RepoType::Model,
            self.config.revision.clone(),
        ));

        let tokenizer_filename = repo.get("tokenizer.json")?;
        let model_filename = repo.get("model.safetensors")?;
        log::debug!("Weights resolved to {}", model_filename.display());

        let tokenizer = Tokenizer::from_file(tokenizer_filename)?;

        let config = Config::image_captioning_large();
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[model_filename], dtype, &device)? };
        let model = BlipForConditionalGeneration::new(&config, vb)?;

        let generation = &self.config.generation;
        let logits_processor =
            LogitsProcessor::new(generation.seed, generation.temp, generation.top_p);

        Ok(BlipCaptioner {
            model,
            tokenizer,
            logits_processor,
            img_buf: Image::from_size_val([IMAGE_SIZE, IMAGE_SIZE].into(), 0, CpuAllocator)?,
            device,
            dtype,
        })
    }
}

/// Returns the dtype the BLIP weights are loaded with for a profile.
///
/// The text decoder adds an f32 causal mask to its attention scores, so half
/// precision profiles are computed in f32 on their device.
fn compute_dtype(profile: RuntimeProfile) -> DType {
    match profile.precision {
        Precision::F32 => DType::F32,
        Precision::F16 => {
            log::warn!("BLIP text decoder does not support float16, loading float32 on {profile}");
            DType::F32
        }
    }
}

/// Converts a 384x384 rgb8 image into normalized pixel values with shape [1, 3, 384, 384].
fn pixel_values(
    image: &Image<u8, 3, CpuAllocator>,
    device: &Device,
    dtype: DType,
) -> candle_core::Result<Tensor> {
    let mean = Tensor::new(&IMAGE_MEAN, device)?.reshape((3, 1, 1))?;
    let std = Tensor::new(&IMAGE_STD, device)?.reshape((3, 1, 1))?;

    Tensor::from_raw_buffer(
        image.as_slice(),
        DType::U8,
        &[image.rows(), image.cols(), 3],
        device,
    )?
    .permute((2, 0, 1))?
    .to_dtype(DType::F32)?
    .affine(1. / 255., 0.)?
    .broadcast_sub(&mean)?
    .broadcast_div(&std)?
    .to_dtype(dtype)?
    .unsqueeze(0)
}

/// Builds the decoder input: the BOS token followed by the prompt tokens.
fn decoder_prompt(prompt_ids: &[u32]) -> Vec<u32> {
    let mut token_ids = Vec::with_capacity(prompt_ids.len() + 1);
    token_ids.push(BOS_TOKEN_ID);
    token_ids.extend_from_slice(prompt_ids);
    token_ids
}

/// Extends `token_ids` with at most `max_new_tokens` tokens produced by `next_token`.
///
/// `next_token` receives the tokens not yet seen by the decoder: the whole prompt
/// on the first step, then the last generated token. Generation stops early on
/// `[SEP]`, which is not kept.
fn generate<E>(
    mut token_ids: Vec<u32>,
    max_new_tokens: usize,
    mut next_token: impl FnMut(&[u32]) -> Result<u32, E>,
) -> Result<Vec<u32>, E> {
    for index in 0..max_new_tokens {
        let context_size = if index > 0 { 1 } else { token_ids.len() };
        let start_pos = token_ids.len().saturating_sub(context_size);

        let token = next_token(&token_ids[start_pos..])?;
        if token == SEP_TOKEN_ID {
            break;
        }
        token_ids.push(token);
    }
    Ok(token_ids)
}

/// Returns the generated part of a decoder sequence.
fn generated_tokens(token_ids: &[u32], prompt_len: usize) -> &[u32] {
    &token_ids[prompt_len.min(token_ids.len())..]
}

/// A BLIP model ready to caption images.
pub struct BlipCaptioner {
    model: BlipForConditionalGeneration,
    tokenizer: Tokenizer,
    logits_processor: LogitsProcessor,
    img_buf: Image<u8, 3, CpuAllocator>,
    device: Device,
    dtype: DType,
}

impl DescriptionModel for BlipCaptioner {
    type Error = BlipError;

    fn run(&mut self, request: DescriptionRequest) -> Result<DescriptionOutput, BlipError> {
        // a previous run may have bailed out before clearing the cache
        self.model.reset_kv_cache();

        resize_fast(&request.image, &mut self.img_buf, InterpolationMode::Bilinear)?;
        let pixel_values = pixel_values(&self.img_buf, &self.device, self.dtype)?;
        let image_embeds = self.model.vision_model().forward(&pixel_values)?;

        let prompt = self.tokenizer.encode(request.prompt.as_str(), false)?;
        let prompt_ids = decoder_prompt(prompt.get_ids());
        let prompt_len = prompt_ids.len();

        let model = &mut self.model;
        let logits_processor = &mut self.logits_processor;
        let device = &self.device;
        let next_token = |context: &[u32]| -> Result<u32, BlipError> {
            let input_ids = Tensor::new(context, device)?.unsqueeze(0)?;
            let logits = model
                .text_decoder()
                .forward(&input_ids, &image_embeds)?
                .squeeze(0)?;
            let logits = logits.get(logits.dim(0)? - 1)?.to_dtype(DType::F32)?;
            Ok(logits_processor.sample(&logits)?)
        };
        let token_ids = generate(prompt_ids, request.max_new_tokens, next_token)?;
        self.model.reset_kv_cache();

        let generated = generated_tokens(&token_ids, prompt_len);
        log::debug!("Generated {} tokens", generated.len());

        let text = self.tokenizer.decode(generated, true)?;
        Ok(DescriptionOutput { text })
    }
}
