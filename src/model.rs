use kornia_image::{Image, ImageSize, allocator::CpuAllocator};
use std::time::{Duration, Instant};

use crate::profile::RuntimeProfile;

/// A single image description request handed to a model.
pub struct DescriptionRequest {
    /// The rgb8 image to describe with shape [H, W, 3].
    pub image: Image<u8, 3, CpuAllocator>,
    /// Text that conditions the generated description. May be empty.
    pub prompt: String,
    /// Hard cap on the number of generated tokens.
    pub max_new_tokens: usize,
}

impl DescriptionRequest {
    /// Returns the lightweight parts of the request, without the image buffer.
    pub fn metadata(&self) -> DescriptionMetadata {
        DescriptionMetadata {
            prompt: self.prompt.clone(),
            image_size: self.image.size(),
            max_new_tokens: self.max_new_tokens,
        }
    }
}

/// Lightweight copy of a [`DescriptionRequest`] kept for telemetry.
#[derive(Clone, Debug)]
pub struct DescriptionMetadata {
    pub prompt: String,
    pub image_size: ImageSize,
    pub max_new_tokens: usize,
}

/// Raw model output, before any cleanup by the handle.
pub struct DescriptionOutput {
    pub text: String,
}

/// Response returned by the handle, with the model output and telemetry data.
pub struct DescriptionResponse {
    /// Timestamp when the inference started.
    pub start_time: Instant,
    /// Total time taken for the inference.
    pub duration: Duration,
    /// Metadata of the request that produced this response.
    pub request_metadata: DescriptionMetadata,
    /// The generated description with surrounding whitespace removed.
    pub description: String,
}

/// A loaded image-to-text model.
///
/// Implementations own their preprocessor, tokenizer and weights and run the
/// whole generation for one request.
pub trait DescriptionModel {
    /// The error type that can be returned during inference.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Generates a description for the given request.
    fn run(&mut self, request: DescriptionRequest) -> Result<DescriptionOutput, Self::Error>;
}

/// Acquires a [`DescriptionModel`] bound to a runtime profile.
pub trait ModelLoader {
    /// The model produced by this loader.
    type Model: DescriptionModel;
    /// The error type that can be returned while loading.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Loads the preprocessor and model identified by `model_id`.
    fn load(&mut self, model_id: &str, profile: RuntimeProfile) -> Result<Self::Model, Self::Error>;
}
