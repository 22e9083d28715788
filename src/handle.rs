use std::{path::Path, time::Instant};

use crate::{
    error::DescribeError,
    io::read_image_from_path,
    model::{DescriptionModel, DescriptionRequest, DescriptionResponse, ModelLoader},
    profile::{Accelerator, RuntimeProfile, detect_accelerators, select_runtime_profile},
};

/// Hugging Face model used when none is configured.
pub const DEFAULT_MODEL_ID: &str = "Salesforce/blip-image-captioning-large";

/// Default cap on generated tokens.
pub const DEFAULT_MAX_NEW_TOKENS: usize = 50;

/// Generic captioning prompt.
pub const DEFAULT_PROMPT: &str = "a high-quality photo of";

/// Prompt asking for an e-commerce search query for the pictured garment.
pub const SEARCH_QUERY_PROMPT: &str = "Question: Generate a concise e-commerce search query for the main clothing item shown. Include type, color, and pattern if applicable. Answer:";

/// Configuration for the [`ModelHandle`]
#[derive(Clone, Debug)]
pub struct DescriberConfig {
    pub model_id: String,
    pub max_new_tokens: usize,
}

impl Default for DescriberConfig {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_MODEL_ID.to_string(),
            max_new_tokens: DEFAULT_MAX_NEW_TOKENS,
        }
    }
}

/// Lifecycle of the model held by a [`ModelHandle`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelHandleState {
    /// Nothing loaded yet, or the last load attempt failed.
    Uninitialized,
    /// A load is in progress.
    Loading,
    /// The model is loaded and can serve requests.
    Ready,
}

impl ModelHandleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelHandleState::Uninitialized => "uninitialized",
            ModelHandleState::Loading => "loading",
            ModelHandleState::Ready => "ready",
        }
    }
}

struct LoadedModel<M> {
    model_id: String,
    profile: RuntimeProfile,
    model: M,
}

enum Slot<M> {
    Empty,
    Loading,
    Ready(LoadedModel<M>),
}

/// Lazily loaded, reusable handle to an image-to-text model.
///
/// The model is acquired on the first request and kept until the handle is
/// dropped. A failed load leaves the handle uninitialized so the next request
/// tries again.
pub struct ModelHandle<L: ModelLoader> {
    loader: L,
    config: DescriberConfig,
    accelerators: Option<Vec<Accelerator>>,
    slot: Slot<L::Model>,
    load_failures: usize,
}

impl<L: ModelLoader> ModelHandle<L> {
    /// Creates an unloaded handle. Accelerators are detected on first load.
    pub fn new(loader: L, config: DescriberConfig) -> Self {
        Self {
            loader,
            config,
            accelerators: None,
            slot: Slot::Empty,
            load_failures: 0,
        }
    }

    /// Creates an unloaded handle that selects its profile from the given
    /// accelerators instead of probing the machine.
    pub fn with_accelerators(
        loader: L,
        config: DescriberConfig,
        accelerators: Vec<Accelerator>,
    ) -> Self {
        Self {
            accelerators: Some(accelerators),
            ..Self::new(loader, config)
        }
    }

    pub fn config(&self) -> &DescriberConfig {
        &self.config
    }

    pub fn state(&self) -> ModelHandleState {
        match self.slot {
            Slot::Empty => ModelHandleState::Uninitialized,
            Slot::Loading => ModelHandleState::Loading,
            Slot::Ready(_) => ModelHandleState::Ready,
        }
    }

    /// Returns the profile the model was loaded with, if loaded.
    pub fn profile(&self) -> Option<RuntimeProfile> {
        match &self.slot {
            Slot::Ready(loaded) => Some(loaded.profile),
            _ => None,
        }
    }

    /// Number of load attempts that failed so far.
    pub fn load_failures(&self) -> usize {
        self.load_failures
    }

    /// Loads the model unless it is already loaded.
    ///
    /// On failure the handle goes back to [`ModelHandleState::Uninitialized`] and
    /// the loader error is returned as [`DescribeError::Load`].
    pub fn ensure_loaded(&mut self, model_id: &str) -> Result<(), DescribeError> {
        if let Slot::Ready(loaded) = &self.slot {
            if loaded.model_id != model_id {
                log::debug!(
                    "Model {} already loaded, ignoring request for {model_id}",
                    loaded.model_id
                );
            }
            return Ok(());
        }

        let accelerators = self.accelerators.get_or_insert_with(detect_accelerators);
        let profile = select_runtime_profile(accelerators);

        log::info!("Loading model: {model_id}...");
        self.slot = Slot::Loading;

        match self.loader.load(model_id, profile) {
            Ok(model) => {
                log::info!("Model loaded successfully onto device: {profile}");
                self.slot = Slot::Ready(LoadedModel {
                    model_id: model_id.to_string(),
                    profile,
                    model,
                });
                Ok(())
            }
            Err(e) => {
                log::error!("Error loading model: {e}");
                self.slot = Slot::Empty;
                self.load_failures += 1;
                Err(DescribeError::Load {
                    model_id: model_id.to_string(),
                    source: Box::new(e),
                })
            }
        }
    }

    fn loaded_model(&mut self, model_id: &str) -> Result<&mut L::Model, DescribeError> {
        self.ensure_loaded(model_id)?;
        match &mut self.slot {
            Slot::Ready(loaded) => Ok(&mut loaded.model),
            Slot::Empty | Slot::Loading => Err(DescribeError::Load {
                model_id: model_id.to_string(),
                source: "no model available after loading".into(),
            }),
        }
    }

    /// Describes an already decoded image.
    pub fn run(&mut self, request: DescriptionRequest) -> Result<DescriptionResponse, DescribeError> {
        let model_id = self.config.model_id.clone();
        let model = self.loaded_model(&model_id)?;

        let request_metadata = request.metadata();
        log::debug!(
            "Running inference on a {}x{} image",
            request_metadata.image_size.width,
            request_metadata.image_size.height
        );

        let start_time = Instant::now();
        let output = model
            .run(request)
            .map_err(|e| DescribeError::Generation(Box::new(e)))?;

        let duration = start_time.elapsed();
        log::debug!("Inference completed in {duration:?}");

        Ok(DescriptionResponse {
            start_time,
            duration,
            request_metadata,
            description: output.text.trim().to_string(),
        })
    }

    /// Generates a description for the image stored at `image_path`.
    ///
    /// # Arguments
    ///
    /// * `image_path` - Path to a JPEG or PNG file
    /// * `prompt` - Text guiding the description, passed to the model as is
    /// * `max_new_tokens` - Upper bound on the length of the description in tokens
    ///
    /// # Returns
    ///
    /// * `description` - The generated description, e.g. "red cotton t-shirt with logo"
    pub fn describe(
        &mut self,
        image_path: impl AsRef<Path>,
        prompt: &str,
        max_new_tokens: usize,
    ) -> Result<String, DescribeError> {
        let model_id = self.config.model_id.clone();
        self.ensure_loaded(&model_id)?;

        let image = read_image_from_path(image_path)?;

        let response = self.run(DescriptionRequest {
            image,
            prompt: prompt.to_string(),
            max_new_tokens,
        })?;

        Ok(response.description)
    }

    /// Same as [`ModelHandle::describe`] with the configured token cap.
    pub fn describe_default(
        &mut self,
        image_path: impl AsRef<Path>,
        prompt: &str,
    ) -> Result<String, DescribeError> {
        let max_new_tokens = self.config.max_new_tokens;
        self.describe(image_path, prompt, max_new_tokens)
    }
}
