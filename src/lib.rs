//! # Kornia Describer
//!
//! Short textual descriptions of clothing items from photographs, meant to be used
//! as e-commerce search queries.
//!
//! The crate wraps a pretrained image-to-text model behind a [`ModelHandle`] that
//! loads the model on first use, keeps it around for later requests and picks the
//! device and numeric precision from the available hardware.
//!
//! ```no_run
//! use kornia_describer::{BlipLoader, DescriberConfig, ModelHandle, DEFAULT_PROMPT};
//!
//! let mut handle = ModelHandle::new(BlipLoader::default(), DescriberConfig::default());
//! let description = handle.describe("images.jpeg", DEFAULT_PROMPT, 50)?;
//! println!("{description}");
//! # Ok::<(), kornia_describer::DescribeError>(())
//! ```

/// BLIP captioning backend running on candle.
pub mod blip;

/// Error types returned by the describer.
pub mod error;

/// Lazily loaded model handle.
pub mod handle;

/// Image file decoding.
pub mod io;

/// Traits connecting the handle to a model backend.
pub mod model;

/// Device and precision selection.
pub mod profile;

pub use blip::{BlipCaptioner, BlipConfig, BlipError, BlipLoader, GenerationConfig};
pub use error::{DescribeError, ImageReadError};
pub use handle::{
    DEFAULT_MAX_NEW_TOKENS, DEFAULT_MODEL_ID, DEFAULT_PROMPT, DescriberConfig, ModelHandle,
    ModelHandleState, SEARCH_QUERY_PROMPT,
};
pub use model::{
    DescriptionMetadata, DescriptionModel, DescriptionOutput, DescriptionRequest,
    DescriptionResponse, ModelLoader,
};
pub use profile::{
    Accelerator, Device, Precision, RuntimeProfile, detect_accelerators, select_runtime_profile,
};
