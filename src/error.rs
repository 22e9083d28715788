use std::path::PathBuf;

/// Boxed error coming from a model backend.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised while reading an input image.
#[derive(thiserror::Error, Debug)]
pub enum ImageReadError {
    #[error("Image file not found at {}", .0.display())]
    NotFound(PathBuf),

    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to decode image {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: kornia_io::error::IoError,
    },

    #[error(transparent)]
    Image(#[from] kornia_image::ImageError),
}

/// Outcome of a failed description request.
#[derive(thiserror::Error, Debug)]
pub enum DescribeError {
    #[error("Failed to load model {model_id}: {source}")]
    Load {
        model_id: String,
        #[source]
        source: BoxError,
    },

    #[error(transparent)]
    Image(#[from] ImageReadError),

    #[error("An error occurred during description generation: {0}")]
    Generation(#[source] BoxError),
}

impl DescribeError {
    pub fn is_load(&self) -> bool {
        matches!(self, DescribeError::Load { .. })
    }

    pub fn is_image(&self) -> bool {
        matches!(self, DescribeError::Image(_))
    }

    pub fn is_generation(&self) -> bool {
        matches!(self, DescribeError::Generation(_))
    }
}
