use crate::error::ImageReadError;
use kornia_image::{Image, allocator::CpuAllocator};
use kornia_imgproc::color::{rgb_from_gray, rgb_from_rgba};
use kornia_io::{jpeg, png};
use std::path::Path;

/// Reads a JPEG or PNG file into an rgb8 image.
///
/// The decoder is chosen from the file extension. Grayscale and RGBA PNG files are
/// expanded or flattened to three channels.
///
/// # Arguments
///
/// * `path` - The path to the image file.
///
/// # Returns
///
/// An rgb8 image with shape [H, W, 3].
pub fn read_image_from_path(
    path: impl AsRef<Path>,
) -> Result<Image<u8, 3, CpuAllocator>, ImageReadError> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(ImageReadError::NotFound(path.to_path_buf()));
    }

    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .ok_or_else(|| ImageReadError::UnsupportedFormat(path.display().to_string()))?;

    match extension.as_str() {
        "jpg" | "jpeg" => jpeg::read_image_jpeg_rgb8(path).map_err(|source| {
            ImageReadError::Decode {
                path: path.to_path_buf(),
                source,
            }
        }),
        "png" => read_png_as_rgb8(path),
        _ => Err(ImageReadError::UnsupportedFormat(extension)),
    }
}

fn read_png_as_rgb8(path: &Path) -> Result<Image<u8, 3, CpuAllocator>, ImageReadError> {
    let rgb_err = match png::read_image_png_rgb8(path) {
        Ok(image) => return Ok(image),
        Err(e) => e,
    };

    if let Ok(rgba) = png::read_image_png_rgba8(path) {
        log::debug!("Dropping alpha channel of {}", path.display());
        let mut rgb = Image::from_size_val(rgba.size(), 0, CpuAllocator)?;
        rgb_from_rgba(&rgba, &mut rgb, None)?;
        return Ok(rgb);
    }

    if let Ok(gray) = png::read_image_png_mono8(path) {
        log::debug!("Expanding grayscale image {}", path.display());
        let mut rgb = Image::from_size_val(gray.size(), 0, CpuAllocator)?;
        rgb_from_gray(&gray, &mut rgb)?;
        return Ok(rgb);
    }

    Err(ImageReadError::Decode {
        path: path.to_path_buf(),
        source: rgb_err,
    })
}
