use crate::error::{Error, Result};
use image::DynamicImage;
use std::path::Path;
use tracing::{debug, info, instrument};

pub const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "tiff", "tif"];

/// Re-encodes `src` into `dest` without an alpha channel. The output format
/// follows `dest`'s extension.
#[instrument(skip_all, fields(src = %src.display()))]
pub fn strip_alpha(src: &Path, dest: &Path) -> Result<()> {
    let img = image::open(src)
        .map_err(|err| Error::input(format!("cannot decode image {}: {err}", src.display())))?;
    debug!(
        width = img.width(),
        height = img.height(),
        has_alpha = img.color().has_alpha(),
        "image loaded"
    );

    let flattened = if img.color().has_alpha() {
        DynamicImage::ImageRgb8(img.to_rgb8())
    } else {
        img
    };
    flattened
        .save(dest)
        .map_err(|err| Error::Internal(format!("failed to write {}: {err}", dest.display())))?;
    info!(dest = %dest.display(), "image normalized");
    Ok(())
}
