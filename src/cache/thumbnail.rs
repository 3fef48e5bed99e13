//! Thumbnail rendering
//!
//! Thumbnails fit inside a 200x200 box with the aspect ratio preserved and
//! are always encoded as PNG. Decoding runs on the blocking pool.

use std::io::Cursor;

use image::imageops::FilterType;
use image::ImageFormat;
use thiserror::Error;

/// Longest edge of a thumbnail, in pixels
pub const THUMBNAIL_EDGE: u32 = 200;

#[derive(Debug, Error)]
pub enum ThumbnailError {
    #[error("cannot decode image: {0}")]
    Image(#[from] image::ImageError),

    #[error("render task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Render a thumbnail off the async runtime
pub async fn render(source: Vec<u8>) -> Result<Vec<u8>, ThumbnailError> {
    Ok(tokio::task::spawn_blocking(move || render_blocking(&source)).await??)
}

fn render_blocking(source: &[u8]) -> Result<Vec<u8>, image::ImageError> {
    let thumb = image::load_from_memory(source)?.resize(
        THUMBNAIL_EDGE,
        THUMBNAIL_EDGE,
        FilterType::Triangle,
    );
    let mut out = Cursor::new(Vec::new());
    thumb.write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}
