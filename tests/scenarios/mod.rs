//! Scenario tests for illumd
//!
//! - Generation: event order, variants, request validation, batch reports
//! - Failures: upstream errors, cache write failures, deadlines, disconnects
//! - Retrieval: serving cached images and thumbnails, rejecting bad keys
//! - Maintenance: cache listing, metadata, and cleanup endpoints

pub mod maintenance;
pub mod retrieval;

/// Distinct PNG-looking payloads for scripted images
pub fn fake_png(tag: &str) -> Vec<u8> {
    let mut data = b"\x89PNG\r\n\x1a\n".to_vec();
    data.extend_from_slice(tag.as_bytes());
    data
}

/// A decodable PNG of the given dimensions
pub fn real_png(width: u32, height: u32) -> Vec<u8> {
    let mut out = std::io::Cursor::new(Vec::new());
    image::RgbImage::from_pixel(width, height, image::Rgb([220, 40, 40]))
        .write_to(&mut out, image::ImageFormat::Png)
        .expect("encode test png");
    out.into_inner()
}
