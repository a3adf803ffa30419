//! Synthetic noise stimuli shown when the stimulus service is down.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::{GrayImage, ImageFormat, Luma};
use rand::Rng;
use std::io::Cursor;
use tracing::warn;

use super::http::as_data_url;

/// A `size × size` grayscale noise PNG as a data URL.
pub fn noise_image<R: Rng + ?Sized>(rng: &mut R, size: u32) -> String {
    let size = size.max(1);
    let image = GrayImage::from_fn(size, size, |_, _| Luma([rng.gen::<u8>()]));

    let mut png = Cursor::new(Vec::new());
    if let Err(e) = image.write_to(&mut png, ImageFormat::Png) {
        warn!(error = %e, "failed to encode noise image");
        return as_data_url(String::new());
    }
    as_data_url(STANDARD.encode(png.into_inner()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_noise_image_is_png_data_url() {
        let mut rng = StdRng::seed_from_u64(9);
        let url = noise_image(&mut rng, 8);
        let encoded = url.strip_prefix("data:image/png;base64,").unwrap();
        let bytes = STANDARD.decode(encoded).unwrap();
        assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
    }
}
