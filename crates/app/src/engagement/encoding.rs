//! JPEG encoding of annotated frames.

use actix_web::web::Bytes;
use anyhow::{Result, anyhow};
use image::{RgbImage, codecs::jpeg::JpegEncoder};

/// Encode `image` as a baseline JPEG. `quality` is clamped to 1..=100.
pub(crate) fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Bytes> {
    let mut buffer = Vec::with_capacity(image.as_raw().len() / 8);
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
        .encode_image(image)
        .map_err(|err| anyhow!("JPEG encode failed: {err}"))?;
    Ok(Bytes::from(buffer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use rstest::rstest;

    #[rstest]
    #[case(1)]
    #[case(85)]
    #[case(100)]
    fn output_decodes_back_to_the_same_size(#[case] quality: u8) {
        let image = RgbImage::from_pixel(32, 24, Rgb([200, 40, 10]));
        let jpeg = encode_jpeg(&image, quality).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 24));
    }

    #[test]
    fn zero_quality_is_clamped() {
        let image = RgbImage::new(8, 8);
        assert!(encode_jpeg(&image, 0).is_ok());
    }
}
