use common::span_debug;
use image::{
    DynamicImage, ExtendedColorType, ImageDecoder, ImageEncoder, ImageReader, RgbaImage,
    codecs::png::{CompressionType, FilterType, PngEncoder},
};
use std::io::Cursor;

/// Decode an uploaded image, sniffing the format from its bytes and applying
/// the EXIF orientation if the container carries one.
pub fn decode_image(bytes: &[u8]) -> anyhow::Result<DynamicImage> {
    let _s = span_debug!("decode_image");
    let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    if reader.format().is_none() {
        anyhow::bail!("Unrecognized image format");
    }

    let mut decoder = reader.into_decoder()?;
    let orientation = decoder.orientation()?;
    let mut image = DynamicImage::from_decoder(decoder)?;
    image.apply_orientation(orientation);

    Ok(image)
}

pub fn encode_png(image: &RgbaImage) -> anyhow::Result<Vec<u8>> {
    let _s = span_debug!("encode_png");
    let mut out = Vec::new();
    PngEncoder::new_with_quality(&mut out, CompressionType::Best, FilterType::Adaptive).write_image(
        image.as_raw(),
        image.width(),
        image.height(),
        ExtendedColorType::Rgba8,
    )?;
    Ok(out)
}
