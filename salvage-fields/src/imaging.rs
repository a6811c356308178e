//! Image decoding, shrinking and re-encoding for image fields.

use std::io::Cursor;

use image::{DynamicImage, ImageError, ImageFormat};

/// A decoded image and the format it was stored in.
pub struct DecodedImage {
    pub image: DynamicImage,
    pub format: ImageFormat,
}

impl DecodedImage {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

pub fn decode(bytes: &[u8]) -> Result<DecodedImage, ImageError> {
    let format = image::guess_format(bytes)?;
    let image = image::load_from_memory_with_format(bytes, format)?;
    Ok(DecodedImage { image, format })
}

/// Fit within the given bounds, keeping the aspect ratio. Missing bounds
/// leave that dimension unconstrained.
pub fn shrink(image: &DynamicImage, max_width: Option<u32>, max_height: Option<u32>) -> DynamicImage {
    let width = max_width.unwrap_or(image.width());
    let height = max_height.unwrap_or(image.height());
    if image.width() <= width && image.height() <= height {
        return image.clone();
    }
    image.thumbnail(width, height)
}

/// The format a processed image is written in.
pub fn target_format(source: ImageFormat, to_webp: bool) -> ImageFormat {
    if to_webp {
        return ImageFormat::WebP;
    }
    match source {
        ImageFormat::Tiff | ImageFormat::Bmp => ImageFormat::Jpeg,
        other => other,
    }
}

pub fn encode(image: &DynamicImage, format: ImageFormat) -> Result<Vec<u8>, ImageError> {
    // JPEG has no alpha channel; the WebP encoder only takes 8-bit RGB(A).
    let converted = match format {
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(image.to_rgb8()),
        ImageFormat::WebP => DynamicImage::ImageRgba8(image.to_rgba8()),
        _ => image.clone(),
    };
    let mut out = Cursor::new(Vec::new());
    converted.write_to(&mut out, format)?;
    Ok(out.into_inner())
}

/// Preferred file extension for a format.
pub fn extension(format: ImageFormat) -> &'static str {
    format.extensions_str().first().copied().unwrap_or("img")
}

/// `name` with its extension replaced.
pub fn with_extension(name: &str, extension: &str) -> String {
    match name.rsplit_once('.') {
        Some((stem, _)) => format!("{}.{}", stem, extension),
        None => format!("{}.{}", name, extension),
    }
}

#[cfg(test)]
mod tests {
    use image::RgbImage;

    use super::*;

    fn png(width: u32, height: u32) -> Vec<u8> {
        encode(&DynamicImage::ImageRgb8(RgbImage::new(width, height)), ImageFormat::Png).unwrap()
    }

    #[test]
    fn decode_reports_format_and_size() {
        let decoded = decode(&png(40, 20)).unwrap();
        assert_eq!(decoded.format, ImageFormat::Png);
        assert_eq!((decoded.width(), decoded.height()), (40, 20));
        assert!(decode(b"not an image").is_err());
    }

    #[test]
    fn shrink_keeps_aspect_ratio() {
        let decoded = decode(&png(400, 200)).unwrap();
        let small = shrink(&decoded.image, Some(100), None);
        assert_eq!((small.width(), small.height()), (100, 50));
        let same = shrink(&decoded.image, Some(1000), Some(1000));
        assert_eq!((same.width(), same.height()), (400, 200));
    }

    #[test]
    fn webp_conversion() {
        let decoded = decode(&png(8, 8)).unwrap();
        let bytes = encode(&decoded.image, target_format(decoded.format, true)).unwrap();
        assert_eq!(decode(&bytes).unwrap().format, ImageFormat::WebP);
        assert_eq!(with_extension("a/photo.png", extension(ImageFormat::WebP)), "a/photo.webp");
        assert_eq!(target_format(ImageFormat::Bmp, false), ImageFormat::Jpeg);
    }
}
