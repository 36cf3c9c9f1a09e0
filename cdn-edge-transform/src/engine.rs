//! Image transform engine (C4): decode, compute aspect-ratio-preserving
//! target dimensions, resample with Lanczos filtering, re-encode in the
//! source format. Quality knobs (95 for JPEG/PNG, 80 for WebP) and the
//! Lanczos choice are grounded on the original project's `ImagickResize`
//! (`service/imagick.go`); re-encoding through `image::DynamicImage` strips
//! metadata as a side effect of only round-tripping pixel data.

use std::io::Cursor;
use std::time::Instant;

use cdn_edge_error::{make_err, Code, Error};
use cdn_edge_util::Metrics;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::webp::WebPEncoder;
use image::{DynamicImage, GenericImageView, ImageEncoder, ImageFormat};

const JPEG_PNG_QUALITY: u8 = 95;

/// The caller's resize request. At least one of `width`/`height` must be set;
/// the other is derived to preserve the source aspect ratio.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransformDescriptor {
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Computes target (width, height) from the source dimensions and the
/// caller's request, per `spec.md` §4.4 step 2.
pub fn target_dimensions(source_w: u32, source_h: u32, request: TransformDescriptor) -> Result<(u32, u32), Error> {
    match (request.width, request.height) {
        (Some(w), Some(h)) => Ok((w, h)),
        (Some(w), None) => {
            let divisor = u64::from(source_w).max(1);
            let h = (u64::from(w) * u64::from(source_h) + divisor / 2) / divisor;
            Ok((w, (h as u32).max(1)))
        }
        (None, Some(h)) => {
            let divisor = u64::from(source_h).max(1);
            let w = (u64::from(h) * u64::from(source_w) + divisor / 2) / divisor;
            Ok(((w as u32).max(1), h))
        }
        (None, None) => Err(make_err!(
            Code::InvalidArgument,
            "at least one of width/height must be provided"
        )),
    }
}

/// Decodes, resizes, and re-encodes `source` in its own format. `metrics` is
/// optional so the engine stays usable without a registry (e.g. in tests).
pub fn transform(source: &[u8], request: TransformDescriptor, metrics: Option<&Metrics>) -> Result<Vec<u8>, Error> {
    let started = Instant::now();
    let format = image::guess_format(source).map_err(|e| make_err!(Code::InvalidArgument, "unrecognized image format: {e}"))?;
    let decoded = image::load_from_memory_with_format(source, format)
        .map_err(|e| make_err!(Code::InvalidArgument, "failed to decode image: {e}"))?;
    let (source_w, source_h) = decoded.dimensions();
    let (target_w, target_h) = target_dimensions(source_w, source_h, request)?;

    let resized = decoded.resize_exact(target_w, target_h, image::imageops::FilterType::Lanczos3);
    let encoded = encode(&resized, format)?;

    if let Some(metrics) = metrics {
        metrics.transform_duration_seconds.observe(started.elapsed().as_secs_f64());
    }
    Ok(encoded)
}

/// Sniffs `source`'s image format and reports it as the `Content-Type` a
/// caller should serve alongside it, without performing a full decode.
pub fn guess_mime(source: &[u8]) -> Option<&'static str> {
    match image::guess_format(source).ok()? {
        ImageFormat::Jpeg => Some("image/jpeg"),
        ImageFormat::Png => Some("image/png"),
        ImageFormat::Gif => Some("image/gif"),
        ImageFormat::WebP => Some("image/webp"),
        ImageFormat::Bmp => Some("image/bmp"),
        ImageFormat::Tiff => Some("image/tiff"),
        _ => None,
    }
}

/// Reads only enough of `source` to report its pixel dimensions, without a
/// full decode — used to populate the `Width`/`Height` response headers on a
/// cache hit, where the transform step itself did not just run.
pub fn probe_dimensions(source: &[u8]) -> Option<(u32, u32)> {
    image::io::Reader::new(Cursor::new(source))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

fn encode(image: &DynamicImage, format: ImageFormat) -> Result<Vec<u8>, Error> {
    let mut buffer = Vec::new();
    let mut cursor = Cursor::new(&mut buffer);
    match format {
        ImageFormat::Jpeg => {
            let encoder = JpegEncoder::new_with_quality(&mut cursor, JPEG_PNG_QUALITY);
            encoder
                .write_image(image.as_bytes(), image.width(), image.height(), image.color().into())
                .map_err(|e| make_err!(Code::Internal, "failed to re-encode jpeg: {e}"))?;
        }
        ImageFormat::Png => {
            let encoder = PngEncoder::new(&mut cursor);
            encoder
                .write_image(image.as_bytes(), image.width(), image.height(), image.color().into())
                .map_err(|e| make_err!(Code::Internal, "failed to re-encode png: {e}"))?;
        }
        ImageFormat::WebP => {
            // The `image` crate's WebP encoder does not expose a quality knob
            // (lossless only); quality 80 from `spec.md` §4.4 applies only
            // when a lossy encoder is available.
            let encoder = WebPEncoder::new_lossless(&mut cursor);
            encoder
                .write_image(image.as_bytes(), image.width(), image.height(), image.color().into())
                .map_err(|e| make_err!(Code::Internal, "failed to re-encode webp: {e}"))?;
        }
        other => {
            image
                .write_to(&mut cursor, other)
                .map_err(|e| make_err!(Code::Internal, "failed to re-encode {other:?}: {e}"))?;
        }
    }
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn derives_height_from_width_preserving_aspect_ratio() {
        let (w, h) = target_dimensions(400, 200, TransformDescriptor { width: Some(100), height: None }).unwrap();
        assert_eq!((w, h), (100, 50));
    }

    #[test]
    fn derives_width_from_height_preserving_aspect_ratio() {
        let (w, h) = target_dimensions(400, 200, TransformDescriptor { width: None, height: Some(50) }).unwrap();
        assert_eq!((w, h), (100, 50));
    }

    #[test]
    fn rounds_derived_dimension_instead_of_truncating() {
        let (w, h) = target_dimensions(300, 200, TransformDescriptor { width: Some(100), height: None }).unwrap();
        assert_eq!((w, h), (100, 67));
    }

    #[test]
    fn honors_both_dimensions_when_given() {
        let (w, h) = target_dimensions(400, 200, TransformDescriptor { width: Some(10), height: Some(10) }).unwrap();
        assert_eq!((w, h), (10, 10));
    }

    #[test]
    fn rejects_request_with_neither_dimension() {
        assert!(target_dimensions(400, 200, TransformDescriptor::default()).is_err());
    }

    #[test]
    fn transforms_a_generated_png() {
        let mut image = image::RgbImage::new(20, 10);
        for pixel in image.pixels_mut() {
            *pixel = image::Rgb([10, 20, 30]);
        }
        let mut source = Vec::new();
        DynamicImage::ImageRgb8(image)
            .write_to(&mut Cursor::new(&mut source), ImageFormat::Png)
            .unwrap();

        let result = transform(&source, TransformDescriptor { width: Some(10), height: None }, None).unwrap();
        let decoded = image::load_from_memory_with_format(&result, ImageFormat::Png).unwrap();
        assert_eq!(decoded.dimensions(), (10, 5));
    }

    #[test]
    fn probes_dimensions_without_full_decode() {
        let image = image::RgbImage::new(40, 30);
        let mut source = Vec::new();
        DynamicImage::ImageRgb8(image)
            .write_to(&mut Cursor::new(&mut source), ImageFormat::Png)
            .unwrap();
        assert_eq!(probe_dimensions(&source), Some((40, 30)));
    }

    #[test]
    fn probe_dimensions_rejects_garbage() {
        assert_eq!(probe_dimensions(b"not an image"), None);
    }

    #[test]
    fn guesses_mime_from_png_signature() {
        let image = image::RgbImage::new(4, 4);
        let mut source = Vec::new();
        DynamicImage::ImageRgb8(image)
            .write_to(&mut Cursor::new(&mut source), ImageFormat::Png)
            .unwrap();
        assert_eq!(guess_mime(&source), Some("image/png"));
    }
}
