use crate::error::FillError;
use image::GenericImageView;

/// A decoded raster payload, sized to its placement box and split into
/// the planes a PDF image XObject needs.
#[derive(Debug, Clone)]
pub(crate) struct EmbeddedImage {
    pub rgb: Vec<u8>,
    pub alpha: Option<Vec<u8>>,
    pub px_width: u32,
    pub px_height: u32,
    pub width_pt: f32,
    pub height_pt: f32,
}

/// Decode raw image bytes and fit them into the signature box for the
/// surrounding text size: `font_size * 2.5` wide by `font_size` tall,
/// roughly the footprint of two to three CJK glyphs.
///
/// The scale ratio is clamped to 1.0: hand-drawn signature captures are
/// never upscaled. Decode failure is a hard error for this placement
/// only; the caller decides how far it propagates.
pub(crate) fn prepare(bytes: &[u8], font_size: f32) -> Result<EmbeddedImage, FillError> {
    let decoded =
        image::load_from_memory(bytes).map_err(|e| FillError::Image(e.to_string()))?;
    let (source_width, source_height) = decoded.dimensions();
    if source_width == 0 || source_height == 0 {
        return Err(FillError::Image("image has a zero dimension".to_string()));
    }

    let target_width = font_size * 2.5;
    let target_height = font_size * 1.0;

    let ratio = (target_width / source_width as f32)
        .min(target_height / source_height as f32)
        .min(1.0);

    let mut out_width = (source_width as f32 * ratio).round() as u32;
    let mut out_height = (source_height as f32 * ratio).round() as u32;
    // Rounding can overshoot the box by a pixel.
    out_width = out_width.clamp(1, target_width.floor().max(1.0) as u32);
    out_height = out_height.clamp(1, target_height.floor().max(1.0) as u32);

    let resized = if ratio < 1.0 {
        decoded.resize_exact(out_width, out_height, image::imageops::FilterType::Lanczos3)
    } else {
        decoded
    };

    let (rgb, alpha) = if resized.color().has_alpha() {
        let rgba = resized.to_rgba8();
        let mut rgb = Vec::with_capacity((out_width * out_height * 3) as usize);
        let mut alpha = Vec::with_capacity((out_width * out_height) as usize);
        for pixel in rgba.chunks_exact(4) {
            rgb.extend_from_slice(&pixel[..3]);
            alpha.push(pixel[3]);
        }
        (rgb, Some(alpha))
    } else {
        (resized.to_rgb8().into_raw(), None)
    };

    Ok(EmbeddedImage {
        rgb,
        alpha,
        px_width: out_width,
        px_height: out_height,
        width_pt: out_width as f32,
        height_pt: out_height as f32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32, with_alpha: bool) -> Vec<u8> {
        let mut out = Vec::new();
        if with_alpha {
            let img = image::RgbaImage::from_pixel(width, height, image::Rgba([10, 20, 30, 128]));
            image::DynamicImage::ImageRgba8(img)
                .write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
                .expect("encode png");
        } else {
            let img = image::RgbImage::from_pixel(width, height, image::Rgb([10, 20, 30]));
            image::DynamicImage::ImageRgb8(img)
                .write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
                .expect("encode png");
        }
        out
    }

    #[test]
    fn small_image_passes_through_unscaled() {
        // Box for 12pt text is 30x12; a 10x4 image fits as-is.
        let img = prepare(&png_bytes(10, 4, false), 12.0).expect("prepare");
        assert_eq!((img.px_width, img.px_height), (10, 4));
        assert_eq!((img.width_pt, img.height_pt), (10.0, 4.0));
        assert!(img.alpha.is_none());
    }

    #[test]
    fn large_image_shrinks_into_target_box() {
        let img = prepare(&png_bytes(300, 120, false), 12.0).expect("prepare");
        assert!(img.px_width <= 30, "width {} exceeds box", img.px_width);
        assert!(img.px_height <= 12, "height {} exceeds box", img.px_height);
        // Never upscaled.
        assert!(img.px_width <= 300 && img.px_height <= 120);
        // Aspect preserved through min-ratio fit (ratio = 12/120 = 0.1).
        assert_eq!((img.px_width, img.px_height), (30, 12));
    }

    #[test]
    fn wide_image_is_width_bound() {
        // ratio = min(30/600, 12/30) = 0.05 -> 30x2 (rounded).
        let img = prepare(&png_bytes(600, 30, false), 12.0).expect("prepare");
        assert_eq!(img.px_width, 30);
        assert!(img.px_height <= 2);
    }

    #[test]
    fn alpha_plane_is_split_out() {
        let img = prepare(&png_bytes(8, 8, true), 12.0).expect("prepare");
        let alpha = img.alpha.expect("alpha plane");
        assert_eq!(alpha.len(), (img.px_width * img.px_height) as usize);
        assert_eq!(img.rgb.len(), (img.px_width * img.px_height * 3) as usize);
        assert!(alpha.iter().all(|&a| a == 128));
    }

    #[test]
    fn undecodable_bytes_are_a_hard_error() {
        let err = prepare(b"not an image", 12.0).expect_err("must fail");
        assert!(matches!(err, FillError::Image(_)));
    }
}
