//! Compositor: stacks RGBA layers onto a fixed-origin canvas.
//!
//! Every call returns a new image; inputs are never modified, so a failed
//! composite cannot disturb the previous snapshot.

use std::io::Cursor;
use std::path::Path;

use image::{ImageFormat, RgbaImage};

use crate::error::CompositeError;

/// Paste `overlay` onto `base` at the origin, masked by the overlay's alpha.
///
/// Without a base the overlay itself is the result. Every channel (alpha
/// included) is blended as `(overlay * a + base * (255 - a)) / 255`, rounded.
pub fn composite(base: Option<&RgbaImage>, overlay: &RgbaImage) -> Result<RgbaImage, CompositeError> {
    let Some(base) = base else {
        return Ok(overlay.clone());
    };
    if base.dimensions() != overlay.dimensions() {
        return Err(CompositeError::CanvasMismatch {
            expected: base.dimensions(),
            found: overlay.dimensions(),
        });
    }

    let mut out = base.clone();
    for (dst, src) in out.pixels_mut().zip(overlay.pixels()) {
        let alpha = u32::from(src[3]);
        for channel in 0..4 {
            dst[channel] = blend(src[channel], dst[channel], alpha);
        }
    }
    Ok(out)
}

fn blend(over: u8, under: u8, alpha: u32) -> u8 {
    ((u32::from(over) * alpha + u32::from(under) * (255 - alpha) + 127) / 255) as u8
}

/// Composite `layers` in order onto an empty canvas.
pub fn flatten<'a, I>(layers: I) -> Result<Option<RgbaImage>, CompositeError>
where
    I: IntoIterator<Item = &'a RgbaImage>,
{
    let mut acc: Option<RgbaImage> = None;
    for layer in layers {
        acc = Some(composite(acc.as_ref(), layer)?);
    }
    Ok(acc)
}

/// Decode an asset into RGBA8.
pub fn load_layer(path: &Path) -> Result<RgbaImage, CompositeError> {
    image::open(path)
        .map(|img| img.into_rgba8())
        .map_err(|e| CompositeError::Decode {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

/// Serialize to PNG in memory.
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, CompositeError> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .map_err(|e| CompositeError::Encode(e.to_string()))?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn solid(r: u8, g: u8, b: u8, a: u8) -> RgbaImage {
        RgbaImage::from_pixel(3, 2, Rgba([r, g, b, a]))
    }

    fn expected(over: [u8; 4], under: [u8; 4]) -> [u8; 4] {
        let a = over[3] as u32;
        let mut out = [0u8; 4];
        for c in 0..4 {
            out[c] = ((over[c] as u32 * a + under[c] as u32 * (255 - a) + 127) / 255) as u8;
        }
        out
    }

    #[test]
    fn first_layer_establishes_base() {
        let overlay = solid(10, 20, 30, 128);
        assert_eq!(composite(None, &overlay).unwrap(), overlay);
    }

    #[test]
    fn opaque_overlay_replaces() {
        let base = solid(200, 0, 0, 255);
        let overlay = solid(0, 0, 255, 255);
        let out = composite(Some(&base), &overlay).unwrap();
        assert_eq!(out, overlay);
    }

    #[test]
    fn transparent_overlay_leaves_base() {
        let base = solid(200, 100, 50, 255);
        let overlay = solid(0, 255, 0, 0);
        let out = composite(Some(&base), &overlay).unwrap();
        assert_eq!(out, base);
    }

    #[test]
    fn partial_alpha_blends_proportionally() {
        let base = solid(200, 100, 0, 255);
        let overlay = solid(0, 0, 255, 51);
        let out = composite(Some(&base), &overlay).unwrap();
        let want = expected([0, 0, 255, 51], [200, 100, 0, 255]);
        assert_eq!(out.get_pixel(2, 1).0, want);
        assert_eq!(want, [160, 80, 51, 214]);
    }

    #[test]
    fn layers_compose_in_order() {
        let a = solid(255, 0, 0, 255);
        let b = solid(0, 255, 0, 128);
        let c = solid(0, 0, 255, 64);

        let stepwise = composite(Some(&composite(Some(&a), &b).unwrap()), &c).unwrap();
        let single_pass = flatten([&a, &b, &c]).unwrap().unwrap();
        assert_eq!(stepwise, single_pass);

        let ab = expected(b.get_pixel(0, 0).0, a.get_pixel(0, 0).0);
        let abc = expected(c.get_pixel(0, 0).0, ab);
        assert_eq!(single_pass.get_pixel(0, 0).0, abc);
    }

    #[test]
    fn order_matters() {
        let a = solid(255, 0, 0, 255);
        let b = solid(0, 255, 0, 128);
        let ab = flatten([&a, &b]).unwrap().unwrap();
        let ba = flatten([&b, &a]).unwrap().unwrap();
        assert_ne!(ab, ba);
    }

    #[test]
    fn flatten_empty_is_none() {
        assert!(flatten(std::iter::empty::<&RgbaImage>()).unwrap().is_none());
    }

    #[test]
    fn mismatched_canvas_is_rejected() {
        let base = solid(1, 1, 1, 255);
        let overlay = RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 255]));
        let err = composite(Some(&base), &overlay).unwrap_err();
        assert!(matches!(
            err,
            CompositeError::CanvasMismatch {
                expected: (3, 2),
                found: (4, 4)
            }
        ));
    }

    #[test]
    fn png_bytes_decode_to_same_raster() {
        let img = solid(12, 34, 56, 78);
        let bytes = encode_png(&img).unwrap();
        assert_eq!(&bytes[..4], &[0x89, b'P', b'N', b'G']);
        let decoded = image::load_from_memory(&bytes).unwrap().into_rgba8();
        assert_eq!(decoded, img);
    }

    #[test]
    fn load_layer_reports_corrupt_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("broken.png");
        std::fs::write(&path, b"not a png").unwrap();
        assert!(matches!(
            load_layer(&path),
            Err(CompositeError::Decode { .. })
        ));
    }
}
