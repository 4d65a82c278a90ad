//! Output size, pixel shape and rotation arithmetic.

use std::str::FromStr;

/// Display pixel aspect as `width:height` (square pixels are `1:1`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelShape {
    pub width: u32,
    pub height: u32,
}

impl PixelShape {
    pub const SQUARE: PixelShape = PixelShape {
        width: 1,
        height: 1,
    };
}

impl Default for PixelShape {
    fn default() -> Self {
        Self::SQUARE
    }
}

impl FromStr for PixelShape {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .split_once(':')
            .ok_or_else(|| format!("Invalid pixel shape '{}'", s))?;
        let width: u32 = w.trim().parse().map_err(|_| format!("Invalid pixel shape '{}'", s))?;
        let height: u32 = h.trim().parse().map_err(|_| format!("Invalid pixel shape '{}'", s))?;
        if width == 0 || height == 0 {
            return Err(format!("Invalid pixel shape '{}'", s));
        }
        Ok(Self { width, height })
    }
}

/// Fit a source image into a target box, preserving the aspect ratio the
/// viewer will see.
///
/// A zero target dimension means "same as the source". The source is
/// first scaled by the pixel shape, then the box is shrunk along one
/// axis: a box narrower than the corrected ratio loses height, otherwise
/// it loses width. Both results are at least 1.
///
/// # Arguments
///
/// * `source` - Source width and height in pixels
/// * `target` - Requested box; zero components default to the source
/// * `shape` - Pixel shape of the output device
pub fn fit_to_box(source: (u32, u32), target: (u32, u32), shape: PixelShape) -> (u32, u32) {
    let (src_w, src_h) = (source.0.max(1), source.1.max(1));
    let mut width = f64::from(if target.0 == 0 { src_w } else { target.0 });
    let mut height = f64::from(if target.1 == 0 { src_h } else { target.1 });

    let corrected_w = src_w as f64 * shape.height as f64;
    let corrected_h = src_h as f64 * shape.width as f64;
    let ratio = corrected_w / corrected_h;

    if width / height < ratio {
        height = (width / ratio).trunc();
    } else {
        width = (height * ratio).trunc();
    }

    ((width as u32).max(1), (height as u32).max(1))
}

/// Largest power-of-two reduction (up to 1/8) after which the source's
/// shorter side still covers the target's longer side, so the box is
/// covered whatever rotation follows.
pub fn decode_scale(source: (u32, u32), target: (u32, u32)) -> u32 {
    if target.0 == 0 || target.1 == 0 {
        return 1;
    }
    let short_side = source.0.min(source.1);
    let long_target = target.0.max(target.1);
    [8, 4, 2]
        .into_iter()
        .find(|&s| short_side / s >= long_target)
        .unwrap_or(1)
}

/// Normalise a counter-clockwise rotation to `0..360`.
pub fn normalize_degrees(degrees: i32) -> i32 {
    degrees.rem_euclid(360)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_fit_wide_image_to_width_only() {
        assert_eq!(fit_to_box((1000, 500), (200, 0), PixelShape::SQUARE), (200, 100));
    }

    #[test]
    fn test_fit_tall_box_shrinks_height() {
        assert_eq!(fit_to_box((1000, 500), (300, 300), PixelShape::SQUARE), (300, 150));
    }

    #[test]
    fn test_fit_wide_box_shrinks_width() {
        assert_eq!(fit_to_box((500, 1000), (640, 480), PixelShape::SQUARE), (240, 480));
    }

    #[test]
    fn test_fit_zero_box_keeps_source() {
        assert_eq!(fit_to_box((640, 480), (0, 0), PixelShape::SQUARE), (640, 480));
    }

    #[test]
    fn test_fit_applies_pixel_shape() {
        // 10:11 pixels: the source looks wider once displayed
        let shape: PixelShape = "10:11".parse().unwrap();
        assert_eq!(fit_to_box((1000, 1000), (500, 500), shape), (500, 454));
    }

    #[test]
    fn test_pixel_shape_parse() {
        assert_eq!("1:1".parse::<PixelShape>().unwrap(), PixelShape::SQUARE);
        assert!("0:1".parse::<PixelShape>().is_err());
        assert!("wide".parse::<PixelShape>().is_err());
    }

    #[test]
    fn test_decode_scale() {
        assert_eq!(decode_scale((4000, 3000), (640, 480)), 4);
        assert_eq!(decode_scale((4000, 3000), (100, 100)), 8);
        assert_eq!(decode_scale((800, 600), (640, 480)), 1);
        assert_eq!(decode_scale((800, 600), (0, 480)), 1);
    }

    #[test]
    fn test_normalize_degrees() {
        assert_eq!(normalize_degrees(-90), 270);
        assert_eq!(normalize_degrees(450), 90);
        assert_eq!(normalize_degrees(0), 0);
    }

    proptest! {
        #[test]
        fn prop_fit_stays_within_box(
            sw in 1u32..5000,
            sh in 1u32..5000,
            tw in 1u32..2000,
            th in 1u32..2000,
        ) {
            let (w, h) = fit_to_box((sw, sh), (tw, th), PixelShape::SQUARE);
            prop_assert!(w >= 1 && h >= 1);
            prop_assert!(w <= tw);
            prop_assert!(h <= th);
        }
    }
}
