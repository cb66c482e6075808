//! Image utility functions

use image::{imageops, Rgb, RgbImage};

use crate::engine::BoundingBox;

pub const KNOWN_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const UNKNOWN_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// Clamp a box to the image, expanded by `padding` on every side.
/// Returns `(x, y, width, height)` or `None` when nothing is left.
pub fn clamp_region(
    bbox: &BoundingBox,
    padding: u32,
    width: u32,
    height: u32,
) -> Option<(u32, u32, u32, u32)> {
    let pad = padding as i64;
    let x1 = (bbox.x1 as i64 - pad).clamp(0, width as i64);
    let y1 = (bbox.y1 as i64 - pad).clamp(0, height as i64);
    let x2 = (bbox.x2 as i64 + pad).clamp(0, width as i64);
    let y2 = (bbox.y2 as i64 + pad).clamp(0, height as i64);

    if x2 <= x1 || y2 <= y1 {
        return None;
    }
    Some((x1 as u32, y1 as u32, (x2 - x1) as u32, (y2 - y1) as u32))
}

/// Crop a region of the frame, clamped to its bounds
pub fn crop(image: &RgbImage, bbox: &BoundingBox, padding: u32) -> Option<RgbImage> {
    let (x, y, w, h) = clamp_region(bbox, padding, image.width(), image.height())?;
    Some(imageops::crop_imm(image, x, y, w, h).to_image())
}

/// Draw a rectangle outline of the given thickness
pub fn draw_box(image: &mut RgbImage, bbox: &BoundingBox, color: Rgb<u8>, thickness: u32) {
    let Some((x, y, w, h)) = clamp_region(bbox, 0, image.width(), image.height()) else {
        return;
    };
    let t = thickness.max(1);

    for py in y..y + h {
        for px in x..x + w {
            let on_edge = px < x + t || px + t >= x + w || py < y + t || py + t >= y + h;
            if on_edge {
                image.put_pixel(px, py, color);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x1: i32, y1: i32, x2: i32, y2: i32) -> BoundingBox {
        BoundingBox { x1, y1, x2, y2 }
    }

    #[test]
    fn test_clamp_region_inside() {
        assert_eq!(clamp_region(&bbox(10, 20, 30, 60), 0, 100, 100), Some((10, 20, 20, 40)));
    }

    #[test]
    fn test_clamp_region_with_padding_hits_edges() {
        assert_eq!(clamp_region(&bbox(10, 10, 90, 90), 100, 100, 80), Some((0, 0, 100, 80)));
    }

    #[test]
    fn test_clamp_region_outside_image() {
        assert_eq!(clamp_region(&bbox(200, 200, 300, 300), 0, 100, 100), None);
    }

    #[test]
    fn test_crop_dimensions() {
        let image = RgbImage::new(64, 48);
        let face = crop(&image, &bbox(-5, 4, 20, 30), 0).unwrap();
        assert_eq!(face.dimensions(), (20, 26));
    }

    #[test]
    fn test_draw_box_outline_only() {
        let mut image = RgbImage::new(20, 20);
        draw_box(&mut image, &bbox(2, 2, 12, 12), UNKNOWN_COLOR, 1);
        assert_eq!(*image.get_pixel(2, 2), UNKNOWN_COLOR);
        assert_eq!(*image.get_pixel(11, 7), UNKNOWN_COLOR);
        assert_eq!(*image.get_pixel(7, 7), Rgb([0, 0, 0]));
        assert_eq!(*image.get_pixel(15, 15), Rgb([0, 0, 0]));
    }
}
