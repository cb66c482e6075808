//! Image decoding and model input preparation

use std::path::Path;

use anyhow::{Context, Result};
use image::{DynamicImage, GenericImageView, ImageBuffer, Rgb, RgbImage};

/// Standard input size for face detection (SCRFD)
pub const DETECTOR_INPUT_SIZE: (u32, u32) = (640, 640);

/// Standard input size for face embedding (ArcFace)
pub const EMBEDDER_INPUT_SIZE: (u32, u32) = (112, 112);

/// ArcFace reference landmarks for a 112x112 aligned crop
pub const ARCFACE_LANDMARKS: [(f32, f32); 5] = [
    (38.2946, 51.6963),
    (73.5318, 51.5014),
    (56.0252, 71.7366),
    (41.5493, 92.3655),
    (70.7299, 92.2041),
];

/// Decode image from bytes with EXIF orientation handling
pub fn decode_image(data: &[u8]) -> Result<DynamicImage> {
    let image = image::load_from_memory(data)?;
    Ok(apply_exif_orientation(data, image))
}

/// Read and decode an image file
pub fn decode_file(path: &Path) -> Result<DynamicImage> {
    let data = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    decode_image(&data).with_context(|| format!("Failed to decode {}", path.display()))
}

/// Phones store rotation as an EXIF tag instead of rotating pixels
fn apply_exif_orientation(data: &[u8], image: DynamicImage) -> DynamicImage {
    let orientation = exif::Reader::new()
        .read_from_container(&mut std::io::Cursor::new(data))
        .ok()
        .and_then(|exif_data| {
            exif_data
                .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
                .and_then(|field| field.value.get_uint(0))
        })
        .unwrap_or(1);

    match orientation {
        2 => image.fliph(),
        3 => image.rotate180(),
        4 => image.flipv(),
        5 => image.rotate90().fliph(),
        6 => image.rotate90(),
        7 => image.rotate270().fliph(),
        8 => image.rotate270(),
        _ => image,
    }
}

/// Letterbox geometry used to map detector output back to the source image
#[derive(Debug, Clone, Copy)]
pub struct ResizeInfo {
    pub scale: f32,
    pub offset_x: u32,
    pub offset_y: u32,
    pub original_width: u32,
    pub original_height: u32,
}

impl ResizeInfo {
    pub fn new(original: (u32, u32), target: (u32, u32)) -> Self {
        let (orig_w, orig_h) = original;
        let (target_w, target_h) = target;

        let scale = f32::min(
            target_w as f32 / orig_w as f32,
            target_h as f32 / orig_h as f32,
        );

        let new_w = (orig_w as f32 * scale) as u32;
        let new_h = (orig_h as f32 * scale) as u32;

        Self {
            scale,
            offset_x: target_w.saturating_sub(new_w) / 2,
            offset_y: target_h.saturating_sub(new_h) / 2,
            original_width: orig_w,
            original_height: orig_h,
        }
    }

    /// Convert model-space coordinates back to the original image, clamped to it
    pub fn to_original(&self, x: f32, y: f32) -> (f32, f32) {
        let x = (x - self.offset_x as f32) / self.scale;
        let y = (y - self.offset_y as f32) / self.scale;
        (
            x.clamp(0.0, self.original_width as f32),
            y.clamp(0.0, self.original_height as f32),
        )
    }

    fn scaled_size(&self) -> (u32, u32) {
        (
            (self.original_width as f32 * self.scale) as u32,
            (self.original_height as f32 * self.scale) as u32,
        )
    }
}

/// Resize keeping aspect ratio, centered on a black canvas
pub fn letterbox(image: &DynamicImage, target: (u32, u32)) -> (RgbImage, ResizeInfo) {
    let info = ResizeInfo::new(image.dimensions(), target);
    let (new_w, new_h) = info.scaled_size();

    let resized = image
        .resize_exact(new_w.max(1), new_h.max(1), image::imageops::FilterType::Triangle)
        .to_rgb8();

    let mut canvas = ImageBuffer::from_pixel(target.0, target.1, Rgb([0u8, 0, 0]));
    image::imageops::replace(&mut canvas, &resized, info.offset_x as i64, info.offset_y as i64);

    (canvas, info)
}

/// 2x3 similarity transform mapping `src` landmarks onto `dst`
///
/// Least-squares fit of `dst = [a -b; b a] * src + t` (rotation, uniform
/// scale, translation, no reflection).
pub fn similarity_transform(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> [[f32; 3]; 2] {
    let n = src.len() as f32;
    let mean = |pts: &[(f32, f32); 5]| {
        let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), &(x, y)| (ax + x, ay + y));
        (sx / n, sy / n)
    };
    let (scx, scy) = mean(src);
    let (dcx, dcy) = mean(dst);

    let mut num_a = 0.0f32;
    let mut num_b = 0.0f32;
    let mut denom = 0.0f32;
    for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
        let (sx, sy) = (sx - scx, sy - scy);
        let (dx, dy) = (dx - dcx, dy - dcy);
        num_a += sx * dx + sy * dy;
        num_b += sx * dy - sy * dx;
        denom += sx * sx + sy * sy;
    }

    let (a, b) = if denom > 1e-10 {
        (num_a / denom, num_b / denom)
    } else {
        (1.0, 0.0)
    };

    [
        [a, -b, dcx - (a * scx - b * scy)],
        [b, a, dcy - (b * scx + a * scy)],
    ]
}

/// Warp the face onto the ArcFace 112x112 template using its 5 landmarks
pub fn align_face(image: &DynamicImage, landmarks: &[(f32, f32); 5]) -> RgbImage {
    let m = similarity_transform(landmarks, &ARCFACE_LANDMARKS);
    let src = image.to_rgb8();
    let (out_w, out_h) = EMBEDDER_INPUT_SIZE;
    let mut out = RgbImage::new(out_w, out_h);

    let det = m[0][0] * m[1][1] - m[0][1] * m[1][0];
    if det.abs() < 1e-12 || src.width() < 2 || src.height() < 2 {
        return out;
    }
    let inv = [
        [m[1][1] / det, -m[0][1] / det],
        [-m[1][0] / det, m[0][0] / det],
    ];
    let max_x = (src.width() - 1) as f32;
    let max_y = (src.height() - 1) as f32;

    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let dx = x as f32 - m[0][2];
        let dy = y as f32 - m[1][2];
        let sx = inv[0][0] * dx + inv[0][1] * dy;
        let sy = inv[1][0] * dx + inv[1][1] * dy;
        if sx < 0.0 || sy < 0.0 || sx >= max_x || sy >= max_y {
            continue;
        }
        *pixel = bilinear(&src, sx, sy);
    }

    out
}

fn bilinear(src: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (x0, y0) = (x as u32, y as u32);
    let (fx, fy) = (x - x0 as f32, y - y0 as f32);
    let p00 = src.get_pixel(x0, y0);
    let p10 = src.get_pixel(x0 + 1, y0);
    let p01 = src.get_pixel(x0, y0 + 1);
    let p11 = src.get_pixel(x0 + 1, y0 + 1);

    let mut out = [0u8; 3];
    for c in 0..3 {
        let top = p00[c] as f32 * (1.0 - fx) + p10[c] as f32 * fx;
        let bottom = p01[c] as f32 * (1.0 - fx) + p11[c] as f32 * fx;
        out[c] = (top * (1.0 - fy) + bottom * fy).clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}

/// NCHW tensor in BGR order normalized to [-1, 1], as InsightFace models expect
#[cfg(feature = "openvino")]
pub fn to_nchw_bgr(image: &RgbImage) -> ndarray::Array4<f32> {
    let (width, height) = image.dimensions();
    let mut tensor = ndarray::Array4::<f32>::zeros((1, 3, height as usize, width as usize));

    for (x, y, pixel) in image.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        tensor[[0, 0, y, x]] = (pixel[2] as f32 - 127.5) / 128.0;
        tensor[[0, 1, y, x]] = (pixel[1] as f32 - 127.5) / 128.0;
        tensor[[0, 2, y, x]] = (pixel[0] as f32 - 127.5) / 128.0;
    }

    tensor
}
