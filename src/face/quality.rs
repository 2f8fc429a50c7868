//! Registration frame gating: lighting, sharpness, face size and centring.

use image::{DynamicImage, GrayImage};
use serde::Serialize;
use utoipa::ToSchema;

use super::BoundingBox;

const MIN_BRIGHTNESS: f32 = 55.0;
const MAX_BRIGHTNESS: f32 = 210.0;
const MIN_SHARPNESS: f32 = 80.0;
const MIN_FACE_RATIO: f32 = 0.08;
const MAX_FACE_RATIO: f32 = 0.65;
const MAX_CENTER_OFFSET: f32 = 0.55;

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FrameQuality {
    pub accepted: bool,
    #[schema(value_type = Vec<String>, example = json!(["too_dark"]))]
    pub reasons: Vec<&'static str>,
    #[schema(value_type = String, example = "increase_light")]
    pub guidance: &'static str,
    pub brightness: f32,
    pub blur: f32,
    pub face_ratio: f32,
    pub center_offset: f32,
}

pub fn assess_frame(image: &DynamicImage, bbox: &BoundingBox) -> FrameQuality {
    let gray = image.to_luma8();
    let (iw, ih) = gray.dimensions();

    let brightness = mean_brightness(&gray);
    let blur = laplacian_variance(&gray);
    let face_ratio = bbox.area() as f32 / (iw as f32 * ih as f32).max(1.0);

    let half_w = (iw as f32 / 2.0).max(1.0);
    let half_h = (ih as f32 / 2.0).max(1.0);
    let cx = bbox.x as f32 + bbox.w as f32 / 2.0;
    let cy = bbox.y as f32 + bbox.h as f32 / 2.0;
    let center_offset =
        (((cx - iw as f32 / 2.0) / half_w).powi(2) + ((cy - ih as f32 / 2.0) / half_h).powi(2)).sqrt();

    let mut reasons = Vec::new();
    if brightness < MIN_BRIGHTNESS {
        reasons.push("too_dark");
    }
    if brightness > MAX_BRIGHTNESS {
        reasons.push("too_bright");
    }
    if blur < MIN_SHARPNESS {
        reasons.push("blurry");
    }
    if face_ratio < MIN_FACE_RATIO {
        reasons.push("face_too_small");
    }
    if face_ratio > MAX_FACE_RATIO {
        reasons.push("face_too_close");
    }
    if center_offset > MAX_CENTER_OFFSET {
        reasons.push("face_not_centered");
    }

    FrameQuality {
        accepted: reasons.is_empty(),
        guidance: guidance_for(&reasons),
        reasons,
        brightness: round_to(brightness, 2),
        blur: round_to(blur, 2),
        face_ratio: round_to(face_ratio, 4),
        center_offset: round_to(center_offset, 4),
    }
}

fn guidance_for(reasons: &[&str]) -> &'static str {
    const ORDER: [(&str, &str); 5] = [
        ("too_dark", "increase_light"),
        ("too_bright", "reduce_light"),
        ("blurry", "hold_camera_steady"),
        ("face_too_small", "move_closer"),
        ("face_too_close", "move_back"),
    ];

    if reasons.is_empty() {
        return "good_frame";
    }
    ORDER
        .iter()
        .find(|(reason, _)| reasons.contains(reason))
        .map(|(_, hint)| *hint)
        .unwrap_or("center_face")
}

fn mean_brightness(gray: &GrayImage) -> f32 {
    let n = gray.as_raw().len();
    if n == 0 {
        return 0.0;
    }
    gray.as_raw().iter().map(|&p| p as f64).sum::<f64>() as f32 / n as f32
}

/// Variance of the 4-neighbour Laplacian over interior pixels.
fn laplacian_variance(gray: &GrayImage) -> f32 {
    let (w, h) = gray.dimensions();
    if w < 3 || h < 3 {
        return 0.0;
    }

    let px = |x: u32, y: u32| gray.get_pixel(x, y).0[0] as f64;
    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    let mut n = 0.0f64;

    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let lap = px(x - 1, y) + px(x + 1, y) + px(x, y - 1) + px(x, y + 1) - 4.0 * px(x, y);
            sum += lap;
            sum_sq += lap * lap;
            n += 1.0;
        }
    }

    let mean = sum / n;
    (sum_sq / n - mean * mean).max(0.0) as f32
}

fn round_to(v: f32, places: i32) -> f32 {
    let f = 10f32.powi(places);
    (v * f).round() / f
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn checkerboard(size: u32, low: u8, high: u8) -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_fn(size, size, |x, y| {
            if (x + y) % 2 == 0 { Luma([low]) } else { Luma([high]) }
        }))
    }

    fn centred_box(size: u32, side: u32) -> BoundingBox {
        let off = (size - side) / 2;
        BoundingBox { x: off, y: off, w: side, h: side }
    }

    #[test]
    fn sharp_well_lit_centred_frame_is_accepted() {
        let img = checkerboard(100, 60, 200);
        let q = assess_frame(&img, &centred_box(100, 40));
        assert!(q.accepted, "reasons: {:?}", q.reasons);
        assert_eq!(q.guidance, "good_frame");
        assert!((q.face_ratio - 0.16).abs() < 1e-4);
    }

    #[test]
    fn flat_dark_frame_asks_for_light_first() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(100, 100, Luma([10])));
        let q = assess_frame(&img, &centred_box(100, 40));
        assert!(!q.accepted);
        assert!(q.reasons.contains(&"too_dark"));
        assert!(q.reasons.contains(&"blurry"));
        assert_eq!(q.guidance, "increase_light");
        assert_eq!(q.blur, 0.0);
    }

    #[test]
    fn small_face_in_corner() {
        let img = checkerboard(100, 60, 200);
        let q = assess_frame(&img, &BoundingBox { x: 0, y: 0, w: 10, h: 10 });
        assert_eq!(q.reasons, vec!["face_too_small", "face_not_centered"]);
        assert_eq!(q.guidance, "move_closer");
    }

    #[test]
    fn off_centre_only_gets_center_hint() {
        let img = checkerboard(100, 60, 200);
        let q = assess_frame(&img, &BoundingBox { x: 60, y: 60, w: 40, h: 40 });
        assert_eq!(q.reasons, vec!["face_not_centered"]);
        assert_eq!(q.guidance, "center_face");
    }
}
