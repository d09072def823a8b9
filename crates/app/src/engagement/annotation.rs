//! Frame conversion and the cosmetic overlays drawn onto outgoing frames.
//!
//! Every primitive clamps to the image bounds, so drawing never fails.

use anyhow::{Result, anyhow};
use image::{Rgb, RgbImage};
use ml_core::LandmarkSet;
use video_ingest::{Frame, FrameFormat};

use crate::engagement::data::StatsSnapshot;

const MESH_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const HUD_TEXT: Rgb<u8> = Rgb([100, 255, 0]);
const HUD_BACKGROUND: Rgb<u8> = Rgb([0, 0, 0]);

/// Landmark indices tracing the face silhouette of the 468-point mesh.
const FACE_OVAL: [usize; 37] = [
    10, 338, 297, 332, 284, 251, 389, 356, 454, 323, 361, 288, 397, 365, 379, 378, 400, 377, 152,
    148, 176, 149, 150, 136, 172, 58, 132, 93, 234, 127, 162, 21, 54, 103, 67, 109, 10,
];

/// Copy a captured frame into an RGB image.
pub(crate) fn frame_to_image(frame: &Frame) -> Result<RgbImage> {
    let expected = Frame::expected_len(frame.width, frame.height);
    if frame.data.len() != expected {
        return Err(anyhow!(
            "frame buffer holds {} bytes, expected {expected} for {}x{}",
            frame.data.len(),
            frame.width,
            frame.height
        ));
    }
    let rgb = match frame.format {
        FrameFormat::Rgb8 => frame.data.clone(),
        FrameFormat::Bgr8 => bgr_to_rgb(&frame.data),
    };
    RgbImage::from_vec(frame.width, frame.height, rgb)
        .ok_or_else(|| anyhow!("failed to convert frame into image buffer"))
}

fn bgr_to_rgb(input: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(input.len());
    for chunk in input.chunks_exact(3) {
        output.extend_from_slice(&[chunk[2], chunk[1], chunk[0]]);
    }
    output
}

/// Draw landmark dots and, for a full face mesh, the face outline.
///
/// Only the face oval is connected; the full tessellation is not drawn.
pub(crate) fn draw_mesh(image: &mut RgbImage, landmarks: &LandmarkSet) {
    let width = image.width() as f32;
    let height = image.height() as f32;
    // Keeps line rasterisation bounded for wild coordinates.
    let to_px = |x: f32, y: f32| {
        (
            (x * width).round().clamp(-width, 2.0 * width) as i32,
            (y * height).round().clamp(-height, 2.0 * height) as i32,
        )
    };
    let points = landmarks.points();

    if points.len() >= 468 {
        for pair in FACE_OVAL.windows(2) {
            let (x0, y0) = to_px(points[pair[0]].x, points[pair[0]].y);
            let (x1, y1) = to_px(points[pair[1]].x, points[pair[1]].y);
            draw_line(image, x0, y0, x1, y1, MESH_COLOR);
        }
    }

    for point in points {
        let (x, y) = to_px(point.x, point.y);
        draw_dot(image, x, y, MESH_COLOR);
    }
}

/// Draw the current stats in the top-left corner.
pub(crate) fn draw_hud(image: &mut RgbImage, stats: &StatsSnapshot) {
    let lines = [
        format!("FPS {}", stats.fps),
        format!("LEVEL {}", stats.level_text()),
        format!("MODUS {}", stats.modus_text()),
    ];
    let widest = lines.iter().map(|l| l.chars().count()).max().unwrap_or(0) as i32;
    fill_rect(
        image,
        4,
        4,
        8 + widest * 6,
        8 + lines.len() as i32 * 10,
        HUD_BACKGROUND,
    );
    for (row, line) in lines.iter().enumerate() {
        draw_label(image, 6, 6 + row as i32 * 10, line, HUD_TEXT);
    }
}

fn plot(image: &mut RgbImage, x: i32, y: i32, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < image.width() && (y as u32) < image.height() {
        *image.get_pixel_mut(x as u32, y as u32) = color;
    }
}

fn draw_dot(image: &mut RgbImage, x: i32, y: i32, color: Rgb<u8>) {
    for (dx, dy) in [(0, 0), (1, 0), (-1, 0), (0, 1), (0, -1)] {
        plot(image, x + dx, y + dy, color);
    }
}

fn draw_line(image: &mut RgbImage, x0: i32, y0: i32, x1: i32, y1: i32, color: Rgb<u8>) {
    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let (mut x, mut y, mut err) = (x0, y0, dx + dy);
    loop {
        plot(image, x, y, color);
        if x == x1 && y == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

fn fill_rect(
    image: &mut RgbImage,
    left: i32,
    top: i32,
    right: i32,
    bottom: i32,
    color: Rgb<u8>,
) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    if width == 0 || height == 0 {
        return;
    }
    let left = left.clamp(0, width - 1);
    let right = right.clamp(0, width - 1);
    let top = top.clamp(0, height - 1);
    let bottom = bottom.clamp(0, height - 1);

    for y in top..=bottom {
        for x in left..=right {
            *image.get_pixel_mut(x as u32, y as u32) = color;
        }
    }
}

fn draw_label(image: &mut RgbImage, mut x: i32, y: i32, text: &str, color: Rgb<u8>) {
    for ch in text.chars().flat_map(|c| c.to_uppercase()) {
        if let Some(glyph) = glyph_bits(ch) {
            for (row, pattern) in glyph.iter().enumerate() {
                for col in 0..5 {
                    if (pattern >> (4 - col)) & 1 == 1 {
                        plot(image, x + col, y + row as i32, color);
                    }
                }
            }
        }
        x += 6;
    }
}

fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    match ch {
        'A' => Some([
            0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001,
        ]),
        'C' => Some([
            0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110,
        ]),
        'D' => Some([
            0b11110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11110,
        ]),
        'E' => Some([
            0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b11111,
        ]),
        'F' => Some([
            0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b10000,
        ]),
        'L' => Some([
            0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111,
        ]),
        'M' => Some([
            0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001,
        ]),
        'N' => Some([
            0b10001, 0b11001, 0b10101, 0b10101, 0b10011, 0b10001, 0b10001,
        ]),
        'O' => Some([
            0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110,
        ]),
        'P' => Some([
            0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000,
        ]),
        'S' => Some([
            0b01111, 0b10000, 0b01110, 0b00001, 0b00001, 0b10001, 0b01110,
        ]),
        'T' => Some([
            0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100,
        ]),
        'U' => Some([
            0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110,
        ]),
        'V' => Some([
            0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100,
        ]),
        '0' => Some([
            0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110,
        ]),
        '1' => Some([
            0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110,
        ]),
        '2' => Some([
            0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111,
        ]),
        '3' => Some([
            0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110,
        ]),
        '4' => Some([
            0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010,
        ]),
        '5' => Some([
            0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110,
        ]),
        '6' => Some([
            0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110,
        ]),
        '7' => Some([
            0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000,
        ]),
        '8' => Some([
            0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110,
        ]),
        '9' => Some([
            0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100,
        ]),
        '/' => Some([
            0b00001, 0b00010, 0b00010, 0b00100, 0b01000, 0b01000, 0b10000,
        ]),
        _ => None,
    }
}
