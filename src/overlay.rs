use std::io::Cursor;

use font8x8::{BASIC_FONTS, UnicodeFonts};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;

use crate::models::{DataUrl, DataUrlError, DetectionBox};

const BOX_COLOR: Rgba<u8> = Rgba([0, 255, 0, 255]);
const TEXT_COLOR: Rgba<u8> = Rgba([0, 0, 0, 255]);
/// Stroke is centred on the box outline, one pixel either side.
const STROKE_HALF_WIDTH: i32 = 1;
const GLYPH_SIZE: u32 = 8;
const GLYPH_SCALE: u32 = 2;
const LABEL_PADDING: u32 = 8;
const LABEL_HEIGHT: u32 = 20;
/// Distance from the box's top edge up to the top of the label background.
const LABEL_RISE: i32 = 25;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OverlayError {
    #[error("invalid image data: {0}")]
    InvalidDataUrl(#[from] DataUrlError),
    #[error("failed to decode image: {0}")]
    Decode(String),
    #[error("failed to encode image: {0}")]
    Encode(String),
}

/// Burn `boxes` into a copy of `source`.
///
/// The surface keeps the source's exact dimensions. Boxes are drawn in the
/// order given, each stroked and, when labelled, captioned just above its top
/// edge. The result is a PNG data URL.
pub fn render(source: &DataUrl, boxes: &[DetectionBox]) -> Result<DataUrl, OverlayError> {
    let bytes = source.decode()?;
    let base = image::load_from_memory(&bytes).map_err(|e| OverlayError::Decode(e.to_string()))?;
    let mut canvas = base.to_rgba8();

    for detection in boxes {
        draw_detection(&mut canvas, detection);
    }

    encode_png(canvas)
}

fn encode_png(canvas: RgbaImage) -> Result<DataUrl, OverlayError> {
    let mut buf = Vec::new();
    DynamicImage::ImageRgba8(canvas)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(|e| OverlayError::Encode(e.to_string()))?;
    Ok(DataUrl::encode(ImageFormat::Png.to_mime_type(), &buf))
}

fn draw_detection(canvas: &mut RgbaImage, detection: &DetectionBox) {
    let rect = detection.to_rect();

    // Negative extents span the other way, as with a canvas strokeRect.
    let (left, right) = ordered(rect.x, rect.x + rect.w);
    let (top, bottom) = ordered(rect.y, rect.y + rect.h);
    let (left, right, top, bottom) = (
        left.round() as i32,
        right.round() as i32,
        top.round() as i32,
        bottom.round() as i32,
    );

    for grow in -STROKE_HALF_WIDTH..=STROKE_HALF_WIDTH {
        stroke_outline(
            canvas,
            left.saturating_sub(grow),
            top.saturating_sub(grow),
            right.saturating_add(grow),
            bottom.saturating_add(grow),
        );
    }

    if let Some(label) = detection.label.as_deref().filter(|l| !l.is_empty()) {
        draw_label(canvas, left, top, label);
    }
}

fn ordered(a: f64, b: f64) -> (f64, f64) {
    if a <= b { (a, b) } else { (b, a) }
}

fn stroke_outline(canvas: &mut RgbaImage, left: i32, top: i32, right: i32, bottom: i32) {
    // Clamp to just outside the surface; the visible pixels stay the same but
    // absurd coordinates don't turn into absurdly long lines.
    let max_x = canvas.width() as i32 + 1;
    let max_y = canvas.height() as i32 + 1;
    let l = left.clamp(-1, max_x) as f32;
    let r = right.clamp(-1, max_x) as f32;
    let t = top.clamp(-1, max_y) as f32;
    let b = bottom.clamp(-1, max_y) as f32;

    draw_line_segment_mut(canvas, (l, t), (r, t), BOX_COLOR);
    draw_line_segment_mut(canvas, (l, b), (r, b), BOX_COLOR);
    draw_line_segment_mut(canvas, (l, t), (l, b), BOX_COLOR);
    draw_line_segment_mut(canvas, (r, t), (r, b), BOX_COLOR);
}

/// Width in pixels `text` occupies when drawn with the label font.
pub fn measure_text(text: &str) -> u32 {
    text.chars().count() as u32 * GLYPH_SIZE * GLYPH_SCALE
}

fn draw_label(canvas: &mut RgbaImage, left: i32, top: i32, label: &str) {
    let background_top = top.saturating_sub(LABEL_RISE);
    if left >= canvas.width() as i32 || background_top >= canvas.height() as i32 {
        return;
    }
    let width = measure_text(label) + LABEL_PADDING;
    draw_filled_rect_mut(
        canvas,
        Rect::at(left, background_top).of_size(width, LABEL_HEIGHT),
        BOX_COLOR,
    );

    let text_top = background_top + ((LABEL_HEIGHT - GLYPH_SIZE * GLYPH_SCALE) / 2) as i32;
    draw_text(canvas, left.saturating_add((LABEL_PADDING / 2) as i32), text_top, label);
}

fn draw_text(canvas: &mut RgbaImage, x: i32, y: i32, text: &str) {
    let scale = GLYPH_SCALE as i32;
    let advance = (GLYPH_SIZE * GLYPH_SCALE) as i32;
    let (width, height) = (canvas.width() as i32, canvas.height() as i32);

    for (index, ch) in text.chars().enumerate() {
        let Some(glyph) = BASIC_FONTS.get(ch).or_else(|| BASIC_FONTS.get('?')) else {
            continue;
        };
        let origin_x = x.saturating_add((index as i32).saturating_mul(advance));

        for (row, bits) in glyph.iter().enumerate() {
            for col in 0..GLYPH_SIZE as i32 {
                if (bits >> col) & 1 == 0 {
                    continue;
                }
                let px = origin_x.saturating_add(col * scale);
                let py = y.saturating_add(row as i32 * scale);
                for dy in 0..scale {
                    for dx in 0..scale {
                        let (tx, ty) = (px.saturating_add(dx), py.saturating_add(dy));
                        if tx >= 0 && ty >= 0 && tx < width && ty < height {
                            canvas.put_pixel(tx as u32, ty as u32, TEXT_COLOR);
                        }
                    }
                }
            }
        }
    }
}
