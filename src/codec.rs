use bytes::Bytes;
use image::{ImageBuffer, RgbImage};

use crate::capture::Frame;
use crate::errors::{CameraServerError, Result};

/// Streaming re-encodes every frame at ~30 Hz and trades quality for
/// throughput; snapshots are one-shot and keep fidelity.
pub const STREAM_JPEG_QUALITY: u8 = 80;
pub const SNAPSHOT_JPEG_QUALITY: u8 = 90;

const PLACEHOLDER_BG: [u8; 3] = [32, 36, 40];
const PLACEHOLDER_FG: [u8; 3] = [220, 220, 220];

/// Encode an RGB frame to JPEG at the given quality (0-100).
pub fn encode_frame(frame: &Frame, quality: u8) -> Result<Bytes> {
    let img: RgbImage =
        ImageBuffer::from_raw(frame.width, frame.height, frame.data.clone()).ok_or_else(|| {
            CameraServerError::encode_failed(format!(
                "frame buffer size {} does not match {}x{}",
                frame.data.len(),
                frame.width,
                frame.height
            ))
        })?;

    let mut jpeg = Vec::new();
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, quality);
    encoder
        .encode_image(&img)
        .map_err(|e| CameraServerError::encode_failed(e.to_string()))?;

    Ok(Bytes::from(jpeg))
}

/// Deterministic synthetic frame: solid fill plus a centered label, used
/// whenever a camera has no live frame so viewers never get an empty body.
pub fn placeholder(width: u32, height: u32, label: &str) -> Frame {
    let width = width.max(1);
    let height = height.max(1);
    let mut data = Vec::with_capacity((width * height * 3) as usize);
    for _ in 0..width * height {
        data.extend_from_slice(&PLACEHOLDER_BG);
    }

    let mut frame = Frame { width, height, data };
    let scale = (width / 160).clamp(1, 4);
    let text_width = label.chars().count() as u32 * 6 * scale;
    let x0 = width.saturating_sub(text_width) / 2;
    let y0 = height.saturating_sub(7 * scale) / 2;
    draw_label(&mut frame, label, x0, y0, scale);
    frame
}

fn draw_label(frame: &mut Frame, label: &str, x0: u32, y0: u32, scale: u32) {
    let mut x = x0;
    for c in label.chars() {
        let glyph = glyph(c);
        for (row, bits) in glyph.iter().enumerate() {
            for col in 0..5u32 {
                if bits & (0x10 >> col) != 0 {
                    fill_block(frame, x + col * scale, y0 + row as u32 * scale, scale);
                }
            }
        }
        x += 6 * scale;
    }
}

fn fill_block(frame: &mut Frame, x: u32, y: u32, scale: u32) {
    for dy in 0..scale {
        for dx in 0..scale {
            let (px, py) = (x + dx, y + dy);
            if px < frame.width && py < frame.height {
                let offset = ((py * frame.width + px) * 3) as usize;
                frame.data[offset..offset + 3].copy_from_slice(&PLACEHOLDER_FG);
            }
        }
    }
}

/// 5x7 bitmap glyphs, one row per byte, low 5 bits used. Unknown
/// characters render as blanks.
fn glyph(c: char) -> [u8; 7] {
    match c.to_ascii_uppercase() {
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1E],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x19, 0x15, 0x13, 0x11, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x0A, 0x04, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        '_' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x1F],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        ':' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00],
        _ => [0x00; 7],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_uses_requested_resolution() {
        let frame = placeholder(640, 360, "camx offline");
        assert_eq!(frame.width, 640);
        assert_eq!(frame.height, 360);
        assert_eq!(frame.data.len(), 640 * 360 * 3);
    }

    #[test]
    fn placeholder_is_deterministic() {
        let a = placeholder(160, 120, "cam1 offline");
        let b = placeholder(160, 120, "cam1 offline");
        assert_eq!(a.data, b.data);
    }

    #[test]
    fn placeholder_contains_label_pixels() {
        let blank = placeholder(160, 120, "");
        let labeled = placeholder(160, 120, "cam1");
        assert_ne!(blank.data, labeled.data);
    }

    #[test]
    fn placeholder_tolerates_odd_labels_and_tiny_sizes() {
        // Unknown glyphs and labels wider than the frame must not panic.
        let frame = placeholder(8, 8, "Ω≈ç√∫ very long label indeed");
        assert_eq!(frame.data.len(), 8 * 8 * 3);
    }

    #[test]
    fn encode_produces_jpeg_magic() {
        let frame = placeholder(32, 24, "x");
        let jpeg = encode_frame(&frame, SNAPSHOT_JPEG_QUALITY).unwrap();
        assert_eq!(&jpeg[0..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn encode_rejects_mismatched_buffer() {
        let frame = Frame {
            width: 10,
            height: 10,
            data: vec![0u8; 5],
        };
        assert!(matches!(
            encode_frame(&frame, 80),
            Err(crate::errors::CameraServerError::EncodeFailed { .. })
        ));
    }
}
