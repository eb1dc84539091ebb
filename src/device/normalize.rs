use anyhow::{anyhow, Context, Result};

use crate::frame::{rgb_len, RawFrame, RGB_CHANNELS};

/// Layouts a capture driver may hand back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(not(feature = "device-v4l2"), allow(dead_code))]
pub(crate) enum PixelFormat {
    Rgb24,
    Yuyv,
    Nv12,
    Mjpeg,
}

#[cfg_attr(not(feature = "device-v4l2"), allow(dead_code))]
impl PixelFormat {
    pub(crate) fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"RGB3" => Some(PixelFormat::Rgb24),
            b"YUYV" => Some(PixelFormat::Yuyv),
            b"NV12" => Some(PixelFormat::Nv12),
            b"MJPG" | b"JPEG" => Some(PixelFormat::Mjpeg),
            _ => None,
        }
    }
}

/// Convert a driver buffer into an RGB24 `RawFrame`.
///
/// `stride` is the driver's bytes-per-line for the (first) plane; `0` means
/// rows are tightly packed. Row padding is dropped during conversion.
#[cfg_attr(not(feature = "device-v4l2"), allow(dead_code))]
pub(crate) fn normalize_to_rgb(
    pixels: &[u8],
    width: u32,
    height: u32,
    stride: u32,
    format: PixelFormat,
) -> Result<RawFrame> {
    match format {
        PixelFormat::Rgb24 => {
            let expected = rgb_len(width, height)?;
            let row_bytes = width as usize * RGB_CHANNELS;
            let pitch = row_pitch(pixels, row_bytes, height as usize, stride, "RGB")?;
            let mut rgb = Vec::with_capacity(expected);
            for j in 0..height as usize {
                let start = j * pitch;
                rgb.extend_from_slice(&pixels[start..start + row_bytes]);
            }
            RawFrame::new(rgb, width, height)
        }
        PixelFormat::Yuyv => {
            RawFrame::new(yuyv_to_rgb(pixels, width, height, stride)?, width, height)
        }
        PixelFormat::Nv12 => {
            RawFrame::new(nv12_to_rgb(pixels, width, height, stride)?, width, height)
        }
        PixelFormat::Mjpeg => decode_mjpeg(pixels),
    }
}

/// Validate that `rows` rows of `row_bytes` fit in `pixels` at the given
/// stride and return the effective pitch. The last row may omit its padding.
fn row_pitch(
    pixels: &[u8],
    row_bytes: usize,
    rows: usize,
    stride: u32,
    label: &str,
) -> Result<usize> {
    if row_bytes == 0 || rows == 0 {
        return Err(anyhow!("{} frame has zero dimensions", label));
    }
    let pitch = if stride == 0 { row_bytes } else { stride as usize };
    if pitch < row_bytes {
        return Err(anyhow!(
            "{} stride {} shorter than row of {} bytes",
            label,
            pitch,
            row_bytes
        ));
    }
    let expected = pitch
        .checked_mul(rows - 1)
        .and_then(|v| v.checked_add(row_bytes))
        .ok_or_else(|| anyhow!("{} frame dimensions overflow", label))?;
    if pixels.len() < expected {
        return Err(anyhow!(
            "{} frame length mismatch: expected {}, got {}",
            label,
            expected,
            pixels.len()
        ));
    }
    Ok(pitch)
}

fn yuyv_to_rgb(pixels: &[u8], width: u32, height: u32, stride: u32) -> Result<Vec<u8>> {
    let w = width as usize;
    let h = height as usize;
    if w % 2 != 0 {
        return Err(anyhow!("YUYV frame width must be even, got {}", w));
    }
    let row_bytes = w
        .checked_mul(2)
        .ok_or_else(|| anyhow!("YUYV frame dimensions overflow"))?;
    let pitch = row_pitch(pixels, row_bytes, h, stride, "YUYV")?;

    let mut rgb = Vec::with_capacity(w * h * RGB_CHANNELS);
    for j in 0..h {
        let row = &pixels[j * pitch..j * pitch + row_bytes];
        for macro_px in row.chunks_exact(4) {
            let u = macro_px[1] as f32 - 128.0;
            let v = macro_px[3] as f32 - 128.0;
            for y in [macro_px[0], macro_px[2]] {
                let (r, g, b) = yuv_to_rgb(y as f32, u, v);
                rgb.extend_from_slice(&[r, g, b]);
            }
        }
    }
    Ok(rgb)
}

fn nv12_to_rgb(pixels: &[u8], width: u32, height: u32, stride: u32) -> Result<Vec<u8>> {
    let w = width as usize;
    let h = height as usize;
    // Chroma is subsampled 2x2; odd sizes would index past the UV plane.
    if w % 2 != 0 || h % 2 != 0 {
        return Err(anyhow!("NV12 frame dimensions must be even, got {}x{}", w, h));
    }
    let pitch = row_pitch(pixels, w, h, stride, "NV12")?;
    let y_plane = pitch
        .checked_mul(h)
        .ok_or_else(|| anyhow!("NV12 frame dimensions overflow"))?;
    let uv_pixels = pixels.get(y_plane..).unwrap_or_default();
    row_pitch(uv_pixels, w, h / 2, stride, "NV12 chroma")?;

    let mut rgb = vec![0u8; w * h * RGB_CHANNELS];
    for j in 0..h {
        for i in 0..w {
            let y = pixels[j * pitch + i] as f32;
            let uv_index = y_plane + (j / 2) * pitch + (i / 2) * 2;
            let u = pixels[uv_index] as f32 - 128.0;
            let v = pixels[uv_index + 1] as f32 - 128.0;

            let (r, g, b) = yuv_to_rgb(y, u, v);
            let offset = (j * w + i) * RGB_CHANNELS;
            rgb[offset] = r;
            rgb[offset + 1] = g;
            rgb[offset + 2] = b;
        }
    }

    Ok(rgb)
}

fn decode_mjpeg(bytes: &[u8]) -> Result<RawFrame> {
    let image = image::load_from_memory_with_format(bytes, image::ImageFormat::Jpeg)
        .context("decode mjpeg frame")?;
    let rgb = image.into_rgb8();
    let (width, height) = rgb.dimensions();
    RawFrame::new(rgb.into_raw(), width, height)
}

fn yuv_to_rgb(y: f32, u: f32, v: f32) -> (u8, u8, u8) {
    let r = y + 1.402_f32 * v;
    let g = y - 0.344_136_f32 * u - 0.714_136_f32 * v;
    let b = y + 1.772_f32 * u;
    (clamp_to_u8(r), clamp_to_u8(g), clamp_to_u8(b))
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
