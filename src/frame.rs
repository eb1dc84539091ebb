//! Transient raw frames.
//!
//! A `RawFrame` is what a capture device hands back from a read: packed RGB24
//! pixels plus dimensions. It lives only as long as it takes to encode it.

use anyhow::{anyhow, Result};

/// Bytes per RGB24 pixel.
pub const RGB_CHANNELS: usize = 3;

/// Packed RGB24 frame, row-major, no padding.
#[derive(Debug)]
pub struct RawFrame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl RawFrame {
    /// Wrap RGB24 pixels. Fails if the buffer length does not match the dimensions.
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = rgb_len(width, height)?;
        if data.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                data.len()
            ));
        }
        if width == 0 || height == 0 {
            return Err(anyhow!("frame dimensions must be non-zero"));
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Mirror the frame top-to-bottom in place.
    pub fn flip_vertical(&mut self) {
        let stride = self.width as usize * RGB_CHANNELS;
        let rows = self.height as usize;
        for top in 0..rows / 2 {
            let bottom = rows - 1 - top;
            let (upper, lower) = self.data.split_at_mut(bottom * stride);
            upper[top * stride..(top + 1) * stride].swap_with_slice(&mut lower[..stride]);
        }
    }
}

/// Byte length of an RGB24 frame, checked for overflow.
pub(crate) fn rgb_len(width: u32, height: u32) -> Result<usize> {
    let len = (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(RGB_CHANNELS))
        .ok_or_else(|| anyhow!("RGB frame dimensions overflow"))?;
    Ok(len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_length_mismatch() {
        assert!(RawFrame::new(vec![0u8; 10], 2, 2).is_err());
        assert!(RawFrame::new(vec![0u8; 12], 2, 2).is_ok());
    }

    #[test]
    fn rejects_empty_dimensions() {
        assert!(RawFrame::new(Vec::new(), 0, 4).is_err());
    }

    #[test]
    fn flip_vertical_swaps_rows() -> Result<()> {
        // 1x3 frame: rows are [1,1,1], [2,2,2], [3,3,3]
        let mut frame = RawFrame::new(vec![1, 1, 1, 2, 2, 2, 3, 3, 3], 1, 3)?;
        frame.flip_vertical();
        assert_eq!(frame.pixels(), &[3, 3, 3, 2, 2, 2, 1, 1, 1]);
        Ok(())
    }

    #[test]
    fn flip_vertical_twice_is_identity() -> Result<()> {
        let pixels: Vec<u8> = (0..(4 * 5 * 3)).map(|i| i as u8).collect();
        let mut frame = RawFrame::new(pixels.clone(), 4, 5)?;
        frame.flip_vertical();
        assert_ne!(frame.pixels(), pixels.as_slice());
        frame.flip_vertical();
        assert_eq!(frame.pixels(), pixels.as_slice());
        Ok(())
    }
}
