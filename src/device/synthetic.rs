//! Synthetic capture device (`stub://<name>`).
//!
//! Produces a moving RGB gradient so the stream and snapshot paths can run
//! without camera hardware. Honors resolution hints exactly.

use anyhow::{anyhow, Result};

use super::CaptureDevice;
use crate::frame::{rgb_len, RawFrame};

const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const MAX_DIMENSION: u32 = 8192;

pub struct SyntheticDevice {
    name: String,
    width: u32,
    height: u32,
    frame_count: u64,
    released: bool,
}

impl SyntheticDevice {
    pub fn new(name: &str) -> Self {
        log::info!("SyntheticDevice: opened {}", name);
        Self {
            name: name.to_string(),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            frame_count: 0,
            released: false,
        }
    }

    pub fn frames_captured(&self) -> u64 {
        self.frame_count
    }

    fn generate_pixels(&self) -> Result<Vec<u8>> {
        let mut pixels = vec![0u8; rgb_len(self.width, self.height)?];
        let w = self.width as usize;
        let shift = self.frame_count as usize;
        for (i, px) in pixels.chunks_exact_mut(3).enumerate() {
            let x = i % w;
            let y = i / w;
            px[0] = ((x + shift) % 256) as u8;
            px[1] = ((y + shift / 2) % 256) as u8;
            px[2] = ((x ^ y) % 256) as u8;
        }
        Ok(pixels)
    }
}

impl CaptureDevice for SyntheticDevice {
    fn describe(&self) -> String {
        self.name.clone()
    }

    fn request_resolution(&mut self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
            return Err(anyhow!("unsupported resolution {}x{}", width, height));
        }
        self.width = width;
        self.height = height;
        Ok(())
    }

    fn read(&mut self) -> Result<RawFrame> {
        if self.released {
            return Err(anyhow!("{} released", self.name));
        }
        self.frame_count += 1;
        let pixels = self.generate_pixels()?;
        RawFrame::new(pixels, self.width, self.height)
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            log::info!(
                "SyntheticDevice: released {} after {} frames",
                self.name,
                self.frame_count
            );
        }
    }
}
