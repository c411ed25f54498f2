//! Camera frame handling.
//! The continue endpoint returns the current webcam frame as image bytes.
//! Only the latest frame is kept: `FrameSlot` releases the previous frame
//! before installing a new one and on teardown, and counts both so the
//! one-live-frame invariant can be checked.
//! Debug: set `frame_dump_dir` (or `MEMOCHESS_FRAME_DIR`) to write each
//! installed frame to disk as PNG.

use anyhow::{Context, Result};
use image::{DynamicImage, GenericImageView, ImageFormat};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// An undecoded camera frame as served by the vision service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    bytes: Vec<u8>,
    content_type: Option<String>,
}

impl Frame {
    pub fn new(bytes: Vec<u8>, content_type: Option<String>) -> Self {
        Self { bytes, content_type }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Decodes the frame in the format named by its content type, falling
    /// back to sniffing the bytes when the type is missing or unknown.
    pub fn decode(&self) -> Result<DynamicImage> {
        if self.is_empty() {
            anyhow::bail!("Frame is empty - camera returned no image data");
        }
        let declared = self.content_type.as_deref().and_then(|mime| {
            // Drop parameters such as "; charset=binary".
            let essence = mime.split(';').next().unwrap_or(mime).trim();
            ImageFormat::from_mime_type(essence)
        });
        match declared {
            Some(format) => image::load_from_memory_with_format(&self.bytes, format)
                .with_context(|| format!("Failed to decode camera frame as {format:?}")),
            None => image::load_from_memory(&self.bytes).context("Failed to decode camera frame"),
        }
    }

    /// Decodes and saves the frame as `frame-<seq>.png` under `dir`.
    pub fn save_png(&self, dir: &Path, seq: u64) -> Result<PathBuf> {
        let start = Instant::now();
        let img = self.decode()?;
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create frame directory {}", dir.display()))?;
        let path = dir.join(format!("frame-{seq:06}.png"));
        img.save(&path)
            .with_context(|| format!("Failed to save frame to {}", path.display()))?;
        let (w, h) = img.dimensions();
        tracing::debug!(path = %path.display(), w, h, elapsed = ?start.elapsed(), "frame saved");
        Ok(path)
    }
}

/// Holder of the single live frame.
#[derive(Debug, Default)]
pub struct FrameSlot {
    current: Option<Frame>,
    installed: u64,
    released: u64,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Releases the held frame, then takes ownership of `frame`.
    pub fn install(&mut self, frame: Frame) {
        self.release();
        self.current = Some(frame);
        self.installed += 1;
    }

    /// Drops the held frame, if any.
    pub fn release(&mut self) {
        if self.current.take().is_some() {
            self.released += 1;
        }
    }

    pub fn current(&self) -> Option<&Frame> {
        self.current.as_ref()
    }

    /// Number of frames currently held (0 or 1).
    pub fn live(&self) -> u64 {
        self.installed - self.released
    }

    pub fn installed(&self) -> u64 {
        self.installed
    }

    pub fn released(&self) -> u64 {
        self.released
    }
}

impl Drop for FrameSlot {
    fn drop(&mut self) {
        self.release();
    }
}
