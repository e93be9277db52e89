//! Evidence inputs: owned RGB pixel buffers and UTF-8 text batches.
//!
//! Anything that is neither a decodable image blob nor plain text is
//! rejected up front with `ScreenError::InvalidInput`.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ScreenError;

/// Owned 8-bit RGB buffer. All pipeline stages operate on this type so the
/// decoders stay at the crate edge.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    /// Row-major RGB triples, `width * height * 3` bytes.
    data: Vec<u8>,
}

impl PixelBuffer {
    pub fn from_rgb8(width: u32, height: u32, data: Vec<u8>) -> Result<Self, ScreenError> {
        let expected = width as usize * height as usize * 3;
        if width == 0 || height == 0 || data.len() != expected {
            return Err(ScreenError::InvalidInput(format!(
                "expected {}x{}x3 = {} bytes, got {}",
                width,
                height,
                expected,
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Decode an arbitrary image blob (JPEG/PNG) into an RGB buffer.
    pub fn decode(blob: &[u8]) -> Result<Self, ScreenError> {
        let img = image::load_from_memory(blob)
            .map_err(|e| ScreenError::InvalidInput(format!("undecodable image blob: {e}")))?;
        let rgb = img.to_rgb8();
        let (width, height) = rgb.dimensions();
        Self::from_rgb8(width, height, rgb.into_raw())
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// RGB triple at (x, y). Caller guarantees in-bounds coordinates.
    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> (u8, u8, u8) {
        let idx = (y as usize * self.width as usize + x as usize) * 3;
        (self.data[idx], self.data[idx + 1], self.data[idx + 2])
    }

    /// Mean of the RGB channels at (x, y).
    #[inline]
    pub fn brightness(&self, x: u32, y: u32) -> f32 {
        let (r, g, b) = self.pixel(x, y);
        (r as f32 + g as f32 + b as f32) / 3.0
    }

    /// Nearest-neighbour resample into a `side`×`side` RGB buffer. Good
    /// enough for content hashing and the heuristic detector; inference
    /// preprocessing uses proper letterboxing instead.
    pub fn downsample(&self, side: u32) -> Vec<u8> {
        let mut out = Vec::with_capacity(side as usize * side as usize * 3);
        for y in 0..side {
            for x in 0..side {
                let sx = (x as u64 * self.width as u64 / side as u64) as u32;
                let sy = (y as u64 * self.height as u64 / side as u64) as u32;
                let (r, g, b) = self.pixel(sx.min(self.width - 1), sy.min(self.height - 1));
                out.extend_from_slice(&[r, g, b]);
            }
        }
        out
    }

    /// Stable content hash over a 32x32 downsample. Keyed caches use this
    /// so re-encoded copies of the same picture still hit.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.downsample(32));
        hex_string(&hasher.finalize())
    }
}

/// One unit of evidence entering the pipeline.
#[derive(Debug, Clone)]
pub enum EvidenceInput {
    Image(PixelBuffer),
    /// A batch of plain UTF-8 messages screened together.
    Texts(Vec<String>),
}

impl EvidenceInput {
    pub fn kind(&self) -> EvidenceKind {
        match self {
            EvidenceInput::Image(_) => EvidenceKind::Image,
            EvidenceInput::Texts(_) => EvidenceKind::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    Image,
    Text,
}

/// SHA-256 of the lower-cased, trimmed text. Cache key for text verdicts.
pub fn text_hash(text: &str) -> String {
    let normalized = text.trim().to_lowercase();
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex_string(&hasher.finalize())
}

fn hex_string(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(out, "{b:02x}");
    }
    out
}
