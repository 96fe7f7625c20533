//! Compression levels for derived image variants.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed transform parameters for one level: a scale-down bounding box plus a
/// JPEG quality factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformParams {
    pub width: u32,
    pub height: u32,
    pub quality: u8,
}

/// Quality tier of a derived variant. Each level maps to a distinct, fixed
/// (bounding box, quality) pair and to its own cache namespace, so levels
/// never collide with each other or with originals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionLevel {
    Low,
    Mid,
    High,
}

impl CompressionLevel {
    pub const ALL: [CompressionLevel; 3] = [
        CompressionLevel::Low,
        CompressionLevel::Mid,
        CompressionLevel::High,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CompressionLevel::Low => "low",
            CompressionLevel::Mid => "mid",
            CompressionLevel::High => "high",
        }
    }

    /// Parse a client-supplied level. Unrecognized values are `None`; the
    /// read path degrades to serving the original rather than erroring.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "low" => Some(CompressionLevel::Low),
            "mid" => Some(CompressionLevel::Mid),
            "high" => Some(CompressionLevel::High),
            _ => None,
        }
    }

    pub fn params(self) -> TransformParams {
        match self {
            CompressionLevel::Low => TransformParams {
                width: 720,
                height: 720,
                quality: 24,
            },
            CompressionLevel::Mid => TransformParams {
                width: 1080,
                height: 1080,
                quality: 42,
            },
            CompressionLevel::High => TransformParams {
                width: 2160,
                height: 2160,
                quality: 84,
            },
        }
    }
}

impl fmt::Display for CompressionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
