//! Shape contract between a backbone and a head.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Tensor shape description; every dimension is optional.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShapeSpec {
    #[serde(default)]
    pub channels: Option<usize>,
    #[serde(default)]
    pub height: Option<usize>,
    #[serde(default)]
    pub width: Option<usize>,
}

impl ShapeSpec {
    pub fn new(channels: Option<usize>, height: Option<usize>, width: Option<usize>) -> Self {
        Self {
            channels,
            height,
            width,
        }
    }

    /// Shape with only the channel count known.
    pub fn channels(channels: usize) -> Self {
        Self {
            channels: Some(channels),
            ..Self::default()
        }
    }

    pub fn with_spatial(mut self, height: usize, width: usize) -> Self {
        self.height = Some(height);
        self.width = Some(width);
        self
    }
}

impl fmt::Display for ShapeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dim = |d: Option<usize>| d.map_or_else(|| "?".to_string(), |v| v.to_string());
        write!(
            f,
            "({}, {}, {})",
            dim(self.channels),
            dim(self.height),
            dim(self.width)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_marks_unknown_dims() {
        assert_eq!(ShapeSpec::channels(3).to_string(), "(3, ?, ?)");
        assert_eq!(
            ShapeSpec::channels(512).with_spatial(7, 7).to_string(),
            "(512, 7, 7)"
        );
    }

    #[test]
    fn test_deserialize_partial() {
        let shape: ShapeSpec = serde_json::from_str(r#"{ "channels": 1 }"#).unwrap();
        assert_eq!(shape, ShapeSpec::channels(1));
    }
}
