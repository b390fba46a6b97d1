//! Data-source contract and sample inputs.
//!
//! Loading and decoding belong to the surrounding engine; the core only
//! needs to know how many batches an epoch holds.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Anything that yields batches for one stage.
pub trait DataSource: Send + Sync {
    /// Batches per epoch.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A fixed list of batches held in memory.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InMemorySource<B> {
    batches: Vec<B>,
}

impl<B> InMemorySource<B> {
    pub fn new(batches: Vec<B>) -> Self {
        Self { batches }
    }

    pub fn batches(&self) -> &[B] {
        &self.batches
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &B)> {
        self.batches.iter().enumerate()
    }
}

impl<B: Send + Sync> DataSource for InMemorySource<B> {
    fn len(&self) -> usize {
        self.batches.len()
    }
}

/// Placeholder source that only reports a length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizedSource(pub usize);

impl DataSource for SizedSource {
    fn len(&self) -> usize {
        self.0
    }
}

/// One input sample, either still on disk or already in memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DataSample {
    Path {
        path: PathBuf,
        #[serde(default)]
        label: Option<usize>,
    },
    Labeled {
        pixels: Vec<f32>,
        #[serde(default)]
        shape: Vec<usize>,
        label: usize,
    },
}

impl DataSample {
    pub fn label(&self) -> Option<usize> {
        match self {
            Self::Path { label, .. } => *label,
            Self::Labeled { label, .. } => Some(*label),
        }
    }

    /// Short description used in log lines.
    pub fn describe(&self) -> String {
        match self {
            Self::Path { path, .. } => format!("file {}", path.display()),
            Self::Labeled { shape, .. } => format!("in-memory sample of shape {shape:?}"),
        }
    }
}
