//! Activation catalogue.

use crate::error::RegistryError;
use crate::registry::Registry;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Activation {
    Mish,
    #[serde(rename = "GELU")]
    Gelu,
    #[serde(rename = "LeakyReLU")]
    LeakyRelu,
    #[serde(rename = "ReLU")]
    Relu,
    Sigmoid,
    #[serde(rename = "SiLU")]
    Silu,
    Softmax,
    Tanh,
}

impl Activation {
    pub const ALL: [Activation; 8] = [
        Self::Mish,
        Self::Gelu,
        Self::LeakyRelu,
        Self::Relu,
        Self::Sigmoid,
        Self::Silu,
        Self::Softmax,
        Self::Tanh,
    ];

    /// Registry name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Mish => "Mish",
            Self::Gelu => "GELU",
            Self::LeakyRelu => "LeakyReLU",
            Self::Relu => "ReLU",
            Self::Sigmoid => "Sigmoid",
            Self::Silu => "SiLU",
            Self::Softmax => "Softmax",
            Self::Tanh => "Tanh",
        }
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub fn register_activations(registry: &mut Registry<Activation>) -> Result<(), RegistryError> {
    for act in Activation::ALL {
        registry.register(act.name(), act)?;
    }
    Ok(())
}
