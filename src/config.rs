//! Crate-wide configuration and constants.
//!
//! This module centralizes all tuning values, whether loaded from a TOML file,
//! from environment variables, or defined as constants, so capacity and
//! concurrency defaults live in one place.

use std::path::Path;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::{LatticeError, Result};

/// Allocation hints for the backpointer table and synchronized arrays.
pub mod alloc {
    /// Initial number of frames to reserve per utterance.
    pub const N_FRAME_ALLOC: usize = 512;

    /// Initial number of backpointer entries to reserve per utterance.
    pub const N_ENT_ALLOC: usize = 4096;

    /// Initial capacity of a synchronized array window.
    pub const ARRAY_CAPACITY: usize = 256;
}

/// Holder accounting limits for synchronized arrays.
pub mod holders {
    /// Maximum simultaneous holders of one array (producer plus consumers).
    pub const MAX_HOLDERS: usize = 255;
}

// Default value functions for serde defaults
fn default_n_frame_alloc() -> usize {
    alloc::N_FRAME_ALLOC
}
fn default_n_ent_alloc() -> usize {
    alloc::N_ENT_ALLOC
}
fn default_array_capacity() -> usize {
    alloc::ARRAY_CAPACITY
}

/// Lattice store configuration loaded from multiple sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatticeConfig {
    /// Initial number of frames to reserve per utterance.
    #[serde(default = "default_n_frame_alloc")]
    pub n_frame_alloc: usize,

    /// Initial number of backpointer entries to reserve per utterance.
    #[serde(default = "default_n_ent_alloc")]
    pub n_ent_alloc: usize,

    /// Initial capacity of a synchronized array window.
    #[serde(default = "default_array_capacity")]
    pub array_capacity: usize,
}

impl Default for LatticeConfig {
    fn default() -> Self {
        Self {
            n_frame_alloc: default_n_frame_alloc(),
            n_ent_alloc: default_n_ent_alloc(),
            array_capacity: default_array_capacity(),
        }
    }
}

impl LatticeConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Environment variables prefixed `LATTICE_` (highest priority)
    /// 2. lattice.toml (if it exists)
    /// 3. Built-in defaults (lowest priority)
    pub fn load() -> Result<Self> {
        Self::extract(Self::default_figment().merge(Toml::file("lattice.toml")))
    }

    /// Load configuration from an explicit TOML file plus the environment.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::extract(Self::default_figment().merge(Toml::file(path.as_ref())))
    }

    fn extract(figment: Figment) -> Result<Self> {
        let config: LatticeConfig = figment
            .merge(Env::prefixed("LATTICE_"))
            .extract()
            .map_err(|e| LatticeError::Config(format!("failed to load configuration: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Generate default configuration values.
    fn default_figment() -> Figment {
        use figment::providers::Serialized;

        Figment::from(Serialized::defaults(LatticeConfig::default()))
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.n_frame_alloc == 0 {
            return Err(LatticeError::Config(
                "n_frame_alloc must be at least 1".to_string(),
            ));
        }

        if self.n_ent_alloc == 0 {
            return Err(LatticeError::Config(
                "n_ent_alloc must be at least 1".to_string(),
            ));
        }

        if self.array_capacity == 0 {
            return Err(LatticeError::Config(
                "array_capacity must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Export configuration to TOML format.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| LatticeError::Config(format!("failed to serialize to TOML: {}", e)))
    }
}

static GLOBAL_CONFIG: Lazy<LatticeConfig> = Lazy::new(LatticeConfig::default);

/// Process-wide default configuration (built-in defaults, no file or
/// environment lookup). Callers that need overrides use [`LatticeConfig::load`].
pub fn global() -> &'static LatticeConfig {
    &GLOBAL_CONFIG
}
