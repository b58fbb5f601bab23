//! Injectable randomness for lag and window features.

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_NOISE_STD_DEV: f64 = 1.6;

pub trait NoiseSource {
    fn sample(&mut self) -> f64;
}

/// Always returns 0.0.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZeroNoise;

impl NoiseSource for ZeroNoise {
    fn sample(&mut self) -> f64 {
        0.0
    }
}

/// Zero-mean Gaussian samples from an owned generator.
#[derive(Debug, Clone)]
pub struct GaussianNoise {
    rng: StdRng,
    normal: Normal<f64>,
}

#[derive(Debug, Error, PartialEq)]
pub enum NoiseError {
    #[error("noise standard deviation must be finite and >= 0, got {0}")]
    InvalidStdDev(f64),
}

impl GaussianNoise {
    pub fn seeded(std_dev: f64, seed: u64) -> Result<Self, NoiseError> {
        Ok(Self {
            rng: StdRng::seed_from_u64(seed),
            normal: normal(std_dev)?,
        })
    }

    pub fn from_entropy(std_dev: f64) -> Result<Self, NoiseError> {
        Ok(Self {
            rng: StdRng::from_entropy(),
            normal: normal(std_dev)?,
        })
    }
}

impl NoiseSource for GaussianNoise {
    fn sample(&mut self) -> f64 {
        self.normal.sample(&mut self.rng)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoisePolicy {
    Disabled,
    Seeded(u64),
    Entropy,
}

impl Default for NoisePolicy {
    fn default() -> Self {
        Self::Seeded(0)
    }
}

impl NoisePolicy {
    pub fn build(self, std_dev: f64) -> Result<Box<dyn NoiseSource + Send>, NoiseError> {
        match self {
            Self::Disabled => Ok(Box::new(ZeroNoise)),
            Self::Seeded(seed) => Ok(Box::new(GaussianNoise::seeded(std_dev, seed)?)),
            Self::Entropy => Ok(Box::new(GaussianNoise::from_entropy(std_dev)?)),
        }
    }
}

fn normal(std_dev: f64) -> Result<Normal<f64>, NoiseError> {
    if !std_dev.is_finite() || std_dev < 0.0 {
        return Err(NoiseError::InvalidStdDev(std_dev));
    }
    Normal::new(0.0, std_dev).map_err(|_| NoiseError::InvalidStdDev(std_dev))
}
