//! Engine configuration

use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::ddpm::DiffusionEngine;
use crate::error::DiffusionError;
use crate::scheduler::generate_linear_schedule;

/// Variance used by the reverse sampling step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarianceMode {
    /// Posterior variance β̃_t = (1 - ᾱ_{t-1}) / (1 - ᾱ_t) · β_t
    #[default]
    Posterior,
    /// Fixed variance β_t
    BetaT,
}

impl VarianceMode {
    /// Parse a variance mode from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "posterior" => Some(Self::Posterior),
            "beta_t" | "beta" | "betat" => Some(Self::BetaT),
            _ => None,
        }
    }

    /// Get the variance mode name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Posterior => "posterior",
            Self::BetaT => "beta_t",
        }
    }
}

/// Configuration for a [`DiffusionEngine`] with a linear schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffusionConfig {
    /// Diffusion horizon T
    pub horizon: usize,
    /// Beta at t = 1
    pub beta_low: f64,
    /// Beta at t = T
    pub beta_high: f64,
    /// Seed of the engine's noise stream
    pub seed: u64,
    /// Variance used when sampling
    pub variance_mode: VarianceMode,
}

impl Default for DiffusionConfig {
    fn default() -> Self {
        Self {
            horizon: 1000,
            beta_low: 1e-4,
            beta_high: 0.02,
            seed: 0,
            variance_mode: VarianceMode::Posterior,
        }
    }
}

impl DiffusionConfig {
    /// Create a config with the given schedule bounds and default seed and mode
    pub fn new(horizon: usize, beta_low: f64, beta_high: f64) -> Self {
        Self {
            horizon,
            beta_low,
            beta_high,
            ..Default::default()
        }
    }

    /// Set the noise stream seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the variance used by the reverse step
    pub fn with_variance_mode(mut self, variance_mode: VarianceMode) -> Self {
        self.variance_mode = variance_mode;
        self
    }

    /// Check the schedule bounds without building anything
    pub fn validate(&self) -> Result<(), DiffusionError> {
        generate_linear_schedule(0, self.beta_low, self.beta_high).map(|_| ())
    }

    /// Build the schedule and the engine on `device`
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Result<DiffusionEngine<B>, DiffusionError> {
        let schedule = generate_linear_schedule(self.horizon, self.beta_low, self.beta_high)?;
        let engine = DiffusionEngine::new(schedule, self.seed, device);
        Ok(engine.with_variance_mode(self.variance_mode))
    }
}
