//! Variance schedules for DDPM
//!
//! A schedule is the per-step noise variance `β_t` over a horizon `T`,
//! stored with a sentinel `β_0 = 0` so that index `t` is the timestep itself.
//! The single-step transition q(x_t | x_{t-1}) = N(√(1-β_t)·x_{t-1}, β_t·I)
//! is exposed alongside it as `scale` and `var`.

use tracing::debug;

use crate::error::DiffusionError;

/// Produces the betas for timesteps `1..=T`
///
/// Implementations only decide the shape of the curve. The sentinel at
/// index 0 and the range checks are applied by [`VarianceSchedule::from_generator`].
pub trait ScheduleGenerator {
    /// Returns `horizon` values, the betas for timesteps `1..=horizon`
    fn betas(&self, horizon: usize) -> Result<Vec<f64>, DiffusionError>;
}

/// Linear beta schedule from `beta_low` (at t = 1) to `beta_high` (at t = T)
///
/// This is the schedule of Ho et al. 2020 (1e-4 to 0.02 over 1000 steps).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearSchedule {
    /// Beta at the first diffusion step
    pub beta_low: f64,
    /// Beta at the last diffusion step
    pub beta_high: f64,
}

impl LinearSchedule {
    /// Create a linear schedule, checking `0 <= beta_low <= beta_high < 1`
    pub fn new(beta_low: f64, beta_high: f64) -> Result<Self, DiffusionError> {
        if !(0.0..1.0).contains(&beta_low) {
            return Err(DiffusionError::config(format!(
                "beta_low must lie in [0, 1), got {beta_low}"
            )));
        }
        if !(0.0..1.0).contains(&beta_high) {
            return Err(DiffusionError::config(format!(
                "beta_high must lie in [0, 1), got {beta_high}"
            )));
        }
        if beta_low > beta_high {
            return Err(DiffusionError::config(format!(
                "beta_low ({beta_low}) exceeds beta_high ({beta_high})"
            )));
        }

        Ok(Self {
            beta_low,
            beta_high,
        })
    }
}

impl Default for LinearSchedule {
    fn default() -> Self {
        Self {
            beta_low: 1e-4,
            beta_high: 0.02,
        }
    }
}

impl ScheduleGenerator for LinearSchedule {
    fn betas(&self, horizon: usize) -> Result<Vec<f64>, DiffusionError> {
        // Same spacing as linspace(beta_low, beta_high, horizon)
        let denom = horizon.saturating_sub(1).max(1) as f64;
        Ok((0..horizon)
            .map(|i| {
                let frac = i as f64 / denom;
                self.beta_low + frac * (self.beta_high - self.beta_low)
            })
            .collect())
    }
}

/// Per-timestep noise variance and the single-step transition parameters
///
/// All three sequences have length `T + 1`. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct VarianceSchedule {
    beta: Vec<f64>,
    scale: Vec<f64>,
    var: Vec<f64>,
}

impl VarianceSchedule {
    /// Build a schedule from the betas of timesteps `1..=T`
    ///
    /// The sentinel `β_0 = 0` is prepended. Every value must be finite and
    /// lie in `[0, 1)`.
    pub fn from_betas(betas: Vec<f64>) -> Result<Self, DiffusionError> {
        if let Some((i, b)) = betas
            .iter()
            .enumerate()
            .find(|(_, b)| !(0.0..1.0).contains(*b))
        {
            return Err(DiffusionError::config(format!(
                "beta[{}] = {b} is outside [0, 1)",
                i + 1
            )));
        }

        let mut beta = Vec::with_capacity(betas.len() + 1);
        beta.push(0.0);
        beta.extend(betas);

        let scale = beta.iter().map(|b| (1.0 - b).sqrt()).collect();
        let var = beta.clone();

        Ok(Self { beta, scale, var })
    }

    /// Build a schedule over `horizon` steps from any generator
    pub fn from_generator<G: ScheduleGenerator + ?Sized>(
        generator: &G,
        horizon: usize,
    ) -> Result<Self, DiffusionError> {
        let betas = generator.betas(horizon)?;
        if betas.len() != horizon {
            return Err(DiffusionError::config(format!(
                "schedule generator returned {} betas for a horizon of {horizon}",
                betas.len()
            )));
        }
        Self::from_betas(betas)
    }

    /// Diffusion horizon `T`
    pub fn horizon(&self) -> usize {
        self.beta.len() - 1
    }

    /// `β_t` for `t` in `0..=T`, with `β_0 = 0`
    pub fn beta(&self) -> &[f64] {
        &self.beta
    }

    /// Single-step transition scale `√(1 - β_t)`
    pub fn scale(&self) -> &[f64] {
        &self.scale
    }

    /// Single-step transition variance `β_t`
    pub fn var(&self) -> &[f64] {
        &self.var
    }
}

/// Generate a linear variance schedule over `horizon` steps
///
/// `horizon = 0` yields only the sentinel step: the model is the identity.
pub fn generate_linear_schedule(
    horizon: usize,
    beta_low: f64,
    beta_high: f64,
) -> Result<VarianceSchedule, DiffusionError> {
    let generator = LinearSchedule::new(beta_low, beta_high)?;
    let schedule = VarianceSchedule::from_generator(&generator, horizon)?;

    debug!(horizon, beta_low, beta_high, "generated linear variance schedule");
    Ok(schedule)
}
