//! Cumulative forward-process parameters q(x_t | x_0)
//!
//! With `α_t = 1 - β_t` and `ᾱ_t = ∏_{s≤t} α_s`, the jump from clean data to
//! step `t` is `q(x_t | x_0) = N(√ᾱ_t · x_0, (1 - ᾱ_t) · I)`.

use crate::error::DiffusionError;
use crate::scheduler::VarianceSchedule;

/// Gaussian parameters of a forward jump `0 -> t`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForwardJump {
    /// `√ᾱ_t`
    pub scale: f64,
    /// `1 - ᾱ_t`
    pub var: f64,
}

/// Precomputed per-timestep forward-process arrays, indexed `0..=T`
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardJumpProbability {
    alpha: Vec<f64>,
    alpha_bar: Vec<f64>,
    scale: Vec<f64>,
    var: Vec<f64>,
}

impl ForwardJumpProbability {
    /// Derive the cumulative arrays from a schedule
    ///
    /// `ᾱ` is a running product in increasing `t`. `1 - ᾱ` comes from a
    /// running sum of `ln(1 - β)` through `expm1`, which keeps it accurate
    /// where `ᾱ` is close to 1. A saturated `ᾱ` is stored as 0; queries that
    /// divide by it report the instability.
    pub fn from_schedule(schedule: &VarianceSchedule) -> Self {
        let len = schedule.beta().len();
        let mut alpha = Vec::with_capacity(len);
        let mut alpha_bar = Vec::with_capacity(len);
        let mut var = Vec::with_capacity(len);

        let mut prod = 1.0f64;
        let mut log_prod = 0.0f64;
        for &beta in schedule.beta() {
            let a = 1.0 - beta;
            prod *= a;
            log_prod += (-beta).ln_1p();

            alpha.push(a);
            alpha_bar.push(prod);
            var.push(-log_prod.exp_m1());
        }

        let scale = alpha_bar.iter().map(|a| a.sqrt()).collect();

        Self {
            alpha,
            alpha_bar,
            scale,
            var,
        }
    }

    /// Horizon `T` the arrays were built for
    pub fn horizon(&self) -> usize {
        self.alpha.len() - 1
    }

    /// Forward jump parameters at `t`, for `t` in `0..=T`
    pub fn at(&self, t: usize) -> Result<ForwardJump, DiffusionError> {
        if t > self.horizon() {
            return Err(DiffusionError::TimestepOutOfRange {
                t,
                min: 0,
                max: self.horizon(),
            });
        }
        Ok(ForwardJump {
            scale: self.scale[t],
            var: self.var[t],
        })
    }

    /// `α_t = 1 - β_t`
    pub fn alpha(&self) -> &[f64] {
        &self.alpha
    }

    /// `ᾱ_t`, with `ᾱ_0 = 1`
    pub fn alpha_bar(&self) -> &[f64] {
        &self.alpha_bar
    }

    /// `√ᾱ_t`
    pub fn scale(&self) -> &[f64] {
        &self.scale
    }

    /// `1 - ᾱ_t`
    pub fn var(&self) -> &[f64] {
        &self.var
    }
}
