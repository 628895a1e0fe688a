//! DDPM (Denoising Diffusion Probabilistic Models) engine
//!
//! Holds a variance schedule, the cumulative forward-process arrays derived
//! from it, and a seeded noise stream. Answers three kinds of query:
//!
//! - forward jumps q(x_t | x_0)
//! - the exact posterior q(x_{t-1} | x_t, x_0) given a clean sample
//! - the epsilon-parameterized reverse step used at sampling time
//!
//! Every query is a lookup into arrays built once in [`DiffusionEngine::new`].
//! Tensor operations act elementwise over a leading batch axis.

use burn::prelude::*;
use tracing::{debug, trace};

use crate::config::VarianceMode;
use crate::error::DiffusionError;
use crate::forward::{ForwardJump, ForwardJumpProbability};
use crate::noise::NoiseStream;
use crate::scheduler::VarianceSchedule;

/// Denominators at or below this are treated as zero
const MIN_DENOMINATOR: f64 = 1e-20;

/// Noise predictor consumed by the sampling loop
///
/// Returns `ε̂` shaped like `x_t`. Closures `Fn(Tensor, usize) -> Tensor`
/// implement this directly.
pub trait Denoiser<B: Backend, const D: usize> {
    fn predict_noise(&self, x_t: Tensor<B, D>, t: usize) -> Tensor<B, D>;
}

impl<B, F, const D: usize> Denoiser<B, D> for F
where
    B: Backend,
    F: Fn(Tensor<B, D>, usize) -> Tensor<B, D>,
{
    fn predict_noise(&self, x_t: Tensor<B, D>, t: usize) -> Tensor<B, D> {
        self(x_t, t)
    }
}

/// Scalar coefficients of q(x_{t-1} | x_t, x_0)
///
/// mean = `scale · x_t + bias_coef · x_0`, variance = `var`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PosteriorCoefficients {
    /// `√α_t (1 - ᾱ_{t-1}) / (1 - ᾱ_t)`
    pub scale: f64,
    /// `√ᾱ_{t-1} β_t / (1 - ᾱ_t)`
    pub bias_coef: f64,
    /// `(1 - ᾱ_{t-1}) / (1 - ᾱ_t) · β_t`
    pub var: f64,
}

/// Backward step distribution for a batch of clean samples
///
/// `x_{t-1} ~ N(scale · x_t + bias, var · I)`
#[derive(Debug, Clone)]
pub struct BackwardStepProbability<B: Backend, const D: usize> {
    pub scale: f64,
    pub bias: Tensor<B, D>,
    pub var: f64,
}

impl<B: Backend, const D: usize> BackwardStepProbability<B, D> {
    /// Posterior mean for the given `x_t`
    pub fn mean(&self, x_t: Tensor<B, D>) -> Tensor<B, D> {
        x_t * self.scale as f32 + self.bias.clone()
    }
}

/// DDPM engine
///
/// The precomputed arrays are read-only. The only mutable state is the
/// engine's noise stream; chains that share one engine can bring their own
/// stream through [`DiffusionEngine::reverse_step_with`].
pub struct DiffusionEngine<B: Backend> {
    /// Variance schedule the engine was built from
    schedule: VarianceSchedule,
    /// Cumulative forward-process arrays
    forward: ForwardJumpProbability,
    /// `√ᾱ_t` on the engine device
    forward_scale: Tensor<B, 1>,
    /// `√(1 - ᾱ_t)` on the engine device
    forward_std: Tensor<B, 1>,
    /// Variance used by the reverse step
    variance_mode: VarianceMode,
    /// Engine-owned noise stream
    stream: NoiseStream,
    /// Placement of all tensors the engine creates
    device: B::Device,
}

impl<B: Backend> DiffusionEngine<B> {
    /// Create an engine, precomputing the forward-process arrays
    pub fn new(schedule: VarianceSchedule, seed: u64, device: &B::Device) -> Self {
        let forward = ForwardJumpProbability::from_schedule(&schedule);
        let len = schedule.beta().len();

        let scale: Vec<f32> = forward.scale().iter().map(|&s| s as f32).collect();
        let std: Vec<f32> = forward.var().iter().map(|&v| v.sqrt() as f32).collect();
        let forward_scale = Tensor::from_data(TensorData::new(scale, [len]), device);
        let forward_std = Tensor::from_data(TensorData::new(std, [len]), device);

        debug!(
            horizon = schedule.horizon(),
            seed,
            alpha_bar_final = forward.alpha_bar()[len - 1],
            "initialized diffusion engine"
        );

        Self {
            schedule,
            forward,
            forward_scale,
            forward_std,
            variance_mode: VarianceMode::default(),
            stream: NoiseStream::new(seed),
            device: device.clone(),
        }
    }

    /// Set the variance used by the reverse step
    pub fn with_variance_mode(mut self, variance_mode: VarianceMode) -> Self {
        self.variance_mode = variance_mode;
        self
    }

    /// Diffusion horizon T
    pub fn horizon(&self) -> usize {
        self.schedule.horizon()
    }

    /// Get the variance schedule
    pub fn schedule(&self) -> &VarianceSchedule {
        &self.schedule
    }

    /// Cumulative forward-process arrays
    pub fn forward_jumps(&self) -> &ForwardJumpProbability {
        &self.forward
    }

    /// Get the reverse-step variance mode
    pub fn variance_mode(&self) -> VarianceMode {
        self.variance_mode
    }

    /// Get the device the engine places tensors on
    pub fn device(&self) -> &B::Device {
        &self.device
    }

    /// Derive a new independent noise stream from the engine's stream
    pub fn fork_stream(&mut self) -> NoiseStream {
        self.stream.fork()
    }

    /// Parameters of q(x_t | x_0) for `t` in `0..=T`
    pub fn forward_jump_params(&self, t: usize) -> Result<ForwardJump, DiffusionError> {
        self.forward.at(t)
    }

    /// `x_t = √ᾱ_t · x_0 + √(1 - ᾱ_t) · noise`
    pub fn forward_sample<const D: usize>(
        &self,
        x0: Tensor<B, D>,
        t: usize,
        noise: Tensor<B, D>,
    ) -> Result<Tensor<B, D>, DiffusionError> {
        check_shape(&x0, &noise)?;
        let jump = self.forward.at(t)?;
        Ok(x0 * jump.scale as f32 + noise * jump.var.sqrt() as f32)
    }

    /// Noise `x_0` to step `t`, drawing the noise from the engine stream
    ///
    /// Returns `(x_t, noise)`.
    pub fn add_noise<const D: usize>(
        &mut self,
        x0: Tensor<B, D>,
        t: usize,
    ) -> Result<(Tensor<B, D>, Tensor<B, D>), DiffusionError> {
        self.forward.at(t)?;
        let noise = self.stream.sample_tensor(x0.dims(), &self.device);
        let x_t = self.forward_sample(x0, t, noise.clone())?;
        Ok((x_t, noise))
    }

    /// Forward sample with one timestep per batch element
    ///
    /// `timesteps[i]` applies to `x0[i]`; the coefficients are gathered from
    /// the device-resident arrays.
    pub fn forward_sample_batch<const D: usize>(
        &self,
        x0: Tensor<B, D>,
        timesteps: &[usize],
        noise: Tensor<B, D>,
    ) -> Result<Tensor<B, D>, DiffusionError> {
        check_shape(&x0, &noise)?;
        let dims = x0.dims();
        if timesteps.len() != dims[0] {
            return Err(DiffusionError::ShapeMismatch {
                expected: vec![dims[0]],
                actual: vec![timesteps.len()],
            });
        }
        if let Some(&t) = timesteps.iter().find(|&&t| t > self.horizon()) {
            return Err(DiffusionError::TimestepOutOfRange {
                t,
                min: 0,
                max: self.horizon(),
            });
        }

        let indices: Vec<i64> = timesteps.iter().map(|&t| t as i64).collect();
        let indices: Tensor<B, 1, Int> =
            Tensor::from_data(TensorData::new(indices, [dims[0]]), &self.device);

        let mut coef_dims = [1usize; D];
        coef_dims[0] = dims[0];

        let scale: Tensor<B, D> = self
            .forward_scale
            .clone()
            .select(0, indices.clone())
            .reshape(coef_dims);
        let std: Tensor<B, D> = self
            .forward_std
            .clone()
            .select(0, indices)
            .reshape(coef_dims);

        Ok(x0 * scale.expand(dims) + noise * std.expand(dims))
    }

    /// Scalar coefficients of the exact posterior at `t` in `1..=T`
    ///
    /// At `t = 1` the posterior collapses onto `x_0`: scale 0, bias
    /// coefficient 1, variance 0.
    pub fn posterior_coefficients(&self, t: usize) -> Result<PosteriorCoefficients, DiffusionError> {
        self.check_step(t)?;

        if t == 1 {
            return Ok(PosteriorCoefficients {
                scale: 0.0,
                bias_coef: 1.0,
                var: 0.0,
            });
        }

        let beta = self.schedule.beta()[t];
        let alpha = self.forward.alpha()[t];
        let alpha_bar_prev = self.forward.alpha_bar()[t - 1];
        let var_prev = self.forward.var()[t - 1];
        let denom = self.forward.var()[t];

        if denom <= MIN_DENOMINATOR {
            return Err(DiffusionError::unstable(t, format!("1 - alpha_bar[t] = {denom}")));
        }

        let coefs = PosteriorCoefficients {
            scale: alpha.sqrt() * var_prev / denom,
            bias_coef: alpha_bar_prev.sqrt() * beta / denom,
            var: var_prev / denom * beta,
        };

        if !(coefs.scale.is_finite() && coefs.bias_coef.is_finite() && coefs.var.is_finite()) {
            return Err(DiffusionError::unstable(
                t,
                format!("non-finite posterior coefficients {coefs:?}"),
            ));
        }
        Ok(coefs)
    }

    /// Exact posterior q(x_{t-1} | x_t, x_0) for a batch of clean samples
    pub fn posterior_step<const D: usize>(
        &self,
        t: usize,
        x0: Tensor<B, D>,
    ) -> Result<BackwardStepProbability<B, D>, DiffusionError> {
        let coefs = self.posterior_coefficients(t)?;
        tensor_coef(t, coefs.scale, "posterior scale")?;

        // Exactly x0 at t = 1
        let bias = if coefs.bias_coef == 1.0 {
            x0
        } else {
            x0 * tensor_coef(t, coefs.bias_coef, "posterior bias coefficient")?
        };

        Ok(BackwardStepProbability {
            scale: coefs.scale,
            bias,
            var: coefs.var,
        })
    }

    /// Clean-sample estimate `x̂_0 = (x_t - √(1 - ᾱ_t) · ε̂) / √ᾱ_t`
    pub fn predict_x0<const D: usize>(
        &self,
        t: usize,
        x_t: Tensor<B, D>,
        eps_hat: Tensor<B, D>,
    ) -> Result<Tensor<B, D>, DiffusionError> {
        self.check_step(t)?;
        check_shape(&x_t, &eps_hat)?;

        let jump = self.forward.at(t)?;
        if jump.scale <= MIN_DENOMINATOR {
            return Err(DiffusionError::unstable(t, format!("sqrt(alpha_bar[t]) = {}", jump.scale)));
        }
        let inv_scale = tensor_coef(t, 1.0 / jump.scale, "1 / sqrt(alpha_bar[t])")?;

        Ok((x_t - eps_hat * jump.var.sqrt() as f32) * inv_scale)
    }

    /// Epsilon-parameterized reverse mean
    ///
    /// `μ = (x_t - β_t / √(1 - ᾱ_t) · ε̂) / √α_t`
    pub fn reverse_mean<const D: usize>(
        &self,
        t: usize,
        x_t: Tensor<B, D>,
        eps_hat: Tensor<B, D>,
    ) -> Result<Tensor<B, D>, DiffusionError> {
        self.check_step(t)?;
        check_shape(&x_t, &eps_hat)?;

        let beta = self.schedule.beta()[t];
        let alpha = self.forward.alpha()[t];
        let denom = self.forward.var()[t];

        // A zero-variance step added no noise, so there is none to remove
        let eps_coef = if beta == 0.0 {
            0.0
        } else if denom <= MIN_DENOMINATOR {
            return Err(DiffusionError::unstable(t, format!("1 - alpha_bar[t] = {denom}")));
        } else {
            beta / denom.sqrt()
        };

        let eps_coef = tensor_coef(t, eps_coef, "reverse mean noise coefficient")?;
        let inv_sqrt_alpha = tensor_coef(t, 1.0 / alpha.sqrt(), "1 / sqrt(alpha[t])")?;

        Ok((x_t - eps_hat * eps_coef) * inv_sqrt_alpha)
    }

    /// Variance of the reverse step at `t` under the configured mode
    pub fn reverse_variance(&self, t: usize) -> Result<f64, DiffusionError> {
        match self.variance_mode {
            VarianceMode::Posterior => Ok(self.posterior_coefficients(t)?.var),
            VarianceMode::BetaT => {
                self.check_step(t)?;
                Ok(self.schedule.beta()[t])
            }
        }
    }

    /// One reverse step `x_t -> x_{t-1}` using the engine's noise stream
    ///
    /// Noise is injected only when `add_noise` is set and `t > 1`.
    pub fn reverse_step<const D: usize>(
        &mut self,
        t: usize,
        x_t: Tensor<B, D>,
        eps_hat: Tensor<B, D>,
        add_noise: bool,
    ) -> Result<Tensor<B, D>, DiffusionError> {
        let (mean, std) = self.reverse_parts(t, x_t, eps_hat, add_noise)?;
        Ok(match std {
            Some(std) => {
                let z = self.stream.sample_tensor(mean.dims(), &self.device);
                mean + z * std as f32
            }
            None => mean,
        })
    }

    /// One reverse step drawing from a caller-owned stream
    pub fn reverse_step_with<const D: usize>(
        &self,
        stream: &mut NoiseStream,
        t: usize,
        x_t: Tensor<B, D>,
        eps_hat: Tensor<B, D>,
        add_noise: bool,
    ) -> Result<Tensor<B, D>, DiffusionError> {
        let (mean, std) = self.reverse_parts(t, x_t, eps_hat, add_noise)?;
        Ok(match std {
            Some(std) => {
                let z = stream.sample_tensor(mean.dims(), &self.device);
                mean + z * std as f32
            }
            None => mean,
        })
    }

    /// Starting point `x_T ~ N(0, I)` from the engine stream
    pub fn initial_noise<const D: usize>(&mut self, dims: [usize; D]) -> Tensor<B, D> {
        self.stream.sample_tensor(dims, &self.device)
    }

    /// Run the full reverse chain from `x_T ~ N(0, I)` down to `x_0`
    ///
    /// With `T = 0` the initial noise is returned unchanged.
    pub fn sample<M, const D: usize>(
        &mut self,
        denoiser: &M,
        dims: [usize; D],
        add_noise: bool,
    ) -> Result<Tensor<B, D>, DiffusionError>
    where
        M: Denoiser<B, D>,
    {
        let mut x = self.initial_noise(dims);
        for t in (1..=self.horizon()).rev() {
            let eps_hat = denoiser.predict_noise(x.clone(), t);
            x = self.reverse_step(t, x, eps_hat, add_noise)?;
        }
        Ok(x)
    }

    /// Mean and, if noise is to be injected, the standard deviation
    fn reverse_parts<const D: usize>(
        &self,
        t: usize,
        x_t: Tensor<B, D>,
        eps_hat: Tensor<B, D>,
        add_noise: bool,
    ) -> Result<(Tensor<B, D>, Option<f64>), DiffusionError> {
        let mean = self.reverse_mean(t, x_t, eps_hat)?;
        let variance = self.reverse_variance(t)?;
        let inject = add_noise && t > 1 && variance > 0.0;

        trace!(t, variance, inject, "reverse step");
        Ok((mean, inject.then(|| variance.sqrt())))
    }

    /// Backward queries are defined for `t` in `1..=T`
    fn check_step(&self, t: usize) -> Result<(), DiffusionError> {
        if t == 0 || t > self.horizon() {
            return Err(DiffusionError::TimestepOutOfRange {
                t,
                min: 1,
                max: self.horizon(),
            });
        }
        Ok(())
    }
}

/// Narrow a coefficient to the tensor element type, rejecting values that do not survive
fn tensor_coef(t: usize, value: f64, quantity: &str) -> Result<f32, DiffusionError> {
    let narrowed = value as f32;
    if !value.is_finite() || !narrowed.is_finite() {
        return Err(DiffusionError::unstable(t, format!("{quantity} = {value} is not representable")));
    }
    Ok(narrowed)
}

fn check_shape<B: Backend, const D: usize>(
    x: &Tensor<B, D>,
    other: &Tensor<B, D>,
) -> Result<(), DiffusionError> {
    let (expected, actual) = (x.dims(), other.dims());
    if expected != actual {
        return Err(DiffusionError::ShapeMismatch {
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        });
    }
    Ok(())
}
