//! Closed-form probability parameters of a denoising diffusion probabilistic model
//!
//! - [`scheduler`]: variance schedules `β_t` and the single-step transition
//! - [`forward`]: cumulative forward-process arrays q(x_t | x_0)
//! - [`ddpm`]: the engine answering posterior and reverse-step queries
//!
//! # Example
//!
//! ```ignore
//! use burn_models_ddpm::{DiffusionConfig, VarianceMode};
//!
//! let mut engine = DiffusionConfig::new(1000, 1e-4, 0.02)
//!     .with_seed(42)
//!     .with_variance_mode(VarianceMode::Posterior)
//!     .init::<Backend>(&device)?;
//!
//! let mut x = engine.initial_noise([batch, channels, height, width]);
//! for t in (1..=engine.horizon()).rev() {
//!     let eps_hat = model.forward(x.clone(), t);
//!     x = engine.reverse_step(t, x, eps_hat, true)?;
//! }
//! ```

pub mod config;
pub mod ddpm;
pub mod error;
pub mod forward;
pub mod noise;
pub mod scheduler;

pub use config::{DiffusionConfig, VarianceMode};
pub use ddpm::{BackwardStepProbability, Denoiser, DiffusionEngine, PosteriorCoefficients};
pub use error::DiffusionError;
pub use forward::{ForwardJump, ForwardJumpProbability};
pub use noise::NoiseStream;
pub use scheduler::{generate_linear_schedule, LinearSchedule, ScheduleGenerator, VarianceSchedule};
