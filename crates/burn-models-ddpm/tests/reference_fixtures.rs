//! Integration tests against JSON fixtures computed independently in f64
//! from `beta = [0] ++ linspace(beta_low, beta_high, T)`.

use std::fs;
use std::path::PathBuf;

use burn::prelude::*;
use burn_models_ddpm::{generate_linear_schedule, DiffusionConfig, DiffusionEngine};
use burn_ndarray::NdArray;
use serde::Deserialize;

type TestBackend = NdArray<f32>;

/// Tolerance for floating point comparisons
const EPSILON: f64 = 1e-3;

fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn assert_approx_eq(expected: f64, actual: f64, tol: f64, name: &str) {
    let diff = (expected - actual).abs();
    assert!(
        diff < tol,
        "{}: expected {}, got {} (diff: {})",
        name,
        expected,
        actual,
        diff
    );
}

#[derive(Debug, Deserialize)]
struct LinearFixture {
    horizon: usize,
    beta_low: f64,
    beta_high: f64,
    beta: Vec<f64>,
    alpha_bar: Vec<f64>,
    forward_scale: Vec<f64>,
    forward_var: Vec<f64>,
    posterior: Vec<PosteriorFixture>,
}

#[derive(Debug, Deserialize)]
struct PosteriorFixture {
    t: usize,
    scale: f64,
    bias_coef: f64,
    var: f64,
}

fn load_fixture() -> LinearFixture {
    let path = fixtures_dir().join("linear_t10.json");
    let content = fs::read_to_string(&path).expect("Failed to read fixture");
    serde_json::from_str(&content).expect("Failed to parse fixture")
}

fn fixture_engine(fixture: &LinearFixture) -> DiffusionEngine<TestBackend> {
    DiffusionConfig::new(fixture.horizon, fixture.beta_low, fixture.beta_high)
        .init::<TestBackend>(&Default::default())
        .expect("Failed to build engine")
}

#[test]
fn test_schedule_matches_reference() {
    let fixture = load_fixture();
    let sched =
        generate_linear_schedule(fixture.horizon, fixture.beta_low, fixture.beta_high).unwrap();

    assert_eq!(sched.beta().len(), fixture.beta.len());
    assert_eq!(sched.beta()[0], 0.0);
    for (t, (&expected, &actual)) in fixture.beta.iter().zip(sched.beta()).enumerate() {
        assert_approx_eq(expected, actual, 1e-12, &format!("beta[{t}]"));
        assert_approx_eq(expected, sched.var()[t], 1e-12, &format!("var[{t}]"));
        assert_approx_eq(
            (1.0 - expected).sqrt(),
            sched.scale()[t],
            1e-12,
            &format!("scale[{t}]"),
        );
    }
}

#[test]
fn test_forward_jumps_match_reference() {
    let fixture = load_fixture();
    let engine = fixture_engine(&fixture);

    for t in 0..=fixture.horizon {
        let jump = engine.forward_jump_params(t).unwrap();
        assert_approx_eq(fixture.forward_scale[t], jump.scale, 1e-6, &format!("scale[{t}]"));
        assert_approx_eq(fixture.forward_var[t], jump.var, 1e-6, &format!("var[{t}]"));
        assert_approx_eq(
            fixture.alpha_bar[t],
            engine.forward_jumps().alpha_bar()[t],
            1e-6,
            &format!("alpha_bar[{t}]"),
        );
    }
}

#[test]
fn test_posterior_matches_reference() {
    let fixture = load_fixture();
    let engine = fixture_engine(&fixture);
    let device = Default::default();

    for expected in &fixture.posterior {
        let t = expected.t;
        let coefs = engine.posterior_coefficients(t).unwrap();
        assert_approx_eq(expected.scale, coefs.scale, EPSILON, &format!("scale t={t}"));
        assert_approx_eq(expected.bias_coef, coefs.bias_coef, EPSILON, &format!("bias t={t}"));
        assert_approx_eq(expected.var, coefs.var, EPSILON, &format!("var t={t}"));

        for x0 in [0.0f32, 0.5, 1.0] {
            let x0_tensor = Tensor::<TestBackend, 1>::from_data(TensorData::new(vec![x0], [1]), &device);
            let step = engine.posterior_step(t, x0_tensor).unwrap();
            let bias: Vec<f32> = step.bias.into_data().to_vec().unwrap();
            assert_approx_eq(
                expected.bias_coef * x0 as f64,
                bias[0] as f64,
                EPSILON,
                &format!("bias(x0={x0}) t={t}"),
            );
        }
    }
}

#[test]
fn test_final_posterior_step_is_exact() {
    let fixture = load_fixture();
    let engine = fixture_engine(&fixture);
    let device = Default::default();

    let x0 = vec![-2.0f32, 0.0, 0.5, 1.0];
    let step = engine
        .posterior_step(1, Tensor::<TestBackend, 1>::from_data(TensorData::new(x0.clone(), [4]), &device))
        .unwrap();

    assert_eq!(step.scale, 0.0);
    assert_eq!(step.var, 0.0);
    assert_eq!(step.bias.into_data().to_vec::<f32>().unwrap(), x0);
}
