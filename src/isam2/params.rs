use std::collections::HashMap;

use typed_builder::TypedBuilder;

/// Numerical method used at each elimination step. QR is the numerically
/// stable default; LDL (via Cholesky of the information form) is faster
/// but can fail on an indefinite intermediate system. See spec.md §4.E.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Factorization {
    Qr,
    Ldl,
}

impl Default for Factorization {
    fn default() -> Self {
        Factorization::Ldl
    }
}

/// How the dog-leg trust-region radius adapts to the observed gain ratio.
/// See spec.md §4.I.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DoglegAdaptationMode {
    /// Shrink below 0.25, expand above 0.75, accept any gain ratio > 0.
    Standard,
}

impl Default for DoglegAdaptationMode {
    fn default() -> Self {
        DoglegAdaptationMode::Standard
    }
}

/// Sub-configuration for the dog-leg step controller.
#[derive(Debug, Clone, Copy, TypedBuilder)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DoglegParams {
    #[builder(default = 1.0)]
    pub initial_delta: f64,
    #[builder(default = 0.0)]
    pub wildfire_threshold: f64,
    #[builder(default)]
    pub adaptation_mode: DoglegAdaptationMode,
    #[builder(default)]
    pub verbose: bool,
}

impl Default for DoglegParams {
    fn default() -> Self {
        Self {
            initial_delta: 1.0,
            wildfire_threshold: 0.0,
            adaptation_mode: DoglegAdaptationMode::default(),
            verbose: false,
        }
    }
}

/// Sub-configuration for plain damped Gauss–Newton.
#[derive(Debug, Clone, Copy, TypedBuilder)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GaussNewtonParams {
    #[builder(default = 0.0)]
    pub wildfire_threshold: f64,
}

impl Default for GaussNewtonParams {
    fn default() -> Self {
        Self {
            wildfire_threshold: 0.0,
        }
    }
}

/// The step-controller selection, an explicit sum type per spec.md §9 (not
/// hidden behind runtime polymorphism — dispatched once per `update`).
#[derive(Debug, Clone, Copy, derive_more::IsVariant)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OptimizationParams {
    GaussNewton(GaussNewtonParams),
    DogLeg(DoglegParams),
}

impl Default for OptimizationParams {
    fn default() -> Self {
        OptimizationParams::GaussNewton(GaussNewtonParams::default())
    }
}

impl OptimizationParams {
    pub fn wildfire_threshold(&self) -> f64 {
        match self {
            OptimizationParams::GaussNewton(p) => p.wildfire_threshold,
            OptimizationParams::DogLeg(p) => p.wildfire_threshold,
        }
    }
}

/// The relinearization threshold, another explicit sum type per spec.md
/// §9: either one scalar applied to every variable, or a per-type-tag
/// vector of per-dimension thresholds.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RelinearizationThreshold {
    Scalar(f64),
    PerType(HashMap<char, Vec<f64>>),
}

impl Default for RelinearizationThreshold {
    fn default() -> Self {
        RelinearizationThreshold::Scalar(0.1)
    }
}

/// Recognized configuration options. See spec.md §6.
#[derive(Debug, Clone, TypedBuilder)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ISAM2Params {
    #[builder(default)]
    pub optimization_params: OptimizationParams,
    #[builder(default)]
    pub relinearize_threshold: RelinearizationThreshold,
    #[builder(default = 10)]
    pub relinearize_skip: usize,
    #[builder(default = true)]
    pub enable_relinearization: bool,
    #[builder(default = false)]
    pub evaluate_nonlinear_error: bool,
    #[builder(default)]
    pub factorization: Factorization,
    #[builder(default = true)]
    pub cache_linearized_factors: bool,
    #[builder(default = false)]
    pub enable_detailed_results: bool,
}

impl Default for ISAM2Params {
    fn default() -> Self {
        Self {
            optimization_params: OptimizationParams::default(),
            relinearize_threshold: RelinearizationThreshold::default(),
            relinearize_skip: 10,
            enable_relinearization: true,
            evaluate_nonlinear_error: false,
            factorization: Factorization::default(),
            cache_linearized_factors: true,
            enable_detailed_results: false,
        }
    }
}
