//! Iteration controls and diagnostics shared by the estimation strategies.

use serde::{Deserialize, Serialize};

/// Configuration for the primary Newton-Raphson solver.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    /// Convergence when the largest absolute gradient component falls below this.
    pub gradient_tolerance: f64,
    /// Convergence when the largest absolute parameter change falls below this.
    pub step_tolerance: f64,
    /// Maximum number of Newton iterations allowed before aborting.
    pub max_iterations: usize,
    /// How many times a step may be halved when it lowers the log-likelihood.
    pub max_step_halvings: usize,
    /// Coefficients beyond this magnitude (log-odds scale) are treated as divergence.
    pub max_abs_coefficient: f64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            gradient_tolerance: 1e-6,
            step_tolerance: 1e-8,
            max_iterations: 100,
            max_step_halvings: 30,
            max_abs_coefficient: 25.0,
        }
    }
}

/// Configuration for the ridge-penalized, Levenberg-damped fallback solver.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackOptions {
    /// Ridge penalty `λ/2 ‖β‖²` subtracted from the log-likelihood.
    pub ridge: f64,
    /// Starting Levenberg damping added to the diagonal of the negative Hessian.
    pub initial_damping: f64,
    pub gradient_tolerance: f64,
    pub step_tolerance: f64,
    pub max_iterations: usize,
}

impl Default for FallbackOptions {
    fn default() -> Self {
        Self {
            ridge: 1e-2,
            initial_damping: 1e-3,
            gradient_tolerance: 1e-6,
            step_tolerance: 1e-8,
            max_iterations: 500,
        }
    }
}

/// Diagnostics returned alongside the fitted coefficients.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SolverSummary {
    /// Number of iterations performed.
    pub iterations: usize,
    /// Largest absolute gradient component at the final iterate.
    pub max_gradient: f64,
    /// Largest absolute parameter change in the final iteration.
    pub last_step: f64,
}
