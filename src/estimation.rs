//! Maximum-likelihood estimation of the conditional logit.
//!
//! Two strategies implement [`ChoiceModelEstimator`]:
//!
//! - [`NewtonRaphson`] maximizes the log-likelihood with full Newton steps
//!   (halved when a step would lower the likelihood);
//! - [`RegularizedNewton`] maximizes `LL(β) − λ/2 ‖β‖²` with
//!   Levenberg-damped Newton steps. The ridge term keeps the problem strictly
//!   concave, so it survives separation and collinearity.
//!
//! [`ChoiceProblem::estimate`] runs them as a two-stage pipeline: the
//! primary strategy first, the fallback when the primary reports a
//! structured [`FailureReason`], and a `CALC_NONCONVERGENCE` error carrying
//! the last log-likelihood when both fail.

use log::{debug, info, warn};
use nalgebra::linalg::Cholesky;
use nalgebra::{DMatrix, DVector};
use serde::Serialize;

use crate::design::DesignMatrix;
use crate::error::{ConjointError, ConjointWarning, FailureReason, Result};
use crate::likelihood::{evaluate, LikelihoodEvaluation};
use crate::options::{BaselineHandling, ConjointOptions, EstimationMethod};
use crate::solving::{FallbackOptions, SolverOptions, SolverSummary};
use crate::stats::condition_number;

/// Information matrices with a larger condition number are treated as singular.
const SINGULAR_CONDITION: f64 = 1e14;

/// A coefficient whose information has shrunk below this fraction of its
/// value at `β = 0` is being pushed to infinity by separated data.
const SEPARATION_RATIO: f64 = 1e-6;

/// Which strategy produced a [`ModelResult`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodUsed {
    NewtonRaphson,
    RegularizedNewton,
}

impl MethodUsed {
    pub fn name(&self) -> &'static str {
        match self {
            MethodUsed::NewtonRaphson => "newton_raphson",
            MethodUsed::RegularizedNewton => "regularized_newton",
        }
    }
}

/// Estimated coefficients and their sampling covariance. Both strategies
/// return this same shape.
#[derive(Clone, Debug, Serialize)]
pub struct ModelResult {
    /// One coefficient per design column.
    pub coefficients: DVector<f64>,
    /// Inverse of the negative Hessian at the optimum (penalized for the fallback).
    pub covariance: DMatrix<f64>,
    /// Unpenalized log-likelihood at the optimum.
    pub log_likelihood: f64,
    pub converged: bool,
    pub iterations: usize,
    pub method: MethodUsed,
    pub summary: SolverSummary,
    /// Condition number of the covariance matrix.
    pub condition_number: f64,
}

impl ModelResult {
    pub fn parameter_count(&self) -> usize {
        self.coefficients.len()
    }

    pub fn standard_errors(&self) -> DVector<f64> {
        self.covariance.diagonal().map(|v| v.max(0.0).sqrt())
    }
}

/// Why a strategy stopped without a usable result.
#[derive(Debug)]
pub enum EstimationFailure {
    /// The strategy gave up; the caller may retry with another strategy.
    Failed {
        reason: FailureReason,
        log_likelihood: f64,
        iterations: usize,
    },
    /// Retrying cannot help.
    Fatal(ConjointError),
}

impl From<ConjointError> for EstimationFailure {
    fn from(error: ConjointError) -> Self {
        EstimationFailure::Fatal(error)
    }
}

fn failed(reason: FailureReason, log_likelihood: f64, iterations: usize) -> EstimationFailure {
    EstimationFailure::Failed {
        reason,
        log_likelihood,
        iterations,
    }
}

/// Anything that can fit the conditional logit on a design.
pub trait ChoiceModelEstimator {
    fn method(&self) -> MethodUsed;

    fn estimate(&self, design: &DesignMatrix) -> std::result::Result<ModelResult, EstimationFailure>;
}

/// Primary strategy: Newton-Raphson with step halving.
#[derive(Clone, Debug, Default)]
pub struct NewtonRaphson {
    pub options: SolverOptions,
}

impl NewtonRaphson {
    pub fn new(options: SolverOptions) -> Self {
        Self { options }
    }
}

impl ChoiceModelEstimator for NewtonRaphson {
    fn method(&self) -> MethodUsed {
        MethodUsed::NewtonRaphson
    }

    fn estimate(&self, design: &DesignMatrix) -> std::result::Result<ModelResult, EstimationFailure> {
        let options = &self.options;
        let mut beta = DVector::zeros(design.ncols());
        let mut current = evaluate(design, &beta)?;
        let initial_information = current.information.diagonal();
        let mut last_step = f64::INFINITY;
        let mut iterations = 0usize;

        loop {
            if !current.is_finite() {
                return Err(failed(FailureReason::NonFinite, current.log_likelihood, iterations));
            }
            let max_gradient = current.max_abs_gradient();
            if max_gradient < options.gradient_tolerance || last_step < options.step_tolerance {
                break;
            }
            if iterations == options.max_iterations {
                return Err(failed(
                    FailureReason::IterationLimit,
                    current.log_likelihood,
                    iterations,
                ));
            }

            let cholesky = Cholesky::new(current.information.clone()).ok_or_else(|| {
                failed(FailureReason::SingularHessian, current.log_likelihood, iterations)
            })?;
            let direction = cholesky.solve(&current.gradient);

            let mut scale = 1.0;
            let mut halvings = 0usize;
            let (candidate, evaluation) = loop {
                let candidate = &beta + &direction * scale;
                let evaluation = evaluate(design, &candidate)?;
                let improved = evaluation.log_likelihood
                    >= current.log_likelihood - 1e-12 * current.log_likelihood.abs();
                if evaluation.is_finite() && improved {
                    break (candidate, evaluation);
                }
                halvings += 1;
                if halvings > options.max_step_halvings {
                    return Err(failed(
                        FailureReason::LineSearch,
                        current.log_likelihood,
                        iterations,
                    ));
                }
                scale *= 0.5;
            };

            last_step = (&candidate - &beta).amax();
            beta = candidate;
            current = evaluation;
            iterations += 1;
            debug!(
                "newton iteration {iterations}: log-likelihood {:.6}, max |gradient| {:.3e}, step {:.3e}, halvings {halvings}",
                current.log_likelihood,
                current.max_abs_gradient(),
                last_step
            );

            if beta.amax() > options.max_abs_coefficient {
                return Err(failed(
                    FailureReason::Divergence,
                    current.log_likelihood,
                    iterations,
                ));
            }
        }

        let separated = current
            .information
            .diagonal()
            .iter()
            .zip(initial_information.iter())
            .any(|(now, start)| *now < SEPARATION_RATIO * start);
        if separated {
            return Err(failed(
                FailureReason::Divergence,
                current.log_likelihood,
                iterations,
            ));
        }

        let condition = condition_number(&current.information);
        if !condition.is_finite() || condition > SINGULAR_CONDITION {
            return Err(failed(
                FailureReason::SingularHessian,
                current.log_likelihood,
                iterations,
            ));
        }
        let covariance = Cholesky::new(current.information.clone())
            .ok_or_else(|| {
                failed(FailureReason::SingularHessian, current.log_likelihood, iterations)
            })?
            .inverse();

        Ok(finish(
            beta,
            covariance,
            &current,
            current.max_abs_gradient(),
            last_step,
            iterations,
            condition,
            MethodUsed::NewtonRaphson,
        ))
    }
}

/// Fallback strategy: ridge-penalized, Levenberg-damped Newton.
#[derive(Clone, Debug, Default)]
pub struct RegularizedNewton {
    pub options: FallbackOptions,
}

impl RegularizedNewton {
    pub fn new(options: FallbackOptions) -> Self {
        Self { options }
    }

    fn penalized(&self, evaluation: &LikelihoodEvaluation, beta: &DVector<f64>) -> f64 {
        evaluation.log_likelihood - 0.5 * self.options.ridge * beta.norm_squared()
    }
}

impl ChoiceModelEstimator for RegularizedNewton {
    fn method(&self) -> MethodUsed {
        MethodUsed::RegularizedNewton
    }

    fn estimate(&self, design: &DesignMatrix) -> std::result::Result<ModelResult, EstimationFailure> {
        let options = &self.options;
        let k = design.ncols();
        let ridge = DMatrix::<f64>::identity(k, k) * options.ridge;
        let mut beta = DVector::zeros(k);
        let mut current = evaluate(design, &beta)?;
        let mut objective = self.penalized(&current, &beta);
        let mut damping = options.initial_damping;
        let mut last_step = f64::INFINITY;
        let mut iterations = 0usize;

        let max_gradient = loop {
            if !current.is_finite() {
                return Err(failed(FailureReason::NonFinite, current.log_likelihood, iterations));
            }
            let gradient = &current.gradient - &beta * options.ridge;
            let max_gradient = gradient.amax();
            if max_gradient < options.gradient_tolerance || last_step < options.step_tolerance {
                break max_gradient;
            }
            if iterations == options.max_iterations {
                return Err(failed(
                    FailureReason::IterationLimit,
                    current.log_likelihood,
                    iterations,
                ));
            }

            let hessian = &current.information + &ridge;
            let mut attempts = 0usize;
            let (candidate, evaluation, candidate_objective) = loop {
                let damped = &hessian + DMatrix::<f64>::identity(k, k) * damping;
                let step = Cholesky::new(damped)
                    .map(|cholesky| cholesky.solve(&gradient))
                    .ok_or_else(|| {
                        failed(FailureReason::SingularHessian, current.log_likelihood, iterations)
                    })?;
                let candidate = &beta + step;
                let evaluation = evaluate(design, &candidate)?;
                let candidate_objective = self.penalized(&evaluation, &candidate);
                if evaluation.is_finite() && candidate_objective >= objective {
                    damping = (damping * 0.1).max(1e-12);
                    break (candidate, evaluation, candidate_objective);
                }
                attempts += 1;
                if attempts > 60 {
                    return Err(failed(
                        FailureReason::LineSearch,
                        current.log_likelihood,
                        iterations,
                    ));
                }
                damping = (damping * 10.0).max(1e-6);
            };

            last_step = (&candidate - &beta).amax();
            beta = candidate;
            current = evaluation;
            objective = candidate_objective;
            iterations += 1;
            debug!(
                "regularized iteration {iterations}: penalized objective {objective:.6}, damping {damping:.1e}, step {last_step:.3e}"
            );
        };

        let penalized_information = &current.information + &ridge;
        let condition = condition_number(&penalized_information);
        let covariance = Cholesky::new(penalized_information)
            .ok_or_else(|| ConjointError::singular("regularized information matrix"))?
            .inverse();

        Ok(finish(
            beta,
            covariance,
            &current,
            max_gradient,
            last_step,
            iterations,
            condition,
            MethodUsed::RegularizedNewton,
        ))
    }
}

#[allow(clippy::too_many_arguments)]
fn finish(
    coefficients: DVector<f64>,
    covariance: DMatrix<f64>,
    evaluation: &LikelihoodEvaluation,
    max_gradient: f64,
    last_step: f64,
    iterations: usize,
    condition_number: f64,
    method: MethodUsed,
) -> ModelResult {
    ModelResult {
        coefficients,
        covariance,
        log_likelihood: evaluation.log_likelihood,
        converged: true,
        iterations,
        method,
        summary: SolverSummary {
            iterations,
            max_gradient,
            last_step,
        },
        condition_number,
    }
}

/// A fitted model plus the warnings raised while fitting it.
#[derive(Clone, Debug)]
pub struct Estimation {
    pub model: ModelResult,
    pub warnings: Vec<ConjointWarning>,
}

/// High-level wrapper pairing a design with the estimation policy.
#[derive(Clone, Debug)]
pub struct ChoiceProblem {
    design: DesignMatrix,
}

impl ChoiceProblem {
    pub fn new(design: DesignMatrix) -> Result<Self> {
        if design.ncols() == 0 {
            return Err(ConjointError::dimension_mismatch("design columns", 1, 0));
        }
        if design.occasion_count() == 0 {
            return Err(ConjointError::EmptyData);
        }
        Ok(Self { design })
    }

    pub fn design(&self) -> &DesignMatrix {
        &self.design
    }

    /// Runs the strategy selected by `options.estimation_method`.
    pub fn estimate(&self, options: &ConjointOptions) -> Result<Estimation> {
        let primary = NewtonRaphson::new(options.solver.clone());
        let fallback = RegularizedNewton::new(options.fallback.clone());
        let explicit = self.design.baseline() == BaselineHandling::AllLevelsExplicit;

        let mut warnings = Vec::new();
        let model = match (options.estimation_method, explicit) {
            (EstimationMethod::Primary, true) => {
                return Err(ConjointError::invalid_setting(
                    "estimation_method",
                    "all_levels_explicit designs are only identified by the regularized estimator; use auto or fallback",
                ));
            }
            (EstimationMethod::Fallback, _) | (EstimationMethod::Auto, true) => {
                run_final(&fallback, &self.design)?
            }
            (EstimationMethod::Primary, false) => run_final(&primary, &self.design)?,
            (EstimationMethod::Auto, false) => match primary.estimate(&self.design) {
                Ok(model) => model,
                Err(EstimationFailure::Fatal(error)) => return Err(error),
                Err(EstimationFailure::Failed {
                    reason,
                    log_likelihood,
                    iterations,
                }) => {
                    warn!(
                        "newton-raphson failed ({reason}) after {iterations} iterations at log-likelihood {log_likelihood:.4}; retrying with regularized estimator"
                    );
                    warnings.push(ConjointWarning::FallbackUsed { reason });
                    run_final(&fallback, &self.design)?
                }
            },
        };

        if model.condition_number > options.condition_number_threshold {
            let warning = ConjointWarning::NearSingularCovariance {
                condition_number: model.condition_number,
            };
            warn!("{warning}");
            warnings.push(warning);
        }

        info!(
            "{} converged in {} iterations, log-likelihood {:.4}",
            model.method.name(),
            model.iterations,
            model.log_likelihood
        );
        Ok(Estimation { model, warnings })
    }
}

/// Runs a strategy with no further retry, escalating failures to errors.
fn run_final(estimator: &dyn ChoiceModelEstimator, design: &DesignMatrix) -> Result<ModelResult> {
    match estimator.estimate(design) {
        Ok(model) => Ok(model),
        Err(EstimationFailure::Fatal(error)) => Err(error),
        Err(EstimationFailure::Failed {
            reason: FailureReason::SingularHessian,
            ..
        }) if estimator.method() == MethodUsed::NewtonRaphson => {
            Err(ConjointError::singular("newton-raphson information matrix"))
        }
        Err(EstimationFailure::Failed {
            reason,
            log_likelihood,
            iterations,
        }) => Err(ConjointError::NonConvergence {
            reason,
            iterations,
            log_likelihood,
        }),
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::attribute::Attribute;
    use crate::data::{ChoiceDataBuilder, ChoiceObservation};
    use crate::likelihood::log_likelihood;

    /// Two-level attribute where `A` wins `wins` of `total` pairwise occasions.
    fn paired_design(wins: usize, total: usize) -> DesignMatrix {
        let attributes = vec![Attribute::new("Brand", ["A", "B"]).unwrap()];
        let mut observations = Vec::new();
        for set in 0..total {
            let a_chosen = set < wins;
            observations.push(
                ChoiceObservation::new("r1", set.to_string(), a_chosen).level("Brand", "A"),
            );
            observations.push(
                ChoiceObservation::new("r1", set.to_string(), !a_chosen).level("Brand", "B"),
            );
        }
        let data = ChoiceDataBuilder::new(attributes, observations)
            .min_responses_per_level(0)
            .build()
            .unwrap();
        DesignMatrix::build(&data, BaselineHandling::FirstLevelZero).unwrap()
    }

    #[test]
    fn newton_matches_closed_form_binary_logit() {
        // P(A) = exp(b) / (exp(b) + exp(-b)) = 1 / (1 + exp(-2b)) = 0.75.
        let design = paired_design(30, 40);
        let model = NewtonRaphson::default().estimate(&design).unwrap();
        let expected = 0.5 * 3.0f64.ln();
        assert!(model.converged);
        assert_relative_eq!(model.coefficients[0], expected, epsilon = 1e-6);
        // Information = 40 * 4 * p (1 - p).
        assert_relative_eq!(
            model.covariance[(0, 0)],
            1.0 / (40.0 * 4.0 * 0.75 * 0.25),
            epsilon = 1e-6
        );
        assert_relative_eq!(
            model.log_likelihood,
            log_likelihood(&design, &model.coefficients).unwrap(),
            epsilon = 1e-12
        );
        assert_eq!(model.method, MethodUsed::NewtonRaphson);
    }

    #[test]
    fn separation_diverges_under_newton_and_is_bounded_by_ridge() {
        let design = paired_design(20, 20);
        match NewtonRaphson::default().estimate(&design) {
            Err(EstimationFailure::Failed { reason, .. }) => {
                assert!(matches!(
                    reason,
                    FailureReason::Divergence | FailureReason::SingularHessian
                ));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        let model = RegularizedNewton::default().estimate(&design).unwrap();
        assert!(model.coefficients[0] > 1.0);
        assert!(model.coefficients[0] < 15.0);
        assert_eq!(model.method, MethodUsed::RegularizedNewton);
    }

    #[test]
    fn auto_falls_back_and_reports_it() {
        let problem = ChoiceProblem::new(paired_design(20, 20)).unwrap();
        let estimation = problem.estimate(&ConjointOptions::default()).unwrap();
        assert_eq!(estimation.model.method, MethodUsed::RegularizedNewton);
        assert!(estimation
            .warnings
            .iter()
            .any(|w| matches!(w, ConjointWarning::FallbackUsed { .. })));
    }

    #[test]
    fn primary_only_surfaces_nonconvergence_with_last_likelihood() {
        let problem = ChoiceProblem::new(paired_design(20, 20)).unwrap();
        let options = ConjointOptions::default().with_estimation_method(EstimationMethod::Primary);
        let err = problem.estimate(&options).unwrap_err();
        assert!(matches!(
            err.code(),
            "CALC_NONCONVERGENCE" | "CALC_SINGULAR_COVARIANCE"
        ));
        if let ConjointError::NonConvergence {
            log_likelihood,
            iterations,
            ..
        } = err
        {
            assert!(log_likelihood.is_finite());
            assert!(iterations > 0);
        }
    }

    #[test]
    fn fallback_iteration_budget_exhaustion_is_an_error() {
        let problem = ChoiceProblem::new(paired_design(30, 40)).unwrap();
        let options = ConjointOptions::default()
            .with_estimation_method(EstimationMethod::Fallback)
            .with_fallback(FallbackOptions {
                max_iterations: 1,
                gradient_tolerance: 1e-14,
                step_tolerance: 1e-16,
                ..FallbackOptions::default()
            });
        let err = problem.estimate(&options).unwrap_err();
        assert_eq!(err.code(), "CALC_NONCONVERGENCE");
        assert!(matches!(err, ConjointError::NonConvergence { iterations: 1, .. }));
    }

    #[test]
    fn ill_conditioned_covariance_is_flagged() {
        let attributes = vec![Attribute::new("Brand", ["A", "B", "C"]).unwrap()];
        let mut observations = Vec::new();
        for (set, pick) in [0usize, 1, 2, 0, 1, 0].into_iter().enumerate() {
            for (index, brand) in ["A", "B", "C"].into_iter().enumerate() {
                observations.push(
                    ChoiceObservation::new("r1", set.to_string(), index == pick)
                        .level("Brand", brand),
                );
            }
        }
        let data = ChoiceDataBuilder::new(attributes, observations)
            .min_responses_per_level(0)
            .build()
            .unwrap();
        let design = DesignMatrix::build(&data, BaselineHandling::FirstLevelZero).unwrap();
        let problem = ChoiceProblem::new(design).unwrap();

        let relaxed = problem.estimate(&ConjointOptions::default()).unwrap();
        assert!(relaxed.warnings.is_empty());
        // Effects-coded information is never isotropic, so any threshold of 1 trips.
        assert!(relaxed.model.condition_number > 1.0);

        let strict = ConjointOptions {
            condition_number_threshold: 1.0,
            ..ConjointOptions::default()
        };
        let flagged = problem.estimate(&strict).unwrap();
        assert_eq!(flagged.model.coefficients, relaxed.model.coefficients);
        assert!(flagged.warnings.iter().any(|warning| matches!(
            warning,
            ConjointWarning::NearSingularCovariance { condition_number }
                if *condition_number == relaxed.model.condition_number
        )));
    }

    #[test]
    fn estimation_is_deterministic() {
        let problem = ChoiceProblem::new(paired_design(27, 40)).unwrap();
        let first = problem.estimate(&ConjointOptions::default()).unwrap();
        let second = problem.estimate(&ConjointOptions::default()).unwrap();
        assert_eq!(first.model.coefficients, second.model.coefficients);
        assert_eq!(first.model.covariance, second.model.covariance);
    }
}
