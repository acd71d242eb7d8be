//! Goodness-of-fit diagnostics for a fitted choice model.

use nalgebra::DVector;
use serde::Serialize;

use crate::design::DesignMatrix;
use crate::error::{ConjointError, Result};
use crate::estimation::ModelResult;
use crate::likelihood::{choice_probabilities, null_log_likelihood};

/// Tolerance for the per-occasion probability sum check.
const NORMALIZATION_TOLERANCE: f64 = 1e-6;

/// The diagnostics record handed to report writers.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ModelDiagnostics {
    /// McFadden's `1 − LL / LL_null`.
    pub pseudo_r2: f64,
    /// `1 − (LL − k) / LL_null`.
    pub adjusted_pseudo_r2: f64,
    pub log_likelihood: f64,
    /// Log-likelihood of the equal-probability model.
    pub null_log_likelihood: f64,
    /// `2 (LL − LL_null)`, chi-square with `k` degrees of freedom under the null.
    pub likelihood_ratio: f64,
    pub aic: f64,
    pub bic: f64,
    pub hit_rate: f64,
    /// Mean of `1 / |choice set|` over occasions.
    pub chance_rate: f64,
    pub n_occasions: usize,
    pub n_respondents: usize,
    pub n_observations: usize,
    pub n_parameters: usize,
    pub estimation_method: String,
    pub converged: bool,
    pub iterations: usize,
}

/// Computes every diagnostic for `model` fitted on `design`.
pub fn compute_diagnostics(
    model: &ModelResult,
    design: &DesignMatrix,
    n_respondents: usize,
) -> Result<ModelDiagnostics> {
    let probabilities = choice_probabilities(design, &model.coefficients)?;
    let hit_rate = hit_rate(design, &probabilities)?;

    let ll = model.log_likelihood;
    let ll_null = null_log_likelihood(design);
    let k = model.parameter_count() as f64;
    let n = design.nrows() as f64;
    let occasions = design.occasion_count();

    let chance_rate = design
        .occasions()
        .iter()
        .map(|range| 1.0 / range.len() as f64)
        .sum::<f64>()
        / occasions as f64;

    Ok(ModelDiagnostics {
        pseudo_r2: 1.0 - ll / ll_null,
        adjusted_pseudo_r2: 1.0 - (ll - k) / ll_null,
        log_likelihood: ll,
        null_log_likelihood: ll_null,
        likelihood_ratio: 2.0 * (ll - ll_null),
        aic: -2.0 * ll + 2.0 * k,
        bic: -2.0 * ll + k * n.ln(),
        hit_rate,
        chance_rate,
        n_occasions: occasions,
        n_respondents,
        n_observations: design.nrows(),
        n_parameters: model.parameter_count(),
        estimation_method: model.method.name().to_string(),
        converged: model.converged,
        iterations: model.iterations,
    })
}

/// Alternative index with the highest probability in each occasion. Ties go
/// to the lowest alternative index.
pub fn predicted_alternatives(design: &DesignMatrix, probabilities: &DVector<f64>) -> Vec<usize> {
    design
        .occasions()
        .iter()
        .map(|range| {
            let mut best = 0usize;
            for offset in 1..range.len() {
                if probabilities[range.start + offset] > probabilities[range.start + best] {
                    best = offset;
                }
            }
            best
        })
        .collect()
}

/// Share of occasions whose predicted alternative is the one chosen.
///
/// Fails with `CALC_PROBABILITY_NORMALIZATION` if any occasion's
/// probabilities do not sum to one within `1e-6`.
pub fn hit_rate(design: &DesignMatrix, probabilities: &DVector<f64>) -> Result<f64> {
    if probabilities.len() != design.nrows() {
        return Err(ConjointError::dimension_mismatch(
            "probabilities length",
            design.nrows(),
            probabilities.len(),
        ));
    }
    for (occasion, range) in design.occasions().iter().enumerate() {
        let total: f64 = probabilities.rows(range.start, range.len()).sum();
        if (total - 1.0).abs() > NORMALIZATION_TOLERANCE || !total.is_finite() {
            return Err(ConjointError::ProbabilityNormalization { occasion, total });
        }
    }

    let hits = predicted_alternatives(design, probabilities)
        .into_iter()
        .enumerate()
        .filter(|&(occasion, predicted)| {
            design.occasions()[occasion].start + predicted == design.chosen_row(occasion)
        })
        .count();
    Ok(hits as f64 / design.occasion_count() as f64)
}
