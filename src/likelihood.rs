//! Conditional logit primitives: choice probabilities, log-likelihood,
//! score and Fisher information over the occasions of a design.

use nalgebra::{DMatrix, DVector};

use crate::design::DesignMatrix;
use crate::error::{ConjointError, Result};

/// Log-likelihood with its first and second derivatives at one `beta`.
#[derive(Clone, Debug)]
pub struct LikelihoodEvaluation {
    pub log_likelihood: f64,
    /// `Σ_occasions (x_chosen − Σ_j p_j x_j)`.
    pub gradient: DVector<f64>,
    /// Negative Hessian, `Σ_occasions Σ_j p_j (x_j − x̄)(x_j − x̄)ᵗ`.
    pub information: DMatrix<f64>,
}

impl LikelihoodEvaluation {
    pub fn is_finite(&self) -> bool {
        self.log_likelihood.is_finite() && self.gradient.iter().all(|g| g.is_finite())
    }

    pub fn max_abs_gradient(&self) -> f64 {
        self.gradient.amax()
    }
}

/// Softmax of `utilities` in place, shifted by the maximum for stability.
/// Returns `log Σ exp(u)`.
fn softmax_in_place(utilities: &mut [f64]) -> f64 {
    let max = utilities
        .iter()
        .copied()
        .fold(f64::NEG_INFINITY, f64::max);
    let mut total = 0.0;
    for u in utilities.iter_mut() {
        *u = (*u - max).exp();
        total += *u;
    }
    for u in utilities.iter_mut() {
        *u /= total;
    }
    max + total.ln()
}

fn check_dimension(design: &DesignMatrix, beta: &DVector<f64>) -> Result<()> {
    if beta.len() != design.ncols() {
        return Err(ConjointError::dimension_mismatch(
            "coefficient length",
            design.ncols(),
            beta.len(),
        ));
    }
    Ok(())
}

/// Model-implied probability of every row within its occasion.
pub fn choice_probabilities(design: &DesignMatrix, beta: &DVector<f64>) -> Result<DVector<f64>> {
    check_dimension(design, beta)?;
    let mut probabilities = design.matrix() * beta;
    for range in design.occasions() {
        softmax_in_place(&mut probabilities.as_mut_slice()[range.clone()]);
    }
    Ok(probabilities)
}

/// `LL(β) = Σ_occasions [x_chosen·β − log Σ_j exp(x_j·β)]`.
pub fn log_likelihood(design: &DesignMatrix, beta: &DVector<f64>) -> Result<f64> {
    check_dimension(design, beta)?;
    let mut utilities = design.matrix() * beta;
    let mut total = 0.0;
    for (occasion, range) in design.occasions().iter().enumerate() {
        let chosen = utilities[design.chosen_row(occasion)];
        let log_sum = softmax_in_place(&mut utilities.as_mut_slice()[range.clone()]);
        total += chosen - log_sum;
    }
    Ok(total)
}

/// Log-likelihood of the equal-probability model, `−Σ_occasions ln |set|`.
pub fn null_log_likelihood(design: &DesignMatrix) -> f64 {
    design
        .occasions()
        .iter()
        .map(|range| -(range.len() as f64).ln())
        .sum()
}

/// Evaluates the log-likelihood, score and information at `beta`.
pub fn evaluate(design: &DesignMatrix, beta: &DVector<f64>) -> Result<LikelihoodEvaluation> {
    check_dimension(design, beta)?;
    let k = design.ncols();
    let x = design.matrix();
    let mut utilities = x * beta;
    let mut log_likelihood = 0.0;
    let mut gradient = DVector::zeros(k);
    let mut information = DMatrix::zeros(k, k);

    for (occasion, range) in design.occasions().iter().enumerate() {
        let chosen_row = design.chosen_row(occasion);
        let chosen_utility = utilities[chosen_row];
        let log_sum = softmax_in_place(&mut utilities.as_mut_slice()[range.clone()]);
        log_likelihood += chosen_utility - log_sum;

        let rows = x.rows(range.start, range.len());
        let probabilities = utilities.rows(range.start, range.len());
        let mean = rows.tr_mul(&probabilities);

        gradient += x.row(chosen_row).transpose() - &mean;

        let mut scaled = rows.clone_owned();
        for (mut row, p) in scaled.row_iter_mut().zip(probabilities.iter()) {
            row -= mean.transpose();
            row *= p.sqrt();
        }
        information += scaled.tr_mul(&scaled);
    }

    Ok(LikelihoodEvaluation {
        log_likelihood,
        gradient,
        information,
    })
}
