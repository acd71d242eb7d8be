//! Respondent-level bootstrap intervals for part-worth utilities.
//!
//! Each replicate draws respondents with replacement, keeps every occasion of
//! each drawn respondent, refits the model and records the level utilities.
//! Replicates run in parallel; replicate `r` is seeded with `seed + r` so the
//! summary does not depend on thread scheduling.

use log::{debug, info};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::design::DesignMatrix;
use crate::error::{ConjointError, Result};
use crate::estimation::ChoiceProblem;
use crate::options::ConjointOptions;
use crate::stats::percentile;
use crate::utilities::{compute_utilities, utility_vector, UtilityTable};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapOptions {
    pub replicates: usize,
    pub seed: u64,
    /// Coverage of the percentile interval.
    pub confidence_level: f64,
}

impl Default for BootstrapOptions {
    fn default() -> Self {
        Self {
            replicates: 200,
            seed: 0,
            confidence_level: 0.95,
        }
    }
}

/// Percentile interval for one level.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BootstrapInterval {
    pub attribute: String,
    pub level: String,
    pub mean: f64,
    pub lower: f64,
    pub upper: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct BootstrapSummary {
    pub intervals: Vec<BootstrapInterval>,
    pub successful: usize,
    /// Replicates whose refit failed; they are left out of the intervals.
    pub failed: usize,
}

/// Resamples `design` by respondent and summarizes the refitted utilities.
///
/// `reference` supplies the row labels and must come from a fit on `design`.
pub fn bootstrap_utilities(
    design: &DesignMatrix,
    reference: &UtilityTable,
    options: &ConjointOptions,
    bootstrap: &BootstrapOptions,
) -> Result<BootstrapSummary> {
    if bootstrap.replicates == 0 {
        return Err(ConjointError::invalid_setting(
            "replicates",
            "at least one bootstrap replicate is required",
        ));
    }
    if !(bootstrap.confidence_level > 0.0 && bootstrap.confidence_level < 1.0) {
        return Err(ConjointError::invalid_setting(
            "confidence_level",
            format!("{} is not in (0, 1)", bootstrap.confidence_level),
        ));
    }

    let by_respondent = occasions_by_respondent(design);
    let respondents = by_respondent.len();
    if respondents == 0 {
        return Err(ConjointError::EmptyData);
    }

    let outcomes: Vec<Result<Vec<f64>>> = (0..bootstrap.replicates)
        .into_par_iter()
        .map(|replicate| {
            let mut rng = SmallRng::seed_from_u64(bootstrap.seed.wrapping_add(replicate as u64));
            let mut occasions = Vec::with_capacity(design.occasion_count());
            for _ in 0..respondents {
                let drawn = rng.gen_range(0..respondents);
                occasions.extend_from_slice(&by_respondent[drawn]);
            }
            let resampled = design.subset(&occasions);
            let estimation = ChoiceProblem::new(resampled.clone())?.estimate(options)?;
            let table = compute_utilities(&estimation.model, &resampled, options.confidence_level)?;
            Ok(utility_vector(&table).iter().copied().collect())
        })
        .collect();

    let mut draws: Vec<Vec<f64>> = Vec::with_capacity(outcomes.len());
    let mut first_error = None;
    for (replicate, outcome) in outcomes.into_iter().enumerate() {
        match outcome {
            Ok(values) => draws.push(values),
            Err(error) => {
                debug!("bootstrap replicate {replicate} failed: {error}");
                first_error.get_or_insert(error);
            }
        }
    }
    let failed = bootstrap.replicates - draws.len();
    if draws.is_empty() {
        return Err(first_error.unwrap_or(ConjointError::EmptyData));
    }

    let alpha = 1.0 - bootstrap.confidence_level;
    let intervals = reference
        .utilities()
        .iter()
        .enumerate()
        .map(|(index, utility)| {
            let mut column: Vec<f64> = draws.iter().map(|draw| draw[index]).collect();
            column.sort_by(f64::total_cmp);
            BootstrapInterval {
                attribute: utility.attribute.clone(),
                level: utility.level.clone(),
                mean: column.iter().sum::<f64>() / column.len() as f64,
                lower: percentile(&column, alpha / 2.0),
                upper: percentile(&column, 1.0 - alpha / 2.0),
            }
        })
        .collect();

    info!(
        "bootstrap finished: {} of {} replicates succeeded",
        draws.len(),
        bootstrap.replicates
    );
    Ok(BootstrapSummary {
        intervals,
        successful: draws.len(),
        failed,
    })
}

/// Occasion indices grouped by dense respondent index.
fn occasions_by_respondent(design: &DesignMatrix) -> Vec<Vec<usize>> {
    let count = design.respondents().iter().max().map_or(0, |max| max + 1);
    let mut groups = vec![Vec::new(); count];
    for (occasion, &respondent) in design.respondents().iter().enumerate() {
        groups[respondent].push(occasion);
    }
    groups.retain(|group| !group.is_empty());
    groups
}
