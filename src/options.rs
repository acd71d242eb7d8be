//! Analysis settings, mirroring the Settings sheet of a conjoint study configuration.

use serde::{Deserialize, Serialize};

use crate::error::{ConjointError, Result};
use crate::solving::{FallbackOptions, SolverOptions};

/// Which estimation strategy to run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimationMethod {
    /// Newton-Raphson first, the regularized solver if that fails.
    #[default]
    Auto,
    /// Newton-Raphson only.
    Primary,
    /// Regularized damped Newton only.
    Fallback,
}

/// How the levels of each attribute are coded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineHandling {
    /// Effects coding with `k - 1` columns; the last level is implied.
    #[default]
    FirstLevelZero,
    /// One indicator column per level, identified by the ridge penalty.
    AllLevelsExplicit,
}

/// Aggregated configuration for a conjoint analysis run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConjointOptions {
    pub estimation_method: EstimationMethod,
    /// Two-sided confidence level for utility intervals.
    pub confidence_level: f64,
    pub baseline_handling: BaselineHandling,
    /// Levels chosen fewer times than this produce a warning.
    pub min_responses_per_level: usize,
    /// Alternative id marking the outside-good ("None") alternative.
    pub none_label: Option<String>,
    /// Settings for the primary Newton-Raphson solver.
    pub solver: SolverOptions,
    /// Settings for the regularized fallback solver.
    pub fallback: FallbackOptions,
    /// Covariance matrices with a larger condition number produce a warning.
    pub condition_number_threshold: f64,
}

impl Default for ConjointOptions {
    fn default() -> Self {
        Self {
            estimation_method: EstimationMethod::Auto,
            confidence_level: 0.95,
            baseline_handling: BaselineHandling::FirstLevelZero,
            min_responses_per_level: 10,
            none_label: None,
            solver: SolverOptions::default(),
            fallback: FallbackOptions::default(),
            condition_number_threshold: 1e10,
        }
    }
}

impl ConjointOptions {
    pub fn with_estimation_method(mut self, method: EstimationMethod) -> Self {
        self.estimation_method = method;
        self
    }

    pub fn with_confidence_level(mut self, level: f64) -> Self {
        self.confidence_level = level;
        self
    }

    pub fn with_baseline_handling(mut self, handling: BaselineHandling) -> Self {
        self.baseline_handling = handling;
        self
    }

    pub fn with_min_responses_per_level(mut self, minimum: usize) -> Self {
        self.min_responses_per_level = minimum;
        self
    }

    /// Enable the outside-good alternative under the given alternative id.
    pub fn with_none_label(mut self, label: impl Into<String>) -> Self {
        self.none_label = Some(label.into());
        self
    }

    /// Override the primary solver settings while preserving other defaults.
    pub fn with_solver(mut self, solver: SolverOptions) -> Self {
        self.solver = solver;
        self
    }

    /// Override the fallback solver settings while preserving other defaults.
    pub fn with_fallback(mut self, fallback: FallbackOptions) -> Self {
        self.fallback = fallback;
        self
    }

    /// Checks every setting against its accepted range.
    pub fn validate(&self) -> Result<()> {
        if !(0.80..=0.99).contains(&self.confidence_level) {
            return Err(ConjointError::invalid_setting(
                "confidence_level",
                format!("{} is outside 0.80-0.99", self.confidence_level),
            ));
        }
        if let Some(label) = &self.none_label {
            if label.trim().is_empty() {
                return Err(ConjointError::invalid_setting(
                    "none_label",
                    "label must not be blank",
                ));
            }
        }
        if self.solver.max_iterations == 0 {
            return Err(ConjointError::invalid_setting(
                "solver.max_iterations",
                "must be at least 1",
            ));
        }
        if self.fallback.max_iterations == 0 {
            return Err(ConjointError::invalid_setting(
                "fallback.max_iterations",
                "must be at least 1",
            ));
        }
        if !(self.solver.gradient_tolerance > 0.0 && self.solver.step_tolerance > 0.0) {
            return Err(ConjointError::invalid_setting(
                "solver tolerances",
                "must be positive",
            ));
        }
        if !(self.fallback.gradient_tolerance > 0.0 && self.fallback.step_tolerance > 0.0) {
            return Err(ConjointError::invalid_setting(
                "fallback tolerances",
                "must be positive",
            ));
        }
        if !(self.solver.max_abs_coefficient > 0.0) {
            return Err(ConjointError::invalid_setting(
                "solver.max_abs_coefficient",
                "must be positive",
            ));
        }
        if !(self.fallback.ridge > 0.0) {
            return Err(ConjointError::invalid_setting(
                "fallback.ridge",
                "must be positive",
            ));
        }
        if !(self.fallback.initial_damping >= 0.0) {
            return Err(ConjointError::invalid_setting(
                "fallback.initial_damping",
                "must not be negative",
            ));
        }
        if !(self.condition_number_threshold > 1.0) {
            return Err(ConjointError::invalid_setting(
                "condition_number_threshold",
                "must exceed 1",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let options = ConjointOptions::default();
        assert!(options.validate().is_ok());
        assert_eq!(options.estimation_method, EstimationMethod::Auto);
        assert_eq!(options.min_responses_per_level, 10);
    }

    #[test]
    fn confidence_level_out_of_range_is_rejected() {
        let err = ConjointOptions::default()
            .with_confidence_level(0.5)
            .validate()
            .unwrap_err();
        assert_eq!(err.code(), "CONFIG_INVALID_SETTING");
        assert!(err.to_string().contains("confidence_level"));
    }

    #[test]
    fn blank_none_label_is_rejected() {
        let err = ConjointOptions::default()
            .with_none_label("  ")
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("none_label"));
    }
}
