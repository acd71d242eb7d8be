use serde::Serialize;
use thiserror::Error;

/// Broad family an error belongs to. Configuration and data errors are
/// raised before estimation begins; calculation errors come from the
/// numerical stages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    Configuration,
    Data,
    Calculation,
}

/// Identifies a choice occasion by the keys it carries in the source data.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct OccasionKey {
    pub respondent_id: String,
    pub choice_set_id: String,
}

impl OccasionKey {
    pub fn new(respondent_id: impl Into<String>, choice_set_id: impl Into<String>) -> Self {
        Self {
            respondent_id: respondent_id.into(),
            choice_set_id: choice_set_id.into(),
        }
    }
}

impl std::fmt::Display for OccasionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "respondent `{}` / choice set `{}`",
            self.respondent_id, self.choice_set_id
        )
    }
}

/// Why an estimation strategy gave up.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum FailureReason {
    /// The iteration budget ran out before the convergence criteria were met.
    IterationLimit,
    /// The negative Hessian could not be factorized.
    SingularHessian,
    /// Log-likelihood, gradient or coefficients became NaN or infinite.
    NonFinite,
    /// Step halving ran out without improving the log-likelihood.
    LineSearch,
    /// Coefficients drifted past the configured bound, the usual symptom of
    /// perfect separation.
    Divergence,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            FailureReason::IterationLimit => "iteration limit reached",
            FailureReason::SingularHessian => "singular Hessian",
            FailureReason::NonFinite => "non-finite log-likelihood",
            FailureReason::LineSearch => "no step improved the log-likelihood",
            FailureReason::Divergence => "coefficients diverged",
        };
        f.write_str(text)
    }
}

/// Unified error type for `cbcrs` operations.
#[derive(Debug, Error)]
pub enum ConjointError {
    /// A level appears in the data but not in the attribute configuration.
    #[error(
        "level `{level}` of attribute `{attribute}` (row {row}) is not in the configured level set"
    )]
    LevelMismatch {
        attribute: String,
        level: String,
        row: usize,
    },

    /// A setting value is outside its accepted range.
    #[error("invalid setting `{setting}`: {problem}")]
    InvalidSetting {
        setting: &'static str,
        problem: String,
    },

    /// The attribute configuration itself is malformed.
    #[error("invalid attribute `{attribute}`: {problem}")]
    InvalidAttribute { attribute: String, problem: String },

    /// An occasion does not have exactly one chosen alternative.
    #[error("choice occasion {occasion} has {chosen} chosen alternatives; exactly one is required")]
    ChoiceIntegrity { occasion: OccasionKey, chosen: usize },

    /// An occasion offers fewer than two alternatives.
    #[error("choice occasion {occasion} has {alternatives} alternative(s); at least two are required")]
    TooFewAlternatives {
        occasion: OccasionKey,
        alternatives: usize,
    },

    /// A configured attribute has no value on an observation.
    #[error("row {row} has no value for attribute `{attribute}`")]
    MissingAttribute { attribute: String, row: usize },

    /// A column or attribute name is not known to the configuration.
    #[error("unknown column `{column}`{}", .row.map(|r| format!(" on row {r}")).unwrap_or_default())]
    UnknownColumn { column: String, row: Option<usize> },

    /// A cell could not be interpreted.
    #[error("row {row}, column `{column}`: cannot interpret value `{value}`")]
    InvalidValue {
        column: String,
        value: String,
        row: usize,
    },

    /// No observations were supplied.
    #[error("the choice dataset is empty")]
    EmptyData,

    /// Both estimation strategies failed.
    #[error(
        "estimation did not converge ({reason}) after {iterations} iterations; last log-likelihood {log_likelihood}"
    )]
    NonConvergence {
        reason: FailureReason,
        iterations: usize,
        log_likelihood: f64,
    },

    /// The negative Hessian at the optimum cannot be inverted.
    #[error("variance-covariance matrix in {context} is singular")]
    SingularCovariance { context: &'static str },

    /// Every attribute has a utility range of zero.
    #[error("all attribute utility ranges are zero; importance is undefined")]
    ZeroRange,

    /// The simulator was handed a level that has no fitted utility.
    #[error(
        "product configuration {configuration} references unknown level `{level}` of attribute `{attribute}`"
    )]
    UnknownLevel {
        attribute: String,
        level: String,
        configuration: usize,
    },

    /// The simulator was handed an attribute the fitted model does not have.
    #[error("product configuration {configuration} references unknown attribute `{attribute}`")]
    UnknownAttribute {
        attribute: String,
        configuration: usize,
    },

    /// Fitted choice probabilities within an occasion do not sum to one.
    #[error("predicted probabilities for occasion {occasion} sum to {total}")]
    ProbabilityNormalization { occasion: usize, total: f64 },

    /// Arrays or matrices have incompatible dimensions.
    #[error("dimension mismatch in {context}: expected {expected} but found {found}")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        found: usize,
    },
}

impl ConjointError {
    /// Helper to format a [`DimensionMismatch`](ConjointError::DimensionMismatch) error.
    pub fn dimension_mismatch(context: &'static str, expected: usize, found: usize) -> Self {
        Self::DimensionMismatch {
            context,
            expected,
            found,
        }
    }

    /// Helper to raise when a covariance factorization fails.
    pub fn singular(context: &'static str) -> Self {
        Self::SingularCovariance { context }
    }

    /// Helper for settings validation.
    pub fn invalid_setting(setting: &'static str, problem: impl Into<String>) -> Self {
        Self::InvalidSetting {
            setting,
            problem: problem.into(),
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::LevelMismatch { .. } => "CONFIG_LEVEL_MISMATCH",
            Self::InvalidSetting { .. } => "CONFIG_INVALID_SETTING",
            Self::InvalidAttribute { .. } => "CONFIG_INVALID_ATTRIBUTE",
            Self::ChoiceIntegrity { .. } => "DATA_CHOICE_INTEGRITY",
            Self::TooFewAlternatives { .. } => "DATA_TOO_FEW_ALTERNATIVES",
            Self::MissingAttribute { .. } => "DATA_MISSING_ATTRIBUTE",
            Self::UnknownColumn { .. } => "DATA_UNKNOWN_COLUMN",
            Self::InvalidValue { .. } => "DATA_INVALID_VALUE",
            Self::EmptyData => "DATA_EMPTY",
            Self::NonConvergence { .. } => "CALC_NONCONVERGENCE",
            Self::SingularCovariance { .. } => "CALC_SINGULAR_COVARIANCE",
            Self::ZeroRange => "CALC_ZERO_RANGE",
            Self::UnknownLevel { .. } | Self::UnknownAttribute { .. } => "CALC_UNKNOWN_LEVEL",
            Self::ProbabilityNormalization { .. } => "CALC_PROBABILITY_NORMALIZATION",
            Self::DimensionMismatch { .. } => "CALC_DIMENSION_MISMATCH",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self.code().split('_').next() {
            Some("CONFIG") => ErrorKind::Configuration,
            Some("DATA") => ErrorKind::Data,
            _ => ErrorKind::Calculation,
        }
    }

    /// What the caller should change to get past this error.
    pub fn remediation(&self) -> &'static str {
        match self {
            Self::LevelMismatch { .. } => {
                "Add the level to the attribute configuration or correct the spelling in the data; matching is case-sensitive."
            }
            Self::InvalidSetting { .. } => "Correct the setting value in the configuration.",
            Self::InvalidAttribute { .. } => {
                "Give every attribute a unique name and at least two distinct levels."
            }
            Self::ChoiceIntegrity { .. } => {
                "Mark exactly one alternative as chosen in the named choice set."
            }
            Self::TooFewAlternatives { .. } => {
                "Check the respondent and choice set columns; each choice set must show at least two alternatives."
            }
            Self::MissingAttribute { .. } => "Fill in the attribute value on the named row.",
            Self::UnknownColumn { .. } => {
                "Remove the column or add it to the attribute configuration and column mapping."
            }
            Self::InvalidValue { .. } => "Use 1/0 or true/false in the chosen column.",
            Self::EmptyData => "Supply at least one choice occasion.",
            Self::NonConvergence { .. } => {
                "Look for levels that are always or never chosen (perfect separation), merge sparse levels, or collect more data."
            }
            Self::SingularCovariance { .. } => {
                "Check the design for collinear attributes or levels that never vary within a choice set."
            }
            Self::ZeroRange => {
                "The model found no preference differences; verify the chosen column and the design."
            }
            Self::UnknownLevel { .. } | Self::UnknownAttribute { .. } => {
                "Use attribute and level names exactly as configured for the fitted model."
            }
            Self::ProbabilityNormalization { .. } => {
                "Coefficients are numerically unstable; refit with the fallback estimation method."
            }
            Self::DimensionMismatch { .. } => {
                "Internal inconsistency between the design matrix and the fitted model."
            }
        }
    }
}

/// Type alias for results returned by this crate.
pub type Result<T> = std::result::Result<T, ConjointError>;

/// Non-fatal conditions attached to results for the caller to act on.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum ConjointWarning {
    /// A level was chosen fewer times than `min_responses_per_level`.
    LowLevelCount {
        attribute: String,
        level: String,
        chosen: usize,
        minimum: usize,
    },
    /// The covariance matrix is invertible but badly conditioned.
    NearSingularCovariance { condition_number: f64 },
    /// The primary strategy failed and the fallback produced the estimates.
    FallbackUsed { reason: FailureReason },
}

impl ConjointWarning {
    pub fn code(&self) -> &'static str {
        match self {
            Self::LowLevelCount { .. } => "WARN_LOW_LEVEL_COUNT",
            Self::NearSingularCovariance { .. } => "WARN_NEAR_SINGULAR_COVARIANCE",
            Self::FallbackUsed { .. } => "WARN_FALLBACK_USED",
        }
    }
}

impl std::fmt::Display for ConjointWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LowLevelCount {
                attribute,
                level,
                chosen,
                minimum,
            } => write!(
                f,
                "level `{level}` of `{attribute}` was chosen {chosen} times (minimum {minimum})"
            ),
            Self::NearSingularCovariance { condition_number } => write!(
                f,
                "covariance matrix is near-singular (condition number {condition_number:.3e}); standard errors may be unreliable"
            ),
            Self::FallbackUsed { reason } => {
                write!(f, "primary estimator failed ({reason}); fallback estimates used")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_map_to_kinds() {
        let err = ConjointError::ChoiceIntegrity {
            occasion: OccasionKey::new("r1", "3"),
            chosen: 2,
        };
        assert_eq!(err.code(), "DATA_CHOICE_INTEGRITY");
        assert_eq!(err.kind(), ErrorKind::Data);
        assert!(err.to_string().contains("respondent `r1` / choice set `3`"));

        assert_eq!(ConjointError::ZeroRange.kind(), ErrorKind::Calculation);
        assert_eq!(
            ConjointError::invalid_setting("confidence_level", "too high").kind(),
            ErrorKind::Configuration
        );
    }

    #[test]
    fn unknown_column_message_mentions_row_when_known() {
        let with_row = ConjointError::UnknownColumn {
            column: "Colour".into(),
            row: Some(4),
        };
        assert_eq!(with_row.to_string(), "unknown column `Colour` on row 4");
        let without = ConjointError::UnknownColumn {
            column: "Colour".into(),
            row: None,
        };
        assert_eq!(without.to_string(), "unknown column `Colour`");
    }

    #[test]
    fn exhausted_line_search_is_not_reported_as_non_finite() {
        let err = ConjointError::NonConvergence {
            reason: FailureReason::LineSearch,
            iterations: 7,
            log_likelihood: -12.5,
        };
        let message = err.to_string();
        assert!(message.contains("no step improved the log-likelihood"));
        assert!(!message.contains("non-finite"));
        assert!(message.contains("-12.5"));
    }
}
