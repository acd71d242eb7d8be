//! Part-worth utilities with delta-method standard errors and normal
//! confidence intervals.
//!
//! Every attribute's level utilities are a linear map `u = L β_a` of that
//! attribute's coefficient block, so their covariance is `L Σ_a Lᵗ`. Under
//! effects coding `L = [I; −1ᵗ]`, which appends the implied reference level
//! and already sums to zero. Under explicit levels `L = I − 11ᵗ/k` centers
//! the indicator coefficients.

use nalgebra::{DMatrix, DVector};
use serde::Serialize;

use crate::design::{AttributeSpan, DesignMatrix};
use crate::error::{ConjointError, Result};
use crate::estimation::ModelResult;
use crate::options::BaselineHandling;
use crate::stats::two_sided_z;

/// One row of the utilities table.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PartWorthUtility {
    pub attribute: String,
    pub level: String,
    pub utility: f64,
    pub standard_error: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
    /// Whether the value was derived from its siblings rather than estimated directly.
    pub is_reference: bool,
}

/// Utilities for every configured level, plus the outside good when modeled.
#[derive(Clone, Debug, Serialize)]
pub struct UtilityTable {
    utilities: Vec<PartWorthUtility>,
    none: Option<PartWorthUtility>,
    confidence_level: f64,
}

impl UtilityTable {
    /// Rows in attribute order, levels in configured order.
    pub fn utilities(&self) -> &[PartWorthUtility] {
        &self.utilities
    }

    /// Utility of the outside-good alternative, if the data offered one.
    pub fn none_utility(&self) -> Option<&PartWorthUtility> {
        self.none.as_ref()
    }

    pub fn confidence_level(&self) -> f64 {
        self.confidence_level
    }

    pub fn for_attribute<'a>(
        &'a self,
        attribute: &'a str,
    ) -> impl Iterator<Item = &'a PartWorthUtility> + 'a {
        self.utilities
            .iter()
            .filter(move |utility| utility.attribute == attribute)
    }

    pub fn get(&self, attribute: &str, level: &str) -> Option<&PartWorthUtility> {
        self.utilities
            .iter()
            .find(|utility| utility.attribute == attribute && utility.level == level)
    }

    /// Attribute names in first-appearance order.
    pub fn attribute_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for utility in &self.utilities {
            if names.last() != Some(&utility.attribute.as_str()) {
                names.push(&utility.attribute);
            }
        }
        names
    }
}

/// Converts fitted coefficients into per-level utilities with intervals at
/// `confidence_level`.
pub fn compute_utilities(
    model: &ModelResult,
    design: &DesignMatrix,
    confidence_level: f64,
) -> Result<UtilityTable> {
    if model.coefficients.len() != design.ncols() {
        return Err(ConjointError::dimension_mismatch(
            "coefficients vs design columns",
            design.ncols(),
            model.coefficients.len(),
        ));
    }
    let z = two_sided_z(confidence_level);

    let mut utilities = Vec::new();
    for span in design.attribute_spans() {
        let map = level_map(span, design.baseline());
        let width = span.columns.len();
        let beta = model.coefficients.rows(span.columns.start, width);
        let sigma = model
            .covariance
            .view((span.columns.start, span.columns.start), (width, width));

        let values = &map * beta;
        let covariance = &map * sigma * map.transpose();

        for (index, level) in span.levels.iter().enumerate() {
            let standard_error = covariance[(index, index)].max(0.0).sqrt();
            let utility = values[index];
            utilities.push(PartWorthUtility {
                attribute: span.name.clone(),
                level: level.clone(),
                utility,
                standard_error,
                ci_lower: utility - z * standard_error,
                ci_upper: utility + z * standard_error,
                is_reference: design.baseline() == BaselineHandling::FirstLevelZero
                    && index + 1 == span.levels.len(),
            });
        }
    }

    let none = design.none_column().map(|col| {
        let weights = none_weights(design, col);
        let utility = weights.dot(&model.coefficients);
        let standard_error = (weights.transpose() * &model.covariance * &weights)[(0, 0)]
            .max(0.0)
            .sqrt();
        PartWorthUtility {
            attribute: "None".into(),
            level: "None".into(),
            utility,
            standard_error,
            ci_lower: utility - z * standard_error,
            ci_upper: utility + z * standard_error,
            is_reference: false,
        }
    });

    Ok(UtilityTable {
        utilities,
        none,
        confidence_level,
    })
}

/// Level utilities of one attribute as a linear map of its coefficients.
fn level_map(span: &AttributeSpan, baseline: BaselineHandling) -> DMatrix<f64> {
    let k = span.levels.len();
    match baseline {
        BaselineHandling::FirstLevelZero => {
            let mut map = DMatrix::zeros(k, k - 1);
            map.view_mut((0, 0), (k - 1, k - 1)).fill_with_identity();
            map.row_mut(k - 1).fill(-1.0);
            map
        }
        BaselineHandling::AllLevelsExplicit => {
            DMatrix::identity(k, k) - DMatrix::from_element(k, k, 1.0 / k as f64)
        }
    }
}

/// The None utility as a linear combination of the coefficients.
///
/// Centering explicit levels shifts every product's utility by
/// `−Σ_a mean(β_a)`, so the constant moves by the same amount to stay on
/// the part-worth scale. Effects-coded levels already sum to zero.
fn none_weights(design: &DesignMatrix, none_column: usize) -> DVector<f64> {
    let mut weights = DVector::zeros(design.ncols());
    weights[none_column] = 1.0;
    if design.baseline() == BaselineHandling::AllLevelsExplicit {
        for span in design.attribute_spans() {
            let share = 1.0 / span.levels.len() as f64;
            for col in span.columns.clone() {
                weights[col] -= share;
            }
        }
    }
    weights
}

/// Utility vector in table order, convenient for resampling summaries.
pub(crate) fn utility_vector(table: &UtilityTable) -> DVector<f64> {
    DVector::from_iterator(
        table.utilities.len(),
        table.utilities.iter().map(|utility| utility.utility),
    )
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::attribute::Attribute;
    use crate::data::{ChoiceDataBuilder, ChoiceObservation};
    use crate::estimation::MethodUsed;
    use crate::solving::SolverSummary;

    fn design(baseline: BaselineHandling) -> DesignMatrix {
        let attributes = vec![
            Attribute::new("Brand", ["A", "B", "C"]).unwrap(),
            Attribute::new("Size", ["S", "L"]).unwrap(),
        ];
        let observations = vec![
            ChoiceObservation::new("r1", "1", true)
                .level("Brand", "A")
                .level("Size", "S"),
            ChoiceObservation::new("r1", "1", false)
                .level("Brand", "C")
                .level("Size", "L"),
        ];
        let data = ChoiceDataBuilder::new(attributes, observations)
            .min_responses_per_level(0)
            .build()
            .unwrap();
        DesignMatrix::build(&data, baseline).unwrap()
    }

    fn model(coefficients: Vec<f64>, covariance: DMatrix<f64>) -> ModelResult {
        ModelResult {
            coefficients: DVector::from_vec(coefficients),
            covariance,
            log_likelihood: -1.0,
            converged: true,
            iterations: 3,
            method: MethodUsed::NewtonRaphson,
            summary: SolverSummary {
                iterations: 3,
                max_gradient: 0.0,
                last_step: 0.0,
            },
            condition_number: 1.0,
        }
    }

    #[test]
    fn reference_level_is_negative_sum_with_delta_method_error() {
        let design = design(BaselineHandling::FirstLevelZero);
        let covariance = DMatrix::from_row_slice(
            3,
            3,
            &[
                0.04, 0.01, 0.0, //
                0.01, 0.09, 0.0, //
                0.0, 0.0, 0.16,
            ],
        );
        let model = model(vec![0.5, 0.2, -0.3], covariance);
        let table = compute_utilities(&model, &design, 0.95).unwrap();

        let reference = table.get("Brand", "C").unwrap();
        assert!(reference.is_reference);
        assert_relative_eq!(reference.utility, -0.7, epsilon = 1e-12);
        // 1ᵗ Σ 1 over the Brand block = 0.04 + 0.09 + 2 * 0.01.
        assert_relative_eq!(reference.standard_error, 0.15f64.sqrt(), epsilon = 1e-12);
        assert_relative_eq!(
            reference.ci_upper - reference.utility,
            1.959_963_985 * 0.15f64.sqrt(),
            epsilon = 1e-8
        );

        let a = table.get("Brand", "A").unwrap();
        assert_relative_eq!(a.standard_error, 0.2, epsilon = 1e-12);
        let large = table.get("Size", "L").unwrap();
        assert_relative_eq!(large.utility, 0.3, epsilon = 1e-12);
        assert_relative_eq!(large.standard_error, 0.4, epsilon = 1e-12);

        for name in table.attribute_names() {
            let total: f64 = table.for_attribute(name).map(|u| u.utility).sum();
            assert!(total.abs() < 1e-12, "{name} sums to {total}");
        }
        assert!(table.none_utility().is_none());
    }

    #[test]
    fn explicit_levels_are_centered() {
        let design = design(BaselineHandling::AllLevelsExplicit);
        let model = model(
            vec![1.0, 2.0, 6.0, 0.5, 1.5],
            DMatrix::identity(5, 5) * 0.01,
        );
        let table = compute_utilities(&model, &design, 0.90).unwrap();
        assert_relative_eq!(table.get("Brand", "A").unwrap().utility, -2.0, epsilon = 1e-12);
        assert_relative_eq!(table.get("Brand", "C").unwrap().utility, 3.0, epsilon = 1e-12);
        assert_relative_eq!(table.get("Size", "S").unwrap().utility, -0.5, epsilon = 1e-12);
        // Var of (I - J/3) row: 0.01 * (1 - 1/3).
        assert_relative_eq!(
            table.get("Brand", "B").unwrap().standard_error,
            (0.01f64 * 2.0 / 3.0).sqrt(),
            epsilon = 1e-12
        );
        assert!(table.utilities().iter().all(|u| !u.is_reference));
    }

    fn design_with_none(baseline: BaselineHandling) -> DesignMatrix {
        let attributes = vec![
            Attribute::new("Brand", ["A", "B", "C"]).unwrap(),
            Attribute::new("Size", ["S", "L"]).unwrap(),
        ];
        let observations = vec![
            ChoiceObservation::new("r1", "1", true)
                .alternative("1")
                .level("Brand", "A")
                .level("Size", "S"),
            ChoiceObservation::new("r1", "1", false)
                .alternative("2")
                .level("Brand", "C")
                .level("Size", "L"),
            ChoiceObservation::new("r1", "1", false).alternative("NONE"),
        ];
        let data = ChoiceDataBuilder::new(attributes, observations)
            .none_label(Some("NONE".into()))
            .min_responses_per_level(0)
            .build()
            .unwrap();
        DesignMatrix::build(&data, baseline).unwrap()
    }

    #[test]
    fn none_utility_follows_centered_explicit_levels() {
        let design = design_with_none(BaselineHandling::AllLevelsExplicit);
        let model = model(
            vec![1.0, 2.0, 6.0, 0.5, 1.5, 0.7],
            DMatrix::identity(6, 6) * 0.01,
        );
        let table = compute_utilities(&model, &design, 0.95).unwrap();
        let none = table.none_utility().unwrap();
        // Brand mean 3, Size mean 1.
        assert_relative_eq!(none.utility, 0.7 - 4.0, epsilon = 1e-12);
        // Weights: 1 on the constant, -1/3 across Brand, -1/2 across Size.
        assert_relative_eq!(
            none.standard_error,
            (0.01f64 * (1.0 + 3.0 / 9.0 + 2.0 / 4.0)).sqrt(),
            epsilon = 1e-12
        );

        // A product's utility relative to None is unchanged by centering.
        let product = table.get("Brand", "C").unwrap().utility + table.get("Size", "L").unwrap().utility;
        assert_relative_eq!(product - none.utility, (6.0 + 1.5) - 0.7, epsilon = 1e-12);
    }

    #[test]
    fn none_utility_is_the_constant_under_effects_coding() {
        let design = design_with_none(BaselineHandling::FirstLevelZero);
        let model = model(vec![0.5, 0.2, -0.3, 0.4], DMatrix::identity(4, 4) * 0.04);
        let none = compute_utilities(&model, &design, 0.95)
            .unwrap()
            .none_utility()
            .cloned()
            .unwrap();
        assert_relative_eq!(none.utility, 0.4, epsilon = 1e-12);
        assert_relative_eq!(none.standard_error, 0.2, epsilon = 1e-12);
    }

    #[test]
    fn mismatched_coefficients_are_rejected() {
        let design = design(BaselineHandling::FirstLevelZero);
        let model = model(vec![0.1, 0.2], DMatrix::identity(2, 2));
        let err = compute_utilities(&model, &design, 0.95).unwrap_err();
        assert_eq!(err.code(), "CALC_DIMENSION_MISMATCH");
    }
}
