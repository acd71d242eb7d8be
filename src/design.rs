//! Effects-coded design matrix construction.
//!
//! Under the default [`BaselineHandling::FirstLevelZero`] an attribute with
//! `k` levels contributes `k - 1` columns. A row showing level `j < k - 1`
//! has `1` in column `j` and `0` in the attribute's other columns; a row
//! showing the last level has `-1` in all of them. The implied utility of
//! the last level is then the negative sum of its siblings, so utilities
//! within an attribute sum to zero.
//!
//! [`BaselineHandling::AllLevelsExplicit`] emits one plain indicator column
//! per level instead. That model is only identified up to a per-attribute
//! shift and must be fitted with the ridge-penalized estimator.
//!
//! When the data contains an outside-good alternative, one extra
//! alternative-specific constant column is appended: `1` on None rows and
//! `0` elsewhere. None rows are `0` in every attribute column.

use std::ops::Range;

use nalgebra::DMatrix;
use serde::Serialize;

use crate::data::ChoiceData;
use crate::error::{ConjointError, Result};
use crate::options::BaselineHandling;

/// What a design column measures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ColumnKind {
    Effects,
    Indicator,
    NoneConstant,
}

/// Maps one design column back to the level it codes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DesignColumn {
    pub attribute: String,
    pub level: String,
    pub kind: ColumnKind,
}

/// The block of columns belonging to one attribute.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AttributeSpan {
    pub name: String,
    /// All levels in configured order, including an implied reference level.
    pub levels: Vec<String>,
    pub columns: Range<usize>,
}

/// Numeric design plus the occasion structure the likelihood iterates over.
#[derive(Clone, Debug)]
pub struct DesignMatrix {
    matrix: DMatrix<f64>,
    columns: Vec<DesignColumn>,
    spans: Vec<AttributeSpan>,
    none_column: Option<usize>,
    baseline: BaselineHandling,
    occasions: Vec<Range<usize>>,
    chosen_rows: Vec<usize>,
    respondents: Vec<usize>,
}

impl DesignMatrix {
    /// Codes every validated row of `data`.
    pub fn build(data: &ChoiceData, baseline: BaselineHandling) -> Result<Self> {
        let mut columns = Vec::new();
        let mut spans = Vec::with_capacity(data.attributes().len());
        for attribute in data.attributes() {
            let start = columns.len();
            let (coded, kind) = match baseline {
                BaselineHandling::FirstLevelZero => {
                    (&attribute.levels()[..attribute.level_count() - 1], ColumnKind::Effects)
                }
                BaselineHandling::AllLevelsExplicit => (attribute.levels(), ColumnKind::Indicator),
            };
            for level in coded {
                columns.push(DesignColumn {
                    attribute: attribute.name().to_string(),
                    level: level.clone(),
                    kind,
                });
            }
            spans.push(AttributeSpan {
                name: attribute.name().to_string(),
                levels: attribute.levels().to_vec(),
                columns: start..columns.len(),
            });
        }

        let none_column = data.has_none_alternative().then(|| {
            columns.push(DesignColumn {
                attribute: "None".into(),
                level: "None".into(),
                kind: ColumnKind::NoneConstant,
            });
            columns.len() - 1
        });

        let mut matrix = DMatrix::zeros(data.observation_count(), columns.len());
        for (row_index, row) in data.rows().iter().enumerate() {
            if row.is_none {
                if let Some(col) = none_column {
                    matrix[(row_index, col)] = 1.0;
                }
                continue;
            }
            for (attribute_index, span) in spans.iter().enumerate() {
                let level = *row.level_indices.get(attribute_index).ok_or_else(|| {
                    ConjointError::MissingAttribute {
                        attribute: span.name.clone(),
                        row: row.source_row,
                    }
                })?;
                match baseline {
                    BaselineHandling::FirstLevelZero => {
                        if level + 1 == span.levels.len() {
                            for col in span.columns.clone() {
                                matrix[(row_index, col)] = -1.0;
                            }
                        } else {
                            matrix[(row_index, span.columns.start + level)] = 1.0;
                        }
                    }
                    BaselineHandling::AllLevelsExplicit => {
                        matrix[(row_index, span.columns.start + level)] = 1.0;
                    }
                }
            }
        }

        let partition = data.partition();
        let occasions: Vec<Range<usize>> = partition.occasions().map(|o| o.range()).collect();
        let chosen_rows = partition
            .occasions()
            .map(|o| o.range().start + o.chosen)
            .collect();
        let respondents = partition.occasions().map(|o| o.respondent).collect();

        Ok(Self {
            matrix,
            columns,
            spans,
            none_column,
            baseline,
            occasions,
            chosen_rows,
            respondents,
        })
    }

    /// Copies the listed occasions (repeats allowed) into a new design.
    pub fn subset(&self, occasion_indices: &[usize]) -> Self {
        let rows: usize = occasion_indices
            .iter()
            .map(|&o| self.occasions[o].len())
            .sum();
        let mut matrix = DMatrix::zeros(rows, self.ncols());
        let mut occasions = Vec::with_capacity(occasion_indices.len());
        let mut chosen_rows = Vec::with_capacity(occasion_indices.len());
        let mut respondents = Vec::with_capacity(occasion_indices.len());

        let mut next = 0usize;
        for &o in occasion_indices {
            let source = self.occasions[o].clone();
            let len = source.len();
            matrix
                .rows_mut(next, len)
                .copy_from(&self.matrix.rows(source.start, len));
            chosen_rows.push(next + (self.chosen_rows[o] - source.start));
            respondents.push(self.respondents[o]);
            occasions.push(next..next + len);
            next += len;
        }

        Self {
            matrix,
            columns: self.columns.clone(),
            spans: self.spans.clone(),
            none_column: self.none_column,
            baseline: self.baseline,
            occasions,
            chosen_rows,
            respondents,
        }
    }

    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    pub fn nrows(&self) -> usize {
        self.matrix.nrows()
    }

    /// Number of coefficients to estimate.
    pub fn ncols(&self) -> usize {
        self.matrix.ncols()
    }

    pub fn columns(&self) -> &[DesignColumn] {
        &self.columns
    }

    pub fn attribute_spans(&self) -> &[AttributeSpan] {
        &self.spans
    }

    /// Column of the outside-good constant, if the data offered one.
    pub fn none_column(&self) -> Option<usize> {
        self.none_column
    }

    pub fn baseline(&self) -> BaselineHandling {
        self.baseline
    }

    pub fn occasion_count(&self) -> usize {
        self.occasions.len()
    }

    /// Row range of each occasion, in dense occasion order.
    pub fn occasions(&self) -> &[Range<usize>] {
        &self.occasions
    }

    /// Absolute row index of the chosen alternative in `occasion`.
    pub fn chosen_row(&self, occasion: usize) -> usize {
        self.chosen_rows[occasion]
    }

    /// Dense respondent index of each occasion.
    pub fn respondents(&self) -> &[usize] {
        &self.respondents
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::Attribute;
    use crate::data::{ChoiceDataBuilder, ChoiceObservation};

    fn data(with_none: bool) -> ChoiceData {
        let attributes = vec![
            Attribute::new("Brand", ["Apple", "Samsung", "Google"]).unwrap(),
            Attribute::new("Storage", ["128", "256"]).unwrap(),
        ];
        let mut observations = vec![
            ChoiceObservation::new("r1", "1", !with_none)
                .level("Brand", "Apple")
                .level("Storage", "256"),
            ChoiceObservation::new("r1", "1", false)
                .level("Brand", "Google")
                .level("Storage", "128"),
            ChoiceObservation::new("r1", "2", false)
                .level("Brand", "Samsung")
                .level("Storage", "128"),
            ChoiceObservation::new("r1", "2", true)
                .level("Brand", "Google")
                .level("Storage", "256"),
        ];
        if with_none {
            observations.insert(2, ChoiceObservation::new("r1", "1", true).alternative("NONE"));
        }
        ChoiceDataBuilder::new(attributes, observations)
            .none_label(Some("NONE".into()))
            .min_responses_per_level(0)
            .build()
            .unwrap()
    }

    #[test]
    fn effects_coding_uses_minus_one_for_reference_level() {
        let design = DesignMatrix::build(&data(false), BaselineHandling::FirstLevelZero).unwrap();
        assert_eq!(design.ncols(), 3);
        let expected = DMatrix::from_row_slice(
            4,
            3,
            &[
                1.0, 0.0, -1.0, //
                -1.0, -1.0, 1.0, //
                0.0, 1.0, 1.0, //
                -1.0, -1.0, -1.0,
            ],
        );
        assert_eq!(design.matrix(), &expected);
        assert_eq!(design.attribute_spans()[0].columns, 0..2);
        assert_eq!(design.attribute_spans()[1].levels, vec!["128", "256"]);
        assert_eq!(design.columns()[2].level, "128");
        assert_eq!(design.chosen_row(1), 3);
        assert_eq!(design.none_column(), None);
    }

    #[test]
    fn explicit_levels_use_indicator_columns() {
        let design =
            DesignMatrix::build(&data(false), BaselineHandling::AllLevelsExplicit).unwrap();
        assert_eq!(design.ncols(), 5);
        assert_eq!(design.matrix().row(1).iter().sum::<f64>(), 2.0);
        assert_eq!(design.matrix()[(1, 2)], 1.0);
        assert_eq!(design.columns()[4].kind, ColumnKind::Indicator);
    }

    #[test]
    fn none_rows_get_the_constant_column_only() {
        let design = DesignMatrix::build(&data(true), BaselineHandling::FirstLevelZero).unwrap();
        assert_eq!(design.none_column(), Some(3));
        let none_row = design.matrix().row(2);
        assert_eq!(none_row.iter().copied().collect::<Vec<_>>(), vec![0.0, 0.0, 0.0, 1.0]);
        assert_eq!(design.occasions()[0], 0..3);
        assert_eq!(design.chosen_row(0), 2);
    }

    #[test]
    fn subset_repeats_occasions_with_rebased_rows() {
        let design = DesignMatrix::build(&data(false), BaselineHandling::FirstLevelZero).unwrap();
        let boot = design.subset(&[1, 1, 0]);
        assert_eq!(boot.nrows(), 6);
        assert_eq!(boot.occasions()[1], 2..4);
        assert_eq!(boot.chosen_row(1), 3);
        assert_eq!(boot.chosen_row(2), 4);
        assert_eq!(boot.matrix().row(4), design.matrix().row(0));
    }
}
