//! Range-based attribute importance.

use serde::Serialize;

use crate::error::{ConjointError, Result};
use crate::utilities::UtilityTable;

/// Share of the total utility swing attributable to one attribute.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ImportanceScore {
    pub attribute: String,
    /// `max − min` of the attribute's level utilities.
    pub range: f64,
    /// Percentage of the summed ranges; sums to 100 across attributes.
    pub importance_percent: f64,
}

/// `importance_a = 100 × range_a / Σ_b range_b`, with ranges taken over
/// every level including the implied reference level. The outside good is
/// not an attribute and does not take part.
///
/// Fails with `CALC_ZERO_RANGE` when every range is zero.
pub fn compute_importance(table: &UtilityTable) -> Result<Vec<ImportanceScore>> {
    let ranges: Vec<(String, f64)> = table
        .attribute_names()
        .into_iter()
        .map(|name| {
            let (min, max) = table
                .for_attribute(name)
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), u| {
                    (lo.min(u.utility), hi.max(u.utility))
                });
            (name.to_string(), max - min)
        })
        .collect();

    let total: f64 = ranges.iter().map(|(_, range)| range).sum();
    if !(total > 0.0) {
        return Err(ConjointError::ZeroRange);
    }

    Ok(ranges
        .into_iter()
        .map(|(attribute, range)| ImportanceScore {
            attribute,
            range,
            importance_percent: 100.0 * range / total,
        })
        .collect())
}
