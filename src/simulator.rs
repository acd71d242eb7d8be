//! Logit share simulation for hypothetical products.
//!
//! A product's total utility is the sum of the part-worths of the levels it
//! specifies; unspecified attributes contribute nothing. A product that
//! specifies no attribute at all is a blank placeholder and is left out of
//! both the numerator and the denominator. The outside good, when
//! included, competes with the active products on its own utility.

use std::collections::{BTreeMap, HashMap};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{ConjointError, Result};
use crate::utilities::UtilityTable;

/// A hypothetical product: attribute → level, possibly partial or empty.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductConfiguration {
    pub id: String,
    #[serde(default)]
    pub levels: BTreeMap<String, String>,
}

impl ProductConfiguration {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            levels: BTreeMap::new(),
        }
    }

    pub fn level(mut self, attribute: impl Into<String>, level: impl Into<String>) -> Self {
        self.levels.insert(attribute.into(), level.into());
        self
    }

    /// No attribute assigned at all.
    pub fn is_blank(&self) -> bool {
        self.levels.is_empty()
    }
}

/// Simulated share of one product.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProductShare {
    pub configuration_id: String,
    pub share_percent: f64,
    /// Total utility; `None` for blank products.
    pub utility: Option<f64>,
    /// Blank products are inactive and always receive zero share.
    pub active: bool,
}

/// Shares for one scenario. Active shares plus the None share sum to 100.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MarketShareResult {
    pub shares: Vec<ProductShare>,
    pub none_share_percent: Option<f64>,
}

impl MarketShareResult {
    pub fn share_of(&self, configuration_id: &str) -> Option<f64> {
        self.shares
            .iter()
            .find(|share| share.configuration_id == configuration_id)
            .map(|share| share.share_percent)
    }

    /// Sum over active products and the None alternative.
    pub fn total_percent(&self) -> f64 {
        self.shares
            .iter()
            .filter(|share| share.active)
            .map(|share| share.share_percent)
            .sum::<f64>()
            + self.none_share_percent.unwrap_or(0.0)
    }
}

/// One point of a level sweep.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SensitivityPoint {
    pub level: String,
    pub share_percent: f64,
}

/// Share simulator bound to one set of fitted utilities. It never mutates
/// them and is safe to share across threads.
#[derive(Clone, Debug)]
pub struct MarketSimulator {
    /// Attribute → (level → utility), with attribute level orders kept for sweeps.
    utilities: HashMap<String, HashMap<String, f64>>,
    levels: HashMap<String, Vec<String>>,
    none_utility: Option<f64>,
}

impl MarketSimulator {
    /// Builds a simulator from a utilities table. The estimated None utility,
    /// if any, becomes the outside-good utility.
    pub fn new(table: &UtilityTable) -> Self {
        let mut utilities: HashMap<String, HashMap<String, f64>> = HashMap::new();
        let mut levels: HashMap<String, Vec<String>> = HashMap::new();
        for utility in table.utilities() {
            utilities
                .entry(utility.attribute.clone())
                .or_default()
                .insert(utility.level.clone(), utility.utility);
            levels
                .entry(utility.attribute.clone())
                .or_default()
                .push(utility.level.clone());
        }
        Self {
            utilities,
            levels,
            none_utility: table.none_utility().map(|none| none.utility),
        }
    }

    /// Overrides the outside-good utility.
    pub fn with_none_utility(mut self, utility: f64) -> Self {
        self.none_utility = Some(utility);
        self
    }

    pub fn none_utility(&self) -> Option<f64> {
        self.none_utility
    }

    /// Total utility of `product`, or `None` for a blank product.
    pub fn total_utility(
        &self,
        product: &ProductConfiguration,
        configuration: usize,
    ) -> Result<Option<f64>> {
        if product.is_blank() {
            return Ok(None);
        }
        let mut total = 0.0_f64;
        for (attribute, level) in &product.levels {
            let levels = self.utilities.get(attribute).ok_or_else(|| {
                ConjointError::UnknownAttribute {
                    attribute: attribute.clone(),
                    configuration,
                }
            })?;
            let utility = levels.get(level).ok_or_else(|| ConjointError::UnknownLevel {
                attribute: attribute.clone(),
                level: level.clone(),
                configuration,
            })?;
            total += *utility;
        }
        Ok(Some(total))
    }

    /// Logit shares for one scenario, in percent.
    pub fn simulate(
        &self,
        products: &[ProductConfiguration],
        include_none: bool,
    ) -> Result<MarketShareResult> {
        let none = if include_none {
            Some(self.none_utility.ok_or_else(|| {
                ConjointError::invalid_setting(
                    "none_label",
                    "no outside-good utility was estimated or supplied",
                )
            })?)
        } else {
            None
        };

        let totals = products
            .iter()
            .enumerate()
            .map(|(index, product)| self.total_utility(product, index))
            .collect::<Result<Vec<_>>>()?;

        let max = totals
            .iter()
            .flatten()
            .chain(none.iter())
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        if max == f64::NEG_INFINITY {
            return Err(ConjointError::invalid_setting(
                "products",
                "at least one non-blank product or the None alternative is required",
            ));
        }

        let denominator: f64 = totals
            .iter()
            .flatten()
            .chain(none.iter())
            .map(|u| (u - max).exp())
            .sum();

        let shares = products
            .iter()
            .zip(&totals)
            .map(|(product, total)| ProductShare {
                configuration_id: product.id.clone(),
                share_percent: total.map_or(0.0, |u| 100.0 * (u - max).exp() / denominator),
                utility: *total,
                active: total.is_some(),
            })
            .collect();

        Ok(MarketShareResult {
            shares,
            none_share_percent: none.map(|u| 100.0 * (u - max).exp() / denominator),
        })
    }

    /// Runs many independent scenarios against the same utilities in parallel.
    pub fn simulate_batches(
        &self,
        scenarios: &[Vec<ProductConfiguration>],
        include_none: bool,
    ) -> Result<Vec<MarketShareResult>> {
        scenarios
            .par_iter()
            .map(|products| self.simulate(products, include_none))
            .collect()
    }

    /// Share of `products[product]` at every level of `attribute`, with the
    /// other products held fixed.
    pub fn sensitivity(
        &self,
        products: &[ProductConfiguration],
        product: usize,
        attribute: &str,
        include_none: bool,
    ) -> Result<Vec<SensitivityPoint>> {
        let target = products.get(product).ok_or_else(|| {
            ConjointError::dimension_mismatch("sensitivity product index", products.len(), product)
        })?;
        let levels = self
            .levels
            .get(attribute)
            .ok_or_else(|| ConjointError::UnknownAttribute {
                attribute: attribute.to_string(),
                configuration: product,
            })?;

        levels
            .par_iter()
            .map(|level| -> Result<SensitivityPoint> {
                let mut scenario = products.to_vec();
                scenario[product] = target.clone().level(attribute, level.clone());
                let result = self.simulate(&scenario, include_none)?;
                Ok(SensitivityPoint {
                    level: level.clone(),
                    share_percent: result.shares[product].share_percent,
                })
            })
            .collect()
    }
}
