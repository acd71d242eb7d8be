//! End-to-end conjoint analysis: validate, code, estimate, summarize.

use log::info;
use serde::Serialize;

use crate::attribute::{validate_attribute_set, Attribute};
use crate::bootstrap::{bootstrap_utilities, BootstrapOptions, BootstrapSummary};
use crate::data::{ChoiceDataBuilder, ChoiceObservation, ChoiceTable, ColumnMapping, LevelFrequency};
use crate::design::DesignMatrix;
use crate::diagnostics::{compute_diagnostics, ModelDiagnostics};
use crate::error::{ConjointWarning, Result};
use crate::estimation::{ChoiceProblem, ModelResult};
use crate::importance::{compute_importance, ImportanceScore};
use crate::options::ConjointOptions;
use crate::simulator::MarketSimulator;
use crate::utilities::{compute_utilities, UtilityTable};

/// A configured study ready to analyze response data.
#[derive(Clone, Debug)]
pub struct ConjointAnalysis {
    attributes: Vec<Attribute>,
    options: ConjointOptions,
}

impl ConjointAnalysis {
    /// Validates the attribute set and options up front.
    pub fn new(attributes: Vec<Attribute>, options: ConjointOptions) -> Result<Self> {
        validate_attribute_set(&attributes)?;
        options.validate()?;
        Ok(Self {
            attributes,
            options,
        })
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn options(&self) -> &ConjointOptions {
        &self.options
    }

    /// Reads a tabular export through `mapping` and analyzes it.
    pub fn run_table(&self, table: &ChoiceTable, mapping: &ColumnMapping) -> Result<ConjointResults> {
        let observations = table.to_observations(&self.attributes, mapping)?;
        self.run(observations)
    }

    /// Runs the full pipeline. Every stage fails fast; warnings from all
    /// stages are gathered on the result.
    pub fn run(&self, observations: Vec<ChoiceObservation>) -> Result<ConjointResults> {
        let data = ChoiceDataBuilder::new(self.attributes.clone(), observations)
            .none_label(self.options.none_label.clone())
            .min_responses_per_level(self.options.min_responses_per_level)
            .build()?;
        let mut warnings = data.warnings().to_vec();

        let design = DesignMatrix::build(&data, self.options.baseline_handling)?;
        let estimation = ChoiceProblem::new(design.clone())?.estimate(&self.options)?;
        warnings.extend(estimation.warnings);
        let model = estimation.model;

        let utilities = compute_utilities(&model, &design, self.options.confidence_level)?;
        let diagnostics = compute_diagnostics(&model, &design, data.respondent_count())?;
        let importance = compute_importance(&utilities)?;
        info!(
            "pseudo R² {:.4}, hit rate {:.3} (chance {:.3})",
            diagnostics.pseudo_r2, diagnostics.hit_rate, diagnostics.chance_rate
        );

        Ok(ConjointResults {
            model,
            utilities,
            importance,
            diagnostics,
            level_frequencies: data.level_frequencies().to_vec(),
            warnings,
            design,
            options: self.options.clone(),
        })
    }
}

/// Everything a report needs from one analysis run.
#[derive(Clone, Debug, Serialize)]
pub struct ConjointResults {
    pub model: ModelResult,
    pub utilities: UtilityTable,
    pub importance: Vec<ImportanceScore>,
    pub diagnostics: ModelDiagnostics,
    pub level_frequencies: Vec<LevelFrequency>,
    pub warnings: Vec<ConjointWarning>,
    #[serde(skip)]
    design: DesignMatrix,
    #[serde(skip)]
    options: ConjointOptions,
}

impl ConjointResults {
    /// A market simulator over the estimated utilities.
    pub fn simulator(&self) -> MarketSimulator {
        MarketSimulator::new(&self.utilities)
    }

    pub fn design(&self) -> &DesignMatrix {
        &self.design
    }

    /// Respondent bootstrap with the same estimation settings as the main fit.
    pub fn bootstrap(&self, bootstrap: &BootstrapOptions) -> Result<BootstrapSummary> {
        bootstrap_utilities(&self.design, &self.utilities, &self.options, bootstrap)
    }
}
