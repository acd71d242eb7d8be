//! Choice-level data containers and the validation that turns raw rows into
//! a clean, occasion-partitioned dataset.

use std::collections::{BTreeMap, HashMap};

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::attribute::{validate_attribute_set, Attribute};
use crate::error::{ConjointError, ConjointWarning, OccasionKey, Result};

/// One alternative shown to one respondent in one choice set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChoiceObservation {
    pub respondent_id: String,
    pub choice_set_id: String,
    #[serde(default)]
    pub alternative_id: Option<String>,
    /// Attribute name to level.
    #[serde(default)]
    pub levels: BTreeMap<String, String>,
    pub chosen: bool,
}

impl ChoiceObservation {
    pub fn new(
        respondent_id: impl Into<String>,
        choice_set_id: impl Into<String>,
        chosen: bool,
    ) -> Self {
        Self {
            respondent_id: respondent_id.into(),
            choice_set_id: choice_set_id.into(),
            alternative_id: None,
            levels: BTreeMap::new(),
            chosen,
        }
    }

    pub fn alternative(mut self, alternative_id: impl Into<String>) -> Self {
        self.alternative_id = Some(alternative_id.into());
        self
    }

    pub fn level(mut self, attribute: impl Into<String>, level: impl Into<String>) -> Self {
        self.levels.insert(attribute.into(), level.into());
        self
    }

    pub fn occasion_key(&self) -> OccasionKey {
        OccasionKey::new(self.respondent_id.clone(), self.choice_set_id.clone())
    }

    fn is_none_option(&self, none_label: Option<&str>) -> bool {
        matches!((none_label, self.alternative_id.as_deref()), (Some(label), Some(id)) if label == id)
    }
}

/// Names of the structural columns in a tabular choice dataset.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnMapping {
    pub respondent_id: String,
    pub choice_set: String,
    /// Optional; ignored when the table does not carry it.
    pub alternative_id: Option<String>,
    pub chosen: String,
}

impl Default for ColumnMapping {
    fn default() -> Self {
        Self {
            respondent_id: "resp_id".into(),
            choice_set: "choice_set_id".into(),
            alternative_id: Some("alternative_id".into()),
            chosen: "chosen".into(),
        }
    }
}

/// A rectangular table of string cells, one row per alternative shown.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceTable {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl ChoiceTable {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<String>>) -> Result<Self> {
        for row in &rows {
            if row.len() != columns.len() {
                return Err(ConjointError::dimension_mismatch(
                    "table row width",
                    columns.len(),
                    row.len(),
                ));
            }
        }
        Ok(Self { columns, rows })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Converts rows into observations using `mapping` for the structural
    /// columns; every other column must name a configured attribute.
    /// Empty attribute cells are left out so validation reports them.
    pub fn to_observations(
        &self,
        attributes: &[Attribute],
        mapping: &ColumnMapping,
    ) -> Result<Vec<ChoiceObservation>> {
        let position = |name: &str| self.columns.iter().position(|column| column == name);
        let require = |name: &str| {
            position(name).ok_or_else(|| ConjointError::UnknownColumn {
                column: name.to_string(),
                row: None,
            })
        };

        let respondent_col = require(&mapping.respondent_id)?;
        let choice_set_col = require(&mapping.choice_set)?;
        let chosen_col = require(&mapping.chosen)?;
        let alternative_col = mapping.alternative_id.as_deref().and_then(position);

        let mut attribute_cols = Vec::new();
        for (index, column) in self.columns.iter().enumerate() {
            let structural = [Some(respondent_col), Some(choice_set_col), Some(chosen_col), alternative_col]
                .contains(&Some(index));
            if structural {
                continue;
            }
            if !attributes.iter().any(|attribute| attribute.name() == column) {
                return Err(ConjointError::UnknownColumn {
                    column: column.clone(),
                    row: None,
                });
            }
            attribute_cols.push(index);
        }

        let mut observations = Vec::with_capacity(self.rows.len());
        for (row_index, row) in self.rows.iter().enumerate() {
            let chosen = parse_chosen(&row[chosen_col]).ok_or_else(|| {
                ConjointError::InvalidValue {
                    column: mapping.chosen.clone(),
                    value: row[chosen_col].clone(),
                    row: row_index,
                }
            })?;
            let mut observation = ChoiceObservation::new(
                row[respondent_col].trim(),
                row[choice_set_col].trim(),
                chosen,
            );
            if let Some(col) = alternative_col {
                let id = row[col].trim();
                if !id.is_empty() {
                    observation = observation.alternative(id);
                }
            }
            for &col in &attribute_cols {
                let value = row[col].trim();
                if !value.is_empty() {
                    observation = observation.level(self.columns[col].clone(), value);
                }
            }
            observations.push(observation);
        }
        Ok(observations)
    }
}

fn parse_chosen(cell: &str) -> Option<bool> {
    match cell.trim() {
        "1" | "1.0" => Some(true),
        "0" | "0.0" => Some(false),
        other if other.eq_ignore_ascii_case("true") => Some(true),
        other if other.eq_ignore_ascii_case("false") => Some(false),
        _ => None,
    }
}

/// A validated alternative, stored contiguously with the rest of its occasion.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ValidatedRow {
    /// Position of the observation in the input.
    pub source_row: usize,
    /// Dense occasion index.
    pub occasion: usize,
    /// Position of the alternative within its occasion.
    pub alternative: usize,
    /// Index into each attribute's level list, in attribute order.
    /// Empty for the outside-good alternative.
    pub level_indices: Vec<usize>,
    pub is_none: bool,
    pub chosen: bool,
}

/// How often a level was shown and chosen.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LevelFrequency {
    pub attribute: String,
    pub level: String,
    pub appearances: usize,
    pub chosen: usize,
}

/// Validated, occasion-partitioned choice data.
#[derive(Clone, Debug)]
pub struct ChoiceData {
    attributes: Vec<Attribute>,
    rows: Vec<ValidatedRow>,
    partition: OccasionPartition,
    respondent_count: usize,
    has_none_alternative: bool,
    level_frequencies: Vec<LevelFrequency>,
    warnings: Vec<ConjointWarning>,
}

impl ChoiceData {
    /// Validates observations against the attribute configuration with default thresholds.
    pub fn new(attributes: Vec<Attribute>, observations: Vec<ChoiceObservation>) -> Result<Self> {
        ChoiceDataBuilder::new(attributes, observations).build()
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn rows(&self) -> &[ValidatedRow] {
        &self.rows
    }

    pub fn observation_count(&self) -> usize {
        self.rows.len()
    }

    pub fn occasion_count(&self) -> usize {
        self.partition.occasion_count()
    }

    pub fn respondent_count(&self) -> usize {
        self.respondent_count
    }

    /// Whether any occasion offers the outside-good alternative.
    pub fn has_none_alternative(&self) -> bool {
        self.has_none_alternative
    }

    pub fn partition(&self) -> &OccasionPartition {
        &self.partition
    }

    pub fn level_frequencies(&self) -> &[LevelFrequency] {
        &self.level_frequencies
    }

    /// Non-fatal findings from validation, such as sparse levels.
    pub fn warnings(&self) -> &[ConjointWarning] {
        &self.warnings
    }
}

/// Builder that validates choice integrity and attribute levels before constructing [`ChoiceData`].
#[derive(Debug)]
pub struct ChoiceDataBuilder {
    attributes: Vec<Attribute>,
    observations: Vec<ChoiceObservation>,
    none_label: Option<String>,
    min_responses_per_level: usize,
}

impl ChoiceDataBuilder {
    pub fn new(attributes: Vec<Attribute>, observations: Vec<ChoiceObservation>) -> Self {
        Self {
            attributes,
            observations,
            none_label: None,
            min_responses_per_level: 10,
        }
    }

    /// Rows whose alternative id equals `label` are the outside-good alternative.
    pub fn none_label(mut self, label: Option<String>) -> Self {
        self.none_label = label;
        self
    }

    pub fn min_responses_per_level(mut self, minimum: usize) -> Self {
        self.min_responses_per_level = minimum;
        self
    }

    /// Finalizes construction after validating every row and occasion.
    pub fn build(self) -> Result<ChoiceData> {
        validate_attribute_set(&self.attributes)?;
        if self.observations.is_empty() {
            return Err(ConjointError::EmptyData);
        }

        let none_label = self.none_label.as_deref();
        let mut coded = Vec::with_capacity(self.observations.len());
        for (row, observation) in self.observations.iter().enumerate() {
            if observation.is_none_option(none_label) {
                coded.push(Vec::new());
                continue;
            }
            coded.push(code_levels(&self.attributes, observation, row)?);
        }

        let partition = OccasionPartition::new(&self.observations)?;

        let mut rows = Vec::with_capacity(self.observations.len());
        for (occasion_index, segment) in partition.occasions.iter().enumerate() {
            for (alternative, &source_row) in segment.source_rows.iter().enumerate() {
                let observation = &self.observations[source_row];
                rows.push(ValidatedRow {
                    source_row,
                    occasion: occasion_index,
                    alternative,
                    level_indices: std::mem::take(&mut coded[source_row]),
                    is_none: observation.is_none_option(none_label),
                    chosen: observation.chosen,
                });
            }
        }

        let has_none_alternative = rows.iter().any(|row| row.is_none);
        let level_frequencies = count_levels(&self.attributes, &rows);
        let warnings = low_count_warnings(&level_frequencies, self.min_responses_per_level);
        for warning in &warnings {
            warn!("{warning}");
        }

        info!(
            "validated {} observations in {} choice occasions from {} respondents",
            rows.len(),
            partition.occasion_count(),
            partition.respondent_count
        );

        Ok(ChoiceData {
            attributes: self.attributes,
            respondent_count: partition.respondent_count,
            rows,
            partition,
            has_none_alternative,
            level_frequencies,
            warnings,
        })
    }
}

fn code_levels(
    attributes: &[Attribute],
    observation: &ChoiceObservation,
    row: usize,
) -> Result<Vec<usize>> {
    for name in observation.levels.keys() {
        if !attributes.iter().any(|attribute| attribute.name() == name) {
            return Err(ConjointError::UnknownColumn {
                column: name.clone(),
                row: Some(row),
            });
        }
    }

    attributes
        .iter()
        .map(|attribute| {
            let level = observation.levels.get(attribute.name()).ok_or_else(|| {
                ConjointError::MissingAttribute {
                    attribute: attribute.name().to_string(),
                    row,
                }
            })?;
            attribute
                .level_index(level)
                .ok_or_else(|| ConjointError::LevelMismatch {
                    attribute: attribute.name().to_string(),
                    level: level.clone(),
                    row,
                })
        })
        .collect()
}

fn count_levels(attributes: &[Attribute], rows: &[ValidatedRow]) -> Vec<LevelFrequency> {
    let mut counts: Vec<Vec<(usize, usize)>> = attributes
        .iter()
        .map(|attribute| vec![(0, 0); attribute.level_count()])
        .collect();

    for row in rows.iter().filter(|row| !row.is_none) {
        for (attribute_index, &level_index) in row.level_indices.iter().enumerate() {
            let entry = &mut counts[attribute_index][level_index];
            entry.0 += 1;
            if row.chosen {
                entry.1 += 1;
            }
        }
    }

    attributes
        .iter()
        .zip(counts)
        .flat_map(|(attribute, per_level)| {
            attribute
                .levels()
                .iter()
                .zip(per_level)
                .map(|(level, (appearances, chosen))| LevelFrequency {
                    attribute: attribute.name().to_string(),
                    level: level.clone(),
                    appearances,
                    chosen,
                })
                .collect::<Vec<_>>()
        })
        .collect()
}

fn low_count_warnings(frequencies: &[LevelFrequency], minimum: usize) -> Vec<ConjointWarning> {
    frequencies
        .iter()
        .filter(|frequency| frequency.chosen < minimum)
        .map(|frequency| ConjointWarning::LowLevelCount {
            attribute: frequency.attribute.clone(),
            level: frequency.level.clone(),
            chosen: frequency.chosen,
            minimum,
        })
        .collect()
}

/// Describes the choice occasions contained in the data.
#[derive(Clone, Debug)]
pub struct OccasionPartition {
    occasions: Vec<OccasionSegment>,
    respondent_count: usize,
}

impl OccasionPartition {
    /// Groups observations by (respondent, choice set) in order of first
    /// appearance and checks each group's integrity.
    fn new(observations: &[ChoiceObservation]) -> Result<Self> {
        let mut index_of: HashMap<OccasionKey, usize> = HashMap::new();
        let mut respondent_index: HashMap<&str, usize> = HashMap::new();
        let mut occasions: Vec<OccasionSegment> = Vec::new();

        for (row, observation) in observations.iter().enumerate() {
            let key = observation.occasion_key();
            let next = occasions.len();
            let occasion = *index_of.entry(key.clone()).or_insert(next);
            if occasion == next {
                let respondents = respondent_index.len();
                let respondent = *respondent_index
                    .entry(observation.respondent_id.as_str())
                    .or_insert(respondents);
                occasions.push(OccasionSegment {
                    key,
                    respondent,
                    start: 0,
                    end: 0,
                    chosen: 0,
                    source_rows: Vec::new(),
                });
            }
            occasions[occasion].source_rows.push(row);
        }

        let mut start = 0usize;
        for segment in occasions.iter_mut() {
            let chosen: Vec<usize> = segment
                .source_rows
                .iter()
                .enumerate()
                .filter(|(_, &row)| observations[row].chosen)
                .map(|(alternative, _)| alternative)
                .collect();
            if chosen.len() != 1 {
                return Err(ConjointError::ChoiceIntegrity {
                    occasion: segment.key.clone(),
                    chosen: chosen.len(),
                });
            }
            if segment.source_rows.len() < 2 {
                return Err(ConjointError::TooFewAlternatives {
                    occasion: segment.key.clone(),
                    alternatives: segment.source_rows.len(),
                });
            }
            segment.chosen = chosen[0];
            segment.start = start;
            segment.end = start + segment.source_rows.len();
            start = segment.end;
        }

        Ok(Self {
            occasions,
            respondent_count: respondent_index.len(),
        })
    }

    /// Returns the number of distinct choice occasions.
    pub fn occasion_count(&self) -> usize {
        self.occasions.len()
    }

    /// Iterates over occasion segments in dense index order.
    pub fn occasions(&self) -> impl Iterator<Item = &OccasionSegment> {
        self.occasions.iter()
    }

    pub fn occasion(&self, index: usize) -> &OccasionSegment {
        &self.occasions[index]
    }
}

/// Metadata for a single choice occasion.
#[derive(Clone, Debug)]
pub struct OccasionSegment {
    key: OccasionKey,
    /// Dense respondent index.
    pub respondent: usize,
    /// Start index (inclusive) of this occasion in the validated rows.
    pub(crate) start: usize,
    /// End index (exclusive).
    pub(crate) end: usize,
    /// Alternative index of the chosen row.
    pub chosen: usize,
    source_rows: Vec<usize>,
}

impl OccasionSegment {
    pub fn key(&self) -> &OccasionKey {
        &self.key
    }

    /// Returns the range of validated row indices that belong to this occasion.
    pub fn range(&self) -> std::ops::Range<usize> {
        self.start..self.end
    }

    pub fn alternative_count(&self) -> usize {
        self.end - self.start
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attributes() -> Vec<Attribute> {
        vec![
            Attribute::new("Brand", ["Apple", "Samsung"]).unwrap(),
            Attribute::new("Price", ["449", "599", "699"]).unwrap(),
        ]
    }

    fn alt(resp: &str, set: &str, brand: &str, price: &str, chosen: bool) -> ChoiceObservation {
        ChoiceObservation::new(resp, set, chosen)
            .level("Brand", brand)
            .level("Price", price)
    }

    #[test]
    fn builder_partitions_interleaved_occasions() {
        let observations = vec![
            alt("r1", "1", "Apple", "449", true),
            alt("r2", "1", "Apple", "599", false),
            alt("r1", "1", "Samsung", "699", false),
            alt("r2", "1", "Samsung", "449", true),
        ];
        let data = ChoiceDataBuilder::new(attributes(), observations)
            .min_responses_per_level(0)
            .build()
            .expect("valid data");

        assert_eq!(data.occasion_count(), 2);
        assert_eq!(data.respondent_count(), 2);
        let first = data.partition().occasion(0);
        assert_eq!(first.key(), &OccasionKey::new("r1", "1"));
        assert_eq!(first.range(), 0..2);
        assert_eq!(first.chosen, 0);
        assert_eq!(data.rows()[1].source_row, 2);
        assert_eq!(data.rows()[1].level_indices, vec![1, 2]);
        let second = data.partition().occasion(1);
        assert_eq!(second.chosen, 1);
        assert_eq!(data.rows()[3].alternative, 1);
        assert!(data.warnings().is_empty());
    }

    #[test]
    fn two_chosen_alternatives_are_rejected() {
        let observations = vec![
            alt("r1", "1", "Apple", "449", true),
            alt("r1", "1", "Samsung", "699", true),
        ];
        let err = ChoiceData::new(attributes(), observations).unwrap_err();
        assert_eq!(err.code(), "DATA_CHOICE_INTEGRITY");
        assert!(matches!(
            err,
            ConjointError::ChoiceIntegrity { chosen: 2, ref occasion } if occasion.respondent_id == "r1"
        ));
    }

    #[test]
    fn unchosen_occasion_is_rejected() {
        let observations = vec![
            alt("r1", "1", "Apple", "449", false),
            alt("r1", "1", "Samsung", "699", false),
        ];
        let err = ChoiceData::new(attributes(), observations).unwrap_err();
        assert!(matches!(err, ConjointError::ChoiceIntegrity { chosen: 0, .. }));
    }

    #[test]
    fn single_alternative_occasion_is_rejected() {
        let observations = vec![alt("r1", "1", "Apple", "449", true)];
        let err = ChoiceData::new(attributes(), observations).unwrap_err();
        assert_eq!(err.code(), "DATA_TOO_FEW_ALTERNATIVES");
    }

    #[test]
    fn unconfigured_level_is_a_config_error() {
        let observations = vec![
            alt("r1", "1", "Apple", "449", true),
            alt("r1", "1", "Google", "699", false),
        ];
        let err = ChoiceData::new(attributes(), observations).unwrap_err();
        assert_eq!(err.code(), "CONFIG_LEVEL_MISMATCH");
        assert!(err.to_string().contains("`Google`"));
        assert!(err.to_string().contains("row 1"));
    }

    #[test]
    fn level_match_is_case_sensitive() {
        let observations = vec![
            alt("r1", "1", "apple", "449", true),
            alt("r1", "1", "Samsung", "699", false),
        ];
        let err = ChoiceData::new(attributes(), observations).unwrap_err();
        assert_eq!(err.code(), "CONFIG_LEVEL_MISMATCH");
    }

    #[test]
    fn missing_and_unknown_attributes_are_data_errors() {
        let observations = vec![
            ChoiceObservation::new("r1", "1", true).level("Brand", "Apple"),
            alt("r1", "1", "Samsung", "699", false),
        ];
        let err = ChoiceData::new(attributes(), observations).unwrap_err();
        assert_eq!(err.code(), "DATA_MISSING_ATTRIBUTE");

        let observations = vec![
            alt("r1", "1", "Apple", "449", true).level("Colour", "Red"),
            alt("r1", "1", "Samsung", "699", false),
        ];
        let err = ChoiceData::new(attributes(), observations).unwrap_err();
        assert_eq!(err.code(), "DATA_UNKNOWN_COLUMN");
    }

    #[test]
    fn sparse_levels_produce_warnings_not_errors() {
        let observations = vec![
            alt("r1", "1", "Apple", "449", true),
            alt("r1", "1", "Samsung", "699", false),
        ];
        let data = ChoiceData::new(attributes(), observations).unwrap();
        // Every level is chosen fewer than 10 times.
        assert_eq!(data.warnings().len(), 5);
        let apple = &data.level_frequencies()[0];
        assert_eq!((apple.appearances, apple.chosen), (1, 1));
        let never_shown = data
            .level_frequencies()
            .iter()
            .find(|frequency| frequency.level == "599")
            .unwrap();
        assert_eq!(never_shown.appearances, 0);
    }

    #[test]
    fn none_rows_skip_attribute_checks() {
        let observations = vec![
            alt("r1", "1", "Apple", "449", false),
            alt("r1", "1", "Samsung", "699", false),
            ChoiceObservation::new("r1", "1", true).alternative("None"),
        ];
        let data = ChoiceDataBuilder::new(attributes(), observations)
            .none_label(Some("None".into()))
            .build()
            .unwrap();
        assert!(data.has_none_alternative());
        assert!(data.rows()[2].is_none);
        assert!(data.rows()[2].level_indices.is_empty());
    }

    #[test]
    fn table_conversion_maps_columns() {
        let columns = ["resp_id", "choice_set_id", "alternative_id", "Brand", "Price", "chosen"]
            .iter()
            .map(|c| c.to_string())
            .collect();
        let rows = vec![
            vec!["1", "1", "1", "Apple", "449", "1"],
            vec!["1", "1", "2", "Samsung", "599", "0"],
        ]
        .into_iter()
        .map(|row| row.into_iter().map(String::from).collect())
        .collect();
        let table = ChoiceTable::new(columns, rows).unwrap();
        let observations = table
            .to_observations(&attributes(), &ColumnMapping::default())
            .unwrap();
        assert_eq!(observations.len(), 2);
        assert!(observations[0].chosen);
        assert_eq!(observations[1].alternative_id.as_deref(), Some("2"));
        assert_eq!(observations[1].levels["Price"], "599");
    }

    #[test]
    fn table_conversion_rejects_bad_chosen_and_unknown_columns() {
        let columns: Vec<String> = ["resp_id", "choice_set_id", "Brand", "Price", "chosen"]
            .iter()
            .map(|c| c.to_string())
            .collect();
        let row = |chosen: &str| -> Vec<String> {
            ["1", "1", "Apple", "449", chosen].iter().map(|c| c.to_string()).collect()
        };
        let table = ChoiceTable::new(columns.clone(), vec![row("yes")]).unwrap();
        let err = table
            .to_observations(&attributes(), &ColumnMapping::default())
            .unwrap_err();
        assert_eq!(err.code(), "DATA_INVALID_VALUE");

        let mut with_extra = columns;
        with_extra[2] = "Colour".into();
        let table = ChoiceTable::new(with_extra, vec![row("1")]).unwrap();
        let err = table
            .to_observations(&attributes(), &ColumnMapping::default())
            .unwrap_err();
        assert!(matches!(err, ConjointError::UnknownColumn { ref column, .. } if column == "Colour"));
    }
}
