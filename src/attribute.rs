//! Attribute configuration: a named, ordered set of categorical levels.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{ConjointError, Result};

/// One conjoint attribute and its levels in configured order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    name: String,
    levels: Vec<String>,
}

impl Attribute {
    /// Creates an attribute, rejecting fewer than two levels or duplicate levels.
    pub fn new<S, I, L>(name: S, levels: I) -> Result<Self>
    where
        S: Into<String>,
        I: IntoIterator<Item = L>,
        L: Into<String>,
    {
        let attribute = Self {
            name: name.into(),
            levels: levels.into_iter().map(Into::into).collect(),
        };
        attribute.validate()?;
        Ok(attribute)
    }

    /// Parses the comma-separated `LevelNames` cell used by study templates,
    /// e.g. `"128GB, 256GB, 512GB"`.
    pub fn from_level_list(name: impl Into<String>, level_names: &str) -> Result<Self> {
        let levels = level_names
            .split(',')
            .map(str::trim)
            .filter(|level| !level.is_empty());
        Self::new(name, levels)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn levels(&self) -> &[String] {
        &self.levels
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// Position of `level` in configured order.
    pub fn level_index(&self, level: &str) -> Option<usize> {
        self.levels.iter().position(|candidate| candidate == level)
    }

    /// The implied level under effects coding (last in configured order).
    pub fn reference_level(&self) -> &str {
        &self.levels[self.levels.len() - 1]
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ConjointError::InvalidAttribute {
                attribute: self.name.clone(),
                problem: "name must not be blank".into(),
            });
        }
        if self.levels.len() < 2 {
            return Err(ConjointError::InvalidAttribute {
                attribute: self.name.clone(),
                problem: format!("needs at least 2 levels, found {}", self.levels.len()),
            });
        }
        let mut seen = HashSet::new();
        for level in &self.levels {
            if !seen.insert(level.as_str()) {
                return Err(ConjointError::InvalidAttribute {
                    attribute: self.name.clone(),
                    problem: format!("level `{level}` is listed twice"),
                });
            }
        }
        Ok(())
    }
}

/// Rejects attribute lists that are empty or reuse a name.
pub fn validate_attribute_set(attributes: &[Attribute]) -> Result<()> {
    if attributes.is_empty() {
        return Err(ConjointError::InvalidAttribute {
            attribute: String::new(),
            problem: "at least one attribute must be configured".into(),
        });
    }
    let mut names = HashSet::new();
    for attribute in attributes {
        attribute.validate()?;
        if !names.insert(attribute.name()) {
            return Err(ConjointError::InvalidAttribute {
                attribute: attribute.name().to_string(),
                problem: "attribute name is configured twice".into(),
            });
        }
    }
    Ok(())
}
