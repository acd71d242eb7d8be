//! Synthetic choice-based conjoint data drawn from known part-worths.
//!
//! Each alternative gets a uniformly random level per attribute. Its
//! utility is the sum of the true part-worths plus a standard Gumbel error,
//! and the alternative with the highest utility is chosen, which is exactly
//! the data-generating process of the multinomial logit.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Gumbel};

use crate::attribute::Attribute;
use crate::data::ChoiceObservation;
use crate::error::{ConjointError, Result};

/// Study layout and true utilities for the generator.
#[derive(Clone, Debug)]
pub struct SyntheticStudy {
    attributes: Vec<Attribute>,
    true_utilities: Vec<Vec<f64>>,
    respondents: usize,
    choice_sets_per_respondent: usize,
    alternatives_per_set: usize,
    none_option: Option<(String, f64)>,
}

impl SyntheticStudy {
    /// `true_utilities[a][l]` is the part-worth of level `l` of attribute `a`.
    pub fn new(attributes: Vec<Attribute>, true_utilities: Vec<Vec<f64>>) -> Result<Self> {
        if attributes.len() != true_utilities.len() {
            return Err(ConjointError::dimension_mismatch(
                "true utilities per attribute",
                attributes.len(),
                true_utilities.len(),
            ));
        }
        for (attribute, utilities) in attributes.iter().zip(&true_utilities) {
            if attribute.level_count() != utilities.len() {
                return Err(ConjointError::InvalidAttribute {
                    attribute: attribute.name().to_string(),
                    problem: format!(
                        "{} true utilities supplied for {} levels",
                        utilities.len(),
                        attribute.level_count()
                    ),
                });
            }
        }
        Ok(Self {
            attributes,
            true_utilities,
            respondents: 50,
            choice_sets_per_respondent: 8,
            alternatives_per_set: 3,
            none_option: None,
        })
    }

    pub fn respondents(mut self, respondents: usize) -> Self {
        self.respondents = respondents;
        self
    }

    pub fn choice_sets_per_respondent(mut self, sets: usize) -> Self {
        self.choice_sets_per_respondent = sets;
        self
    }

    pub fn alternatives_per_set(mut self, alternatives: usize) -> Self {
        self.alternatives_per_set = alternatives;
        self
    }

    /// Adds an outside-good alternative with alternative id `label` to every set.
    pub fn none_option(mut self, label: impl Into<String>, utility: f64) -> Self {
        self.none_option = Some((label.into(), utility));
        self
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn true_utilities(&self) -> &[Vec<f64>] {
        &self.true_utilities
    }

    /// Draws the dataset. The same seed always yields the same observations.
    pub fn generate(&self, seed: u64) -> Result<Vec<ChoiceObservation>> {
        if self.alternatives_per_set < 2 {
            return Err(ConjointError::invalid_setting(
                "alternatives_per_set",
                "at least two alternatives are required",
            ));
        }
        let gumbel = Gumbel::new(0.0, 1.0)
            .map_err(|error| ConjointError::invalid_setting("gumbel", error.to_string()))?;
        let mut rng = SmallRng::seed_from_u64(seed);

        let set_size = self.alternatives_per_set + usize::from(self.none_option.is_some());
        let mut observations =
            Vec::with_capacity(self.respondents * self.choice_sets_per_respondent * set_size);
        let mut set_counter = 0usize;

        for respondent in 1..=self.respondents {
            for _ in 0..self.choice_sets_per_respondent {
                set_counter += 1;
                let mut alternatives = Vec::with_capacity(set_size);
                let mut utilities = Vec::with_capacity(set_size);

                for alternative in 1..=self.alternatives_per_set {
                    let mut observation = ChoiceObservation::new(
                        respondent.to_string(),
                        set_counter.to_string(),
                        false,
                    )
                    .alternative(alternative.to_string());
                    let mut utility: f64 = gumbel.sample(&mut rng);
                    for (attribute, part_worths) in self.attributes.iter().zip(&self.true_utilities) {
                        let level = rng.gen_range(0..attribute.level_count());
                        utility += part_worths[level];
                        observation =
                            observation.level(attribute.name(), attribute.levels()[level].clone());
                    }
                    alternatives.push(observation);
                    utilities.push(utility);
                }

                if let Some((label, none_utility)) = &self.none_option {
                    alternatives.push(
                        ChoiceObservation::new(respondent.to_string(), set_counter.to_string(), false)
                            .alternative(label.clone()),
                    );
                    utilities.push(none_utility + gumbel.sample(&mut rng));
                }

                let chosen = utilities
                    .iter()
                    .enumerate()
                    .fold(0usize, |best, (index, u)| if *u > utilities[best] { index } else { best });
                alternatives[chosen].chosen = true;
                observations.extend(alternatives);
            }
        }

        Ok(observations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ChoiceData;

    fn study() -> SyntheticStudy {
        SyntheticStudy::new(
            vec![
                Attribute::new("Brand", ["Apple", "Samsung", "Google"]).unwrap(),
                Attribute::new("Price", ["449", "599", "699"]).unwrap(),
            ],
            vec![vec![0.5, 0.0, -0.5], vec![1.0, 0.0, -1.0]],
        )
        .unwrap()
        .respondents(10)
        .choice_sets_per_respondent(4)
        .alternatives_per_set(3)
    }

    #[test]
    fn generated_data_passes_validation() {
        let observations = study().generate(42).unwrap();
        assert_eq!(observations.len(), 10 * 4 * 3);
        let data = ChoiceData::new(study().attributes().to_vec(), observations).unwrap();
        assert_eq!(data.occasion_count(), 40);
        assert_eq!(data.respondent_count(), 10);
    }

    #[test]
    fn same_seed_same_data() {
        assert_eq!(study().generate(7).unwrap(), study().generate(7).unwrap());
        assert_ne!(study().generate(7).unwrap(), study().generate(8).unwrap());
    }

    #[test]
    fn none_option_adds_one_alternative_per_set() {
        let observations = study().none_option("NONE", 0.0).generate(3).unwrap();
        assert_eq!(observations.len(), 10 * 4 * 4);
        let none_rows = observations
            .iter()
            .filter(|o| o.alternative_id.as_deref() == Some("NONE"))
            .count();
        assert_eq!(none_rows, 40);
    }

    #[test]
    fn utilities_must_match_levels() {
        let err = SyntheticStudy::new(
            vec![Attribute::new("Brand", ["A", "B"]).unwrap()],
            vec![vec![0.1, 0.2, 0.3]],
        )
        .unwrap_err();
        assert_eq!(err.code(), "CONFIG_INVALID_ATTRIBUTE");
    }
}
