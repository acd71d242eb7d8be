//! Choice-based conjoint (CBC) analysis with a multinomial logit model.
//!
//! The crate turns respondent choice data into part-worth utilities and the
//! summaries built on them. It offers tools to
//!
//! - validate choice occasions and attribute levels (`data` module),
//! - effects-code the design matrix (`design` module),
//! - fit the conditional logit by Newton-Raphson with a regularized
//!   fallback (`estimation` module),
//! - report utilities with delta-method intervals, attribute importance and
//!   fit diagnostics (`utilities`, `importance`, `diagnostics`), and
//! - simulate logit market shares for hypothetical products (`simulator`).
//!
//! Respondent bootstrap intervals and a synthetic data generator round out
//! the toolkit.
//!
//! # Quick start
//!
//! ```no_run
//! use cbcrs::analysis::ConjointAnalysis;
//! use cbcrs::attribute::Attribute;
//! use cbcrs::data::ChoiceObservation;
//! use cbcrs::options::ConjointOptions;
//! use cbcrs::simulator::ProductConfiguration;
//!
//! let attributes = vec![
//!     Attribute::new("Brand", ["Apple", "Samsung", "Google"]).expect("valid attribute"),
//!     Attribute::new("Price", ["$449", "$599", "$699"]).expect("valid attribute"),
//! ];
//!
//! // One row per alternative shown; exactly one chosen per occasion.
//! let observations = vec![
//!     ChoiceObservation::new("r1", "1", true)
//!         .level("Brand", "Apple")
//!         .level("Price", "$599"),
//!     ChoiceObservation::new("r1", "1", false)
//!         .level("Brand", "Google")
//!         .level("Price", "$449"),
//!     // ...
//! ];
//!
//! let analysis = ConjointAnalysis::new(attributes, ConjointOptions::default())
//!     .expect("valid configuration");
//! let results = analysis.run(observations).expect("estimated");
//!
//! for score in &results.importance {
//!     println!("{}: {:.1}%", score.attribute, score.importance_percent);
//! }
//!
//! let shares = results
//!     .simulator()
//!     .simulate(
//!         &[
//!             ProductConfiguration::new("A").level("Brand", "Apple").level("Price", "$699"),
//!             ProductConfiguration::new("B").level("Brand", "Google").level("Price", "$449"),
//!         ],
//!         false,
//!     )
//!     .expect("known levels");
//! println!("{shares:?}");
//! ```

pub mod analysis;
pub mod attribute;
pub mod bootstrap;
pub mod data;
pub mod design;
pub mod diagnostics;
pub mod error;
pub mod estimation;
pub mod importance;
pub mod likelihood;
pub mod options;
pub mod simulator;
pub mod solving;
pub mod stats;
pub mod synthetic;
pub mod utilities;

pub use analysis::{ConjointAnalysis, ConjointResults};
pub use error::{ConjointError, ConjointWarning, Result};
pub use estimation::{ChoiceProblem, ModelResult};
pub use options::{BaselineHandling, ConjointOptions, EstimationMethod};
pub use solving::{FallbackOptions, SolverOptions, SolverSummary};
