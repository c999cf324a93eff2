//! Questionnaire definition — a declarative step table and the chain built from it.

pub mod catalog;
pub mod chain;
pub mod steps;

pub use chain::{Chain, StartPoint};
pub use steps::{Choice, FieldBinding, Interaction, StepSpec, TextFormat, ValueMapper};
