//! Chain — the immutable, shared step table plus index-based navigation.
//!
//! A conversation only keeps a cursor into the table; "next" is `index + 1`.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use super::steps::{Interaction, StepSpec};
use crate::conversation::Modality;
use crate::error::QuestionnaireError;
use crate::forms::RESERVED_FIELDS;

/// Where an activation enters the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPoint {
    /// A brand-new conversation, consent screens included.
    Head,
    /// Re-entry after a restart, skipping the consent screens.
    Body,
}

#[derive(Debug, Clone)]
pub struct Chain {
    steps: Arc<[StepSpec]>,
    body_start: usize,
}

/// On-disk questionnaire layout.
#[derive(Debug, Deserialize)]
struct QuestionnaireFile {
    #[serde(default)]
    body_start: usize,
    steps: Vec<StepSpec>,
}

impl Chain {
    /// Validate a step table and build a chain from it.
    pub fn new(steps: Vec<StepSpec>, body_start: usize) -> Result<Self, QuestionnaireError> {
        let Some(last) = steps.last() else {
            return Err(QuestionnaireError::Empty);
        };
        if !matches!(last.interaction, Interaction::Finish { .. }) {
            return Err(QuestionnaireError::MissingFinish {
                step: last.name.clone(),
            });
        }
        if body_start >= steps.len() {
            return Err(QuestionnaireError::InvalidRestart {
                index: body_start,
                len: steps.len(),
            });
        }

        let mut seen = HashSet::new();
        for (index, step) in steps.iter().enumerate() {
            if index + 1 < steps.len() && matches!(step.interaction, Interaction::Finish { .. }) {
                return Err(QuestionnaireError::MisplacedFinish {
                    step: step.name.clone(),
                });
            }
            if step.modality() == Some(Modality::Button) && step.choices().is_empty() {
                return Err(QuestionnaireError::NoChoices {
                    step: step.name.clone(),
                });
            }
            if let Some(field) = step.field() {
                if RESERVED_FIELDS.contains(&field) {
                    return Err(QuestionnaireError::ReservedField {
                        field: field.to_string(),
                    });
                }
                if !seen.insert(field.to_string()) {
                    return Err(QuestionnaireError::DuplicateField {
                        field: field.to_string(),
                    });
                }
            }
        }

        Ok(Self {
            steps: steps.into(),
            body_start,
        })
    }

    /// Parse a JSON questionnaire: `{"body_start": 2, "steps": [...]}`.
    pub fn from_json(json: &str) -> Result<Self, QuestionnaireError> {
        let file: QuestionnaireFile =
            serde_json::from_str(json).map_err(|e| QuestionnaireError::Parse(e.to_string()))?;
        Self::new(file.steps, file.body_start)
    }

    pub fn load(path: &Path) -> Result<Self, QuestionnaireError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| QuestionnaireError::Parse(format!("{}: {e}", path.display())))?;
        Self::from_json(&json)
    }

    pub fn step(&self, index: usize) -> Option<&StepSpec> {
        self.steps.get(index)
    }

    /// Index of the step after `index`, or `None` past the end.
    pub fn next(&self, index: usize) -> Option<usize> {
        let next = index + 1;
        (next < self.steps.len()).then_some(next)
    }

    pub fn start(&self, point: StartPoint) -> usize {
        match point {
            StartPoint::Head => 0,
            StartPoint::Body => self.body_start,
        }
    }

    pub fn body_start(&self) -> usize {
        self.body_start
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn steps(&self) -> &[StepSpec] {
        &self.steps
    }
}
