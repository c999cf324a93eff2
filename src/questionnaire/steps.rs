//! Step table entries.
//!
//! Every question is the same prompt → await → record → advance cycle; a
//! `StepSpec` only says what differs between them.

use serde::{Deserialize, Serialize};

use crate::conversation::Modality;
use crate::forms::FieldValue;

/// Rendering mode for a prompt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextFormat {
    #[default]
    Plain,
    Markdown,
}

/// One button: the label shown to the user and the data sent back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    pub label: String,
    pub data: String,
}

impl Choice {
    pub fn new(label: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            data: data.into(),
        }
    }
}

/// How received button data becomes a stored value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValueMapper {
    /// `true` when the data equals `yes`, `false` for anything else.
    YesNo { yes: String },
    /// Store the data as text.
    Raw,
}

impl ValueMapper {
    pub fn map(&self, data: &str) -> FieldValue {
        match self {
            Self::YesNo { yes } => FieldValue::Bool(data == yes),
            Self::Raw => FieldValue::Text(data.to_string()),
        }
    }
}

/// The form field a button step writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldBinding {
    pub field: String,
    pub mapper: ValueMapper,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Interaction {
    /// Send the prompt and move on.
    Info,
    /// Offer buttons and wait for one press.
    Button {
        choices: Vec<Choice>,
        /// Prefix for editing the prompt into "<echo><chosen label>".
        #[serde(default, skip_serializing_if = "Option::is_none")]
        echo: Option<String>,
        /// Screens like consent only gate progress and record nothing.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        field: Option<FieldBinding>,
    },
    /// Wait for free text and store it verbatim.
    Text { field: String },
    /// Terminal step: save the form, then offer a restart.
    Finish { choices: Vec<Choice> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSpec {
    pub name: String,
    pub prompt: String,
    #[serde(default)]
    pub format: TextFormat,
    pub interaction: Interaction,
}

impl StepSpec {
    pub fn info(name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prompt: prompt.into(),
            format: TextFormat::Plain,
            interaction: Interaction::Info,
        }
    }

    /// A button step that gates progress without writing a field.
    pub fn gate(name: impl Into<String>, prompt: impl Into<String>, choice: Choice) -> Self {
        Self {
            name: name.into(),
            prompt: prompt.into(),
            format: TextFormat::Plain,
            interaction: Interaction::Button {
                choices: vec![choice],
                echo: None,
                field: None,
            },
        }
    }

    /// A "Да"/"Нет" question writing a boolean field.
    pub fn yes_no(
        field: impl Into<String>,
        prompt: impl Into<String>,
        echo: impl Into<String>,
    ) -> Self {
        let field = field.into();
        Self {
            name: field.clone(),
            prompt: prompt.into(),
            format: TextFormat::Plain,
            interaction: Interaction::Button {
                choices: vec![Choice::new("Да", YES), Choice::new("Нет", NO)],
                echo: Some(echo.into()),
                field: Some(FieldBinding {
                    field,
                    mapper: ValueMapper::YesNo { yes: YES.into() },
                }),
            },
        }
    }

    pub fn text(field: impl Into<String>, prompt: impl Into<String>) -> Self {
        let field = field.into();
        Self {
            name: field.clone(),
            prompt: prompt.into(),
            format: TextFormat::Plain,
            interaction: Interaction::Text { field },
        }
    }

    pub fn finish(name: impl Into<String>, prompt: impl Into<String>, choice: Choice) -> Self {
        Self {
            name: name.into(),
            prompt: prompt.into(),
            format: TextFormat::Plain,
            interaction: Interaction::Finish {
                choices: vec![choice],
            },
        }
    }

    pub fn markdown(mut self) -> Self {
        self.format = TextFormat::Markdown;
        self
    }

    /// The input this step suspends on, if any.
    pub fn modality(&self) -> Option<Modality> {
        match &self.interaction {
            Interaction::Info => None,
            Interaction::Text { .. } => Some(Modality::Text),
            Interaction::Button { .. } | Interaction::Finish { .. } => Some(Modality::Button),
        }
    }

    /// The form field this step writes, if any.
    pub fn field(&self) -> Option<&str> {
        match &self.interaction {
            Interaction::Button {
                field: Some(binding),
                ..
            } => Some(&binding.field),
            Interaction::Text { field } => Some(field),
            _ => None,
        }
    }

    pub fn choices(&self) -> &[Choice] {
        match &self.interaction {
            Interaction::Button { choices, .. } | Interaction::Finish { choices } => choices,
            _ => &[],
        }
    }
}

/// Callback data of the "yes" button.
pub const YES: &str = "да";
/// Callback data of the "no" button.
pub const NO: &str = "нет";
