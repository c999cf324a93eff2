//! Form data model.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::conversation::ConversationId;
use crate::store::Document;

/// Names of the fields every persisted record carries.
pub mod fields {
    pub const ID: &str = "_id";
    pub const CONVERSATION_ID: &str = "conversationId";
    pub const MARK: &str = "mark";
    pub const DOCTOR_COMMENT: &str = "doctorComment";
    pub const DOCTOR_NAME: &str = "doctorName";
    pub const CHECKED: &str = "checked";
    pub const SAVED_AT: &str = "savedAt";
}

/// Field names no step may write.
pub const RESERVED_FIELDS: &[&str] = &[
    fields::ID,
    fields::CONVERSATION_ID,
    fields::MARK,
    fields::DOCTOR_COMMENT,
    fields::DOCTOR_NAME,
    fields::CHECKED,
    fields::SAVED_AT,
];

/// One answer value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Number(i64),
    Text(String),
}

impl From<FieldValue> for serde_json::Value {
    fn from(value: FieldValue) -> Self {
        match value {
            FieldValue::Bool(b) => serde_json::Value::Bool(b),
            FieldValue::Number(n) => serde_json::Value::from(n),
            FieldValue::Text(s) => serde_json::Value::String(s),
        }
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

/// Accumulated answers for one conversation.
///
/// `mark`, `doctor_comment` and `checked` belong to the external verdict and
/// are only touched by mark updates and resets.
#[derive(Debug, Clone, PartialEq)]
pub struct Form {
    pub conversation: ConversationId,
    pub answers: BTreeMap<String, FieldValue>,
    pub mark: i64,
    pub doctor_comment: String,
    pub checked: bool,
}

impl Form {
    pub fn new(conversation: ConversationId) -> Self {
        Self {
            conversation,
            answers: BTreeMap::new(),
            mark: 0,
            doctor_comment: String::new(),
            checked: false,
        }
    }

    pub fn set(&mut self, field: impl Into<String>, value: FieldValue) {
        self.answers.insert(field.into(), value);
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.answers.get(field)
    }

    /// Add to the mark and put the verdict back into the pending state.
    /// The mark saturates at the bounds of `i64`.
    pub fn apply_mark(&mut self, delta: i64) {
        self.mark = self.mark.saturating_add(delta);
        self.doctor_comment.clear();
        self.checked = false;
    }

    /// Flatten into the persisted record shape.
    pub fn to_document(&self) -> Document {
        let mut doc = Document::new();
        for (field, value) in &self.answers {
            doc.insert(field.clone(), value.clone().into());
        }
        doc.insert(
            fields::CONVERSATION_ID.into(),
            serde_json::Value::from(self.conversation.as_i64()),
        );
        doc.insert(fields::MARK.into(), serde_json::Value::from(self.mark));
        doc.insert(
            fields::DOCTOR_COMMENT.into(),
            serde_json::Value::String(self.doctor_comment.clone()),
        );
        doc.insert(fields::CHECKED.into(), serde_json::Value::Bool(self.checked));
        doc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_form_is_seeded() {
        let form = Form::new(ConversationId(5));
        assert_eq!(form.mark, 0);
        assert!(form.doctor_comment.is_empty());
        assert!(!form.checked);
        assert!(form.answers.is_empty());
    }

    #[test]
    fn apply_mark_accumulates_and_resets_verdict() {
        let mut form = Form::new(ConversationId(5));
        form.mark = 3;
        form.doctor_comment = "looks fine".into();
        form.checked = true;

        form.apply_mark(5);

        assert_eq!(form.mark, 8);
        assert_eq!(form.doctor_comment, "");
        assert!(!form.checked);
    }

    #[test]
    fn apply_mark_saturates() {
        let mut form = Form::new(ConversationId(5));
        form.apply_mark(i64::MAX);
        form.apply_mark(1);
        assert_eq!(form.mark, i64::MAX);

        form.apply_mark(i64::MIN);
        form.apply_mark(i64::MIN);
        assert_eq!(form.mark, i64::MIN);
    }

    #[test]
    fn document_is_flat() {
        let mut form = Form::new(ConversationId(42));
        form.set("isAsphyxia", FieldValue::Bool(true));
        form.set("nervousSystem", FieldValue::Text("-".into()));

        let doc = form.to_document();

        assert_eq!(doc["conversationId"], 42);
        assert_eq!(doc["isAsphyxia"], true);
        assert_eq!(doc["nervousSystem"], "-");
        assert_eq!(doc["mark"], 0);
        assert_eq!(doc["doctorComment"], "");
        assert_eq!(doc["checked"], false);
        assert_eq!(doc.len(), 6);
    }

    #[test]
    fn reserved_fields_win_over_answers() {
        let mut form = Form::new(ConversationId(1));
        form.set("mark", FieldValue::Number(99));
        assert_eq!(form.to_document()["mark"], 0);
    }

    #[test]
    fn field_value_untagged_serde() {
        let values: Vec<FieldValue> = serde_json::from_str(r#"[true, 3, "text"]"#).unwrap();
        assert_eq!(
            values,
            vec![
                FieldValue::Bool(true),
                FieldValue::Number(3),
                FieldValue::Text("text".into())
            ]
        );
    }
}
