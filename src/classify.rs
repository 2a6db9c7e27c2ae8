//! Field classification from source schema metadata

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Semantic type of a source field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Number,
    Boolean,
    Date,
    DateTime,
    AttachmentList,
    MultiSelect,
    Other,
}

impl FieldType {
    /// Map a source type tag (e.g. `singleLineText`, `checkbox`) to a field type
    pub fn from_source_tag(tag: &str) -> Self {
        match tag {
            "singleLineText" | "multilineText" | "richText" | "email" | "url" | "phoneNumber" => {
                FieldType::Text
            }
            "number" | "currency" | "percent" | "rating" | "duration" | "autoNumber"
            | "count" => FieldType::Number,
            "checkbox" => FieldType::Boolean,
            "date" => FieldType::Date,
            "dateTime" | "createdTime" | "lastModifiedTime" => FieldType::DateTime,
            "multipleAttachments" => FieldType::AttachmentList,
            "multipleSelects" => FieldType::MultiSelect,
            _ => FieldType::Other,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::Text => "text",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Date => "date",
            FieldType::DateTime => "datetime",
            FieldType::AttachmentList => "attachment_list",
            FieldType::MultiSelect => "multi_select",
            FieldType::Other => "other",
        };
        write!(f, "{}", name)
    }
}

/// Maps field names to semantic types
///
/// Fields missing from the schema are treated as text.
#[derive(Debug, Clone, Default)]
pub struct FieldClassifier {
    types: HashMap<String, FieldType>,
}

impl FieldClassifier {
    /// Build from a `field name -> source type tag` map
    pub fn from_source_types(source_types: &HashMap<String, String>) -> Self {
        let types = source_types
            .iter()
            .map(|(name, tag)| (name.clone(), FieldType::from_source_tag(tag)))
            .collect();
        Self { types }
    }

    pub fn classify(&self, field: &str) -> FieldType {
        self.types.get(field).copied().unwrap_or(FieldType::Text)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_tags() {
        assert_eq!(FieldType::from_source_tag("singleLineText"), FieldType::Text);
        assert_eq!(FieldType::from_source_tag("number"), FieldType::Number);
        assert_eq!(FieldType::from_source_tag("checkbox"), FieldType::Boolean);
        assert_eq!(FieldType::from_source_tag("date"), FieldType::Date);
        assert_eq!(FieldType::from_source_tag("dateTime"), FieldType::DateTime);
        assert_eq!(
            FieldType::from_source_tag("multipleAttachments"),
            FieldType::AttachmentList
        );
        assert_eq!(FieldType::from_source_tag("multipleSelects"), FieldType::MultiSelect);
        assert_eq!(FieldType::from_source_tag("formula"), FieldType::Other);
    }

    #[test]
    fn test_unknown_field_defaults_to_text() {
        let mut tags = HashMap::new();
        tags.insert("Age".to_string(), "number".to_string());
        let classifier = FieldClassifier::from_source_types(&tags);

        assert_eq!(classifier.classify("Age"), FieldType::Number);
        assert_eq!(classifier.classify("Nickname"), FieldType::Text);
        assert_eq!(classifier.len(), 1);
    }
}
