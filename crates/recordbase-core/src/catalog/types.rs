//! Field type definitions.

use serde::{Deserialize, Serialize};

/// Data type of a resource field.
///
/// Types the engine does not interpret deserialize as [`FieldType::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Number,
    Boolean,
    Date,
    Datetime,
    Time,
    Email,
    Url,
    Select,
    Radio,
    Checkbox,
    Tagbox,
    Users,
    Owner,
    Resource,
    Resources,
    File,
    Geospatial,
    #[serde(other)]
    Other,
}

impl FieldType {
    /// Whether values of this type are arrays.
    pub fn is_multi_valued(&self) -> bool {
        matches!(
            self,
            FieldType::Checkbox
                | FieldType::Tagbox
                | FieldType::Users
                | FieldType::Resources
                | FieldType::File
        )
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FieldType::Text => "text",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Date => "date",
            FieldType::Datetime => "datetime",
            FieldType::Time => "time",
            FieldType::Email => "email",
            FieldType::Url => "url",
            FieldType::Select => "select",
            FieldType::Radio => "radio",
            FieldType::Checkbox => "checkbox",
            FieldType::Tagbox => "tagbox",
            FieldType::Users => "users",
            FieldType::Owner => "owner",
            FieldType::Resource => "resource",
            FieldType::Resources => "resources",
            FieldType::File => "file",
            FieldType::Geospatial => "geospatial",
            FieldType::Other => "other",
        };
        f.write_str(name)
    }
}
