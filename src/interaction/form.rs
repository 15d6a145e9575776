use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;

pub const FORM_SUBMISSION_HEADER: &str = "Submitted values for";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Email,
    Number,
    Boolean,
    Enum,
    Date,
    #[serde(other)]
    Text,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormField {
    pub name: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(rename = "type", default = "default_field_type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub default: Option<Value>,
}

fn default_field_type() -> FieldType {
    FieldType::String
}

impl FormField {
    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormSection {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub fields: Vec<FormField>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmartFormSchema {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub sections: Vec<FormSection>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldError {
    Required { field: String },
    InvalidNumber { field: String, raw: String },
    InvalidBoolean { field: String, raw: String },
    InvalidEmail { field: String, raw: String },
    InvalidDate { field: String, raw: String },
    NotAnOption { field: String, raw: String, options: Vec<String> },
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Required { field } => write!(f, "`{field}` is required"),
            Self::InvalidNumber { field, raw } => write!(f, "`{field}`: `{raw}` is not a number"),
            Self::InvalidBoolean { field, raw } => {
                write!(f, "`{field}`: `{raw}` is not yes/no")
            }
            Self::InvalidEmail { field, raw } => {
                write!(f, "`{field}`: `{raw}` is not an email address")
            }
            Self::InvalidDate { field, raw } => {
                write!(f, "`{field}`: `{raw}` is not a date (YYYY-MM-DD)")
            }
            Self::NotAnOption {
                field,
                raw,
                options,
            } => write!(
                f,
                "`{field}`: `{raw}` must be one of {}",
                options.join(", ")
            ),
        }
    }
}

impl FieldError {
    pub fn field(&self) -> &str {
        match self {
            Self::Required { field }
            | Self::InvalidNumber { field, .. }
            | Self::InvalidBoolean { field, .. }
            | Self::InvalidEmail { field, .. }
            | Self::InvalidDate { field, .. }
            | Self::NotAnOption { field, .. } => field,
        }
    }
}

impl SmartFormSchema {
    pub fn fields(&self) -> impl Iterator<Item = &FormField> {
        self.sections.iter().flat_map(|section| section.fields.iter())
    }

    pub fn required_fields(&self) -> Vec<&str> {
        self.fields()
            .filter(|field| field.required)
            .map(|field| field.name.as_str())
            .collect()
    }

    /// Coerces raw input per field type. Blank optional fields are omitted; blank required
    /// fields fall back to the schema default before being reported missing.
    pub fn validate(&self, raw: &BTreeMap<String, String>) -> Result<Map<String, Value>, Vec<FieldError>> {
        let mut values = Map::new();
        let mut errors = Vec::new();
        for field in self.fields() {
            let input = raw
                .get(&field.name)
                .map(|value| value.trim())
                .filter(|value| !value.is_empty());
            let Some(input) = input else {
                match field.default.as_ref().filter(|value| !value.is_null()) {
                    Some(default) => {
                        values.insert(field.name.clone(), default.clone());
                    }
                    None if field.required => errors.push(FieldError::Required {
                        field: field.name.clone(),
                    }),
                    None => {}
                }
                continue;
            };
            match coerce_field(field, input) {
                Ok(value) => {
                    values.insert(field.name.clone(), value);
                }
                Err(err) => errors.push(err),
            }
        }
        if errors.is_empty() {
            Ok(values)
        } else {
            Err(errors)
        }
    }

    /// Submit stays disabled until every required field coerces.
    pub fn can_submit(&self, raw: &BTreeMap<String, String>) -> bool {
        self.validate(raw).is_ok()
    }

    /// Renders validated values as the user turn sent back to the planner.
    pub fn submission_text(&self, values: &Map<String, Value>) -> String {
        let mut lines = vec![format!("{FORM_SUBMISSION_HEADER} \"{}\":", self.title)];
        for field in self.fields() {
            if let Some(value) = values.get(&field.name) {
                let rendered = match value {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                };
                lines.push(format!("- {}: {rendered}", field.name));
            }
        }
        lines.push(String::new());
        lines.push(Value::Object(values.clone()).to_string());
        lines.join("\n")
    }
}

fn coerce_field(field: &FormField, input: &str) -> Result<Value, FieldError> {
    let name = field.name.clone();
    match field.field_type {
        FieldType::String | FieldType::Text => Ok(Value::String(input.to_string())),
        FieldType::Email => {
            if looks_like_email(input) {
                Ok(Value::String(input.to_string()))
            } else {
                Err(FieldError::InvalidEmail {
                    field: name,
                    raw: input.to_string(),
                })
            }
        }
        FieldType::Number => parse_number(input)
            .map(Value::Number)
            .ok_or_else(|| FieldError::InvalidNumber {
                field: name,
                raw: input.to_string(),
            }),
        FieldType::Boolean => parse_bool(input)
            .map(Value::Bool)
            .ok_or_else(|| FieldError::InvalidBoolean {
                field: name,
                raw: input.to_string(),
            }),
        FieldType::Enum => field
            .options
            .iter()
            .find(|option| option.eq_ignore_ascii_case(input))
            .map(|option| Value::String(option.clone()))
            .ok_or_else(|| FieldError::NotAnOption {
                field: name,
                raw: input.to_string(),
                options: field.options.clone(),
            }),
        FieldType::Date => NaiveDate::parse_from_str(input, "%Y-%m-%d")
            .map(|date| Value::String(date.format("%Y-%m-%d").to_string()))
            .map_err(|_| FieldError::InvalidDate {
                field: name,
                raw: input.to_string(),
            }),
    }
}

fn parse_number(input: &str) -> Option<Number> {
    if let Ok(int) = input.parse::<i64>() {
        return Some(Number::from(int));
    }
    input
        .parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
}

fn parse_bool(input: &str) -> Option<bool> {
    match input.to_ascii_lowercase().as_str() {
        "true" | "yes" | "y" | "1" | "on" => Some(true),
        "false" | "no" | "n" | "0" | "off" => Some(false),
        _ => None,
    }
}

fn looks_like_email(input: &str) -> bool {
    let Some((local, domain)) = input.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !input.chars().any(char::is_whitespace)
}
