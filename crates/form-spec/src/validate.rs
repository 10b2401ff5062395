use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::spec::field::{Constraint, FieldSpec, FieldType};
use crate::spec::form::FormSpec;
use crate::values::{ValueMap, is_filled};
use crate::visibility::{VisibilityMode, resolve_visibility};

/// One failed rule for one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Outcome of validating a complete set of values in one pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationError>,
    pub missing_required: Vec<String>,
    pub unknown_fields: Vec<String>,
}

pub const REQUIRED_MESSAGE: &str = "this field is required";

/// Validates every visible field plus the cross-field rules in one pass.
pub fn validate(spec: &FormSpec, values: &ValueMap) -> ValidationResult {
    let visibility = resolve_visibility(spec, values, VisibilityMode::Visible);

    let mut errors = Vec::new();
    let mut missing_required = Vec::new();

    for field in &spec.fields {
        if !visibility.get(&field.name).copied().unwrap_or(true) {
            continue;
        }

        let value = values.get(&field.name);
        if !is_filled(value) {
            if field.required {
                missing_required.push(field.name.clone());
            }
            continue;
        }
        if let Some(value) = value
            && let Some(error) = validate_value(field, value)
        {
            errors.push(error);
        }
    }

    for rule in &spec.validations {
        let visible = rule
            .fields
            .iter()
            .any(|field| visibility.get(field).copied().unwrap_or(true));
        if visible && rule.fails(values) {
            for field in &rule.fields {
                errors.push(ValidationError {
                    field: Some(field.clone()),
                    path: Some(format!("/{}", field)),
                    message: rule.message.clone(),
                    code: Some(rule.code.clone().unwrap_or_else(|| "cross_field".into())),
                });
            }
        }
    }

    let known_roots: BTreeSet<&str> = spec
        .fields
        .iter()
        .filter_map(|field| field.name.split(['.', '[']).next())
        .collect();
    let unknown_fields: Vec<String> = values
        .as_object()
        .keys()
        .filter(|key| !known_roots.contains(key.as_str()))
        .cloned()
        .collect();

    ValidationResult {
        valid: errors.is_empty() && missing_required.is_empty() && unknown_fields.is_empty(),
        errors,
        missing_required,
        unknown_fields,
    }
}

/// Runs the declarative synchronous rules of one field against its current value.
///
/// Returns an empty list when the field is valid.
pub fn check_field(field: &FieldSpec, value: Option<&Value>) -> Vec<String> {
    if !is_filled(value) {
        return if field.required {
            vec![REQUIRED_MESSAGE.to_string()]
        } else {
            Vec::new()
        };
    }
    value
        .and_then(|value| validate_value(field, value))
        .map(|error| vec![error.message])
        .unwrap_or_default()
}

fn validate_value(field: &FieldSpec, value: &Value) -> Option<ValidationError> {
    if !matches_type(field, value) {
        return Some(base_error(field, "type mismatch", "type_mismatch"));
    }

    if let Some(constraint) = &field.constraint
        && let Some(error) = enforce_constraint(field, value, constraint)
    {
        return Some(error);
    }

    if matches!(field.kind, FieldType::Email)
        && let Some(text) = value.as_str()
        && !email_regex().is_match(text)
    {
        return Some(base_error(field, "invalid email address", "email"));
    }

    if let Some(choices) = &field.choices
        && !choices.is_empty()
        && !choices.iter().any(|choice| &choice.value == value)
    {
        return Some(base_error(field, "invalid option", "choice_mismatch"));
    }

    None
}

fn matches_type(field: &FieldSpec, value: &Value) -> bool {
    match &field.kind {
        FieldType::Text | FieldType::TextArea | FieldType::Email => value.is_string(),
        FieldType::Date => value
            .as_str()
            .map(|text| date_regex().is_match(text))
            .unwrap_or(false),
        FieldType::Boolean => value.is_boolean(),
        FieldType::Integer => value.is_i64() || value.is_u64(),
        FieldType::Number | FieldType::Slider => value.is_number(),
        FieldType::File => value.is_object() || value.is_string(),
        FieldType::Select | FieldType::Radio | FieldType::Other(_) => true,
    }
}

fn enforce_constraint(
    field: &FieldSpec,
    value: &Value,
    constraint: &Constraint,
) -> Option<ValidationError> {
    let fail = |message: &str, code: &str| {
        let mut error = base_error(field, message, code);
        if let Some(custom) = &constraint.message {
            error.message = custom.clone();
        }
        Some(error)
    };

    if let Some(pattern) = &constraint.pattern
        && let Some(text) = value.as_str()
        && let Ok(regex) = Regex::new(pattern)
        && !regex.is_match(text)
    {
        return fail("value does not match pattern", "pattern_mismatch");
    }

    if let Some(min_len) = constraint.min_len
        && let Some(text) = value.as_str()
        && text.chars().count() < min_len
    {
        return fail("text shorter than min length", "min_length");
    }

    if let Some(max_len) = constraint.max_len
        && let Some(text) = value.as_str()
        && text.chars().count() > max_len
    {
        return fail("text longer than max length", "max_length");
    }

    if let Some(min) = constraint.min
        && let Some(value) = value.as_f64()
        && value < min
    {
        return fail("value below minimum", "min");
    }

    if let Some(max) = constraint.max
        && let Some(value) = value.as_f64()
        && value > max
    {
        return fail("value above maximum", "max");
    }

    None
}

fn base_error(field: &FieldSpec, message: &str, code: &str) -> ValidationError {
    ValidationError {
        field: Some(field.name.clone()),
        path: Some(format!("/{}", field.name)),
        message: message.into(),
        code: Some(code.into()),
    }
}

fn email_regex() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("static regex"))
}

fn date_regex() -> &'static Regex {
    static DATE: OnceLock<Regex> = OnceLock::new();
    DATE.get_or_init(|| Regex::new(r"^\d{4}-\d{2}-\d{2}").expect("static regex"))
}
