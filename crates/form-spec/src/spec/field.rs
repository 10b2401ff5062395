use std::borrow::Cow;
use std::fmt;

use schemars::{JsonSchema, Schema, SchemaGenerator, json_schema};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::expr::Expr;

/// Widget kind of a field. Unknown labels are kept as [`FieldType::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FieldType {
    Text,
    TextArea,
    Email,
    Number,
    Integer,
    Slider,
    Boolean,
    Select,
    Radio,
    Date,
    File,
    Other(String),
}

impl FieldType {
    pub fn as_str(&self) -> &str {
        match self {
            FieldType::Text => "text",
            FieldType::TextArea => "textarea",
            FieldType::Email => "email",
            FieldType::Number => "number",
            FieldType::Integer => "integer",
            FieldType::Slider => "slider",
            FieldType::Boolean => "boolean",
            FieldType::Select => "select",
            FieldType::Radio => "radio",
            FieldType::Date => "date",
            FieldType::File => "file",
            FieldType::Other(label) => label,
        }
    }
}

impl From<String> for FieldType {
    fn from(label: String) -> Self {
        match label.as_str() {
            "text" | "string" => FieldType::Text,
            "textarea" => FieldType::TextArea,
            "email" => FieldType::Email,
            "number" => FieldType::Number,
            "integer" => FieldType::Integer,
            "slider" | "range" => FieldType::Slider,
            "boolean" | "checkbox" | "toggle" => FieldType::Boolean,
            "select" | "enum" => FieldType::Select,
            "radio" => FieldType::Radio,
            "date" => FieldType::Date,
            "file" => FieldType::File,
            _ => FieldType::Other(label),
        }
    }
}

impl From<FieldType> for String {
    fn from(kind: FieldType) -> Self {
        kind.as_str().to_string()
    }
}

impl JsonSchema for FieldType {
    fn schema_name() -> Cow<'static, str> {
        "FieldType".into()
    }

    fn json_schema(_generator: &mut SchemaGenerator) -> Schema {
        json_schema!({
            "type": "string",
            "description": "Widget kind such as text, number, select or date, or a custom label."
        })
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declarative value constraints checked after the type check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
pub struct Constraint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_len: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_len: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Message used instead of the built-in one when any check fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// A selectable option of a `select`/`radio` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Choice {
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Choice {
    pub fn label(&self) -> String {
        match (&self.label, &self.value) {
            (Some(label), _) => label.clone(),
            (None, Value::String(text)) => text.clone(),
            (None, other) => other.to_string(),
        }
    }
}

pub const DEFAULT_TAB: &str = "default";

fn default_page() -> u32 {
    1
}

fn default_tab() -> String {
    DEFAULT_TAB.to_string()
}

fn is_default_page(page: &u32) -> bool {
    *page == 1
}

fn is_default_tab(tab: &str) -> bool {
    tab == DEFAULT_TAB
}

/// Static description of one form input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FieldSpec {
    /// Unique, dot/bracket addressable name.
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FieldType,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_page", skip_serializing_if = "is_default_page")]
    pub page: u32,
    #[serde(default = "default_tab", skip_serializing_if = "is_default_tab")]
    pub tab: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choices: Option<Vec<Choice>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraint: Option<Constraint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible_when: Option<Expr>,
    /// Fields read by `visible_when`; inferred from the expression when empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    /// Widget-specific settings (slider step, accepted file types, ...).
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub config: Map<String, Value>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, kind: FieldType, label: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            label: label.into(),
            placeholder: None,
            description: None,
            page: 1,
            tab: default_tab(),
            group: None,
            section: None,
            required: false,
            disabled: false,
            default_value: None,
            choices: None,
            constraint: None,
            visible_when: None,
            dependencies: Vec::new(),
            config: Map::new(),
        }
    }

    pub fn on_page(mut self, page: u32) -> Self {
        self.page = page;
        self
    }

    pub fn on_tab(mut self, tab: impl Into<String>) -> Self {
        self.tab = tab.into();
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn visible_when(mut self, expr: Expr) -> Self {
        self.visible_when = Some(expr);
        self
    }

    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraint = Some(constraint);
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn with_choices<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.choices = Some(
            values
                .into_iter()
                .map(|value| Choice {
                    value: value.into(),
                    label: None,
                })
                .collect(),
        );
        self
    }

    /// Declared dependencies, or the fields referenced by `visible_when`.
    pub fn effective_dependencies(&self) -> Vec<String> {
        if !self.dependencies.is_empty() {
            return self.dependencies.clone();
        }
        self.visible_when
            .as_ref()
            .map(|expr| expr.referenced_fields().into_iter().collect())
            .unwrap_or_default()
    }
}
