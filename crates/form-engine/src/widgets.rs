//! Renderer delegate: maps a field's `type` to a widget producing an
//! Adaptive Card node. Unknown types render as plain text.

use std::collections::BTreeMap;

use form_spec::render::value_to_display;
use form_spec::{FieldSpec, FieldType};
use serde_json::{Map, Value, json};

/// User intent reported back by a widget; applied with `FormEngine::dispatch`.
#[derive(Debug, Clone, PartialEq)]
pub enum WidgetAction {
    SetValue { field: String, value: Value },
    MarkTouched { field: String },
    Focus { field: String },
    Blur { field: String },
}

/// Everything a widget may read during one render pass.
#[derive(Debug, Clone, Copy)]
pub struct FieldProps<'a> {
    pub field: &'a FieldSpec,
    pub current_value: Option<&'a Value>,
    pub errors: &'a [String],
    pub touched: bool,
    pub is_validating: bool,
}

impl FieldProps<'_> {
    pub fn name(&self) -> &str {
        &self.field.name
    }

    pub fn label(&self) -> &str {
        &self.field.label
    }

    pub fn placeholder(&self) -> Option<&str> {
        self.field.placeholder.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.field.description.as_deref()
    }

    pub fn disabled(&self) -> bool {
        self.field.disabled
    }

    pub fn set_value(&self, value: impl Into<Value>) -> WidgetAction {
        WidgetAction::SetValue {
            field: self.field.name.clone(),
            value: value.into(),
        }
    }

    pub fn mark_touched(&self) -> WidgetAction {
        WidgetAction::MarkTouched {
            field: self.field.name.clone(),
        }
    }

    pub fn focus(&self) -> WidgetAction {
        WidgetAction::Focus {
            field: self.field.name.clone(),
        }
    }

    pub fn blur(&self) -> WidgetAction {
        WidgetAction::Blur {
            field: self.field.name.clone(),
        }
    }
}

pub trait Widget {
    fn render(&self, props: &FieldProps<'_>) -> Value;
}

impl<F> Widget for F
where
    F: Fn(&FieldProps<'_>) -> Value,
{
    fn render(&self, props: &FieldProps<'_>) -> Value {
        self(props)
    }
}

/// Widgets keyed by type label (`"text"`, `"slider"`, custom labels, ...).
pub struct WidgetRegistry {
    widgets: BTreeMap<String, Box<dyn Widget>>,
}

impl std::fmt::Debug for WidgetRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WidgetRegistry")
            .field("types", &self.widgets.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for WidgetRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        for kind in [FieldType::Text, FieldType::TextArea, FieldType::Email] {
            registry.register(kind.as_str(), text_input);
        }
        for kind in [FieldType::Number, FieldType::Integer, FieldType::Slider] {
            registry.register(kind.as_str(), number_input);
        }
        registry.register(FieldType::Boolean.as_str(), toggle_input);
        registry.register(FieldType::Select.as_str(), choice_input);
        registry.register(FieldType::Radio.as_str(), choice_input);
        registry.register(FieldType::Date.as_str(), date_input);
        registry.register(FieldType::File.as_str(), file_input);
        registry
    }
}

impl WidgetRegistry {
    pub fn empty() -> Self {
        Self {
            widgets: BTreeMap::new(),
        }
    }

    /// Registers or replaces the widget for a type label.
    pub fn register<W>(&mut self, kind: impl Into<String>, widget: W) -> &mut Self
    where
        W: Widget + 'static,
    {
        self.widgets.insert(kind.into(), Box::new(widget));
        self
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.widgets.contains_key(kind)
    }

    pub fn render(&self, props: &FieldProps<'_>) -> Value {
        match self.widgets.get(props.field.kind.as_str()) {
            Some(widget) => widget.render(props),
            None => plain_text(props),
        }
    }
}

fn base_input(kind: &str, props: &FieldProps<'_>) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("type".into(), Value::String(kind.into()));
    map.insert("id".into(), Value::String(props.name().to_string()));
    map.insert("label".into(), Value::String(props.label().to_string()));
    map.insert("isRequired".into(), Value::Bool(props.field.required));
    if let Some(placeholder) = props.placeholder() {
        map.insert("placeholder".into(), Value::String(placeholder.to_string()));
    }
    if props.disabled() {
        map.insert("isEnabled".into(), Value::Bool(false));
    }
    if let Some(error) = props.errors.first()
        && props.touched
    {
        map.insert("errorMessage".into(), Value::String(error.clone()));
    }
    map
}

fn text_input(props: &FieldProps<'_>) -> Value {
    let mut map = base_input("Input.Text", props);
    match props.field.kind {
        FieldType::TextArea => {
            map.insert("isMultiline".into(), Value::Bool(true));
        }
        FieldType::Email => {
            map.insert("style".into(), Value::String("Email".into()));
        }
        _ => {}
    }
    if let Some(constraint) = &props.field.constraint {
        if let Some(pattern) = &constraint.pattern {
            map.insert("regex".into(), Value::String(pattern.clone()));
        }
        if let Some(max_len) = constraint.max_len {
            map.insert("maxLength".into(), json!(max_len));
        }
    }
    if let Some(value) = props.current_value {
        map.insert("value".into(), Value::String(value_to_display(value)));
    }
    Value::Object(map)
}

fn number_input(props: &FieldProps<'_>) -> Value {
    let mut map = base_input("Input.Number", props);
    if let Some(constraint) = &props.field.constraint {
        if let Some(min) = constraint.min {
            map.insert("min".into(), json!(min));
        }
        if let Some(max) = constraint.max {
            map.insert("max".into(), json!(max));
        }
    }
    if let Some(step) = props.field.config.get("step") {
        map.insert("step".into(), step.clone());
    }
    if let Some(value) = props.current_value.filter(|value| value.is_number()) {
        map.insert("value".into(), value.clone());
    }
    Value::Object(map)
}

fn toggle_input(props: &FieldProps<'_>) -> Value {
    let mut map = base_input("Input.Toggle", props);
    map.insert("title".into(), Value::String(props.label().to_string()));
    map.insert("valueOn".into(), Value::String("true".into()));
    map.insert("valueOff".into(), Value::String("false".into()));
    if let Some(value) = props.current_value {
        let on = value.as_bool() == Some(true);
        map.insert("value".into(), Value::String(on.to_string()));
    }
    Value::Object(map)
}

fn choice_input(props: &FieldProps<'_>) -> Value {
    let mut map = base_input("Input.ChoiceSet", props);
    let style = if props.field.kind == FieldType::Radio {
        "expanded"
    } else {
        "compact"
    };
    map.insert("style".into(), Value::String(style.into()));
    let choices = props
        .field
        .choices
        .iter()
        .flatten()
        .map(|choice| {
            json!({
                "title": choice.label(),
                "value": value_to_display(&choice.value),
            })
        })
        .collect::<Vec<_>>();
    map.insert("choices".into(), Value::Array(choices));
    if let Some(value) = props.current_value {
        map.insert("value".into(), Value::String(value_to_display(value)));
    }
    Value::Object(map)
}

fn date_input(props: &FieldProps<'_>) -> Value {
    let mut map = base_input("Input.Date", props);
    if let Some(value) = props.current_value.and_then(Value::as_str) {
        map.insert("value".into(), Value::String(value.to_string()));
    }
    Value::Object(map)
}

// Adaptive Cards 1.3 has no file input; show the current file name.
fn file_input(props: &FieldProps<'_>) -> Value {
    let name = props
        .current_value
        .map(|value| match value {
            Value::Object(file) => file
                .get("name")
                .map(value_to_display)
                .unwrap_or_else(|| "attached".to_string()),
            other => value_to_display(other),
        })
        .unwrap_or_else(|| "no file selected".to_string());
    json!({
        "type": "TextBlock",
        "id": props.name(),
        "text": name,
        "isSubtle": true,
        "wrap": true,
    })
}

fn plain_text(props: &FieldProps<'_>) -> Value {
    let text = props
        .current_value
        .map(value_to_display)
        .unwrap_or_default();
    json!({
        "type": "TextBlock",
        "id": props.name(),
        "text": text,
        "wrap": true,
    })
}
