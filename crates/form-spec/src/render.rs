use serde::Serialize;
use serde_json::{Value, json};

use crate::spec::field::FieldType;

/// Where the form stands as of a render pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreenStatus {
    Editing,
    /// No visible field has an error and nothing is pending.
    Ready,
    Submitted,
}

impl ScreenStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ScreenStatus::Editing => "editing",
            ScreenStatus::Ready => "ready",
            ScreenStatus::Submitted => "submitted",
        }
    }
}

/// Visible fields that hold a valid value, out of all visible fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FillProgress {
    pub filled: usize,
    pub visible: usize,
}

/// Everything a widget needs to draw one visible field.
#[derive(Debug, Clone, Serialize)]
pub struct RenderField {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FieldType,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    pub description: Option<String>,
    pub required: bool,
    pub disabled: bool,
    pub touched: bool,
    pub is_validating: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_value: Option<Value>,
    /// Errors only reach the UI once the field is touched.
    pub errors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Widget node produced by the renderer delegate for this field's type.
    pub widget: Value,
}

/// One rendered screen (page or tab) of a form.
#[derive(Debug, Clone, Serialize)]
pub struct RenderPayload {
    pub form_id: String,
    pub form_title: String,
    pub form_version: String,
    pub status: ScreenStatus,
    pub page: usize,
    pub total_pages: usize,
    pub active_tab: Option<String>,
    pub progress: FillProgress,
    pub help: Option<String>,
    pub fields: Vec<RenderField>,
}

/// Plain JSON view of a screen for UIs that draw their own widgets.
pub fn render_json_ui(payload: &RenderPayload) -> Value {
    serde_json::to_value(payload).unwrap_or(Value::Null)
}

/// Terminal listing of a screen: header, fill progress, then one line per field.
pub fn render_text(payload: &RenderPayload) -> String {
    let screen = match &payload.active_tab {
        Some(tab) => format!("Tab {}/{}: {}", payload.page, payload.total_pages, tab),
        None => format!("Page {}/{}", payload.page, payload.total_pages),
    };
    let mut lines = vec![
        format!("{} [{}]", payload.form_title, payload.form_id),
        format!(
            "{} - {} ({} of {} filled)",
            screen,
            payload.status.label(),
            payload.progress.filled,
            payload.progress.visible
        ),
    ];
    if let Some(help) = &payload.help {
        lines.push(help.clone());
    }
    for field in &payload.fields {
        let mut entry = format!(" - {} ({})", field.name, field.label);
        if field.required {
            entry.push_str(" [required]");
        }
        if let Some(current_value) = &field.current_value {
            entry.push_str(&format!(" = {}", value_to_display(current_value)));
        }
        if field.is_validating {
            entry.push_str(" (checking...)");
        }
        lines.push(entry);
        for error in &field.errors {
            lines.push(format!("   ! {}", error));
        }
    }

    lines.join("\n")
}

/// Adaptive Card (v1.3) for one screen, with Back/Next/Submit actions.
pub fn render_card(payload: &RenderPayload) -> Value {
    let mut body = Vec::new();

    body.push(json!({
        "type": "TextBlock",
        "text": payload.form_title,
        "weight": "Bolder",
        "size": "Large",
        "wrap": true,
    }));

    if let Some(help) = &payload.help {
        body.push(json!({
            "type": "TextBlock",
            "text": help,
            "wrap": true,
        }));
    }

    let filled = format!("{}/{}", payload.progress.filled, payload.progress.visible);
    body.push(json!({
        "type": "FactSet",
        "facts": [
            { "title": "Page", "value": format!("{}/{}", payload.page, payload.total_pages) },
            { "title": "Filled", "value": filled },
            { "title": "Status", "value": payload.status.label() }
        ]
    }));

    for field in &payload.fields {
        let mut items = vec![json!({
            "type": "TextBlock",
            "text": field.label,
            "weight": "Bolder",
            "wrap": true,
        })];
        if let Some(description) = &field.description {
            items.push(json!({
                "type": "TextBlock",
                "text": description,
                "wrap": true,
                "spacing": "Small",
            }));
        }
        items.push(field.widget.clone());
        for error in &field.errors {
            items.push(json!({
                "type": "TextBlock",
                "text": error,
                "color": "Attention",
                "wrap": true,
                "spacing": "Small",
            }));
        }
        body.push(json!({
            "type": "Container",
            "items": items,
        }));
    }

    let mut actions = Vec::new();
    if payload.page > 1 {
        actions.push(json!({
            "type": "Action.Submit",
            "title": "⬅️ Back",
            "data": { "form": { "formId": payload.form_id, "mode": "previous" } }
        }));
    }
    let forward = if payload.page < payload.total_pages {
        json!({
            "type": "Action.Submit",
            "title": "Next ➡️",
            "data": { "form": { "formId": payload.form_id, "mode": "next" } }
        })
    } else {
        json!({
            "type": "Action.Submit",
            "title": "Submit",
            "data": { "form": { "formId": payload.form_id, "mode": "submit" } }
        })
    };
    actions.push(forward);

    json!({
        "$schema": "http://adaptivecards.io/schemas/adaptive-card.json",
        "type": "AdaptiveCard",
        "version": "1.3",
        "body": body,
        "actions": actions,
    })
}

/// Strings print bare; everything else prints as compact JSON.
pub fn value_to_display(value: &Value) -> String {
    match value.as_str() {
        Some(text) => text.to_string(),
        None => value.to_string(),
    }
}
