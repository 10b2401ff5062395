use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::expr::Expr;
use crate::values::ValueMap;

/// A rule spanning several fields. When `condition` evaluates true the rule
/// fails and `message` is attached to every field in `fields`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CrossFieldValidation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub message: String,
    pub fields: Vec<String>,
    pub condition: Expr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl CrossFieldValidation {
    /// Stable key for the rule: its id, or the joined field list.
    pub fn key(&self) -> String {
        self.id
            .clone()
            .unwrap_or_else(|| format!("cross:{}", self.fields.join("+")))
    }

    /// Whether the rule currently fails. Undecidable conditions do not fail.
    pub fn fails(&self, values: &ValueMap) -> bool {
        self.condition.evaluate(values).unwrap_or(false)
    }
}
