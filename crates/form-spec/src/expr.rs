use std::collections::BTreeSet;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::values::{ValueMap, is_filled};

/// Comparison operators for [`Expr::Compare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Gt,
    Gte,
    Lt,
    Lte,
}

/// Right-hand side of a comparison: another field or a literal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum Operand {
    Field { field: String },
    Literal(Value),
}

/// Lightweight expression AST used for `visible_when` and cross-field rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Expr {
    LiteralBool {
        value: bool,
    },
    Eq {
        field: String,
        value: Value,
    },
    Ne {
        field: String,
        value: Value,
    },
    In {
        field: String,
        values: Vec<Value>,
    },
    IsSet {
        field: String,
    },
    Truthy {
        field: String,
    },
    Compare {
        left: String,
        cmp: Comparison,
        right: Operand,
    },
    And {
        expressions: Vec<Expr>,
    },
    Or {
        expressions: Vec<Expr>,
    },
    Not {
        expression: Box<Expr>,
    },
}

impl Expr {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Expr::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Expr::Ne {
            field: field.into(),
            value: value.into(),
        }
    }

    fn get_value<'a>(values: &'a ValueMap, field: &str) -> &'a Value {
        values.get(field).unwrap_or(&Value::Null)
    }

    /// Evaluates the expression to a boolean if possible.
    ///
    /// Missing fields read as `null`. `None` is returned only when a comparison
    /// involves a value that is not numeric.
    pub fn evaluate(&self, values: &ValueMap) -> Option<bool> {
        match self {
            Expr::LiteralBool { value } => Some(*value),
            Expr::Eq { field, value } => Some(loose_eq(Self::get_value(values, field), value)),
            Expr::Ne { field, value } => Some(!loose_eq(Self::get_value(values, field), value)),
            Expr::In {
                field,
                values: options,
            } => {
                let current = Self::get_value(values, field);
                Some(options.iter().any(|option| loose_eq(current, option)))
            }
            Expr::IsSet { field } => Some(is_filled(values.get(field))),
            Expr::Truthy { field } => Some(truthy(Self::get_value(values, field))),
            Expr::Compare { left, cmp, right } => {
                let left = as_number(Self::get_value(values, left))?;
                let right = match right {
                    Operand::Field { field } => as_number(Self::get_value(values, field))?,
                    Operand::Literal(value) => as_number(value)?,
                };
                Some(match cmp {
                    Comparison::Gt => left > right,
                    Comparison::Gte => left >= right,
                    Comparison::Lt => left < right,
                    Comparison::Lte => left <= right,
                })
            }
            Expr::And { expressions } => {
                for expr in expressions {
                    match expr.evaluate(values) {
                        Some(true) => continue,
                        Some(false) => return Some(false),
                        None => return None,
                    }
                }
                Some(true)
            }
            Expr::Or { expressions } => {
                for expr in expressions {
                    if let Some(true) = expr.evaluate(values) {
                        return Some(true);
                    }
                }
                Some(false)
            }
            Expr::Not { expression } => expression.evaluate(values).map(|value| !value),
        }
    }

    /// Field names the expression reads; used as the implicit dependency set.
    pub fn referenced_fields(&self) -> BTreeSet<String> {
        let mut fields = BTreeSet::new();
        self.collect_fields(&mut fields);
        fields
    }

    fn collect_fields(&self, out: &mut BTreeSet<String>) {
        match self {
            Expr::LiteralBool { .. } => {}
            Expr::Eq { field, .. }
            | Expr::Ne { field, .. }
            | Expr::In { field, .. }
            | Expr::IsSet { field }
            | Expr::Truthy { field } => {
                out.insert(field.clone());
            }
            Expr::Compare { left, right, .. } => {
                out.insert(left.clone());
                if let Operand::Field { field } = right {
                    out.insert(field.clone());
                }
            }
            Expr::And { expressions } | Expr::Or { expressions } => {
                for expr in expressions {
                    expr.collect_fields(out);
                }
            }
            Expr::Not { expression } => expression.collect_fields(out),
        }
    }
}

/// Equality that treats `1` and `1.0` (and numeric strings from text inputs) as equal.
fn loose_eq(left: &Value, right: &Value) -> bool {
    if left == right {
        return true;
    }
    match (as_number(left), as_number(right)) {
        (Some(a), Some(b)) if left.is_number() || right.is_number() => a == b,
        _ => false,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(flag) => *flag,
        Value::Null => false,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn values(raw: Value) -> ValueMap {
        ValueMap::from_json(raw)
    }

    #[test]
    fn eq_reads_missing_fields_as_null() {
        let expr = Expr::eq("country", "US");
        assert_eq!(expr.evaluate(&values(json!({}))), Some(false));
        assert_eq!(expr.evaluate(&values(json!({ "country": "US" }))), Some(true));
        assert_eq!(
            Expr::ne("country", "US").evaluate(&values(json!({}))),
            Some(true)
        );
    }

    #[test]
    fn compare_against_other_field() {
        let expr: Expr = serde_json::from_value(json!({
            "op": "compare",
            "left": "end",
            "cmp": "lt",
            "right": { "field": "start" }
        }))
        .expect("deserialize");
        assert_eq!(expr.evaluate(&values(json!({ "start": 5, "end": 3 }))), Some(true));
        assert_eq!(expr.evaluate(&values(json!({ "start": 5, "end": 8 }))), Some(false));
        assert_eq!(expr.evaluate(&values(json!({ "start": "x", "end": 8 }))), None);
        assert_eq!(
            expr.referenced_fields().into_iter().collect::<Vec<_>>(),
            vec!["end".to_string(), "start".to_string()]
        );
    }

    #[test]
    fn loose_equality_matches_numeric_text() {
        let expr = Expr::eq("age", 30);
        assert_eq!(expr.evaluate(&values(json!({ "age": "30" }))), Some(true));
        assert_eq!(expr.evaluate(&values(json!({ "age": 30.0 }))), Some(true));
    }

    #[test]
    fn and_short_circuits_on_undecidable() {
        let expr = Expr::And {
            expressions: vec![
                Expr::LiteralBool { value: true },
                Expr::Compare {
                    left: "x".into(),
                    cmp: Comparison::Gt,
                    right: Operand::Literal(json!(1)),
                },
            ],
        };
        assert_eq!(expr.evaluate(&values(json!({}))), None);
    }
}
