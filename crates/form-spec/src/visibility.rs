use crate::expr::Expr;
use crate::spec::form::{FormSpec, LayoutMode};
use crate::values::ValueMap;

pub type VisibilityMap = std::collections::BTreeMap<String, bool>;

/// How to treat a predicate that cannot be decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisibilityMode {
    #[default]
    Visible,
    Hidden,
    /// Hidden, and the engine reports the predicate as a misconfiguration.
    Error,
}

impl VisibilityMode {
    pub fn decide(self, expr: Option<&Expr>, values: &ValueMap) -> bool {
        match expr {
            None => true,
            Some(expr) => expr.evaluate(values).unwrap_or_else(|| self.undecided()),
        }
    }

    /// Visibility given to a target whose predicate cannot be decided.
    pub fn undecided(self) -> bool {
        match self {
            VisibilityMode::Visible => true,
            VisibilityMode::Hidden | VisibilityMode::Error => false,
        }
    }

    pub fn reports_undecided(self) -> bool {
        self == VisibilityMode::Error
    }
}

/// One-shot field visibility: the field's own predicate and its page/tab predicate.
///
/// Active-tab filtering is a navigation concern and is not applied here.
pub fn resolve_visibility(
    spec: &FormSpec,
    values: &ValueMap,
    mode: VisibilityMode,
) -> VisibilityMap {
    let mut map = VisibilityMap::new();

    for field in &spec.fields {
        let own = mode.decide(field.visible_when.as_ref(), values);
        let container = match spec.layout() {
            LayoutMode::Pages => spec
                .page_spec(field.page)
                .map(|page| mode.decide(page.visible_when.as_ref(), values))
                .unwrap_or(true),
            LayoutMode::Tabs => spec
                .tab_spec(&field.tab)
                .map(|tab| mode.decide(tab.visible_when.as_ref(), values))
                .unwrap_or(true),
        };
        map.insert(field.name.clone(), own && container);
    }

    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{Comparison, Operand};
    use serde_json::json;

    fn over_18() -> Expr {
        Expr::Compare {
            left: "age".into(),
            cmp: Comparison::Gte,
            right: Operand::Literal(json!(18)),
        }
    }

    #[test]
    fn undecidable_predicates_follow_the_mode() {
        let blank = ValueMap::new();
        assert!(VisibilityMode::Visible.decide(Some(&over_18()), &blank));
        assert!(!VisibilityMode::Hidden.decide(Some(&over_18()), &blank));
        assert!(!VisibilityMode::Error.decide(Some(&over_18()), &blank));
        assert!(VisibilityMode::Error.decide(None, &blank));

        let adult = ValueMap::from_json(json!({ "age": 30 }));
        assert!(VisibilityMode::Error.decide(Some(&over_18()), &adult));
    }
}
