//! Incremental field/page/tab visibility.
//!
//! Predicate results are cached per target and refreshed only when one of the
//! target's dependencies changed. Programmatic predicates without declared
//! dependencies refresh on every change. Page and tab visibility is derived
//! from the field results on every query.

use std::collections::{BTreeMap, BTreeSet};

use form_spec::{Expr, FormSpec, LayoutMode, ValueMap, VisibilityMode};
use tracing::warn;

/// Programmatic visibility predicate over the whole value map.
pub type Predicate = Box<dyn Fn(&ValueMap) -> bool>;

struct Rule {
    expr: Option<Expr>,
    custom: Option<Predicate>,
    /// `None` means unknown: re-evaluate on every change.
    dependencies: Option<BTreeSet<String>>,
}

impl Rule {
    fn new(expr: Option<Expr>, declared: &[String]) -> Self {
        let dependencies = if !declared.is_empty() {
            Some(declared.iter().cloned().collect())
        } else {
            Some(expr.as_ref().map(Expr::referenced_fields).unwrap_or_default())
        };
        Self {
            expr,
            custom: None,
            dependencies,
        }
    }

    fn with_custom(&mut self, predicate: Predicate, declared: Option<BTreeSet<String>>) {
        self.custom = Some(predicate);
        // an opaque predicate may read anything unless told otherwise
        self.dependencies = match (self.dependencies.take(), declared) {
            (Some(mut existing), Some(extra)) => {
                existing.extend(extra);
                Some(existing)
            }
            _ => None,
        };
    }

    fn affected_by(&self, changed: Option<&[String]>) -> bool {
        match (changed, &self.dependencies) {
            (None, _) | (_, None) => true,
            (Some(changed), Some(dependencies)) => changed.iter().any(|name| {
                dependencies
                    .iter()
                    .any(|dependency| paths_overlap(name, dependency))
            }),
        }
    }

    fn evaluate(&self, mode: VisibilityMode, values: &ValueMap, subject: &str) -> bool {
        let declarative = match self.expr.as_ref().map(|expr| expr.evaluate(values)) {
            None => true,
            Some(Some(decided)) => decided,
            Some(None) => {
                if mode.reports_undecided() {
                    warn!(subject, "visibility predicate cannot be decided, hiding it");
                }
                mode.undecided()
            }
        };
        declarative && self.custom.as_ref().is_none_or(|predicate| predicate(values))
    }
}

/// `a` and `a.b` overlap, as do `items` and `items[0]`; `ab` and `a` do not.
fn paths_overlap(left: &str, right: &str) -> bool {
    fn nested_under(child: &str, parent: &str) -> bool {
        child
            .strip_prefix(parent)
            .is_some_and(|rest| rest.starts_with('.') || rest.starts_with('['))
    }
    left == right || nested_under(left, right) || nested_under(right, left)
}

struct FieldSlot {
    name: String,
    page: u32,
    tab: String,
}

pub struct VisibilityResolver {
    layout: LayoutMode,
    mode: VisibilityMode,
    fields: Vec<FieldSlot>,
    field_rules: BTreeMap<String, Rule>,
    page_rules: BTreeMap<u32, Rule>,
    tab_order: Vec<String>,
    tab_rules: BTreeMap<String, Rule>,
    field_cache: BTreeMap<String, bool>,
    page_cache: BTreeMap<u32, bool>,
    tab_cache: BTreeMap<String, bool>,
    evaluations: u64,
}

impl std::fmt::Debug for VisibilityResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisibilityResolver")
            .field("layout", &self.layout)
            .field("fields", &self.field_cache)
            .field("pages", &self.page_cache)
            .field("tabs", &self.tab_cache)
            .finish()
    }
}

impl VisibilityResolver {
    pub fn new(spec: &FormSpec, mode: VisibilityMode) -> Self {
        let fields = spec
            .fields
            .iter()
            .map(|field| FieldSlot {
                name: field.name.clone(),
                page: field.page,
                tab: field.tab.clone(),
            })
            .collect();
        let field_rules = spec
            .fields
            .iter()
            .map(|field| {
                (
                    field.name.clone(),
                    Rule::new(field.visible_when.clone(), &field.dependencies),
                )
            })
            .collect();
        let page_rules = spec
            .page_numbers()
            .into_iter()
            .map(|number| {
                let rule = match spec.page_spec(number) {
                    Some(page) => Rule::new(page.visible_when.clone(), &page.dependencies),
                    None => Rule::new(None, &[]),
                };
                (number, rule)
            })
            .collect();
        let tab_rules = spec
            .tabs
            .iter()
            .map(|tab| {
                (
                    tab.id.clone(),
                    Rule::new(tab.visible_when.clone(), &tab.dependencies),
                )
            })
            .collect();

        Self {
            layout: spec.layout(),
            mode,
            fields,
            field_rules,
            page_rules,
            tab_order: spec.tab_ids(),
            tab_rules,
            field_cache: BTreeMap::new(),
            page_cache: BTreeMap::new(),
            tab_cache: BTreeMap::new(),
            evaluations: 0,
        }
    }

    pub fn layout(&self) -> LayoutMode {
        self.layout
    }

    /// Adds a programmatic predicate to a field, ANDed with its declarative one.
    pub fn add_field_predicate(
        &mut self,
        name: &str,
        predicate: Predicate,
        dependencies: Option<BTreeSet<String>>,
    ) -> bool {
        match self.field_rules.get_mut(name) {
            Some(rule) => {
                rule.with_custom(predicate, dependencies);
                true
            }
            None => false,
        }
    }

    pub fn add_page_predicate(
        &mut self,
        page: u32,
        predicate: Predicate,
        dependencies: Option<BTreeSet<String>>,
    ) -> bool {
        match self.page_rules.get_mut(&page) {
            Some(rule) => {
                rule.with_custom(predicate, dependencies);
                true
            }
            None => false,
        }
    }

    /// Re-evaluates the predicates affected by `changed` (`None` = everything).
    pub fn refresh(&mut self, values: &ValueMap, changed: Option<&[String]>) {
        let mode = self.mode;
        for (name, rule) in &self.field_rules {
            if self.field_cache.contains_key(name) && !rule.affected_by(changed) {
                continue;
            }
            self.evaluations += 1;
            self.field_cache.insert(name.clone(), rule.evaluate(mode, values, name));
        }
        for (page, rule) in &self.page_rules {
            if self.page_cache.contains_key(page) && !rule.affected_by(changed) {
                continue;
            }
            self.evaluations += 1;
            self.page_cache.insert(*page, rule.evaluate(mode, values, &format!("page {page}")));
        }
        for (tab, rule) in &self.tab_rules {
            if self.tab_cache.contains_key(tab) && !rule.affected_by(changed) {
                continue;
            }
            self.evaluations += 1;
            self.tab_cache.insert(tab.clone(), rule.evaluate(mode, values, tab));
        }
    }

    /// Number of predicate evaluations so far.
    pub fn evaluations(&self) -> u64 {
        self.evaluations
    }

    fn own_condition(&self, name: &str) -> bool {
        self.field_cache.get(name).copied().unwrap_or(true)
    }

    fn slot(&self, name: &str) -> Option<&FieldSlot> {
        self.fields.iter().find(|slot| slot.name == name)
    }

    pub fn is_page_visible(&self, page: u32) -> bool {
        self.page_cache.get(&page).copied().unwrap_or(false)
            && self
                .fields
                .iter()
                .any(|slot| slot.page == page && self.own_condition(&slot.name))
    }

    pub fn is_tab_visible(&self, tab: &str) -> bool {
        self.tab_cache.get(tab).copied().unwrap_or(true)
            && self
                .fields
                .iter()
                .any(|slot| slot.tab == tab && self.own_condition(&slot.name))
    }

    /// Visible page numbers, ascending. Pages without a visible field are skipped.
    pub fn visible_pages(&self) -> Vec<u32> {
        self.page_cache
            .keys()
            .copied()
            .filter(|page| self.is_page_visible(*page))
            .collect()
    }

    /// Visible tab ids in declaration order.
    pub fn visible_tabs(&self) -> Vec<String> {
        self.tab_order
            .iter()
            .filter(|tab| self.is_tab_visible(tab))
            .cloned()
            .collect()
    }

    /// Whether the field is shown anywhere in the form (`active_tab = None`)
    /// or on the given active tab.
    pub fn is_field_visible(&self, name: &str, active_tab: Option<&str>) -> bool {
        let Some(slot) = self.slot(name) else {
            return false;
        };
        if !self.own_condition(name) {
            return false;
        }
        match self.layout {
            LayoutMode::Pages => self.page_cache.get(&slot.page).copied().unwrap_or(false),
            LayoutMode::Tabs => {
                self.tab_cache.get(&slot.tab).copied().unwrap_or(true)
                    && active_tab.is_none_or(|active| active == slot.tab)
            }
        }
    }

    /// Every field visible somewhere in the form, in declaration order.
    pub fn visible_fields(&self) -> Vec<String> {
        self.fields
            .iter()
            .filter(|slot| self.is_field_visible(&slot.name, None))
            .map(|slot| slot.name.clone())
            .collect()
    }

    pub fn visible_fields_on_page(&self, page: u32) -> Vec<String> {
        self.fields
            .iter()
            .filter(|slot| slot.page == page && self.is_field_visible(&slot.name, None))
            .map(|slot| slot.name.clone())
            .collect()
    }

    pub fn visible_fields_on_tab(&self, tab: &str) -> Vec<String> {
        self.fields
            .iter()
            .filter(|slot| slot.tab == tab && self.is_field_visible(&slot.name, Some(tab)))
            .map(|slot| slot.name.clone())
            .collect()
    }
}
