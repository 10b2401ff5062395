//! Three-tier validation: synchronous field rules, cross-field rules and
//! debounced asynchronous rules, merged into one error list per field.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::rc::Rc;
use std::time::Duration;

use form_spec::{CrossFieldValidation, Expr, FieldSpec, FormSpec, ValueMap, check_field};
use futures::FutureExt;
use futures::future::LocalBoxFuture;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::config::CrossFieldScope;
use crate::error::BoxError;

/// Error shown when an async validator fails or panics.
pub const ASYNC_FAILURE_MESSAGE: &str = "validation failed";

/// Extra synchronous rule for one field. Missing values are passed as `null`.
pub type FieldValidator = Box<dyn Fn(&Value, &ValueMap) -> Option<String>>;

/// Programmatic cross-field rule returning the failure message, if any.
pub type CrossFieldCheck = Box<dyn Fn(&ValueMap) -> Option<String>>;

/// Server-side style check that may suspend.
///
/// `Ok(Some(message))` reports an error, `Ok(None)` a pass. The token is
/// cancelled as soon as a newer value of the field supersedes this run.
pub trait AsyncValidator {
    fn validate(
        &self,
        value: Value,
        values: ValueMap,
        cancel: CancellationToken,
    ) -> LocalBoxFuture<'static, Result<Option<String>, BoxError>>;
}

impl<F, Fut> AsyncValidator for F
where
    F: Fn(Value, ValueMap, CancellationToken) -> Fut,
    Fut: Future<Output = Result<Option<String>, BoxError>> + 'static,
{
    fn validate(
        &self,
        value: Value,
        values: ValueMap,
        cancel: CancellationToken,
    ) -> LocalBoxFuture<'static, Result<Option<String>, BoxError>> {
        self(value, values, cancel).boxed_local()
    }
}

#[derive(Clone)]
pub struct AsyncRule {
    pub validator: Rc<dyn AsyncValidator>,
    pub debounce: Duration,
}

enum CrossCheck {
    Declared { condition: Expr, message: String },
    Custom(CrossFieldCheck),
}

struct CrossRule {
    key: String,
    fields: Vec<String>,
    reads: BTreeSet<String>,
    check: CrossCheck,
}

impl CrossRule {
    fn from_spec(rule: &CrossFieldValidation) -> Self {
        let mut reads = rule.condition.referenced_fields();
        reads.extend(rule.fields.iter().cloned());
        Self {
            key: rule.key(),
            fields: rule.fields.clone(),
            reads,
            check: CrossCheck::Declared {
                condition: rule.condition.clone(),
                message: rule.message.clone(),
            },
        }
    }

    fn failure(&self, values: &ValueMap) -> Option<String> {
        match &self.check {
            CrossCheck::Declared { condition, message } => condition
                .evaluate(values)
                .unwrap_or(false)
                .then(|| message.clone()),
            CrossCheck::Custom(check) => check(values),
        }
    }
}

pub struct ValidationPipeline {
    fields: BTreeMap<String, FieldSpec>,
    validators: BTreeMap<String, Vec<FieldValidator>>,
    cross_rules: Vec<CrossRule>,
    async_rules: BTreeMap<String, AsyncRule>,
    scope: CrossFieldScope,
    sync_errors: BTreeMap<String, Vec<String>>,
    /// Per field: (rule key, message) of every failing cross-field rule.
    cross_errors: BTreeMap<String, Vec<(String, String)>>,
    async_errors: BTreeMap<String, String>,
}

impl std::fmt::Debug for ValidationPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationPipeline")
            .field("scope", &self.scope)
            .field("cross_rules", &self.cross_rules.len())
            .field("async_rules", &self.async_rules.keys().collect::<Vec<_>>())
            .field("sync_errors", &self.sync_errors)
            .field("cross_errors", &self.cross_errors)
            .field("async_errors", &self.async_errors)
            .finish()
    }
}

impl ValidationPipeline {
    pub fn new(spec: &FormSpec, scope: CrossFieldScope) -> Self {
        Self {
            fields: spec
                .fields
                .iter()
                .map(|field| (field.name.clone(), field.clone()))
                .collect(),
            validators: BTreeMap::new(),
            cross_rules: spec.validations.iter().map(CrossRule::from_spec).collect(),
            async_rules: BTreeMap::new(),
            scope,
            sync_errors: BTreeMap::new(),
            cross_errors: BTreeMap::new(),
            async_errors: BTreeMap::new(),
        }
    }

    pub fn add_field_validator(&mut self, name: &str, validator: FieldValidator) {
        self.validators
            .entry(name.to_string())
            .or_default()
            .push(validator);
    }

    pub fn add_cross_rule(&mut self, key: String, fields: Vec<String>, check: CrossFieldCheck) {
        self.cross_rules.push(CrossRule {
            key,
            reads: fields.iter().cloned().collect(),
            fields,
            check: CrossCheck::Custom(check),
        });
    }

    pub fn add_async_rule(&mut self, name: &str, rule: AsyncRule) {
        self.async_rules.insert(name.to_string(), rule);
    }

    pub fn async_rule(&self, name: &str) -> Option<&AsyncRule> {
        self.async_rules.get(name)
    }

    pub fn has_async_rule(&self, name: &str) -> bool {
        self.async_rules.contains_key(name)
    }

    /// Tier 1 for one field: declarative rules first, then registered validators.
    pub fn run_field(&mut self, name: &str, values: &ValueMap) {
        let Some(field) = self.fields.get(name) else {
            return;
        };
        let value = values.get(name);
        let mut errors = check_field(field, value);
        if errors.is_empty()
            && let Some(validators) = self.validators.get(name)
        {
            let value = value.unwrap_or(&Value::Null);
            errors.extend(
                validators
                    .iter()
                    .filter_map(|validator| validator(value, values))
                    .take(1),
            );
        }
        if errors.is_empty() {
            self.sync_errors.remove(name);
        } else {
            self.sync_errors.insert(name.to_string(), errors);
        }
    }

    pub fn run_all_fields(&mut self, values: &ValueMap) {
        let names: Vec<String> = self.fields.keys().cloned().collect();
        for name in names {
            self.run_field(&name, values);
        }
    }

    /// Tier 2. Re-runs the rules in scope of `changed` (`None` = all of them)
    /// and returns every field whose cross-field errors may have moved.
    ///
    /// A rule only applies while at least one of its fields is visible.
    pub fn run_cross<V>(
        &mut self,
        changed: Option<&[String]>,
        values: &ValueMap,
        is_visible: V,
    ) -> BTreeSet<String>
    where
        V: Fn(&str) -> bool,
    {
        let mut touched = BTreeSet::new();
        for rule in &self.cross_rules {
            let in_scope = match (changed, self.scope) {
                (None, _) | (Some(_), CrossFieldScope::AnyChange) => true,
                (Some(changed), CrossFieldScope::DeclaredFields) => {
                    changed.iter().any(|name| rule.reads.contains(name))
                }
            };
            if !in_scope {
                continue;
            }

            let applies = rule.fields.iter().any(|field| is_visible(field));
            let failure = if applies { rule.failure(values) } else { None };

            for field in &rule.fields {
                let entries = self.cross_errors.entry(field.clone()).or_default();
                let before = entries.len();
                entries.retain(|(key, _)| key != &rule.key);
                if let Some(message) = &failure {
                    entries.push((rule.key.clone(), message.clone()));
                }
                if entries.len() != before || failure.is_some() {
                    touched.insert(field.clone());
                }
            }
        }
        self.cross_errors.retain(|_, entries| !entries.is_empty());
        touched
    }

    /// Async rules only run once the cheaper tiers pass.
    pub fn sync_passes(&self, name: &str) -> bool {
        !self.sync_errors.contains_key(name)
    }

    pub fn set_async_error(&mut self, name: &str, error: Option<String>) {
        match error {
            Some(message) => {
                self.async_errors.insert(name.to_string(), message);
            }
            None => {
                self.async_errors.remove(name);
            }
        }
    }

    pub fn clear_async_error(&mut self, name: &str) -> bool {
        self.async_errors.remove(name).is_some()
    }

    /// Sync errors, then cross-field messages, then the async error; no duplicates.
    pub fn merged(&self, name: &str) -> Vec<String> {
        let mut merged: Vec<String> = self.sync_errors.get(name).cloned().unwrap_or_default();
        let cross = self.cross_errors.get(name).into_iter().flatten();
        for message in cross.map(|(_, message)| message).chain(self.async_errors.get(name)) {
            if !merged.contains(message) {
                merged.push(message.clone());
            }
        }
        merged
    }

    pub fn clear(&mut self) {
        self.sync_errors.clear();
        self.cross_errors.clear();
        self.async_errors.clear();
    }
}
