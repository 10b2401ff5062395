use std::collections::BTreeSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::time::Duration;

use form_spec::{
    FieldSpec, FillProgress, FormSpec, LayoutMode, RenderField, RenderPayload, ScreenStatus,
    ValueMap, is_filled,
};
use futures::future::LocalBoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::analytics::{AnalyticsSink, AnalyticsSummary, AnalyticsTracker};
use crate::config::EngineConfig;
use crate::error::{BoxError, EngineError, SubmitError};
use crate::navigation::{Completion, NavOutcome, NavigationController, Screen};
use crate::persistence::{Exclusions, KeyValueStore, PersistenceManager};
use crate::pipeline::{
    ASYNC_FAILURE_MESSAGE, AsyncRule, AsyncValidator, CrossFieldCheck, FieldValidator,
    ValidationPipeline,
};
use crate::resolver::{Predicate, VisibilityResolver};
use crate::store::{FieldMeta, FormEvent, FormStatus, SubscriptionId, ValueStore};
use crate::tasks::{Debouncer, LatestTask};
use crate::widgets::{FieldProps, WidgetAction, WidgetRegistry};

/// Caller-supplied submission. Errors are returned from [`FormEngine::submit`] unchanged.
pub trait SubmitHandler {
    fn submit(&mut self, values: ValueMap) -> LocalBoxFuture<'static, Result<(), BoxError>>;
}

impl<F, Fut> SubmitHandler for F
where
    F: FnMut(ValueMap) -> Fut,
    Fut: Future<Output = Result<(), BoxError>> + 'static,
{
    fn submit(&mut self, values: ValueMap) -> LocalBoxFuture<'static, Result<(), BoxError>> {
        self(values).boxed_local()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Submitted,
    /// Visible fields with errors; they are now touched.
    Blocked { fields: Vec<String> },
    AlreadySubmitting,
    /// The engine was torn down.
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum TimerKey {
    AsyncValidation(String),
    Persist,
    AutoSubmit,
    BlurCheck(String),
}

#[derive(Debug)]
enum AsyncResult {
    Passed,
    Failed(String),
    Errored(String),
    Cancelled,
}

#[derive(Debug)]
struct AsyncOutcome {
    field: String,
    generation: u64,
    result: AsyncResult,
    elapsed: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    User,
    Restore,
}

pub struct EngineBuilder {
    spec: FormSpec,
    config: EngineConfig,
    validators: Vec<(String, FieldValidator)>,
    cross_rules: Vec<(String, Vec<String>, CrossFieldCheck)>,
    async_rules: Vec<(String, Option<Duration>, Box<dyn AsyncValidator>)>,
    field_predicates: Vec<(String, Predicate, Option<BTreeSet<String>>)>,
    page_predicates: Vec<(u32, Predicate, Option<BTreeSet<String>>)>,
    storage: Option<Box<dyn KeyValueStore>>,
    sinks: Vec<Box<dyn AnalyticsSink>>,
    submit_handler: Option<Box<dyn SubmitHandler>>,
    widgets: WidgetRegistry,
}

impl EngineBuilder {
    pub fn new(spec: FormSpec) -> Self {
        Self {
            spec,
            config: EngineConfig::default(),
            validators: Vec::new(),
            cross_rules: Vec::new(),
            async_rules: Vec::new(),
            field_predicates: Vec::new(),
            page_predicates: Vec::new(),
            storage: None,
            sinks: Vec::new(),
            submit_handler: None,
            widgets: WidgetRegistry::default(),
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Reads an `EngineConfig` JSON file; an empty file means defaults.
    pub fn config_file(self, path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let config = EngineConfig::from_path(path)?;
        Ok(self.config(config))
    }

    /// Extra synchronous rule, run after the declarative ones pass.
    pub fn field_validator<F>(mut self, name: impl Into<String>, validator: F) -> Self
    where
        F: Fn(&Value, &ValueMap) -> Option<String> + 'static,
    {
        self.validators.push((name.into(), Box::new(validator)));
        self
    }

    /// Programmatic cross-field rule; the returned message lands on every listed field.
    pub fn cross_field<I, S, F>(mut self, id: impl Into<String>, fields: I, check: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&ValueMap) -> Option<String> + 'static,
    {
        let fields = fields.into_iter().map(Into::into).collect();
        self.cross_rules.push((id.into(), fields, Box::new(check)));
        self
    }

    /// Async rule debounced by `async_debounce_ms` from the config.
    pub fn async_validator<V>(mut self, name: impl Into<String>, validator: V) -> Self
    where
        V: AsyncValidator + 'static,
    {
        self.async_rules
            .push((name.into(), None, Box::new(validator)));
        self
    }

    pub fn async_validator_with_debounce<V>(
        mut self,
        name: impl Into<String>,
        debounce: Duration,
        validator: V,
    ) -> Self
    where
        V: AsyncValidator + 'static,
    {
        self.async_rules
            .push((name.into(), Some(debounce), Box::new(validator)));
        self
    }

    /// Programmatic field predicate, ANDed with `visible_when`. Re-evaluated on every change.
    pub fn visible_when<F>(mut self, name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&ValueMap) -> bool + 'static,
    {
        self.field_predicates
            .push((name.into(), Box::new(predicate), None));
        self
    }

    /// Like [`EngineBuilder::visible_when`], re-evaluated only when `reads` change.
    pub fn visible_when_reading<I, S, F>(
        mut self,
        name: impl Into<String>,
        reads: I,
        predicate: F,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&ValueMap) -> bool + 'static,
    {
        let reads = reads.into_iter().map(Into::into).collect();
        self.field_predicates
            .push((name.into(), Box::new(predicate), Some(reads)));
        self
    }

    pub fn page_visible_when<F>(mut self, page: u32, predicate: F) -> Self
    where
        F: Fn(&ValueMap) -> bool + 'static,
    {
        self.page_predicates.push((page, Box::new(predicate), None));
        self
    }

    pub fn storage<S>(mut self, storage: S) -> Self
    where
        S: KeyValueStore + 'static,
    {
        self.storage = Some(Box::new(storage));
        self
    }

    pub fn analytics_sink<S>(mut self, sink: S) -> Self
    where
        S: AnalyticsSink + 'static,
    {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn submit_handler<H>(mut self, handler: H) -> Self
    where
        H: SubmitHandler + 'static,
    {
        self.submit_handler = Some(Box::new(handler));
        self
    }

    pub fn widgets(mut self, widgets: WidgetRegistry) -> Self {
        self.widgets = widgets;
        self
    }

    /// Checks the spec, seeds defaults, runs the first visibility and
    /// validation pass and restores a draft when configured.
    pub fn build(self) -> Result<FormEngine, EngineError> {
        let EngineBuilder {
            spec,
            config,
            validators,
            cross_rules,
            async_rules,
            field_predicates,
            page_predicates,
            storage,
            sinks,
            submit_handler,
            widgets,
        } = self;

        spec.check()?;
        let known = |kind: &'static str, field: &str| {
            if spec.field(field).is_some() {
                Ok(())
            } else {
                Err(EngineError::UnknownField {
                    kind,
                    field: field.to_string(),
                })
            }
        };

        let mut resolver = VisibilityResolver::new(&spec, config.visibility_mode);
        for (name, predicate, reads) in field_predicates {
            known("visibility predicate", &name)?;
            resolver.add_field_predicate(&name, predicate, reads);
        }
        for (page, predicate, reads) in page_predicates {
            if !resolver.add_page_predicate(page, predicate, reads) {
                return Err(EngineError::UnknownPage(page));
            }
        }

        let mut pipeline = ValidationPipeline::new(&spec, config.cross_field_scope);
        for (name, validator) in validators {
            known("field validator", &name)?;
            pipeline.add_field_validator(&name, validator);
        }
        for (id, fields, check) in cross_rules {
            for field in &fields {
                known("cross-field rule", field)?;
            }
            pipeline.add_cross_rule(id, fields, check);
        }
        for (name, debounce, validator) in async_rules {
            known("async validator", &name)?;
            let rule = AsyncRule {
                validator: validator.into(),
                debounce: debounce.unwrap_or_else(|| config.async_debounce()),
            };
            pipeline.add_async_rule(&name, rule);
        }

        let mut store = ValueStore::new(spec.fields.iter().map(|field| field.name.clone()));
        for field in &spec.fields {
            if let Some(default) = &field.default_value {
                store.seed_value(&field.name, default.clone());
            }
        }
        let initial = store.values().clone();

        let persistence = match (storage, &config.storage_key) {
            (Some(storage), key) => {
                let key = key.clone().unwrap_or_else(|| format!("{}-draft", spec.id));
                Some(PersistenceManager::new(
                    key,
                    storage,
                    Exclusions::new(&config.exclude),
                ))
            }
            (None, Some(key)) => {
                warn!(%key, "storage key configured without a storage backend; drafts are off");
                None
            }
            (None, None) => None,
        };

        let analytics = AnalyticsTracker::new(spec.id.clone(), sinks);
        let nav = NavigationController::new(
            spec.layout(),
            spec.page_numbers().first().copied().unwrap_or(1),
            spec.tab_ids().first().map(String::as_str).unwrap_or_default(),
        );

        let mut engine = FormEngine {
            spec,
            config,
            store,
            initial,
            resolver,
            pipeline,
            nav,
            analytics,
            persistence,
            widgets,
            submit_handler,
            timers: Debouncer::new(),
            async_tasks: LatestTask::new(),
            in_flight: FuturesUnordered::new(),
            auto_submit_due: false,
            torn_down: false,
        };
        engine.mount();
        Ok(engine)
    }
}

/// Headless form orchestration: value store, visibility, validation,
/// navigation, analytics and drafts for one form instance.
///
/// The engine is single-threaded. Value changes, visibility, synchronous
/// validation and navigation complete before the triggering call returns;
/// async validations and timers advance on [`FormEngine::poll`] and
/// [`FormEngine::settle`].
pub struct FormEngine {
    spec: FormSpec,
    config: EngineConfig,
    store: ValueStore,
    initial: ValueMap,
    resolver: VisibilityResolver,
    pipeline: ValidationPipeline,
    nav: NavigationController,
    analytics: AnalyticsTracker,
    persistence: Option<PersistenceManager>,
    widgets: WidgetRegistry,
    submit_handler: Option<Box<dyn SubmitHandler>>,
    timers: Debouncer<TimerKey>,
    async_tasks: LatestTask<String>,
    in_flight: FuturesUnordered<LocalBoxFuture<'static, AsyncOutcome>>,
    auto_submit_due: bool,
    torn_down: bool,
}

impl std::fmt::Debug for FormEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormEngine")
            .field("form", &self.spec.id)
            .field("store", &self.store)
            .field("navigation", &self.nav)
            .field("timers", &self.timers)
            .field("in_flight", &self.in_flight.len())
            .field("torn_down", &self.torn_down)
            .finish()
    }
}

impl FormEngine {
    pub fn builder(spec: FormSpec) -> EngineBuilder {
        EngineBuilder::new(spec)
    }

    pub fn new(spec: FormSpec) -> Result<Self, EngineError> {
        EngineBuilder::new(spec).build()
    }

    fn mount(&mut self) {
        self.resolver.refresh(self.store.values(), None);
        self.revalidate_all();
        self.snap_to_first_screen();

        let total_fields = self.spec.fields.len();
        let total_pages = self.total_pages();
        self.analytics.form_start(total_fields, total_pages);

        if self.config.restore_on_mount {
            self.restore();
        }
        self.nav.enter();
        debug!(form = %self.spec.id, session = %self.analytics.session_id(), "form mounted");
    }

    fn restore(&mut self) {
        let Some(snapshot) = self.persistence.as_ref().and_then(PersistenceManager::load) else {
            return;
        };
        let mut changes = Vec::new();
        for field in &self.spec.fields {
            let excluded = self
                .persistence
                .as_ref()
                .is_some_and(|persistence| persistence.is_excluded(&field.name));
            if excluded {
                continue;
            }
            if let Some(value) = snapshot.values.get(&field.name) {
                changes.push((field.name.clone(), value.clone()));
            }
        }
        let restored = self.apply_values(changes, Origin::Restore);
        info!(form = %self.spec.id, fields = restored.len(), "draft restored");

        let visible = self.screen_order();
        if (1..=visible.len()).contains(&snapshot.current_page) {
            let target = visible[snapshot.current_page - 1].clone();
            self.nav.move_to(target);
        }
    }

    pub fn spec(&self) -> &FormSpec {
        &self.spec
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn session_id(&self) -> String {
        self.analytics.session_id()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.store.get(name)
    }

    pub fn values(&self) -> &ValueMap {
        self.store.values()
    }

    pub fn meta(&self, name: &str) -> FieldMeta {
        self.store.meta_or_default(name)
    }

    pub fn status(&self) -> FormStatus {
        self.store.status()
    }

    pub fn change_count(&self, name: &str) -> u32 {
        self.store.change_count(name)
    }

    /// Sets one value. Unknown fields are ignored with a warning.
    pub fn set_value(&mut self, name: &str, value: impl Into<Value>) -> bool {
        !self
            .apply_values(vec![(name.to_string(), value.into())], Origin::User)
            .is_empty()
    }

    /// Sets several values with one pipeline run and one notification.
    pub fn set_values<I, S>(&mut self, values: I) -> Vec<String>
    where
        I: IntoIterator<Item = (S, Value)>,
        S: Into<String>,
    {
        let changes = values
            .into_iter()
            .map(|(name, value)| (name.into(), value))
            .collect();
        self.apply_values(changes, Origin::User)
    }

    pub fn focus(&mut self, name: &str) -> bool {
        if self.torn_down || !self.store.is_known(name) {
            return false;
        }
        self.analytics.field_focus(name);
        true
    }

    /// Marks the field touched and records the end of its focus.
    pub fn blur(&mut self, name: &str) -> bool {
        if !self.mark_touched(name) {
            return false;
        }
        self.analytics.field_blur(name);
        self.timers.schedule(
            TimerKey::BlurCheck(name.to_string()),
            self.config.blur_debounce(),
        );
        true
    }

    pub fn mark_touched(&mut self, name: &str) -> bool {
        if self.torn_down || !self.store.is_known(name) {
            return false;
        }
        if self.store.write_meta(name, |meta| meta.touched = true) {
            self.store.notify(&FormEvent::MetaChanged {
                fields: vec![name.to_string()],
            });
        }
        true
    }

    pub fn dispatch(&mut self, action: WidgetAction) -> bool {
        match action {
            WidgetAction::SetValue { field, value } => self.set_value(&field, value),
            WidgetAction::MarkTouched { field } => self.mark_touched(&field),
            WidgetAction::Focus { field } => self.focus(&field),
            WidgetAction::Blur { field } => self.blur(&field),
        }
    }

    pub fn subscribe<F>(&mut self, listener: F) -> SubscriptionId
    where
        F: FnMut(&FormEvent, &ValueStore) + 'static,
    {
        self.store.subscribe(listener)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.store.unsubscribe(id)
    }

    fn apply_values(&mut self, changes: Vec<(String, Value)>, origin: Origin) -> Vec<String> {
        if self.torn_down {
            warn!(form = %self.spec.id, "ignoring value change after teardown");
            return Vec::new();
        }
        let mut changed: Vec<String> = Vec::new();
        for (name, value) in changes {
            if self.store.write_value(&name, value) && !changed.contains(&name) {
                changed.push(name);
            }
        }
        if changed.is_empty() {
            return changed;
        }

        for name in &changed {
            let count = self.store.change_count(name);
            self.analytics.field_change(name, count);
        }

        self.resolver
            .refresh(self.store.values(), Some(changed.as_slice()));

        let started = std::time::Instant::now();
        for name in &changed {
            self.pipeline.run_field(name, self.store.values());
        }
        let resolver = &self.resolver;
        let cross_touched =
            self.pipeline
                .run_cross(Some(changed.as_slice()), self.store.values(), |field| {
                    resolver.is_field_visible(field, None)
                });
        self.analytics
            .validation_timing(changed.len(), started.elapsed());

        let mut meta_changed = Vec::new();
        for name in &changed {
            if self.restart_async(name) {
                meta_changed.push(name.clone());
            }
        }
        let mut affected: BTreeSet<String> = changed.iter().cloned().collect();
        affected.extend(cross_touched);
        for name in &affected {
            if self.sync_errors(name) && !meta_changed.contains(name) {
                meta_changed.push(name.clone());
            }
        }

        let navigated = self.reconcile_navigation();

        if origin == Origin::User {
            if self.persistence.is_some() {
                self.timers
                    .schedule(TimerKey::Persist, self.config.persist_debounce());
            }
            if let Some(delay) = self.config.auto_submit_delay()
                && self.visible_errors().is_empty()
            {
                self.timers.schedule(TimerKey::AutoSubmit, delay);
            }
        }

        self.store.notify(&FormEvent::ValuesChanged {
            fields: changed.clone(),
        });
        if !meta_changed.is_empty() {
            self.store.notify(&FormEvent::MetaChanged {
                fields: meta_changed,
            });
        }
        if navigated {
            self.notify_navigated();
        }
        changed
    }

    /// Drops the async state of a changed field and debounces a new run.
    /// Returns whether the field's meta changed.
    fn restart_async(&mut self, name: &str) -> bool {
        if !self.pipeline.has_async_rule(name) {
            return false;
        }
        let key = TimerKey::AsyncValidation(name.to_string());
        self.async_tasks.cancel(&name.to_string());
        self.timers.cancel(&key);
        self.pipeline.clear_async_error(name);
        let meta_changed = self.store.write_meta(name, |meta| meta.is_validating = false);

        let eligible = self.pipeline.sync_passes(name)
            && is_filled(self.store.get(name))
            && self.resolver.is_field_visible(name, None);
        if let Some(rule) = self.pipeline.async_rule(name)
            && eligible
        {
            let debounce = rule.debounce;
            self.timers.schedule(key, debounce);
        }
        meta_changed
    }

    /// Copies the merged errors of `name` into its meta. Returns whether they changed.
    fn sync_errors(&mut self, name: &str) -> bool {
        let Some(errors) = self.write_errors(name) else {
            return false;
        };
        self.analytics.field_errors(name, &errors);
        self.track_completion(name);
        true
    }

    fn write_errors(&mut self, name: &str) -> Option<Vec<String>> {
        let merged = self.pipeline.merged(name);
        let unchanged = self
            .store
            .meta(name)
            .map_or(merged.is_empty(), |meta| meta.errors == merged);
        if unchanged {
            return None;
        }
        self.store
            .write_meta(name, |meta| meta.errors = merged.clone());
        Some(merged)
    }

    fn track_completion(&mut self, name: &str) {
        let meta = self.store.meta_or_default(name);
        self.analytics
            .field_status(name, meta.touched && meta.errors.is_empty());
    }

    fn revalidate_all(&mut self) {
        self.pipeline.run_all_fields(self.store.values());
        let resolver = &self.resolver;
        self.pipeline
            .run_cross(None, self.store.values(), |field| {
                resolver.is_field_visible(field, None)
            });
        let names: Vec<String> = self
            .spec
            .fields
            .iter()
            .map(|field| field.name.clone())
            .collect();
        for name in &names {
            self.write_errors(name);
        }
    }

    fn is_pages(&self) -> bool {
        self.nav.layout() == LayoutMode::Pages
    }

    /// Visible screens in navigation order.
    fn screen_order(&self) -> Vec<Screen> {
        if self.is_pages() {
            self.resolver
                .visible_pages()
                .into_iter()
                .map(Screen::Page)
                .collect()
        } else {
            self.resolver
                .visible_tabs()
                .into_iter()
                .map(Screen::Tab)
                .collect()
        }
    }

    fn screen_fields(&self, screen: &Screen) -> Vec<String> {
        match screen {
            Screen::Page(page) => self.resolver.visible_fields_on_page(*page),
            Screen::Tab(tab) => self.resolver.visible_fields_on_tab(tab),
        }
    }

    /// 1-based position of the current page (or tab) among the visible ones.
    pub fn current_page(&self) -> usize {
        self.nav.position(&self.screen_order())
    }

    /// Number of visible pages (or tabs).
    pub fn total_pages(&self) -> usize {
        self.screen_order().len()
    }

    pub fn current_screen(&self) -> &Screen {
        self.nav.current()
    }

    pub fn active_tab(&self) -> Option<&str> {
        self.nav.active_tab()
    }

    pub fn visible_pages(&self) -> Vec<u32> {
        self.resolver.visible_pages()
    }

    pub fn visible_tabs(&self) -> Vec<String> {
        self.resolver.visible_tabs()
    }

    pub fn is_visible(&self, name: &str) -> bool {
        self.resolver.is_field_visible(name, self.nav.active_tab())
    }

    /// Fields shown right now: all visible pages, or the active tab only.
    pub fn visible_fields(&self) -> Vec<String> {
        let active = self.nav.active_tab();
        self.spec
            .fields
            .iter()
            .filter(|field| self.resolver.is_field_visible(&field.name, active))
            .map(|field| field.name.clone())
            .collect()
    }

    /// Visible fields of the current page or tab.
    pub fn current_fields(&self) -> Vec<String> {
        self.screen_fields(self.nav.current())
    }

    fn field_has_errors(&self, name: &str) -> bool {
        !self.pipeline.merged(name).is_empty()
    }

    /// Visible fields (on any page or tab) that currently carry errors.
    fn visible_errors(&self) -> Vec<String> {
        self.resolver
            .visible_fields()
            .into_iter()
            .filter(|name| self.field_has_errors(name))
            .collect()
    }

    fn completion_of(&self, fields: &[String]) -> Completion {
        let mut completion = Completion {
            total_fields: fields.len(),
            ..Completion::default()
        };
        for name in fields {
            if self.field_has_errors(name) {
                completion.has_errors = true;
            } else if is_filled(self.store.get(name)) {
                completion.fields_completed += 1;
            }
        }
        completion
    }

    pub fn next_page(&mut self) -> NavOutcome {
        let order = self.screen_order();
        let position = self.current_page();
        if position == 0 || position >= order.len() {
            return NavOutcome::Unchanged;
        }
        self.navigate(order, position + 1)
    }

    pub fn previous_page(&mut self) -> NavOutcome {
        let order = self.screen_order();
        let position = self.current_page();
        if position <= 1 {
            return NavOutcome::Unchanged;
        }
        self.navigate(order, position - 1)
    }

    /// Jumps to the 1-based visible page (or tab) `target`. Moving forward
    /// validates the current page and every page before the target.
    pub fn jump_to_page(&mut self, target: usize) -> NavOutcome {
        let order = self.screen_order();
        if target == 0 || target > order.len() {
            return NavOutcome::Unchanged;
        }
        self.navigate(order, target)
    }

    pub fn select_tab(&mut self, tab: &str) -> Result<NavOutcome, EngineError> {
        if self.is_pages() || self.spec.tab_spec(tab).is_none() {
            return Err(EngineError::UnknownTab(tab.to_string()));
        }
        let order = self.screen_order();
        let target = Screen::Tab(tab.to_string());
        match order.iter().position(|screen| *screen == target) {
            Some(index) => Ok(self.navigate(order, index + 1)),
            None => Ok(NavOutcome::Unchanged),
        }
    }

    fn navigate(&mut self, order: Vec<Screen>, target: usize) -> NavOutcome {
        if self.torn_down {
            return NavOutcome::Unchanged;
        }
        let position = self.current_page();
        if target == position || target == 0 || target > order.len() {
            return NavOutcome::Unchanged;
        }

        // a snapped-away current screen (position 0) has nothing to gate
        if target > position && position > 0 {
            let gated: Vec<String> = order[position - 1..target - 1]
                .iter()
                .flat_map(|screen| self.screen_fields(screen))
                .collect();
            let blocked: Vec<String> = gated
                .into_iter()
                .filter(|name| self.field_has_errors(name))
                .collect();
            if !blocked.is_empty() {
                self.block(&blocked);
                return NavOutcome::Blocked { fields: blocked };
            }
        }

        let to = order[target - 1].clone();
        let from = self.move_to(to.clone());
        if self.persistence.is_some() {
            self.timers
                .schedule(TimerKey::Persist, self.config.persist_debounce());
        }
        self.notify_navigated();
        NavOutcome::Moved { from, to }
    }

    fn block(&mut self, fields: &[String]) {
        let mut touched = Vec::new();
        for name in fields {
            if self.store.write_meta(name, |meta| meta.touched = true) {
                touched.push(name.clone());
            }
            self.track_completion(name);
        }
        debug!(form = %self.spec.id, ?fields, "navigation blocked by field errors");
        if !touched.is_empty() {
            self.store
                .notify(&FormEvent::MetaChanged { fields: touched });
        }
    }

    /// Leaves the current screen, enters `to` and records the transition.
    fn move_to(&mut self, to: Screen) -> Screen {
        let current = self.nav.current().clone();
        let completion = self.completion_of(&self.screen_fields(&current));
        let left = self.nav.leave(completion);
        self.analytics.screen_left(&current, &left);
        let from = self.nav.move_to(to);
        self.nav.enter();
        self.analytics.screen_change(&from, self.nav.current());
        from
    }

    /// Snaps to the first visible screen when the current one disappeared.
    fn reconcile_navigation(&mut self) -> bool {
        let Some(target) = self.nav.snap_target(&self.screen_order()) else {
            return false;
        };
        let from = self.move_to(target);
        debug!(
            form = %self.spec.id,
            ?from,
            to = ?self.nav.current(),
            "current screen hidden, snapped back"
        );
        true
    }

    fn snap_to_first_screen(&mut self) {
        if let Some(first) = self.screen_order().into_iter().next() {
            self.nav.move_to(first);
        }
    }

    fn notify_navigated(&mut self) {
        let event = FormEvent::Navigated {
            page: self.current_page(),
            total_pages: self.total_pages(),
            tab: self.nav.active_tab().map(str::to_string),
        };
        self.store.notify(&event);
    }

    /// True while an async validation is debouncing or in flight.
    pub fn has_pending_validation(&self) -> bool {
        !self.async_tasks.is_empty()
            || self
                .timers
                .keys()
                .any(|key| matches!(key, TimerKey::AsyncValidation(_)))
    }

    pub fn can_submit(&self) -> bool {
        !self.torn_down
            && !self.store.status().is_submitting
            && !self.has_pending_validation()
            && self.visible_errors().is_empty()
    }

    /// Validates pending async rules, then hands the values to the submit handler.
    pub async fn submit(&mut self) -> Result<SubmitOutcome, SubmitError> {
        if self.torn_down {
            return Ok(SubmitOutcome::Closed);
        }
        if self.store.status().is_submitting {
            return Ok(SubmitOutcome::AlreadySubmitting);
        }
        self.auto_submit_due = false;
        self.finish_validations().await;

        let blocked = self.visible_errors();
        if !blocked.is_empty() {
            self.block(&blocked);
            return Ok(SubmitOutcome::Blocked { fields: blocked });
        }

        let status = self.store.write_status(|status| {
            status.is_submitting = true;
            status.submit_count += 1;
        });
        self.store.notify(&FormEvent::StatusChanged(status));

        let started = Instant::now();
        let values = self.store.values().clone();
        let result = match self.submit_handler.as_mut() {
            Some(handler) => handler.submit(values).await,
            None => Ok(()),
        };
        let success = result.is_ok();
        self.analytics.submission_timing(started.elapsed(), success);

        let status = self.store.write_status(|status| {
            status.is_submitting = false;
            status.submitted |= success;
        });

        match result {
            Ok(()) => {
                self.timers.cancel(&TimerKey::Persist);
                self.timers.cancel(&TimerKey::AutoSubmit);
                // finish_validations may have fired the auto-submit timer
                self.auto_submit_due = false;
                if let Some(persistence) = self.persistence.as_mut() {
                    persistence.clear();
                }
                self.analytics.form_complete(status.submit_count);
                info!(form = %self.spec.id, attempt = status.submit_count, "form submitted");
                self.store.notify(&FormEvent::StatusChanged(status));
                Ok(SubmitOutcome::Submitted)
            }
            Err(err) => {
                warn!(form = %self.spec.id, error = %err, "submit handler failed");
                self.store.notify(&FormEvent::StatusChanged(status));
                Err(SubmitError::Handler(err))
            }
        }
    }

    async fn finish_validations(&mut self) {
        self.timers
            .expedite(|key| matches!(key, TimerKey::AsyncValidation(_)));
        while !self.torn_down && self.has_pending_validation() {
            self.poll();
            if !self.has_pending_validation() {
                break;
            }
            match self.in_flight.next().await {
                Some(outcome) => self.apply_async_outcome(outcome),
                None => break,
            }
        }
    }

    /// Restores defaults and clears meta, timers, the draft and navigation.
    pub fn reset(&mut self) {
        if self.torn_down {
            return;
        }
        self.cancel_background_work();
        self.store.reset(self.initial.clone());
        self.pipeline.clear();
        self.resolver.refresh(self.store.values(), None);
        self.revalidate_all();

        let first = self
            .screen_order()
            .into_iter()
            .next()
            .unwrap_or_else(|| self.nav.current().clone());
        self.nav.reset(first);
        self.nav.enter();

        if let Some(persistence) = self.persistence.as_mut() {
            persistence.clear();
        }
        self.analytics.form_reset();
        self.store.notify(&FormEvent::Reset);
    }

    fn cancel_background_work(&mut self) {
        self.timers.clear();
        self.async_tasks.cancel_all();
        self.in_flight = FuturesUnordered::new();
        self.auto_submit_due = false;
    }

    /// Renderer delegate pass over the current page or tab.
    pub fn render(&mut self) -> RenderPayload {
        let names = self.current_fields();
        let mut fields = Vec::with_capacity(names.len());
        for name in &names {
            let Some(field) = self.spec.field(name) else {
                continue;
            };
            fields.push(self.render_field(field));
        }

        let visible = self.resolver.visible_fields();
        let filled = visible
            .iter()
            .filter(|name| is_filled(self.store.get(name)) && !self.field_has_errors(name))
            .count();
        let status = if self.store.status().submitted {
            ScreenStatus::Submitted
        } else if self.can_submit() {
            ScreenStatus::Ready
        } else {
            ScreenStatus::Editing
        };

        self.analytics.render(fields.len());
        RenderPayload {
            form_id: self.spec.id.clone(),
            form_title: self.spec.title.clone(),
            form_version: self.spec.version.clone(),
            status,
            page: self.current_page(),
            total_pages: self.total_pages(),
            active_tab: self.nav.active_tab().map(str::to_string),
            progress: FillProgress {
                filled,
                visible: visible.len(),
            },
            help: self.spec.description.clone(),
            fields,
        }
    }

    fn render_field(&self, field: &FieldSpec) -> RenderField {
        let meta = self.store.meta_or_default(&field.name);
        let current_value = self.store.get(&field.name);
        let props = FieldProps {
            field,
            current_value,
            errors: &meta.errors,
            touched: meta.touched,
            is_validating: meta.is_validating,
        };
        let widget = self.widgets.render(&props);
        RenderField {
            name: field.name.clone(),
            kind: field.kind.clone(),
            label: field.label.clone(),
            placeholder: field.placeholder.clone(),
            description: field.description.clone(),
            required: field.required,
            disabled: field.disabled,
            touched: meta.touched,
            is_validating: meta.is_validating,
            current_value: current_value.cloned(),
            errors: if meta.touched {
                meta.errors.clone()
            } else {
                Vec::new()
            },
            group: field.group.clone().or_else(|| field.section.clone()),
            widget,
        }
    }

    /// Fires due timers and applies finished async validations without waiting.
    /// Returns how many items were processed.
    pub fn poll(&mut self) -> usize {
        let mut processed = 0;
        while !self.torn_down {
            let due = self.timers.take_due(Instant::now());
            let mut progressed = !due.is_empty();
            for (key, _) in due {
                self.fire(key);
                processed += 1;
            }
            while let Some(Some(outcome)) = self.in_flight.next().now_or_never() {
                self.apply_async_outcome(outcome);
                progressed = true;
                processed += 1;
            }
            if !progressed {
                break;
            }
        }
        processed
    }

    /// Drives timers, async validations and auto-submit until nothing is pending.
    pub async fn settle(&mut self) {
        loop {
            self.poll();
            if self.torn_down {
                return;
            }
            if std::mem::take(&mut self.auto_submit_due) {
                self.run_auto_submit().await;
                continue;
            }
            let deadline = self.timers.next_deadline();
            if self.in_flight.is_empty() {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => return,
                }
                continue;
            }
            let sleep = async move {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            };
            let outcome = tokio::select! {
                outcome = self.in_flight.next() => outcome,
                _ = sleep => None,
            };
            if let Some(outcome) = outcome {
                self.apply_async_outcome(outcome);
            }
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    async fn run_auto_submit(&mut self) {
        if self.store.status().submitted {
            debug!(form = %self.spec.id, "auto-submit skipped, form already submitted");
            return;
        }
        if self.has_pending_validation() {
            if let Some(delay) = self.config.auto_submit_delay() {
                self.timers.schedule(TimerKey::AutoSubmit, delay);
            }
            return;
        }
        if !self.can_submit() {
            debug!(form = %self.spec.id, "auto-submit skipped, form not submittable");
            return;
        }
        if let Err(err) = self.submit().await {
            warn!(form = %self.spec.id, error = %err, "auto-submit failed");
        }
    }

    fn fire(&mut self, key: TimerKey) {
        match key {
            TimerKey::AsyncValidation(name) => self.start_async(name),
            TimerKey::Persist => self.persist_now(),
            TimerKey::AutoSubmit => self.auto_submit_due = true,
            TimerKey::BlurCheck(name) => self.track_completion(&name),
        }
    }

    fn start_async(&mut self, name: String) {
        let Some(rule) = self.pipeline.async_rule(&name).cloned() else {
            return;
        };
        if !self.pipeline.sync_passes(&name) || !self.resolver.is_field_visible(&name, None) {
            return;
        }
        let (generation, token) = self.async_tasks.begin(name.clone());
        let value = self.store.get(&name).cloned().unwrap_or(Value::Null);
        let validation = rule
            .validator
            .validate(value, self.store.values().clone(), token.clone());
        let field = name.clone();
        self.in_flight.push(
            async move {
                let started = std::time::Instant::now();
                let result = tokio::select! {
                    biased;
                    _ = token.cancelled() => AsyncResult::Cancelled,
                    outcome = AssertUnwindSafe(validation).catch_unwind() => match outcome {
                        Ok(Ok(None)) => AsyncResult::Passed,
                        Ok(Ok(Some(message))) => AsyncResult::Failed(message),
                        Ok(Err(err)) => AsyncResult::Errored(err.to_string()),
                        Err(_) => AsyncResult::Errored("async validator panicked".to_string()),
                    },
                };
                AsyncOutcome {
                    field,
                    generation,
                    result,
                    elapsed: started.elapsed(),
                }
            }
            .boxed_local(),
        );

        if self.store.write_meta(&name, |meta| meta.is_validating = true) {
            self.store
                .notify(&FormEvent::MetaChanged { fields: vec![name] });
        }
    }

    fn apply_async_outcome(&mut self, outcome: AsyncOutcome) {
        let AsyncOutcome {
            field,
            generation,
            result,
            elapsed,
        } = outcome;
        if !self.async_tasks.finish(&field, generation) {
            debug!(%field, generation, "discarding stale async validation result");
            return;
        }
        let error = match result {
            AsyncResult::Passed => None,
            AsyncResult::Failed(message) => Some(message),
            AsyncResult::Errored(reason) => {
                warn!(%field, %reason, "async validator failed");
                Some(ASYNC_FAILURE_MESSAGE.to_string())
            }
            AsyncResult::Cancelled => return,
        };
        self.pipeline.set_async_error(&field, error);
        self.analytics.validation_timing(1, elapsed);

        let validating = self.store.write_meta(&field, |meta| meta.is_validating = false);
        let errors = self.sync_errors(&field);
        if validating || errors {
            self.store
                .notify(&FormEvent::MetaChanged { fields: vec![field] });
        }
    }

    fn persist_now(&mut self) {
        let current_page = self.current_page();
        let Some(persistence) = self.persistence.as_mut() else {
            return;
        };
        let names = self.spec.fields.iter().map(|field| &field.name);
        let snapshot = persistence.snapshot(names, self.store.values(), current_page);
        persistence.save(&snapshot);
    }

    pub fn analytics_summary(&self) -> AnalyticsSummary {
        self.analytics.summary(self.nav.screens())
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Cancels every timer and in-flight validation and, unless the form was
    /// submitted, records the abandonment. Runs at most once; also run on drop.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.cancel_background_work();

        if !self.analytics.is_completed() {
            let current = self.nav.current().clone();
            let completion = self.completion_of(&self.screen_fields(&current));
            let left = self.nav.leave(completion);
            let overall = self.completion_of(&self.resolver.visible_fields());
            let touched = self
                .spec
                .fields
                .iter()
                .filter(|field| self.store.meta(&field.name).is_some_and(|meta| meta.touched))
                .count();
            self.analytics
                .abandon(Some((&current, &left)), overall.percentage(), touched);
        }
        self.torn_down = true;
        debug!(form = %self.spec.id, "form torn down");
    }
}

impl Drop for FormEngine {
    fn drop(&mut self) {
        self.teardown();
    }
}
