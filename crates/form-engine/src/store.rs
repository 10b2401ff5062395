use std::collections::{BTreeMap, BTreeSet};

use form_spec::ValueMap;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

/// Derived per-field state. Created on first write, dropped only by a reset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FieldMeta {
    /// Merged messages of every validation tier; empty means valid.
    pub errors: Vec<String>,
    pub touched: bool,
    pub is_validating: bool,
}

/// Form-wide submission status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FormStatus {
    pub is_submitting: bool,
    pub submit_count: u32,
    pub submitted: bool,
}

/// Notifications delivered to subscribers, in subscription order.
#[derive(Debug, Clone, PartialEq)]
pub enum FormEvent {
    ValuesChanged {
        fields: Vec<String>,
    },
    MetaChanged {
        fields: Vec<String>,
    },
    StatusChanged(FormStatus),
    Navigated {
        page: usize,
        total_pages: usize,
        tab: Option<String>,
    },
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

pub type Listener = Box<dyn FnMut(&FormEvent, &ValueStore)>;

/// Single source of truth for values, field meta and submit status.
///
/// `write_*` methods mutate without notifying so that a batch of writes can be
/// followed by exactly one [`ValueStore::notify`]; `set`/`set_meta` do both.
pub struct ValueStore {
    known: BTreeSet<String>,
    values: ValueMap,
    meta: BTreeMap<String, FieldMeta>,
    change_counts: BTreeMap<String, u32>,
    status: FormStatus,
    listeners: Vec<(SubscriptionId, Listener)>,
    next_subscription: u64,
}

impl std::fmt::Debug for ValueStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueStore")
            .field("values", &self.values)
            .field("meta", &self.meta)
            .field("status", &self.status)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl ValueStore {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            known: names.into_iter().map(Into::into).collect(),
            values: ValueMap::new(),
            meta: BTreeMap::new(),
            change_counts: BTreeMap::new(),
            status: FormStatus::default(),
            listeners: Vec::new(),
            next_subscription: 0,
        }
    }

    pub fn is_known(&self, name: &str) -> bool {
        self.known.contains(name)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn values(&self) -> &ValueMap {
        &self.values
    }

    pub fn meta(&self, name: &str) -> Option<&FieldMeta> {
        self.meta.get(name)
    }

    pub fn meta_or_default(&self, name: &str) -> FieldMeta {
        self.meta.get(name).cloned().unwrap_or_default()
    }

    pub fn change_count(&self, name: &str) -> u32 {
        self.change_counts.get(name).copied().unwrap_or(0)
    }

    pub fn status(&self) -> FormStatus {
        self.status
    }

    /// Writes a value and notifies subscribers before returning.
    pub fn set(&mut self, name: &str, value: Value) -> bool {
        if !self.write_value(name, value) {
            return false;
        }
        self.notify(&FormEvent::ValuesChanged {
            fields: vec![name.to_string()],
        });
        true
    }

    /// Mutates the meta of one field and notifies subscribers before returning.
    pub fn set_meta<F>(&mut self, name: &str, mutator: F) -> bool
    where
        F: FnOnce(&mut FieldMeta),
    {
        if !self.write_meta(name, mutator) {
            return false;
        }
        self.notify(&FormEvent::MetaChanged {
            fields: vec![name.to_string()],
        });
        true
    }

    /// Writes a value without notifying. Unknown names are ignored with a warning.
    pub fn write_value(&mut self, name: &str, value: Value) -> bool {
        if !self.is_known(name) {
            warn!(field = name, "ignoring value for unknown field");
            return false;
        }
        if let Err(err) = self.values.set(name, value) {
            warn!(field = name, error = %err, "ignoring value for unaddressable field");
            return false;
        }
        *self.change_counts.entry(name.to_string()).or_default() += 1;
        true
    }

    /// Seeds a value without counting it as a change (defaults, restores).
    pub(crate) fn seed_value(&mut self, name: &str, value: Value) -> bool {
        if !self.is_known(name) {
            return false;
        }
        self.values.set(name, value).is_ok()
    }

    /// Mutates meta without notifying. Returns whether anything changed.
    pub fn write_meta<F>(&mut self, name: &str, mutator: F) -> bool
    where
        F: FnOnce(&mut FieldMeta),
    {
        if !self.is_known(name) {
            warn!(field = name, "ignoring meta update for unknown field");
            return false;
        }
        let meta = self.meta.entry(name.to_string()).or_default();
        let before = meta.clone();
        mutator(meta);
        *meta != before
    }

    pub fn write_status<F>(&mut self, mutator: F) -> FormStatus
    where
        F: FnOnce(&mut FormStatus),
    {
        mutator(&mut self.status);
        self.status
    }

    /// Restores the initial values and drops all meta and counters.
    pub fn reset(&mut self, initial: ValueMap) {
        self.values = initial;
        self.meta.clear();
        self.change_counts.clear();
        self.status = FormStatus::default();
    }

    pub fn subscribe<F>(&mut self, listener: F) -> SubscriptionId
    where
        F: FnMut(&FormEvent, &ValueStore) + 'static,
    {
        self.next_subscription += 1;
        let id = SubscriptionId(self.next_subscription);
        self.listeners.push((id, Box::new(listener)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(existing, _)| *existing != id);
        self.listeners.len() != before
    }

    /// Delivers `event` to every listener synchronously, in subscription order.
    pub fn notify(&mut self, event: &FormEvent) {
        let mut listeners = std::mem::take(&mut self.listeners);
        for (_, listener) in listeners.iter_mut() {
            listener(event, self);
        }
        self.listeners = listeners;
    }
}
