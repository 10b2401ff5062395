//! Interaction timeline of one engine instance.
//!
//! The tracker only observes: it is fed by the engine after state changes
//! and never writes back into the store or the navigation controller.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::navigation::{Screen, ScreenState};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AnalyticsEvent {
    FieldFocus {
        field: String,
        focus_count: u32,
    },
    FieldBlur {
        field: String,
        focus_ms: u64,
    },
    FieldChange {
        field: String,
        change_count: u32,
    },
    FieldError {
        field: String,
        errors: Vec<String>,
    },
    FieldComplete {
        field: String,
    },
    FormStart {
        total_fields: usize,
        total_pages: usize,
    },
    FormComplete {
        elapsed_ms: u64,
        submit_count: u32,
    },
    FormAbandon {
        elapsed_ms: u64,
        completion_percentage: f64,
        touched_fields: usize,
    },
    FormReset,
    PageChange {
        from: u32,
        to: u32,
    },
    PageComplete {
        page: u32,
        dwell_ms: u64,
        completion_percentage: f64,
    },
    PageAbandon {
        page: u32,
        dwell_ms: u64,
        completion_percentage: f64,
    },
    TabChange {
        from: String,
        to: String,
    },
    TabComplete {
        tab: String,
        dwell_ms: u64,
        completion_percentage: f64,
    },
    TabAbandon {
        tab: String,
        dwell_ms: u64,
        completion_percentage: f64,
    },
    Render {
        render_count: u32,
        fields: usize,
    },
    ValidationTiming {
        fields: usize,
        duration_us: u64,
    },
    SubmissionTiming {
        duration_ms: u64,
        success: bool,
    },
}

impl AnalyticsEvent {
    pub fn name(&self) -> &'static str {
        match self {
            AnalyticsEvent::FieldFocus { .. } => "field_focus",
            AnalyticsEvent::FieldBlur { .. } => "field_blur",
            AnalyticsEvent::FieldChange { .. } => "field_change",
            AnalyticsEvent::FieldError { .. } => "field_error",
            AnalyticsEvent::FieldComplete { .. } => "field_complete",
            AnalyticsEvent::FormStart { .. } => "form_start",
            AnalyticsEvent::FormComplete { .. } => "form_complete",
            AnalyticsEvent::FormAbandon { .. } => "form_abandon",
            AnalyticsEvent::FormReset => "form_reset",
            AnalyticsEvent::PageChange { .. } => "page_change",
            AnalyticsEvent::PageComplete { .. } => "page_complete",
            AnalyticsEvent::PageAbandon { .. } => "page_abandon",
            AnalyticsEvent::TabChange { .. } => "tab_change",
            AnalyticsEvent::TabComplete { .. } => "tab_complete",
            AnalyticsEvent::TabAbandon { .. } => "tab_abandon",
            AnalyticsEvent::Render { .. } => "render",
            AnalyticsEvent::ValidationTiming { .. } => "validation_timing",
            AnalyticsEvent::SubmissionTiming { .. } => "submission_timing",
        }
    }
}

/// One timeline entry as handed to sinks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsRecord {
    pub session_id: String,
    pub form_id: String,
    /// Wall clock, epoch milliseconds.
    pub timestamp_ms: i64,
    /// Milliseconds since the form started.
    pub elapsed_ms: u64,
    #[serde(flatten)]
    pub event: AnalyticsEvent,
}

pub trait AnalyticsSink {
    fn record(&mut self, record: &AnalyticsRecord);
}

impl<S: AnalyticsSink> AnalyticsSink for Rc<RefCell<S>> {
    fn record(&mut self, record: &AnalyticsRecord) {
        self.borrow_mut().record(record);
    }
}

/// Keeps every record in order.
#[derive(Debug, Clone, Default)]
pub struct TimelineRecorder {
    records: Vec<AnalyticsRecord>,
}

impl TimelineRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self::new()))
    }

    pub fn records(&self) -> &[AnalyticsRecord] {
        &self.records
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.records.iter().map(|record| record.event.name()).collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.records
            .iter()
            .filter(|record| record.event.name() == name)
            .count()
    }

    pub fn last(&self, name: &str) -> Option<&AnalyticsEvent> {
        self.records
            .iter()
            .rev()
            .map(|record| &record.event)
            .find(|event| event.name() == name)
    }
}

impl AnalyticsSink for TimelineRecorder {
    fn record(&mut self, record: &AnalyticsRecord) {
        self.records.push(record.clone());
    }
}

/// Forwards every record to `tracing` at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl AnalyticsSink for TracingSink {
    fn record(&mut self, record: &AnalyticsRecord) {
        let payload = serde_json::to_string(&record.event).unwrap_or_default();
        debug!(
            target: "form_engine::analytics",
            session = %record.session_id,
            form = %record.form_id,
            elapsed_ms = record.elapsed_ms,
            event = record.event.name(),
            %payload,
            "analytics event"
        );
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FieldStats {
    pub focus_count: u32,
    /// Cumulative focus-to-blur time.
    pub focus_ms: u64,
    pub change_count: u32,
    pub error_count: u32,
    /// Last known valid and touched.
    pub completed: bool,
    #[serde(skip)]
    focused_at: Option<Instant>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerformanceMetrics {
    pub render_count: u32,
    pub validation_runs: u32,
    pub validation_us_total: u64,
    pub last_validation_us: u64,
    pub submit_attempts: u32,
    pub last_submit_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScreenSummary {
    pub screen: Screen,
    #[serde(flatten)]
    pub state: ScreenState,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsSummary {
    pub session_id: String,
    pub form_id: String,
    pub elapsed_ms: u64,
    pub completed: bool,
    pub abandoned: bool,
    pub fields: BTreeMap<String, FieldStats>,
    pub screens: Vec<ScreenSummary>,
    pub performance: PerformanceMetrics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Open,
    Completed,
    Abandoned,
}

pub struct AnalyticsTracker {
    session_id: Uuid,
    form_id: String,
    started: Instant,
    fields: BTreeMap<String, FieldStats>,
    performance: PerformanceMetrics,
    outcome: Outcome,
    sinks: Vec<Box<dyn AnalyticsSink>>,
}

impl std::fmt::Debug for AnalyticsTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalyticsTracker")
            .field("session_id", &self.session_id)
            .field("form_id", &self.form_id)
            .field("outcome", &self.outcome)
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl AnalyticsTracker {
    pub fn new(form_id: impl Into<String>, sinks: Vec<Box<dyn AnalyticsSink>>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            form_id: form_id.into(),
            started: Instant::now(),
            fields: BTreeMap::new(),
            performance: PerformanceMetrics::default(),
            outcome: Outcome::Open,
            sinks,
        }
    }

    pub fn session_id(&self) -> String {
        self.session_id.to_string()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub fn is_completed(&self) -> bool {
        self.outcome == Outcome::Completed
    }

    pub fn field(&self, name: &str) -> Option<&FieldStats> {
        self.fields.get(name)
    }

    pub fn performance(&self) -> &PerformanceMetrics {
        &self.performance
    }

    fn emit(&mut self, event: AnalyticsEvent) {
        if self.sinks.is_empty() {
            return;
        }
        let record = AnalyticsRecord {
            session_id: self.session_id.to_string(),
            form_id: self.form_id.clone(),
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            elapsed_ms: self.elapsed_ms(),
            event,
        };
        for sink in &mut self.sinks {
            sink.record(&record);
        }
    }

    pub fn form_start(&mut self, total_fields: usize, total_pages: usize) {
        self.emit(AnalyticsEvent::FormStart {
            total_fields,
            total_pages,
        });
    }

    pub fn field_focus(&mut self, name: &str) {
        let stats = self.fields.entry(name.to_string()).or_default();
        stats.focus_count += 1;
        stats.focused_at = Some(Instant::now());
        let focus_count = stats.focus_count;
        self.emit(AnalyticsEvent::FieldFocus {
            field: name.to_string(),
            focus_count,
        });
    }

    pub fn field_blur(&mut self, name: &str) {
        let stats = self.fields.entry(name.to_string()).or_default();
        let focus_ms = stats
            .focused_at
            .take()
            .map_or(0, |since| since.elapsed().as_millis() as u64);
        stats.focus_ms += focus_ms;
        self.emit(AnalyticsEvent::FieldBlur {
            field: name.to_string(),
            focus_ms,
        });
    }

    pub fn field_change(&mut self, name: &str, change_count: u32) {
        self.fields.entry(name.to_string()).or_default().change_count = change_count;
        self.emit(AnalyticsEvent::FieldChange {
            field: name.to_string(),
            change_count,
        });
    }

    /// Records a new error list for a field. Empty lists are not events.
    pub fn field_errors(&mut self, name: &str, errors: &[String]) {
        if errors.is_empty() {
            return;
        }
        self.fields.entry(name.to_string()).or_default().error_count += 1;
        self.emit(AnalyticsEvent::FieldError {
            field: name.to_string(),
            errors: errors.to_vec(),
        });
    }

    /// Tracks the "valid and touched" flag; emits on the transition to complete.
    pub fn field_status(&mut self, name: &str, completed: bool) {
        let stats = self.fields.entry(name.to_string()).or_default();
        let was = std::mem::replace(&mut stats.completed, completed);
        if completed && !was {
            self.emit(AnalyticsEvent::FieldComplete {
                field: name.to_string(),
            });
        }
    }

    pub fn screen_change(&mut self, from: &Screen, to: &Screen) {
        let event = match (from, to) {
            (Screen::Page(from), Screen::Page(to)) => AnalyticsEvent::PageChange {
                from: *from,
                to: *to,
            },
            (Screen::Tab(from), Screen::Tab(to)) => AnalyticsEvent::TabChange {
                from: from.clone(),
                to: to.clone(),
            },
            _ => return,
        };
        self.emit(event);
    }

    /// Page/tab complete or abandon, depending on the state it was left in.
    pub fn screen_left(&mut self, screen: &Screen, state: &ScreenState) {
        let complete = state.total_fields > 0 && state.fields_completed == state.total_fields;
        self.emit(screen_event(screen, state, complete));
    }

    pub fn render(&mut self, fields: usize) {
        self.performance.render_count += 1;
        let render_count = self.performance.render_count;
        self.emit(AnalyticsEvent::Render {
            render_count,
            fields,
        });
    }

    pub fn validation_timing(&mut self, fields: usize, duration: Duration) {
        let duration_us = duration.as_micros() as u64;
        self.performance.validation_runs += 1;
        self.performance.validation_us_total += duration_us;
        self.performance.last_validation_us = duration_us;
        self.emit(AnalyticsEvent::ValidationTiming {
            fields,
            duration_us,
        });
    }

    pub fn submission_timing(&mut self, duration: Duration, success: bool) {
        let duration_ms = duration.as_millis() as u64;
        self.performance.submit_attempts += 1;
        self.performance.last_submit_ms = Some(duration_ms);
        self.emit(AnalyticsEvent::SubmissionTiming {
            duration_ms,
            success,
        });
    }

    pub fn form_complete(&mut self, submit_count: u32) {
        self.outcome = Outcome::Completed;
        let elapsed_ms = self.elapsed_ms();
        self.emit(AnalyticsEvent::FormComplete {
            elapsed_ms,
            submit_count,
        });
    }

    /// Closes the current session with a reset event and opens a fresh one.
    pub fn form_reset(&mut self) {
        self.emit(AnalyticsEvent::FormReset);
        self.session_id = Uuid::new_v4();
        self.started = Instant::now();
        self.fields.clear();
        self.outcome = Outcome::Open;
    }

    /// Emits the abandon event unless the form completed or already abandoned.
    pub fn abandon(
        &mut self,
        screen: Option<(&Screen, &ScreenState)>,
        completion_percentage: f64,
        touched_fields: usize,
    ) -> bool {
        if self.outcome != Outcome::Open {
            return false;
        }
        self.outcome = Outcome::Abandoned;
        if let Some((screen, state)) = screen {
            self.emit(screen_event(screen, state, false));
        }
        let elapsed_ms = self.elapsed_ms();
        self.emit(AnalyticsEvent::FormAbandon {
            elapsed_ms,
            completion_percentage,
            touched_fields,
        });
        true
    }

    pub fn summary<'a, I>(&self, screens: I) -> AnalyticsSummary
    where
        I: IntoIterator<Item = (&'a Screen, &'a ScreenState)>,
    {
        AnalyticsSummary {
            session_id: self.session_id(),
            form_id: self.form_id.clone(),
            elapsed_ms: self.elapsed_ms(),
            completed: self.outcome == Outcome::Completed,
            abandoned: self.outcome == Outcome::Abandoned,
            fields: self.fields.clone(),
            screens: screens
                .into_iter()
                .map(|(screen, state)| ScreenSummary {
                    screen: screen.clone(),
                    state: state.clone(),
                })
                .collect(),
            performance: self.performance.clone(),
        }
    }
}

fn screen_event(screen: &Screen, state: &ScreenState, complete: bool) -> AnalyticsEvent {
    let dwell_ms = state.dwell_ms;
    let completion_percentage = state.completion_percentage;
    match (screen, complete) {
        (Screen::Page(page), true) => AnalyticsEvent::PageComplete {
            page: *page,
            dwell_ms,
            completion_percentage,
        },
        (Screen::Page(page), false) => AnalyticsEvent::PageAbandon {
            page: *page,
            dwell_ms,
            completion_percentage,
        },
        (Screen::Tab(tab), true) => AnalyticsEvent::TabComplete {
            tab: tab.clone(),
            dwell_ms,
            completion_percentage,
        },
        (Screen::Tab(tab), false) => AnalyticsEvent::TabAbandon {
            tab: tab.clone(),
            dwell_ms,
            completion_percentage,
        },
    }
}
