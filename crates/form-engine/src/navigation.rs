use std::collections::BTreeMap;

use form_spec::LayoutMode;
use serde::Serialize;
use tokio::time::Instant;

/// A navigable screen: a page number or a tab id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Screen {
    Page(u32),
    Tab(String),
}

/// Result of a navigation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavOutcome {
    Moved { from: Screen, to: Screen },
    /// The visible fields listed still have errors; they are now touched.
    Blocked { fields: Vec<String> },
    /// Already there, out of range or no visible destination.
    Unchanged,
}

impl NavOutcome {
    pub fn moved(&self) -> bool {
        matches!(self, NavOutcome::Moved { .. })
    }
}

/// Completion counters of a screen at the moment it is left.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Completion {
    pub fields_completed: usize,
    pub total_fields: usize,
    pub has_errors: bool,
}

impl Completion {
    pub fn percentage(&self) -> f64 {
        if self.total_fields == 0 {
            0.0
        } else {
            self.fields_completed as f64 * 100.0 / self.total_fields as f64
        }
    }
}

/// Per page/tab bookkeeping, kept for the whole life of the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScreenState {
    pub visit_count: u32,
    #[serde(skip)]
    pub started_at: Option<Instant>,
    /// Accumulated dwell time over all visits.
    pub dwell_ms: u64,
    pub fields_completed: usize,
    pub total_fields: usize,
    pub has_errors: bool,
    pub completion_percentage: f64,
}

/// Owns the current page/tab pointer and per-screen state.
#[derive(Debug)]
pub struct NavigationController {
    layout: LayoutMode,
    current: Screen,
    screens: BTreeMap<Screen, ScreenState>,
}

impl NavigationController {
    pub fn new(layout: LayoutMode, first_page: u32, first_tab: &str) -> Self {
        let current = match layout {
            LayoutMode::Pages => Screen::Page(first_page),
            LayoutMode::Tabs => Screen::Tab(first_tab.to_string()),
        };
        Self {
            layout,
            current,
            screens: BTreeMap::new(),
        }
    }

    pub fn layout(&self) -> LayoutMode {
        self.layout
    }

    pub fn current(&self) -> &Screen {
        &self.current
    }

    pub fn active_tab(&self) -> Option<&str> {
        match &self.current {
            Screen::Tab(tab) => Some(tab),
            Screen::Page(_) => None,
        }
    }

    /// 1-based position of the current screen in `order` (0 when absent).
    pub fn position(&self, order: &[Screen]) -> usize {
        order
            .iter()
            .position(|screen| *screen == self.current)
            .map_or(0, |index| index + 1)
    }

    pub fn screens(&self) -> impl Iterator<Item = (&Screen, &ScreenState)> {
        self.screens.iter()
    }

    /// Starts a visit of the current screen.
    pub fn enter(&mut self) {
        let state = self.screens.entry(self.current.clone()).or_default();
        state.visit_count += 1;
        state.started_at = Some(Instant::now());
    }

    /// Ends the visit of the current screen and returns its updated state.
    pub fn leave(&mut self, completion: Completion) -> ScreenState {
        let state = self.screens.entry(self.current.clone()).or_default();
        if let Some(started) = state.started_at.take() {
            state.dwell_ms += started.elapsed().as_millis() as u64;
        }
        state.fields_completed = completion.fields_completed;
        state.total_fields = completion.total_fields;
        state.has_errors = completion.has_errors;
        state.completion_percentage = completion.percentage();
        state.clone()
    }

    /// Moves the pointer without touching screen state. Callers pair it with
    /// [`NavigationController::leave`] and [`NavigationController::enter`].
    pub fn move_to(&mut self, target: Screen) -> Screen {
        std::mem::replace(&mut self.current, target)
    }

    /// First screen of `order` when the current one has dropped out of it.
    pub fn snap_target(&self, order: &[Screen]) -> Option<Screen> {
        if order.contains(&self.current) {
            return None;
        }
        order.first().cloned()
    }

    /// Forgets every visit; the pointer returns to `first`.
    pub fn reset(&mut self, first: Screen) {
        self.screens.clear();
        self.current = first;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn dwell_time_accumulates_across_visits() {
        let mut nav = NavigationController::new(LayoutMode::Pages, 1, "default");
        nav.enter();
        tokio::time::advance(Duration::from_millis(250)).await;
        let first = nav.leave(Completion {
            fields_completed: 1,
            total_fields: 4,
            has_errors: true,
        });
        assert_eq!(first.dwell_ms, 250);
        assert_eq!(first.completion_percentage, 25.0);

        nav.enter();
        tokio::time::advance(Duration::from_millis(100)).await;
        let second = nav.leave(Completion::default());
        assert_eq!(second.visit_count, 2);
        assert_eq!(second.dwell_ms, 350);
    }

    #[test]
    fn snaps_to_first_visible_page() {
        let mut nav = NavigationController::new(LayoutMode::Pages, 1, "default");
        nav.move_to(Screen::Page(2));
        let all = [Screen::Page(1), Screen::Page(2), Screen::Page(3)];
        let without_two = [Screen::Page(1), Screen::Page(3)];
        assert_eq!(nav.position(&all), 2);
        assert_eq!(nav.snap_target(&without_two), Some(Screen::Page(1)));
        assert_eq!(nav.snap_target(&all), None);
        assert_eq!(nav.position(&without_two), 0);
        assert_eq!(nav.snap_target(&[]), None);
    }

    #[test]
    fn tabs_snap_to_first_visible_tab() {
        let mut nav = NavigationController::new(LayoutMode::Tabs, 1, "design");
        nav.move_to(Screen::Tab("advanced".into()));
        let visible = [Screen::Tab("design".into()), Screen::Tab("power".into())];
        assert_eq!(nav.position(&visible), 0);
        assert_eq!(
            nav.snap_target(&visible),
            Some(Screen::Tab("design".into()))
        );
    }
}
