//! Debounced and cancellable task bookkeeping.
//!
//! Every deferred operation (async validation, draft persistence, auto-submit,
//! blur checks) is keyed, and each key has a single authoritative "latest"
//! generation. Anything carrying an older generation is stale and must be
//! dropped by its caller.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy)]
struct Pending {
    generation: u64,
    deadline: Instant,
}

/// Keyed debounce timers: rescheduling a key replaces its deadline.
#[derive(Debug)]
pub struct Debouncer<K: Ord + Clone> {
    pending: BTreeMap<K, Pending>,
    next_generation: u64,
}

impl<K: Ord + Clone> Default for Debouncer<K> {
    fn default() -> Self {
        Self {
            pending: BTreeMap::new(),
            next_generation: 0,
        }
    }
}

impl<K: Ord + Clone> Debouncer<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// (Re)starts the quiet period for `key` and returns the new generation.
    pub fn schedule(&mut self, key: K, delay: Duration) -> u64 {
        self.schedule_at(key, Instant::now() + delay)
    }

    pub fn schedule_at(&mut self, key: K, deadline: Instant) -> u64 {
        self.next_generation += 1;
        let generation = self.next_generation;
        self.pending.insert(
            key,
            Pending {
                generation,
                deadline,
            },
        );
        generation
    }

    pub fn cancel(&mut self, key: &K) -> bool {
        self.pending.remove(key).is_some()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.pending.keys()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|pending| pending.deadline).min()
    }

    /// Removes and returns every key whose deadline has passed, earliest first.
    pub fn take_due(&mut self, now: Instant) -> Vec<(K, u64)> {
        let mut due: Vec<(K, Pending)> = self
            .pending
            .iter()
            .filter(|(_, pending)| pending.deadline <= now)
            .map(|(key, pending)| (key.clone(), *pending))
            .collect();
        for (key, _) in &due {
            self.pending.remove(key);
        }
        due.sort_by_key(|(_, pending)| (pending.deadline, pending.generation));
        due.into_iter()
            .map(|(key, pending)| (key, pending.generation))
            .collect()
    }

    /// Marks every pending key as due immediately.
    pub fn expedite<F>(&mut self, mut filter: F)
    where
        F: FnMut(&K) -> bool,
    {
        let now = Instant::now();
        for (key, pending) in self.pending.iter_mut() {
            if filter(key) && pending.deadline > now {
                pending.deadline = now;
            }
        }
    }
}

/// In-flight work keyed by owner; starting new work cancels the previous one.
#[derive(Debug)]
pub struct LatestTask<K: Ord + Clone> {
    running: BTreeMap<K, (u64, CancellationToken)>,
    next_generation: u64,
}

impl<K: Ord + Clone> Default for LatestTask<K> {
    fn default() -> Self {
        Self {
            running: BTreeMap::new(),
            next_generation: 0,
        }
    }
}

impl<K: Ord + Clone> LatestTask<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels whatever runs under `key` and registers a fresh task.
    pub fn begin(&mut self, key: K) -> (u64, CancellationToken) {
        self.next_generation += 1;
        let token = CancellationToken::new();
        if let Some((_, previous)) = self
            .running
            .insert(key, (self.next_generation, token.clone()))
        {
            previous.cancel();
        }
        (self.next_generation, token)
    }

    pub fn is_latest(&self, key: &K, generation: u64) -> bool {
        self.running
            .get(key)
            .is_some_and(|(current, _)| *current == generation)
    }

    /// Retires the task if it is still the latest one for `key`.
    pub fn finish(&mut self, key: &K, generation: u64) -> bool {
        if self.is_latest(key, generation) {
            self.running.remove(key);
            true
        } else {
            false
        }
    }

    pub fn cancel(&mut self, key: &K) -> bool {
        match self.running.remove(key) {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, (_, token)) in std::mem::take(&mut self.running) {
            token.cancel();
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.running.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.running.is_empty()
    }

    pub fn len(&self) -> usize {
        self.running.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn rescheduling_replaces_the_deadline() {
        let mut timers = Debouncer::new();
        let first = timers.schedule("persist", Duration::from_millis(100));
        tokio::time::advance(Duration::from_millis(60)).await;
        let second = timers.schedule("persist", Duration::from_millis(100));
        assert!(second > first);
        assert_eq!(timers.len(), 1);

        tokio::time::advance(Duration::from_millis(60)).await;
        assert!(timers.take_due(Instant::now()).is_empty());

        tokio::time::advance(Duration::from_millis(50)).await;
        assert_eq!(timers.take_due(Instant::now()), vec![("persist", second)]);
        assert!(timers.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn due_keys_come_out_earliest_first() {
        let mut timers = Debouncer::new();
        timers.schedule("b", Duration::from_millis(30));
        timers.schedule("a", Duration::from_millis(50));
        timers.schedule("c", Duration::from_millis(10));
        tokio::time::advance(Duration::from_millis(100)).await;
        let order: Vec<_> = timers
            .take_due(Instant::now())
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        assert_eq!(order, vec!["c", "b", "a"]);
    }

    #[test]
    fn newer_task_cancels_older_and_wins() {
        let mut tasks = LatestTask::new();
        let (old_generation, old_token) = tasks.begin("email".to_string());
        let (new_generation, new_token) = tasks.begin("email".to_string());

        assert!(old_token.is_cancelled());
        assert!(!new_token.is_cancelled());

        // the older result arrives late and must be ignored
        assert!(!tasks.finish(&"email".to_string(), old_generation));
        assert!(tasks.finish(&"email".to_string(), new_generation));
        assert!(tasks.is_empty());
    }

    #[test]
    fn cancel_all_cancels_every_token() {
        let mut tasks = LatestTask::new();
        let (_, a) = tasks.begin("a");
        let (_, b) = tasks.begin("b");
        tasks.cancel_all();
        assert!(a.is_cancelled() && b.is_cancelled());
        assert_eq!(tasks.len(), 0);
    }
}
