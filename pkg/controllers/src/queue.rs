use std::collections::{HashSet, VecDeque};

/// Deduplicating queue of reconcile keys.
///
/// A key is queued at most once, and a key that is being processed is not
/// handed out again until [`WorkQueue::done`] is called for it. Adding a key
/// while it is active marks it dirty so it is queued again on completion.
#[derive(Debug, Default)]
pub struct WorkQueue {
    ready: VecDeque<String>,
    queued: HashSet<String>,
    active: HashSet<String>,
    dirty: HashSet<String>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, key: impl Into<String>) {
        let key = key.into();
        if self.active.contains(&key) {
            self.dirty.insert(key);
        } else if self.queued.insert(key.clone()) {
            self.ready.push_back(key);
        }
    }

    /// Take the next key and mark it active.
    pub fn next(&mut self) -> Option<String> {
        let key = self.ready.pop_front()?;
        self.queued.remove(&key);
        self.active.insert(key.clone());
        Some(key)
    }

    pub fn done(&mut self, key: &str) {
        self.active.remove(key);
        if self.dirty.remove(key) {
            self.add(key);
        }
    }

    /// Keys waiting to be handed out.
    pub fn len(&self) -> usize {
        self.ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ready.is_empty()
    }

    pub fn active(&self) -> usize {
        self.active.len()
    }
}
