use std::collections::{HashSet, VecDeque};

/// FIFO queue of page uris with set-union enqueue: a uri that is already
/// queued is never queued twice.
#[derive(Debug, Default, Clone)]
pub struct Frontier {
    queue: VecDeque<String>,
    queued: HashSet<String>,
}

impl Frontier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` when the uri was already queued.
    pub fn push(&mut self, uri: impl Into<String>) -> bool {
        let uri = uri.into();
        if self.queued.contains(&uri) {
            return false;
        }
        self.queued.insert(uri.clone());
        self.queue.push_back(uri);
        true
    }

    pub fn pop(&mut self) -> Option<String> {
        let uri = self.queue.pop_front()?;
        self.queued.remove(&uri);
        Some(uri)
    }

    pub fn contains(&self, uri: &str) -> bool {
        self.queued.contains(uri)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.queue.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for Frontier {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut frontier = Self::new();
        for uri in iter {
            frontier.push(uri);
        }
        frontier
    }
}
