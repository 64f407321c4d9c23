use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::address::address;
use crate::checkpoint::CheckpointStore;
use crate::formats::{HarvestState, Page};
use crate::frontier::Frontier;
use crate::ldes::Converter;
use crate::sink::{MemberSink, SinkOutcome};
use crate::transport::Transport;

pub const DEFAULT_CHECKPOINT_INTERVAL: usize = 10;
pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Completed pages between two periodic checkpoints.
    pub checkpoint_interval: usize,
    /// Retryable fetch failures tolerated per page before it is abandoned.
    pub max_retries: u32,
    /// Pause before re-fetching a page that failed with a retryable error.
    pub retry_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Result of processing one frontier entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Page fully processed and recorded as visited.
    Completed { uri: String },
    /// Page was already visited; nothing fetched.
    AlreadyVisited { uri: String },
    /// Retryable fetch failure; page re-queued at the back.
    Retrying { uri: String, attempt: u32 },
    /// Page given up for this run; a later run may retry it.
    Abandoned { uri: String },
    /// Page processed but at least one member could not be stored; not
    /// recorded as visited.
    Incomplete { uri: String },
    /// Frontier exhausted.
    Idle,
}

/// Run-local bookkeeping around the durable state.
#[derive(Debug, Default)]
pub struct Traversal {
    pub state: HarvestState,
    pub frontier: Frontier,
    retries: HashMap<String, u32>,
    abandoned: HashSet<String>,
    pub members_skipped: u64,
}

impl Traversal {
    /// Seeds the frontier with the persisted pending pages, then the entry
    /// point.
    pub fn resume(state: HarvestState, entry_point: &str) -> Self {
        let mut frontier: Frontier = state.pending_pages.iter().cloned().collect();
        frontier.push(entry_point);
        Self {
            state,
            frontier,
            ..Self::default()
        }
    }

    pub fn pages_abandoned(&self) -> usize {
        self.abandoned.len()
    }

    /// Pending pages to persist: the frontier followed by pages this run gave
    /// up on, so the next run retries them.
    fn snapshot(&mut self) -> &HarvestState {
        let mut pending: Vec<String> = self.frontier.iter().map(str::to_owned).collect();
        let mut abandoned: Vec<&String> = self
            .abandoned
            .iter()
            .filter(|uri| !self.frontier.contains(uri) && !self.state.is_visited(uri))
            .collect();
        abandoned.sort();
        pending.extend(abandoned.into_iter().cloned());
        self.state.pending_pages = pending;
        &self.state
    }

    fn enqueue_relation(&mut self, uri: &str) -> bool {
        if self.state.is_visited(uri) || self.abandoned.contains(uri) {
            return false;
        }
        self.frontier.push(uri)
    }
}

#[derive(Debug)]
pub struct RunOutcome {
    pub state: HarvestState,
    pub members_skipped: u64,
    pub pages_abandoned: usize,
    pub checkpoint_failures: u64,
    pub interrupted: bool,
}

/// Sequential page-graph walker: fetch, convert, sink, enqueue, checkpoint.
pub struct HarvestEngine<T, C> {
    transport: T,
    converter: C,
    sink: MemberSink,
    store: CheckpointStore,
    config: EngineConfig,
}

impl<T: Transport, C: Converter> HarvestEngine<T, C> {
    pub fn new(
        transport: T,
        converter: C,
        sink: MemberSink,
        store: CheckpointStore,
        config: EngineConfig,
    ) -> Self {
        Self {
            transport,
            converter,
            sink,
            store,
            config,
        }
    }

    /// Drops seen keys whose artifact is missing from storage.
    ///
    /// Storage is the source of truth; the seen set only accelerates dedup.
    pub fn verify_seen_members(&self, state: &mut HarvestState) -> usize {
        let before = state.seen_members.len();
        state.seen_members.retain(|key| self.sink.exists(key));
        before - state.seen_members.len()
    }

    /// Walks the page graph until the frontier is empty or `shutdown` is set.
    ///
    /// Harvesting errors never fail the run; they end up in the counters.
    pub fn run(
        &self,
        state: HarvestState,
        entry_point: &str,
        shutdown: &AtomicBool,
    ) -> RunOutcome {
        let mut traversal = Traversal::resume(state, entry_point);
        let mut checkpoint_failures = 0_u64;
        let mut completed_since_save = 0_usize;
        let mut interrupted = false;

        tracing::info!(
            entry_point,
            pending = traversal.frontier.len(),
            visited = traversal.state.visited_pages.len(),
            seen = traversal.state.seen_members.len(),
            "starting harvest"
        );

        loop {
            if shutdown.load(Ordering::SeqCst) {
                tracing::warn!(
                    pending = traversal.frontier.len(),
                    "shutdown requested; stopping after the current page"
                );
                interrupted = true;
                break;
            }

            match self.step(&mut traversal) {
                StepOutcome::Idle => break,
                StepOutcome::Completed { .. } => {
                    completed_since_save += 1;
                    if completed_since_save >= self.config.checkpoint_interval.max(1) {
                        completed_since_save = 0;
                        if !self.save(&mut traversal) {
                            checkpoint_failures += 1;
                        }
                    }
                }
                _ => {}
            }
        }

        if !self.save(&mut traversal) {
            checkpoint_failures += 1;
        }

        RunOutcome {
            pages_abandoned: traversal.pages_abandoned(),
            members_skipped: traversal.members_skipped,
            state: traversal.state,
            checkpoint_failures,
            interrupted,
        }
    }

    /// Processes the next frontier entry.
    ///
    /// A page is added to `visited_pages` only after every member has been
    /// handled and every relation enqueued, so an interrupted step leaves the
    /// page to be fetched again.
    pub fn step(&self, traversal: &mut Traversal) -> StepOutcome {
        let Some(uri) = traversal.frontier.pop() else {
            return StepOutcome::Idle;
        };
        if traversal.state.is_visited(&uri) {
            tracing::debug!(url = %uri, "page already visited");
            return StepOutcome::AlreadyVisited { uri };
        }

        let attempt = traversal.retries.get(&uri).copied().unwrap_or(0);
        if attempt > 0 && !self.config.retry_delay.is_zero() {
            std::thread::sleep(self.config.retry_delay);
        }

        tracing::info!(url = %uri, "fetching page");
        let fetched = match self.transport.fetch(&uri) {
            Ok(fetched) => fetched,
            Err(err) => {
                traversal.state.stats.errors += 1;
                let attempt = attempt + 1;
                if err.retryable && attempt <= self.config.max_retries {
                    tracing::warn!(
                        url = %uri,
                        attempt,
                        max = self.config.max_retries,
                        %err,
                        "retryable fetch failure"
                    );
                    traversal.retries.insert(uri.clone(), attempt);
                    traversal.frontier.push(uri.clone());
                    return StepOutcome::Retrying { uri, attempt };
                }
                tracing::error!(url = %uri, retryable = err.retryable, %err, "abandoning page");
                return self.abandon(traversal, uri);
            }
        };

        let page = match self.converter.convert(&uri, &fetched.body) {
            Ok(page) => page,
            Err(err) => {
                traversal.state.stats.errors += 1;
                tracing::error!(
                    url = %uri,
                    content_type = fetched.content_type.as_deref().unwrap_or("unknown"),
                    %err,
                    "failed to convert page; abandoning it"
                );
                return self.abandon(traversal, uri);
            }
        };

        traversal.retries.remove(&uri);
        let complete = self.process_page(traversal, page);
        if complete {
            traversal.state.visited_pages.insert(uri.clone());
            traversal.state.stats.pages_processed += 1;
            StepOutcome::Completed { uri }
        } else {
            tracing::warn!(url = %uri, "page left unvisited after storage failure");
            traversal.abandoned.insert(uri.clone());
            StepOutcome::Incomplete { uri }
        }
    }

    /// Returns `false` when a member could not be written to storage.
    fn process_page(&self, traversal: &mut Traversal, page: Page) -> bool {
        let mut complete = true;
        tracing::info!(
            url = %page.uri,
            members = page.members.len(),
            relations = page.relations.len(),
            "processing page"
        );

        for member in page.members {
            let member = match member {
                Ok(member) => member,
                Err(err) => {
                    traversal.state.stats.errors += 1;
                    tracing::error!(url = %page.uri, %err, "skipping member");
                    continue;
                }
            };

            let key = address(&member.logical_id);
            if traversal.state.is_seen(key.as_str()) {
                traversal.members_skipped += 1;
                continue;
            }

            let bytes = match self.converter.serialize(&member) {
                Ok(bytes) => bytes,
                Err(err) => {
                    traversal.state.stats.errors += 1;
                    tracing::error!(member = %member.logical_id, %err, "skipping member");
                    continue;
                }
            };

            match self.sink.sink(&key, &bytes) {
                Ok(SinkOutcome::Saved) => {
                    traversal.state.stats.members_saved += 1;
                    traversal.state.seen_members.insert(key.into_string());
                }
                Ok(SinkOutcome::AlreadyExists) => {
                    tracing::debug!(member = %member.logical_id, %key, "artifact already on disk");
                    traversal.members_skipped += 1;
                    traversal.state.seen_members.insert(key.into_string());
                }
                Err(err) => {
                    traversal.state.stats.errors += 1;
                    tracing::error!(
                        member = %member.logical_id,
                        path = %err.path.display(),
                        error = %err.source,
                        "failed to store member"
                    );
                    complete = false;
                }
            }
        }

        for relation in &page.relations {
            if traversal.enqueue_relation(relation) {
                tracing::debug!(from = %page.uri, to = %relation, "queued page");
            }
        }

        complete
    }

    fn abandon(&self, traversal: &mut Traversal, uri: String) -> StepOutcome {
        traversal.retries.remove(&uri);
        traversal.abandoned.insert(uri.clone());
        StepOutcome::Abandoned { uri }
    }

    fn save(&self, traversal: &mut Traversal) -> bool {
        let state = traversal.snapshot();
        match self.store.save(state) {
            Ok(()) => {
                tracing::debug!(
                    path = %self.store.path().display(),
                    visited = state.visited_pages.len(),
                    pending = state.pending_pages.len(),
                    "checkpoint saved"
                );
                true
            }
            Err(err) => {
                tracing::error!(
                    err = format!("{:#}", anyhow::Error::new(err)),
                    "failed to save checkpoint; will retry at the next interval"
                );
                false
            }
        }
    }
}
