use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use ldes_harvester::address::address;
use ldes_harvester::checkpoint::{CheckpointStore, STATE_FILE_NAME};
use ldes_harvester::engine::{EngineConfig, HarvestEngine, RunOutcome, StepOutcome, Traversal};
use ldes_harvester::formats::HarvestState;
use ldes_harvester::ldes::{LdesConverter, NTRIPLES_EXTENSION};
use ldes_harvester::sink::MemberSink;
use ldes_harvester::transport::{FetchedPage, Transport, TransportError};
use serde_json::json;

const BASE: &str = "https://example.com/ldes";

fn page_uri(name: &str) -> String {
    format!("{BASE}/{name}")
}

fn page_body(members: &[&str], relations: &[&str]) -> String {
    json!({
        "@context": {"ex": "https://example.com/ns#"},
        "member": members
            .iter()
            .map(|id| json!({"@id": id, "ex:label": format!("label of {id}")}))
            .collect::<Vec<_>>(),
        "view": {
            "relation": relations
                .iter()
                .map(|name| json!({"node": page_uri(name)}))
                .collect::<Vec<_>>(),
        },
    })
    .to_string()
}

/// In-memory page graph with scripted failures.
#[derive(Default)]
struct FixtureTransport<'a> {
    pages: HashMap<String, String>,
    failures: RefCell<HashMap<String, (u32, TransportError)>>,
    fetches: RefCell<Vec<String>>,
    stop_after: Option<(usize, &'a AtomicBool)>,
}

impl<'a> FixtureTransport<'a> {
    fn page(mut self, name: &str, members: &[&str], relations: &[&str]) -> Self {
        self.pages
            .insert(page_uri(name), page_body(members, relations));
        self
    }

    fn raw_page(mut self, name: &str, body: &str) -> Self {
        self.pages.insert(page_uri(name), body.to_owned());
        self
    }

    fn failing(self, name: &str, times: u32, err: TransportError) -> Self {
        self.failures
            .borrow_mut()
            .insert(page_uri(name), (times, err));
        self
    }

    fn stop_after(mut self, fetches: usize, flag: &'a AtomicBool) -> Self {
        self.stop_after = Some((fetches, flag));
        self
    }

    fn fetch_count(&self, name: &str) -> usize {
        let uri = page_uri(name);
        self.fetches.borrow().iter().filter(|u| **u == uri).count()
    }
}

impl Transport for FixtureTransport<'_> {
    fn fetch(&self, uri: &str) -> Result<FetchedPage, TransportError> {
        self.fetches.borrow_mut().push(uri.to_owned());
        if let Some((limit, flag)) = self.stop_after {
            if self.fetches.borrow().len() >= limit {
                flag.store(true, Ordering::SeqCst);
            }
        }

        if let Some((remaining, err)) = self.failures.borrow_mut().get_mut(uri) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(err.clone());
            }
        }

        self.pages
            .get(uri)
            .map(|body| FetchedPage {
                body: body.clone(),
                content_type: Some("application/ld+json".to_owned()),
            })
            .ok_or_else(|| TransportError::fatal(format!("http status 404 for {uri}")))
    }
}

fn config(checkpoint_interval: usize, max_retries: u32) -> EngineConfig {
    EngineConfig {
        checkpoint_interval,
        max_retries,
        retry_delay: Duration::ZERO,
    }
}

fn engine<'t, 'a>(
    transport: &'t FixtureTransport<'a>,
    dir: &Path,
    config: EngineConfig,
) -> HarvestEngine<&'t FixtureTransport<'a>, LdesConverter> {
    HarvestEngine::new(
        transport,
        LdesConverter,
        MemberSink::new(dir, NTRIPLES_EXTENSION),
        CheckpointStore::new(dir),
        config,
    )
}

fn harvest(transport: &FixtureTransport<'_>, dir: &Path, state: HarvestState) -> RunOutcome {
    let shutdown = AtomicBool::new(false);
    engine(transport, dir, config(10, 3)).run(state, &page_uri("p1"), &shutdown)
}

fn artifacts(dir: &Path) -> anyhow::Result<BTreeSet<String>> {
    let mut names = BTreeSet::new();
    for entry in fs::read_dir(dir)? {
        let name = entry?.file_name().to_string_lossy().to_string();
        if name.ends_with(".nt") {
            names.insert(name);
        }
    }
    Ok(names)
}

fn artifact_name(logical_id: &str) -> String {
    format!("{}.nt", address(logical_id))
}

fn load(dir: &Path) -> anyhow::Result<HarvestState> {
    CheckpointStore::new(dir)
        .load()?
        .ok_or_else(|| anyhow::anyhow!("expected a checkpoint in {}", dir.display()))
}

#[test]
fn duplicate_member_across_pages_is_saved_once() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let transport = FixtureTransport::default()
        .page("p1", &["urn:id1", "urn:id2"], &["p2"])
        .page("p2", &["urn:id1"], &[]);

    let outcome = harvest(&transport, temp.path(), HarvestState::default());

    assert_eq!(outcome.state.stats.pages_processed, 2);
    assert_eq!(outcome.state.stats.members_saved, 2);
    assert_eq!(outcome.state.stats.errors, 0);
    assert_eq!(outcome.members_skipped, 1);
    assert_eq!(
        artifacts(temp.path())?,
        BTreeSet::from([artifact_name("urn:id1"), artifact_name("urn:id2")])
    );

    let stored = fs::read_to_string(temp.path().join(artifact_name("urn:id2")))?;
    assert_eq!(
        stored,
        "<urn:id2> <https://example.com/ns#label> \"label of urn:id2\" .\n"
    );
    Ok(())
}

#[test]
fn second_run_over_static_graph_changes_nothing() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let transport = FixtureTransport::default()
        .page("p1", &["urn:id1", "urn:id2"], &["p2"])
        .page("p2", &["urn:id3"], &["p3"])
        .page("p3", &["urn:id1"], &[]);

    let first = harvest(&transport, temp.path(), HarvestState::default());
    let files_after_first = artifacts(temp.path())?;

    let second_transport = FixtureTransport::default()
        .page("p1", &["urn:id1", "urn:id2"], &["p2"])
        .page("p2", &["urn:id3"], &["p3"])
        .page("p3", &["urn:id1"], &[]);
    let second = harvest(&second_transport, temp.path(), load(temp.path())?);

    assert_eq!(artifacts(temp.path())?, files_after_first);
    assert_eq!(files_after_first.len(), 3);
    assert_eq!(second.state.stats, first.state.stats);
    assert_eq!(second.state.stats.members_saved, 3);
    assert!(second_transport.fetches.borrow().is_empty());
    Ok(())
}

#[test]
fn relation_cycle_terminates_and_counts_each_page_once() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let transport = FixtureTransport::default()
        .page("p1", &["urn:a"], &["p2", "p1"])
        .page("p2", &["urn:b"], &["p1", "p2"]);

    let outcome = harvest(&transport, temp.path(), HarvestState::default());

    assert_eq!(outcome.state.stats.pages_processed, 2);
    assert_eq!(transport.fetch_count("p1"), 1);
    assert_eq!(transport.fetch_count("p2"), 1);
    assert!(outcome.state.pending_pages.is_empty());
    Ok(())
}

#[test]
fn densely_linked_pages_are_enqueued_once() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let transport = FixtureTransport::default()
        .page("p1", &[], &["p2", "p3", "p4"])
        .page("p2", &["urn:x"], &["p3", "p4"])
        .page("p3", &["urn:x"], &["p4", "p2"])
        .page("p4", &["urn:y"], &["p1"]);

    let outcome = harvest(&transport, temp.path(), HarvestState::default());

    assert_eq!(transport.fetches.borrow().len(), 4);
    assert_eq!(outcome.state.stats.pages_processed, 4);
    assert_eq!(outcome.state.stats.members_saved, 2);
    Ok(())
}

#[test]
fn interrupted_run_resumes_without_resinking() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let shutdown = AtomicBool::new(false);
    let interrupted_transport = FixtureTransport::default()
        .page("p1", &["urn:1"], &["p2"])
        .page("p2", &["urn:2"], &["p3"])
        .page("p3", &["urn:3", "urn:1"], &["p4"])
        .page("p4", &["urn:4"], &[])
        .stop_after(2, &shutdown);

    let first = engine(&interrupted_transport, temp.path(), config(10, 3)).run(
        HarvestState::default(),
        &page_uri("p1"),
        &shutdown,
    );
    assert!(first.interrupted);

    let saved = load(temp.path())?;
    assert_eq!(
        saved.visited_pages,
        BTreeSet::from([page_uri("p1"), page_uri("p2")])
    );
    assert_eq!(saved.pending_pages, vec![page_uri("p3")]);
    assert_eq!(saved.stats.members_saved, 2);

    let resumed_transport = FixtureTransport::default()
        .page("p1", &["urn:1"], &["p2"])
        .page("p2", &["urn:2"], &["p3"])
        .page("p3", &["urn:3", "urn:1"], &["p4"])
        .page("p4", &["urn:4"], &[]);
    let resumed = harvest(&resumed_transport, temp.path(), saved);

    assert!(!resumed.interrupted);
    assert_eq!(resumed_transport.fetch_count("p1"), 0);
    assert_eq!(resumed_transport.fetch_count("p2"), 0);
    assert_eq!(resumed_transport.fetch_count("p3"), 1);
    assert_eq!(resumed_transport.fetch_count("p4"), 1);
    assert_eq!(resumed.state.stats.pages_processed, 4);
    assert_eq!(resumed.state.stats.members_saved, 4);
    assert_eq!(resumed.members_skipped, 1);
    assert_eq!(artifacts(temp.path())?.len(), 4);
    Ok(())
}

#[test]
fn partially_processed_page_is_idempotent_on_retry() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    // A crash after sinking urn:1 but before the page was recorded.
    fs::write(temp.path().join(artifact_name("urn:1")), b"{}\n")?;

    let transport = FixtureTransport::default().page("p1", &["urn:1", "urn:2"], &[]);
    let outcome = harvest(&transport, temp.path(), HarvestState::default());

    assert_eq!(outcome.state.stats.members_saved, 1);
    assert!(outcome.state.is_seen(address("urn:1").as_str()));
    assert!(outcome.state.is_seen(address("urn:2").as_str()));
    assert_eq!(fs::read(temp.path().join(artifact_name("urn:1")))?, b"{}\n");
    Ok(())
}

#[test]
fn retryable_failure_is_requeued_then_succeeds() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let transport = FixtureTransport::default()
        .page("p1", &["urn:1"], &["p2", "p3"])
        .page("p2", &["urn:2"], &[])
        .page("p3", &["urn:3"], &[])
        .failing("p2", 1, TransportError::retryable("503"));

    let outcome = harvest(&transport, temp.path(), HarvestState::default());

    let order = transport.fetches.borrow().clone();
    assert_eq!(
        order,
        vec![page_uri("p1"), page_uri("p2"), page_uri("p3"), page_uri("p2")]
    );
    assert_eq!(outcome.state.stats.errors, 1);
    assert_eq!(outcome.state.stats.pages_processed, 3);
    assert_eq!(outcome.pages_abandoned, 0);
    Ok(())
}

#[test]
fn retry_bound_abandons_page_for_this_run_only() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let shutdown = AtomicBool::new(false);
    let transport = FixtureTransport::default()
        .page("p1", &["urn:1"], &["p2"])
        .page("p2", &["urn:2"], &["p1"])
        .failing("p2", 100, TransportError::retryable("connection reset"));

    let outcome = engine(&transport, temp.path(), config(10, 2)).run(
        HarvestState::default(),
        &page_uri("p1"),
        &shutdown,
    );

    assert_eq!(transport.fetch_count("p2"), 3);
    assert_eq!(outcome.state.stats.errors, 3);
    assert_eq!(outcome.pages_abandoned, 1);
    assert!(!outcome.state.is_visited(&page_uri("p2")));

    let saved = load(temp.path())?;
    assert_eq!(saved.pending_pages, vec![page_uri("p2")]);
    Ok(())
}

#[test]
fn fatal_fetch_and_malformed_page_are_not_retried() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let transport = FixtureTransport::default()
        .page("p1", &["urn:1"], &["p2", "missing", "broken"])
        .page("p2", &["urn:2"], &[])
        .raw_page("broken", "<html>not json</html>");

    let outcome = harvest(&transport, temp.path(), HarvestState::default());

    assert_eq!(transport.fetch_count("missing"), 1);
    assert_eq!(transport.fetch_count("broken"), 1);
    assert_eq!(outcome.state.stats.errors, 2);
    assert_eq!(outcome.state.stats.pages_processed, 2);
    assert_eq!(outcome.pages_abandoned, 2);
    assert!(!outcome.state.is_visited(&page_uri("broken")));
    Ok(())
}

#[test]
fn member_errors_skip_only_the_member() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let body = json!({
        "member": [{"label": "no id"}, {"@id": "urn:ok"}, 42],
    })
    .to_string();
    let transport = FixtureTransport::default().raw_page("p1", &body);

    let outcome = harvest(&transport, temp.path(), HarvestState::default());

    assert_eq!(outcome.state.stats.errors, 2);
    assert_eq!(outcome.state.stats.members_saved, 1);
    assert!(outcome.state.is_visited(&page_uri("p1")));
    Ok(())
}

#[test]
fn storage_failure_leaves_page_unvisited() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let transport = FixtureTransport::default()
        .page("p1", &["urn:1"], &["p2"])
        .page("p2", &[], &[]);
    let shutdown = AtomicBool::new(false);
    let engine = HarvestEngine::new(
        &transport,
        LdesConverter,
        MemberSink::new(temp.path().join("not-created"), NTRIPLES_EXTENSION),
        CheckpointStore::new(temp.path()),
        config(10, 3),
    );

    let outcome = engine.run(HarvestState::default(), &page_uri("p1"), &shutdown);

    assert_eq!(outcome.state.stats.errors, 1);
    assert_eq!(outcome.state.stats.members_saved, 0);
    assert!(!outcome.state.is_visited(&page_uri("p1")));
    assert!(outcome.state.is_visited(&page_uri("p2")));
    assert!(outcome.state.seen_members.is_empty());
    assert_eq!(load(temp.path())?.pending_pages, vec![page_uri("p1")]);
    Ok(())
}

#[test]
fn checkpoint_is_saved_every_interval() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let transport = FixtureTransport::default()
        .page("p1", &["urn:1"], &["p2"])
        .page("p2", &["urn:2"], &["p3"])
        .page("p3", &[], &[]);
    let engine = engine(&transport, temp.path(), config(2, 3));
    let mut traversal = Traversal::resume(HarvestState::default(), &page_uri("p1"));

    assert!(matches!(engine.step(&mut traversal), StepOutcome::Completed { .. }));
    assert!(!temp.path().join(STATE_FILE_NAME).exists());

    let shutdown = AtomicBool::new(false);
    let outcome = engine.run(HarvestState::default(), &page_uri("p1"), &shutdown);
    assert_eq!(outcome.checkpoint_failures, 0);
    assert_eq!(load(temp.path())?.stats.pages_processed, 3);
    Ok(())
}

#[test]
fn checkpoint_failures_do_not_stop_the_harvest() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let transport = FixtureTransport::default()
        .page("p1", &["urn:1"], &["p2"])
        .page("p2", &["urn:2"], &[]);
    let shutdown = AtomicBool::new(false);
    let engine = HarvestEngine::new(
        &transport,
        LdesConverter,
        MemberSink::new(temp.path(), NTRIPLES_EXTENSION),
        CheckpointStore::new(temp.path().join("missing-dir")),
        config(1, 3),
    );

    let outcome = engine.run(HarvestState::default(), &page_uri("p1"), &shutdown);

    assert_eq!(outcome.state.stats.pages_processed, 2);
    assert_eq!(outcome.state.stats.members_saved, 2);
    assert_eq!(outcome.checkpoint_failures, 3);
    Ok(())
}

#[test]
fn step_reports_each_transition() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let transport = FixtureTransport::default()
        .page("p1", &["urn:1"], &["p2"])
        .page("p2", &[], &[])
        .failing("p2", 1, TransportError::retryable("timeout"));
    let engine = engine(&transport, temp.path(), config(10, 3));

    let mut state = HarvestState::default();
    state.pending_pages.push(page_uri("p1"));
    let mut traversal = Traversal::resume(state, &page_uri("p1"));
    assert_eq!(traversal.frontier.len(), 1);

    assert_eq!(
        engine.step(&mut traversal),
        StepOutcome::Completed { uri: page_uri("p1") }
    );
    assert_eq!(
        engine.step(&mut traversal),
        StepOutcome::Retrying {
            uri: page_uri("p2"),
            attempt: 1
        }
    );
    assert_eq!(
        engine.step(&mut traversal),
        StepOutcome::Completed { uri: page_uri("p2") }
    );
    assert_eq!(engine.step(&mut traversal), StepOutcome::Idle);

    traversal.frontier.push(page_uri("p1"));
    assert_eq!(
        engine.step(&mut traversal),
        StepOutcome::AlreadyVisited { uri: page_uri("p1") }
    );
    Ok(())
}

#[test]
fn member_that_is_not_valid_jsonld_is_skipped() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let body = json!({
        "@context": {"ex": "https://example.com/ns#"},
        "member": [
            {"@id": "urn:bad", "@context": 42, "ex:label": "broken"},
            {"@id": "urn:good", "ex:label": "fine"}
        ],
    })
    .to_string();
    let transport = FixtureTransport::default().raw_page("p1", &body);

    let outcome = harvest(&transport, temp.path(), HarvestState::default());

    assert_eq!(outcome.state.stats.errors, 1);
    assert_eq!(outcome.state.stats.members_saved, 1);
    assert!(!outcome.state.is_seen(address("urn:bad").as_str()));
    assert_eq!(
        artifacts(temp.path())?,
        BTreeSet::from([artifact_name("urn:good")])
    );
    assert!(outcome.state.is_visited(&page_uri("p1")));
    Ok(())
}

#[test]
fn corrupt_checkpoint_starts_fresh() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    fs::write(temp.path().join(STATE_FILE_NAME), b"\x00\x01 not json")?;

    let loaded = CheckpointStore::new(temp.path()).load()?;
    assert!(loaded.is_none());

    let transport = FixtureTransport::default().page("p1", &["urn:1"], &[]);
    let outcome = harvest(&transport, temp.path(), loaded.unwrap_or_default());
    assert_eq!(outcome.state.stats.members_saved, 1);
    assert_eq!(load(temp.path())?.stats.pages_processed, 1);
    Ok(())
}

#[test]
fn verification_drops_seen_members_missing_from_storage() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let transport = FixtureTransport::default().page("p1", &["urn:1", "urn:2"], &[]);
    harvest(&transport, temp.path(), HarvestState::default());

    fs::remove_file(temp.path().join(artifact_name("urn:2")))?;
    let mut state = load(temp.path())?;
    state.visited_pages.clear();

    let engine = engine(&transport, temp.path(), config(10, 3));
    assert_eq!(engine.verify_seen_members(&mut state), 1);
    assert!(state.is_seen(address("urn:1").as_str()));

    let shutdown = AtomicBool::new(false);
    let outcome = engine.run(state, &page_uri("p1"), &shutdown);
    assert_eq!(outcome.state.stats.members_saved, 3);
    assert!(temp.path().join(artifact_name("urn:2")).exists());
    Ok(())
}
