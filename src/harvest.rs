use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

use anyhow::Context as _;
use url::Url;

use crate::checkpoint::CheckpointStore;
use crate::cli::HarvestArgs;
use crate::engine::{EngineConfig, HarvestEngine};
use crate::formats::HarvestState;
use crate::ldes::{Converter as _, LdesConverter};
use crate::sink::MemberSink;
use crate::stats::RunReport;
use crate::transport::HttpTransport;

/// Validated harvest settings.
#[derive(Debug, Clone)]
pub struct HarvestSettings {
    pub entry_point: Url,
    pub cache_dir: PathBuf,
    pub resume: bool,
    pub verify_seen_members: bool,
    pub timeout: Duration,
    pub engine: EngineConfig,
}

impl HarvestSettings {
    pub fn from_args(args: &HarvestArgs) -> anyhow::Result<Self> {
        let entry_point = Url::parse(&args.url).context("parse --url")?;
        if entry_point.scheme() != "http" && entry_point.scheme() != "https" {
            anyhow::bail!("--url must be http/https: {entry_point}");
        }

        Ok(Self {
            entry_point,
            cache_dir: PathBuf::from(&args.cache_dir),
            resume: !args.no_resume,
            verify_seen_members: !args.trust_seen_members,
            timeout: Duration::from_secs(args.timeout_secs),
            engine: EngineConfig {
                checkpoint_interval: usize::try_from(args.checkpoint_interval)
                    .context("--checkpoint-interval out of range")?,
                max_retries: args.max_retries,
                retry_delay: Duration::from_millis(args.retry_delay_ms),
            },
        })
    }
}

/// Creates the cache directory and checks that files can be written to it.
pub fn ensure_cache_dir(dir: &Path) -> anyhow::Result<()> {
    if dir.exists() && !dir.is_dir() {
        anyhow::bail!("cache path is not a directory: {}", dir.display());
    }
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create cache dir: {}", dir.display()))?;

    let probe = dir.join(format!(".write-probe.{}", uuid::Uuid::new_v4().simple()));
    std::fs::write(&probe, b"")
        .with_context(|| format!("cache dir is not writable: {}", dir.display()))?;
    std::fs::remove_file(&probe)
        .with_context(|| format!("remove write probe: {}", probe.display()))?;
    Ok(())
}

/// Loads the state to start from, honoring the resume setting.
pub fn initial_state(store: &CheckpointStore, resume: bool) -> anyhow::Result<HarvestState> {
    if !resume {
        tracing::info!("resume disabled; starting from a fresh state");
        return Ok(HarvestState::default());
    }

    match store.load().context("load checkpoint")? {
        Some(state) => {
            tracing::info!(
                members = state.seen_members.len(),
                pages = state.visited_pages.len(),
                pending = state.pending_pages.len(),
                "resumed from previous state"
            );
            Ok(state)
        }
        None => Ok(HarvestState::default()),
    }
}

/// Runs a blocking harvest. Must be called outside of an async context.
pub fn run(settings: &HarvestSettings, shutdown: &AtomicBool) -> anyhow::Result<RunReport> {
    let started_at = chrono::Utc::now();
    let clock = Instant::now();

    let store = CheckpointStore::new(&settings.cache_dir);
    let mut state = initial_state(&store, settings.resume)?;

    let converter = LdesConverter;
    let sink = MemberSink::new(&settings.cache_dir, converter.extension());
    let transport = HttpTransport::new(settings.timeout)?;
    let engine = HarvestEngine::new(
        transport,
        converter,
        sink,
        store,
        settings.engine.clone(),
    );

    if settings.resume && settings.verify_seen_members {
        let dropped = engine.verify_seen_members(&mut state);
        if dropped > 0 {
            tracing::warn!(dropped, "seen members without a stored file will be fetched again");
        }
    }

    tracing::info!(url = %settings.entry_point, "starting LDES harvest");
    let outcome = engine.run(state, settings.entry_point.as_str(), shutdown);

    let report = RunReport::from_outcome(
        &outcome,
        started_at,
        chrono::Utc::now(),
        clock.elapsed(),
        std::path::absolute(&settings.cache_dir).unwrap_or_else(|_| settings.cache_dir.clone()),
    );
    report.log();
    Ok(report)
}
