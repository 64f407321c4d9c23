use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::engine::RunOutcome;
use crate::formats::HarvestStats;

/// Final summary of one harvest run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub stats: HarvestStats,
    pub members_skipped: u64,
    pub pages_abandoned: usize,
    pub pending_pages: usize,
    pub checkpoint_failures: u64,
    pub interrupted: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration: Duration,
    pub cache_dir: PathBuf,
}

impl RunReport {
    pub fn from_outcome(
        outcome: &RunOutcome,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        duration: Duration,
        cache_dir: PathBuf,
    ) -> Self {
        Self {
            stats: outcome.state.stats,
            members_skipped: outcome.members_skipped,
            pages_abandoned: outcome.pages_abandoned,
            pending_pages: outcome.state.pending_pages.len(),
            checkpoint_failures: outcome.checkpoint_failures,
            interrupted: outcome.interrupted,
            started_at,
            finished_at,
            duration,
            cache_dir,
        }
    }

    #[must_use]
    pub fn render(&self) -> String {
        self.to_string()
    }

    pub fn log(&self) {
        tracing::info!(
            members_saved = self.stats.members_saved,
            pages_processed = self.stats.pages_processed,
            errors = self.stats.errors,
            members_skipped = self.members_skipped,
            pages_abandoned = self.pages_abandoned,
            pending_pages = self.pending_pages,
            checkpoint_failures = self.checkpoint_failures,
            interrupted = self.interrupted,
            duration_secs = self.duration.as_secs_f64(),
            "harvest finished"
        );
        if self.checkpoint_failures > 0 {
            tracing::warn!(
                checkpoint_failures = self.checkpoint_failures,
                "checkpoint saves failed during this run; resume may redo work"
            );
        }
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(60);
        let heading = if self.interrupted {
            "HARVESTING INTERRUPTED"
        } else {
            "HARVESTING COMPLETE"
        };

        writeln!(f, "{rule}")?;
        writeln!(f, "{heading}")?;
        writeln!(f, "{rule}")?;
        writeln!(f, "Members harvested: {}", self.stats.members_saved)?;
        writeln!(f, "Pages processed: {}", self.stats.pages_processed)?;
        writeln!(f, "Errors encountered: {}", self.stats.errors)?;
        writeln!(f, "Members skipped (already saved): {}", self.members_skipped)?;
        writeln!(f, "Pages abandoned this run: {}", self.pages_abandoned)?;
        writeln!(f, "Pages pending: {}", self.pending_pages)?;
        if self.checkpoint_failures > 0 {
            writeln!(
                f,
                "WARNING: {} checkpoint save(s) failed; resumability degraded",
                self.checkpoint_failures
            )?;
        }
        writeln!(f, "Started: {}", self.started_at.to_rfc3339())?;
        writeln!(f, "Finished: {}", self.finished_at.to_rfc3339())?;
        writeln!(f, "Duration: {:.2} seconds", self.duration.as_secs_f64())?;
        writeln!(f, "Cache directory: {}", self.cache_dir.display())?;
        writeln!(f, "{rule}")
    }
}
