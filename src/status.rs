use std::path::PathBuf;

use anyhow::Context as _;

use crate::checkpoint::CheckpointStore;
use crate::cli::CacheArgs;
use crate::formats::HarvestState;

pub fn run(args: CacheArgs) -> anyhow::Result<()> {
    let store = CheckpointStore::new(PathBuf::from(&args.cache_dir));
    let state = store.load().context("load checkpoint")?;
    print!("{}", render(state.as_ref()));
    Ok(())
}

pub fn reset(args: CacheArgs) -> anyhow::Result<()> {
    let store = CheckpointStore::new(PathBuf::from(&args.cache_dir));
    if store.clear().context("remove checkpoint")? {
        tracing::info!(path = %store.path().display(), "checkpoint removed");
        println!("checkpoint removed: {}", store.path().display());
    } else {
        println!("no checkpoint");
    }
    Ok(())
}

fn render(state: Option<&HarvestState>) -> String {
    let Some(state) = state else {
        return "no checkpoint\n".to_owned();
    };

    format!(
        "Pages processed: {}\n\
         Members saved: {}\n\
         Errors: {}\n\
         Visited pages: {}\n\
         Seen members: {}\n\
         Pending pages: {}\n\
         Last updated: {}\n",
        state.stats.pages_processed,
        state.stats.members_saved,
        state.stats.errors,
        state.visited_pages.len(),
        state.seen_members.len(),
        state.pending_pages.len(),
        state.last_updated.as_deref().unwrap_or("unknown"),
    )
}
