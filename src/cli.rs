use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Harvest an event stream into the cache directory.
    Harvest(HarvestArgs),
    /// Show the checkpoint of a cache directory.
    Status(CacheArgs),
    /// Delete the checkpoint so the next harvest starts fresh.
    Reset(CacheArgs),
}

#[derive(Debug, Args)]
pub struct HarvestArgs {
    /// Event stream or page URL to start from (must be http/https).
    #[arg(long)]
    pub url: String,

    /// Directory for member files, `state.json` and `harvester.log`.
    #[arg(long, default_value = "./cache")]
    pub cache_dir: String,

    /// Ignore any previous checkpoint and start fresh.
    #[arg(long)]
    pub no_resume: bool,

    /// Pages completed between checkpoint saves.
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    pub checkpoint_interval: u64,

    /// Retries per page for transient fetch failures.
    #[arg(long, default_value_t = 3)]
    pub max_retries: u32,

    /// Delay before retrying a page.
    #[arg(long, default_value_t = 1000)]
    pub retry_delay_ms: u64,

    /// HTTP request timeout.
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,

    /// Trust the checkpoint's seen members instead of checking that their
    /// files still exist.
    #[arg(long)]
    pub trust_seen_members: bool,
}

#[derive(Debug, Args)]
pub struct CacheArgs {
    /// Cache directory of a previous harvest.
    #[arg(long, default_value = "./cache")]
    pub cache_dir: String,
}
