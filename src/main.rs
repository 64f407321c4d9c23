use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context as _;
use clap::Parser as _;

#[tokio::main]
async fn main() -> ExitCode {
    match try_main().await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn try_main() -> anyhow::Result<ExitCode> {
    let cli = ldes_harvester::cli::Cli::parse();

    match cli.command {
        ldes_harvester::cli::Command::Harvest(args) => {
            let settings = ldes_harvester::harvest::HarvestSettings::from_args(&args)?;
            ldes_harvester::harvest::ensure_cache_dir(&settings.cache_dir)
                .context("prepare cache dir")?;
            let log_file = settings
                .cache_dir
                .join(ldes_harvester::logging::LOG_FILE_NAME);
            ldes_harvester::logging::init(Some(&log_file)).context("init logging")?;
            tracing::debug!(?args, "parsed cli");

            let shutdown = Arc::new(AtomicBool::new(false));
            let signal_flag = Arc::clone(&shutdown);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("interrupt received; finishing the current page");
                    signal_flag.store(true, Ordering::SeqCst);
                }
            });

            let report = tokio::task::spawn_blocking(move || {
                ldes_harvester::harvest::run(&settings, &shutdown)
            })
            .await
            .context("join harvest task")?
            .context("harvest")?;

            print!("{}", report.render());
            if report.interrupted {
                return Ok(ExitCode::from(130));
            }
        }
        ldes_harvester::cli::Command::Status(args) => {
            ldes_harvester::logging::init(None).context("init logging")?;
            tracing::debug!(?args, "parsed cli");
            ldes_harvester::status::run(args).context("status")?;
        }
        ldes_harvester::cli::Command::Reset(args) => {
            ldes_harvester::logging::init(None).context("init logging")?;
            tracing::debug!(?args, "parsed cli");
            ldes_harvester::status::reset(args).context("reset")?;
        }
    }

    Ok(ExitCode::SUCCESS)
}
