use std::sync::Arc;

use anyhow::{anyhow, bail};
use log::info;
use mirror_dl::Engine;
use tokio::sync::mpsc;

use crate::cli::RunArgs;
use crate::config::AppConfig;
use crate::db::{IndexDb, INDEX_FILE};
use crate::reporter::Reporter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Finished { failures: u64 },
    Interrupted,
}

/// Download until the run finishes or Ctrl-C is pressed. With `repair`, all progress is
/// forgotten first.
pub async fn run_mirror(
    args: &RunArgs,
    mut config: AppConfig,
    repair: bool,
) -> anyhow::Result<RunOutcome> {
    if let Some(kb) = args.rate_limit_kb {
        config.rate_limit_kb = kb;
    }
    if !args.root.join(INDEX_FILE).is_file() {
        bail!(
            "no index in {}; run `import` first",
            args.root.display()
        );
    }

    let index = Arc::new(
        IndexDb::open_in(&args.root)
            .await
            .map_err(|e| anyhow!("opening index: {}", e))?,
    );
    let overview = index
        .overview()
        .await
        .map_err(|e| anyhow!("reading overview: {}", e))?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let engine = Engine::new(config.engine_config(&args.root), index, Arc::new(tx))?;
    let mut reporter = Reporter::new(&overview, config.active_slots, args.json);

    info!(
        "mirror_run: {} root={} repair={} rate_limit_kb={}",
        overview.name,
        args.root.display(),
        repair,
        config.rate_limit_kb
    );
    if repair {
        engine.repair().await?;
    } else {
        engine.start().await?;
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let outcome = loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(event) => {
                    if let Some(failures) = reporter.handle(&event) {
                        break RunOutcome::Finished { failures };
                    }
                }
                None => break RunOutcome::Interrupted,
            },
            _ = &mut ctrl_c => {
                info!("mirror_interrupted: stopping engine");
                engine.stop(false).await;
                while let Ok(event) = rx.try_recv() {
                    reporter.handle(&event);
                }
                break RunOutcome::Interrupted;
            }
        }
    };

    if reporter.storage_failures() > 0 {
        log::warn!(
            "mirror_storage_failures: {} during run",
            reporter.storage_failures()
        );
    }
    Ok(outcome)
}
