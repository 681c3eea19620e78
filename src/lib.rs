use std::io::{self, Write};
use std::process::ExitCode;

use log::{error, info};

pub mod cli;
pub mod commands;
pub mod config;
pub mod db;
pub mod logging;
pub mod reporter;

use cli::{Cli, Command};
use commands::RunOutcome;
use config::AppConfig;

/// Exit code after Ctrl-C
const EXIT_INTERRUPTED: u8 = 130;
/// Exit code when the run finished with failures
const EXIT_FAILURES: u8 = 2;

pub async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    // The indexer must not write logs into the tree it is describing
    let log_root = match &cli.command {
        Command::Index { .. } => None,
        Command::Import { root, .. } | Command::Status { root } => Some(root.clone()),
        Command::Run(args) | Command::Repair(args) => Some(args.root.clone()),
    };
    let log = logging::init(log_root.as_deref(), cli.debug)?;
    if let Some(path) = &log.path {
        info!("log_file: {}", path.display());
    }
    let config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Index {
            source,
            out,
            base_url,
            name,
            algorithm,
        } => {
            commands::index(&source, &out, name.as_deref(), &base_url, algorithm).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Import { root, manifest } => {
            commands::import(&root, &manifest).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Status { root } => {
            println!("{}", commands::status(&root).await?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Run(args) => {
            let outcome = commands::run_mirror(&args, config, false).await?;
            finish(&outcome, args.json)
        }
        Command::Repair(args) => {
            let outcome = commands::run_mirror(&args, config, true).await?;
            finish(&outcome, args.json)
        }
    }
}

fn finish(outcome: &RunOutcome, json: bool) -> anyhow::Result<ExitCode> {
    let mut stdout = io::stdout();
    let mut stderr = io::stderr();
    write_closing(outcome, json, &mut stdout, &mut stderr)?;
    Ok(match outcome {
        RunOutcome::Finished { failures: 0 } => ExitCode::SUCCESS,
        RunOutcome::Finished { failures } => {
            error!("mirror_incomplete: {} failures", failures);
            ExitCode::from(EXIT_FAILURES)
        }
        RunOutcome::Interrupted => ExitCode::from(EXIT_INTERRUPTED),
    })
}

/// Closing line of a run. With `--json` stdout carries only event lines, so it goes to stderr.
fn write_closing<O: Write, E: Write>(
    outcome: &RunOutcome,
    json: bool,
    stdout: &mut O,
    stderr: &mut E,
) -> io::Result<()> {
    let line = match outcome {
        RunOutcome::Finished { failures } => reporter::summary(*failures),
        RunOutcome::Interrupted => "Stopped. Run again to resume.".to_string(),
    };
    if json {
        writeln!(stderr, "{}", line)
    } else {
        writeln!(stdout, "{}", line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn closing(outcome: RunOutcome, json: bool) -> (String, String) {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        write_closing(&outcome, json, &mut stdout, &mut stderr).unwrap();
        (
            String::from_utf8(stdout).unwrap(),
            String::from_utf8(stderr).unwrap(),
        )
    }

    #[test]
    fn json_mode_keeps_stdout_for_events() {
        let (out, err) = closing(RunOutcome::Finished { failures: 2 }, true);
        assert!(out.is_empty());
        assert_eq!(err.trim_end(), reporter::summary(2));

        let (out, err) = closing(RunOutcome::Interrupted, true);
        assert!(out.is_empty());
        assert!(err.starts_with("Stopped."));
    }

    #[test]
    fn console_mode_prints_summary_to_stdout() {
        let (out, err) = closing(RunOutcome::Finished { failures: 0 }, false);
        assert_eq!(out.trim_end(), reporter::summary(0));
        assert!(err.is_empty());
    }
}
