use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use mirror_dl::DigestAlgorithm;

/// Resumable, verified bulk downloader for archive mirrors
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (default: ./config.json when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose console logging
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Hash a local reference tree into a manifest for `import`
    Index {
        /// Directory to describe
        #[arg(long)]
        source: PathBuf,

        /// Manifest JSON to write
        #[arg(long)]
        out: PathBuf,

        /// URL the mirrored files are served from
        #[arg(long)]
        base_url: String,

        /// Mirror name (default: the source directory name)
        #[arg(long)]
        name: Option<String>,

        /// sha1, sha256 or sha512
        #[arg(long, default_value = "sha1")]
        algorithm: DigestAlgorithm,
    },
    /// Create or replace the index from a local manifest
    Import {
        /// Install root; the index lives inside it
        #[arg(long)]
        root: PathBuf,

        /// Manifest JSON: name, base_url, files[], empty_dirs[]
        #[arg(long)]
        manifest: PathBuf,
    },
    /// Download everything not yet done
    Run(RunArgs),
    /// Forget all progress, then download and verify every file again
    Repair(RunArgs),
    /// Show the mirror overview and progress
    Status {
        #[arg(long)]
        root: PathBuf,
    },
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Install root containing the index
    #[arg(long)]
    pub root: PathBuf,

    /// Bandwidth cap in KB/s; values below 200 mean unlimited
    #[arg(long)]
    pub rate_limit_kb: Option<u64>,

    /// Print events as JSON lines instead of progress bars
    #[arg(long)]
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_accepts_rate_limit_and_json() {
        let cli = Cli::parse_from([
            "archive-mirror",
            "run",
            "--root",
            "/srv/mirror",
            "--rate-limit-kb",
            "512",
            "--json",
        ]);
        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.root, PathBuf::from("/srv/mirror"));
                assert_eq!(args.rate_limit_kb, Some(512));
                assert!(args.json);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn index_parses_algorithm() {
        let cli = Cli::parse_from([
            "archive-mirror",
            "index",
            "--source",
            "/data/archive",
            "--out",
            "manifest.json",
            "--base-url",
            "https://cdn.example.org/archive",
            "--algorithm",
            "SHA-256",
        ]);
        match cli.command {
            Command::Index {
                algorithm, name, ..
            } => {
                assert_eq!(algorithm, DigestAlgorithm::Sha256);
                assert!(name.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn global_flags_follow_subcommand() {
        let cli = Cli::parse_from([
            "archive-mirror",
            "status",
            "--root",
            "/m",
            "--debug",
            "--config",
            "/etc/mirror.json",
        ]);
        assert!(cli.debug);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/mirror.json")));
    }
}
