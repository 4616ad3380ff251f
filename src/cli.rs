//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

/// Mirror RPM-MD package repositories onto local storage.
///
/// Every repository listed in the configuration file is mirrored in turn;
/// files already held in the content store are linked instead of fetched.
#[derive(Parser, Debug)]
#[command(name = "repo-mirror")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Maximum concurrent downloads per batch (1-100) [default: 10]
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub concurrency: Option<u8>,

    /// Maximum attempts for transient failures (0-10) [default: 3]
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u8).range(0..=10))]
    pub max_retries: Option<u8>,

    /// Configuration file [default: $XDG_CONFIG_HOME/repo-mirror/config.toml]
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Also mirror source packages (src/nosrc) for every repository
    #[arg(long)]
    pub mirror_src: bool,

    /// Fail a repository (and keep its old metadata) if any package fails
    #[arg(long)]
    pub abort_on_failure: bool,
}
