//! Command-line interface definitions for the `thumbstore` binary.
//!
//! The binary inspects and maintains a store file offline; applications embed
//! the store through the library instead.
//!
//! # Example
//!
//! ```bash
//! # Space accounting for the store under the current directory
//! thumbstore stats
//!
//! # List cached keys as JSON
//! thumbstore --base-dir ~/vam list --json
//!
//! # Drop thumbnails for packages and files that no longer exist
//! thumbstore --base-dir ~/vam compact
//! ```

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Inspect and maintain a persistent thumbnail store.
#[derive(Debug, Parser)]
#[command(name = "thumbstore")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity level (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Configuration file (TOML)
    #[arg(long, global = true, env = "THUMBSTORE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Application directory holding the cache and package roots
    #[arg(long, global = true, default_value = ".")]
    pub base_dir: PathBuf,

    /// Store file, overriding the configured location
    #[arg(long, global = true)]
    pub store: Option<PathBuf>,

    /// Report errors as JSON on stderr
    #[arg(long, global = true)]
    pub json_errors: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show key count and live/dead space
    Stats(OutputArgs),
    /// List cached keys with their metadata
    List(ListArgs),
    /// Open the store, truncating a torn tail, and report what was found
    Verify(OutputArgs),
    /// Remove thumbnails whose assets no longer exist
    Compact(CompactArgs),
    /// Write the effective configuration as TOML
    InitConfig(InitConfigArgs),
}

/// Output selection shared by reporting commands.
#[derive(Debug, Args)]
pub struct OutputArgs {
    /// Print JSON instead of text
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `list`.
#[derive(Debug, Args)]
pub struct ListArgs {
    /// Only list keys starting with this prefix
    #[arg(long)]
    pub prefix: Option<String>,

    #[command(flatten)]
    pub output: OutputArgs,
}

/// Arguments for `compact`.
#[derive(Debug, Args)]
pub struct CompactArgs {
    /// Report dead keys without rewriting the store
    #[arg(long)]
    pub dry_run: bool,

    #[command(flatten)]
    pub output: OutputArgs,
}

/// Arguments for `init-config`.
#[derive(Debug, Args)]
pub struct InitConfigArgs {
    /// Destination (defaults to the platform config path)
    pub path: Option<PathBuf>,

    /// Overwrite an existing file
    #[arg(long)]
    pub force: bool,
}
