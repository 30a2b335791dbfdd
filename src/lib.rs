//! Thumbstore - persistent thumbnail store for asset browsers.
//!
//! A single-file, append-only cache mapping asset keys to decoded bitmaps.
//! It survives crashes mid-write, reclaims space for assets that no longer
//! exist, and serves concurrent lookups from a UI that polls it every frame.
//! See [`cache`] for the store itself.

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;

use anyhow::{Context, Result};
use bytesize::ByteSize;
use std::path::Path;

use crate::cache::{FsAssetIndex, LivenessResolver, ThumbnailStore};
use crate::cli::{Cli, Commands, CompactArgs, InitConfigArgs, ListArgs, OutputArgs};
use crate::config::Config;
use crate::error::ExitCode;

/// Run the maintenance binary.
pub fn run_app(cli: Cli) -> Result<ExitCode> {
    logging::init_logging(cli.verbose, cli.quiet);

    let config = Config::try_load(cli.config.as_deref())?;

    match &cli.command {
        Commands::Stats(args) => stats(&open_store(&cli, &config)?, args),
        Commands::List(args) => list(&open_store(&cli, &config)?, args),
        Commands::Verify(args) => verify(&open_store(&cli, &config)?, args),
        Commands::Compact(args) => compact(&open_store(&cli, &config)?, &cli.base_dir, args),
        Commands::InitConfig(args) => init_config(&config, args),
    }
}

/// Open the store named by `--store`, or the configured one under
/// `--base-dir`. The file must already exist.
fn open_store(cli: &Cli, config: &Config) -> Result<ThumbnailStore> {
    let path = cli
        .store
        .clone()
        .unwrap_or_else(|| config.store_path(&cli.base_dir));
    if !path.is_file() {
        return Err(cache::CacheError::Open {
            path,
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        }
        .into());
    }
    log::debug!("Opening store {}", path.display());
    Ok(ThumbnailStore::try_open(path, config.store_options())?)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn stats(store: &ThumbnailStore, args: &OutputArgs) -> Result<ExitCode> {
    let stats = store.stats();
    if args.json {
        print_json(&stats)?;
    } else {
        println!("Store:      {}", store.path().display());
        println!("Keys:       {}", stats.keys);
        println!("File size:  {}", ByteSize(stats.file_bytes));
        println!("Live:       {}", ByteSize(stats.live_bytes));
        println!("Dead:       {}", ByteSize(stats.dead_bytes));
    }
    Ok(ExitCode::Success)
}

fn list(store: &ThumbnailStore, args: &ListArgs) -> Result<ExitCode> {
    let entries: Vec<_> = store
        .entries()
        .into_iter()
        .filter(|(key, _)| args.prefix.as_deref().map_or(true, |p| key.starts_with(p)))
        .collect();

    if args.output.json {
        let rows: Vec<_> = entries
            .iter()
            .map(|(key, entry)| serde_json::json!({ "key": key, "entry": entry }))
            .collect();
        print_json(&rows)?;
    } else {
        for (key, entry) in &entries {
            println!(
                "{}\t{}x{}\t{}\t{}\t{}",
                key,
                entry.meta.width,
                entry.meta.height,
                entry.meta.format,
                ByteSize(u64::from(entry.length)),
                entry.last_modified
            );
        }
    }
    Ok(ExitCode::Success)
}

fn verify(store: &ThumbnailStore, args: &OutputArgs) -> Result<ExitCode> {
    let report = store
        .recovery_report()
        .context("Store opened without a recovery report")?;
    if args.json {
        print_json(&report)?;
    } else {
        println!("Records:    {}", report.records_scanned);
        println!("Skipped:    {}", report.records_skipped);
        println!("Keys:       {}", report.keys_indexed);
        println!("Truncated:  {}", ByteSize(report.truncated_bytes));
    }
    Ok(if report.truncated_bytes > 0 {
        ExitCode::Repaired
    } else {
        ExitCode::Success
    })
}

fn compact(store: &ThumbnailStore, base_dir: &Path, args: &CompactArgs) -> Result<ExitCode> {
    let assets = FsAssetIndex::scan(base_dir, store.rules());
    log::info!("Indexed {} packages under {}", assets.package_count(), base_dir.display());
    let resolver = LivenessResolver::new(&assets, store.rules(), base_dir);

    if args.dry_run {
        let dead: Vec<String> = store
            .entries()
            .into_iter()
            .map(|(key, _)| key)
            .filter(|key| !resolver.is_live(key))
            .collect();
        if args.output.json {
            print_json(&dead)?;
        } else {
            for key in &dead {
                println!("{}", key);
            }
            println!("{} dead keys", dead.len());
        }
        return Ok(ExitCode::Success);
    }

    let report = store.try_clean(|key| resolver.is_live(key))?;
    if args.output.json {
        print_json(&report)?;
    } else {
        println!(
            "Removed {} of {} keys ({} -> {})",
            report.removed,
            report.keys_scanned,
            ByteSize(report.bytes_before),
            ByteSize(report.bytes_after)
        );
    }
    Ok(ExitCode::Success)
}

fn init_config(config: &Config, args: &InitConfigArgs) -> Result<ExitCode> {
    let path = args
        .path
        .clone()
        .or_else(Config::default_config_path)
        .context("Failed to determine config directory")?;
    if path.exists() && !args.force {
        anyhow::bail!(
            "Config already exists: {} (use --force to overwrite)",
            path.display()
        );
    }
    config.save(&path)?;
    println!("Wrote {}", path.display());
    Ok(ExitCode::Success)
}
