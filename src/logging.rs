//! Logging setup for the maintenance binary.
//!
//! The library only emits records through the `log` facade; embedding
//! applications install whatever logger they like. The `thumbstore` binary
//! uses `env_logger`, with the level taken from (in priority order):
//!
//! 1. `THUMBSTORE_LOG`, then `RUST_LOG` (env_logger filter syntax)
//! 2. CLI flags: `--quiet` (errors only) or `-v`/`-vv` (debug/trace)
//! 3. Default: info
//!
//! # Example
//!
//! ```rust,no_run
//! use thumbstore::logging::init_logging;
//!
//! init_logging(1, false);
//! log::debug!("Store opened");
//! ```

use env_logger::Builder;
use log::LevelFilter;
use std::env;
use std::io::Write;

/// Environment variable checked before `RUST_LOG`.
pub const LOG_ENV: &str = "THUMBSTORE_LOG";

/// Initialize logging from CLI verbosity flags.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_logging(verbose: u8, quiet: bool) {
    let mut builder = Builder::new();

    let filter = env_filter();
    match &filter {
        Some(filters) => {
            builder.parse_filters(filters);
        }
        None => {
            builder.filter_level(determine_level(verbose, quiet));
        }
    }
    configure_format(&mut builder, verbose);

    if builder.try_init().is_err() {
        return;
    }
    match filter {
        Some(filters) => log::debug!("Logging initialized from environment: {}", filters),
        None => log::debug!(
            "Logging initialized at level: {:?}",
            determine_level(verbose, quiet)
        ),
    }
}

/// Filter directives from `THUMBSTORE_LOG` or `RUST_LOG`, if either is set.
fn env_filter() -> Option<String> {
    env::var(LOG_ENV)
        .ok()
        .or_else(|| env::var("RUST_LOG").ok())
        .filter(|filters| !filters.trim().is_empty())
}

/// Map CLI flags to a level. `quiet` wins over `verbose`.
fn determine_level(verbose: u8, quiet: bool) -> LevelFilter {
    if quiet {
        return LevelFilter::Error;
    }
    match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Debug builds log timestamps, plus module paths once `-v` is given.
/// Release builds log level and message only.
fn configure_format(builder: &mut Builder, verbose: u8) {
    #[cfg(debug_assertions)]
    {
        builder.format(move |buf, record| {
            let timestamp = buf.timestamp_seconds();
            let level = record.level();
            let level_style = buf.default_level_style(level);
            if verbose >= 1 {
                writeln!(
                    buf,
                    "{} {level_style}{:<5}{level_style:#} [{}] {}",
                    timestamp,
                    level,
                    record.module_path().unwrap_or("unknown"),
                    record.args()
                )
            } else {
                writeln!(
                    buf,
                    "{} {level_style}{:<5}{level_style:#} {}",
                    timestamp,
                    level,
                    record.args()
                )
            }
        });
    }

    #[cfg(not(debug_assertions))]
    {
        let _ = verbose;
        builder.format(|buf, record| {
            let level = record.level();
            let level_style = buf.default_level_style(level);
            writeln!(
                buf,
                "{level_style}{:<5}{level_style:#} {}",
                level,
                record.args()
            )
        });
    }
}
