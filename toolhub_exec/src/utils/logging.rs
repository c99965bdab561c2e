//! Logging initialization.
//!
//! Sets up the global `tracing` subscriber once per process. Verbosity comes
//! from `RUST_LOG` when set, otherwise from the level passed in (with the
//! toolhub crates raised to `debug`). File logging writes a daily-rolling
//! file into the user cache directory; if that directory cannot be created
//! or written, output falls back to stderr with ANSI colors.

use anyhow::Result;
use directories::ProjectDirs;
use std::{io::stderr, sync::Once};
use tracing_subscriber::{EnvFilter, fmt::layer, prelude::*};

static INIT: Once = Once::new();

pub fn init_test_logging() {
    init_logging("trace", false).expect("Failed to initialize test logging");
}

/// Initializes the logging system.
///
/// Safe to call more than once; only the first call takes effect. With
/// `log_to_file` set, logs go to a daily-rolling file without ANSI colors;
/// otherwise (or on any file setup failure) they go to stderr with colors.
pub fn init_logging(log_level: &str, log_to_file: bool) -> Result<()> {
    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{log_level},toolhub_exec=debug,toolhub_fifo=debug"
            ))
        });

        if log_to_file {
            if let Some(proj_dirs) = ProjectDirs::from("com", "Toolhub", "toolhub") {
                let log_dir = proj_dirs.cache_dir();
                let dir_created = std::fs::create_dir_all(log_dir).is_ok();

                // tracing_appender panics rather than erroring when the
                // directory is unwritable, so probe via catch_unwind.
                let file_appender = if dir_created {
                    std::panic::catch_unwind(|| {
                        tracing_appender::rolling::daily(log_dir, "toolhub.log")
                    })
                    .ok()
                } else {
                    None
                };

                match file_appender {
                    Some(file_appender) => {
                        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
                        tracing_subscriber::registry()
                            .with(env_filter)
                            .with(layer().with_writer(non_blocking).with_ansi(false))
                            .init();
                        // Leak the guard so buffered logs are flushed at exit.
                        Box::leak(Box::new(guard));
                    }
                    None => {
                        tracing_subscriber::registry()
                            .with(env_filter)
                            .with(layer().with_writer(stderr).with_ansi(true))
                            .init();
                    }
                }
            } else {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(layer().with_writer(stderr).with_ansi(true))
                    .init();
            }
        } else {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(layer().with_writer(stderr).with_ansi(true))
                .init();
        }
    });

    Ok(())
}
