// Copyright 2026 The Interpose Project Authors
// Use of this source code is governed by an MIT-style license that can be
// found in the LICENSE file.

use tracing_subscriber::filter::{EnvFilter, LevelFilter};

/// RAII handle for the process-wide subscriber. Kept around purely so
/// `init_logging`'s caller has something to hold onto in `main`; dropping
/// it does not tear the subscriber down (there is nothing to flush, unlike
/// the file/trace-export sinks a heavier logging setup might use).
pub struct LogGuard(());

/// Sets up a stderr-writing `tracing` subscriber. `verbose` is the number of
/// times `-v`/`--verbose` was given on the command line; it picks a default
/// level, but `RUST_LOG` still takes precedence when set.
pub fn init_logging(verbose: u8) -> LogGuard {
    let default_level = match verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    // Ignore the error: a second call (e.g. from a test harness that has
    // already installed a subscriber) would otherwise be fatal, and we'd
    // rather keep running with whatever subscriber is already in place.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    LogGuard(())
}
