// Copyright 2026 The Interpose Project Authors
// Use of this source code is governed by an MIT-style license that can be
// found in the LICENSE file.

//! Startup/shutdown plumbing shared by `index_packages` and
//! `find_interposes`: logging setup and the top-level `Result` handler.

mod logging;

use std::process::ExitCode;

use anyhow::Result;
use itertools::Itertools;

pub use logging::{init_logging, LogGuard};

/// Wraps a CLI `main` function: sets up logging at the requested verbosity,
/// logs the command line at trace level, and converts a returned `Err`
/// into a `FATAL:` message on stderr and a failure exit code.
pub fn cli_main<F>(verbose: u8, main: F) -> ExitCode
where
    F: FnOnce() -> Result<()>,
{
    let _guard = init_logging(verbose);
    log_current_command_line();

    match main() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("FATAL: {}: {:?}", current_process_name(), err);
            ExitCode::FAILURE
        }
    }
}

fn log_current_command_line() {
    let escaped = std::env::args()
        .map(|s| shell_escape::escape(s.into()))
        .join(" ");
    tracing::trace!("COMMAND: {}", escaped);
}

fn current_process_name() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "__unknown__".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    // `ExitCode` deliberately doesn't implement `PartialEq`, so these just
    // check that both paths run to completion without panicking.
    #[test]
    fn cli_main_handles_success() {
        let _code = cli_main(0, || Ok(()));
    }

    #[test]
    fn cli_main_handles_error() {
        let _code = cli_main(0, || anyhow::bail!("boom"));
    }

    #[test]
    fn current_process_name_is_non_empty() {
        assert!(!current_process_name().is_empty());
    }
}
