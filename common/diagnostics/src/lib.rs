// Copyright 2026 The Interpose Project Authors
// Use of this source code is governed by an MIT-style license that can be
// found in the LICENSE file.

//! A first-class diagnostic facility threaded explicitly through the
//! indexer, closure builder and resolver, rather than relying on
//! module-level mutable state.
//!
//! The reference tool this is modelled on kept its warning-dedup sets as
//! function attributes (`if not hasattr(fn, 'warned'): fn.warned = set()`)
//! and its error policy as a process-global boolean. Both decisions are
//! collapsed into one object here: a [`Diagnostics`] instance owns the
//! dedup state for exactly one analysis run and carries the error
//! [`Policy`] that governs what a fatal call does.

use std::collections::HashSet;
use std::sync::Mutex;

use anyhow::{anyhow, Result};

/// What a call to [`Diagnostics::error`] does when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// Print the message and terminate the process immediately. Used by
    /// the analyser, whose fatals (missing package, corrupt schema) are
    /// unrecoverable.
    ExitOnError,
    /// Return the message as an `Err` to the caller. Used by the indexer,
    /// whose per-file fatals should become a catchable error attached to
    /// the owning package rather than aborting the whole run.
    RaiseOnError,
}

/// Per-run diagnostic channel. Cheap to construct; share one instance (via
/// `Arc` if it must cross a Task Pool worker boundary) for the duration of
/// one `index_packages` or `find_interposes` invocation.
pub struct Diagnostics {
    policy: Policy,
    prog_name: String,
    warned: Mutex<HashSet<(String, String)>>,
}

impl Diagnostics {
    pub fn new(policy: Policy, prog_name: impl Into<String>) -> Self {
        Diagnostics {
            policy,
            prog_name: prog_name.into(),
            warned: Mutex::new(HashSet::new()),
        }
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }

    /// Emits a warning, deduplicated per `(category, key)` for the lifetime
    /// of this `Diagnostics` instance. `key` identifies the specific
    /// instance of the warning (e.g. a symbol name, or a SONAME); `category`
    /// groups warnings that should be deduplicated independently of each
    /// other (e.g. "unresolved-import" vs. "duplicate-soname").
    pub fn warn(&self, category: &str, key: &str, message: &str) {
        let mut warned = self.warned.lock().unwrap();
        if warned.insert((category.to_string(), key.to_string())) {
            tracing::warn!(target: "diagnostics", category, key, "{}: warning: {}", self.prog_name, message);
        }
    }

    /// Returns the `(category, key)` pairs warned about so far. Mainly
    /// useful for tests that want to assert a warning fired without
    /// scraping log output.
    pub fn warned_keys(&self) -> Vec<(String, String)> {
        self.warned.lock().unwrap().iter().cloned().collect()
    }

    /// A recoverable, policy-governed failure. Under [`Policy::ExitOnError`]
    /// this prints and terminates the process; under
    /// [`Policy::RaiseOnError`] it returns `Err` instead.
    pub fn error(&self, message: impl Into<String>) -> Result<()> {
        let message = message.into();
        eprintln!("{}: error: {}", self.prog_name, message);
        match self.policy {
            Policy::ExitOnError => std::process::exit(1),
            Policy::RaiseOnError => Err(anyhow!(message)),
        }
    }

    /// A programmer error (store corruption, duplicate package names):
    /// fatal regardless of policy.
    pub fn fatal(&self, message: impl Into<String>) -> ! {
        eprintln!("{}: fatal error: {}", self.prog_name, message.into());
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warn_dedups_per_category_and_key() {
        let diag = Diagnostics::new(Policy::RaiseOnError, "test");
        diag.warn("duplicate-soname", "libfoo.so.1", "first");
        diag.warn("duplicate-soname", "libfoo.so.1", "second call, should be suppressed");
        diag.warn("duplicate-soname", "libbar.so.1", "different key, not suppressed");
        diag.warn("unresolved-import", "libfoo.so.1", "different category, not suppressed");
        let warned = diag.warned.lock().unwrap();
        assert_eq!(warned.len(), 3);
    }

    #[test]
    fn raise_on_error_returns_err_instead_of_exiting() {
        let diag = Diagnostics::new(Policy::RaiseOnError, "test");
        let result = diag.error("boom");
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().to_string(), "boom");
    }
}
