// Copyright 2026 The Interpose Project Authors
// Use of this source code is governed by an MIT-style license that can be
// found in the LICENSE file.

//! The two-phase analysis engine: index ELF objects into a [`dbstore::Store`]
//! (see [`indexer`]), then reload them to simulate dynamic-linker symbol
//! resolution across a transitive library closure (see [`closure`] and
//! [`resolver`]).

pub mod closure;
pub mod indexer;
pub mod probes;
pub mod resolver;
pub mod stats;

use anyhow::Result;
use dbstore::Store;
use diagnostics::Diagnostics;
use elfmodel::Package;

pub use closure::{build_closure, ClosureNode};
pub use indexer::{Indexer, PackageIndexResult};
pub use resolver::{resolve, ResolveReport};

/// Runs the analyser over every executable object of `pkg`: builds each
/// one's load closure and resolves it, aggregating the per-object reports.
/// This is the unit of work `find_interposes` hands to the Task Pool.
pub fn analyze_package(store: &Store, pkg: &Package, diag: &Diagnostics) -> Result<ResolveReport> {
    let mut total = ResolveReport::default();
    for root_obj in store.deserialize_pkg_objects(pkg)? {
        let root_name = root_obj.name.clone();
        let closure = build_closure(store, pkg, root_obj, diag)?;
        let report = resolve(&closure, &pkg.name, &root_name, diag);
        total.duplicate_definitions += report.duplicate_definitions;
        total.unresolved_imports += report.unresolved_imports;
    }
    Ok(total)
}
