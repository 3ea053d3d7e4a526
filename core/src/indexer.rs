// Copyright 2026 The Interpose Project Authors
// Use of this source code is governed by an MIT-style license that can be
// found in the LICENSE file.

//! Per-package orchestration: resolve a source name, materialize the
//! package's files, parse every ELF among them, and persist the result.

use std::path::Path;

use anyhow::{Context, Result};
use dbstore::Store;
use diagnostics::Diagnostics;
use elfmodel::{Object, Package};
use walkdir::WalkDir;

use crate::probes::{FileTypeProbe, PackageMaterializer, PackageMetadataProbe};

pub struct PackageIndexResult {
    pub package: Package,
    pub num_objects: usize,
    pub num_deps: usize,
    pub num_symbols: usize,
}

pub struct Indexer<'a> {
    pub file_type_probe: &'a dyn FileTypeProbe,
    pub metadata_probe: &'a dyn PackageMetadataProbe,
    pub materializer: &'a dyn PackageMaterializer,
    pub diag: &'a Diagnostics,
}

impl<'a> Indexer<'a> {
    /// Indexes one package into `scratch_root/<name>` and persists it (and
    /// whatever objects were successfully parsed) through `store`.
    ///
    /// A failure to resolve the source name or to materialize the package is
    /// fatal for the whole package: no objects are indexed, and the package
    /// is persisted with an error message. A failure to classify or parse
    /// one file only marks the package `has_errors` and is otherwise skipped;
    /// the rest of the package's files are still indexed.
    pub fn index_package(
        &self,
        mut pkg: Package,
        scratch_root: &Path,
        store: &mut Store,
    ) -> Result<PackageIndexResult> {
        let wd = scratch_root.join(&pkg.name);
        std::fs::create_dir(&wd).with_context(|| format!("creating {wd:?}"))?;

        let mut objects = Vec::new();
        let mut error_message = None;

        match self.stage_package(&pkg, &wd) {
            Ok(source_name) => {
                pkg.source_name = Some(source_name);
                let (parsed, file_errors) = self.walk_and_parse(&wd);
                objects = parsed;
                pkg.has_errors = !file_errors.is_empty();
                if !file_errors.is_empty() {
                    error_message = Some(file_errors.join("; "));
                }
            }
            Err(err) => {
                tracing::debug!(package = %pkg.name, error = %err, "package-level indexing failure");
                error_message = Some(format!("{err:#}"));
                pkg.has_errors = true;
            }
        }

        store.serialize_package(&mut pkg, error_message.as_deref())?;
        let package_id = pkg.id.context("package was not assigned an id by the store")?;

        let num_objects = objects.len();
        let mut num_deps = 0;
        let mut num_symbols = 0;
        for mut obj in objects {
            num_deps += obj.deps.len();
            num_symbols += obj.imports.len() + obj.exports.len();
            store.serialize_object(&mut obj, package_id)?;
        }

        Ok(PackageIndexResult {
            package: pkg,
            num_objects,
            num_deps,
            num_symbols,
        })
    }

    fn stage_package(&self, pkg: &Package, wd: &Path) -> Result<String> {
        let source_name = self
            .metadata_probe
            .source_name(&pkg.name)
            .context("resolving source package name")?;
        self.materializer
            .materialize(&pkg.name, wd)
            .context("materializing package")?;
        Ok(source_name)
    }

    /// Walks `wd` for regular, non-symlink files and parses the ones the
    /// file-type probe identifies as ELF. Returns the parsed objects and one
    /// message per file that failed to classify or parse, so the caller can
    /// both warn about each failure and persist a summary against the
    /// package (a per-file failure still marks the whole package
    /// `has_errors`, even though indexing continues).
    fn walk_and_parse(&self, wd: &Path) -> (Vec<Object>, Vec<String>) {
        let mut objects = Vec::new();
        let mut errors = Vec::new();

        for entry in WalkDir::new(wd).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            match self.file_type_probe.file_type(path) {
                Ok(file_type) if file_type.starts_with("ELF ") => {
                    match elfreader::read_object(path, &file_type) {
                        Ok(obj) => objects.push(obj),
                        Err(err) => {
                            let message = format!("{}: {err:#}", path.display());
                            self.diag.warn("elf-parse-error", &path.to_string_lossy(), &message);
                            errors.push(message);
                        }
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    let message = format!("{}: {err:#}", path.display());
                    self.diag.warn("file-type-probe-error", &path.to_string_lossy(), &message);
                    errors.push(message);
                }
            }
        }

        (objects, errors)
    }
}
