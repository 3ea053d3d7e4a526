// Copyright 2026 The Interpose Project Authors
// Use of this source code is governed by an MIT-style license that can be
// found in the LICENSE file.

//! The relational store backing the analysis engine: packages, objects,
//! their dependency names and their dynamic symbols.
//!
//! Two [`ConnectionMode`]s are offered: [`ConnectionMode::Consistent`]
//! (foreign keys and uniqueness enforced; used by the analyser, which only
//! reads) and [`ConnectionMode::BulkInsert`] (those checks relaxed, and a
//! handful of SQLite pragmas tuned for a long run of inserts; used by the
//! indexer).

use std::path::Path;

use anyhow::{Context, Result};
use diagnostics::Diagnostics;
use elfmodel::{sentinel_to_option, option_to_sentinel, Direction, Object, Package, RecordId, Symbol};
use rusqlite::{params, Connection, OptionalExtension};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    Consistent,
    BulkInsert,
}

pub struct Store {
    conn: Connection,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS packages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    source_name TEXT NOT NULL DEFAULT ''
);
CREATE TABLE IF NOT EXISTS errors (
    package_id INTEGER NOT NULL REFERENCES packages(id),
    message TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS objects (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    soname TEXT NOT NULL DEFAULT '',
    is_shlib INTEGER NOT NULL,
    is_symbolic INTEGER NOT NULL,
    package_id INTEGER NOT NULL REFERENCES packages(id)
);
CREATE INDEX IF NOT EXISTS objects_soname_idx ON objects(soname);
CREATE INDEX IF NOT EXISTS objects_package_id_idx ON objects(package_id);
CREATE TABLE IF NOT EXISTS shlib_deps (
    object_id INTEGER NOT NULL REFERENCES objects(id),
    dep_name TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS shlib_deps_object_id_idx ON shlib_deps(object_id);
CREATE TABLE IF NOT EXISTS symbols (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    is_weak INTEGER NOT NULL,
    is_protected INTEGER NOT NULL,
    direction TEXT NOT NULL,
    object_id INTEGER NOT NULL REFERENCES objects(id)
);
CREATE INDEX IF NOT EXISTS symbols_object_id_idx ON symbols(object_id);
";

impl Store {
    pub fn open(path: &Path, mode: ConnectionMode) -> Result<Self> {
        let conn = Connection::open(path).with_context(|| format!("open {path:?}"))?;
        Self::from_connection(conn, mode)
    }

    pub fn open_in_memory(mode: ConnectionMode) -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory sqlite database")?;
        Self::from_connection(conn, mode)
    }

    fn from_connection(conn: Connection, mode: ConnectionMode) -> Result<Self> {
        tracing::debug!(?mode, "opening store connection");
        // Several worker threads open their own connection to the same
        // database file; give a writer blocked by another one a chance to
        // retry instead of failing the item outright with SQLITE_BUSY.
        conn.busy_timeout(std::time::Duration::from_secs(30))?;
        match mode {
            ConnectionMode::Consistent => {
                conn.pragma_update(None, "foreign_keys", "ON")?;
            }
            ConnectionMode::BulkInsert => {
                // Mirrors the reference tool's bulk-load tuning: relax
                // foreign-key/uniqueness checking and avoid fsync-per-insert.
                conn.pragma_update(None, "foreign_keys", "OFF")?;
                conn.pragma_update(None, "synchronous", "OFF")?;
                conn.pragma_update(None, "journal_mode", "MEMORY")?;
            }
        }
        conn.execute_batch(SCHEMA).context("creating schema")?;
        Ok(Store { conn })
    }

    /// Inserts a package, assigning `pkg.id`, and records at most one error
    /// message for it.
    pub fn serialize_package(&self, pkg: &mut Package, error_message: Option<&str>) -> Result<()> {
        self.conn.execute(
            "INSERT INTO packages (name, source_name) VALUES (?1, ?2)",
            params![pkg.name, option_to_sentinel(&pkg.source_name)],
        )?;
        let id = self.conn.last_insert_rowid();
        pkg.id = Some(id);
        if let Some(message) = error_message {
            self.conn.execute(
                "INSERT INTO errors (package_id, message) VALUES (?1, ?2)",
                params![id, message],
            )?;
        }
        Ok(())
    }

    /// Inserts an object, its dependency names and its symbols as one
    /// logical unit, assigning `obj.id`.
    pub fn serialize_object(&mut self, obj: &mut Object, package_id: RecordId) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO objects (name, soname, is_shlib, is_symbolic, package_id) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                obj.name,
                option_to_sentinel(&obj.soname),
                obj.is_shlib,
                obj.is_symbolic,
                package_id,
            ],
        )?;
        let object_id = tx.last_insert_rowid();
        obj.id = Some(object_id);

        {
            let mut insert_dep =
                tx.prepare("INSERT INTO shlib_deps (object_id, dep_name) VALUES (?1, ?2)")?;
            for dep in &obj.deps {
                insert_dep.execute(params![object_id, dep])?;
            }
        }
        {
            let mut insert_sym = tx.prepare(
                "INSERT INTO symbols (name, is_weak, is_protected, direction, object_id) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (sym, direction) in obj
                .imports
                .iter()
                .map(|s| (s, Direction::Import))
                .chain(obj.exports.iter().map(|s| (s, Direction::Export)))
            {
                insert_sym.execute(params![
                    sym.name,
                    sym.is_weak,
                    sym.is_protected,
                    direction.as_str(),
                    object_id
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    pub fn deserialize_all_packages(&self) -> Result<Vec<Package>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, source_name FROM packages")?;
        let rows = stmt
            .query_map([], |row| self.row_to_package(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Looks up a package by name. Fatal (via `diag`) if zero or more than
    /// one package matches, since package names are supposed to be unique.
    pub fn deserialize_package(&self, name: &str, diag: &Diagnostics) -> Result<Package> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, source_name FROM packages WHERE name = ?1")?;
        let rows = stmt
            .query_map(params![name], |row| self.row_to_package(row))?
            .collect::<Result<Vec<_>, _>>()?;
        match rows.len() {
            0 => diag.fatal(format!("found no package named '{name}'")),
            1 => Ok(rows.into_iter().next().unwrap()),
            _ => diag.fatal(format!("found multiple packages named '{name}'")),
        }
    }

    fn row_to_package(&self, row: &rusqlite::Row) -> rusqlite::Result<Package> {
        let id: RecordId = row.get(0)?;
        let name: String = row.get(1)?;
        let source_name: String = row.get(2)?;
        let has_errors = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM errors WHERE package_id = ?1",
                params![id],
                |r| r.get::<_, i64>(0),
            )
            .unwrap_or(0)
            > 0;
        Ok(Package {
            id: Some(id),
            name,
            source_name: sentinel_to_option(source_name),
            has_errors,
        })
    }

    /// Returns the non-shared-library objects (executables and PIEs) of a
    /// package: the roots of a load closure.
    pub fn deserialize_pkg_objects(&self, pkg: &Package) -> Result<Vec<Object>> {
        let package_id = pkg.id.context("package has not been persisted")?;
        let mut stmt = self.conn.prepare(
            "SELECT id, name, soname, is_shlib, is_symbolic FROM objects \
             WHERE package_id = ?1 AND is_shlib = 0",
        )?;
        let rows = stmt
            .query_map(params![package_id], |row| self.row_to_object(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn row_to_object(&self, row: &rusqlite::Row) -> rusqlite::Result<Object> {
        let id: RecordId = row.get(0)?;
        let name: String = row.get(1)?;
        let soname: String = row.get(2)?;
        let is_shlib: bool = row.get(3)?;
        let is_symbolic: bool = row.get(4)?;
        Ok(Object {
            id: Some(id),
            name,
            soname: sentinel_to_option(soname),
            is_shlib,
            is_symbolic,
            deps: Vec::new(),
            imports: Vec::new(),
            exports: Vec::new(),
        })
    }

    /// Returns the direct dependency objects of `obj`, joining its recorded
    /// `DT_NEEDED` names against other objects' `soname`. When more than one
    /// object shares a SONAME, the first (lowest id) wins and a warning is
    /// emitted at most once per SONAME for the lifetime of `diag`.
    pub fn deserialize_deps(&self, obj: &Object, diag: &Diagnostics) -> Result<Vec<Object>> {
        let object_id = obj.id.context("object has not been persisted")?;

        let mut dep_names_stmt = self
            .conn
            .prepare("SELECT dep_name FROM shlib_deps WHERE object_id = ?1")?;
        let dep_names = dep_names_stmt
            .query_map(params![object_id], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut stmt = self.conn.prepare(
            "SELECT o.id, o.name, o.soname, o.is_shlib, o.is_symbolic \
             FROM shlib_deps d \
             JOIN objects o ON o.soname = d.dep_name \
             WHERE d.object_id = ?1 AND o.soname != '' \
             ORDER BY d.dep_name, o.id",
        )?;
        let candidates = stmt
            .query_map(params![object_id], |row| self.row_to_object(row))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut deps = Vec::new();
        let mut seen_sonames = std::collections::HashSet::new();
        for candidate in candidates {
            let soname = candidate.soname.clone().expect("filtered to non-empty soname");
            if seen_sonames.insert(soname.clone()) {
                deps.push(candidate);
            } else {
                diag.warn(
                    "duplicate-soname",
                    &soname,
                    &format!("multiple objects implement SONAME '{soname}'; keeping the first"),
                );
            }
        }

        for dep_name in &dep_names {
            if !seen_sonames.contains(dep_name) {
                diag.warn(
                    "dependency-join-failure",
                    dep_name,
                    &format!(
                        "'{}' needs '{dep_name}', but no indexed object has that SONAME",
                        obj.name
                    ),
                );
            }
        }

        Ok(deps)
    }

    pub fn deserialize_syms(&self, obj: &Object) -> Result<(Vec<Symbol>, Vec<Symbol>)> {
        let object_id = obj.id.context("object has not been persisted")?;
        let mut stmt = self.conn.prepare(
            "SELECT id, name, is_weak, is_protected, direction FROM symbols WHERE object_id = ?1",
        )?;
        let mut imports = Vec::new();
        let mut exports = Vec::new();
        let rows = stmt.query_map(params![object_id], |row| {
            let id: RecordId = row.get(0)?;
            let name: String = row.get(1)?;
            let is_weak: bool = row.get(2)?;
            let is_protected: bool = row.get(3)?;
            let direction: String = row.get(4)?;
            Ok((
                Symbol {
                    id: Some(id),
                    name,
                    is_weak,
                    is_protected,
                },
                direction,
            ))
        })?;
        for row in rows {
            let (sym, direction) = row?;
            match Direction::parse(&direction) {
                Some(Direction::Import) => imports.push(sym),
                Some(Direction::Export) => exports.push(sym),
                None => anyhow::bail!("unknown symbol direction tag: {direction:?}"),
            }
        }
        Ok((imports, exports))
    }

    /// Looks up the package an object belongs to. Used by the closure
    /// builder, which needs each dependency's owning package (for its
    /// `source_name`) to apply the resolver's allow-lists.
    pub fn deserialize_owning_package(&self, obj: &Object) -> Result<Package> {
        let object_id = obj.id.context("object has not been persisted")?;
        let package_id: RecordId = self.conn.query_row(
            "SELECT package_id FROM objects WHERE id = ?1",
            params![object_id],
            |row| row.get(0),
        )?;
        self.conn
            .query_row(
                "SELECT id, name, source_name FROM packages WHERE id = ?1",
                params![package_id],
                |row| self.row_to_package(row),
            )
            .map_err(Into::into)
    }

    /// Looks a single object up by (package_id, soname); used in tests to
    /// set up dependency graphs without going through the ELF reader.
    #[cfg(test)]
    fn find_object_id(&self, package_id: RecordId, name: &str) -> Result<RecordId> {
        self.conn
            .query_row(
                "SELECT id FROM objects WHERE package_id = ?1 AND name = ?2",
                params![package_id, name],
                |row| row.get(0),
            )
            .optional()?
            .context("object not found")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diagnostics::Policy;

    fn test_diag() -> Diagnostics {
        Diagnostics::new(Policy::RaiseOnError, "test")
    }

    #[test]
    fn package_round_trips_up_to_assigned_id() -> Result<()> {
        let store = Store::open_in_memory(ConnectionMode::Consistent)?;
        let mut pkg = Package::new("libfoo1");
        pkg.source_name = Some("foo".to_string());
        store.serialize_package(&mut pkg, None)?;
        assert!(pkg.id.is_some());

        let diag = test_diag();
        let reloaded = store.deserialize_package("libfoo1", &diag)?;
        assert_eq!(reloaded.id, pkg.id);
        assert_eq!(reloaded.name, pkg.name);
        assert_eq!(reloaded.source_name, pkg.source_name);
        assert!(!reloaded.has_errors);
        Ok(())
    }

    #[test]
    fn package_with_error_message_has_errors_flag_set() -> Result<()> {
        let store = Store::open_in_memory(ConnectionMode::Consistent)?;
        let mut pkg = Package::new("broken-pkg");
        store.serialize_package(&mut pkg, Some("extraction failed"))?;

        let all = store.deserialize_all_packages()?;
        assert_eq!(all.len(), 1);
        assert!(all[0].has_errors);
        Ok(())
    }

    #[test]
    fn empty_source_name_round_trips_as_none() -> Result<()> {
        let store = Store::open_in_memory(ConnectionMode::Consistent)?;
        let mut pkg = Package::new("no-source-name");
        store.serialize_package(&mut pkg, None)?;

        let diag = test_diag();
        let reloaded = store.deserialize_package("no-source-name", &diag)?;
        assert_eq!(reloaded.source_name, None);
        Ok(())
    }

    #[test]
    fn object_symbol_counts_are_preserved_through_reload() -> Result<()> {
        let mut store = Store::open_in_memory(ConnectionMode::Consistent)?;
        let mut pkg = Package::new("pkg");
        store.serialize_package(&mut pkg, None)?;

        let mut obj = Object::new(
            "a.out",
            None,
            false,
            false,
            vec!["libfoo.so.1".to_string()],
            vec![Symbol::new("bar", false, false)],
            vec![Symbol::new("baz", false, false), Symbol::new("qux", true, false)],
        );
        let before = obj.imports.len() + obj.exports.len();
        store.serialize_object(&mut obj, pkg.id.unwrap())?;

        let (imports, exports) = store.deserialize_syms(&obj)?;
        assert_eq!(imports.len() + exports.len(), before);
        assert_eq!(imports.len(), 1);
        assert_eq!(exports.len(), 2);
        Ok(())
    }

    #[test]
    fn deserialize_pkg_objects_excludes_shared_libraries() -> Result<()> {
        let mut store = Store::open_in_memory(ConnectionMode::Consistent)?;
        let mut pkg = Package::new("pkg");
        store.serialize_package(&mut pkg, None)?;
        let package_id = pkg.id.unwrap();

        let mut exe = Object::new("a.out", None, false, false, vec![], vec![], vec![]);
        store.serialize_object(&mut exe, package_id)?;
        let mut lib = Object::new(
            "libfoo.so.1",
            Some("libfoo.so.1".to_string()),
            true,
            false,
            vec![],
            vec![],
            vec![],
        );
        store.serialize_object(&mut lib, package_id)?;

        let roots = store.deserialize_pkg_objects(&pkg)?;
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].name, "a.out");
        Ok(())
    }

    #[test]
    fn duplicate_soname_picks_first_and_warns_once() -> Result<()> {
        let mut store = Store::open_in_memory(ConnectionMode::Consistent)?;
        let mut pkg = Package::new("pkg");
        store.serialize_package(&mut pkg, None)?;
        let package_id = pkg.id.unwrap();

        let mut root = Object::new(
            "a.out",
            None,
            false,
            false,
            vec!["libfoo.so.1".to_string()],
            vec![],
            vec![],
        );
        store.serialize_object(&mut root, package_id)?;

        let mut lib_a = Object::new(
            "libfoo-a.so.1",
            Some("libfoo.so.1".to_string()),
            true,
            false,
            vec![],
            vec![],
            vec![],
        );
        store.serialize_object(&mut lib_a, package_id)?;
        let mut lib_b = Object::new(
            "libfoo-b.so.1",
            Some("libfoo.so.1".to_string()),
            true,
            false,
            vec![],
            vec![],
            vec![],
        );
        store.serialize_object(&mut lib_b, package_id)?;

        let diag = test_diag();
        let deps = store.deserialize_deps(&root, &diag)?;
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].id, lib_a.id, "first-inserted object wins");
        Ok(())
    }

    #[test]
    fn unresolved_dep_name_is_dropped_with_a_warning() -> Result<()> {
        let mut store = Store::open_in_memory(ConnectionMode::Consistent)?;
        let mut pkg = Package::new("pkg");
        store.serialize_package(&mut pkg, None)?;
        let package_id = pkg.id.unwrap();

        let mut root = Object::new(
            "a.out",
            None,
            false,
            false,
            vec!["libmissing.so.1".to_string()],
            vec![],
            vec![],
        );
        store.serialize_object(&mut root, package_id)?;

        let diag = test_diag();
        let deps = store.deserialize_deps(&root, &diag)?;
        assert!(deps.is_empty());
        assert!(diag
            .warned_keys()
            .contains(&("dependency-join-failure".to_string(), "libmissing.so.1".to_string())));
        Ok(())
    }

    #[test]
    fn find_object_id_locates_by_name() -> Result<()> {
        let mut store = Store::open_in_memory(ConnectionMode::Consistent)?;
        let mut pkg = Package::new("pkg");
        store.serialize_package(&mut pkg, None)?;
        let mut obj = Object::new("a.out", None, false, false, vec![], vec![], vec![]);
        store.serialize_object(&mut obj, pkg.id.unwrap())?;
        let found = store.find_object_id(pkg.id.unwrap(), "a.out")?;
        assert_eq!(Some(found), obj.id);
        Ok(())
    }

    #[test]
    fn deserialize_owning_package_finds_parent() -> Result<()> {
        let mut store = Store::open_in_memory(ConnectionMode::Consistent)?;
        let mut pkg = Package::new("libfoo1");
        pkg.source_name = Some("foo".to_string());
        store.serialize_package(&mut pkg, None)?;
        let mut obj = Object::new("libfoo.so.1", Some("libfoo.so.1".to_string()), true, false, vec![], vec![], vec![]);
        store.serialize_object(&mut obj, pkg.id.unwrap())?;

        let owner = store.deserialize_owning_package(&obj)?;
        assert_eq!(owner.name, "libfoo1");
        assert_eq!(owner.source_name, Some("foo".to_string()));
        Ok(())
    }
}
