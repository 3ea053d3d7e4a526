// Copyright 2026 The Interpose Project Authors
// Use of this source code is governed by an MIT-style license that can be
// found in the LICENSE file.

//! The normalised model shared by the ELF reader, the store and the
//! analysis engine: [`Package`], [`Object`] and [`Symbol`].
//!
//! Instances are built in two different ways depending on where they come
//! from: the ELF reader builds a fully-populated [`Object`] straight from a
//! file, while [`dbstore`](../dbstore/index.html) reconstitutes one field at
//! a time while reloading rows. Both paths funnel through the same
//! invariant-preserving constructors so there is exactly one place that
//! decides, for instance, how duplicate symbol names are collapsed.

use std::collections::HashSet;

/// Store-assigned identifier. `None` until the record has been persisted.
pub type RecordId = i64;

/// One binary package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    pub id: Option<RecordId>,
    pub name: String,
    /// The upstream source package, if known. Never the empty string: the
    /// store's `''`-as-null sentinel is translated back to `None` at the
    /// store boundary, never observed here.
    pub source_name: Option<String>,
    pub has_errors: bool,
}

impl Package {
    pub fn new(name: impl Into<String>) -> Self {
        Package {
            id: None,
            name: name.into(),
            source_name: None,
            has_errors: false,
        }
    }
}

/// Whether a dynamic symbol table entry is an import or an export.
///
/// The reference implementation this model is derived from encoded this as
/// a boolean computed from list position at insert time (`i <
/// len(self.imports)`) and re-interpreted as "import means true" at read
/// time. That is self-consistent but fragile to reorder; we use an explicit
/// tag end to end instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Import,
    Export,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Import => "import",
            Direction::Export => "export",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "import" => Some(Direction::Import),
            "export" => Some(Direction::Export),
            _ => None,
        }
    }
}

/// One retained `.dynsym` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub id: Option<RecordId>,
    pub name: String,
    pub is_weak: bool,
    pub is_protected: bool,
}

impl Symbol {
    pub fn new(name: impl Into<String>, is_weak: bool, is_protected: bool) -> Self {
        Symbol {
            id: None,
            name: name.into(),
            is_weak,
            is_protected,
        }
    }
}

/// One ELF file belonging to exactly one package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Object {
    pub id: Option<RecordId>,
    pub name: String,
    pub soname: Option<String>,
    pub is_shlib: bool,
    pub is_symbolic: bool,
    /// `DT_NEEDED` entries, as recorded at index time. At analysis time
    /// these are resolved into [`Object`] references by the closure
    /// builder; the model itself never stores resolved references, since an
    /// `Object` does not point back into the store.
    pub deps: Vec<String>,
    pub imports: Vec<Symbol>,
    pub exports: Vec<Symbol>,
}

impl Object {
    /// Builds an object, collapsing duplicate symbol names within each of
    /// `imports` and `exports` (first occurrence wins). This is how the
    /// model absorbs the fact that it does not carry symbol-version
    /// information: `foo@@GLIBC_2.12` and `foo@GLIBC_2.4` both normalise to
    /// a single `foo`.
    pub fn new(
        name: impl Into<String>,
        soname: Option<String>,
        is_shlib: bool,
        is_symbolic: bool,
        deps: Vec<String>,
        imports: Vec<Symbol>,
        exports: Vec<Symbol>,
    ) -> Self {
        Object {
            id: None,
            name: name.into(),
            soname,
            is_shlib,
            is_symbolic,
            deps,
            imports: dedup_by_name(imports),
            exports: dedup_by_name(exports),
        }
    }
}

/// Collapses a symbol list to unique names, first occurrence wins.
///
/// Idempotent: applying it twice yields the same list, since the second
/// pass sees an already-unique input.
fn dedup_by_name(symbols: Vec<Symbol>) -> Vec<Symbol> {
    let mut seen = HashSet::with_capacity(symbols.len());
    let mut out = Vec::with_capacity(symbols.len());
    for sym in symbols {
        if seen.insert(sym.name.clone()) {
            out.push(sym);
        }
    }
    out
}

/// Converts the store's empty-string null surrogate back to `None`.
pub fn sentinel_to_option(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// Converts an optional string to the store's empty-string null surrogate.
pub fn option_to_sentinel(s: &Option<String>) -> &str {
    s.as_deref().unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_symbol_names_collapse_to_first() {
        let obj = Object::new(
            "libfoo.so.1",
            Some("libfoo.so.1".to_string()),
            true,
            false,
            vec![],
            vec![],
            vec![
                Symbol::new("foo", false, false),
                Symbol::new("foo", true, false),
                Symbol::new("bar", false, false),
            ],
        );
        assert_eq!(obj.exports.len(), 2);
        assert_eq!(obj.exports[0].name, "foo");
        assert!(!obj.exports[0].is_weak, "first occurrence wins");
        assert_eq!(obj.exports[1].name, "bar");
    }

    #[test]
    fn dedup_is_idempotent() {
        let once = dedup_by_name(vec![Symbol::new("a", false, false), Symbol::new("a", true, false)]);
        let twice = dedup_by_name(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn sentinel_round_trips_through_empty_string() {
        assert_eq!(sentinel_to_option(String::new()), None);
        assert_eq!(sentinel_to_option("libc.so.6".to_string()), Some("libc.so.6".to_string()));
        assert_eq!(option_to_sentinel(&None), "");
        assert_eq!(option_to_sentinel(&Some("x".to_string())), "x");
    }

    #[test]
    fn imports_and_exports_are_independent_namespaces() {
        let obj = Object::new(
            "a.out",
            None,
            false,
            false,
            vec![],
            vec![Symbol::new("shared_name", false, false)],
            vec![Symbol::new("shared_name", false, false)],
        );
        // Same name may legitimately appear once on each side (e.g. a copy
        // relocation import vs. an unrelated export); only within one list
        // must names be unique.
        assert_eq!(obj.imports.len(), 1);
        assert_eq!(obj.exports.len(), 1);
    }
}
