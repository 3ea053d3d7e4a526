// Copyright 2026 The Interpose Project Authors
// Use of this source code is governed by an MIT-style license that can be
// found in the LICENSE file.

//! Simulates first-definition-wins symbol resolution over a load closure,
//! reporting duplicate definitions and unresolved imports subject to the
//! allow-lists of known-benign cases.

use std::collections::HashMap;
use std::rc::Rc;

use diagnostics::Diagnostics;
use elfreader::{is_dynamic_linker, is_libc, is_libc_sublib};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::closure::ClosureNode;

static PERL_SYMBOL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(Perl|PL)").unwrap());
static GL_SYMBOL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(egl|gl|glut)[A-Z]").unwrap());

const TOOLCHAIN_DUP_SYMS: &[&str] = &["_init", "_fini"];
const LINKER_SCRIPT_DUP_SYMS: &[&str] = &["__bss_start", "_edata", "_etext", "__etext", "_end"];

/// Counts of what a [`resolve`] run found, for the `find_interposes` CLI's
/// summary; the findings themselves are only reported through `diag`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ResolveReport {
    pub duplicate_definitions: usize,
    pub unresolved_imports: usize,
}

/// Is a duplicate export of `sym_name` between `a` and `b` one of the
/// well-known benign cases (same source package, split binary packages of
/// one source, the dynamic linker re-exporting libc, libc's own sublibraries,
/// or known toolchain/linker-script duplication)?
fn can_ignore_dup(sym_name: &str, a: &ClosureNode, b: &ClosureNode) -> bool {
    if let (Some(src_a), Some(src_b)) = (&a.source_name, &b.source_name) {
        if !src_a.is_empty()
            && !src_b.is_empty()
            && (src_a == src_b || src_a.starts_with(src_b.as_str()) || src_b.starts_with(src_a.as_str()))
        {
            return true;
        }
    }
    let (name_a, name_b) = (a.object.name.as_str(), b.object.name.as_str());
    if (is_dynamic_linker(name_a) && is_libc(name_b)) || (is_dynamic_linker(name_b) && is_libc(name_a)) {
        return true;
    }
    if is_libc_sublib(name_a) && is_libc_sublib(name_b) {
        return true;
    }
    TOOLCHAIN_DUP_SYMS.contains(&sym_name) || LINKER_SCRIPT_DUP_SYMS.contains(&sym_name)
}

/// Is an unresolved import of `sym_name` from `obj` one of the well-known
/// cases supplied outside the load closure (debugger-provided symbols,
/// Perl's embedding convention, GL symbols obtained via `dlopen`)?
fn can_ignore_unres(sym_name: &str, obj: &ClosureNode) -> bool {
    if sym_name.starts_with("ps_") && obj.object.name.starts_with("libthread_db") {
        return true;
    }
    if PERL_SYMBOL_RE.is_match(sym_name) && obj.package_name.starts_with("perl") {
        return true;
    }
    GL_SYMBOL_RE.is_match(sym_name)
}

/// Canonical (order-independent) dedup key for a duplicate-definition
/// warning: two closures that both contain the same pair of objects report
/// it once no matter which one is visited as "new" and which as "origin".
fn dup_key(sym_name: &str, a: &str, b: &str) -> String {
    if a <= b {
        format!("{sym_name}:{a}:{b}")
    } else {
        format!("{sym_name}:{b}:{a}")
    }
}

/// Resolves one load closure `L = [root, lib1, lib2, ...]`. `pkg_name` and
/// `root_name` only identify the closure for diagnostic messages.
pub fn resolve(closure: &[Rc<ClosureNode>], pkg_name: &str, root_name: &str, diag: &Diagnostics) -> ResolveReport {
    let mut sym_origins: HashMap<&str, &Rc<ClosureNode>> = HashMap::new();
    let mut report = ResolveReport::default();

    for obj in closure {
        for sym in &obj.object.exports {
            match sym_origins.get(sym.name.as_str()) {
                None => {
                    sym_origins.insert(sym.name.as_str(), obj);
                }
                Some(origin) => {
                    if can_ignore_dup(&sym.name, obj, origin) {
                        continue;
                    }
                    report.duplicate_definitions += 1;
                    let key = dup_key(&sym.name, &obj.object.name, &origin.object.name);
                    diag.warn(
                        "duplicate-definition",
                        &key,
                        &format!(
                            "duplicate definition of symbol '{}' in modules {} (from package {:?}) and {} (from package {:?}) (when loading object {} in package {})",
                            sym.name,
                            origin.object.name,
                            origin.source_name,
                            obj.object.name,
                            obj.source_name,
                            root_name,
                            pkg_name,
                        ),
                    );
                }
            }
        }
    }

    for obj in closure {
        for sym in &obj.object.imports {
            if sym.is_weak {
                continue;
            }
            if sym_origins.contains_key(sym.name.as_str()) {
                continue;
            }
            if can_ignore_unres(&sym.name, obj) {
                continue;
            }
            report.unresolved_imports += 1;
            diag.warn(
                "unresolved-import",
                &format!("{}:{}:{}", root_name, obj.object.name, sym.name),
                &format!(
                    "unresolved reference to symbol '{}' in library {} (from package {:?}) (when loading object {} in package {})",
                    sym.name, obj.object.name, obj.source_name, root_name, pkg_name,
                ),
            );
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use elfmodel::{Object, Symbol};

    fn node(name: &str, source_name: Option<&str>, package_name: &str, exports: Vec<Symbol>, imports: Vec<Symbol>) -> Rc<ClosureNode> {
        let object = Object::new(name, Some(name.to_string()), true, false, vec![], imports, exports);
        Rc::new(ClosureNode {
            object,
            package_name: package_name.to_string(),
            source_name: source_name.map(str::to_string),
            deps: Vec::new(),
        })
    }

    fn diag() -> Diagnostics {
        Diagnostics::new(diagnostics::Policy::RaiseOnError, "test")
    }

    #[test]
    fn unrelated_duplicate_export_is_reported() {
        let root = node("a.out", Some("apkg"), "apkg", vec![], vec![]);
        let lib_a = node("liba.so.1", Some("srca"), "liba1", vec![Symbol::new("conflict", false, false)], vec![]);
        let lib_b = node("libb.so.1", Some("srcb"), "libb1", vec![Symbol::new("conflict", false, false)], vec![]);
        let closure = vec![root, lib_a, lib_b];
        let report = resolve(&closure, "apkg", "a.out", &diag());
        assert_eq!(report.duplicate_definitions, 1);
    }

    #[test]
    fn duplicate_within_same_source_package_is_ignored() {
        let root = node("a.out", Some("src"), "apkg", vec![], vec![]);
        let lib_a = node("liba.so.1", Some("src"), "liba1", vec![Symbol::new("conflict", false, false)], vec![]);
        let lib_b = node("libb.so.1", Some("src"), "libb1", vec![Symbol::new("conflict", false, false)], vec![]);
        let closure = vec![root, lib_a, lib_b];
        let report = resolve(&closure, "apkg", "a.out", &diag());
        assert_eq!(report.duplicate_definitions, 0);
    }

    #[test]
    fn unresolved_strong_import_with_no_export_is_reported() {
        let root = node("a.out", Some("src"), "apkg", vec![], vec![Symbol::new("missing_fn", false, false)]);
        let closure = vec![root];
        let report = resolve(&closure, "apkg", "a.out", &diag());
        assert_eq!(report.unresolved_imports, 1);
    }

    #[test]
    fn weak_unresolved_import_is_not_reported() {
        let root = node("a.out", Some("src"), "apkg", vec![], vec![Symbol::new("missing_fn", true, false)]);
        let closure = vec![root];
        let report = resolve(&closure, "apkg", "a.out", &diag());
        assert_eq!(report.unresolved_imports, 0);
    }

    #[test]
    fn gl_prefixed_unresolved_import_is_ignored() {
        let root = node("a.out", Some("src"), "apkg", vec![], vec![Symbol::new("glXCreateContext", false, false)]);
        let closure = vec![root];
        let report = resolve(&closure, "apkg", "a.out", &diag());
        assert_eq!(report.unresolved_imports, 0);
    }

    #[test]
    fn perl_unresolved_import_only_ignored_for_perl_packages() {
        let non_perl = node("a.out", Some("src"), "notperl", vec![], vec![Symbol::new("PL_sv_undef", false, false)]);
        let report = resolve(&[non_perl], "notperl", "a.out", &diag());
        assert_eq!(report.unresolved_imports, 1);

        let perl = node("a.out", Some("src"), "perl-base", vec![], vec![Symbol::new("PL_sv_undef", false, false)]);
        let report = resolve(&[perl], "perl-base", "a.out", &diag());
        assert_eq!(report.unresolved_imports, 0);
    }
}
