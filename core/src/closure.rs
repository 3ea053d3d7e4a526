// Copyright 2026 The Interpose Project Authors
// Use of this source code is governed by an MIT-style license that can be
// found in the LICENSE file.

//! Reconstructs per-executable library-load closures from the store.
//!
//! Building a closure is two passes: [`load_node`] recursively fetches each
//! reachable object's symbols and dependency names, memoizing by SONAME so a
//! library reached through two different dependency paths is parsed once and
//! a cyclic dependency graph terminates; [`build_closure`] then performs the
//! breadth-first walk that turns that graph into the ordered list symbol
//! resolution actually uses.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use anyhow::Result;
use dbstore::Store;
use diagnostics::Diagnostics;
use elfmodel::{Object, Package};

/// One object materialised into a load closure: its own (already loaded)
/// symbols, the identity of its owning package (the resolver's allow-lists
/// key off `source_name`), and its resolved, already-loaded dependencies.
#[derive(Debug)]
pub struct ClosureNode {
    pub object: Object,
    pub package_name: String,
    pub source_name: Option<String>,
    pub deps: Vec<Rc<ClosureNode>>,
}

fn load_node(
    store: &Store,
    mut obj: Object,
    pkg: &Package,
    cache: &mut HashMap<String, Rc<ClosureNode>>,
    visiting: &mut HashSet<String>,
    diag: &Diagnostics,
) -> Result<Rc<ClosureNode>> {
    if let Some(soname) = &obj.soname {
        if let Some(cached) = cache.get(soname) {
            return Ok(Rc::clone(cached));
        }
        if !visiting.insert(soname.clone()) {
            // Already being loaded further up the recursion stack: a cycle
            // in the dependency graph. Stop descending but still hand back
            // a usable (dep-less) node so the caller can link to it.
            let (imports, exports) = store.deserialize_syms(&obj)?;
            obj.imports = imports;
            obj.exports = exports;
            return Ok(Rc::new(ClosureNode {
                object: obj,
                package_name: pkg.name.clone(),
                source_name: pkg.source_name.clone(),
                deps: Vec::new(),
            }));
        }
    }

    let (imports, exports) = store.deserialize_syms(&obj)?;
    obj.imports = imports;
    obj.exports = exports;
    let dep_objects = store.deserialize_deps(&obj, diag)?;

    let mut deps = Vec::with_capacity(dep_objects.len());
    for dep in dep_objects {
        let dep_pkg = store.deserialize_owning_package(&dep)?;
        deps.push(load_node(store, dep, &dep_pkg, cache, visiting, diag)?);
    }

    let soname = obj.soname.clone();
    let node = Rc::new(ClosureNode {
        object: obj,
        package_name: pkg.name.clone(),
        source_name: pkg.source_name.clone(),
        deps,
    });
    if let Some(soname) = soname {
        visiting.remove(&soname);
        cache.insert(soname, Rc::clone(&node));
    }
    Ok(node)
}

/// Builds the ordered load closure for one executable `root_obj` of `pkg`:
/// `[root, lib1, lib2, ...]` in first-encounter breadth-first order, which is
/// also the order that defines symbol-resolution priority.
///
/// Libraries without a SONAME cannot be deduplicated by the dynamic linker's
/// own rules and are skipped, with a once-per-(package, object name) warning.
pub fn build_closure(
    store: &Store,
    pkg: &Package,
    root_obj: Object,
    diag: &Diagnostics,
) -> Result<Vec<Rc<ClosureNode>>> {
    let mut cache = HashMap::new();
    let mut visiting = HashSet::new();
    let root = load_node(store, root_obj, pkg, &mut cache, &mut visiting, diag)?;

    let mut closure = vec![Rc::clone(&root)];
    let mut loaded_sonames = HashSet::new();
    let mut pending: Vec<Rc<ClosureNode>> = root.deps.clone();
    while !pending.is_empty() {
        let mut next_pending = Vec::new();
        for node in pending {
            match &node.object.soname {
                None => {
                    diag.warn(
                        "missing-soname",
                        &format!("{}:{}", pkg.name, node.object.name),
                        &format!("library {} does not have a SONAME", node.object.name),
                    );
                }
                Some(soname) => {
                    if loaded_sonames.insert(soname.clone()) {
                        next_pending.extend(node.deps.iter().cloned());
                        closure.push(node);
                    }
                }
            }
        }
        pending = next_pending;
    }
    Ok(closure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbstore::ConnectionMode;
    use diagnostics::Policy;
    use elfmodel::{Object as RawObject, Symbol};

    fn diag() -> Diagnostics {
        Diagnostics::new(Policy::RaiseOnError, "test")
    }

    #[test]
    fn closure_starts_with_root_and_follows_deps_breadth_first() -> Result<()> {
        let mut store = Store::open_in_memory(ConnectionMode::Consistent)?;
        let mut pkg = Package::new("pkg");
        store.serialize_package(&mut pkg, None)?;
        let package_id = pkg.id.unwrap();

        let mut root = RawObject::new(
            "a.out",
            None,
            false,
            false,
            vec!["libfoo.so.1".to_string()],
            vec![],
            vec![],
        );
        store.serialize_object(&mut root, package_id)?;

        let mut libfoo = RawObject::new(
            "libfoo.so.1",
            Some("libfoo.so.1".to_string()),
            true,
            false,
            vec!["libbar.so.1".to_string()],
            vec![],
            vec![Symbol::new("foo_fn", false, false)],
        );
        store.serialize_object(&mut libfoo, package_id)?;

        let mut libbar = RawObject::new(
            "libbar.so.1",
            Some("libbar.so.1".to_string()),
            true,
            false,
            vec![],
            vec![],
            vec![Symbol::new("bar_fn", false, false)],
        );
        store.serialize_object(&mut libbar, package_id)?;

        let diag = diag();
        let closure = build_closure(&store, &pkg, root, &diag)?;
        let names: Vec<&str> = closure.iter().map(|n| n.object.name.as_str()).collect();
        assert_eq!(names, vec!["a.out", "libfoo.so.1", "libbar.so.1"]);
        Ok(())
    }

    #[test]
    fn cyclic_sonames_terminate_instead_of_recursing_forever() -> Result<()> {
        let mut store = Store::open_in_memory(ConnectionMode::Consistent)?;
        let mut pkg = Package::new("pkg");
        store.serialize_package(&mut pkg, None)?;
        let package_id = pkg.id.unwrap();

        let mut root = RawObject::new(
            "a.out",
            None,
            false,
            false,
            vec!["liba.so.1".to_string()],
            vec![],
            vec![],
        );
        store.serialize_object(&mut root, package_id)?;

        let mut lib_a = RawObject::new(
            "liba.so.1",
            Some("liba.so.1".to_string()),
            true,
            false,
            vec!["libb.so.1".to_string()],
            vec![],
            vec![],
        );
        store.serialize_object(&mut lib_a, package_id)?;

        let mut lib_b = RawObject::new(
            "libb.so.1",
            Some("libb.so.1".to_string()),
            true,
            false,
            vec!["liba.so.1".to_string()],
            vec![],
            vec![],
        );
        store.serialize_object(&mut lib_b, package_id)?;

        let diag = diag();
        let closure = build_closure(&store, &pkg, root, &diag)?;
        let names: Vec<&str> = closure.iter().map(|n| n.object.name.as_str()).collect();
        assert_eq!(names, vec!["a.out", "liba.so.1", "libb.so.1"]);
        Ok(())
    }
}
