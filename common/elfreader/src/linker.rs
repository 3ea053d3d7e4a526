// Copyright 2026 The Interpose Project Authors
// Use of this source code is governed by an MIT-style license that can be
// found in the LICENSE file.

//! Pure filename predicates consulted by the resolver's allow-lists.

use once_cell::sync::Lazy;
use regex::Regex;

static DYNAMIC_LINKER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^ld-.*\.so$").unwrap());
static LIBC_SUBLIB_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^lib(c|m|rt|pthread)-").unwrap());

/// Is `filename` the dynamic linker itself (e.g. `ld-linux-x86-64.so.2`)?
pub fn is_dynamic_linker(filename: &str) -> bool {
    DYNAMIC_LINKER_RE.is_match(filename)
}

/// Is `filename` the main libc shared object (e.g. `libc-2.31.so`)?
pub fn is_libc(filename: &str) -> bool {
    filename.starts_with("libc-")
}

/// Is `filename` one of the libc family of sublibraries (libc, libm, librt,
/// libpthread) as opposed to an unrelated library?
pub fn is_libc_sublib(filename: &str) -> bool {
    LIBC_SUBLIB_RE.is_match(filename)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_dynamic_linker() {
        assert!(is_dynamic_linker("ld-linux-x86-64.so.2"));
        assert!(is_dynamic_linker("ld-2.31.so"));
        assert!(!is_dynamic_linker("libld.so"));
    }

    #[test]
    fn recognizes_libc() {
        assert!(is_libc("libc-2.31.so"));
        assert!(!is_libc("libcrypto-1.1.so"));
    }

    #[test]
    fn recognizes_libc_sublibs() {
        for name in ["libc-2.31.so", "libm-2.31.so", "librt-2.31.so", "libpthread-2.31.so"] {
            assert!(is_libc_sublib(name), "{name} should be a libc sublib");
        }
        assert!(!is_libc_sublib("libz.so.1"));
    }
}
