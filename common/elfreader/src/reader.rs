// Copyright 2026 The Interpose Project Authors
// Use of this source code is governed by an MIT-style license that can be
// found in the LICENSE file.

use std::collections::HashSet;
use std::fs::File;
use std::path::Path;

use anyhow::{bail, Context, Result};
use elf::abi::{
    self, SHN_UNDEF, STB_GLOBAL, STB_LOOS, STB_WEAK, STV_DEFAULT, STV_PROTECTED,
};
use elf::endian::AnyEndian;
use elf::ElfStream;
use elfmodel::{Object, Symbol};

use crate::linker::is_dynamic_linker;

/// Relocation types across the handful of architectures this corpus sees
/// that denote a copy relocation. We deliberately don't try to be
/// exhaustive across every ISA elf::abi knows about; an unrecognised
/// architecture just means we won't special-case its copy relocations,
/// which only affects whether an import/export is misclassified, not
/// whether the file parses.
const COPY_RELOC_TYPES: &[u32] = &[
    abi::R_X86_64_COPY,
    // elf::abi has no R_386_COPY constant; 9 is its standard ELF ABI value.
    9,
    abi::R_AARCH64_COPY,
];

fn is_copy_relocation(r_type: u32) -> bool {
    COPY_RELOC_TYPES.contains(&r_type)
}

/// Decodes one ELF file into an [`Object`]. `file_type` is the descriptive
/// string a file-type probe (e.g. `file --brief`) produced for this path;
/// it is what distinguishes a shared library from a position-independent
/// executable, since both can otherwise look like bare `ET_DYN` files.
pub fn read_object(path: &Path, file_type: &str) -> Result<Object> {
    let is_shlib = file_type.contains("shared object") && file_type.contains(".so");

    let name = path
        .file_name()
        .with_context(|| format!("{path:?} has no file name"))?
        .to_string_lossy()
        .into_owned();

    let file = File::open(path).with_context(|| format!("open {path:?}"))?;
    let mut elf = ElfStream::<AnyEndian, _>::open_stream(file)
        .with_context(|| format!("{path:?} is not a valid ELF"))?;

    let (deps, soname, is_symbolic) = read_dynamic_tags(&mut elf, &name)
        .with_context(|| format!("{path:?}: failed to read .dynamic"))?;

    if deps.is_empty() && !is_dynamic_linker(&name) {
        // The caller (the indexer) is responsible for turning this into a
        // deduplicated warning; the reader itself only reports fatal
        // per-file errors.
        tracing::warn!(file = %name, "no DT_NEEDED entries in .dynamic section");
    }

    let copy_relocated = read_copy_relocated_addresses(&mut elf)
        .with_context(|| format!("{path:?}: failed to read .rela.dyn"))?;

    let (imports, exports) = read_symbols(&mut elf, &copy_relocated)
        .with_context(|| format!("{path:?}: failed to read .dynsym"))?;

    Ok(Object::new(
        name,
        soname,
        is_shlib,
        is_symbolic,
        deps,
        imports,
        exports,
    ))
}

fn read_dynamic_tags(
    elf: &mut ElfStream<AnyEndian, File>,
    file_name: &str,
) -> Result<(Vec<String>, Option<String>, bool)> {
    let dynamic = elf
        .dynamic()
        .context("parsing .dynamic section")?
        .context("no .dynamic section")?
        .iter()
        .collect::<Vec<_>>();

    // DT_NEEDED/DT_SONAME values are offsets into the same string table the
    // dynamic symbol table uses (conventionally `.dynstr`).
    let (_, strtab) = elf
        .dynamic_symbol_table()
        .context("parsing dynamic symbol table")?
        .context("no dynamic symbol table")?;

    let mut deps = Vec::new();
    let mut soname = None;
    let mut is_symbolic = false;

    for tag in dynamic {
        match tag.d_tag {
            abi::DT_NEEDED => {
                deps.push(
                    strtab
                        .get(tag.d_val() as usize)
                        .context("resolving DT_NEEDED string")?
                        .to_string(),
                );
            }
            abi::DT_SONAME => {
                if soname.is_some() {
                    bail!("{file_name}: multiple DT_SONAME entries in .dynamic section");
                }
                soname = Some(
                    strtab
                        .get(tag.d_val() as usize)
                        .context("resolving DT_SONAME string")?
                        .to_string(),
                );
            }
            abi::DT_SYMBOLIC => is_symbolic = true,
            abi::DT_FLAGS if tag.d_val() & 0x2 != 0 => is_symbolic = true,
            _ => {}
        }
    }

    Ok((deps, soname, is_symbolic))
}

fn read_copy_relocated_addresses(elf: &mut ElfStream<AnyEndian, File>) -> Result<HashSet<u64>> {
    let mut addresses = HashSet::new();

    let Some(shdr) = elf
        .section_header_by_name(".rela.dyn")
        .context("looking up .rela.dyn")?
        .copied()
    else {
        return Ok(addresses);
    };

    let relas = elf
        .section_data_as_relas(&shdr)
        .context("parsing .rela.dyn")?;
    for rela in relas {
        if is_copy_relocation(rela.r_type) {
            addresses.insert(rela.r_offset);
        }
    }

    Ok(addresses)
}

/// Reads `.dynsym`, returning (imports, exports) after applying the
/// binding/visibility filter and dropping synthetic version-definition
/// names.
fn read_symbols(
    elf: &mut ElfStream<AnyEndian, File>,
    copy_relocated: &HashSet<u64>,
) -> Result<(Vec<Symbol>, Vec<Symbol>)> {
    let version_names = read_version_def_names(elf).context("parsing .gnu.version_d")?;

    let (dynsyms, strtab) = elf
        .dynamic_symbol_table()
        .context("parsing dynamic symbol table")?
        .context("no dynamic symbol table")?;

    let mut imports = Vec::new();
    let mut exports = Vec::new();

    for sym in dynsyms.iter() {
        let bind = sym.st_bind();
        let vis = sym.st_vis() & 0x3;
        if !matches!(bind, STB_GLOBAL | STB_WEAK | STB_LOOS) {
            continue;
        }
        if !matches!(vis, STV_DEFAULT | STV_PROTECTED) {
            continue;
        }

        let name = strtab
            .get(sym.st_name as usize)
            .context("resolving symbol name")?;
        if name.is_empty() || version_names.contains(name) {
            continue;
        }

        let symbol = Symbol::new(name.to_string(), bind == STB_WEAK, vis == STV_PROTECTED);

        if sym.st_shndx == SHN_UNDEF || copy_relocated.contains(&sym.st_value) {
            imports.push(symbol);
        } else {
            exports.push(symbol);
        }
    }

    Ok((imports, exports))
}

/// Collects the first `verdaux` name of each version definition in
/// `.gnu.version_d`. These mark version strings (e.g. `GLIBC_2.4`) that
/// appear as synthetic entries in `.dynsym` and must not be mistaken for
/// exported symbols.
fn read_version_def_names(elf: &mut ElfStream<AnyEndian, File>) -> Result<HashSet<String>> {
    let mut names = HashSet::new();

    let num_syms = elf
        .dynamic_symbol_table()
        .context("parsing dynamic symbol table")?
        .map(|(syms, _)| syms.len())
        .unwrap_or(0);

    let Some(version_table) = elf
        .symbol_version_table()
        .context("parsing symbol version table")?
    else {
        return Ok(names);
    };

    for i in 0..num_syms {
        let Some(def) = version_table
            .get_definition(i)
            .context("parsing version definition")?
        else {
            continue;
        };
        if let Some(first) = def.names.into_iter().next() {
            names.insert(first.context("parsing verdaux name")?.to_string());
        }
    }

    Ok(names)
}
