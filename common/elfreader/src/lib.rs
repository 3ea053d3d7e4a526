// Copyright 2026 The Interpose Project Authors
// Use of this source code is governed by an MIT-style license that can be
// found in the LICENSE file.

//! Decodes one ELF file into an [`elfmodel::Object`], and classifies
//! filenames that the resolver's allow-lists treat specially (the dynamic
//! linker, libc and its sublibraries).

mod linker;
mod reader;

pub use linker::{is_dynamic_linker, is_libc, is_libc_sublib};
pub use reader::read_object;
