// Copyright 2026 The Interpose Project Authors
// Use of this source code is governed by an MIT-style license that can be
// found in the LICENSE file.

//! The three narrow, injectable interfaces the indexer uses to reach outside
//! the analytical core: classifying a file, staging a package's contents,
//! and resolving a package's upstream source name. Default implementations
//! shell out to the same tools the reference tool used (`file`, `apt-get`,
//! `apt-cache`); tests substitute their own.

use std::path::Path;
use std::process::Command;

use anyhow::{bail, Context, Result};

/// Classifies a file by content, analogous to `file --brief`.
pub trait FileTypeProbe: Send + Sync {
    fn file_type(&self, path: &Path) -> Result<String>;
}

/// Resolves a binary package's upstream source package name.
pub trait PackageMetadataProbe: Send + Sync {
    fn source_name(&self, package_name: &str) -> Result<String>;
}

/// Stages one package's files under a scratch directory.
pub trait PackageMaterializer: Send + Sync {
    fn materialize(&self, package_name: &str, dest: &Path) -> Result<()>;
}

pub struct FileCommandProbe;

impl FileTypeProbe for FileCommandProbe {
    fn file_type(&self, path: &Path) -> Result<String> {
        let output = Command::new("file")
            .arg("--brief")
            .arg(path)
            .output()
            .with_context(|| format!("running file --brief on {path:?}"))?;
        if !output.status.success() {
            bail!("file --brief {path:?} exited with {}", output.status);
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

pub struct AptCacheMetadataProbe;

impl PackageMetadataProbe for AptCacheMetadataProbe {
    fn source_name(&self, package_name: &str) -> Result<String> {
        let output = Command::new("apt-cache")
            .arg("showsrc")
            .arg(package_name)
            .output()
            .with_context(|| format!("running apt-cache showsrc {package_name}"))?;
        if !output.status.success() {
            bail!("apt-cache showsrc {package_name} exited with {}", output.status);
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout
            .lines()
            .filter_map(|line| line.strip_prefix("Package: "))
            .last()
            .map(|s| s.trim().to_string())
            .context("source package not found in apt-cache showsrc output")
    }
}

pub struct AptGetMaterializer;

impl PackageMaterializer for AptGetMaterializer {
    fn materialize(&self, package_name: &str, dest: &Path) -> Result<()> {
        run(&["apt-get", "-qq", "-d", "download", package_name], dest)?;

        for entry in std::fs::read_dir(dest).with_context(|| format!("listing {dest:?}"))? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("deb") {
                let basename = path.file_name().context("deb path has no file name")?;
                run(&["ar", "x", &basename.to_string_lossy()], dest)?;
            }
        }
        for entry in std::fs::read_dir(dest).with_context(|| format!("listing {dest:?}"))? {
            let path = entry?.path();
            let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
            if name.starts_with("data.tar") {
                run(&["tar", "xf", &name], dest)?;
            }
        }
        Ok(())
    }
}

fn run(argv: &[&str], cwd: &Path) -> Result<()> {
    let (cmd, args) = argv.split_first().context("empty command")?;
    let status = Command::new(cmd)
        .args(args)
        .current_dir(cwd)
        .status()
        .with_context(|| format!("running {argv:?} in {cwd:?}"))?;
    if !status.success() {
        bail!("{argv:?} exited with {status}");
    }
    Ok(())
}
