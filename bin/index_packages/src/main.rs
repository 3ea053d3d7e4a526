// Copyright 2026 The Interpose Project Authors
// Use of this source code is governed by an MIT-style license that can be
// found in the LICENSE file.

//! Walks a package list, parses the ELF objects each package contains, and
//! persists the result to a fresh database.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use cliutil::cli_main;
use dbstore::{ConnectionMode, Store};
use diagnostics::{Diagnostics, Policy};
use elfmodel::Package;
use interpose_core::indexer::Indexer;
use interpose_core::probes::{AptCacheMetadataProbe, AptGetMaterializer, FileCommandProbe};
use interpose_core::stats;
use taskpool::JoinResult;

/// Analyzes ELF contents of Debian binary packages and stores them to a database.
#[derive(Parser, Debug)]
struct Cli {
    /// File with package names, one per line; `#`-prefixed lines are comments.
    pkglist: PathBuf,

    /// Number of worker threads. Defaults to max(2, 1.5 * cpu count).
    #[arg(short = 'j', long = "jobs")]
    num_threads: Option<usize>,

    /// Scratch directory packages are downloaded and unpacked into.
    #[arg(short = 'o', long = "output", default_value = "tmp")]
    output: PathBuf,

    /// SQLite database file to create.
    #[arg(long = "db-name", default_value = "syms.db")]
    db_name: PathBuf,

    /// Print diagnostic info; repeat for more detail.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress the summary statistics normally printed before exit.
    #[arg(long = "no-stats", action = clap::ArgAction::SetTrue)]
    no_stats: bool,
}

fn read_package_list(path: &Path) -> Result<Vec<Package>> {
    let content = fs::read_to_string(path).with_context(|| format!("reading {path:?}"))?;
    let mut packages = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let name = line
            .split_whitespace()
            .next()
            .context("empty package list line")?;
        packages.push(Package::new(name));
    }
    Ok(packages)
}

struct PackageOutcome {
    num_deps: usize,
    num_symbols: usize,
    has_errors: bool,
    elapsed_secs: f64,
}

fn do_main(args: Cli) -> Result<()> {
    if args.output.is_dir() {
        fs::remove_dir_all(&args.output)
            .with_context(|| format!("clearing scratch directory {:?}", args.output))?;
    }
    fs::create_dir_all(&args.output)
        .with_context(|| format!("creating scratch directory {:?}", args.output))?;

    let diag = Arc::new(Diagnostics::new(Policy::RaiseOnError, "index_packages"));
    let packages = read_package_list(&args.pkglist)?;
    let num_packages = packages.len();

    // Establish the schema up front with a consistency-preserving
    // connection; each worker then opens its own bulk-insert connection.
    Store::open(&args.db_name, ConnectionMode::Consistent)
        .with_context(|| format!("creating schema in {:?}", args.db_name))?;

    let scratch_root = args.output.clone();
    let db_name = args.db_name.clone();
    let num_workers = args.num_threads.unwrap_or_else(taskpool::default_worker_count);
    let diag_for_workers = Arc::clone(&diag);

    let join: JoinResult<PackageOutcome> = taskpool::run(
        packages,
        num_workers,
        move |pkg, ctx: &mut Option<Store>| {
            let store = match ctx {
                Some(store) => store,
                None => {
                    let store = Store::open(&db_name, ConnectionMode::BulkInsert)
                        .with_context(|| format!("opening {db_name:?}"))?;
                    ctx.get_or_insert(store)
                }
            };

            let start = Instant::now();
            let indexer = Indexer {
                file_type_probe: &FileCommandProbe,
                metadata_probe: &AptCacheMetadataProbe,
                materializer: &AptGetMaterializer,
                diag: diag_for_workers.as_ref(),
            };
            let result = indexer.index_package(pkg, &scratch_root, store)?;
            Ok(PackageOutcome {
                num_deps: result.num_deps,
                num_symbols: result.num_symbols,
                has_errors: result.package.has_errors,
                elapsed_secs: start.elapsed().as_secs_f64(),
            })
        },
    );

    if !args.no_stats {
        print_stats(num_packages, &join);
    }

    if let Some(err) = taskpool::raise_first(join.errors, &diag) {
        return Err(err);
    }
    Ok(())
}

fn print_stats(num_packages: usize, join: &JoinResult<PackageOutcome>) {
    println!("Number of packages: {num_packages}");

    let per_worker_times: Vec<Vec<f64>> = join
        .results
        .iter()
        .map(|worker| worker.iter().map(|r| r.elapsed_secs).collect())
        .collect();
    let wall_time = stats::wall_time_secs(&per_worker_times);
    println!("Wall time: {}", stats::format_minutes_seconds(wall_time));

    let results: Vec<&PackageOutcome> = join.results.iter().flatten().collect();
    let times: Vec<f64> = results.iter().map(|r| r.elapsed_secs).collect();
    println!("Average time to process a package: {:.3} sec.", stats::mean(&times));

    let total_inserts: usize = results.iter().map(|r| r.num_deps + r.num_symbols).sum();
    println!("RPS: {:.0}", stats::rows_per_second(total_inserts, wall_time));

    if num_packages > 0 {
        let deps_per_pkg: f64 =
            results.iter().map(|r| r.num_deps as f64).sum::<f64>() / num_packages as f64;
        println!("Average number of dependencies in package: {deps_per_pkg:.3}");

        let syms_per_pkg: f64 =
            results.iter().map(|r| r.num_symbols as f64).sum::<f64>() / num_packages as f64;
        println!("Average number of symbols in package: {syms_per_pkg:.3}");
    }

    let num_failed = results.iter().filter(|r| r.has_errors).count();
    println!("Number of failed packages: {num_failed}");
}

fn main() -> ExitCode {
    let args = Cli::parse();
    let verbose = args.verbose;
    cli_main(verbose, move || do_main(args))
}
