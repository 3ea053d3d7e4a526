// Copyright 2026 The Interpose Project Authors
// Use of this source code is governed by an MIT-style license that can be
// found in the LICENSE file.

//! Reloads an indexed package corpus and reports symbol interpositions and
//! unresolved imports across each executable's simulated load closure.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use cliutil::cli_main;
use dbstore::{ConnectionMode, Store};
use diagnostics::{Diagnostics, Policy};
use elfmodel::Package;
use interpose_core::stats;
use interpose_core::ResolveReport;
use taskpool::JoinResult;

/// Analyzes an indexed package corpus for symbol interpositions and unresolved references.
#[derive(Parser, Debug)]
struct Cli {
    /// Packages to analyze. If none are given, every indexed package is analyzed.
    pkgs: Vec<String>,

    /// Number of worker threads. Defaults to max(2, 1.5 * cpu count).
    #[arg(short = 'j', long = "jobs")]
    num_threads: Option<usize>,

    /// SQLite database file produced by `index_packages`.
    #[arg(long = "db-name", default_value = "syms.db")]
    db_name: std::path::PathBuf,

    /// Print diagnostic info; repeat for more detail.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Also analyze packages that had indexing errors.
    #[arg(long = "allow-errors", action = clap::ArgAction::SetTrue)]
    allow_errors: bool,

    /// Suppress the summary statistics normally printed before exit.
    #[arg(long = "no-stats", action = clap::ArgAction::SetTrue)]
    no_stats: bool,
}

struct PackageOutcome {
    elapsed_secs: f64,
    report: ResolveReport,
}

fn load_packages(args: &Cli, diag: &Diagnostics) -> Result<Vec<Package>> {
    let store = Store::open(&args.db_name, ConnectionMode::Consistent)?;
    let packages = if args.pkgs.is_empty() {
        store.deserialize_all_packages()?
    } else {
        args.pkgs
            .iter()
            .map(|name| store.deserialize_package(name, diag))
            .collect::<Result<Vec<_>>>()?
    };
    Ok(if args.allow_errors {
        packages
    } else {
        packages.into_iter().filter(|p| !p.has_errors).collect()
    })
}

fn do_main(args: Cli) -> Result<()> {
    let diag = Arc::new(Diagnostics::new(Policy::ExitOnError, "find_interposes"));

    let packages = load_packages(&args, &diag)?;
    let num_packages = packages.len();

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
                    let store = Store::open(&db_name, ConnectionMode::Consistent)?;
                    ctx.get_or_insert(store)
                }
            };

            let start = Instant::now();
            let report = interpose_core::analyze_package(store, &pkg, diag_for_workers.as_ref())?;
            Ok(PackageOutcome {
                elapsed_secs: start.elapsed().as_secs_f64(),
                report,
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

    let total_dups: usize = results.iter().map(|r| r.report.duplicate_definitions).sum();
    let total_unres: usize = results.iter().map(|r| r.report.unresolved_imports).sum();
    println!("Duplicate definitions found: {total_dups}");
    println!("Unresolved imports found: {total_unres}");
}

fn main() -> ExitCode {
    let args = Cli::parse();
    let verbose = args.verbose;
    cli_main(verbose, move || do_main(args))
}
