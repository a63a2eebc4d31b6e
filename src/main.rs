//! # depscan CLI Entry Point
//!
//! Thin command layer over the library. Three commands:
//! - `scan` reads one or more `depend.toml` files, checks whether the
//!   previous run's output is still valid, and rescans only when it is
//!   not.
//! - `copy-mod` is invoked from generated make rules to refresh a
//!   Fortran module stamp when the module interface changed.
//! - `clear` resets a rule file to the empty placeholder.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use colored::*;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use depscan::config::DependInfo;
use depscan::depends;
use depscan::fortran;
use depscan::writer;

#[derive(Parser)]
#[command(name = "depscan")]
#[command(about = "Incremental compile-time dependency scanner", version = env!("CARGO_PKG_VERSION"))]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan dependencies for one or more targets
    Scan {
        /// A depend.toml file, or a directory searched recursively for them
        #[arg(long)]
        info: PathBuf,
        /// Explain every staleness and resolution decision
        #[arg(short, long)]
        verbose: bool,
    },
    /// Copy a Fortran module file over its stamp if the interface changed
    CopyMod {
        /// The module file the compiler produced
        module: String,
        /// The stamp file dependents are ordered against
        stamp: String,
        /// Compiler id deciding the comparison strategy (GNU, Intel, ...)
        compiler_id: Option<String>,
    },
    /// Reset a rule file to the empty placeholder
    Clear {
        /// The depend.make file to clear
        make_file: String,
        #[arg(short, long)]
        verbose: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Scan { info, verbose } => scan(&info, verbose),
        Commands::CopyMod {
            module,
            stamp,
            compiler_id,
        } => fortran::copy_module(&module, &stamp, compiler_id.as_deref().unwrap_or("")),
        Commands::Clear { make_file, verbose } => depends::clear(&make_file, verbose),
    }
}

fn scan(info_arg: &Path, verbose: bool) -> Result<()> {
    let infos = collect_info_files(info_arg)?;
    if infos.is_empty() {
        bail!("No depend.toml found under \"{}\"", info_arg.display());
    }

    let mut okay = true;
    for path in &infos {
        if !scan_target(path, verbose)? {
            okay = false;
        }
    }
    if !okay {
        bail!("Dependency scanning reported errors.");
    }
    Ok(())
}

fn collect_info_files(arg: &Path) -> Result<Vec<PathBuf>> {
    if !arg.is_dir() {
        return Ok(vec![arg.to_path_buf()]);
    }
    let mut found = Vec::new();
    for entry in WalkDir::new(arg).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Cannot search \"{}\"", arg.display()))?;
        if entry.file_type().is_file() && entry.file_name() == "depend.toml" {
            found.push(entry.into_path());
        }
    }
    Ok(found)
}

/// Run the check-then-maybe-rescan cycle for one target. Returns whether
/// the scan itself (not the freshness) was clean.
fn scan_target(info_path: &Path, verbose: bool) -> Result<bool> {
    let info = DependInfo::load(info_path)?;
    fs::create_dir_all(Path::new(&info.target_dir))
        .with_context(|| format!("Cannot create target directory \"{}\"", info.target_dir))?;

    let make_path = depscan::join_path(&info.target_dir, "depend.make");
    let internal_path = depscan::join_path(&info.target_dir, "depend.internal");

    let (fresh, valid_deps) = depends::check(&make_path, &internal_path, verbose)?;
    if fresh && verbose {
        println!(
            "{} Dependencies for \"{}\" are up to date.",
            "✓".green(),
            info.target_dir
        );
    }
    if fresh {
        return Ok(true);
    }

    if verbose {
        println!(
            "{} Scanning {} dependencies for \"{}\"...",
            "ℹ".blue(),
            info.language,
            info.target_dir
        );
    }

    let mut scanner = depends::DependencyScanner::new(&info, valid_deps, verbose)?;
    let mut make_out = Vec::new();
    let mut internal_out = Vec::new();
    write_header(&mut make_out)?;
    write_header(&mut internal_out)?;
    let okay = scanner.write(&info, &mut make_out, &mut internal_out)?;

    writer::commit(&make_path, &make_out)?;
    writer::commit(&internal_path, &internal_out)?;

    if !okay {
        eprintln!(
            "{} Dependency scan for \"{}\" completed with errors; output may be incomplete.",
            "!".yellow(),
            info.target_dir
        );
    }
    Ok(okay)
}

fn write_header<W: std::io::Write>(out: &mut W) -> Result<()> {
    writeln!(out, "# Generated by depscan. Do not edit.")?;
    writeln!(out)?;
    Ok(())
}
