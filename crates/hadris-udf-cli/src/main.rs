//! `chkudf`: a read-only consistency checker for UDF volume images.
//!
//! Walks a volume from its root directory and reports every structural
//! problem found (tag damage, overlapping allocations, free-space/link-count
//! mismatches) without stopping at the first one. This binary never repairs
//! a volume; `-n`/`-y` are accepted for compatibility with the traditional
//! `fsck`-family option set but have no effect beyond being logged, since
//! repair is outside this crate's scope.

use std::fs::File;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use hadris_udf::checker::CheckReport;
use hadris_udf::error::UdfError;
use hadris_udf::options::MountOptions;
use hadris_udf::Volume;

/// Bitwise-OR'd onto the process exit code, mirroring the traditional
/// `fsck` convention chkudf follows.
mod exit_bits {
    pub const CLEAN: u8 = 0;
    pub const MINOR_ISSUES: u8 = 1;
    pub const UNCORRECTED: u8 = 2;
    pub const OPERATIONAL_ERROR: u8 = 4;
    pub const USAGE_ERROR: u8 = 8;
}

#[derive(Parser, Debug)]
#[command(name = "chkudf", about = "Check a UDF volume image for structural errors")]
struct Args {
    /// Pre-answer every repair prompt "no" (default). Accepted for
    /// compatibility; this build never repairs a volume.
    #[arg(short = 'n', conflicts_with = "yes")]
    no: bool,

    /// Pre-answer every repair prompt "yes". Accepted for compatibility;
    /// this build never repairs a volume.
    #[arg(short = 'y')]
    yes: bool,

    /// Verbose: print every finding, not just the summary.
    #[arg(short = 'v')]
    verbose: bool,

    /// Debug: verbose plus internal tracing of the mount and walk.
    #[arg(short = 'd')]
    debug: bool,

    /// Device or image file to check.
    device_or_file: PathBuf,

    /// Force the sector size instead of probing the medium.
    #[arg(long = "bs")]
    sector_size: Option<u32>,

    /// Skip the Volume Recognition Sequence scan.
    #[arg(long)]
    novrs: bool,
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::from(exit_bits::USAGE_ERROR);
        }
    };

    let level = if args.debug {
        tracing::Level::DEBUG
    } else if args.verbose {
        tracing::Level::INFO
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    if args.yes {
        tracing::info!("-y given: chkudf does not repair volumes, issues will be reported but left uncorrected");
    }

    run(&args)
}

fn run(args: &Args) -> ExitCode {
    let file = match File::open(&args.device_or_file) {
        Ok(f) => f,
        Err(err) => {
            eprintln!("chkudf: cannot open {}: {err}", args.device_or_file.display());
            return ExitCode::from(exit_bits::OPERATIONAL_ERROR);
        }
    };

    let mut options = MountOptions::default().with_skip_vrs(args.novrs);
    if let Some(bs) = args.sector_size {
        options = options.with_sector_size(bs);
    }

    tracing::debug!(path = %args.device_or_file.display(), "mounting volume");
    let mut volume = match Volume::mount(file, options) {
        Ok(v) => v,
        Err(err) => return report_mount_failure(&err),
    };

    tracing::debug!("walking volume for consistency check");
    let report = match volume.check() {
        Ok(r) => r,
        Err(err) => return report_mount_failure(&err),
    };

    print_report(&report, args.verbose || args.debug);

    if report.is_clean() {
        println!("chkudf: clean");
        ExitCode::from(exit_bits::CLEAN)
    } else {
        println!(
            "chkudf: {} issue(s) found, {} tags validated, {} file(s), {} director(ies), {} symlink(s)",
            report.findings.len(),
            report.tally.tags_validated,
            report.tally.files_visited,
            report.tally.directories_visited,
            report.tally.symlinks_visited,
        );
        let bits = if report.has_fatal_findings() {
            exit_bits::UNCORRECTED
        } else {
            exit_bits::MINOR_ISSUES
        };
        ExitCode::from(bits)
    }
}

fn report_mount_failure(err: &UdfError) -> ExitCode {
    eprintln!("chkudf: {err}");
    match err {
        UdfError::Io(_) => ExitCode::from(exit_bits::OPERATIONAL_ERROR),
        _ => ExitCode::from(exit_bits::OPERATIONAL_ERROR | exit_bits::UNCORRECTED),
    }
}

fn print_report(report: &CheckReport, verbose: bool) {
    if !verbose {
        return;
    }
    for finding in &report.findings {
        println!(
            "sector {}: {:?} (expected {:#x}, found {:#x}) -- {}",
            finding.error.sector, finding.error.code, finding.error.expected, finding.error.found, finding.context
        );
    }
}
