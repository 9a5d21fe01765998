use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;

use pciback_quirks::sysfs::{DEFAULT_QUIRKS_FILE, DEFAULT_SLOTS_FILE, DEFAULT_SYSFS_ROOT};
use pciback_quirks::{load_quirks, read_bound_devices, write_descriptors, SysfsPci};

/// Exit code when the document loads but no quirk survives validation.
const EXIT_NO_QUIRKS: u8 = 3;

#[derive(Debug, Parser)]
#[command(name = "pciback_quirks")]
#[command(about = "Generate pciback config-space quirk descriptors from a JSON quirk list")]
struct Cli {
    /// Path to the quirks JSON document (an array of quirk objects).
    quirks_json: PathBuf,

    /// Pciback slots file listing bound devices, one address per line.
    #[arg(long, default_value = DEFAULT_SLOTS_FILE)]
    slots: PathBuf,

    /// Destination file the descriptor lines are written to.
    #[arg(long, default_value = DEFAULT_QUIRKS_FILE)]
    output: PathBuf,

    /// Sysfs directory containing the per-device attribute directories.
    #[arg(long, default_value = DEFAULT_SYSFS_ROOT)]
    sysfs_root: PathBuf,

    /// Print a summary of the sweep.
    #[arg(long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(&cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<ExitCode> {
    let text = std::fs::read_to_string(&cli.quirks_json)
        .with_context(|| format!("read {}", cli.quirks_json.display()))?;
    let report = load_quirks(&text)
        .with_context(|| format!("load quirks from {}", cli.quirks_json.display()))?;

    for message in &report.skipped {
        eprintln!("warning: {message}");
    }

    if report.quirks.is_empty() {
        eprintln!("no quirks found in {}", cli.quirks_json.display());
        return Ok(ExitCode::from(EXIT_NO_QUIRKS));
    }

    // An unreadable or empty slots file is not fatal: the sweep still runs
    // (over nothing) and leaves an empty output file behind.
    let devices = match read_bound_devices(&cli.slots) {
        Ok(devices) => devices,
        Err(err) => {
            eprintln!("warning: {err:#}");
            Vec::new()
        }
    };
    if devices.is_empty() {
        eprintln!("warning: no bound devices found in {}", cli.slots.display());
    }

    let file = File::create(&cli.output)
        .with_context(|| format!("open output file {}", cli.output.display()))?;
    let mut out = BufWriter::new(file);

    let pci = SysfsPci::new(cli.sysfs_root.clone());
    let sweep = write_descriptors(&mut out, &report.quirks, &devices, |addr| pci.identity(addr))?;
    out.flush()
        .with_context(|| format!("flush output file {}", cli.output.display()))?;

    for message in &sweep.skipped {
        eprintln!("warning: {message}");
    }

    if cli.verbose {
        println!(
            "wrote {} descriptor line(s) for {} device(s) using {} quirk(s)",
            sweep.lines_written,
            devices.len(),
            report.quirks.len()
        );
    }

    Ok(ExitCode::SUCCESS)
}
