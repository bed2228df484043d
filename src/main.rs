/*!
 * NoDump Probe - Main Entry Point
 *
 * Allocates through a nodump allocator and reports whether the pages backing
 * the allocation are excluded from core dumps:
 * - NODUMP_PROBE_BYTES: bytes to allocate (default: 4 MiB)
 * - NODUMP_PROBE_JSON: print the report as JSON (default: false)
 *
 * Exit codes: 0 excluded, 1 not excluded, 2 unsupported.
 */

use nodump_alloc::monitoring::smaps::{self, Mapping};
use nodump_alloc::{
    init_tracing, is_supported, new_nodump_allocator, JemallocControl, NoDumpOptions,
};
use serde::Serialize;
use std::error::Error;
use std::process::ExitCode;
use tracing::{error, info, warn};

#[cfg(all(feature = "jemalloc", not(target_env = "msvc")))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

const DEFAULT_PROBE_BYTES: usize = 4 << 20;

#[derive(Debug, Serialize)]
struct ProbeReport {
    allocator: &'static str,
    label: String,
    jemalloc_version: Option<String>,
    requested: usize,
    usable: usize,
    address: usize,
    mapping: Option<Mapping>,
    dump_excluded: bool,
}

fn probe_bytes() -> usize {
    std::env::var("NODUMP_PROBE_BYTES")
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|&n: &usize| n > 0)
        .unwrap_or(DEFAULT_PROBE_BYTES)
}

fn json_requested() -> bool {
    std::env::var("NODUMP_PROBE_JSON")
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false)
}

fn run(bytes: usize) -> Result<ProbeReport, Box<dyn Error>> {
    let options = NoDumpOptions::from_env();
    let label = options.label.clone();
    let allocator = new_nodump_allocator(options)?;

    let ptr = allocator
        .allocate(bytes)
        .ok_or_else(|| format!("allocation of {} bytes failed", bytes))?;
    // SAFETY: `ptr` was just returned by this allocator.
    let usable = unsafe { allocator.usable_size(ptr, bytes) };
    let address = ptr.as_ptr() as usize;
    let mapping = smaps::mapping_for(address);

    // SAFETY: allocated above and not used past this point.
    unsafe { allocator.deallocate(ptr) };

    let mapping = mapping?;
    let dump_excluded = mapping.as_ref().is_some_and(Mapping::is_dump_excluded);

    Ok(ProbeReport {
        allocator: allocator.name(),
        label,
        jemalloc_version: JemallocControl::new().version().ok(),
        requested: bytes,
        usable,
        address,
        mapping,
        dump_excluded,
    })
}

fn print_report(report: &ProbeReport, json: bool) -> Result<(), Box<dyn Error>> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("allocator:     {} ({})", report.allocator, report.label);
    if let Some(version) = &report.jemalloc_version {
        println!("jemalloc:      {}", version);
    }
    println!(
        "allocation:    {} bytes at {:#x} (usable {})",
        report.requested, report.address, report.usable
    );
    match &report.mapping {
        Some(m) => println!(
            "mapping:       {:#x}-{:#x} {} [{}]",
            m.start,
            m.end,
            m.perms,
            m.vm_flags.join(" ")
        ),
        None => println!("mapping:       not found in smaps"),
    }
    println!("dump excluded: {}", report.dump_excluded);
    Ok(())
}

fn main() -> ExitCode {
    init_tracing();

    if let Err(e) = is_supported() {
        warn!(error = %e, "nodump allocator unavailable");
        eprintln!("{}", e);
        return ExitCode::from(2);
    }

    let bytes = probe_bytes();
    info!(bytes, "probing nodump allocation");

    let report = match run(bytes) {
        Ok(report) => report,
        Err(e) => {
            error!(error = %e, "probe failed");
            eprintln!("{}", e);
            return ExitCode::from(2);
        }
    };

    if let Err(e) = print_report(&report, json_requested()) {
        error!(error = %e, "failed to print report");
        return ExitCode::FAILURE;
    }

    if report.dump_excluded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
