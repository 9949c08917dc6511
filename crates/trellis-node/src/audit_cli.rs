//! trellis-audit CLI tool
//!
//! Scans a Trellis tree on disk and reports linkage violations.
//!
//! Usage:
//!   trellis-audit [data_dir]
//!   trellis-audit --json [data_dir]
//!
//! Exits 0 when the tree is valid, 1 when violations were found, and 2 when
//! the store could not be read.

use std::path::PathBuf;
use std::process::ExitCode;
use trellis_node::RocksTreeStore;
use trellis_tree::check_integrity;

fn print_usage() {
    eprintln!("trellis-audit - Check a Trellis tree for linkage violations");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  trellis-audit [data_dir]         Print a summary and every violation");
    eprintln!("  trellis-audit --json [data_dir]  Print the report as JSON");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  TRELLIS_DATA_DIR  Data directory (default: ./trellis-data)");
}

fn main() -> ExitCode {
    let mut json = false;
    let mut data_dir = None;

    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--json" => json = true,
            "-h" | "--help" => {
                print_usage();
                return ExitCode::SUCCESS;
            }
            other if other.starts_with('-') => {
                eprintln!("Unknown flag: {}", other);
                print_usage();
                return ExitCode::from(2);
            }
            other => data_dir = Some(PathBuf::from(other)),
        }
    }

    let data_dir = data_dir.unwrap_or_else(|| {
        std::env::var("TRELLIS_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./trellis-data"))
    });

    let store = match RocksTreeStore::open_read_only(&data_dir) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Failed to open {:?}: {}", data_dir, e);
            return ExitCode::from(2);
        }
    };

    let report = match check_integrity(&store) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Scan failed: {}", e);
            return ExitCode::from(2);
        }
    };

    if json {
        match serde_json::to_string_pretty(&report) {
            Ok(out) => println!("{}", out),
            Err(e) => {
                eprintln!("Failed to encode report: {}", e);
                return ExitCode::from(2);
            }
        }
    } else {
        println!("Scanned {} nodes in {:?}", report.nodes_scanned, data_dir);
        for error in &report.errors {
            println!("  {}", error);
        }
        println!("{}", if report.valid { "OK" } else { "INVALID" });
    }

    if report.valid {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}
