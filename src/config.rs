//! Configuration module.
//!
//! This module defines the command-line interface (CLI) for the packager using `clap`.
//! Parsed arguments are turned into an immutable [`PackOptions`] for the library.

use clap::Parser;
use std::path::PathBuf;

use crate::packager::PackOptions;

/// Packs a kernel and ramdisk into a sector-aligned boot image.
///
/// The ramdisk (and optional recovery image) positions are recorded in a
/// BOOT_IMAGE_OFFSETS table stored in the sector right after the kernel.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Kernel image, copied to the start of the output
    #[arg(long, value_name = "PATH")]
    pub kernel: PathBuf,

    /// Ramdisk image, recorded in the table as `boot`
    #[arg(long, value_name = "PATH")]
    pub ramdisk: PathBuf,

    /// Optional recovery image, recorded in the table as `recovery`
    #[arg(long, value_name = "PATH")]
    pub recovery: Option<PathBuf>,

    /// Output file
    #[arg(short, long, value_name = "PATH", help = "Path to the output boot image")]
    pub output: PathBuf,

    /// Kernel command line (accepted, not embedded)
    #[arg(long)]
    pub cmdline: Option<String>,

    /// Load base address in hex (accepted, not embedded)
    #[arg(long, value_parser = parse_address)]
    pub base: Option<u64>,

    /// Target page size (accepted, not embedded)
    #[arg(long, value_parser = parse_pagesize)]
    pub pagesize: Option<u32>,

    /// Re-read the output after writing and compare it with the inputs
    #[arg(long)]
    pub verify: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(
        long,
        default_value = "info",
        value_parser = ["error", "warn", "info", "debug", "trace"],
        help = "Set the logging level"
    )]
    pub log_level: String,
}

impl Config {
    pub fn pack_options(&self) -> PackOptions {
        PackOptions {
            kernel: self.kernel.clone(),
            ramdisk: self.ramdisk.clone(),
            recovery: self.recovery.clone(),
            output: self.output.clone(),
            cmdline: self.cmdline.clone(),
            base: self.base,
            pagesize: self.pagesize,
        }
    }
}

/// Parses a hexadecimal address, with or without a `0x` prefix.
fn parse_address(s: &str) -> Result<u64, String> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u64::from_str_radix(digits, 16).map_err(|e| format!("invalid address {s:?}: {e}"))
}

fn parse_pagesize(s: &str) -> Result<u32, String> {
    let size: u32 = s.parse().map_err(|e| format!("invalid page size {s:?}: {e}"))?;
    if !size.is_power_of_two() {
        return Err(format!("page size {size} is not a power of two"));
    }
    Ok(size)
}
