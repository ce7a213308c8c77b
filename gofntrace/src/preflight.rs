//! Pre-flight checks for gofntrace
//!
//! Validates system requirements and the target binary before any symbol
//! work or eBPF loading happens. Provides clear, actionable error messages
//! when requirements aren't met.

#![allow(unsafe_code)] // geteuid() and setrlimit() require unsafe

use anyhow::{bail, Context, Result};
use log::{debug, warn};
use object::elf::{EM_X86_64, ET_EXEC};
use object::read::elf::{ElfFile64, FileHeader};
use object::{Endianness, Object, ObjectSection};
use std::path::Path;

/// Minimum kernel version: BPF ring buffers arrived in 5.8
const MIN_KERNEL_VERSION: (u32, u32) = (5, 8);

/// Open file limit requested for large probe sets (one fd per uprobe link)
const NOFILE_LIMIT: libc::rlim_t = 1_048_576;

/// Run all pre-flight checks that do not need the kernel
///
/// # Errors
/// Returns the first failed check with a human-readable explanation
pub fn run_binary_checks(binary: &Path) -> Result<()> {
    check_binary_exists(binary)?;
    let data = std::fs::read(binary).with_context(|| format!("Failed to read binary: {}", binary.display()))?;
    check_go_executable(binary, &data)?;
    Ok(())
}

/// Checks needed before touching the kernel
///
/// # Errors
/// Returns an error when not running as root or the kernel is too old
pub fn run_kernel_checks() -> Result<()> {
    check_privileges()?;
    check_kernel_version()?;
    Ok(())
}

/// Check if running with sufficient privileges for eBPF
fn check_privileges() -> Result<()> {
    if unsafe { libc::geteuid() } == 0 {
        return Ok(());
    }

    bail!(
        "Permission denied: gofntrace requires root privileges to load eBPF programs.\n\n\
         Run with: sudo gofntrace ..."
    );
}

/// Check if the kernel version is sufficient for eBPF features
fn check_kernel_version() -> Result<()> {
    let version_str = std::fs::read_to_string("/proc/version")
        .context("Failed to read kernel version from /proc/version")?;

    // "Linux version 6.1.0-arch1-1 ..."
    let release = version_str.split_whitespace().nth(2).unwrap_or("unknown");
    let Some((major, minor)) = parse_kernel_release(release) else {
        return Ok(());
    };

    if (major, minor) < MIN_KERNEL_VERSION {
        bail!(
            "Kernel version {major}.{minor} is too old.\n\n\
             gofntrace requires Linux {}.{} or newer for eBPF ring buffer support.\n\
             Current kernel: {release}",
            MIN_KERNEL_VERSION.0,
            MIN_KERNEL_VERSION.1,
        );
    }

    Ok(())
}

fn parse_kernel_release(release: &str) -> Option<(u32, u32)> {
    let mut parts = release.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts
        .next()?
        .chars()
        .take_while(char::is_ascii_digit)
        .collect::<String>()
        .parse()
        .ok()?;
    Some((major, minor))
}

/// Check if the target binary exists and is a file
fn check_binary_exists(binary: &Path) -> Result<()> {
    if !binary.exists() {
        bail!(
            "Binary not found: {}\n\n\
             Make sure the path is correct and the binary exists.",
            binary.display()
        );
    }
    if !binary.is_file() {
        bail!(
            "Not a file: {}\n\n\
             BINARY must point to an executable file, not a directory.",
            binary.display()
        );
    }
    Ok(())
}

/// The tracer needs a non-PIE x86-64 executable with a symbol table
fn check_go_executable(binary: &Path, data: &[u8]) -> Result<()> {
    let elf = ElfFile64::<Endianness>::parse(data)
        .with_context(|| format!("{} is not a 64-bit ELF file", binary.display()))?;

    let header = elf.elf_header();
    let endian = elf.endian();
    if header.e_machine(endian) != EM_X86_64 {
        bail!("{}: only x86-64 executables are supported", binary.display());
    }
    if header.e_type(endian) != ET_EXEC {
        bail!(
            "{}: position independent executables are not supported.\n\n\
             Rebuild with: go build -buildmode=exe",
            binary.display()
        );
    }

    let has_symtab = elf.section_by_name(".symtab").is_some_and(|s| s.size() > 0);
    if !has_symtab {
        bail!(
            "{}: binary is stripped (no .symtab).\n\n\
             Rebuild without -ldflags=\"-s\"",
            binary.display()
        );
    }

    let has_debug_info = elf.section_by_name(".debug_info").is_some_and(|s| s.size() > 0);
    if !has_debug_info {
        warn!("no DWARF debug info, source locations and goroutine ids may be unavailable");
    }

    Ok(())
}

/// Raise RLIMIT_MEMLOCK (eBPF maps on older kernels) and RLIMIT_NOFILE
/// (one perf link fd per uprobe)
///
/// # Errors
/// Returns an error if either limit cannot be raised
pub fn raise_rlimits() -> Result<()> {
    set_rlimit(libc::RLIMIT_MEMLOCK, libc::RLIM_INFINITY).context("Failed to raise RLIMIT_MEMLOCK")?;
    set_rlimit(libc::RLIMIT_NOFILE, NOFILE_LIMIT).context("Failed to raise RLIMIT_NOFILE")?;
    debug!("rlimits raised: memlock=unlimited nofile={NOFILE_LIMIT}");
    Ok(())
}

fn set_rlimit(resource: libc::__rlimit_resource_t, limit: libc::rlim_t) -> std::io::Result<()> {
    let rlim = libc::rlimit { rlim_cur: limit, rlim_max: limit };
    if unsafe { libc::setrlimit(resource, &rlim) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}
