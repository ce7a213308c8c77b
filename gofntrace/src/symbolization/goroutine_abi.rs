//! Go runtime ABI constants the kernel probe needs to read the goroutine id
//!
//! On amd64 the current `g` is stored in thread-local storage just below the
//! FS base. The probe reads `*(fs_base + g_offset)` to get the `g` pointer,
//! then `*(g + goid_offset)` to get the goroutine id.

use gimli::Reader as _;
use log::debug;
use object::elf::PT_TLS;
use object::read::elf::{ElfFile64, ProgramHeader as _};
use object::Endianness;

use super::symbolizer::DwarfReader;
use crate::domain::SymbolError;

/// Offset used by the Go toolchain when no TLS segment is present
pub const DEFAULT_G_OFFSET: i64 = -8;

const G_STRUCT: &str = "runtime.g";
const GOID_FIELD: &str = "goid";

/// Offset of the `g` pointer from the FS base
///
/// `tlsg` is the value of the `runtime.tlsg` symbol, if the binary has one.
///
/// # Errors
/// Returns an error if `data` is not a 64-bit ELF file
pub fn g_offset(data: &[u8], tlsg: Option<u64>) -> Result<i64, SymbolError> {
    let Some(tlsg) = tlsg else {
        debug!("no runtime.tlsg symbol, using g offset {DEFAULT_G_OFFSET}");
        return Ok(DEFAULT_G_OFFSET);
    };

    let elf = ElfFile64::<Endianness>::parse(data)?;
    let endian = elf.endian();
    let tls = elf
        .elf_program_headers()
        .iter()
        .find(|header| header.p_type(endian) == PT_TLS);

    let Some(tls) = tls else {
        debug!("no PT_TLS segment, using g offset {DEFAULT_G_OFFSET}");
        return Ok(DEFAULT_G_OFFSET);
    };

    Ok(tls_relative_offset(
        tlsg,
        tls.p_vaddr(endian),
        tls.p_memsz(endian),
        tls.p_align(endian),
    ))
}

/// Variant II TLS: the block ends at the thread pointer, and its size is
/// rounded so that `vaddr + memsz` lands on the segment alignment.
#[allow(clippy::cast_possible_wrap)]
fn tls_relative_offset(tlsg: u64, vaddr: u64, memsz: u64, align: u64) -> i64 {
    let mask = align.max(1) - 1;
    let padding = vaddr.wrapping_neg().wrapping_sub(memsz) & mask;
    let block = memsz.wrapping_add(padding);
    tlsg.wrapping_sub(block) as i64
}

/// Byte offset of `goid` in `runtime.g`, from DWARF
///
/// # Errors
/// [`SymbolError::NoDebugInfo`] if the struct or field is not described
pub fn goid_offset(dwarf: &gimli::Dwarf<DwarfReader>) -> Result<i64, SymbolError> {
    let mut units = dwarf.units();
    while let Some(header) = units.next()? {
        let unit = dwarf.unit(header)?;
        let mut entries = unit.entries();
        let mut depth: isize = 0;
        let mut g_depth: Option<isize> = None;

        while let Some((delta, entry)) = entries.next_dfs()? {
            depth += delta;

            if g_depth.is_some_and(|struct_depth| depth <= struct_depth) {
                g_depth = None;
            }

            if let Some(struct_depth) = g_depth {
                if depth == struct_depth + 1
                    && entry.tag() == gimli::DW_TAG_member
                    && entry_name(dwarf, &unit, entry)?.as_deref() == Some(GOID_FIELD)
                {
                    let location = entry
                        .attr_value(gimli::DW_AT_data_member_location)?
                        .and_then(|value| value.udata_value());
                    if let Some(offset) = location.and_then(|o| i64::try_from(o).ok()) {
                        debug!("runtime.g.goid at offset {offset}");
                        return Ok(offset);
                    }
                }
                continue;
            }

            if entry.tag() == gimli::DW_TAG_structure_type
                && entry_name(dwarf, &unit, entry)?.as_deref() == Some(G_STRUCT)
            {
                g_depth = Some(depth);
            }
        }
    }

    Err(SymbolError::NoDebugInfo(format!("{G_STRUCT}.{GOID_FIELD}")))
}

fn entry_name(
    dwarf: &gimli::Dwarf<DwarfReader>,
    unit: &gimli::Unit<DwarfReader>,
    entry: &gimli::DebuggingInformationEntry<'_, '_, DwarfReader>,
) -> Result<Option<String>, SymbolError> {
    let Some(value) = entry.attr_value(gimli::DW_AT_name)? else {
        return Ok(None);
    };
    Ok(Some(dwarf.attr_string(unit, value)?.to_string_lossy()?.into_owned()))
}
