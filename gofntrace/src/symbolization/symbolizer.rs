use addr2line::Context;
use gimli::{EndianRcSlice, RunTimeEndian};
use log::debug;
use object::{Object, ObjectSection, ObjectSymbol, SymbolKind};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::rc::Rc;

use super::{
    goroutine_abi, ret_sites, FunctionEntry, FunctionSymbol, ResolvedAddress, SourceLine,
    SymbolResolver,
};
use crate::domain::SymbolError;

pub(crate) type DwarfReader = EndianRcSlice<RunTimeEndian>;

const TLSG_SYMBOL: &str = "runtime.tlsg";

/// A loaded section with its virtual address and file position
#[derive(Debug, Clone, Copy)]
struct SectionSpan {
    address: u64,
    size: u64,
    file_offset: u64,
}

/// Symbol resolver over an ELF executable
///
/// Parses the file once; line lookups are cached since the renderer asks
/// for the same call sites over and over.
pub struct ElfSymbolResolver {
    data: Vec<u8>,
    functions: Vec<FunctionSymbol>,
    /// Indexes into `functions`, sorted by address
    by_address: Vec<usize>,
    by_name: HashMap<String, usize>,
    sections: Vec<SectionSpan>,
    text: Option<SectionSpan>,
    dwarf_ranges: HashMap<String, (u64, u64)>,
    /// `runtime.tlsg` is an STT_TLS symbol, not code
    tlsg: Option<u64>,
    dwarf: gimli::Dwarf<DwarfReader>,
    ctx: Option<Context<DwarfReader>>,
    line_cache: RefCell<HashMap<u64, Option<SourceLine>>>,
}

impl ElfSymbolResolver {
    /// Load symbols and debug info of the binary at `binary_path`
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, or its DWARF
    /// sections are corrupt
    pub fn new<P: AsRef<Path>>(binary_path: P) -> Result<Self, SymbolError> {
        let data = fs::read(binary_path.as_ref())?;
        let obj = object::File::parse(&*data)?;

        let mut functions = Vec::new();
        let mut by_name = HashMap::new();
        let mut tlsg = None;
        for symbol in obj.symbols() {
            if symbol.name().is_ok_and(|name| name == TLSG_SYMBOL) {
                tlsg = Some(symbol.address());
            }
            if symbol.kind() != SymbolKind::Text || symbol.address() == 0 {
                continue;
            }
            let Ok(name) = symbol.name() else { continue };
            if name.is_empty() {
                continue;
            }
            by_name.entry(name.to_string()).or_insert(functions.len());
            functions.push(FunctionSymbol {
                name: name.to_string(),
                address: symbol.address(),
                size: symbol.size(),
            });
        }
        let mut by_address: Vec<usize> = (0..functions.len()).collect();
        by_address.sort_by_key(|&idx| functions[idx].address);

        let sections: Vec<SectionSpan> = obj
            .sections()
            .filter_map(|section| {
                let (file_offset, _) = section.file_range()?;
                Some(SectionSpan { address: section.address(), size: section.size(), file_offset })
            })
            .collect();
        let text = obj.section_by_name(".text").and_then(|section| {
            let (file_offset, _) = section.file_range()?;
            Some(SectionSpan { address: section.address(), size: section.size(), file_offset })
        });

        let dwarf = load_dwarf(&obj)?;
        let dwarf_ranges = collect_subprogram_ranges(&dwarf, &by_name, &functions)?;
        let ctx = match Context::from_dwarf(load_dwarf(&obj)?) {
            Ok(ctx) => Some(ctx),
            Err(e) => {
                debug!("no usable line information: {e}");
                None
            }
        };

        debug!(
            "loaded {} function symbols, {} DWARF subprograms",
            functions.len(),
            dwarf_ranges.len()
        );

        drop(obj);
        Ok(Self {
            data,
            functions,
            by_address,
            by_name,
            sections,
            text,
            dwarf_ranges,
            tlsg,
            dwarf,
            ctx,
            line_cache: RefCell::new(HashMap::new()),
        })
    }

    fn symbol(&self, name: &str) -> Result<&FunctionSymbol, SymbolError> {
        self.by_name
            .get(name)
            .map(|&idx| &self.functions[idx])
            .ok_or_else(|| SymbolError::NotFound(name.to_string()))
    }

    /// Convert a virtual address to an offset in the file
    fn address_to_file_offset(&self, address: u64) -> Result<u64, SymbolError> {
        self.sections
            .iter()
            .find(|s| address >= s.address && address < s.address + s.size)
            .map(|s| address - s.address + s.file_offset)
            .ok_or(SymbolError::AddressNotMapped(address))
    }

    /// Raw bytes of a function's code inside `.text`
    fn function_code(&self, name: &str) -> Result<(&[u8], u64), SymbolError> {
        let (low, high) = self.function_pc_range(name)?;
        let text = self.text.ok_or_else(|| SymbolError::NotFound(".text".to_string()))?;
        if low < text.address || high > text.address + text.size || high < low {
            return Err(SymbolError::PcRangeTooLarge(name.to_string()));
        }
        let start = usize::try_from(low - text.address + text.file_offset)
            .map_err(|_| SymbolError::PcRangeTooLarge(name.to_string()))?;
        let len = usize::try_from(high - low).map_err(|_| SymbolError::PcRangeTooLarge(name.to_string()))?;
        let code = self
            .data
            .get(start..start + len)
            .ok_or_else(|| SymbolError::PcRangeTooLarge(name.to_string()))?;
        Ok((code, low))
    }
}

impl SymbolResolver for ElfSymbolResolver {
    fn function_symbols(&self) -> &[FunctionSymbol] {
        &self.functions
    }

    fn resolve_address(&self, pc: u64) -> Result<ResolvedAddress, SymbolError> {
        let not_found = || SymbolError::NotFound(format!("0x{pc:x}"));

        // last symbol starting at or below pc
        let upper = self.by_address.partition_point(|&idx| self.functions[idx].address <= pc);
        let start = self.functions[*self.by_address[..upper].last().ok_or_else(not_found)?].address;

        let symbols: Vec<&FunctionSymbol> = self.by_address[..upper]
            .iter()
            .rev()
            .map(|&idx| &self.functions[idx])
            .take_while(|f| f.address == start)
            .collect();

        let offset = pc - start;
        let largest = symbols.iter().map(|f| f.size).max().unwrap_or(0);
        if largest != 0 && offset >= largest {
            return Err(not_found());
        }

        // restore symbol-table order among aliases
        let mut symbols = symbols;
        symbols.reverse();
        Ok(ResolvedAddress { symbols: symbols.into_iter().map(|f| f.name.clone()).collect(), offset })
    }

    fn function_entry(&self, name: &str) -> Result<FunctionEntry, SymbolError> {
        let symbol = self.symbol(name)?;
        let file_offset = self.address_to_file_offset(symbol.address)?;
        Ok(FunctionEntry { address: symbol.address, file_offset })
    }

    fn function_pc_range(&self, name: &str) -> Result<(u64, u64), SymbolError> {
        if let Some(&range) = self.dwarf_ranges.get(name) {
            return Ok(range);
        }
        let symbol = self.symbol(name)?;
        if symbol.size == 0 {
            return Err(SymbolError::NotFound(format!("{name} (no size in symbol table)")));
        }
        Ok((symbol.address, symbol.address + symbol.size))
    }

    fn function_return_offsets(&self, name: &str) -> Result<Vec<u64>, SymbolError> {
        let (code, low) = self.function_code(name)?;
        ret_sites::find_return_addresses(code, low)
            .into_iter()
            .map(|addr| self.address_to_file_offset(addr))
            .collect()
    }

    fn line_info(&self, pc: u64) -> Option<SourceLine> {
        if let Some(cached) = self.line_cache.borrow().get(&pc) {
            return cached.clone();
        }

        let resolved = self.ctx.as_ref().and_then(|ctx| {
            let location = ctx.find_location(pc).ok()??;
            Some(SourceLine { file: location.file?.to_string(), line: location.line? })
        });

        self.line_cache.borrow_mut().insert(pc, resolved.clone());
        resolved
    }

    fn thread_local_g_offset(&self) -> Result<i64, SymbolError> {
        goroutine_abi::g_offset(&self.data, self.tlsg)
    }

    fn goroutine_id_field_offset(&self) -> Result<i64, SymbolError> {
        goroutine_abi::goid_offset(&self.dwarf)
    }
}

fn load_dwarf(obj: &object::File<'_>) -> Result<gimli::Dwarf<DwarfReader>, SymbolError> {
    let endian = if obj.is_little_endian() { RunTimeEndian::Little } else { RunTimeEndian::Big };

    let load_section = |id: gimli::SectionId| -> Result<DwarfReader, gimli::Error> {
        let data = obj
            .section_by_name(id.name())
            .and_then(|section| section.uncompressed_data().ok())
            .unwrap_or(std::borrow::Cow::Borrowed(&[][..]));
        Ok(EndianRcSlice::new(Rc::from(&*data), endian))
    };

    Ok(gimli::Dwarf::load(&load_section)?)
}

/// PC ranges of non-inlined subprograms that are also in the symbol table.
///
/// A DIE only counts when its `low_pc` equals the symbol's address; inlined
/// copies and functions stripped from `.symtab` are skipped.
fn collect_subprogram_ranges(
    dwarf: &gimli::Dwarf<DwarfReader>,
    by_name: &HashMap<String, usize>,
    functions: &[FunctionSymbol],
) -> Result<HashMap<String, (u64, u64)>, SymbolError> {
    use gimli::Reader as _;

    let mut ranges = HashMap::new();
    let mut units = dwarf.units();
    while let Some(header) = units.next()? {
        let unit = dwarf.unit(header)?;
        let mut entries = unit.entries();
        while let Some((_, entry)) = entries.next_dfs()? {
            if entry.tag() != gimli::DW_TAG_subprogram {
                continue;
            }
            let Some(name_attr) = entry.attr_value(gimli::DW_AT_name)? else { continue };
            let name = dwarf.attr_string(&unit, name_attr)?.to_string_lossy()?.into_owned();
            let Some(&idx) = by_name.get(&name) else { continue };

            let Some(low_attr) = entry.attr_value(gimli::DW_AT_low_pc)? else { continue };
            let Some(low) = dwarf.attr_address(&unit, low_attr)? else { continue };
            if functions[idx].address != low {
                continue;
            }

            // DWARF 4+ may encode high_pc as a length
            let high = match entry.attr_value(gimli::DW_AT_high_pc)? {
                Some(gimli::AttributeValue::Addr(addr)) => addr,
                Some(other) => match other.udata_value() {
                    Some(len) => low + len,
                    None => continue,
                },
                None => continue,
            };
            ranges.insert(name, (low, high));
        }
    }
    Ok(ranges)
}
