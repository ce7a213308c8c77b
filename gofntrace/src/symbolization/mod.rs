//! # Symbol Resolution
//!
//! Everything the tracer needs to know about the target binary goes through
//! the [`SymbolResolver`] trait:
//!
//! - **Plan building** asks for function symbols, entry offsets, and the
//!   file offset of every `ret` instruction of a function.
//! - **Correlation** maps the instruction pointer of an event back to
//!   `symbol+offset`, which keys the instrumentation point lookup.
//! - **Rendering** asks for caller symbols and source `file:line`.
//! - **Probe loading** needs two Go runtime ABI constants: where the
//!   current `g` lives relative to the FS base, and where `goid` lives
//!   inside `g`.
//!
//! ## Why No Address Adjustment
//!
//! Only non-PIE executables are supported. Their code is mapped at the
//! link-time virtual address, so instruction pointers reported by the
//! kernel can be looked up directly in the symbol table and DWARF without
//! subtracting a load base.
//!
//! ## Module Structure
//!
//! - **`symbolizer`**: [`ElfSymbolResolver`], the implementation over an
//!   ELF file (`object` for sections/symbols, `addr2line` + `gimli` for
//!   DWARF)
//! - **`ret_sites`**: return-instruction discovery with `iced-x86`
//! - **`goroutine_abi`**: TLS `g` offset and `runtime.g.goid` offset

pub mod goroutine_abi;
pub mod ret_sites;
pub mod symbolizer;

pub use symbolizer::ElfSymbolResolver;

use crate::domain::SymbolError;

/// A code symbol from the binary's symbol table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSymbol {
    pub name: String,
    pub address: u64,
    pub size: u64,
}

/// Result of mapping an address back to the symbol table
///
/// `symbols` holds every name starting at the same address (aliases), in
/// symbol-table order; `offset` is the distance from that address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAddress {
    pub symbols: Vec<String>,
    pub offset: u64,
}

impl ResolvedAddress {
    /// Primary name, used for display
    #[must_use]
    pub fn primary(&self) -> &str {
        self.symbols.first().map_or("?", String::as_str)
    }
}

/// Where a function starts, in memory and in the file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionEntry {
    pub address: u64,
    pub file_offset: u64,
}

/// Source position of an instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLine {
    pub file: String,
    pub line: u32,
}

/// Read-only view of the traced binary
pub trait SymbolResolver {
    /// Executable-code symbols in symbol-table order
    fn function_symbols(&self) -> &[FunctionSymbol];

    /// Map an instruction pointer to `symbol+offset`
    ///
    /// # Errors
    /// [`SymbolError::NotFound`] when no symbol covers `pc`
    fn resolve_address(&self, pc: u64) -> Result<ResolvedAddress, SymbolError>;

    /// Entry address and file offset of a function
    ///
    /// # Errors
    /// [`SymbolError::NotFound`] for unknown functions
    fn function_entry(&self, name: &str) -> Result<FunctionEntry, SymbolError>;

    /// `[low, high)` program counter range of a function
    ///
    /// # Errors
    /// [`SymbolError::NotFound`] for unknown functions
    fn function_pc_range(&self, name: &str) -> Result<(u64, u64), SymbolError>;

    /// File offsets of every return instruction of a function
    ///
    /// # Errors
    /// Fails when the function's code cannot be located or decoded
    fn function_return_offsets(&self, name: &str) -> Result<Vec<u64>, SymbolError>;

    /// Source position of `pc`, if debug info covers it
    fn line_info(&self, pc: u64) -> Option<SourceLine>;

    /// Offset of the `runtime.g` pointer relative to the FS base
    ///
    /// # Errors
    /// Fails when the binary's headers cannot be read
    fn thread_local_g_offset(&self) -> Result<i64, SymbolError>;

    /// Offset of the `goid` field inside `runtime.g`
    ///
    /// # Errors
    /// [`SymbolError::NoDebugInfo`] when DWARF does not describe `runtime.g`
    fn goroutine_id_field_offset(&self) -> Result<i64, SymbolError>;
}
