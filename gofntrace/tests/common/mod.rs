//! In-memory binary used by the integration tests
//!
//! Functions are laid out 0x100 bytes apart from 0x40_1000, file offsets
//! are `address - 0x40_0000`. `runtime.goexit1` is always present.

#![allow(dead_code)]

use std::collections::HashMap;

use gofntrace::correlation::{ArgPayload, PayloadTag, RawEvent};
use gofntrace::domain::{GoroutineId, PointId, SymbolError};
use gofntrace::plan::ProbeKind;
use gofntrace::symbolization::{FunctionEntry, FunctionSymbol, ResolvedAddress, SourceLine, SymbolResolver};

pub const BASE: u64 = 0x40_1000;
pub const SPACING: u64 = 0x100;
pub const FILE_BASE: u64 = 0x40_0000;

pub struct FakeBinary {
    symbols: Vec<FunctionSymbol>,
    returns: HashMap<String, Vec<u64>>,
    lines: HashMap<u64, SourceLine>,
}

impl FakeBinary {
    /// `(name, return offsets relative to entry)`
    pub fn new(functions: &[(&str, &[u64])]) -> Self {
        let mut symbols = Vec::new();
        let mut returns = HashMap::new();
        let all = functions.iter().copied().chain(std::iter::once(("runtime.goexit1", &[0x10u64][..])));
        for (idx, (name, rets)) in all.enumerate() {
            let address = BASE + SPACING * idx as u64;
            symbols.push(FunctionSymbol { name: name.to_string(), address, size: SPACING });
            returns.insert(name.to_string(), rets.to_vec());
        }
        Self { symbols, returns, lines: HashMap::new() }
    }

    pub fn with_line(mut self, pc: u64, file: &str, line: u32) -> Self {
        self.lines.insert(pc, SourceLine { file: file.to_string(), line });
        self
    }

    pub fn address_of(&self, name: &str) -> u64 {
        self.symbols.iter().find(|s| s.name == name).map(|s| s.address).unwrap()
    }
}

impl SymbolResolver for FakeBinary {
    fn function_symbols(&self) -> &[FunctionSymbol] {
        &self.symbols
    }

    fn resolve_address(&self, pc: u64) -> Result<ResolvedAddress, SymbolError> {
        self.symbols
            .iter()
            .find(|s| (s.address..s.address + s.size).contains(&pc))
            .map(|s| ResolvedAddress { symbols: vec![s.name.clone()], offset: pc - s.address })
            .ok_or(SymbolError::AddressNotMapped(pc))
    }

    fn function_entry(&self, name: &str) -> Result<FunctionEntry, SymbolError> {
        let address = self
            .symbols
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.address)
            .ok_or_else(|| SymbolError::NotFound(name.to_string()))?;
        Ok(FunctionEntry { address, file_offset: address - FILE_BASE })
    }

    fn function_pc_range(&self, name: &str) -> Result<(u64, u64), SymbolError> {
        let entry = self.function_entry(name)?;
        Ok((entry.address, entry.address + SPACING))
    }

    fn function_return_offsets(&self, name: &str) -> Result<Vec<u64>, SymbolError> {
        let entry = self.function_entry(name)?;
        Ok(self.returns[name].iter().map(|r| entry.file_offset + r).collect())
    }

    fn line_info(&self, pc: u64) -> Option<SourceLine> {
        self.lines.get(&pc).cloned()
    }

    fn thread_local_g_offset(&self) -> Result<i64, SymbolError> {
        Ok(-8)
    }

    fn goroutine_id_field_offset(&self) -> Result<i64, SymbolError> {
        Ok(152)
    }
}

/// Event builder for one goroutine
///
/// Keeps a stack of frame bases so nested and recursive calls carry the
/// caller's frame base, like the kernel probe reports them.
pub struct Goroutine<'b> {
    pub binary: &'b FakeBinary,
    pub goid: u64,
    pub clock: u64,
    frames: Vec<u64>,
    last_entry: Option<RawEvent>,
}

const STACK_TOP: u64 = 0xc000_1000;
const FRAME_SIZE: u64 = 0x100;

impl<'b> Goroutine<'b> {
    pub fn new(binary: &'b FakeBinary, goid: u64) -> Self {
        Self { binary, goid, clock: 0, frames: Vec::new(), last_entry: None }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1_000_000;
        self.clock
    }

    pub fn entry(&mut self, function: &str, caller_ip: u64) -> RawEvent {
        let caller_frame_base = self.frames.last().copied().unwrap_or(STACK_TOP);
        let frame_base = caller_frame_base - FRAME_SIZE;
        self.frames.push(frame_base);
        let event = RawEvent {
            goid: GoroutineId(self.goid),
            ip: self.binary.address_of(function),
            caller_ip,
            frame_base,
            caller_frame_base,
            kind: ProbeKind::Entry,
            time_ns: self.tick(),
        };
        self.last_entry = Some(event);
        event
    }

    /// The last entry reported again after the goroutine stack moved
    pub fn repeated_entry(&mut self) -> RawEvent {
        let mut event = self.last_entry.unwrap();
        event.frame_base += 0x10_0000;
        event.caller_frame_base += 0x10_0000;
        event.time_ns = self.tick();
        event
    }

    pub fn ret(&mut self, function: &str, offset: u64) -> RawEvent {
        let frame_base = self.frames.pop().unwrap_or(STACK_TOP);
        RawEvent {
            goid: GoroutineId(self.goid),
            ip: self.binary.address_of(function) + offset,
            caller_ip: 0,
            frame_base,
            caller_frame_base: frame_base + FRAME_SIZE,
            kind: ProbeKind::Return,
            time_ns: self.tick(),
        }
    }

    pub fn exit(&mut self) -> RawEvent {
        self.frames.clear();
        RawEvent {
            goid: GoroutineId(self.goid),
            ip: self.binary.address_of("runtime.goexit1"),
            caller_ip: 0,
            frame_base: 0,
            caller_frame_base: 0,
            kind: ProbeKind::ThreadExit,
            time_ns: self.tick(),
        }
    }

    pub fn payload(&self, point_id: PointId, arg_index: u8, data: &[u8]) -> ArgPayload {
        ArgPayload {
            goid: GoroutineId(self.goid),
            tag: Some(PayloadTag { point_id, arg_index }),
            data: data.to_vec(),
        }
    }
}
