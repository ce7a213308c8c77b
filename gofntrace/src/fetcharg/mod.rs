//! # Argument Fetch Expressions
//!
//! A small addressing language describing where a function argument lives
//! at the moment a uprobe fires, and how to turn the captured bytes into
//! text.
//!
//! ## Syntax
//!
//! ```text
//! name=(addressing-expr):type
//!
//! s.name=(*0(%ax)):c64      read 8 bytes at *(ax + 0)
//! n=(+16(%ax)):u64          read a u64 at ax + 16
//! pfx=+0(+8(%ax)):c512      read 64 bytes at (ax + 8) + 0
//! ```
//!
//! Each parenthesized term is one [`AddressingRule`]: `%<reg>` loads a
//! register, `[*]<offset>` adds a signed offset, and a leading `*` reads
//! the pointer stored at the computed address before the next rule runs.
//!
//! ## Evaluation Split
//!
//! The rule chain is executed by the kernel-side program, which copies
//! [`ArgumentFetchSpec::byte_width`] bytes from the final address. Userspace
//! only decodes those bytes with [`ArgumentFetchSpec::evaluate`].

mod parser;
mod value;

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::domain::FetchArgError;

/// Argument name whose value is rendered as a function symbol
pub const CALL_TARGET_NAME: &str = "__call__";

/// x86-64 general purpose register usable as an addressing base
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Register {
    Ax,
    Bx,
    Cx,
    Dx,
    Si,
    Di,
    Bp,
    Sp,
    R8,
    R9,
    R10,
    R11,
    R12,
    R13,
    R14,
    R15,
}

impl Register {
    /// Assembler name without the `%` sigil
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Register::Ax => "ax",
            Register::Bx => "bx",
            Register::Cx => "cx",
            Register::Dx => "dx",
            Register::Si => "si",
            Register::Di => "di",
            Register::Bp => "bp",
            Register::Sp => "sp",
            Register::R8 => "r8",
            Register::R9 => "r9",
            Register::R10 => "r10",
            Register::R11 => "r11",
            Register::R12 => "r12",
            Register::R13 => "r13",
            Register::R14 => "r14",
            Register::R15 => "r15",
        }
    }

    /// Register id understood by the kernel program (`pt_regs` slot)
    #[must_use]
    pub fn wire_id(self) -> u8 {
        use gofntrace_common as wire;
        match self {
            Register::Ax => wire::REG_AX,
            Register::Bx => wire::REG_BX,
            Register::Cx => wire::REG_CX,
            Register::Dx => wire::REG_DX,
            Register::Si => wire::REG_SI,
            Register::Di => wire::REG_DI,
            Register::Bp => wire::REG_BP,
            Register::Sp => wire::REG_SP,
            Register::R8 => wire::REG_R8,
            Register::R9 => wire::REG_R9,
            Register::R10 => wire::REG_R10,
            Register::R11 => wire::REG_R11,
            Register::R12 => wire::REG_R12,
            Register::R13 => wire::REG_R13,
            Register::R14 => wire::REG_R14,
            Register::R15 => wire::REG_R15,
        }
    }
}

impl FromStr for Register {
    type Err = FetchArgError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "ax" => Register::Ax,
            "bx" => Register::Bx,
            "cx" => Register::Cx,
            "dx" => Register::Dx,
            "si" => Register::Si,
            "di" => Register::Di,
            "bp" => Register::Bp,
            "sp" => Register::Sp,
            "r8" => Register::R8,
            "r9" => Register::R9,
            "r10" => Register::R10,
            "r11" => Register::R11,
            "r12" => Register::R12,
            "r13" => Register::R13,
            "r14" => Register::R14,
            "r15" => Register::R15,
            other => return Err(FetchArgError::UnknownRegister(other.to_string())),
        })
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.as_str())
    }
}

/// Where one addressing step takes its value from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RuleSource {
    /// Load the register's value
    Register(Register),
    /// Add a signed byte offset to the address computed so far
    StackOffset(i64),
}

/// One step of an addressing computation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AddressingRule {
    pub source: RuleSource,
    /// Read the pointer stored at the computed address before continuing
    pub dereference: bool,
}

impl AddressingRule {
    #[must_use]
    pub fn register(register: Register) -> Self {
        Self { source: RuleSource::Register(register), dereference: false }
    }

    #[must_use]
    pub fn offset(offset: i64, dereference: bool) -> Self {
        Self { source: RuleSource::StackOffset(offset), dereference }
    }
}

impl fmt::Display for AddressingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.dereference {
            f.write_str("*")?;
        }
        match self.source {
            RuleSource::Register(reg) => write!(f, "{reg}"),
            RuleSource::StackOffset(off) => write!(f, "{off:+}"),
        }
    }
}

/// Decoded representation of the captured bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScalarType {
    U8,
    U16,
    U32,
    U64,
    S8,
    S16,
    S32,
    S64,
    F32,
    F64,
    /// Raw bytes rendered as text, width in bits (8..=512, powers of two)
    Char(u16),
}

impl ScalarType {
    /// Number of bytes the kernel program must copy
    #[must_use]
    pub fn byte_width(self) -> usize {
        match self {
            ScalarType::U8 | ScalarType::S8 => 1,
            ScalarType::U16 | ScalarType::S16 => 2,
            ScalarType::U32 | ScalarType::S32 | ScalarType::F32 => 4,
            ScalarType::U64 | ScalarType::S64 | ScalarType::F64 => 8,
            ScalarType::Char(bits) => usize::from(bits / 8),
        }
    }
}

impl FromStr for ScalarType {
    type Err = FetchArgError;

    fn from_str(code: &str) -> Result<Self, Self::Err> {
        let unknown = || FetchArgError::UnknownType(code.to_string());
        let (Some(class), Some(bits)) = (code.get(..1), code.get(1..)) else {
            return Err(unknown());
        };
        Ok(match (class, bits) {
            ("u", "8") => ScalarType::U8,
            ("u", "16") => ScalarType::U16,
            ("u", "32") => ScalarType::U32,
            ("u", "64") => ScalarType::U64,
            ("s", "8") => ScalarType::S8,
            ("s", "16") => ScalarType::S16,
            ("s", "32") => ScalarType::S32,
            ("s", "64") => ScalarType::S64,
            ("f", "32") => ScalarType::F32,
            ("f", "64") => ScalarType::F64,
            ("c", "8" | "16" | "32" | "64" | "128" | "256" | "512") => {
                ScalarType::Char(bits.parse().map_err(|_| unknown())?)
            }
            _ => return Err(unknown()),
        })
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarType::U8 => f.write_str("u8"),
            ScalarType::U16 => f.write_str("u16"),
            ScalarType::U32 => f.write_str("u32"),
            ScalarType::U64 => f.write_str("u64"),
            ScalarType::S8 => f.write_str("s8"),
            ScalarType::S16 => f.write_str("s16"),
            ScalarType::S32 => f.write_str("s32"),
            ScalarType::S64 => f.write_str("s64"),
            ScalarType::F32 => f.write_str("f32"),
            ScalarType::F64 => f.write_str("f64"),
            ScalarType::Char(bits) => write!(f, "c{bits}"),
        }
    }
}

/// How to extract and print one named value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArgumentFetchSpec {
    /// Display name, dotted paths allowed (`s.name.len`)
    pub name: String,
    /// Statement as written by the user, kept for diagnostics
    pub statement: String,
    /// Address computation, register base first
    pub rule_chain: Vec<AddressingRule>,
    pub scalar_type: ScalarType,
}

impl ArgumentFetchSpec {
    /// Parse `statement` (`addressing-expr:type`) for the argument `name`
    ///
    /// # Errors
    /// Returns a [`FetchArgError`] describing the first malformed part
    pub fn parse(name: &str, statement: &str) -> Result<Self, FetchArgError> {
        parser::parse_statement(name, statement)
    }

    /// Parse a full `name=addressing-expr:type` declaration
    ///
    /// # Errors
    /// Returns [`FetchArgError::MissingName`] when there is no `name=` part,
    /// otherwise the errors of [`ArgumentFetchSpec::parse`]
    pub fn parse_declaration(declaration: &str) -> Result<Self, FetchArgError> {
        let (name, statement) = declaration
            .split_once('=')
            .map(|(n, s)| (n.trim(), s.trim()))
            .filter(|(n, s)| !n.is_empty() && !s.is_empty() && !s.contains('='))
            .ok_or_else(|| FetchArgError::MissingName(declaration.to_string()))?;
        Self::parse(name, statement)
    }

    /// Number of bytes the capture must deliver
    #[must_use]
    pub fn byte_width(&self) -> usize {
        self.scalar_type.byte_width()
    }

    /// Decode captured bytes into display text
    ///
    /// # Errors
    /// Returns [`FetchArgError::BufferTooShort`] when `raw` holds fewer than
    /// [`ArgumentFetchSpec::byte_width`] bytes
    pub fn evaluate(&self, raw: &[u8]) -> Result<String, FetchArgError> {
        value::decode(self.scalar_type, raw)
    }

    /// Whether the value names a call target rather than data
    #[must_use]
    pub fn is_call_target(&self) -> bool {
        self.name == CALL_TARGET_NAME
    }

    /// Re-serialize the rule chain in computation order (`%ax -> +16 -> *+0`)
    #[must_use]
    pub fn describe_rules(&self) -> String {
        self.rule_chain.iter().map(ToString::to_string).collect::<Vec<_>>().join(" -> ")
    }
}
