//! Return-instruction discovery
//!
//! Go functions can return from several places, and the compiler keeps no
//! table of them. We decode the function body linearly and collect every
//! instruction whose flow control is a return.

use iced_x86::{Decoder, DecoderOptions, FlowControl, Instruction};

const CODE_BITNESS: u32 = 64;

/// Virtual addresses of every `ret` in `code`, which starts at `base`
#[must_use]
pub fn find_return_addresses(code: &[u8], base: u64) -> Vec<u64> {
    let mut decoder = Decoder::with_ip(CODE_BITNESS, code, base, DecoderOptions::NONE);
    let mut instr = Instruction::default();
    let mut returns = Vec::new();

    while decoder.can_decode() {
        decoder.decode_out(&mut instr);
        if instr.flow_control() == FlowControl::Return {
            returns.push(instr.ip());
        }
    }
    returns
}
