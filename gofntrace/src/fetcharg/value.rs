//! Decoding of captured argument bytes

use super::ScalarType;
use crate::domain::FetchArgError;

pub(super) fn decode(scalar_type: ScalarType, raw: &[u8]) -> Result<String, FetchArgError> {
    let width = scalar_type.byte_width();
    let data = raw.get(..width).ok_or(FetchArgError::BufferTooShort { needed: width, got: raw.len() })?;

    Ok(match scalar_type {
        ScalarType::U8 => data[0].to_string(),
        ScalarType::U16 => u16::from_le_bytes(fixed(data)).to_string(),
        ScalarType::U32 => u32::from_le_bytes(fixed(data)).to_string(),
        ScalarType::U64 => u64::from_le_bytes(fixed(data)).to_string(),
        ScalarType::S8 => i8::from_le_bytes(fixed(data)).to_string(),
        ScalarType::S16 => i16::from_le_bytes(fixed(data)).to_string(),
        ScalarType::S32 => i32::from_le_bytes(fixed(data)).to_string(),
        ScalarType::S64 => i64::from_le_bytes(fixed(data)).to_string(),
        ScalarType::F32 => format!("{:.6}", f32::from_le_bytes(fixed(data))),
        ScalarType::F64 => format!("{:.6}", f64::from_le_bytes(fixed(data))),
        ScalarType::Char(_) => {
            let end = data.iter().rposition(|&b| b != 0).map_or(0, |pos| pos + 1);
            String::from_utf8_lossy(&data[..end]).into_owned()
        }
    })
}

/// Copy an exactly-sized slice into an array for `from_le_bytes`
fn fixed<const N: usize>(data: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&data[..N]);
    out
}
