use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use tracing::warn;

/// Semantic type of a register payload. Multi-word types are most significant word first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    U16,
    U32,
    F32,
    /// Fixed-length character string spanning `n` registers.
    String(u16),
}

impl DataType {
    pub fn word_count(self) -> usize {
        match self {
            DataType::U16 => 1,
            DataType::U32 | DataType::F32 => 2,
            DataType::String(words) => words as usize,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::U16 => f.write_str("u16"),
            DataType::U32 => f.write_str("u32"),
            DataType::F32 => f.write_str("float"),
            DataType::String(words) => write!(f, "string({words})"),
        }
    }
}

impl FromStr for DataType {
    type Err = DecodeError;

    /// Accepts `u16`, `u32`, `float` and `string` (the latter as a 4-register field).
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "u16" => Ok(DataType::U16),
            "u32" => Ok(DataType::U32),
            "float" | "f32" => Ok(DataType::F32),
            "string" => Ok(DataType::String(4)),
            other => Err(DecodeError::UnknownType(other.to_string())),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    #[error("{data_type} needs {needed} registers, got {available}")]
    InsufficientWords {
        data_type: DataType,
        needed: usize,
        available: usize,
    },
    #[error("unsupported data type '{0}'")]
    UnknownType(String),
    #[error("{0} is not a numeric type")]
    NotNumeric(DataType),
    #[error("decoded value is not finite")]
    NotFinite,
}

/// Decodes `words` as `data_type`, multiplies by `scale` and rounds to `digits` decimals.
pub fn decode_scaled(
    words: &[u16],
    data_type: DataType,
    scale: f64,
    digits: u32,
) -> Result<f64, DecodeError> {
    let raw = decode_raw(words, data_type)?;
    let scaled = round_to(raw * scale, digits);
    if !scaled.is_finite() {
        warn!(%data_type, raw, scale, "scaled register value is not finite");
        return Err(DecodeError::NotFinite);
    }
    Ok(scaled)
}

/// Decodes the numeric value without scaling.
pub fn decode_raw(words: &[u16], data_type: DataType) -> Result<f64, DecodeError> {
    let words = take_words(words, data_type)?;
    match data_type {
        DataType::U16 => Ok(f64::from(words[0])),
        DataType::U32 => Ok(f64::from(join_words(words[0], words[1]))),
        DataType::F32 => Ok(f64::from(f32::from_bits(join_words(words[0], words[1])))),
        DataType::String(_) => Err(DecodeError::NotNumeric(data_type)),
    }
}

/// Decodes a big-endian byte string, dropping trailing NUL and space padding.
pub fn decode_text(words: &[u16], register_count: u16) -> Result<String, DecodeError> {
    let words = take_words(words, DataType::String(register_count))?;
    let bytes: Vec<u8> = words.iter().flat_map(|word| word.to_be_bytes()).collect();
    let text = String::from_utf8_lossy(&bytes);
    Ok(text.trim_end_matches(['\0', ' ']).to_string())
}

/// Renders each register as lowercase hex without leading zeros, reverses the
/// characters of each rendering and concatenates the results.
///
/// Deployed installations key on serial numbers produced this way, so the
/// output must stay stable even though it is not the printed serial.
pub fn serial_from_words(words: &[u16]) -> String {
    words
        .iter()
        .map(|word| format!("{word:x}").chars().rev().collect::<String>())
        .collect()
}

fn take_words(words: &[u16], data_type: DataType) -> Result<&[u16], DecodeError> {
    let needed = data_type.word_count();
    if needed == 0 || words.len() < needed {
        return Err(DecodeError::InsufficientWords {
            data_type,
            needed,
            available: words.len(),
        });
    }
    Ok(&words[..needed])
}

fn join_words(high: u16, low: u16) -> u32 {
    (u32::from(high) << 16) | u32::from(low)
}

fn round_to(value: f64, digits: u32) -> f64 {
    let factor = 10f64.powi(digits as i32);
    (value * factor).round_ties_even() / factor
}
