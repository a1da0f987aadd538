//! Record splitting and fixed-point measurement parsing.

use memchr::memchr;

/// Why a measurement field couldn't be turned into a fixed-point value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueError {
    /// Not of the form `-?\d+\.\d`
    Malformed,
    /// Magnitude above 3276.7
    Overflow,
}

/// Result of splitting a well-formed line off the front of a chunk
#[derive(Debug, PartialEq, Eq)]
pub struct ParsedRow<'a> {
    pub key: &'a [u8],
    /// Measurement bytes, without the separator or newline
    pub value: &'a [u8],
    pub remainder: &'a [u8],
}

/// Why a line couldn't be split into key and value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowError {
    MissingSeparator,
    MissingNewline,
}

impl RowError {
    pub fn reason(self) -> &'static str {
        match self {
            RowError::MissingSeparator => "missing ';' separator",
            RowError::MissingNewline => "missing terminating newline",
        }
    }
}

/// Splits the first line off `chunk`. Returns `None` once the chunk is exhausted.
/// The line must contain a `;` and be terminated by `\n`.
pub fn parse_next_line(chunk: &[u8]) -> Option<Result<ParsedRow<'_>, RowError>> {
    if chunk.is_empty() {
        return None;
    }
    // "cityname;-12.1\n"
    let Some(newline_pos) = memchr(b'\n', chunk) else {
        return Some(Err(RowError::MissingNewline));
    };
    let (line, remainder) = chunk.split_at(newline_pos);

    let Some(semi_pos) = memchr(b';', line) else {
        return Some(Err(RowError::MissingSeparator));
    };
    let (key, value) = line.split_at(semi_pos);
    let value = &value[1..];

    Some(Ok(ParsedRow {
        key,
        value,
        remainder: &remainder[1..],
    }))
}

/// Largest digit weight at which a non-zero digit still fits in an i16 magnitude
const MAX_WEIGHT: u32 = 10_000;

/// Parses `-?\d+\.\d` into the value scaled by 10, i.e. `"-12.3"` into `-123`.
/// Digits are accumulated right to left with growing weights; leading zeros are accepted.
pub fn parse_fixed_point(input: &[u8]) -> Result<i16, ValueError> {
    let (negative, digits) = match input.split_first() {
        Some((b'-', rest)) => (true, rest),
        _ => (false, input),
    };
    let [whole @ .., b'.', tenths] = digits else {
        return Err(ValueError::Malformed);
    };
    if whole.is_empty() || !tenths.is_ascii_digit() {
        return Err(ValueError::Malformed);
    }

    let mut magnitude = u32::from(tenths - b'0');
    let mut weight = 10u32;
    for &b in whole.iter().rev() {
        if !b.is_ascii_digit() {
            return Err(ValueError::Malformed);
        }
        let digit = u32::from(b - b'0');
        if digit != 0 {
            if weight > MAX_WEIGHT {
                return Err(ValueError::Overflow);
            }
            magnitude += digit * weight;
            if magnitude > i16::MAX as u32 {
                return Err(ValueError::Overflow);
            }
        }
        weight = weight.saturating_mul(10);
    }

    let value = magnitude as i16;
    Ok(if negative { -value } else { value })
}

/// Branch-light variant of [parse_fixed_point] with no validation at all.
/// Every byte other than `-` and `.` is treated as a digit, and arithmetic wraps.
/// Only meaningful for input already known to be `-?\d+\.\d` within ±3276.7.
pub fn parse_fixed_point_unchecked(input: &[u8]) -> i16 {
    let mut value = 0i16;
    let mut weight = 1i16;
    for &b in input.iter().rev() {
        match b {
            b'-' => value = value.wrapping_neg(),
            b'.' => {}
            _ => {
                let digit = b.wrapping_sub(b'0') as i16;
                value = value.wrapping_add(weight.wrapping_mul(digit));
                weight = weight.wrapping_mul(10);
            }
        }
    }
    value
}
