//! Row Parser (C3): turns one VALUES-tuple token into its destination
//! column's on-wire bytes (`spec.md` §4.3).
//!
//! Grounded on `tscParseInsert.c`'s per-type `switch` over `schema->type`;
//! the null-sentinel values and overflow checks below mirror that switch
//! one arm at a time rather than a generic "serialize this Rust value"
//! path, since the wire format's null representation is type-specific and
//! not expressible as `Option<T>`.

use chrono::NaiveDateTime;
use tracing::instrument;
use tsjoin_common::error::{
    InvalidTimestampSnafu, InvalidTokenSnafu, NeedsBindingSnafu, OverflowSnafu, ParseError,
    StringTooLongSnafu,
};

/// Destination column type, the subset of the wire format's type tags this
/// parser understands (`spec.md` §4.3's type table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Bool,
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    Float,
    Double,
    Binary,
    NChar,
    Timestamp,
}

/// One destination column: its type and on-wire byte width. For `Binary`/
/// `NChar` this is the declared column capacity; for the fixed-width
/// numeric types it is always the type's natural size.
#[derive(Debug, Clone, Copy)]
pub struct SchemaColumn {
    pub ty: ColumnType,
    pub width: usize,
}

/// The file-level timestamp precision a `TIMESTAMP` literal is parsed
/// against (`spec.md` §3: "ts is ... in either millisecond or microsecond
/// precision (a file-level attribute)").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TzPrecision {
    Milli,
    Micro,
}

impl TzPrecision {
    fn millis_to_units(self, millis: i64) -> i64 {
        match self {
            TzPrecision::Milli => millis,
            TzPrecision::Micro => millis * 1000,
        }
    }

    fn now_in_units(self) -> i64 {
        let now = chrono::Utc::now();
        match self {
            TzPrecision::Milli => now.timestamp_millis(),
            TzPrecision::Micro => now.timestamp_micros(),
        }
    }
}

/// `parse_column(schema_col, token, out, tz_precision, is_primary_key)`
/// (`spec.md` §4.3). Writes exactly `schema_col.width` bytes into `out`.
#[instrument(skip(out), level = "trace")]
pub fn parse_column(
    schema_col: &SchemaColumn,
    token: &str,
    out: &mut [u8],
    tz_precision: TzPrecision,
    is_primary_key: bool,
) -> Result<(), ParseError> {
    debug_assert_eq!(out.len(), schema_col.width, "caller must size `out` to the column width");

    if token.trim() == "?" {
        return NeedsBindingSnafu { offset: 0_usize }.fail();
    }

    match schema_col.ty {
        ColumnType::Bool => parse_bool(token, out),
        ColumnType::TinyInt => parse_signed_int(token, out, 1, schema_col.ty),
        ColumnType::SmallInt => parse_signed_int(token, out, 2, schema_col.ty),
        ColumnType::Int => parse_signed_int(token, out, 4, schema_col.ty),
        ColumnType::BigInt => parse_signed_int(token, out, 8, schema_col.ty),
        ColumnType::Float => parse_float(token, out),
        ColumnType::Double => parse_double(token, out),
        ColumnType::Binary => parse_binary(token, out),
        ColumnType::NChar => parse_nchar(token, out),
        ColumnType::Timestamp => parse_timestamp(token, out, tz_precision, is_primary_key),
    }
}

fn is_null_literal(token: &str) -> bool {
    token.trim().eq_ignore_ascii_case("null")
}

fn parse_bool(token: &str, out: &mut [u8]) -> Result<(), ParseError> {
    let t = token.trim();
    if is_null_literal(t) {
        out[0] = 0x02;
        return Ok(());
    }
    let value = if t.eq_ignore_ascii_case("true") {
        true
    } else if t.eq_ignore_ascii_case("false") {
        false
    } else if let Ok(i) = parse_int_literal(t, 8) {
        i != 0
    } else if let Ok(f) = t.parse::<f64>() {
        f != 0.0
    } else {
        return InvalidTokenSnafu {
            token: t.to_string(),
            expected: "BOOL".to_string(),
        }
        .fail();
    };
    out[0] = u8::from(value);
    Ok(())
}

/// Parses a decimal, hex (`0x…`), octal (leading `0`), or binary (`0b…`)
/// signed integer literal, range-checked against `width` (`spec.md` §4.3
/// supplement, from `original_source/tscParseInsert.c`).
fn parse_int_literal(token: &str, width: usize) -> Result<i64, ParseError> {
    let t = token.trim();
    let (neg, rest) = match t.strip_prefix('-') {
        Some(r) => (true, r),
        None => (false, t.strip_prefix('+').unwrap_or(t)),
    };
    if rest.is_empty() {
        return InvalidTokenSnafu {
            token: token.to_string(),
            expected: "integer".to_string(),
        }
        .fail();
    }

    let (radix, digits) = if let Some(d) = rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X")) {
        (16, d)
    } else if let Some(d) = rest.strip_prefix("0b").or_else(|| rest.strip_prefix("0B")) {
        (2, d)
    } else if rest.len() > 1 && rest.starts_with('0') {
        (8, &rest[1..])
    } else {
        (10, rest)
    };

    let magnitude = u64::from_str_radix(digits, radix).map_err(|_| {
        InvalidTokenSnafu {
            token: token.to_string(),
            expected: "integer".to_string(),
        }
        .build()
    })?;

    let (min, max): (i128, i128) = match width {
        1 => (i128::from(i8::MIN), i128::from(i8::MAX)),
        2 => (i128::from(i16::MIN), i128::from(i16::MAX)),
        4 => (i128::from(i32::MIN), i128::from(i32::MAX)),
        _ => (i128::from(i64::MIN), i128::from(i64::MAX)),
    };
    let signed = if neg { -i128::from(magnitude) } else { i128::from(magnitude) };
    if signed < min || signed > max {
        return OverflowSnafu {
            token: token.to_string(),
            width,
        }
        .fail();
    }
    Ok(signed as i64)
}

fn null_sentinel_for_width(width: usize) -> i64 {
    match width {
        1 => i64::from(i8::MIN),
        2 => i64::from(i16::MIN),
        4 => i64::from(i32::MIN),
        _ => i64::MIN,
    }
}

fn write_int_le(out: &mut [u8], value: i64, width: usize) {
    let bytes = value.to_le_bytes();
    out[..width].copy_from_slice(&bytes[..width]);
}

fn parse_signed_int(token: &str, out: &mut [u8], width: usize, ty: ColumnType) -> Result<(), ParseError> {
    if is_null_literal(token) {
        write_int_le(out, null_sentinel_for_width(width), width);
        return Ok(());
    }
    let value = parse_int_literal(token, width).map_err(|e| match e {
        ParseError::InvalidToken { .. } => InvalidTokenSnafu {
            token: token.to_string(),
            expected: format!("{ty:?}"),
        }
        .build(),
        other => other,
    })?;
    write_int_le(out, value, width);
    Ok(())
}

fn parse_float(token: &str, out: &mut [u8]) -> Result<(), ParseError> {
    if is_null_literal(token) {
        out.copy_from_slice(&f32::NAN.to_le_bytes());
        return Ok(());
    }
    let t = token.trim();
    if t.eq_ignore_ascii_case("inf") || t.eq_ignore_ascii_case("-inf") || t.eq_ignore_ascii_case("nan") {
        out.copy_from_slice(&f32::NAN.to_le_bytes());
        return Ok(());
    }
    let value: f32 = t.parse().map_err(|_| {
        InvalidTokenSnafu {
            token: token.to_string(),
            expected: "FLOAT".to_string(),
        }
        .build()
    })?;
    // Rust's float parser saturates to +/-inf on magnitude overflow instead
    // of erroring; tscParseInsert.c treats fv > FLT_MAX as illegal data.
    if value.is_infinite() {
        return OverflowSnafu {
            token: token.to_string(),
            width: 4usize,
        }
        .fail();
    }
    out.copy_from_slice(&value.to_le_bytes());
    Ok(())
}

fn parse_double(token: &str, out: &mut [u8]) -> Result<(), ParseError> {
    if is_null_literal(token) {
        out.copy_from_slice(&f64::NAN.to_le_bytes());
        return Ok(());
    }
    let t = token.trim();
    if t.eq_ignore_ascii_case("inf") || t.eq_ignore_ascii_case("-inf") || t.eq_ignore_ascii_case("nan") {
        out.copy_from_slice(&f64::NAN.to_le_bytes());
        return Ok(());
    }
    let value: f64 = t.parse().map_err(|_| {
        InvalidTokenSnafu {
            token: token.to_string(),
            expected: "DOUBLE".to_string(),
        }
        .build()
    })?;
    if value.is_infinite() {
        return OverflowSnafu {
            token: token.to_string(),
            width: 8usize,
        }
        .fail();
    }
    out.copy_from_slice(&value.to_le_bytes());
    Ok(())
}

/// Strips surrounding quotes (`'` or `"`) and un-escapes `\\`, `\'`, `\"`
/// in place, returning the logical byte length written to the front of
/// `buf` (`spec.md` §4.3: "escape sequences ... un-escaped into a
/// caller-provided scratch buffer" — here, `out` itself).
fn unquote_and_unescape(token: &str, buf: &mut [u8]) -> Result<usize, ParseError> {
    let t = token.trim();
    let inner = match (t.chars().next(), t.chars().last()) {
        (Some(q), Some(q2)) if (q == '\'' || q == '"') && q == q2 && t.len() >= 2 => &t[1..t.len() - 1],
        _ => t,
    };

    let mut n = 0;
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        let out_char = if c == '\\' {
            match chars.next() {
                Some('\\') => '\\',
                Some('\'') => '\'',
                Some('"') => '"',
                Some(other) => other,
                None => '\\',
            }
        } else {
            c
        };
        let encoded_len = out_char.len_utf8();
        if n + encoded_len > buf.len() {
            return StringTooLongSnafu {
                len: inner.len(),
                max: buf.len(),
            }
            .fail();
        }
        out_char.encode_utf8(&mut buf[n..n + encoded_len]);
        n += encoded_len;
    }
    Ok(n)
}

fn parse_binary(token: &str, out: &mut [u8]) -> Result<(), ParseError> {
    if is_null_literal(token) {
        out[0] = 0xFF;
        for b in &mut out[1..] {
            *b = 0;
        }
        return Ok(());
    }
    let n = unquote_and_unescape(token, out)?;
    for b in &mut out[n..] {
        *b = 0;
    }
    Ok(())
}

fn parse_nchar(token: &str, out: &mut [u8]) -> Result<(), ParseError> {
    if is_null_literal(token) {
        out[..4.min(out.len())].copy_from_slice(&0xFFFF_FFFF_u32.to_le_bytes()[..4.min(out.len())]);
        for b in &mut out[4.min(out.len())..] {
            *b = 0;
        }
        return Ok(());
    }

    let mut scratch = vec![0_u8; out.len()];
    let n = unquote_and_unescape(token, &mut scratch)?;
    let text = std::str::from_utf8(&scratch[..n]).unwrap_or("");

    let max_chars = out.len() / 4;
    let mut idx = 0;
    for ch in text.chars() {
        if idx >= max_chars {
            return StringTooLongSnafu {
                len: text.chars().count() * 4,
                max: out.len(),
            }
            .fail();
        }
        let code = ch as u32;
        out[idx * 4..idx * 4 + 4].copy_from_slice(&code.to_le_bytes());
        idx += 1;
    }
    for b in &mut out[idx * 4..] {
        *b = 0;
    }
    Ok(())
}

fn unit_to_millis(unit: char, n: i64) -> Option<i64> {
    let per_unit: i64 = match unit.to_ascii_lowercase() {
        'a' => 1,
        's' => 1_000,
        'm' => 60_000,
        'h' => 3_600_000,
        'd' => 86_400_000,
        'w' => 604_800_000,
        _ => return None,
    };
    n.checked_mul(per_unit)
}

/// Parses the base portion of a `TIMESTAMP` literal that isn't a relative
/// offset: `NOW`, a bare signed integer (already in `precision` units), or
/// a quoted `YYYY-MM-DD HH:MM:SS[.fff]` literal.
fn parse_timestamp_base(token: &str, precision: TzPrecision) -> Result<i64, ParseError> {
    let t = token.trim();
    if t.eq_ignore_ascii_case("now") {
        return Ok(precision.now_in_units());
    }
    if let Ok(v) = parse_int_literal(t, 8) {
        return Ok(v);
    }

    let inner = t.trim_matches(|c| c == '\'' || c == '"');
    let parsed = NaiveDateTime::parse_from_str(inner, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(inner, "%Y-%m-%d %H:%M:%S"))
        .map_err(|_| {
            InvalidTimestampSnafu {
                token: token.to_string(),
            }
            .build()
        })?;
    let millis = parsed.and_utc().timestamp_millis();
    Ok(precision.millis_to_units(millis))
}

/// Splits `<base>{+|-}<N><unit>` into its base literal and signed offset,
/// if the token has that shape; otherwise returns `None` so the caller
/// falls back to treating the whole token as a base literal.
fn split_relative_offset(token: &str) -> Option<(&str, bool, i64, char)> {
    let bytes = token.as_bytes();
    let unit = *bytes.last()? as char;
    if !"asmhdwASMHDW".contains(unit) {
        return None;
    }
    let digits_end = token.len() - 1;
    let mut split = None;
    for (i, c) in token[..digits_end].char_indices().rev() {
        if c == '+' || c == '-' {
            split = Some((i, c == '-'));
            break;
        }
        if !c.is_ascii_digit() {
            return None;
        }
    }
    let (sign_idx, negative) = split?;
    if sign_idx == 0 {
        return None;
    }
    let base = &token[..sign_idx];
    let n: i64 = token[sign_idx + 1..digits_end].parse().ok()?;
    Some((base, negative, n, unit))
}

fn parse_timestamp(token: &str, out: &mut [u8], precision: TzPrecision, is_primary_key: bool) -> Result<(), ParseError> {
    if is_null_literal(token) {
        let sentinel = if is_primary_key { 0 } else { i64::MIN };
        write_int_le(out, sentinel, 8);
        return Ok(());
    }
    if token.trim() == "0" {
        write_int_le(out, 0, 8);
        return Ok(());
    }

    let value = if let Some((base, negative, n, unit)) = split_relative_offset(token) {
        let base_value = parse_timestamp_base(base, precision)?;
        let millis = unit_to_millis(unit, n).ok_or_else(|| {
            InvalidTimestampSnafu {
                token: token.to_string(),
            }
            .build()
        })?;
        let offset = precision.millis_to_units(millis);
        if negative {
            base_value - offset
        } else {
            base_value + offset
        }
    } else {
        parse_timestamp_base(token, precision)?
    };

    write_int_le(out, value, 8);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(ty: ColumnType, width: usize) -> SchemaColumn {
        SchemaColumn { ty, width }
    }

    #[test]
    fn parses_decimal_hex_octal_binary_int() {
        let c = col(ColumnType::Int, 4);
        let mut out = [0_u8; 4];
        parse_column(&c, "42", &mut out, TzPrecision::Milli, false).unwrap();
        assert_eq!(i32::from_le_bytes(out), 42);

        parse_column(&c, "0x2A", &mut out, TzPrecision::Milli, false).unwrap();
        assert_eq!(i32::from_le_bytes(out), 42);

        parse_column(&c, "052", &mut out, TzPrecision::Milli, false).unwrap();
        assert_eq!(i32::from_le_bytes(out), 0o52);

        parse_column(&c, "0b101010", &mut out, TzPrecision::Milli, false).unwrap();
        assert_eq!(i32::from_le_bytes(out), 42);
    }

    #[test]
    fn overflow_is_rejected() {
        let c = col(ColumnType::TinyInt, 1);
        let mut out = [0_u8; 1];
        let err = parse_column(&c, "200", &mut out, TzPrecision::Milli, false).unwrap_err();
        assert!(matches!(err, ParseError::Overflow { .. }));
    }

    #[test]
    fn bind_parameter_placeholder_needs_binding() {
        let c = col(ColumnType::Int, 4);
        let mut out = [0_u8; 4];
        let err = parse_column(&c, "?", &mut out, TzPrecision::Milli, false).unwrap_err();
        assert!(matches!(err, ParseError::NeedsBinding { .. }));
    }

    #[test]
    fn null_literal_writes_type_sentinel() {
        let c = col(ColumnType::Bool, 1);
        let mut out = [0xAA_u8; 1];
        parse_column(&c, "null", &mut out, TzPrecision::Milli, false).unwrap();
        assert_eq!(out[0], 0x02);
    }

    #[test]
    fn server_time_zero_round_trips() {
        let c = col(ColumnType::Timestamp, 8);
        let mut out = [0_u8; 8];
        parse_column(&c, "0", &mut out, TzPrecision::Milli, true).unwrap();
        assert_eq!(i64::from_le_bytes(out), 0);
    }

    #[test]
    fn relative_offset_subtracts_hours_from_now() {
        let c = col(ColumnType::Timestamp, 8);
        let mut now_bytes = [0_u8; 8];
        parse_column(&c, "now", &mut now_bytes, TzPrecision::Milli, false).unwrap();
        let now = i64::from_le_bytes(now_bytes);

        let mut out = [0_u8; 8];
        parse_column(&c, "now-5h", &mut out, TzPrecision::Milli, false).unwrap();
        let five_hours_ago = i64::from_le_bytes(out);
        assert!(now - five_hours_ago >= 5 * 3_600_000);
    }

    #[test]
    fn micro_precision_scales_date_literal() {
        let c = col(ColumnType::Timestamp, 8);
        let mut milli = [0_u8; 8];
        parse_column(&c, "'2024-01-01 00:00:00'", &mut milli, TzPrecision::Milli, false).unwrap();
        let mut micro = [0_u8; 8];
        parse_column(&c, "'2024-01-01 00:00:00'", &mut micro, TzPrecision::Micro, false).unwrap();
        assert_eq!(i64::from_le_bytes(micro), i64::from_le_bytes(milli) * 1000);
    }

    #[test]
    fn binary_string_unescapes_and_pads() {
        let c = col(ColumnType::Binary, 8);
        let mut out = [0xAA_u8; 8];
        parse_column(&c, r#"'ab\'c'"#, &mut out, TzPrecision::Milli, false).unwrap();
        assert_eq!(&out, b"ab'c\0\0\0\0");
    }

    #[test]
    fn string_too_long_is_rejected() {
        let c = col(ColumnType::Binary, 2);
        let mut out = [0_u8; 2];
        let err = parse_column(&c, "'abc'", &mut out, TzPrecision::Milli, false).unwrap_err();
        assert!(matches!(err, ParseError::StringTooLong { .. }));
    }
}
