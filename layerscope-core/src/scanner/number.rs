//! Locale-independent integer parsing over a token.

/// Parse an unsigned integer the way `strtoull` does.
///
/// Leading ASCII whitespace is skipped, then one optional `+` or `-`. With
/// `base` 0 or 16 a `0x`/`0X` prefix selects hexadecimal; with `base` 0 a
/// leading `0` selects octal and anything else decimal. Parsing stops at the
/// first byte that is not a digit of the base. Overflow wraps, and a `-`
/// negates the result modulo 2^64.
///
/// Returns the value and the offset one past the last consumed byte. An
/// unsupported base (1 or above 36) or a token without digits parses
/// nothing.
pub fn parse_u64(bytes: &[u8], base: u32) -> (u64, usize) {
    if base == 1 || base > 36 {
        return (0, 0);
    }

    let mut pos = bytes
        .iter()
        .take_while(|b| b.is_ascii_whitespace())
        .count();

    let mut negative = false;
    match bytes.get(pos) {
        Some(b'+') => pos += 1,
        Some(b'-') => {
            negative = true;
            pos += 1;
        }
        _ => {}
    }

    let mut base = base;
    if (base == 0 || base == 16)
        && bytes.get(pos) == Some(&b'0')
        && matches!(bytes.get(pos + 1), Some(b'x' | b'X'))
        && bytes.get(pos + 2).is_some_and(|b| b.is_ascii_hexdigit())
    {
        base = 16;
        pos += 2;
    }
    if base == 0 {
        base = if bytes.get(pos) == Some(&b'0') { 8 } else { 10 };
    }

    let digits_at = pos;
    let mut value: u64 = 0;
    while let Some(digit) = bytes.get(pos).and_then(|b| (*b as char).to_digit(base)) {
        value = value.wrapping_mul(base as u64).wrapping_add(digit as u64);
        pos += 1;
    }

    if pos == digits_at {
        // No digits: nothing was a number, not even the sign.
        return (0, 0);
    }
    if negative {
        value = value.wrapping_neg();
    }
    (value, pos)
}
