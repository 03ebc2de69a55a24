//! SI prefixes and parsing of quantity replies such as `500us` or `1.0ms`.

use crate::scale::compose;

const PREFIXES: [(i32, &str); 17] = [
    (-24, "y"),
    (-21, "z"),
    (-18, "a"),
    (-15, "f"),
    (-12, "p"),
    (-9, "n"),
    (-6, "u"),
    (-3, "m"),
    (0, ""),
    (3, "k"),
    (6, "M"),
    (9, "G"),
    (12, "T"),
    (15, "P"),
    (18, "E"),
    (21, "Z"),
    (24, "Y"),
];

/// Single letter units the instrument appends to replies. A lone letter from
/// this list is never read as a prefix.
const BARE_UNITS: [char; 5] = ['s', 'S', 'v', 'V', 'A'];

pub const MIN_PREFIX_EXPONENT: i32 = -24;
pub const MAX_PREFIX_EXPONENT: i32 = 24;

/// SI prefix for a power of ten that is a multiple of three.
pub fn unit_prefix(exponent: i32) -> &'static str {
    PREFIXES
        .iter()
        .find(|(exp, _)| *exp == exponent)
        .map(|(_, prefix)| *prefix)
        .unwrap_or("")
}

/// Power of ten for a prefix letter. Accepts both micro signs next to `u`.
pub fn prefix_exponent(prefix: char) -> Option<i32> {
    match prefix {
        'µ' | 'μ' => Some(-6),
        c => PREFIXES
            .iter()
            .find(|(_, p)| p.starts_with(c))
            .map(|(exp, _)| *exp),
    }
}

/// Split the leading number off a token: `("1.5e-3", "ms")`.
fn split_number(text: &str) -> Option<(&str, &str)> {
    let bytes = text.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end += 1;
    }
    let digits_start = end;
    while end < bytes.len() && (bytes[end].is_ascii_digit() || bytes[end] == b'.') {
        end += 1;
    }
    if !text[digits_start..end].bytes().any(|b| b.is_ascii_digit()) {
        return None;
    }
    // An exponent only counts when digits follow, `1E` is one exa.
    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'+' | b'-')) {
            exp_end += 1;
        }
        if bytes.get(exp_end).map_or(false, u8::is_ascii_digit) {
            while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
                exp_end += 1;
            }
            end = exp_end;
        }
    }
    Some(text.split_at(end))
}

/// Parse a reply like `500us`, `1.0 ms`, `-2.5E-3` or `20mV` into its value
/// in base units. The trailing unit is not checked.
pub fn parse_quantity(text: &str) -> Option<f64> {
    let compact: String = text.split_whitespace().collect();
    let (number, rest) = split_number(&compact)?;

    let mut chars = rest.chars();
    let prefix = match (chars.next(), chars.next()) {
        (None, _) => 0,
        (Some(c), None) if BARE_UNITS.contains(&c) => 0,
        (Some(c), _) => prefix_exponent(c).unwrap_or(0),
    };

    let (mantissa, exponent) = match number.find(['e', 'E']) {
        Some(pos) => (&number[..pos], number[pos + 1..].parse::<i32>().ok()?),
        None => (number, 0),
    };
    compose(mantissa, exponent + prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_prefix() {
        assert_eq!(unit_prefix(-6), "u");
        assert_eq!(unit_prefix(0), "");
        assert_eq!(unit_prefix(3), "k");
        assert_eq!(unit_prefix(7), "");
    }

    #[test]
    fn test_prefix_exponent() {
        assert_eq!(prefix_exponent('n'), Some(-9));
        assert_eq!(prefix_exponent('µ'), Some(-6));
        assert_eq!(prefix_exponent('M'), Some(6));
        assert_eq!(prefix_exponent('x'), None);
    }

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("500us"), Some(5e-4));
        assert_eq!(parse_quantity("1.0ms"), Some(1e-3));
        assert_eq!(parse_quantity("2 mV\r\n"), Some(2e-3));
        assert_eq!(parse_quantity("5s"), Some(5.0));
        assert_eq!(parse_quantity("20ns"), Some(2e-8));
        assert_eq!(parse_quantity("-0.25"), Some(-0.25));
        assert_eq!(parse_quantity("1.5e-3"), Some(1.5e-3));
        assert_eq!(parse_quantity("1.5e3k"), Some(1.5e6));
        assert_eq!(parse_quantity("100Hz"), Some(100.0));
        assert_eq!(parse_quantity("m"), None);
        assert_eq!(parse_quantity(""), None);
    }
}
