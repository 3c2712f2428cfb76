use lazy_static::lazy_static;
use regex::Regex;
use std::cmp::Ordering;
use std::fmt;
use tracing::info;

lazy_static! {
    static ref SIGNED: Regex = Regex::new(r"^[+-]?[0-9]+$").unwrap();
    static ref UNSIGNED: Regex = Regex::new(r"^[0-9]+$").unwrap();
    static ref HEX: Regex = Regex::new(r"^[0-9A-Fa-f]+$").unwrap();
    static ref BIN: Regex = Regex::new(r"^[01]+$").unwrap();
    static ref REAL: Regex =
        Regex::new(r"^[+-]?([0-9]+\.?[0-9]*|\.[0-9]+)([eE][+-]?[0-9]+)?$").unwrap();
}

pub fn is_signed_number(text: &str) -> bool {
    SIGNED.is_match(text)
}
pub fn is_unsigned_number(text: &str) -> bool {
    UNSIGNED.is_match(text)
}
pub fn is_hex_number(text: &str) -> bool {
    HEX.is_match(text)
}
pub fn is_bin_number(text: &str) -> bool {
    BIN.is_match(text)
}
pub fn is_real_number(text: &str) -> bool {
    REAL.is_match(text)
}

/// Decodes a string of binary digits, stopping at the first other character.
pub fn decode_bin_number(text: &str) -> u64 {
    text.chars()
        .map_while(|c| c.to_digit(2))
        .fold(0u64, |acc, bit| acc.wrapping_shl(1) | u64::from(bit))
}

/// How textual tokens are interpreted for a numeric item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumericKind {
    Signed,
    Unsigned,
    Hex,
    Real,
}

impl NumericKind {
    fn noun(self) -> &'static str {
        match self {
            NumericKind::Signed => "an integer",
            NumericKind::Unsigned => "an unsigned integer",
            NumericKind::Hex => "a hexadecimal integer",
            NumericKind::Real => "a real number",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Signed(i64),
    Unsigned(u64),
    Real(f64),
}

impl Number {
    /// Re-expresses the number in the representation used by `kind`.
    /// Reals are truncated towards zero when an integer is required.
    pub fn to_kind(self, kind: NumericKind) -> Result<Number, String> {
        let out_of_range = || format!("Value {} is out of range", self);
        match (self, kind) {
            (Number::Signed(v), NumericKind::Signed) => Ok(Number::Signed(v)),
            (Number::Signed(v), NumericKind::Unsigned | NumericKind::Hex) => {
                u64::try_from(v).map(Number::Unsigned).map_err(|_| out_of_range())
            }
            (Number::Unsigned(v), NumericKind::Signed) => {
                i64::try_from(v).map(Number::Signed).map_err(|_| out_of_range())
            }
            (Number::Unsigned(v), NumericKind::Unsigned | NumericKind::Hex) => {
                Ok(Number::Unsigned(v))
            }
            (Number::Signed(v), NumericKind::Real) => Ok(Number::Real(v as f64)),
            (Number::Unsigned(v), NumericKind::Real) => Ok(Number::Real(v as f64)),
            (Number::Real(v), NumericKind::Real) => Ok(Number::Real(v)),
            (Number::Real(v), NumericKind::Signed) => {
                if v.is_finite() && v >= i64::MIN as f64 && v <= i64::MAX as f64 {
                    Ok(Number::Signed(v.trunc() as i64))
                } else {
                    Err(out_of_range())
                }
            }
            (Number::Real(v), NumericKind::Unsigned | NumericKind::Hex) => {
                if v.is_finite() && v > -1.0 && v <= u64::MAX as f64 {
                    Ok(Number::Unsigned(v.trunc() as u64))
                } else {
                    Err(out_of_range())
                }
            }
        }
    }

    fn compare(&self, other: &Number) -> Option<Ordering> {
        match (self, other) {
            (Number::Signed(a), Number::Signed(b)) => Some(a.cmp(b)),
            (Number::Unsigned(a), Number::Unsigned(b)) => Some(a.cmp(b)),
            (Number::Real(a), Number::Real(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Number::Signed(v) => write!(f, "{}", v),
            Number::Unsigned(v) => write!(f, "{}", v),
            Number::Real(v) => write!(f, "{}", v),
        }
    }
}

/// Parses one value token according to the rules of `kind`.
pub fn parse_number(kind: NumericKind, text: &str) -> Result<Number, String> {
    let not_a = || format!("Value is not {}", kind.noun());
    let too_large = || format!("Value '{}' is too large", text);
    match kind {
        NumericKind::Signed | NumericKind::Unsigned => {
            let raw = if let Some(hex) = text.strip_prefix("0x") {
                if !is_hex_number(hex) {
                    return Err(not_a());
                }
                u64::from_str_radix(hex, 16).map_err(|_| too_large())?
            } else if let Some(bin) = text.strip_prefix("0b") {
                if !is_bin_number(bin) {
                    return Err(not_a());
                }
                if bin.len() > 64 {
                    return Err(too_large());
                }
                decode_bin_number(bin)
            } else if kind == NumericKind::Signed {
                if !is_signed_number(text) {
                    return Err(not_a());
                }
                return text.parse::<i64>().map(Number::Signed).map_err(|_| too_large());
            } else {
                if !is_unsigned_number(text) {
                    return Err(not_a());
                }
                text.parse::<u64>().map_err(|_| too_large())?
            };
            // hex and binary notation fill the bit pattern, as with %lx
            Ok(match kind {
                NumericKind::Signed => Number::Signed(raw as i64),
                _ => Number::Unsigned(raw),
            })
        }
        NumericKind::Hex => {
            let digits = text.strip_prefix("0x").unwrap_or(text);
            if !is_hex_number(digits) {
                return Err(not_a());
            }
            u64::from_str_radix(digits, 16)
                .map(Number::Unsigned)
                .map_err(|_| too_large())
        }
        NumericKind::Real => {
            if !is_real_number(text) {
                return Err(not_a());
            }
            text.parse::<f64>().map(Number::Real).map_err(|_| not_a())
        }
    }
}

/// Optional lower and upper limits of a numeric item.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Bounds {
    pub lower: Option<Number>,
    pub upper: Option<Number>,
}

impl Bounds {
    /// Parses declared bound strings with the item's own token rules.
    pub fn parse(kind: NumericKind, lower: Option<&str>, upper: Option<&str>) -> Result<Self, String> {
        let lower = match lower {
            Some(text) => Some(
                parse_number(kind, text.trim())
                    .map_err(|_| format!("Lower bound is not {}", kind.noun()))?,
            ),
            None => None,
        };
        let upper = match upper {
            Some(text) => Some(
                parse_number(kind, text.trim())
                    .map_err(|_| format!("Upper bound is not {}", kind.noun()))?,
            ),
            None => None,
        };
        if let (Some(l), Some(u)) = (lower, upper) {
            if l.compare(&u) == Some(Ordering::Greater) {
                return Err("Upper bound is below lower bound".into());
            }
        }
        Ok(Self { lower, upper })
    }

    pub fn is_empty(&self) -> bool {
        self.lower.is_none() && self.upper.is_none()
    }

    /// Clamps `value` into the bounds, or refuses it when `strict`.
    pub fn apply(&self, item: &str, value: Number, strict: bool) -> Result<Number, String> {
        let mut value = value;
        if let Some(lower) = self.lower {
            if value.compare(&lower) == Some(Ordering::Less) {
                if strict {
                    return Err(format!("{} violates lower bound {}", value, lower));
                }
                info!(item, %value, %lower, "Set to lower bound");
                value = lower;
            }
        }
        if let Some(upper) = self.upper {
            if value.compare(&upper) == Some(Ordering::Greater) {
                if strict {
                    return Err(format!("{} violates upper bound {}", value, upper));
                }
                info!(item, %value, %upper, "Set to upper bound");
                value = upper;
            }
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_predicates() {
        assert!(is_signed_number("-42"));
        assert!(is_signed_number("+7"));
        assert!(!is_signed_number("4.2"));
        assert!(is_unsigned_number("0815"));
        assert!(!is_unsigned_number("-1"));
        assert!(is_hex_number("dEaD"));
        assert!(!is_hex_number("0x1f"));
        assert!(is_real_number(".5"));
        assert!(is_real_number("-3.25e-4"));
        assert!(is_real_number("5."));
        assert!(!is_real_number("1.2.3"));
        assert!(!is_real_number("e5"));
        assert_eq!(decode_bin_number("1011"), 11);
    }

    #[test]
    fn parse_by_kind() {
        assert_eq!(parse_number(NumericKind::Signed, "-12"), Ok(Number::Signed(-12)));
        assert_eq!(parse_number(NumericKind::Signed, "0x10"), Ok(Number::Signed(16)));
        assert_eq!(parse_number(NumericKind::Unsigned, "0b101"), Ok(Number::Unsigned(5)));
        assert_eq!(parse_number(NumericKind::Hex, "ff"), Ok(Number::Unsigned(255)));
        assert_eq!(parse_number(NumericKind::Hex, "0xff"), Ok(Number::Unsigned(255)));
        assert_eq!(parse_number(NumericKind::Real, "2.5"), Ok(Number::Real(2.5)));
        assert!(parse_number(NumericKind::Unsigned, "-3").is_err());
        assert!(parse_number(NumericKind::Signed, "abc").is_err());
    }

    #[test]
    fn bounds_clamp_or_reject() {
        let bounds = Bounds::parse(NumericKind::Signed, Some("0"), Some("10")).unwrap();
        assert_eq!(bounds.apply("x", Number::Signed(99), false), Ok(Number::Signed(10)));
        assert_eq!(bounds.apply("x", Number::Signed(-5), false), Ok(Number::Signed(0)));
        assert_eq!(bounds.apply("x", Number::Signed(5), true), Ok(Number::Signed(5)));
        assert!(bounds.apply("x", Number::Signed(99), true).is_err());
        assert!(Bounds::parse(NumericKind::Signed, Some("10"), Some("0")).is_err());
        assert!(Bounds::parse(NumericKind::Real, Some("x"), None).is_err());
    }

    #[test]
    fn conversion_between_kinds() {
        assert_eq!(Number::Real(3.9).to_kind(NumericKind::Signed), Ok(Number::Signed(3)));
        assert_eq!(Number::Signed(7).to_kind(NumericKind::Real), Ok(Number::Real(7.0)));
        assert!(Number::Signed(-1).to_kind(NumericKind::Unsigned).is_err());
        assert!(Number::Unsigned(u64::MAX).to_kind(NumericKind::Signed).is_err());
    }
}
