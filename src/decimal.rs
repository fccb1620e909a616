//! Fixed-point decimal number stored as an `i128` mantissa and a base-10 scale

use crate::result::{Result, SqlFnError};
use std::fmt;
use std::str::FromStr;

/// Largest scale a `Decimal` keeps; `10^38` still fits an `i128`
pub const MAX_SCALE: u32 = 38;

/// Exact decimal value: `mantissa * 10^-scale`
///
/// Equality compares numeric values, so `12.5` equals `12.50`.
#[derive(Debug, Clone, Copy)]
pub struct Decimal {
    mantissa: i128,
    scale: u32,
}

impl Decimal {
    pub fn new(mantissa: i128, scale: u32) -> Result<Self> {
        if scale > MAX_SCALE {
            return Err(SqlFnError::new_mapping(
                "",
                format!("{mantissa}e-{scale}"),
                format!("decimal scale above {MAX_SCALE}"),
            ));
        }
        Ok(Decimal { mantissa, scale })
    }

    pub fn mantissa(&self) -> i128 {
        self.mantissa
    }

    pub fn scale(&self) -> u32 {
        self.scale
    }

    pub fn is_negative(&self) -> bool {
        self.mantissa < 0
    }

    /// Remove trailing fractional zeros: `12.500` becomes `12.5`
    pub fn normalize(&self) -> Decimal {
        let mut mantissa = self.mantissa;
        let mut scale = self.scale;
        while scale > 0 && mantissa % 10 == 0 {
            mantissa /= 10;
            scale -= 1;
        }
        Decimal { mantissa, scale }
    }

    /// Change the scale, failing when digits would be lost or the mantissa overflows
    pub fn rescale(&self, scale: u32) -> Result<Decimal> {
        let overflow = || {
            SqlFnError::new_mapping("", self, format!("cannot represent with scale {scale}"))
        };
        if scale > MAX_SCALE {
            return Err(overflow());
        }
        if scale >= self.scale {
            let factor = pow10(scale - self.scale).ok_or_else(overflow)?;
            let mantissa = self.mantissa.checked_mul(factor).ok_or_else(overflow)?;
            Ok(Decimal { mantissa, scale })
        } else {
            let factor = pow10(self.scale - scale).ok_or_else(overflow)?;
            if self.mantissa % factor != 0 {
                return Err(overflow());
            }
            Ok(Decimal {
                mantissa: self.mantissa / factor,
                scale,
            })
        }
    }

    pub fn from_f64(value: f64) -> Result<Decimal> {
        if !value.is_finite() {
            return Err(SqlFnError::new_mapping("", value, "not a finite number"));
        }
        // Display for f64 yields the shortest text that round-trips, without exponent
        let shortest = format!("{value}");
        let fractional = shortest.split_once('.').map_or(0, |(_, frac)| frac.len());
        if fractional as u32 <= MAX_SCALE {
            return shortest.parse();
        }
        // only tiny magnitudes need more places; round them to MAX_SCALE
        let rounded: Decimal = format!("{value:.prec$}", prec = MAX_SCALE as usize).parse()?;
        Ok(rounded.normalize())
    }

    pub fn to_f64(&self) -> f64 {
        self.mantissa as f64 / 10f64.powi(self.scale as i32)
    }

    /// Integer value when the fractional part is zero
    pub fn to_i64(&self) -> Option<i64> {
        let normalized = self.normalize();
        if normalized.scale != 0 {
            return None;
        }
        i64::try_from(normalized.mantissa).ok()
    }
}

fn pow10(exp: u32) -> Option<i128> {
    10i128.checked_pow(exp)
}

impl From<i64> for Decimal {
    fn from(value: i64) -> Self {
        Decimal {
            mantissa: value as i128,
            scale: 0,
        }
    }
}

impl FromStr for Decimal {
    type Err = SqlFnError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let invalid = |reason: &str| SqlFnError::new_mapping("", format!("{s:?}"), reason);
        let trimmed = s.trim();
        let (negative, unsigned) = match trimmed.as_bytes().first() {
            Some(b'-') => (true, &trimmed[1..]),
            Some(b'+') => (false, &trimmed[1..]),
            _ => (false, trimmed),
        };
        let (integer_part, fractional_part) = match unsigned.split_once('.') {
            Some((int, frac)) => (int, frac),
            None => (unsigned, ""),
        };
        if integer_part.is_empty() && fractional_part.is_empty() {
            return Err(invalid("empty decimal"));
        }
        if !integer_part.chars().all(|c| c.is_ascii_digit())
            || !fractional_part.chars().all(|c| c.is_ascii_digit())
        {
            return Err(invalid("invalid decimal digits"));
        }
        let scale = fractional_part.len() as u32;
        if scale > MAX_SCALE {
            return Err(invalid("too many fractional digits"));
        }
        let digits = format!("{integer_part}{fractional_part}");
        let mut mantissa = if digits.is_empty() {
            0
        } else {
            digits
                .parse::<i128>()
                .map_err(|_| invalid("decimal out of range"))?
        };
        if negative {
            mantissa = -mantissa;
        }
        Ok(Decimal { mantissa, scale })
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scale == 0 {
            return write!(f, "{}", self.mantissa);
        }
        let digits = self.mantissa.unsigned_abs().to_string();
        let scale = self.scale as usize;
        let padded = if digits.len() <= scale {
            format!("{}{digits}", "0".repeat(scale - digits.len() + 1))
        } else {
            digits
        };
        let (integer, fraction) = padded.split_at(padded.len() - scale);
        let sign = if self.mantissa < 0 { "-" } else { "" };
        write!(f, "{sign}{integer}.{fraction}")
    }
}

impl PartialEq for Decimal {
    fn eq(&self, other: &Self) -> bool {
        let left = self.normalize();
        let right = other.normalize();
        left.mantissa == right.mantissa && left.scale == right.scale
    }
}

impl Eq for Decimal {}
