use std::{fmt, str::FromStr};

use rust_decimal::Decimal;

use crate::{EngineError, ResultEngine};

/// Signed money amount: an exact [`Decimal`] with at most 8 fractional digits.
///
/// Use this type for all monetary values in the engine (balances, transfer
/// amounts) so arithmetic never goes through floating point. Inputs with more
/// than 8 significant fractional digits are rejected instead of rounded, and
/// arithmetic is checked: a result that cannot be held at scale 8 is `None`,
/// never a rounded value.
///
/// # Examples
///
/// ```rust
/// use engine::Money;
///
/// let amount: Money = "100.50".parse().unwrap();
/// assert_eq!(amount.to_string(), "100.5");
/// assert!("0.000000001".parse::<Money>().is_err());
///
/// let big: Money = "100000000000".parse().unwrap();
/// assert_eq!(big.checked_add(amount).unwrap().to_string(), "100000000100.5");
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Money(Decimal);

/// Largest magnitude, in units of 10^-8, a `Decimal` holds at scale 8.
const MAX_UNITS: i128 = (1 << 96) - 1;

impl Money {
    /// Number of fractional digits carried by every amount.
    pub const SCALE: u32 = 8;
    pub const ZERO: Money = Money(Decimal::ZERO);

    #[must_use]
    pub fn is_positive(self) -> bool {
        self.0 > Decimal::ZERO
    }

    #[must_use]
    pub fn is_negative(self) -> bool {
        self.0 < Decimal::ZERO
    }

    /// Checked addition (returns `None` when the sum leaves the scale-8 range).
    #[must_use]
    pub fn checked_add(self, rhs: Money) -> Option<Money> {
        self.units()
            .checked_add(rhs.units())
            .and_then(Self::from_units)
    }

    /// Checked subtraction (returns `None` when the difference leaves the
    /// scale-8 range).
    #[must_use]
    pub fn checked_sub(self, rhs: Money) -> Option<Money> {
        self.units()
            .checked_sub(rhs.units())
            .and_then(Self::from_units)
    }

    /// Exact conversion from a decimal.
    pub fn from_decimal(value: Decimal) -> ResultEngine<Self> {
        let value = value.normalize();
        if value.scale() > Self::SCALE {
            return Err(EngineError::InvalidDecimal(format!(
                "at most {} decimal places are allowed",
                Self::SCALE
            )));
        }
        value
            .mantissa()
            .checked_mul(10_i128.pow(Self::SCALE - value.scale()))
            .and_then(Self::from_units)
            .ok_or_else(too_large)
    }

    #[must_use]
    pub fn to_decimal(self) -> Decimal {
        self.0
    }

    /// Value in units of 10^-8. Exact, since the scale never exceeds 8.
    fn units(self) -> i128 {
        self.0.mantissa() * 10_i128.pow(Self::SCALE - self.0.scale())
    }

    fn from_units(units: i128) -> Option<Money> {
        if units.unsigned_abs() > MAX_UNITS.unsigned_abs() {
            return None;
        }
        Decimal::try_from_i128_with_scale(units, Self::SCALE)
            .ok()
            .map(|value| Money(value.normalize()))
    }
}

fn too_large() -> EngineError {
    EngineError::InvalidAmount("amount too large".to_string())
}

impl fmt::Display for Money {
    /// Renders the shortest exact decimal (`"0"`, `"150"`, `"0.00000001"`).
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Money> for Decimal {
    fn from(value: Money) -> Self {
        value.to_decimal()
    }
}

impl FromStr for Money {
    type Err = EngineError;

    /// Parses a plain decimal string: an optional `-`, digits, and an
    /// optional `.` followed by digits (`"12"`, `"-0.5"`, `"100.00000001"`).
    ///
    /// Whitespace, `+`, `_` separators and scientific notation are rejected.
    /// Trailing fractional zeros do not count towards the 8 places.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || EngineError::InvalidDecimal(format!("{s:?} is not a decimal"));

        let (negative, digits) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let (int_part, frac_part) = match digits.split_once('.') {
            Some((int_part, frac_part)) => (int_part, Some(frac_part)),
            None => (digits, None),
        };
        let all_digits = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());
        if !all_digits(int_part) || !frac_part.is_none_or(all_digits) {
            return Err(invalid());
        }

        let frac = frac_part.unwrap_or_default().trim_end_matches('0');
        if frac.len() > Self::SCALE as usize {
            return Err(EngineError::InvalidDecimal(format!(
                "at most {} decimal places are allowed",
                Self::SCALE
            )));
        }
        let int_part = int_part.trim_start_matches('0');

        // More integer digits than a Decimal holds cannot fit at scale 8.
        let mut canonical = String::with_capacity(s.len() + 1);
        if negative {
            canonical.push('-');
        }
        canonical.push_str(if int_part.is_empty() { "0" } else { int_part });
        if !frac.is_empty() {
            canonical.push('.');
            canonical.push_str(frac);
        }
        let value = Decimal::from_str(&canonical).map_err(|_| too_large())?;
        Self::from_decimal(value)
    }
}
