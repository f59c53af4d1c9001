use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::fmt;
use thiserror::Error;

/// PUT or CALL, parsed strictly from the character immediately after the
/// six-digit date in an OCC symbol (`spec.md` §6 — never by substring
/// search, since the underlying ticker may itself contain `P`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionRight {
    /// Put option.
    Put,
    /// Call option.
    Call,
}

impl fmt::Display for OptionRight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OptionRight::Put => "P",
            OptionRight::Call => "C",
        })
    }
}

/// Failure reasons when an OCC-format option symbol cannot be parsed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OccSymbolParseError {
    /// The symbol was shorter than the fixed-width OCC tail requires.
    #[error("symbol too short to contain an OCC tail: {0:?}")]
    TooShort(String),
    /// The six digits immediately before the right letter were not a valid
    /// calendar date.
    #[error("invalid OCC expiration date: {0:?}")]
    InvalidDate(String),
    /// The character after the date was neither `C` nor `P`.
    #[error("expected C or P after the OCC date, got {0:?}")]
    InvalidRight(char),
    /// The trailing 8 digits were not a valid integer strike.
    #[error("invalid OCC strike digits: {0:?}")]
    InvalidStrike(String),
}

/// A parsed OCC-format option symbol: `<UND>[pad]YYMMDD[C|P]<strike*1000
/// zero-padded to 8>` (`spec.md` §6, GLOSSARY).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OccSymbol {
    /// Underlying ticker, right-trimmed of padding spaces.
    pub underlying: String,
    /// Option expiration date.
    pub expiration: NaiveDate,
    /// Put or call.
    pub right: OptionRight,
    /// Strike price.
    pub strike: Decimal,
}

impl OccSymbol {
    /// Parse a raw OCC symbol such as `SPY   251215C00684000`.
    ///
    /// The grammar is anchored from the right: the last 8 characters are
    /// the zero-padded strike*1000, the character before that is the right
    /// letter, and the six characters before that are `YYMMDD`. Everything
    /// before the date (trimmed of trailing spaces) is the underlying.
    pub fn parse(raw: &str) -> Result<Self, OccSymbolParseError> {
        let chars: Vec<char> = raw.chars().collect();
        if chars.len() < 15 {
            return Err(OccSymbolParseError::TooShort(raw.to_string()));
        }
        let strike_digits: String = chars[chars.len() - 8..].iter().collect();
        let right_char = chars[chars.len() - 9];
        let date_digits: String = chars[chars.len() - 15..chars.len() - 9].iter().collect();
        let underlying: String = chars[..chars.len() - 15].iter().collect();

        let right = match right_char {
            'C' => OptionRight::Call,
            'P' => OptionRight::Put,
            other => return Err(OccSymbolParseError::InvalidRight(other)),
        };

        let expiration = parse_yymmdd(&date_digits)
            .ok_or_else(|| OccSymbolParseError::InvalidDate(date_digits.clone()))?;

        let strike_int: i64 = strike_digits
            .parse()
            .map_err(|_| OccSymbolParseError::InvalidStrike(strike_digits.clone()))?;
        let strike = Decimal::new(strike_int, 3);

        Ok(Self {
            underlying: underlying.trim_end().to_string(),
            expiration,
            right,
            strike,
        })
    }

    /// The zero-padded 8-digit strike tail used when matching broker
    /// executions back to a trade leg (`spec.md` §4.3).
    pub fn strike_tail(&self) -> String {
        let scaled = (self.strike * Decimal::from(1000))
            .round()
            .to_string()
            .replace('.', "")
            .replace('-', "");
        format!("{scaled:0>8}")
    }
}

fn parse_yymmdd(digits: &str) -> Option<NaiveDate> {
    if digits.len() != 6 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let yy: i32 = digits[0..2].parse().ok()?;
    let mm: u32 = digits[2..4].parse().ok()?;
    let dd: u32 = digits[4..6].parse().ok()?;
    // OCC two-digit years are always 20xx for contracts traded today.
    NaiveDate::from_ymd_opt(2000 + yy, mm, dd)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn parses_the_spec_example() {
        let symbol = OccSymbol::parse("SPY   251215C00684000").expect("valid");
        assert_eq!(symbol.underlying, "SPY");
        assert_eq!(symbol.right, OptionRight::Call);
        assert_eq!(symbol.strike, dec!(684.000));
        assert_eq!(symbol.expiration, NaiveDate::from_ymd_opt(2025, 12, 15).unwrap());
    }

    #[test]
    fn underlying_containing_p_does_not_confuse_the_right_parser() {
        // "SPX" has no P, but a hypothetical "XSP" style ticker with a P in
        // it must still parse the right letter strictly from position.
        let symbol = OccSymbol::parse("PPPP  251215P00010000").expect("valid");
        assert_eq!(symbol.underlying, "PPPP");
        assert_eq!(symbol.right, OptionRight::Put);
    }

    #[test]
    fn rejects_bad_right_letter() {
        let err = OccSymbol::parse("SPY   251215X00684000").unwrap_err();
        assert_eq!(err, OccSymbolParseError::InvalidRight('X'));
    }

    #[test]
    fn strike_tail_round_trips() {
        let symbol = OccSymbol::parse("SPY   251215C00684000").expect("valid");
        assert_eq!(symbol.strike_tail(), "00684000");
    }

    #[test]
    fn too_short_symbol_is_rejected() {
        assert!(matches!(
            OccSymbol::parse("SPY"),
            Err(OccSymbolParseError::TooShort(_))
        ));
    }
}
