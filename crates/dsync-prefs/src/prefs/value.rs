//! Typed conversions for preference values.
//!
//! Values are always stored as strings. Numbers use Rust's `Display`/`FromStr`,
//! which never depend on the process locale, so a file written on one machine
//! reads back identically on any other.

/// A type that can live inside a preference entry.
pub trait PrefValue: Sized {
    /// Canonical string form written to disk.
    fn to_pref_string(&self) -> String;

    /// Parse a stored string; `None` when the text is not a valid `Self`.
    fn from_pref_str(raw: &str) -> Option<Self>;
}

impl PrefValue for String {
    fn to_pref_string(&self) -> String {
        self.clone()
    }

    fn from_pref_str(raw: &str) -> Option<Self> {
        Some(raw.to_string())
    }
}

impl PrefValue for bool {
    fn to_pref_string(&self) -> String {
        if *self { "true" } else { "false" }.to_string()
    }

    fn from_pref_str(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.eq_ignore_ascii_case("true") {
            Some(true)
        } else if trimmed.eq_ignore_ascii_case("false") {
            Some(false)
        } else {
            None
        }
    }
}

macro_rules! numeric_pref_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl PrefValue for $ty {
                fn to_pref_string(&self) -> String {
                    self.to_string()
                }

                fn from_pref_str(raw: &str) -> Option<Self> {
                    raw.trim().parse::<$ty>().ok()
                }
            }
        )*
    };
}

numeric_pref_value!(i32, i64, u16, u32, u64, f32, f64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_accepts_any_case() {
        assert_eq!(bool::from_pref_str("True"), Some(true));
        assert_eq!(bool::from_pref_str(" FALSE "), Some(false));
        assert_eq!(bool::from_pref_str("yes"), None);
        assert_eq!(true.to_pref_string(), "true");
    }

    #[test]
    fn numbers_use_invariant_format() {
        assert_eq!(1.5f64.to_pref_string(), "1.5");
        assert_eq!(f64::from_pref_str("1,5"), None);
        assert_eq!(i64::from_pref_str("1700000000"), Some(1_700_000_000));
        assert_eq!(i32::from_pref_str("not a number"), None);
    }

    #[test]
    fn integer_overflow_is_a_parse_failure() {
        assert_eq!(i32::from_pref_str("99999999999"), None);
        assert_eq!(u16::from_pref_str("70000"), None);
    }
}
