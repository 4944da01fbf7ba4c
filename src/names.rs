//! Sprite naming rules and the Klei string hash.
//!
//! Sprites are identified by a base name plus a frame index, written
//! `base_index` with an optional file extension. The binary container never
//! stores those strings inline; it stores their hashes and a trailing
//! hash-to-string table.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::KanimError;

/// SDBM-style hash used for every name in a kanim hash table.
///
/// Case-insensitive: input is lowercased before hashing. The empty string
/// hashes to 0.
///
/// # Examples
///
/// ```
/// use kanimate::names::klei_hash;
///
/// assert_eq!(klei_hash("square"), 1696137821);
/// assert_eq!(klei_hash("SQUARE"), klei_hash("square"));
/// ```
pub fn klei_hash(text: &str) -> i32 {
    let mut hash: u32 = 0;
    for byte in text.to_lowercase().bytes() {
        hash = (byte as u32)
            .wrapping_add(hash << 6)
            .wrapping_add(hash << 16)
            .wrapping_sub(hash);
    }
    hash as i32
}

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // Greedy base: the index is the digit run after the last underscore.
    PATTERN.get_or_init(|| {
        Regex::new(r"^(.+)_(\d+)(?:\.[A-Za-z0-9]+)?$").expect("name pattern is valid")
    })
}

/// A sprite frame name split into its base name and frame index.
///
/// Ordering and equality are by `(base, index)`, which groups all frames of
/// one symbol together. Note that the sort order over the joined display
/// form differs (`"water_10"` sorts before `"water_2"` as a plain string).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpriteName {
    pub base: String,
    pub index: i32,
}

impl SpriteName {
    pub fn new(base: impl Into<String>, index: i32) -> Self {
        SpriteName {
            base: base.into(),
            index,
        }
    }

    /// Parses `base_index`, tolerating a trailing file extension like `.png`.
    pub fn parse(name: &str) -> Result<SpriteName, KanimError> {
        let captures = name_pattern().captures(name).ok_or_else(|| {
            KanimError::NamingConvention(format!(
                "sprite name \"{name}\" must end in an underscore and a frame index"
            ))
        })?;
        let index = captures[2].parse::<i32>().map_err(|_| {
            KanimError::NamingConvention(format!(
                "sprite name \"{name}\" has a frame index that does not fit in 32 bits"
            ))
        })?;
        Ok(SpriteName {
            base: captures[1].to_string(),
            index,
        })
    }
}

impl fmt::Display for SpriteName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.base, self.index)
    }
}

impl FromStr for SpriteName {
    type Err = KanimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SpriteName::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_known_values() {
        assert_eq!(klei_hash("square"), 1696137821);
        assert_eq!(klei_hash("water"), 1836671383);
        assert_eq!(klei_hash(""), 0);
    }

    #[test]
    fn test_hash_folds_case() {
        assert_eq!(klei_hash("Foo_0"), klei_hash("foo_0"));
        assert_eq!(klei_hash("WATER"), klei_hash("water"));
    }

    #[test]
    fn test_parse_with_extension() {
        let name = SpriteName::parse("water_12.png").unwrap();
        assert_eq!(name.base, "water");
        assert_eq!(name.index, 12);
    }

    #[test]
    fn test_parse_without_extension() {
        let name = SpriteName::parse("water_12").unwrap();
        assert_eq!(name, SpriteName::new("water", 12));
    }

    #[test]
    fn test_parse_keeps_inner_underscores() {
        let name = SpriteName::parse("body_left_2").unwrap();
        assert_eq!(name.base, "body_left");
        assert_eq!(name.index, 2);
    }

    #[test]
    fn test_parse_rejects_missing_index() {
        assert!(matches!(
            SpriteName::parse("water"),
            Err(KanimError::NamingConvention(_))
        ));
        assert!(matches!(
            SpriteName::parse("water_"),
            Err(KanimError::NamingConvention(_))
        ));
    }

    #[test]
    fn test_parse_rejects_index_overflow() {
        assert!(matches!(
            SpriteName::parse("water_99999999999"),
            Err(KanimError::NamingConvention(_))
        ));
    }

    #[test]
    fn test_display_round_trip() {
        let name = SpriteName::new("water", 3);
        assert_eq!(name.to_string(), "water_3");
        assert_eq!("water_3".parse::<SpriteName>().unwrap(), name);
    }
}
