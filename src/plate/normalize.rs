use regex::Regex;
use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::OnceLock;

/// Minimum cleaned length before the loose repair pass is attempted.
const LOOSE_REPAIR_MIN_LEN: usize = 6;

/// Normalised plate text in `PREFIX NUMBER SUFFIX` form, or empty.
///
/// Only [`normalize`] builds non-empty values, so a non-empty
/// `CanonicalPlate` always has the canonical shape.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CanonicalPlate(String);

impl CanonicalPlate {
    /// The "no confident reading" value.
    pub fn empty() -> Self {
        Self(String::new())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Plate text with spaces replaced by underscores, for file names.
    pub fn file_stem(&self) -> String {
        self.0.replace(' ', "_")
    }

    fn from_groups(prefix: &str, digits: &str, suffix: &str) -> Self {
        Self(format!("{} {} {}", prefix, digits, suffix))
    }
}

impl fmt::Display for CanonicalPlate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CanonicalPlate {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for CanonicalPlate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

fn strict_pattern() -> &'static Regex {
    static STRICT: OnceLock<Regex> = OnceLock::new();
    STRICT.get_or_init(|| {
        Regex::new(r"^([A-Z]{1,2})([0-9]{1,4})([A-Z]{1,3})$").expect("strict plate pattern")
    })
}

fn loose_pattern() -> &'static Regex {
    static LOOSE: OnceLock<Regex> = OnceLock::new();
    LOOSE.get_or_init(|| Regex::new(r"([A-Z]+)([0-9]+)([A-Z]+)").expect("loose plate pattern"))
}

fn canonical_shape() -> &'static Regex {
    static SHAPE: OnceLock<Regex> = OnceLock::new();
    SHAPE.get_or_init(|| {
        Regex::new(r"^[A-Z]{1,2} [0-9]{1,4} [A-Z]{1,3}$").expect("canonical plate shape")
    })
}

/// Normalise raw OCR text into a canonical plate.
///
/// Total and deterministic: any input, including empty or garbage text,
/// yields either a canonical plate or [`CanonicalPlate::empty`].
///
/// 1. Whitespace is removed and the text upper-cased.
/// 2. The whole cleaned text must match 1-2 letters, 1-4 digits, 1-3 letters.
///    In the suffix group only, `2` is read as `Z`.
/// 3. Otherwise, for texts longer than five characters, every `2` is read
///    as `Z` and the first letters/digits/letters run is taken, provided it
///    still has the canonical shape.
pub fn normalize(raw_text: &str) -> CanonicalPlate {
    let cleaned: String = raw_text
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect();
    if cleaned.is_empty() {
        return CanonicalPlate::empty();
    }

    if let Some(caps) = strict_pattern().captures(&cleaned) {
        let suffix = caps[3].replace('2', "Z");
        return CanonicalPlate::from_groups(&caps[1], &caps[2], &suffix);
    }

    if cleaned.chars().count() < LOOSE_REPAIR_MIN_LEN {
        return CanonicalPlate::empty();
    }

    // 0 and 1 are trusted digits; of the rest only 2 has a letter twin.
    let repaired: String = cleaned
        .chars()
        .map(|c| match c {
            '2' => 'Z',
            other => other,
        })
        .collect();

    let Some(caps) = loose_pattern().captures(&repaired) else {
        return CanonicalPlate::empty();
    };
    let plate = CanonicalPlate::from_groups(&caps[1], &caps[2], &caps[3]);
    if canonical_shape().is_match(plate.as_str()) {
        plate
    } else {
        CanonicalPlate::empty()
    }
}

/// Returns true when `text` already has the canonical plate shape.
pub fn is_canonical(text: &str) -> bool {
    canonical_shape().is_match(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_match_passes_numeric_group_through() {
        assert_eq!(normalize("B2156TOR").as_str(), "B 2156 TOR");
    }

    #[test]
    fn strict_match_ignores_whitespace_and_case() {
        assert_eq!(normalize("  b 2156\ntor ").as_str(), "B 2156 TOR");
        assert_eq!(normalize("F 9012 HIJ").as_str(), "F 9012 HIJ");
    }

    #[test]
    fn loose_pass_repairs_confusable_suffix() {
        assert_eq!(normalize("B1001Z22").as_str(), "B 1001 ZZZ");
    }

    #[test]
    fn loose_pass_requires_more_than_five_characters() {
        // "AB12C2" fails the strict pattern and is six characters long.
        assert_eq!(normalize("AB12C2").as_str(), "AB 1 ZCZ");
        assert!(normalize("12C2").is_empty());
    }

    #[test]
    fn loose_result_outside_canonical_shape_is_dropped() {
        // Repair yields "BZ156TORZ": the run "BZ 156 TORZ" has a 4-letter suffix.
        assert!(normalize("B2156TOR2").is_empty());
        assert!(normalize("ABCD1234EFGH").is_empty());
    }

    #[test]
    fn garbage_degrades_to_empty() {
        for raw in ["", "   ", "!!!", "1234", "ABCDEF", "----____", "ñandú 42"] {
            assert!(normalize(raw).is_empty(), "{:?} should not normalise", raw);
        }
    }

    #[test]
    fn output_is_always_empty_or_canonical() {
        let alphabet = ['A', 'B', 'Z', '0', '1', '2', '7', ' ', '-', 'é'];
        let mut seed: u64 = 0x9e37_79b9_7f4a_7c15;
        for _ in 0..5_000 {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            let len = (seed % 14) as usize;
            let text: String = (0..len)
                .map(|i| alphabet[((seed >> (i * 4)) % alphabet.len() as u64) as usize])
                .collect();
            let plate = normalize(&text);
            assert!(
                plate.is_empty() || is_canonical(plate.as_str()),
                "{:?} -> {:?}",
                text,
                plate
            );
            assert_eq!(plate, normalize(&text));
        }
    }

    #[test]
    fn canonical_output_renormalises_to_itself() {
        for raw in ["B2156TOR", "B1001Z22", "d 77 ab", "AB12C2"] {
            let first = normalize(raw);
            assert!(!first.is_empty());
            let compact: String = first.as_str().split_whitespace().collect();
            assert_eq!(normalize(&compact), first);
            assert_eq!(normalize(first.as_str()), first);
        }
    }

    #[test]
    fn very_long_input_is_handled() {
        let long = "X".repeat(10_000) + "1234" + &"Y".repeat(10_000);
        assert!(normalize(&long).is_empty());
    }

    #[test]
    fn file_stem_uses_underscores() {
        assert_eq!(normalize("B2156TOR").file_stem(), "B_2156_TOR");
    }
}
