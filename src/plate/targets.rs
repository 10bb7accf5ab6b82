use std::collections::BTreeSet;

use super::{normalize, CanonicalPlate};

/// Snapshot of the operator's target plates.
///
/// Entries are keyed by `normalize_target`, so `" b  1001 zzz"`,
/// `"B1001ZZZ"` and `"B 1001 ZZZ"` are the same target.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TargetPlateSet {
    plates: BTreeSet<String>,
}

impl TargetPlateSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, plate: &str) -> bool {
        let key = normalize_target(plate);
        if key.is_empty() {
            return false;
        }
        self.plates.insert(key)
    }

    pub fn contains(&self, plate: &CanonicalPlate) -> bool {
        !plate.is_empty() && self.plates.contains(plate.as_str())
    }

    pub fn len(&self) -> usize {
        self.plates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plates.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.plates.iter().map(String::as_str)
    }
}

impl<S: AsRef<str>> FromIterator<S> for TargetPlateSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = Self::new();
        for plate in iter {
            set.insert(plate.as_ref());
        }
        set
    }
}

/// Canonical form for an operator-entered plate.
///
/// Text that reads as a plate takes the same canonical form OCR output
/// does. Anything else is upper-cased with whitespace runs collapsed.
pub fn normalize_target(plate: &str) -> String {
    let canonical = normalize(plate);
    if !canonical.is_empty() {
        return canonical.as_str().to_string();
    }
    plate
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plate::normalize;

    #[test]
    fn membership_is_case_and_whitespace_insensitive() {
        let set: TargetPlateSet = [" b  1001 zzz", "B 2156 TOR"].into_iter().collect();
        assert_eq!(set.len(), 2);
        assert!(set.contains(&normalize("B1001ZZZ")));
        assert!(set.contains(&normalize("b 2156 tor")));
        assert!(!set.contains(&normalize("F9012HIJ")));
    }

    #[test]
    fn empty_plate_is_never_a_target() {
        let mut set = TargetPlateSet::new();
        assert!(!set.insert("   "));
        assert!(!set.contains(&CanonicalPlate::empty()));
    }

    #[test]
    fn unspaced_entry_matches_ocr_output() {
        assert_eq!(normalize_target("b1001zzz"), "B 1001 ZZZ");
        let set: TargetPlateSet = ["B2156TOR"].into_iter().collect();
        assert!(set.contains(&normalize("B 2156 TOR")));
    }

    #[test]
    fn non_plate_text_is_only_cleaned() {
        assert_eq!(normalize_target("  vip   car "), "VIP CAR");
    }

    #[test]
    fn duplicates_collapse() {
        let set: TargetPlateSet = ["B 1001 ZZZ", "b 1001 zzz"].into_iter().collect();
        assert_eq!(set.iter().collect::<Vec<_>>(), vec!["B 1001 ZZZ"]);
    }
}
