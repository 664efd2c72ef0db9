//! Version identifier ordering.
//!
//! Versions are dot-separated segments such as `1.2.3` or `2.0.beta`.
//! Segments compare numerically when both are digits and byte-wise
//! otherwise. A version that runs out of segments first is the lower one,
//! so `1.2` sorts before `1.2.1`.
//!
//! The ordering is not transitive once digit and non-digit segments share a
//! position: `2 < 10` and `10 < 1a`, yet `2 > 1a`. [`sort_by_version`] never
//! panics on such input, but the order it produces then depends on the
//! input order.

use std::cmp::Ordering;

/// Checkpoint version assumed for a subject that has never been updated.
pub const ZERO_VERSION: &str = "0.0.0";

/// Compare two version identifiers.
pub fn compare(a: &str, b: &str) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }

    let mut left = a.split('.');
    let mut right = b.split('.');

    loop {
        match (left.next(), right.next()) {
            (Some(l), Some(r)) => match compare_segment(l, r) {
                Ordering::Equal => continue,
                other => return other,
            },
            (Some(_), None) => return Ordering::Greater,
            (None, Some(_)) => return Ordering::Less,
            (None, None) => return Ordering::Equal,
        }
    }
}

/// Compare two versions and return `-1`, `0` or `1`.
pub fn compare_sign(a: &str, b: &str) -> i32 {
    match compare(a, b) {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }
}

/// Whether `candidate` is strictly newer than `current`.
pub fn is_newer(current: &str, candidate: &str) -> bool {
    compare(current, candidate) == Ordering::Less
}

/// Stable sort of `items` by the version each one carries.
///
/// An insertion sort: step lists are short, and unlike `slice::sort_by` it
/// tolerates the non-transitive mixed-segment cases.
pub fn sort_by_version<T>(items: &mut [T], key: impl Fn(&T) -> &str) {
    for i in 1..items.len() {
        let mut j = i;
        while j > 0 && compare(key(&items[j - 1]), key(&items[j])) == Ordering::Greater {
            items.swap(j - 1, j);
            j -= 1;
        }
    }
}

fn compare_segment(a: &str, b: &str) -> Ordering {
    if is_numeric(a) && is_numeric(b) {
        // Digit strings of any length: drop leading zeros, then the longer
        // one is larger and equal lengths compare byte-wise.
        let a = a.trim_start_matches('0');
        let b = b.trim_start_matches('0');
        a.len().cmp(&b.len()).then_with(|| a.cmp(b))
    } else {
        a.cmp(b)
    }
}

fn is_numeric(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_versions() {
        assert_eq!(compare("1.2.3", "1.2.3"), Ordering::Equal);
        assert_eq!(compare("0.0.0", ZERO_VERSION), Ordering::Equal);
        assert_eq!(compare_sign("2.0", "2.0"), 0);
    }

    #[test]
    fn test_numeric_not_lexical() {
        assert_eq!(compare("1.10", "1.9"), Ordering::Greater);
        assert_eq!(compare("2", "10"), Ordering::Less);
        assert_eq!(compare("1.02", "1.2"), Ordering::Equal);
    }

    #[test]
    fn test_missing_trailing_segment_is_lower() {
        assert_eq!(compare("1.2", "1.2.1"), Ordering::Less);
        assert_eq!(compare("1.2.1", "1.2"), Ordering::Greater);
        assert_eq!(compare("1.2", "1.2.0"), Ordering::Less);
    }

    #[test]
    fn test_non_numeric_segments_compare_lexically() {
        assert_eq!(compare("1.0.alpha", "1.0.beta"), Ordering::Less);
        assert_eq!(compare("1.0.rc1", "1.0.rc1"), Ordering::Equal);
        assert_eq!(compare("1.x", "1.y"), Ordering::Less);
    }

    #[test]
    fn test_large_numbers() {
        assert_eq!(
            compare("1.99999999999999999999", "1.100000000000000000000"),
            Ordering::Less
        );
    }

    #[test]
    fn test_antisymmetric_over_ordered_list() {
        let ordered = ["0.0.0", "0.9", "1", "1.0", "1.0.0", "1.2", "1.2.1", "1.10", "2.0"];

        for (i, a) in ordered.iter().enumerate() {
            assert_eq!(compare_sign(a, a), 0);
            for b in &ordered[i + 1..] {
                assert!(compare_sign(a, b) < 0, "{a} should sort before {b}");
                assert!(compare_sign(b, a) > 0, "{b} should sort after {a}");
            }
        }
    }

    #[test]
    fn test_is_newer() {
        assert!(is_newer(ZERO_VERSION, "0.1"));
        assert!(is_newer("1.0", "1.5"));
        assert!(!is_newer("1.0", "0.5"));
        assert!(!is_newer("1.0", "1.0"));
    }

    #[test]
    fn test_mixed_segments_are_not_transitive() {
        assert_eq!(compare("2", "10"), Ordering::Less);
        assert_eq!(compare("10", "1a"), Ordering::Less);
        assert_eq!(compare("2", "1a"), Ordering::Greater);

        let mut items = vec!["1a", "10", "2"];
        sort_by_version(&mut items, |item| *item);
        assert_eq!(items, vec!["10", "1a", "2"]);
    }

    #[test]
    fn test_sort_mixed_segments_does_not_panic() {
        let mut items: Vec<String> = (0..200)
            .map(|i| match i % 3 {
                0 => format!("1.{i}"),
                1 => format!("1.{i}a"),
                _ => format!("1.x{i}"),
            })
            .collect();
        sort_by_version(&mut items, |item| item.as_str());
        assert_eq!(items.len(), 200);
    }

    #[test]
    fn test_sort_is_stable() {
        let mut items = vec![("1.2", 'a'), ("0.9", 'b'), ("1.2", 'c'), ("1.0.0", 'd')];
        sort_by_version(&mut items, |item| item.0);

        assert_eq!(items, vec![("0.9", 'b'), ("1.0.0", 'd'), ("1.2", 'a'), ("1.2", 'c')]);
    }
}
