// src/naming.rs
//
// Collision-avoiding name generation.
//
// A colliding or over-long name gets an underscore and a random three digit
// number inserted before its extension, with the stem truncated so the result
// fits the length bound. The existence check itself lives in the adapter.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Mutex, PoisonError};

use crate::constants::{NAME_SUFFIX_MAX, NAME_SUFFIX_MIN};

/// Characters added by a suffix: the underscore plus three digits.
pub const SUFFIX_WIDTH: usize = 4;

/// Split `name` into stem and extension.
///
/// The extension runs from the last `.` of the final path segment to the end,
/// dot included. A segment that only starts with a dot (`.env`) has none.
pub fn split_extension(name: &str) -> (&str, &str) {
    let segment_start = name.rfind('/').map_or(0, |i| i + 1);
    let segment = &name[segment_start..];
    let dot = segment
        .char_indices()
        .skip_while(|&(_, c)| c == '.')
        .filter(|&(_, c)| c == '.')
        .last()
        .map(|(i, _)| i);
    match dot {
        Some(i) => name.split_at(segment_start + i),
        None => (name, ""),
    }
}

/// Length in characters, which is what the bound is expressed in.
pub fn char_len(name: &str) -> usize {
    name.chars().count()
}

/// True when `name` is longer than `max_length`. `None` and `Some(0)` mean unbounded.
pub fn exceeds(name: &str, max_length: Option<usize>) -> bool {
    match max_length {
        Some(max) if max > 0 => char_len(name) > max,
        _ => false,
    }
}

fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Build the next candidate for `name` using `suffix`.
///
/// With a bound, the stem keeps `max_length - len(ext) - SUFFIX_WIDTH`
/// characters so that the candidate itself fits. Reserving only the underscore
/// would leave every truncated candidate three characters too long.
pub fn candidate(name: &str, max_length: Option<usize>, suffix: u32) -> String {
    let (stem, ext) = split_extension(name);
    let stem = match max_length {
        Some(max) if max > 0 => truncate_chars(stem, max.saturating_sub(char_len(ext)).saturating_sub(SUFFIX_WIDTH)),
        _ => stem,
    };
    format!("{stem}_{suffix}{ext}")
}

/// Source of random suffixes, seeded from the OS unless a seed is given.
#[derive(Debug)]
pub struct NameResolver {
    rng: Mutex<StdRng>,
    max_attempts: Option<usize>,
}

impl NameResolver {
    pub fn new(seed: Option<u64>, max_attempts: Option<usize>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            rng: Mutex::new(rng),
            max_attempts,
        }
    }

    /// How many candidates may be tried before giving up. `None` is unbounded.
    pub fn max_attempts(&self) -> Option<usize> {
        self.max_attempts
    }

    fn suffix(&self) -> u32 {
        self.rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .random_range(NAME_SUFFIX_MIN..NAME_SUFFIX_MAX)
    }

    /// Next candidate derived from `name`.
    pub fn next_candidate(&self, name: &str, max_length: Option<usize>) -> String {
        candidate(name, max_length, self.suffix())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_extension() {
        assert_eq!(split_extension("report.txt"), ("report", ".txt"));
        assert_eq!(split_extension("archive.tar.gz"), ("archive.tar", ".gz"));
        assert_eq!(split_extension("README"), ("README", ""));
        assert_eq!(split_extension("docs/v1.2/README"), ("docs/v1.2/README", ""));
        assert_eq!(split_extension("docs/a.b/c.md"), ("docs/a.b/c", ".md"));
        assert_eq!(split_extension(".env"), (".env", ""));
        assert_eq!(split_extension("dir/.config.json"), ("dir/.config", ".json"));
    }

    #[test]
    fn test_candidate_without_bound() {
        assert_eq!(candidate("photo.jpg", None, 123), "photo_123.jpg");
        assert_eq!(candidate("Makefile", None, 500), "Makefile_500");
        assert_eq!(candidate("a/b/c.tar.gz", Some(0), 101), "a/b/c.tar_101.gz");
    }

    #[test]
    fn test_candidate_truncates_stem() {
        // 10 - len(".txt") - len("_456") = 2 characters of stem survive
        let name = candidate("abcdefgh.txt", Some(10), 456);
        assert_eq!(name, "ab_456.txt");
        assert_eq!(char_len(&name), 10);
    }

    #[test]
    fn test_candidate_at_bound_fits() {
        let name = candidate("abcdef.txt", Some(10), 321);
        assert_eq!(name, "ab_321.txt");
        assert!(!exceeds(&name, Some(10)));
    }

    #[test]
    fn test_short_stem_is_not_truncated() {
        assert_eq!(candidate("abcde.txt", Some(20), 123), "abcde_123.txt");
    }

    #[test]
    fn test_candidate_counts_characters_not_bytes() {
        let name = candidate("ééééééé.md", Some(8), 100);
        assert_eq!(name, "é_100.md");
    }

    #[test]
    fn test_candidate_with_tiny_bound_keeps_extension() {
        assert_eq!(candidate("abc.txt", Some(3), 777), "_777.txt");
    }

    #[test]
    fn test_exceeds() {
        assert!(!exceeds("abc", None));
        assert!(!exceeds("abc", Some(0)));
        assert!(!exceeds("abc", Some(3)));
        assert!(exceeds("abcd", Some(3)));
    }

    #[test]
    fn test_suffix_range_and_determinism() {
        let a = NameResolver::new(Some(42), None);
        let b = NameResolver::new(Some(42), None);
        for _ in 0..200 {
            let x = a.next_candidate("file.bin", None);
            let y = b.next_candidate("file.bin", None);
            assert_eq!(x, y);
            let digits: u32 = x["file_".len().."file_".len() + 3].parse().unwrap();
            assert!((100..999).contains(&digits));
        }
    }
}
