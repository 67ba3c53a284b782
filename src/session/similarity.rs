//! Edit-distance similarity for fuzzy summary matching.

/// Levenshtein distance over Unicode scalar values.
#[must_use]
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            curr[j + 1] = substitution.min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// `(max_len - distance) / max_len * 100`, with two empty strings at 100.
#[must_use]
pub fn similarity_percent(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 100.0;
    }
    let distance = levenshtein(a, b);
    (max_len - distance) as f64 / max_len as f64 * 100.0
}

/// Empty matches empty, empty never matches non-empty, otherwise the
/// similarity must strictly exceed `threshold` percent.
#[must_use]
pub fn is_similar(a: &str, b: &str, threshold: f64) -> bool {
    match (a.is_empty(), b.is_empty()) {
        (true, true) => true,
        (true, false) | (false, true) => false,
        (false, false) => similarity_percent(a, b) > threshold,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levenshtein_basics() {
        assert_eq!(levenshtein("", ""), 0);
        assert_eq!(levenshtein("abc", ""), 3);
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("héllo", "hello"), 1);
    }

    #[test]
    fn test_empty_vs_empty_matches() {
        assert!(is_similar("", "", 90.0));
        assert!((similarity_percent("", "") - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_vs_non_empty_never_matches() {
        assert!(!is_similar("", "x", 0.5));
        assert!(!is_similar("x", "", 0.5));
    }

    #[test]
    fn test_one_char_change_in_200_matches() {
        let a = "a".repeat(200);
        let b = format!("{}b", "a".repeat(199));
        assert!(similarity_percent(&a, &b) > 90.0);
        assert!(is_similar(&a, &b, 90.0));
    }

    #[test]
    fn test_different_words_do_not_match() {
        assert!(similarity_percent("hello", "goodbye") <= 90.0);
        assert!(!is_similar("hello", "goodbye", 90.0));
    }

    #[test]
    fn test_threshold_is_strict() {
        // One edit in ten characters is exactly 90%.
        let a = "abcdefghij";
        let b = "abcdefghiX";
        assert!((similarity_percent(a, b) - 90.0).abs() < 1e-9);
        assert!(!is_similar(a, b, 90.0));
        assert!(is_similar(a, b, 89.0));
    }
}
