//! Label similarity scoring.
//!
//! Scorers are pure and deterministic. They compare strings exactly as given:
//! case folding and whitespace cleanup are the caller's job (see
//! [`normalize_label`]) so two backends that normalize differently do so
//! visibly, not through a hidden default in the scorer.

/// Computes a similarity in `[0.0, 1.0]` between two labels.
pub trait SimilarityScorer: Send + Sync {
    /// Similarity between `a` and `b`. Must be deterministic.
    fn score(&self, a: &str, b: &str) -> f64;
}

/// Jaro-Winkler similarity, the measure used by the label-matching backends.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JaroWinkler {
    /// Weight given to a shared prefix. Must be at most 0.25.
    pub prefix_scale: f64,
    /// Maximum prefix length that earns the bonus.
    pub max_prefix: usize,
}

impl Default for JaroWinkler {
    fn default() -> Self {
        Self {
            prefix_scale: 0.1,
            max_prefix: 4,
        }
    }
}

impl SimilarityScorer for JaroWinkler {
    fn score(&self, a: &str, b: &str) -> f64 {
        let jaro = jaro(a, b);
        if jaro <= 0.0 {
            return 0.0;
        }

        let prefix = a
            .chars()
            .zip(b.chars())
            .take(self.max_prefix)
            .take_while(|(x, y)| x == y)
            .count();

        #[allow(clippy::cast_precision_loss)]
        let bonus = prefix as f64 * self.prefix_scale.clamp(0.0, 0.25) * (1.0 - jaro);
        (jaro + bonus).clamp(0.0, 1.0)
    }
}

/// Exact string equality: 1.0 or 0.0.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExactScorer;

impl SimilarityScorer for ExactScorer {
    fn score(&self, a: &str, b: &str) -> f64 {
        if a == b {
            1.0
        } else {
            0.0
        }
    }
}

/// Plain Jaro similarity over Unicode scalar values.
///
/// Two empty strings are identical (1.0); one empty string scores 0.0.
#[must_use]
pub fn jaro(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }

    let window = (a.len().max(b.len()) / 2).saturating_sub(1);

    let mut a_matched = vec![false; a.len()];
    let mut b_matched = vec![false; b.len()];
    let mut matches = 0usize;

    for (i, ca) in a.iter().enumerate() {
        let lo = i.saturating_sub(window);
        let hi = (i + window + 1).min(b.len());
        for j in lo..hi {
            if !b_matched[j] && b[j] == *ca {
                a_matched[i] = true;
                b_matched[j] = true;
                matches += 1;
                break;
            }
        }
    }

    if matches == 0 {
        return 0.0;
    }

    let mut transpositions = 0usize;
    let mut k = 0usize;
    for (i, ca) in a.iter().enumerate() {
        if !a_matched[i] {
            continue;
        }
        while !b_matched[k] {
            k += 1;
        }
        if *ca != b[k] {
            transpositions += 1;
        }
        k += 1;
    }

    #[allow(clippy::cast_precision_loss)]
    let (m, t, la, lb) = (
        matches as f64,
        (transpositions / 2) as f64,
        a.len() as f64,
        b.len() as f64,
    );
    ((m / la) + (m / lb) + ((m - t) / m)) / 3.0
}

/// Lowercases, trims and collapses internal whitespace.
#[must_use]
pub fn normalize_label(s: &str) -> String {
    s.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-3
    }

    #[test]
    fn jaro_known_values() {
        assert!(approx(jaro("MARTHA", "MARHTA"), 0.944));
        assert!(approx(jaro("DIXON", "DICKSONX"), 0.767));
        assert!(approx(jaro("abc", "xyz"), 0.0));
    }

    #[test]
    fn jaro_winkler_known_values() {
        let jw = JaroWinkler::default();
        assert!(approx(jw.score("MARTHA", "MARHTA"), 0.961));
        assert!(approx(jw.score("DIXON", "DICKSONX"), 0.813));
        assert!(approx(jw.score("DWAYNE", "DUANE"), 0.84));
    }

    #[test]
    fn identical_labels_score_one() {
        let jw = JaroWinkler::default();
        assert_eq!(jw.score("Berlin", "Berlin"), 1.0);
    }

    #[test]
    fn empty_strings_have_defined_scores() {
        let jw = JaroWinkler::default();
        assert_eq!(jw.score("", ""), 1.0);
        assert_eq!(jw.score("", "x"), 0.0);
        assert_eq!(jw.score("x", ""), 0.0);
    }

    #[test]
    fn scorer_is_case_sensitive() {
        let jw = JaroWinkler::default();
        assert!(jw.score("berlin", "BERLIN") < 1.0);
        assert_eq!(
            jw.score(&normalize_label("berlin"), &normalize_label("BERLIN")),
            1.0
        );
    }

    #[test]
    fn normalize_collapses_whitespace() {
        assert_eq!(normalize_label("  New   York\tCity "), "new york city");
        assert_eq!(normalize_label(""), "");
    }

    #[test]
    fn exact_scorer() {
        assert_eq!(ExactScorer.score("a", "a"), 1.0);
        assert_eq!(ExactScorer.score("a", "A"), 0.0);
    }

    mod props {
        use super::super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn jaro_winkler_stays_in_unit_range(a in ".{0,24}", b in ".{0,24}") {
                let s = JaroWinkler::default().score(&a, &b);
                prop_assert!((0.0..=1.0).contains(&s));
            }

            #[test]
            fn jaro_winkler_of_self_is_one(a in ".{0,24}") {
                prop_assert_eq!(JaroWinkler::default().score(&a, &a), 1.0);
            }
        }
    }
}
