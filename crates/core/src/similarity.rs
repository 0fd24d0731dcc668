use std::collections::BTreeSet;

use itertools::Itertools;

/// Lexical score of a header against one line, in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LexicalScore {
    /// [`token_set_ratio`]; compared against the match threshold.
    pub set: f32,
    /// [`token_sort_ratio`]; ranks a heading line above a body sentence that
    /// merely contains the header words.
    pub sort: f32,
}

impl LexicalScore {
    pub fn ranking(&self) -> f32 {
        (self.set + self.sort) / 2.0
    }
}

pub fn header_similarity(header: &str, line: &str) -> LexicalScore {
    if header.trim().is_empty() || line.trim().is_empty() {
        return LexicalScore { set: 0.0, sort: 0.0 };
    }
    LexicalScore {
        set: token_set_ratio(header, line),
        sort: token_sort_ratio(header, line),
    }
}

/// Similarity of the whitespace tokens after sorting, in `[0, 1]`.
pub fn token_sort_ratio(left: &str, right: &str) -> f32 {
    let a = left.split_whitespace().sorted().join(" ");
    let b = right.split_whitespace().sorted().join(" ");
    ratio(&a, &b)
}

/// Token-set similarity in `[0, 1]`.
///
/// Both inputs are split on whitespace; the shared tokens are compared against each
/// side's full token set so that extra words on either side (a trailing page number,
/// a leading section number, a paraphrased qualifier) cost little while disjoint
/// wording scores low.
pub fn token_set_ratio(left: &str, right: &str) -> f32 {
    let a = tokens(left);
    let b = tokens(right);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(&b).copied().collect::<Vec<_>>().join(" ");
    let only_a = a.difference(&b).copied().collect::<Vec<_>>().join(" ");
    let only_b = b.difference(&a).copied().collect::<Vec<_>>().join(" ");
    if shared.is_empty() {
        return ratio(&only_a, &only_b);
    }
    let with_a = join(&shared, &only_a);
    let with_b = join(&shared, &only_b);
    ratio(&shared, &with_a)
        .max(ratio(&shared, &with_b))
        .max(ratio(&with_a, &with_b))
}

fn tokens(text: &str) -> BTreeSet<&str> {
    text.split_whitespace()
        .map(|t| t.trim_matches(|c: char| matches!(c, ',' | ';' | ':' | '"' | '\'')))
        .filter(|t| !t.is_empty())
        .collect()
}

fn join(head: &str, tail: &str) -> String {
    if tail.is_empty() {
        head.to_string()
    } else {
        format!("{head} {tail}")
    }
}

fn ratio(a: &str, b: &str) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    strsim::normalized_levenshtein(a, b) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_and_subset_score_one() {
        assert_eq!(token_set_ratio("scope of work", "scope of work"), 1.0);
        assert_eq!(token_set_ratio("introduction", "introduction ........ 3"), 1.0);
    }

    #[test]
    fn word_order_does_not_matter() {
        assert_eq!(token_set_ratio("work scope", "scope work"), 1.0);
    }

    #[test]
    fn unrelated_text_scores_low() {
        assert!(token_set_ratio("quality assurance", "electrical installation") < 0.5);
        assert_eq!(token_set_ratio("", "anything"), 0.0);
    }

    #[test]
    fn body_sentences_rank_below_header_lines() {
        let header = header_similarity("scope of work", "scope of work");
        let body = header_similarity(
            "scope of work",
            "this document defines the scope of work for the project",
        );
        assert_eq!(header.ranking(), 1.0);
        assert_eq!(body.set, 1.0);
        assert!(body.ranking() < 0.8, "body {body:?}");
    }

    #[test]
    fn shortened_headers_keep_full_set_score() {
        let score = header_similarity("submittals", "submittals and shop drawings");
        assert_eq!(score.set, 1.0);
        assert!(score.sort < 0.8);
    }

    #[test]
    fn small_typos_stay_close() {
        let score = token_set_ratio("terminology symbols definitions", "terminology symbo1s definitions");
        assert!(score > 0.8, "score {score}");
    }
}
