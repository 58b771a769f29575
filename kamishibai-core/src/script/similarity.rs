/// Text similarity in `[0, 1]`; 1 means identical.
pub trait SimilarityScorer: Send + Sync {
    fn score(&self, a: &str, b: &str) -> f64;
}

/// Normalized Levenshtein similarity over characters. Empty input never
/// matches. Insertions weigh more here than in a matching-blocks ratio.
#[derive(Debug, Default, Clone, Copy)]
pub struct LevenshteinRatio;

impl SimilarityScorer for LevenshteinRatio {
    fn score(&self, a: &str, b: &str) -> f64 {
        if a.is_empty() || b.is_empty() {
            return 0.0;
        }
        strsim::normalized_levenshtein(a, b).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_text_scores_one() {
        assert_eq!(LevenshteinRatio.score("年金は大事", "年金は大事"), 1.0);
    }

    #[test]
    fn empty_text_scores_zero() {
        assert_eq!(LevenshteinRatio.score("", "年金"), 0.0);
        assert_eq!(LevenshteinRatio.score("年金", ""), 0.0);
    }

    #[test]
    fn near_duplicates_score_high() {
        let score = LevenshteinRatio.score(
            "年金の受給額は毎年変わります",
            "年金の受給額は毎年変わりますね",
        );
        assert!(score > 0.9, "score was {score}");
        let unrelated = LevenshteinRatio.score("年金の受給額", "今日は晴れ");
        assert!(unrelated < 0.3, "score was {unrelated}");
    }

    #[test]
    fn insertion_is_scored_by_edit_distance() {
        let score = LevenshteinRatio.score("年金", "年金の話");
        assert!((score - 0.5).abs() < 1e-9, "score was {score}");
    }
}
