//! Reciprocal Rank Fusion: combine a vector-search ranking and a keyword
//! ranking into one score without needing the two to share a scale.

use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct FusedHit {
  pub chunk_id: String,
  pub score: f64,
}

/// `vector_results` and `keyword_results` must already be sorted by
/// descending relevance; rank is derived from position, not from the score
/// values themselves. A chunk absent from one list contributes `0` for that
/// list's term.
pub fn reciprocal_rank_fusion(
  vector_results: &[(String, f32)],
  keyword_results: &[(String, f32)],
  k0: f64,
  top_k: usize,
) -> Vec<FusedHit> {
  let mut scores: HashMap<String, f64> = HashMap::new();

  for (rank, (chunk_id, _)) in vector_results.iter().enumerate() {
    *scores.entry(chunk_id.clone()).or_insert(0.0) += 1.0 / (k0 + (rank + 1) as f64);
  }
  for (rank, (chunk_id, _)) in keyword_results.iter().enumerate() {
    *scores.entry(chunk_id.clone()).or_insert(0.0) += 1.0 / (k0 + (rank + 1) as f64);
  }

  let mut fused: Vec<FusedHit> = scores.into_iter().map(|(chunk_id, score)| FusedHit { chunk_id, score }).collect();
  fused.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
  fused.truncate(top_k);
  fused
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn chunk_in_both_lists_outranks_single_list_hits() {
    let vector = vec![("a".to_string(), 0.9), ("b".to_string(), 0.5)];
    let keyword = vec![("a".to_string(), 10.0), ("c".to_string(), 8.0)];

    let fused = reciprocal_rank_fusion(&vector, &keyword, 60.0, 10);
    assert_eq!(fused[0].chunk_id, "a");
  }

  #[test]
  fn matches_the_documented_example() {
    // k0=60, two chunks: one ranked 1st in both lists, one ranked 2nd in both.
    let vector = vec![("x".to_string(), 1.0), ("y".to_string(), 0.8)];
    let keyword = vec![("x".to_string(), 5.0), ("y".to_string(), 4.0)];

    let fused = reciprocal_rank_fusion(&vector, &keyword, 60.0, 2);
    assert_eq!(fused.len(), 2);
    assert!((fused[0].score - 2.0 / 61.0).abs() < 1e-9);
    assert_eq!(fused[0].chunk_id, "x");
    assert!((fused[1].score - 2.0 / 62.0).abs() < 1e-9);
  }

  #[test]
  fn truncates_to_top_k() {
    let vector: Vec<(String, f32)> = (0..20).map(|i| (format!("c{i}"), 1.0)).collect();
    let fused = reciprocal_rank_fusion(&vector, &[], 60.0, 5);
    assert_eq!(fused.len(), 5);
  }

  #[test]
  fn chunk_missing_from_one_list_still_scores() {
    let vector = vec![("only-vector".to_string(), 1.0)];
    let fused = reciprocal_rank_fusion(&vector, &[], 60.0, 10);
    assert_eq!(fused.len(), 1);
    assert!((fused[0].score - 1.0 / 61.0).abs() < 1e-9);
  }
}
