//! Deterministic top-k selection over a probability vector

use std::cmp::Ordering;

/// Highest-probability entry first; equal probabilities by ascending id.
fn rank_order(a: &(u32, f32), b: &(u32, f32)) -> Ordering {
    b.1.total_cmp(&a.1).then(a.0.cmp(&b.0))
}

/// The `k` most likely `(token id, probability)` pairs, best first.
///
/// NaN entries rank below every real probability. Returns fewer than `k`
/// pairs only when the vocabulary is smaller than `k`.
pub fn top_k(probs: &[f32], k: usize) -> Vec<(u32, f32)> {
    let mut ranked: Vec<(u32, f32)> = probs
        .iter()
        .enumerate()
        .map(|(id, &p)| (id as u32, if p.is_nan() { f32::NEG_INFINITY } else { p }))
        .collect();

    let k = k.min(ranked.len());
    if k == 0 {
        return Vec::new();
    }

    if k < ranked.len() {
        ranked.select_nth_unstable_by(k - 1, rank_order);
        ranked.truncate(k);
    }
    ranked.sort_by(rank_order);
    ranked
}
