use std::hash::{Hash, Hasher};

use twox_hash::XxHash64;

/// Deterministic stand-in for a real model.
///
/// Each whitespace token is hashed with XxHash64 (seed 0) into one of `dim`
/// buckets; the bucket gets a weight derived from the high hash bits plus a
/// small position term. The result is L2-normalized, so texts that share
/// tokens end up close in cosine space. Empty text gives the zero vector,
/// and `dim == 0` gives an empty one.
pub fn mock_vector(text: &str, dim: usize) -> Vec<f32> {
    if dim == 0 {
        return Vec::new();
    }
    let mut v = vec![0f32; dim];
    for (i, token) in text.split_whitespace().enumerate() {
        let mut hasher = XxHash64::with_seed(0);
        token.to_lowercase().hash(&mut hasher);
        let h = hasher.finish();
        let idx = (h % dim as u64) as usize;
        let val = ((h >> 32) as u32) as f32 / u32::MAX as f32;
        v[idx] += val + (i % 3) as f32 * 0.01;
    }
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v { *x /= norm; }
    }
    v
}
