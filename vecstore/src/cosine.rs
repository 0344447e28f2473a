/// Compute the cosine similarity between two vectors.
///
/// Returns a value in `[-1, 1]` where 1 means identical direction.
/// Accumulates in f64 and clamps the result to absorb rounding error.
/// Returns -1.0 for zero vectors or dimension mismatches so that such
/// pairs always rank last.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return -1.0;
    }

    let mut dot: f64 = 0.0;
    let mut norm_a: f64 = 0.0;
    let mut norm_b: f64 = 0.0;

    for (&x, &y) in a.iter().zip(b.iter()) {
        let ai = x as f64;
        let bi = y as f64;
        dot += ai * bi;
        norm_a += ai * ai;
        norm_b += bi * bi;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return -1.0;
    }

    let similarity = dot / (norm_a.sqrt() * norm_b.sqrt());
    similarity.clamp(-1.0, 1.0) as f32
}

/// Compute the cosine distance between two vectors, `1 - similarity`.
///
/// Returns a value in `[0, 2]`; 2.0 for zero vectors or dimension mismatches.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}

/// Scale `v` to unit length in place. Zero vectors are left untouched.
pub fn l2_normalize(v: &mut [f32]) {
    let norm: f64 = v.iter().map(|&x| (x as f64) * (x as f64)).sum::<f64>().sqrt();
    if norm > 0.0 {
        let s = (1.0 / norm) as f32;
        for x in v.iter_mut() {
            *x *= s;
        }
    }
}
