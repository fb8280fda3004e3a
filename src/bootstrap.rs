use rand::Rng;

/// Politis-White style rule of thumb: n^(1/3), at least 1.
pub fn default_block_length(n: usize) -> usize {
    ((n as f64).cbrt().ceil() as usize).clamp(1, n.max(1))
}

/// Moving-block resample of `0..n`: contiguous blocks with uniform starts,
/// concatenated and truncated to `n`.
pub fn block_indices<R: Rng + ?Sized>(n: usize, block_len: usize, rng: &mut R) -> Vec<usize> {
    if n == 0 {
        return Vec::new();
    }
    let block_len = block_len.clamp(1, n);
    let max_start = n - block_len;
    let mut out = Vec::with_capacity(n + block_len);
    while out.len() < n {
        let start = rng.gen_range(0..=max_start);
        out.extend(start..start + block_len);
    }
    out.truncate(n);
    out
}

/// Seed for replicate `index`. Each replicate owns its RNG, so results do not
/// depend on how replicates are spread across threads.
pub fn replicate_seed(seed: u64, index: u64) -> u64 {
    let mut z = seed ^ index.wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Linear-interpolated quantile of an ascending slice.
pub fn percentile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let q = q.clamp(0.0, 1.0);
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

pub fn sort_finite(values: &mut Vec<f64>) {
    values.retain(|v| v.is_finite());
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
}
