//! Guess scoring.
//!
//! Observations and actions share one discrete space `[0, n)`. Both are mapped
//! onto `[-1, 1]` with `(v - mean) / mean`, `mean = (n - 1) / 2`, and the
//! reward is `1 - |obs - action| / 2`.

/// Affine map of a bucket value onto `[-1, 1]`. A single-bucket space maps
/// everything to 0.
pub fn normalize(value: f64, space_size: usize) -> f64 {
    let mean = (space_size as f64 - 1.0) / 2.0;
    if mean <= 0.0 {
        return 0.0;
    }
    (value - mean) / mean
}

/// Reward in `[0, 1]`: 1 for an exact guess, 0 for opposite extremes.
pub fn reward(observation: f64, action: f64, space_size: usize) -> f64 {
    let obs_norm = normalize(observation, space_size);
    let action_norm = normalize(action, space_size);
    (1.0 - (obs_norm - action_norm).abs() / 2.0).clamp(0.0, 1.0)
}
