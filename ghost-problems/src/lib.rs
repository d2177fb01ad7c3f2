pub mod fair_regression;
pub mod noisy_quadratic;

use rand::{rngs::SmallRng, SeedableRng};

/// Identifiers accepted as `problem_id` in run settings.
pub const PROBLEM_IDS: [&str; 2] = ["noisy_quadratic", "fair_regression"];

/// Generator for one named random stream of an instance. Instance data and
/// oracle noise come from separate streams so that neither shifts the other.
pub(crate) fn stream_rng(seed: &[u8; 32], label: &str) -> SmallRng {
    SmallRng::from_seed(ghost_utils::derive_seed(seed, label))
}

/// Draws `amount` distinct entries of `pool` (all of them when the pool is
/// smaller) by a partial Fisher-Yates shuffle.
pub(crate) fn sample_without_replacement<R: rand::Rng>(
    rng: &mut R,
    pool: &[usize],
    amount: usize,
) -> Vec<usize> {
    let mut selected = pool.to_vec();
    let amount = amount.min(selected.len());
    for j in 0..amount {
        let idx = rng.gen_range(j..selected.len());
        selected.swap(j, idx);
    }
    selected.truncate(amount);
    selected
}
