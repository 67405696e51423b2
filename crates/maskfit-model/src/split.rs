//! Seeded train/validation index splitting.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Row indices assigned to each side of a split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub validation: Vec<usize>,
}

/// Random split with a fixed seed. Fewer than two rows yields an empty
/// validation side; otherwise both sides hold at least one row.
#[must_use]
pub fn split(n: usize, validation_fraction: f64, seed: u64) -> SplitIndices {
    if n < 2 {
        return SplitIndices { train: (0..n).collect(), validation: Vec::new() };
    }
    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(&mut StdRng::seed_from_u64(seed));
    let validation_len =
        ((n as f64 * validation_fraction).round() as usize).clamp(1, n - 1);
    let mut validation = indices.split_off(n - validation_len);
    indices.sort_unstable();
    validation.sort_unstable();
    SplitIndices { train: indices, validation }
}

/// Class-stratified split: each class contributes its own fraction to the
/// validation side, so rare outcomes stay represented on both sides.
/// Singleton classes stay entirely in training.
#[must_use]
pub fn stratified_split(labels: &[f64], validation_fraction: f64, seed: u64) -> SplitIndices {
    let n = labels.len();
    if n < 2 {
        return SplitIndices { train: (0..n).collect(), validation: Vec::new() };
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut positives: Vec<usize> =
        (0..n).filter(|&i| labels[i] > 0.5).collect();
    let mut negatives: Vec<usize> =
        (0..n).filter(|&i| labels[i] <= 0.5).collect();
    positives.shuffle(&mut rng);
    negatives.shuffle(&mut rng);

    fn take_validation(group: &mut Vec<usize>, fraction: f64) -> Vec<usize> {
        if group.len() < 2 {
            return Vec::new();
        }
        let len = ((group.len() as f64 * fraction).round() as usize)
            .clamp(1, group.len() - 1);
        group.split_off(group.len() - len)
    }

    let mut validation = take_validation(&mut positives, validation_fraction);
    validation.extend(take_validation(&mut negatives, validation_fraction));
    let mut train = positives;
    train.extend(negatives);
    train.sort_unstable();
    validation.sort_unstable();
    SplitIndices { train, validation }
}
