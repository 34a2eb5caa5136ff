// ============================================================
// Layer 4 — Batch Sampler
// ============================================================
// Decides which example indices make up each batch.
//
//   Training:   Fisher-Yates shuffle every epoch with the run's
//               RNG, then cut into batches; a short final batch
//               is dropped so every step sees batch_size examples.
//   Evaluation: indices in order, the short final batch kept, so
//               the validation loss covers every example.
//
// Shuffling through the run RNG (not thread_rng) keeps the whole
// epoch reproducible from the seed.

use rand::{seq::SliceRandom, Rng};

/// Shuffled batches of indices into a dataset of length `len`,
/// dropping the incomplete tail.
pub fn shuffled_batches<R: Rng + ?Sized>(
    len:        usize,
    batch_size: usize,
    rng:        &mut R,
) -> Vec<Vec<usize>> {
    let mut indices: Vec<usize> = (0..len).collect();
    indices.shuffle(rng);

    let batches: Vec<Vec<usize>> = indices
        .chunks_exact(batch_size.max(1))
        .map(<[usize]>::to_vec)
        .collect();

    tracing::debug!(
        "Epoch plan: {} batches of {} ({} examples dropped)",
        batches.len(),
        batch_size,
        len - batches.len() * batch_size.max(1),
    );
    batches
}

/// Batches of indices in dataset order, keeping the incomplete tail.
pub fn sequential_batches(len: usize, batch_size: usize) -> Vec<Vec<usize>> {
    let indices: Vec<usize> = (0..len).collect();
    indices.chunks(batch_size.max(1)).map(<[usize]>::to_vec).collect()
}

/// Number of optimiser steps per training epoch
pub fn train_batches_per_epoch(len: usize, batch_size: usize) -> usize {
    len / batch_size.max(1)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_training_drops_incomplete_batch() {
        let mut rng = StdRng::seed_from_u64(0);
        let batches = shuffled_batches(10, 4, &mut rng);
        assert_eq!(batches.len(), 2);
        assert!(batches.iter().all(|b| b.len() == 4));
        assert_eq!(batches.len(), train_batches_per_epoch(10, 4));
    }

    #[test]
    fn test_training_batches_hold_distinct_indices() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut seen: Vec<usize> = shuffled_batches(12, 3, &mut rng).concat();
        seen.sort();
        assert_eq!(seen, (0..12).collect::<Vec<_>>());
    }

    #[test]
    fn test_shuffle_depends_on_seed_only() {
        let a = shuffled_batches(50, 5, &mut StdRng::seed_from_u64(7));
        let b = shuffled_batches(50, 5, &mut StdRng::seed_from_u64(7));
        let c = shuffled_batches(50, 5, &mut StdRng::seed_from_u64(8));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_evaluation_keeps_order_and_tail() {
        let batches = sequential_batches(5, 2);
        assert_eq!(batches, vec![vec![0, 1], vec![2, 3], vec![4]]);
    }

    #[test]
    fn test_empty_dataset() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(shuffled_batches(0, 4, &mut rng).is_empty());
        assert!(sequential_batches(0, 4).is_empty());
    }
}
