// ============================================================
// Layer 4 — Feature Pool
// ============================================================
// Corpus-wide collection of region feature vectors that the
// visual masking policy draws replacement vectors from.
//
// A draw picks a random image, then a random box of that image
// (two uniform draws), so images with fewer boxes are not
// under-represented.

use rand::Rng;

use crate::domain::example::RawExample;
use crate::domain::traits::FeatureSource;
use crate::error::{PretrainError, PretrainResult};

pub struct FeaturePool {
    /// images[i][j] = feature vector of box j in image i
    images: Vec<Vec<Vec<f32>>>,
    dim:    usize,
}

impl FeaturePool {
    /// Build a pool from per-image feature lists.
    ///
    /// Every image needs at least one box and every vector the same
    /// dimension; an empty pool cannot serve draws and is rejected.
    pub fn new(images: Vec<Vec<Vec<f32>>>) -> PretrainResult<Self> {
        let images: Vec<_> = images.into_iter().filter(|boxes| !boxes.is_empty()).collect();
        let dim = images
            .first()
            .and_then(|boxes| boxes.first())
            .map(Vec::len)
            .ok_or(PretrainError::EmptyFeaturePool)?;

        for boxes in &images {
            if let Some(bad) = boxes.iter().find(|f| f.len() != dim) {
                return Err(PretrainError::ShapeMismatch {
                    what:     "feature pool vector".to_string(),
                    expected: dim,
                    found:    bad.len(),
                });
            }
        }

        Ok(Self { images, dim })
    }

    /// Pool over the visual features of a set of training examples
    pub fn from_examples(examples: &[RawExample]) -> PretrainResult<Self> {
        let pool = Self::new(examples.iter().map(|ex| ex.visual.feats.clone()).collect())?;
        tracing::debug!(
            "Feature pool: {} images, {} boxes, dim={}",
            pool.num_images(),
            pool.num_vectors(),
            pool.dim()
        );
        Ok(pool)
    }

    pub fn num_images(&self) -> usize {
        self.images.len()
    }

    pub fn num_vectors(&self) -> usize {
        self.images.iter().map(Vec::len).sum()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }
}

impl FeatureSource for FeaturePool {
    fn random_feat<R: Rng + ?Sized>(&self, rng: &mut R) -> &[f32] {
        let boxes = &self.images[rng.gen_range(0..self.images.len())];
        &boxes[rng.gen_range(0..boxes.len())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::example::fixtures::example;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_empty_pool_is_rejected() {
        assert_eq!(FeaturePool::new(vec![]).err(), Some(PretrainError::EmptyFeaturePool));
        assert_eq!(FeaturePool::new(vec![vec![]]).err(), Some(PretrainError::EmptyFeaturePool));
    }

    #[test]
    fn test_mixed_dimensions_are_rejected() {
        let images = vec![vec![vec![1.0, 2.0]], vec![vec![1.0]]];
        assert!(matches!(
            FeaturePool::new(images),
            Err(PretrainError::ShapeMismatch { expected: 2, found: 1, .. })
        ));
    }

    #[test]
    fn test_draws_come_from_the_pool() {
        let examples = vec![example("a", 3, 4), example("b", 2, 4)];
        let pool = FeaturePool::from_examples(&examples).unwrap();
        assert_eq!(pool.num_images(), 2);
        assert_eq!(pool.num_vectors(), 5);

        let all: Vec<&Vec<f32>> = examples.iter().flat_map(|e| e.visual.feats.iter()).collect();
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..20 {
            let f = pool.random_feat(&mut rng);
            assert!(all.iter().any(|v| v.as_slice() == f));
        }
    }
}
