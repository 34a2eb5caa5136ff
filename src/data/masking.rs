// ============================================================
// Layer 4 — Masking Policy
// ============================================================
// BERT-style stochastic corruption, for word tokens and for
// visual region features alike.
//
// For every position draw p ~ U[0, 1). If p < rate the position
// is selected and p / rate (again uniform in [0, 1)) picks the
// sub-case:
//
//   p / rate < 0.8         → replace ([MASK] / zero vector)
//   0.8 ≤ p / rate < 0.9   → random (vocab token / pool vector)
//   p / rate ≥ 0.9         → keep unchanged
//
// Selected positions always become prediction targets, whatever
// the sub-case. Unselected positions are ignored by the loss.
//
// Draw order is one uniform per position, plus one extra draw
// (or two, for the feature pool) whenever the random sub-case
// fires. Seeding the RNG fixes the whole mask.

use rand::Rng;

use crate::domain::features::IGNORE_LABEL;
use crate::domain::traits::{FeatureSource, SpecialToken, Vocabulary};
use crate::error::{PretrainError, PretrainResult};

/// What happens to a selected position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Corruption {
    Replace,
    Random,
    Keep,
}

/// Draw one uniform and decide whether (and how) to corrupt.
pub fn draw_corruption<R: Rng + ?Sized>(rate: f64, rng: &mut R) -> Option<Corruption> {
    let prob: f64 = rng.gen();
    if prob >= rate {
        return None;
    }
    let prob = prob / rate;
    Some(if prob < 0.8 {
        Corruption::Replace
    } else if prob < 0.9 {
        Corruption::Random
    } else {
        Corruption::Keep
    })
}

/// Mask word tokens for the masked-LM task.
///
/// Returns the corrupted tokens and one label per token: the
/// original token's id ([UNK] id if unknown) where selected,
/// IGNORE_LABEL elsewhere.
pub fn mask_tokens<V, R>(
    tokens:    &[String],
    mask_rate: f64,
    vocab:     &V,
    rng:       &mut R,
) -> (Vec<String>, Vec<i64>)
where
    V: Vocabulary,
    R: Rng + ?Sized,
{
    let unk_id = vocab.special_id(SpecialToken::Unk);
    let mut masked = Vec::with_capacity(tokens.len());
    let mut labels = Vec::with_capacity(tokens.len());

    for token in tokens {
        match draw_corruption(mask_rate, rng) {
            None => {
                masked.push(token.clone());
                labels.push(IGNORE_LABEL);
            }
            Some(corruption) => {
                let replacement = match corruption {
                    Corruption::Replace => SpecialToken::Mask.as_str().to_string(),
                    Corruption::Random  => vocab.random_token(rng).to_string(),
                    Corruption::Keep    => token.clone(),
                };
                masked.push(replacement);
                labels.push(i64::from(vocab.token_to_id(token).unwrap_or(unk_id)));
            }
        }
    }

    (masked, labels)
}

/// Mask visual region features for the object-prediction tasks.
///
/// Returns the corrupted features and a per-box flag that is 1.0
/// exactly where the box was selected.
pub fn mask_feats<P, R>(
    feats:     &[Vec<f32>],
    mask_rate: f64,
    pool:      &P,
    rng:       &mut R,
) -> PretrainResult<(Vec<Vec<f32>>, Vec<f32>)>
where
    P: FeatureSource,
    R: Rng + ?Sized,
{
    let mut masked   = feats.to_vec();
    let mut feat_mask = vec![0.0f32; feats.len()];

    for (i, slot) in masked.iter_mut().enumerate() {
        let Some(corruption) = draw_corruption(mask_rate, rng) else {
            continue;
        };
        match corruption {
            Corruption::Replace => slot.iter_mut().for_each(|x| *x = 0.0),
            Corruption::Random  => {
                let replacement = pool.random_feat(rng);
                if replacement.len() != slot.len() {
                    return Err(PretrainError::ShapeMismatch {
                        what:     "feature pool vector".to_string(),
                        expected: slot.len(),
                        found:    replacement.len(),
                    });
                }
                slot.copy_from_slice(replacement);
            }
            Corruption::Keep => {}
        }
        feat_mask[i] = 1.0;
    }

    Ok((masked, feat_mask))
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::feature_pool::FeaturePool;
    use crate::infra::tokenizer_store::fixtures::vocab;
    use crate::testutil::ScriptedRng;
    use rand::{rngs::StdRng, SeedableRng};

    fn toks(s: &str) -> Vec<String> {
        s.split_whitespace().map(str::to_string).collect()
    }

    #[test]
    fn test_corruption_sub_cases() {
        // rate 0.5: p=0.2 → 0.4 replace, p=0.425 → 0.85 random,
        // p=0.475 → 0.95 keep, p=0.7 → not selected
        let mut rng = ScriptedRng::units(&[0.2, 0.425, 0.475, 0.7]);
        assert_eq!(draw_corruption(0.5, &mut rng), Some(Corruption::Replace));
        assert_eq!(draw_corruption(0.5, &mut rng), Some(Corruption::Random));
        assert_eq!(draw_corruption(0.5, &mut rng), Some(Corruption::Keep));
        assert_eq!(draw_corruption(0.5, &mut rng), None);
    }

    #[test]
    fn test_zero_rate_never_selects() {
        let v = vocab();
        let mut rng = StdRng::seed_from_u64(0);
        let tokens = toks("a dog runs the cat");
        let (masked, labels) = mask_tokens(&tokens, 0.0, &v, &mut rng);
        assert_eq!(masked, tokens);
        assert!(labels.iter().all(|&l| l == IGNORE_LABEL));
    }

    #[test]
    fn test_replace_case_uses_mask_token_and_original_label() {
        let v = vocab();
        let mut rng = ScriptedRng::units(&[0.9, 0.1, 0.9]);
        let (masked, labels) = mask_tokens(&toks("a dog runs"), 0.5, &v, &mut rng);
        assert_eq!(masked, vec!["a", "[MASK]", "runs"]);
        assert_eq!(labels, vec![-1, i64::from(v.token_to_id("dog").unwrap()), -1]);
    }

    #[test]
    fn test_keep_case_leaves_text_but_sets_label() {
        let v = vocab();
        let mut rng = ScriptedRng::units(&[0.475]);
        let (masked, labels) = mask_tokens(&toks("dog"), 0.5, &v, &mut rng);
        assert_eq!(masked, vec!["dog"]);
        assert_eq!(labels, vec![i64::from(v.token_to_id("dog").unwrap())]);
    }

    #[test]
    fn test_random_case_draws_a_vocab_token() {
        let v = vocab();
        let mut rng = ScriptedRng::units(&[0.425]);
        let (masked, labels) = mask_tokens(&toks("dog"), 0.5, &v, &mut rng);
        assert!(v.contains(&masked[0]));
        assert_eq!(labels, vec![i64::from(v.token_to_id("dog").unwrap())]);
    }

    #[test]
    fn test_unknown_token_label_falls_back_to_unk() {
        let v = vocab();
        let mut rng = ScriptedRng::units(&[0.1]);
        let (_, labels) = mask_tokens(&toks("zebra"), 0.5, &v, &mut rng);
        assert_eq!(labels, vec![1]);
    }

    #[test]
    fn test_unselected_tokens_unchanged_for_any_seed() {
        let v = vocab();
        let tokens = toks("what color is the cat a dog runs");
        for seed in 0..50 {
            let mut rng = StdRng::seed_from_u64(seed);
            let (masked, labels) = mask_tokens(&tokens, 0.3, &v, &mut rng);
            for (i, label) in labels.iter().enumerate() {
                if *label == IGNORE_LABEL {
                    assert_eq!(masked[i], tokens[i]);
                } else {
                    assert_eq!(*label, i64::from(v.token_to_id(&tokens[i]).unwrap()));
                }
            }
        }
    }

    #[test]
    fn test_same_seed_same_mask() {
        let v = vocab();
        let tokens = toks("what color is the cat a dog runs");
        let a = mask_tokens(&tokens, 0.5, &v, &mut StdRng::seed_from_u64(7));
        let b = mask_tokens(&tokens, 0.5, &v, &mut StdRng::seed_from_u64(7));
        assert_eq!(a, b);
    }

    #[test]
    fn test_feature_sub_cases_and_mask_flags() {
        let pool  = FeaturePool::new(vec![vec![vec![9.0, 9.0]]]).unwrap();
        let feats = vec![vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0], vec![7.0, 8.0]];
        // box0 zeroed, box1 swapped (two pool draws follow), box2 kept, box3 untouched
        let mut rng = ScriptedRng::units(&[0.2, 0.425, 0.0, 0.0, 0.475, 0.7]);
        let (masked, mask) = mask_feats(&feats, 0.5, &pool, &mut rng).unwrap();
        assert_eq!(masked[0], vec![0.0, 0.0]);
        assert_eq!(masked[1], vec![9.0, 9.0]);
        assert_eq!(masked[2], vec![5.0, 6.0]);
        assert_eq!(masked[3], vec![7.0, 8.0]);
        assert_eq!(mask, vec![1.0, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn test_pool_dimension_mismatch_is_reported() {
        let pool  = FeaturePool::new(vec![vec![vec![9.0, 9.0, 9.0]]]).unwrap();
        let feats = vec![vec![1.0, 2.0]];
        let mut rng = ScriptedRng::units(&[0.425]);
        let err = mask_feats(&feats, 0.5, &pool, &mut rng).unwrap_err();
        assert!(matches!(err, PretrainError::ShapeMismatch { expected: 2, found: 3, .. }));
    }
}
