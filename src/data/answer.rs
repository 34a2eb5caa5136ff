// ============================================================
// Layer 4 — Answer Sampler
// ============================================================
// Picks one hard QA target from a soft answer distribution.
//
//   None / {}           → -1 (no valid target, QA loss ignores it)
//   {X: w}              → X, without touching the RNG
//   {A: 3, B: 1, ...}   → one categorical draw, P(A) = 3/4 ...
//
// Drawing instead of taking the argmax is deliberate: across
// epochs the model sees every annotated answer in proportion
// to its weight, a sampling form of label smoothing.

use rand::distributions::{Distribution, WeightedError, WeightedIndex};
use rand::Rng;

use crate::domain::example::{AnswerId, LabelDistribution};

/// Answer id meaning "no QA target for this example"
pub const NO_ANSWER: AnswerId = -1;

/// Draw one answer id from a (possibly absent) soft label.
///
/// Fails only when the weights cannot form a distribution
/// (all zero, negative or non-finite).
pub fn sample_answer<R: Rng + ?Sized>(
    label: Option<&LabelDistribution>,
    rng:   &mut R,
) -> Result<AnswerId, WeightedError> {
    let Some(label) = label.filter(|l| !l.is_empty()) else {
        return Ok(NO_ANSWER);
    };

    if label.len() == 1 {
        return Ok(label.keys().next().copied().unwrap_or(NO_ANSWER));
    }

    let keys: Vec<AnswerId> = label.keys().copied().collect();
    let dist = WeightedIndex::new(label.values().copied())?;
    Ok(keys[dist.sample(rng)])
}

/// 1 for closed-form answers ("yes", "no", or a plain digit
/// string such as "7"), 0 for open-vocabulary or absent answers.
pub fn answer_type(answer: Option<&str>) -> u8 {
    match answer {
        Some("yes" | "no") => 1,
        Some(a) if !a.is_empty() && a.chars().all(|c| c.is_ascii_digit()) => 1,
        _ => 0,
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::ScriptedRng;
    use rand::{rngs::StdRng, SeedableRng};

    fn dist(pairs: &[(AnswerId, f32)]) -> LabelDistribution {
        pairs.iter().copied().collect()
    }

    #[test]
    fn test_missing_or_empty_label_gives_no_answer() {
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(sample_answer(None, &mut rng), Ok(-1));
        assert_eq!(sample_answer(Some(&dist(&[])), &mut rng), Ok(-1));
    }

    #[test]
    fn test_singleton_is_deterministic_and_spends_no_entropy() {
        let mut rng  = StdRng::seed_from_u64(5);
        let mut twin = StdRng::seed_from_u64(5);
        for _ in 0..10 {
            assert_eq!(sample_answer(Some(&dist(&[(42, 5.0)])), &mut rng), Ok(42));
        }
        // the RNG stream is untouched
        assert_eq!(rng.gen::<u64>(), twin.gen::<u64>());
    }

    #[test]
    fn test_categorical_draw_follows_weights() {
        let label = dist(&[(3, 3.0), (8, 1.0)]);
        let mut rng = StdRng::seed_from_u64(9595);
        let trials  = 10_000;
        let hits_a  = (0..trials)
            .filter(|_| sample_answer(Some(&label), &mut rng) == Ok(3))
            .count();
        let frac = hits_a as f64 / trials as f64;
        assert!((frac - 0.75).abs() < 0.03, "P(A) = {frac}");
    }

    #[test]
    fn test_draw_is_not_argmax() {
        // a draw near the top of [0, 1) lands on the lighter key
        let label   = dist(&[(3, 3.0), (8, 1.0)]);
        let mut rng = ScriptedRng::units(&[0.95]);
        assert_eq!(sample_answer(Some(&label), &mut rng), Ok(8));
    }

    #[test]
    fn test_all_zero_weights_are_rejected() {
        let label   = dist(&[(1, 0.0), (2, 0.0)]);
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(sample_answer(Some(&label), &mut rng), Err(WeightedError::AllWeightsZero));
    }

    #[test]
    fn test_answer_type() {
        assert_eq!(answer_type(Some("yes")), 1);
        assert_eq!(answer_type(Some("no")), 1);
        assert_eq!(answer_type(Some("7")), 1);
        assert_eq!(answer_type(Some("12")), 1);
        assert_eq!(answer_type(Some("red")), 0);
        assert_eq!(answer_type(Some("-3")), 0);
        assert_eq!(answer_type(Some("")), 0);
        assert_eq!(answer_type(None), 0);
    }
}
