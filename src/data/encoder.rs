// ============================================================
// Layer 4 — Sequence Encoder
// ============================================================
// Turns one tokenized text into a fixed-length EncodedChannel:
//
//   1. truncate to max_len - 2 tokens (room for [CLS] and [SEP])
//   2. apply the masking policy
//   3. frame: [CLS] tokens [SEP]  → ids
//             -1    labels  -1    → lm labels
//   4. right-pad ids / mask / segments with 0, labels with -1
//
// Output arrays are exactly max_len long. A different length is a
// bug in this function, not bad input, so it is asserted. A framed
// sequence longer than max_len (max_len < 2) is never cut short.

use rand::Rng;

use crate::data::masking::mask_tokens;
use crate::domain::features::{EncodedChannel, IGNORE_LABEL};
use crate::domain::traits::{SpecialToken, Vocabulary};

pub fn encode<V, R>(
    tokens:    &[String],
    max_len:   usize,
    mask_rate: f64,
    vocab:     &V,
    rng:       &mut R,
) -> EncodedChannel
where
    V: Vocabulary,
    R: Rng + ?Sized,
{
    // ── Step 1: Truncate (keep prefix) ────────────────────────────────────────
    let keep   = tokens.len().min(max_len.saturating_sub(2));
    let tokens = &tokens[..keep];

    // ── Step 2: Mask ──────────────────────────────────────────────────────────
    let (masked, labels) = mask_tokens(tokens, mask_rate, vocab, rng);

    // ── Step 3: Frame with [CLS] ... [SEP] ────────────────────────────────────
    let mut framed = Vec::with_capacity(masked.len() + 2);
    framed.push(SpecialToken::Cls.as_str().to_string());
    framed.extend(masked);
    framed.push(SpecialToken::Sep.as_str().to_string());

    let mut input_ids = vocab.convert_tokens_to_ids(&framed);

    let mut lm_label_ids = Vec::with_capacity(max_len);
    lm_label_ids.push(IGNORE_LABEL);
    lm_label_ids.extend(labels);
    lm_label_ids.push(IGNORE_LABEL);

    let mut input_mask  = vec![1u32; input_ids.len()];
    let mut segment_ids = vec![0u32; input_ids.len()];

    // ── Step 4: Zero-pad up to max_len ────────────────────────────────────────
    assert!(
        input_ids.len() <= max_len,
        "framed sequence of {} ids exceeds max_len {}",
        input_ids.len(),
        max_len
    );
    input_ids.resize(max_len, 0);
    input_mask.resize(max_len, 0);
    segment_ids.resize(max_len, 0);
    lm_label_ids.resize(max_len, IGNORE_LABEL);

    assert_eq!(input_ids.len(),    max_len);
    assert_eq!(input_mask.len(),   max_len);
    assert_eq!(segment_ids.len(),  max_len);
    assert_eq!(lm_label_ids.len(), max_len);

    EncodedChannel { input_ids, input_mask, segment_ids, lm_label_ids }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::tokenizer_store::fixtures::vocab;
    use rand::{rngs::StdRng, SeedableRng};

    fn toks(s: &str) -> Vec<String> {
        s.split_whitespace().map(str::to_string).collect()
    }

    #[test]
    fn test_frames_and_pads_without_masking() {
        let v   = vocab();
        let id  = |t: &str| v.token_to_id(t).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let ch  = encode(&toks("a dog runs"), 8, 0.0, &v, &mut rng);

        assert_eq!(ch.input_ids, vec![101, id("a"), id("dog"), id("runs"), 102, 0, 0, 0]);
        assert_eq!(ch.input_mask, vec![1, 1, 1, 1, 1, 0, 0, 0]);
        assert_eq!(ch.segment_ids, vec![0; 8]);
        assert_eq!(ch.lm_label_ids, vec![-1; 8]);
    }

    #[test]
    fn test_truncates_to_leave_room_for_cls_sep() {
        let v = vocab();
        let mut rng = StdRng::seed_from_u64(0);
        let ch = encode(&toks("what color is the cat"), 4, 0.0, &v, &mut rng);
        assert_eq!(
            ch.input_ids,
            vec![101, v.token_to_id("what").unwrap(), v.token_to_id("color").unwrap(), 102]
        );
        assert_eq!(ch.input_mask, vec![1; 4]);
    }

    #[test]
    fn test_output_length_is_always_max_len() {
        let v = vocab();
        let words = toks("what color is the cat a dog runs yes no red");
        for max_len in 3..16 {
            for n in 0..words.len() {
                let mut rng = StdRng::seed_from_u64((max_len * 100 + n) as u64);
                let ch = encode(&words[..n], max_len, 0.5, &v, &mut rng);
                assert_eq!(ch.input_ids.len(), max_len);
                assert_eq!(ch.input_mask.len(), max_len);
                assert_eq!(ch.segment_ids.len(), max_len);
                assert_eq!(ch.lm_label_ids.len(), max_len);
            }
        }
    }

    #[test]
    fn test_cls_sep_and_padding_are_never_targets() {
        let v = vocab();
        let mut rng = StdRng::seed_from_u64(11);
        // rate 0.99 selects nearly every real token
        let ch = encode(&toks("a dog runs"), 8, 0.99, &v, &mut rng);
        assert_eq!(ch.lm_label_ids[0], -1);
        assert_eq!(ch.lm_label_ids[4], -1);
        assert!(ch.lm_label_ids[5..].iter().all(|&l| l == -1));
        // mask still covers masked tokens
        assert_eq!(&ch.input_mask[..5], &[1, 1, 1, 1, 1]);
    }

    #[test]
    fn test_empty_text_is_just_cls_sep() {
        let v = vocab();
        let mut rng = StdRng::seed_from_u64(0);
        let ch = encode(&[], 5, 0.15, &v, &mut rng);
        assert_eq!(ch.input_ids, vec![101, 102, 0, 0, 0]);
        assert_eq!(ch.input_mask, vec![1, 1, 0, 0, 0]);
    }

    #[test]
    #[should_panic(expected = "exceeds max_len")]
    fn test_max_len_too_short_for_framing_panics() {
        let v = vocab();
        let mut rng = StdRng::seed_from_u64(0);
        encode(&toks("a dog"), 1, 0.0, &v, &mut rng);
    }
}
