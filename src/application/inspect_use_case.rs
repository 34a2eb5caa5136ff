// ============================================================
// Layer 2 — InspectUseCase
// ============================================================
// Debugging aid for the feature pipeline: assembles the first N
// training examples exactly as an epoch would (same config, same
// seeded RNG stream) and turns the ids back into tokens.
//
// The CLI layer prints the result; nothing here writes to stdout.

use anyhow::Result;
use rand::{rngs::StdRng, SeedableRng};

use crate::application::pretrain_use_case::{PretrainConfig, PretrainUseCase};
use crate::data::{answer_table::AnswerTable, assembler::ExampleAssembler};
use crate::domain::features::{EncodedChannel, FeatureBundle, IGNORE_LABEL};
use crate::infra::tokenizer_store::Vocab;

/// One text channel rendered as tokens
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelView {
    pub name:      &'static str,
    /// Input tokens up to (excluding) padding
    pub tokens:    Vec<String>,
    /// Target token at each masked position, "-" elsewhere
    pub lm_labels: Vec<String>,
    pub masked:    usize,
}

/// One assembled example as a human would read it
#[derive(Debug, Clone, PartialEq)]
pub struct ExampleView {
    pub uid:          String,
    pub channels:     Vec<ChannelView>,
    pub masked_boxes: usize,
    pub num_boxes:    usize,
    pub is_matched:   bool,
    pub ans_matched:  bool,
    /// Sampled answers; None where the id is -1
    pub ans:          Option<String>,
    pub replace_ans:  Option<String>,
    pub ans_type:     u8,
    pub ans_rps_type: u8,
}

pub struct InspectUseCase {
    pretrain: PretrainUseCase,
    count:    usize,
}

impl InspectUseCase {
    pub fn new(config: PretrainConfig, count: usize) -> Self {
        Self { pretrain: PretrainUseCase::new(config), count }
    }

    pub fn execute(&self) -> Result<Vec<ExampleView>> {
        let cfg = self.pretrain.config();
        let run = self.pretrain.prepare()?;

        let assembler = ExampleAssembler::new(cfg.assembler_config(), &run.vocab, &run.pool);
        let mut rng   = StdRng::seed_from_u64(cfg.seed);
        let take      = self.count.min(run.train.len());
        let bundles   = assembler.assemble_batch(run.train.examples()[..take].iter(), &mut rng)?;

        Ok(bundles
            .iter()
            .map(|b| render(b, &run.vocab, &run.answers))
            .collect())
    }
}

fn render(bundle: &FeatureBundle, vocab: &Vocab, answers: &AnswerTable) -> ExampleView {
    let c = &bundle.channels;
    let channels = [
        ("sent",         &c.primary),
        ("replace_sent", &c.replaced_sent),
        ("answer",       &c.answer),
        ("replace_ans",  &c.replaced_answer),
    ]
    .into_iter()
    .map(|(name, channel)| render_channel(name, channel, vocab))
    .collect();

    ExampleView {
        uid:          bundle.uid.clone(),
        channels,
        masked_boxes: bundle.feat_mask.iter().filter(|&&m| m > 0.0).count(),
        num_boxes:    bundle.num_boxes(),
        is_matched:   bundle.is_matched,
        ans_matched:  bundle.ans_matched,
        ans:          answers.id2ans(bundle.ans).map(str::to_string),
        replace_ans:  answers.id2ans(bundle.replace_ans).map(str::to_string),
        ans_type:     bundle.ans_type,
        ans_rps_type: bundle.ans_rps_type,
    }
}

fn render_channel(name: &'static str, channel: &EncodedChannel, vocab: &Vocab) -> ChannelView {
    let token = |id: u32| vocab.id_to_token(id).unwrap_or_else(|| format!("<{id}>"));
    let real  = channel.input_mask.iter().take_while(|&&m| m == 1).count();

    ChannelView {
        name,
        tokens: channel.input_ids[..real].iter().map(|&id| token(id)).collect(),
        lm_labels: channel.lm_label_ids[..real]
            .iter()
            .map(|&l| if l == IGNORE_LABEL { "-".to_string() } else { token(l as u32) })
            .collect(),
        masked: channel.num_targets(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::pretrain_use_case::fixtures::config_in;
    use crate::domain::traits::Vocabulary;
    use crate::infra::tokenizer_store::fixtures::vocab;

    #[test]
    fn test_channel_renders_tokens_and_masked_targets() {
        let v = vocab();
        let id = |t: &str| v.token_to_id(t).unwrap();
        let channel = EncodedChannel {
            input_ids:    vec![id("[CLS]"), id("a"), id("[MASK]"), id("[SEP]"), 0, 0],
            input_mask:   vec![1, 1, 1, 1, 0, 0],
            segment_ids:  vec![0; 6],
            lm_label_ids: vec![-1, -1, id("dog") as i64, -1, -1, -1],
        };
        let view = render_channel("sent", &channel, &v);
        assert_eq!(view.tokens, vec!["[CLS]", "a", "[MASK]", "[SEP]"]);
        assert_eq!(view.lm_labels, vec!["-", "-", "dog", "-"]);
        assert_eq!(view.masked, 1);
    }

    #[test]
    fn test_inspect_renders_first_examples() {
        let dir   = tempfile::tempdir().unwrap();
        let views = InspectUseCase::new(config_in(dir.path()), 2).execute().unwrap();

        assert_eq!(views.len(), 2);
        assert_eq!(views[0].uid, "t0");
        assert_eq!(views[0].channels.len(), 4);
        assert_eq!(views[0].num_boxes, 2);
        for ch in &views[0].channels {
            assert_eq!(ch.tokens.first().map(String::as_str), Some("[CLS]"));
            assert_eq!(ch.tokens.last().map(String::as_str), Some("[SEP]"));
            assert_eq!(ch.tokens.len(), ch.lm_labels.len());
        }
        // single-answer labels are sampled without randomness
        assert_eq!(views[0].ans.as_deref(), Some("red"));
        assert_eq!(views[1].ans.as_deref(), Some("yes"));
        assert_eq!(views[1].ans_type, 1);
    }

    #[test]
    fn test_count_beyond_dataset_is_capped() {
        let dir   = tempfile::tempdir().unwrap();
        let views = InspectUseCase::new(config_in(dir.path()), 50).execute().unwrap();
        assert_eq!(views.len(), 3);
    }
}
