use crate::domain::example::RawExample;

/// An in-memory split of pre-training examples.
///
/// Examples stay raw: masking and answer sampling happen at batch
/// time, so every epoch sees a fresh corruption of the same data.
pub struct PretrainDataset {
    examples: Vec<RawExample>,
}

impl PretrainDataset {
    pub fn new(examples: Vec<RawExample>) -> Self { Self { examples } }

    /// Keep only the first `topk` examples (None keeps everything)
    pub fn truncated(mut examples: Vec<RawExample>, topk: Option<usize>) -> Self {
        if let Some(k) = topk {
            examples.truncate(k);
        }
        Self { examples }
    }

    pub fn len(&self) -> usize { self.examples.len() }

    pub fn is_empty(&self) -> bool { self.examples.is_empty() }

    pub fn example(&self, index: usize) -> &RawExample { &self.examples[index] }

    pub fn examples(&self) -> &[RawExample] { &self.examples }

    /// Every text the tokenizer may be asked to handle
    pub fn texts(&self) -> Vec<String> {
        self.examples
            .iter()
            .flat_map(|ex| {
                std::iter::once(&ex.sent)
                    .chain(ex.answer.as_ref())
                    .chain(ex.replace_sent.as_ref())
                    .chain(ex.replace_answer.as_ref())
            })
            .cloned()
            .collect()
    }
}
