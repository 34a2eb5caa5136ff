// ============================================================
// Layer 6 — Tokenizer Store
// ============================================================
// Loads (or builds) the HuggingFace tokenizer and wraps it as
// the pipeline's Vocabulary.
//
// Two ways to get a tokenizer:
//   1. An existing tokenizer.json (e.g. bert-base-uncased)
//   2. A word-level vocabulary built from the training sentences
//      and answers, written in HuggingFace JSON format
//
// Special tokens keep the BERT ids:
//   [PAD]=0  [UNK]=1  [CLS]=101  [SEP]=102  [MASK]=103
//
// Vocab enumerates its (id, token) pairs once, sorted by id, so
// that uniform random-token draws are reproducible under a seed.

use anyhow::{Context, Result};
use std::{collections::HashMap, path::PathBuf, str::FromStr};
use tokenizers::{
    normalizers::bert::BertNormalizer, pre_tokenizers::whitespace::Whitespace, NormalizedString,
    Normalizer, OffsetReferential, OffsetType, PreTokenizedString, PreTokenizer, Tokenizer,
};

use crate::domain::traits::{SpecialToken, Vocabulary};
use crate::error::{PretrainError, PretrainResult};

pub struct TokenizerStore {
    dir: PathBuf,
}

impl TokenizerStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn tokenizer_path(&self) -> PathBuf {
        self.dir.join("tokenizer.json")
    }

    /// Load an existing tokenizer or build a new one from texts
    pub fn load_or_build(&self, texts: &[String], vocab_size: usize) -> Result<Tokenizer> {
        if self.tokenizer_path().exists() {
            tracing::info!("Loading existing tokenizer from disk");
            self.load()
        } else {
            tracing::info!("Building new tokenizer (vocab_size={})", vocab_size);
            self.build_and_save(texts, vocab_size)
        }
    }

    /// Load a previously saved tokenizer from JSON file
    pub fn load(&self) -> Result<Tokenizer> {
        load_tokenizer_file(&self.tokenizer_path())
    }

    fn build_and_save(&self, texts: &[String], vocab_size: usize) -> Result<Tokenizer> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Cannot create '{}'", self.dir.display()))?;

        let tokenizer = build_word_level(texts, vocab_size)?;
        let path      = self.tokenizer_path();
        tokenizer
            .save(&path, true)
            .map_err(|e| anyhow::anyhow!("Cannot write tokenizer JSON to '{}': {e}", path.display()))?;

        tracing::info!("Tokenizer saved to '{}'", path.display());
        Ok(tokenizer)
    }
}

/// Load any HuggingFace tokenizer.json
pub fn load_tokenizer_file(path: &std::path::Path) -> Result<Tokenizer> {
    Tokenizer::from_file(path)
        .map_err(|e| anyhow::anyhow!("Cannot load tokenizer from '{}': {}", path.display(), e))
}

/// Build a word-level tokenizer in memory from raw texts
pub fn build_word_level(texts: &[String], vocab_size: usize) -> Result<Tokenizer> {
    let json = word_level_json(texts, vocab_size)?;
    Tokenizer::from_str(&json.to_string())
        .map_err(|e| anyhow::anyhow!("Cannot build word-level tokenizer: {e}"))
}

/// The pieces the built tokenizer will produce for `text`: BertNormalizer
/// (lowercase) then the Whitespace pre-tokenizer (`\w+|[^\w\s]+`).
fn pre_tokenize(text: &str) -> Result<Vec<String>> {
    let mut normalized = NormalizedString::from(text);
    BertNormalizer::new(true, true, None, true)
        .normalize(&mut normalized)
        .map_err(|e| anyhow::anyhow!("Cannot normalize '{text}': {e}"))?;

    let mut pretok = PreTokenizedString::from(normalized);
    Whitespace::default()
        .pre_tokenize(&mut pretok)
        .map_err(|e| anyhow::anyhow!("Cannot pre-tokenize '{text}': {e}"))?;

    Ok(pretok
        .get_splits(OffsetReferential::Original, OffsetType::Byte)
        .into_iter()
        .map(|(piece, _, _)| piece.to_string())
        .collect())
}

/// HuggingFace JSON for a lowercasing, whitespace-split word-level
/// tokenizer over the `vocab_size - 5` most frequent words.
fn word_level_json(texts: &[String], vocab_size: usize) -> Result<serde_json::Value> {
    // ── Step 1: Word frequencies ──────────────────────────────────────────────
    let mut freq: HashMap<String, usize> = HashMap::new();
    for text in texts {
        for word in pre_tokenize(text)? {
            *freq.entry(word).or_insert(0) += 1;
        }
    }

    // Frequency descending, then alphabetical so ties are deterministic
    let mut words: Vec<(String, usize)> = freq.into_iter().collect();
    words.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    words.truncate(vocab_size.saturating_sub(5));

    // ── Step 2: Vocab with BERT special ids ───────────────────────────────────
    let mut vocab = serde_json::json!({
        "[PAD]":  0,
        "[UNK]":  1,
        "[CLS]":  101,
        "[SEP]":  102,
        "[MASK]": 103,
    });
    let mut next_id = 104usize;
    for (word, _) in &words {
        if vocab.get(word).is_none() {
            vocab[word] = serde_json::json!(next_id);
            next_id += 1;
        }
    }

    // ── Step 3: Tokenizer JSON ────────────────────────────────────────────────
    Ok(serde_json::json!({
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [
            {"id": 0,   "content": "[PAD]",  "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
            {"id": 1,   "content": "[UNK]",  "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
            {"id": 101, "content": "[CLS]",  "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
            {"id": 102, "content": "[SEP]",  "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
            {"id": 103, "content": "[MASK]", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true}
        ],
        "normalizer": {
            "type": "BertNormalizer",
            "clean_text": true,
            "handle_chinese_chars": true,
            "strip_accents": null,
            "lowercase": true
        },
        "pre_tokenizer": {
            "type": "Whitespace"
        },
        "post_processor": null,
        "decoder": null,
        "model": {
            "type": "WordLevel",
            "vocab": vocab,
            "unk_token": "[UNK]"
        }
    }))
}

// ─── Vocab ────────────────────────────────────────────────────────────────────
/// A HuggingFace tokenizer exposed through the Vocabulary trait.
pub struct Vocab {
    tokenizer: Tokenizer,
    /// All tokens, sorted by id
    entries:   Vec<String>,
    mask_id:   u32,
    unk_id:    u32,
    cls_id:    u32,
    sep_id:    u32,
    /// Largest id in the vocabulary + 1 (ids are not contiguous)
    num_ids:   usize,
}

impl Vocab {
    /// Wrap a tokenizer. Fails if any of [MASK] [UNK] [CLS] [SEP] is missing.
    pub fn new(tokenizer: Tokenizer) -> Result<Self> {
        let id_of = |special: SpecialToken| {
            tokenizer.token_to_id(special.as_str()).with_context(|| {
                format!("Tokenizer has no '{}' token", special.as_str())
            })
        };
        let mask_id = id_of(SpecialToken::Mask)?;
        let unk_id  = id_of(SpecialToken::Unk)?;
        let cls_id  = id_of(SpecialToken::Cls)?;
        let sep_id  = id_of(SpecialToken::Sep)?;

        let mut pairs: Vec<(u32, String)> = tokenizer
            .get_vocab(true)
            .into_iter()
            .map(|(token, id)| (id, token))
            .collect();
        pairs.sort();
        let num_ids = pairs.last().map_or(0, |(id, _)| *id as usize + 1);
        let entries = pairs.into_iter().map(|(_, token)| token).collect();

        Ok(Self { tokenizer, entries, mask_id, unk_id, cls_id, sep_id, num_ids })
    }

    /// Size of an embedding table that can index every id
    pub fn num_ids(&self) -> usize {
        self.num_ids
    }

    pub fn id_to_token(&self, id: u32) -> Option<String> {
        self.tokenizer.id_to_token(id)
    }
}

impl Vocabulary for Vocab {
    fn tokenize(&self, text: &str) -> PretrainResult<Vec<String>> {
        let enc = self
            .tokenizer
            .encode(text, false)
            .map_err(|e| PretrainError::Tokenize(format!("'{text}': {e}")))?;
        Ok(enc.get_tokens().to_vec())
    }

    fn token_to_id(&self, token: &str) -> Option<u32> {
        self.tokenizer.token_to_id(token)
    }

    fn special_id(&self, special: SpecialToken) -> u32 {
        match special {
            SpecialToken::Mask => self.mask_id,
            SpecialToken::Unk  => self.unk_id,
            SpecialToken::Cls  => self.cls_id,
            SpecialToken::Sep  => self.sep_id,
        }
    }

    fn vocab_len(&self) -> usize {
        self.entries.len()
    }

    fn token_at(&self, index: usize) -> &str {
        &self.entries[index]
    }
}
