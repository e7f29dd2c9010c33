//! Model-free backend for running the server and its tests without weights

use super::{ChatCodec, InferenceError, TokenOracle};

const STUB_WORDS: &[&str] = &[
    " Edinburgh", " is", " the", " capital", " of", " Scotland", ",", " and", " its", " castle",
    " sits", " on", " an", " old", " volcanic", " rock", " above", " town", ".", " Leith",
    " lies", " north", " by", " sea", " with", " a", " busy", " harbour", " where", " ships",
    " once", " came", " in", " from", " far", " away", " The", " Royal", " Mile", " runs",
    " down", " to", " Holyrood", " Arthur", "'s", " Seat", " offers", " fine", " views", " city",
];

/// Word-level codec over a fixed vocabulary.
///
/// Id 0 is the end-of-turn marker; every other id maps to one word.
/// Prompt words outside the vocabulary are hashed onto it, so encoding is
/// lossy but deterministic.
pub struct StubCodec {
    vocab: Vec<String>,
    end_marker: String,
}

impl StubCodec {
    pub fn new(end_marker: &str) -> Self {
        Self::with_vocab(STUB_WORDS.iter().map(|w| w.to_string()).collect(), end_marker)
    }

    /// `words` become ids `1..=words.len()`.
    pub fn with_vocab(words: Vec<String>, end_marker: &str) -> Self {
        let mut vocab = Vec::with_capacity(words.len() + 1);
        vocab.push(end_marker.to_string());
        vocab.extend(words);
        Self {
            vocab,
            end_marker: end_marker.to_string(),
        }
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab.len()
    }

    pub fn end_token_id(&self) -> u32 {
        0
    }

    pub fn token_id(&self, word: &str) -> Option<u32> {
        self.vocab.iter().position(|w| w == word).map(|i| i as u32)
    }

    fn hash_word(&self, word: &str) -> u32 {
        // FNV-1a
        let hash = word
            .bytes()
            .fold(0xcbf2_9ce4_8422_2325u64, |h, b| (h ^ b as u64).wrapping_mul(0x0100_0000_01b3));
        let words = (self.vocab.len() - 1).max(1) as u64;
        1 + (hash % words) as u32
    }
}

impl ChatCodec for StubCodec {
    fn encode_chat(&self, system_prompt: &str, user_text: &str) -> Result<Vec<u32>, InferenceError> {
        let ids = system_prompt
            .split_whitespace()
            .chain(user_text.split_whitespace())
            .map(|word| {
                let spaced = format!(" {word}");
                self.token_id(&spaced)
                    .filter(|&id| id != self.end_token_id())
                    .unwrap_or_else(|| self.hash_word(word))
            })
            .collect();
        Ok(ids)
    }

    fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> Result<String, InferenceError> {
        let mut text = String::new();
        for &id in ids {
            if skip_special_tokens && id == self.end_token_id() {
                continue;
            }
            let word = self
                .vocab
                .get(id as usize)
                .ok_or_else(|| InferenceError::Tokenizer(format!("unknown token id {id}")))?;
            text.push_str(word);
        }
        Ok(text)
    }

    fn detect_end_marker(&self, text: &str) -> bool {
        text.contains(&self.end_marker)
    }
}

/// Deterministic oracle over the stub vocabulary.
///
/// The favoured token depends on the last token and the sequence length.
/// Every seventh position is "uncertain" (flat top-5) so the branching path
/// is exercised; the end marker wins once the sequence passes `end_after`.
pub struct StubOracle {
    vocab_size: usize,
    end_token: u32,
    end_after: usize,
}

impl StubOracle {
    pub fn new(vocab_size: usize, end_token: u32) -> Self {
        Self {
            vocab_size,
            end_token,
            end_after: 96,
        }
    }

    pub fn with_end_after(mut self, end_after: usize) -> Self {
        self.end_after = end_after;
        self
    }
}

impl TokenOracle for StubOracle {
    fn next_token_distribution(&self, tokens: &[u32]) -> Result<Vec<f32>, InferenceError> {
        if self.vocab_size < 2 {
            return Err(InferenceError::EmptyDistribution);
        }

        let mut probs = vec![0.0f32; self.vocab_size];
        if tokens.len() >= self.end_after {
            probs[self.end_token as usize] = 1.0;
            return Ok(probs);
        }

        let words = self.vocab_size - 1;
        let last = tokens.last().copied().unwrap_or(0) as usize;
        let favoured = 1 + (last * 31 + tokens.len() * 7) % words;

        if tokens.len() % 7 == 0 {
            // Flat head: top-1 well below the default threshold.
            for offset in 0..5.min(words) {
                let id = 1 + (favoured - 1 + offset * 3) % words;
                probs[id] += 0.15 - offset as f32 * 0.01;
            }
        } else {
            probs[favoured] = 0.85;
        }

        let assigned: f32 = probs.iter().sum();
        let rest = (1.0 - assigned) / self.vocab_size as f32;
        probs.iter_mut().for_each(|p| *p += rest);
        Ok(probs)
    }
}
