//! Word-level tokenizer for driving the reference backend from text.
//! Real deployments bring their own tokenizer; the orchestrator only sees ids.

use kvforge_orchestrator::Token;
use std::collections::HashMap;

pub const PAD: Token = 0;
pub const UNK: Token = 1;
pub const EOS: Token = 2;

const WORDS: &[&str] = &[
    "the", "a", "is", "in", "to", "of", "and", "for", "on", "with", "as", "at", "by", "from",
    "it", "this", "that", "are", "was", "be", "have", "has", "had", "not", "can", "will",
    "would", "could", "should", "said", "there", "their", "they", "we", "you", "he", "she", "i",
    "my", "your", "our", "but", "or", "so", "if", "then", "when", "where", "what", "how", "why",
    "who", "which", "do", "does", "did", "go", "come", "see", "get", "make", "know", "think",
    "take", "want", "use", "find", "give", "tell", "work", "call", "try", "ask", "need", "feel",
    "become", "leave", "put",
];

pub struct WordTokenizer {
    ids: HashMap<&'static str, Token>,
    words: Vec<&'static str>,
}

impl WordTokenizer {
    /// Builds a vocabulary capped at `vocab_size` ids, reserved ids included.
    pub fn new(vocab_size: usize) -> Self {
        let mut words = vec!["<pad>", "<unk>", "<eos>"];
        words.extend(WORDS.iter().copied());
        words.truncate(vocab_size.max(3));
        let ids = words
            .iter()
            .enumerate()
            .map(|(id, word)| (*word, id as Token))
            .collect();
        Self { ids, words }
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn encode(&self, text: &str) -> Vec<Token> {
        text.split_whitespace()
            .map(|word| {
                self.ids
                    .get(word.to_lowercase().as_str())
                    .copied()
                    .unwrap_or(UNK)
            })
            .collect()
    }

    /// Ids outside the word list render as `#<id>`.
    pub fn decode(&self, ids: &[Token]) -> String {
        ids.iter()
            .map(|&id| match self.words.get(id as usize) {
                Some(word) => (*word).to_string(),
                None => format!("#{id}"),
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}
