//! Keyword filtering of detections.
//!
//! A spoken request ("find me a chair") arrives as free text from the
//! speech layer. `LabelFilter` reduces it to keywords and keeps only the
//! objects whose label matches one of them.

use crate::detect::result::DetectedObject;

/// Words that never name an object class.
const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "me", "my", "find", "show", "where", "is", "are", "any", "some", "for",
    "to", "of", "please", "look", "there", "i", "want", "need", "somewhere", "something", "or",
    "and", "with",
];

/// Keyword filter over object labels.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelFilter {
    keywords: Vec<String>,
}

impl LabelFilter {
    /// Build a filter from a spoken phrase.
    ///
    /// Everything but letters and whitespace is stripped, the phrase is
    /// lower-cased and stop words are removed. Returns `None` when no
    /// keyword survives.
    pub fn from_phrase(phrase: &str) -> Option<Self> {
        let cleaned: String = phrase
            .chars()
            .filter(|c| c.is_alphabetic() || c.is_whitespace())
            .collect::<String>()
            .to_lowercase();
        let mut keywords: Vec<String> = Vec::new();
        for word in cleaned.split_whitespace() {
            if STOP_WORDS.contains(&word) {
                continue;
            }
            let stem = singular(word).to_string();
            if !keywords.contains(&stem) {
                keywords.push(stem);
            }
        }
        if keywords.is_empty() {
            None
        } else {
            Some(Self { keywords })
        }
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    /// True when any word of `label` matches a keyword.
    pub fn matches(&self, label: &str) -> bool {
        let label = label.to_lowercase();
        label
            .split(|c: char| !c.is_alphabetic())
            .filter(|word| !word.is_empty())
            .map(singular)
            .any(|word| self.keywords.iter().any(|k| k == word))
    }

    /// Keep the matching objects, preserving order.
    pub fn apply(&self, objects: &[DetectedObject]) -> Vec<DetectedObject> {
        objects
            .iter()
            .filter(|obj| self.matches(&obj.label))
            .cloned()
            .collect()
    }
}

/// Crude English singular form, enough for class names ("chairs", "boxes").
fn singular(word: &str) -> &str {
    if word.len() > 4 && word.ends_with("es") && (word.ends_with("xes") || word.ends_with("ches")) {
        &word[..word.len() - 2]
    } else if word.len() > 3 && word.ends_with('s') && !word.ends_with("ss") {
        &word[..word.len() - 1]
    } else {
        word
    }
}
