//! Derives a short human-readable label for a cluster from its member texts.
//!
//! Grounded on `examples/original_source/backend/analyzer.py::extract_topic_label`:
//! score 1- and 2-grams against an English stopword list, pick the top
//! candidate under MMR diversity, fall back past a weak-word stoplist, and
//! Title-Case the result into a folder-safe token.

use std::collections::{HashMap, HashSet};

/// Keyphrases that are grammatically common but semantically empty — picking
/// one of these as a topic label is treated the same as not finding one.
const WEAK_WORDS: &[&str] = &["like", "consists", "include", "contains", "called", "known"];

const MMR_DIVERSITY: f32 = 0.7;

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "if", "in", "into", "is",
    "it", "no", "not", "of", "on", "or", "such", "that", "the", "their", "then", "there",
    "these", "they", "this", "to", "was", "will", "with", "from", "has", "have", "had", "its",
    "about", "can", "could", "did", "do", "does", "each", "how", "i", "more", "most", "other",
    "some", "than", "too", "very", "what", "when", "where", "which", "who", "why", "you", "your",
];

fn is_stopword(word: &str) -> bool {
    STOPWORDS.contains(&word)
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_string())
        .collect()
}

/// Candidate 1- and 2-grams with their term-frequency score.
fn candidate_ngrams(texts: &[&str]) -> HashMap<String, f32> {
    let mut counts: HashMap<String, f32> = HashMap::new();
    for text in texts {
        let tokens = tokenize(text);
        for w in &tokens {
            if !is_stopword(w) && w.len() > 2 {
                *counts.entry(w.clone()).or_insert(0.0) += 1.0;
            }
        }
        for pair in tokens.windows(2) {
            if is_stopword(&pair[0]) || is_stopword(&pair[1]) {
                continue;
            }
            if pair[0].len() <= 2 || pair[1].len() <= 2 {
                continue;
            }
            let phrase = format!("{} {}", pair[0], pair[1]);
            *counts.entry(phrase).or_insert(0.0) += 1.5;
        }
    }
    counts
}

fn phrase_overlap(a: &str, b: &str) -> f32 {
    let wa: HashSet<&str> = a.split_whitespace().collect();
    let wb: HashSet<&str> = b.split_whitespace().collect();
    if wa.is_empty() || wb.is_empty() {
        return 0.0;
    }
    let intersection = wa.intersection(&wb).count() as f32;
    let union = wa.union(&wb).count() as f32;
    intersection / union
}

/// Ranks candidates by score, re-ranking with MMR so near-duplicate phrases
/// don't crowd out distinct ones, and returns them best-first.
fn rank_candidates(texts: &[&str]) -> Vec<String> {
    let counts = candidate_ngrams(texts);
    let mut remaining: Vec<(String, f32)> = counts.into_iter().collect();
    remaining.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut selected: Vec<String> = Vec::new();
    while !remaining.is_empty() && selected.len() < 8 {
        let mut best_idx = 0;
        let mut best_score = f32::MIN;
        for (idx, (phrase, score)) in remaining.iter().enumerate() {
            let max_sim = selected
                .iter()
                .map(|s| phrase_overlap(phrase, s))
                .fold(0.0_f32, f32::max);
            let mmr = MMR_DIVERSITY * score - (1.0 - MMR_DIVERSITY) * max_sim;
            if mmr > best_score {
                best_score = mmr;
                best_idx = idx;
            }
        }
        let (phrase, _) = remaining.remove(best_idx);
        selected.push(phrase);
    }
    selected
}

/// Extracts a single topic label from the concatenated context, falling back
/// past weak words to the second candidate, then to a fixed default.
pub fn extract_topic_label(texts: &[&str]) -> String {
    let candidates = rank_candidates(texts);
    let chosen = candidates.iter().find(|c| !WEAK_WORDS.contains(&c.as_str()));

    match chosen {
        Some(phrase) => title_case_label(phrase),
        None => "General_Topic".to_string(),
    }
}

/// Folder-safe casing: whitespace becomes `_`, each word is Title Cased.
pub fn title_case_label(phrase: &str) -> String {
    phrase
        .split_whitespace()
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_dominant_phrase() {
        let texts = [
            "quantum entanglement and superposition",
            "quantum tunneling barrier physics",
        ];
        let label = extract_topic_label(&texts);
        assert!(label.contains("Quantum"));
    }

    #[test]
    fn empty_input_falls_back_to_general_topic() {
        let texts: [&str; 0] = [];
        assert_eq!(extract_topic_label(&texts), "General_Topic");
    }

    #[test]
    fn title_case_label_joins_with_underscore() {
        assert_eq!(title_case_label("neural network"), "Neural_Network");
    }

    #[test]
    fn weak_word_candidate_is_skipped() {
        // "called" alone scores highly but is on the weak-word stoplist.
        assert_ne!(extract_topic_label(&["it is called"]), "Called".to_string());
    }
}
