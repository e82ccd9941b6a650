use regex::Regex;

/// Closed set of function words dropped by the hierarchical export. The raw
/// tokenizer keeps them so ranking sees true term frequencies.
const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "he", "in", "is",
    "it", "its", "of", "on", "that", "the", "to", "was", "will", "with", "would", "could",
    "should", "must", "shall", "may", "might", "can", "do", "did", "does", "have", "had", "i",
    "you", "we", "they", "me", "him", "her", "us", "them", "my", "your", "his", "our", "their",
    "this", "these", "those",
];

/// Lowercases the input, treats every maximal run of non-letter/non-digit
/// characters as a separator, and drops tokens shorter than 2 characters.
/// Order and duplicates are preserved; callers that need frequencies count
/// occurrences themselves.
pub fn tokenize(text: &str) -> Vec<String> {
    let re = Regex::new(r"[\p{L}\p{Nd}]+").unwrap();
    re.find_iter(&text.to_lowercase())
        .map(|m| m.as_str().to_string())
        .filter(|token| token.chars().count() >= 2)
        .collect()
}

pub fn is_stop_word(token: &str) -> bool {
    STOP_WORDS.contains(&token)
}

/// `tokenize` plus stopword removal, for the hierarchical export path.
pub fn tokenize_filtered(text: &str) -> Vec<String> {
    tokenize(text)
        .into_iter()
        .filter(|token| !is_stop_word(token))
        .collect()
}

/// Group key for the hierarchical index: the uppercased first letter, or `#`
/// when the term does not start with a letter.
pub fn letter_group(term: &str) -> String {
    match term.chars().next() {
        Some(c) if c.is_alphabetic() => c.to_uppercase().to_string(),
        _ => "#".to_string(),
    }
}
