use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

// Spanish function words that carry no signal for spam/toxicity scoring.
static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "el", "la", "los", "las", "un", "una", "de", "del", "y", "o", "u", "a", "en", "que",
        "por", "para", "con", "se", "es", "lo", "al", "como", "no", "si", "su", "sus", "mi",
        "mis", "tu", "tus",
    ]
    .into_iter()
    .collect()
});

static PUNCT: Lazy<Regex> = Lazy::new(|| Regex::new(r#"[.,!?;:\-_/\\()\[\]{}*"']+"#).unwrap());

/// Lowercases and strips diacritics so accent variants collapse to the
/// same token ("rápido" and "rapido" must count as one word).
pub fn normalize(text: &str) -> String {
    text.to_lowercase()
        .nfd()
        .filter(|ch| !is_combining_mark(*ch))
        .collect()
}

/// Splits a message into scoring tokens: normalized, punctuation
/// replaced by spaces, stop words dropped.
pub fn tokenize(text: &str) -> Vec<String> {
    let normalized = normalize(text);
    let cleaned = PUNCT.replace_all(&normalized, " ");
    cleaned
        .split_whitespace()
        .filter(|tok| !STOPWORDS.contains(tok))
        .map(|tok| tok.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_lowercases_and_drops_stopwords() {
        assert_eq!(tokenize("El perro MUERDE fuerte."), vec!["perro", "muerde", "fuerte"]);
    }

    #[test]
    fn test_tokenize_strips_diacritics() {
        assert_eq!(tokenize("Acción rápida"), vec!["accion", "rapida"]);
    }

    #[test]
    fn test_tokenize_punctuation_only_splits() {
        assert_eq!(tokenize("hola,mundo!!!"), vec!["hola", "mundo"]);
    }

    #[test]
    fn test_tokenize_stopwords_only_is_empty() {
        assert!(tokenize("el la de un").is_empty());
        assert!(tokenize("").is_empty());
    }
}
