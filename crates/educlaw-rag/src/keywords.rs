//! Significant-term extraction for keyword and hybrid search.

use std::collections::HashSet;

/// Stop words dropped before matching (English + Vietnamese).
const STOP_WORDS: &[&str] = &[
    // English
    "the", "a", "an", "is", "are", "was", "were", "be", "been", "being", "have",
    "has", "had", "do", "does", "did", "will", "would", "could", "should",
    "may", "might", "shall", "can", "what", "which", "who", "whom", "how",
    "when", "where", "why", "and", "but", "or", "not", "no", "of", "in", "on",
    "at", "to", "for", "with", "from", "by", "as", "if", "then", "so", "than",
    "this", "that", "these", "those", "it", "its",
    // Vietnamese
    "tôi", "bạn", "là", "có", "và", "của", "với", "cho", "để", "không",
    "được", "này", "đó", "một", "các", "những", "như", "thế", "nào", "gì",
    "em", "cô", "thầy", "hãy", "giúp", "về", "ạ", "nhé",
];

/// Short domain terms that bypass the length filter — operation vocabulary
/// students actually ask about.
const DOMAIN_TERMS: &[&str] = &[
    "cộng", "trừ", "nhân", "chia", "tổng", "hiệu", "tích", "thương",
    "số", "dư", "góc", "gcd", "lcm", "sin", "cos", "tan", "pi",
];

/// Maximum extracted terms per query.
const MAX_TERMS: usize = 8;

/// Extract lowercase significant terms from a query.
///
/// Tokenizes on non-alphanumeric boundaries (Unicode-aware, so Vietnamese
/// letters survive), drops stop words, and drops tokens shorter than three
/// characters unless they appear on the curated domain list.
pub fn extract_keywords(query: &str) -> Vec<String> {
    let stop: HashSet<&str> = STOP_WORDS.iter().copied().collect();
    let domain: HashSet<&str> = DOMAIN_TERMS.iter().copied().collect();

    let mut seen = HashSet::new();
    let mut terms = Vec::new();
    for token in query.split(|c: char| !c.is_alphanumeric() && c != '_') {
        if token.is_empty() {
            continue;
        }
        let lower = token.to_lowercase();
        if stop.contains(lower.as_str()) {
            continue;
        }
        if lower.chars().count() < 3 && !domain.contains(lower.as_str()) {
            continue;
        }
        if seen.insert(lower.clone()) {
            terms.push(lower);
        }
        if terms.len() == MAX_TERMS {
            break;
        }
    }
    terms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_words_dropped() {
        let terms = extract_keywords("Tổng của 15 và 27 là gì?");
        assert!(terms.contains(&"tổng".to_string()));
        assert!(!terms.contains(&"của".to_string()));
        assert!(!terms.contains(&"là".to_string()));
        assert!(!terms.contains(&"gì".to_string()));
    }

    #[test]
    fn test_domain_terms_bypass_length_filter() {
        let terms = extract_keywords("pi là gì");
        assert_eq!(terms, vec!["pi".to_string()]);

        let terms = extract_keywords("số dư của phép chia");
        assert!(terms.contains(&"số".to_string()));
        assert!(terms.contains(&"dư".to_string()));
        assert!(terms.contains(&"chia".to_string()));
    }

    #[test]
    fn test_english_queries_work_too() {
        let terms = extract_keywords("What is the greatest common divisor?");
        assert_eq!(terms, vec!["greatest".to_string(), "common".to_string(), "divisor".to_string()]);
    }

    #[test]
    fn test_dedupe_and_cap() {
        let terms = extract_keywords("cộng cộng cộng trừ trừ nhân");
        assert_eq!(terms, vec!["cộng".to_string(), "trừ".to_string(), "nhân".to_string()]);

        let many = "alpha beta gamma delta epsilon zeta theta lambda sigma omega";
        assert_eq!(extract_keywords(many).len(), MAX_TERMS);
    }

    #[test]
    fn test_empty_and_stop_only_queries() {
        assert!(extract_keywords("").is_empty());
        assert!(extract_keywords("là gì thế ạ").is_empty());
    }
}
