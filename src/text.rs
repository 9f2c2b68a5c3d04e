//! Portuguese text normalization, tokenization and word counting.
//!
//! Titles are folded to lowercase ASCII before tokenizing so that
//! `Corrupção`, `corrupcao` and `CORRUPÇÃO` all count as the same word.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use unicode_normalization::UnicodeNormalization;

/// Minimum token length kept by [`filter_tokens`] when no override is given.
pub const DEFAULT_MIN_LEN: usize = 3;

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[a-z0-9]+").expect("valid token regex"));

static STOPWORDS_PT: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "a", "o", "os", "as", "um", "uma", "uns", "umas", "de", "da", "do", "das", "dos", "em",
        "no", "na", "nos", "nas", "por", "para", "com", "sem", "sob", "sobre", "entre", "ate",
        "e", "ou", "mas", "que", "se", "ao", "aos", "aquela", "aquele", "aquelas", "aqueles",
        "esta", "este", "estas", "estes", "isso", "isto", "ha", "tem", "tinha", "ser", "sao",
        "foi", "foram", "era", "eram", "mais", "menos", "muito", "pouco", "tambem", "ja", "nao",
        "sim", "como", "quando", "onde", "porque", "por que", "porquê", "sua", "seu", "suas",
        "seus", "meu", "minha", "meus", "minhas", "dele", "dela", "deles", "delas", "lhe",
        "lhes", "nosso", "nossa", "nossos", "nossas", "cada", "outro", "outra", "outros",
        "outras",
    ]
    .into_iter()
    .collect()
});

/// Lowercase, decompose (NFKD) and keep the ASCII part.
///
/// Compatibility characters decompose to their plain letters, so `2ª`
/// becomes `2a` and the `ﬁ` ligature becomes `fi`.
pub fn normalize(text: &str) -> String {
    text.to_lowercase().nfkd().filter(char::is_ascii).collect()
}

/// Split text into normalized alphanumeric tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    let normalized = normalize(text);
    TOKEN_RE
        .find_iter(&normalized)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Drop short tokens and Portuguese stopwords.
pub fn filter_tokens<I>(tokens: I, min_len: usize) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    tokens
        .into_iter()
        .filter(|t| t.len() >= min_len && !STOPWORDS_PT.contains(t.as_str()))
        .collect()
}

/// Word frequency counter that remembers first-seen order.
///
/// [`WordCounts::most_common`] breaks ties by that order, so output files are
/// stable across runs over the same titles.
#[derive(Debug, Default, Clone)]
pub struct WordCounts {
    order: Vec<String>,
    counts: HashMap<String, usize>,
}

impl WordCounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, word: &str) {
        match self.counts.get_mut(word) {
            Some(n) => *n += 1,
            None => {
                self.order.push(word.to_string());
                self.counts.insert(word.to_string(), 1);
            }
        }
    }

    pub fn remove(&mut self, word: &str) -> Option<usize> {
        let removed = self.counts.remove(word)?;
        self.order.retain(|w| w != word);
        Some(removed)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Words sorted by descending count; `None` returns every word.
    pub fn most_common(&self, n: Option<usize>) -> Vec<(String, usize)> {
        let mut all: Vec<(String, usize)> = self
            .order
            .iter()
            .map(|w| (w.clone(), self.counts[w]))
            .collect();
        // stable sort keeps first-seen order among equal counts
        all.sort_by(|a, b| b.1.cmp(&a.1));
        if let Some(n) = n {
            all.truncate(n);
        }
        all
    }
}

impl<S: AsRef<str>> FromIterator<S> for WordCounts {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        let mut counts = WordCounts::new();
        for word in iter {
            counts.add(word.as_ref());
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_accents() {
        assert_eq!(normalize("Corrupção"), "corrupcao");
        assert_eq!(normalize("AÇÕES É Ótimo"), "acoes e otimo");
        assert_eq!(normalize("São Paulo – já"), "sao paulo  ja");
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(
            tokenize("Operação Lava-Jato: 2ª fase!"),
            vec!["operacao", "lava", "jato", "2a", "fase"]
        );
    }

    #[test]
    fn test_normalize_decomposes_compatibility_characters() {
        assert_eq!(normalize("2ª fase"), "2a fase");
        assert_eq!(normalize("Šikić"), "sikic");
        assert_eq!(normalize("ﬁscal"), "fiscal");
        assert_eq!(normalize("Nº 10"), "no 10");
    }

    #[test]
    fn test_filter_tokens_drops_short_and_stopwords() {
        let tokens = tokenize("A prisão do ex-diretor para os depoimentos sobre propina");
        let filtered = filter_tokens(tokens, DEFAULT_MIN_LEN);
        assert_eq!(filtered, vec!["prisao", "diretor", "depoimentos", "propina"]);
    }

    #[test]
    fn test_most_common_orders_by_count_then_first_seen() {
        let counts: WordCounts = ["beta", "alfa", "gama", "alfa", "gama", "delta"]
            .into_iter()
            .collect();
        let top = counts.most_common(None);
        assert_eq!(
            top,
            vec![
                ("alfa".to_string(), 2),
                ("gama".to_string(), 2),
                ("beta".to_string(), 1),
                ("delta".to_string(), 1),
            ]
        );
        assert_eq!(counts.most_common(Some(1)).len(), 1);
    }

    #[test]
    fn test_remove() {
        let mut counts: WordCounts = ["pf", "pf", "stf"].into_iter().collect();
        assert_eq!(counts.remove("pf"), Some(2));
        assert_eq!(counts.remove("pf"), None);
        assert_eq!(counts.most_common(None), vec![("stf".to_string(), 1)]);
        assert_eq!(counts.len(), 1);
        assert!(!counts.is_empty());
    }
}
