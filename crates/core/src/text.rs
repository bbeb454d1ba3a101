//! Text helpers shared by the parser, the matcher and the categorizer.

use std::collections::BTreeSet;

/// ERP document numbers hold at most this many characters.
pub const DOCUMENT_NUMBER_LEN: usize = 20;

/// Levenshtein edit distance using the two-row O(min(m,n)) space algorithm.
pub fn levenshtein_distance(s1: &str, s2: &str) -> usize {
    let a: Vec<char> = s1.chars().collect();
    let b: Vec<char> = s2.chars().collect();
    let (m, n) = (a.len(), b.len());

    if m == 0 {
        return n;
    }
    if n == 0 {
        return m;
    }

    // Keep the shorter string in the inner loop to minimise allocation.
    let (a, b, m, n) = if m <= n { (a, b, m, n) } else { (b, a, n, m) };

    let mut prev: Vec<usize> = (0..=n).collect();
    let mut curr = vec![0usize; n + 1];

    for i in 1..=m {
        curr[0] = i;
        for j in 1..=n {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[n]
}

/// Lowercases and replaces every non-word character with a single space.
pub fn clean_description(s: &str) -> String {
    s.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Replaces Portuguese diacritics with their base letters, so rule patterns
/// written without accents still match ("transferencia" vs "transferência").
pub fn fold_accents(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
            'Á' | 'À' | 'Â' | 'Ã' | 'Ä' => 'A',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'É' | 'È' | 'Ê' | 'Ë' => 'E',
            'í' | 'ì' | 'î' | 'ï' => 'i',
            'Í' | 'Ì' | 'Î' | 'Ï' => 'I',
            'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
            'Ó' | 'Ò' | 'Ô' | 'Õ' | 'Ö' => 'O',
            'ú' | 'ù' | 'û' | 'ü' => 'u',
            'Ú' | 'Ù' | 'Û' | 'Ü' => 'U',
            'ç' => 'c',
            'Ç' => 'C',
            other => other,
        })
        .collect()
}

/// Levenshtein similarity in [0.0, 1.0] over cleaned descriptions.
pub fn description_similarity(s1: &str, s2: &str) -> f32 {
    let a = clean_description(s1);
    let b = clean_description(s2);

    if a == b {
        return 1.0;
    }

    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }

    1.0 - (levenshtein_distance(&a, &b) as f32 / max_len as f32)
}

/// Words longer than three characters; short words are mostly noise
/// ("de", "pix", "ted").
pub fn keywords(s: &str) -> BTreeSet<String> {
    clean_description(s)
        .split(' ')
        .filter(|w| w.chars().count() > 3)
        .map(str::to_string)
        .collect()
}

/// Share of the smaller keyword set found in the larger one.
pub fn keyword_overlap(s1: &str, s2: &str) -> f32 {
    let a = keywords(s1);
    let b = keywords(s2);
    let smaller = a.len().min(b.len());
    if smaller == 0 {
        return 0.0;
    }
    a.intersection(&b).count() as f32 / smaller as f32
}

/// Strips everything but alphanumerics and truncates to the ERP's limit.
pub fn normalize_document_number(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_alphanumeric())
        .take(DOCUMENT_NUMBER_LEN)
        .collect()
}

pub fn is_pix_like(description: &str) -> bool {
    let lower = description.to_lowercase();
    ["pix", "transferência", "transferencia"]
        .iter()
        .any(|w| lower.contains(w))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_strings_are_zero() {
        assert_eq!(levenshtein_distance("abc", "abc"), 0);
        assert_eq!(levenshtein_distance("", ""), 0);
    }

    #[test]
    fn empty_string_is_length_of_other() {
        assert_eq!(levenshtein_distance("", "abc"), 3);
        assert_eq!(levenshtein_distance("abc", ""), 3);
    }

    #[test]
    fn counts_accented_chars_once() {
        assert_eq!(levenshtein_distance("café", "cafe"), 1);
    }

    #[test]
    fn commutative() {
        assert_eq!(
            levenshtein_distance("fornecedor", "forn"),
            levenshtein_distance("forn", "fornecedor")
        );
    }

    #[test]
    fn clean_description_strips_punctuation() {
        assert_eq!(
            clean_description("  Transferência enviada - JOÃO  (Pix) "),
            "transferência enviada joão pix"
        );
        assert_eq!(clean_description(""), "");
    }

    #[test]
    fn fold_accents_keeps_length_and_case() {
        assert_eq!(fold_accents("Transferência SÃO João"), "Transferencia SAO Joao");
        assert_eq!(fold_accents("açaí"), "acai");
    }

    #[test]
    fn similarity_bounds() {
        assert_eq!(description_similarity("Supplier X", "supplier-x"), 1.0);
        assert!(description_similarity("AMAZON", "STARBUCKS") < 0.5);
    }

    #[test]
    fn keyword_overlap_ignores_short_words() {
        assert_eq!(keyword_overlap("pix de joao", "ted de maria"), 0.0);
        assert_eq!(keyword_overlap("Pagamento fornecedor Acme", "Acme Fornecedor"), 1.0);
        assert_eq!(keyword_overlap("Pagamento fornecedor Acme", "ACME LTDA"), 0.5);
    }

    #[test]
    fn document_numbers_are_truncated_alphanumerics() {
        assert_eq!(
            normalize_document_number("6630-4d8b_a0c1-3f0e9b3d7c2a-99"),
            "66304d8ba0c13f0e9b3d"
        );
        assert_eq!(normalize_document_number("12/34"), "1234");
    }

    #[test]
    fn detects_pix_descriptions() {
        assert!(is_pix_like("Transferência recebida pelo Pix - MARIA"));
        assert!(!is_pix_like("Pagamento de boleto"));
    }
}
