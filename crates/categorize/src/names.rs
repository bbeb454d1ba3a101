use regex::Regex;
use std::sync::OnceLock;

/// Counterparty fallback for PIX payments whose name cannot be read.
pub const PIX_CLIENT: &str = "PIX";

fn name_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?i)pix.*?-\s*(\p{L}[\p{L}\s]+\p{L})",
            r"(?i)transfer[eê]ncia.*?-\s*(\p{L}[\p{L}\s]+\p{L})",
            r"(?i)\brecebid[oa]\s+(?:de\s+)?(\p{L}[\p{L}\s]+\p{L})",
            r"(?i)\benviad[oa]\s+(?:para\s+)?(\p{L}[\p{L}\s]+\p{L})",
            r"(?i)\bpara\s+(\p{L}[\p{L}\s]+\p{L})",
            r"(?i)\bde\s+(\p{L}[\p{L}\s]+\p{L})",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

/// Pulls a person or company name out of transfer-style descriptions such as
/// `"PIX RECEBIDO - MARIA DA SILVA"`. Names need at least two words.
pub fn extract_client_name(description: &str) -> Option<String> {
    name_patterns().iter().find_map(|re| {
        let name = re.captures(description)?.get(1)?.as_str();
        let name = name.split_whitespace().collect::<Vec<_>>().join(" ");
        (name.split(' ').count() >= 2 && name.chars().count() > 5).then(|| title_case(&name))
    })
}

fn title_case(s: &str) -> String {
    s.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
