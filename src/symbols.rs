/// Canonical asset-code vocabulary. Extraction and validation are both
/// closed over this list; nothing outside it is ever accepted as a symbol.
pub const CANONICAL_SYMBOLS: &[&str] = &[
    "BTC", "ETH", "BNB", "SOL", "ADA", "XRP", "DOT", "DOGE", "AVAX", "MATIC", "LINK", "UNI",
    "LTC", "ATOM", "ETC", "XAU", "XAG", "XPT", "XPD", "XAUUSD", "XAUTRY", "USDTRY", "EURTRY",
];

/// Matches whole-word occurrences of canonical symbols in free-form text,
/// uppercased, deduped preserving first-seen order (order of appearance in
/// `text`, not vocabulary order).
pub fn extract_symbols(text: &str) -> Vec<String> {
    let upper = text.to_uppercase();
    let mut found = Vec::new();

    for token in upper.split(|c: char| !c.is_ascii_alphanumeric()) {
        if token.is_empty() {
            continue;
        }
        if is_canonical_symbol(token) && !found.contains(&token.to_string()) {
            found.push(token.to_string());
        }
    }

    found
}

/// `symbols` items must be uppercased and match letters/digits/hyphen, length <= 12.
pub fn is_valid_symbol_token(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 12
        && s.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '-')
}

pub fn is_canonical_symbol(s: &str) -> bool {
    CANONICAL_SYMBOLS.contains(&s)
}
