use lazy_static::lazy_static;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteAsset {
    Stable,
    Btc,
    Other,
}

fn get_quote_asset(symbol: &str) -> QuoteAsset {
    let stable_quotes = ["USDT", "USDC", "FDUSD", "BUSD", "TUSD"];
    if stable_quotes.iter().any(|q| symbol.len() > q.len() && symbol.ends_with(q)) {
        return QuoteAsset::Stable;
    }
    if symbol.len() > 3 && symbol.ends_with("BTC") {
        return QuoteAsset::Btc;
    }
    QuoteAsset::Other
}

lazy_static! {
    // Spot pairs only; the halal list is the curated subset the free channel ships with.
    static ref UNIVERSES: HashMap<&'static str, Vec<&'static str>> = {
        let mut m = HashMap::new();
        m.insert("halal", vec!["BTCUSDT", "ETHUSDT", "BNBUSDT"]);
        m.insert(
            "all",
            vec!["BTCUSDT", "ETHUSDT", "BNBUSDT", "DOGEUSDT", "XRPUSDT", "ADAUSDT"],
        );
        m
    };
}

/// Resolves a named universe ("halal", "all") to its symbols.
pub fn universe(name: &str) -> Option<Vec<String>> {
    UNIVERSES
        .get(name.trim().to_ascii_lowercase().as_str())
        .map(|symbols| symbols.iter().map(|s| s.to_string()).collect())
}

/// Parses a `SYMBOLS` value: either a universe name or a comma list.
pub fn parse_symbols(value: &str) -> Vec<String> {
    if let Some(symbols) = universe(value) {
        return symbols;
    }
    let mut out: Vec<String> = Vec::new();
    for s in value.split(',').map(|s| s.trim().to_uppercase()).filter(|s| !s.is_empty()) {
        if !out.contains(&s) {
            out.push(s);
        }
    }
    out
}

pub fn is_valid_symbol(symbol: &str) -> bool {
    (5..=20).contains(&symbol.len()) && symbol.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
}

/// Decimal places to show for a price, from its magnitude.
pub fn price_digits(symbol: &str, price: f64) -> usize {
    let abs_price = price.abs();
    match get_quote_asset(symbol) {
        QuoteAsset::Btc => 8,
        QuoteAsset::Stable | QuoteAsset::Other => {
            if abs_price >= 1000.0 {
                2
            } else if abs_price >= 1.0 {
                4
            } else if abs_price >= 0.01 {
                6
            } else {
                8
            }
        }
    }
}

pub fn format_price(symbol: &str, price: f64) -> String {
    format!("{:.*}", price_digits(symbol, price), price)
}
