//! Header / exported-symbol parity
//!
//! `include/ndarray.h` is the stable contract. Every ND_API declaration
//! must have a matching exported entry point and vice versa.

#[cfg(test)]
mod tests {
    use ndrs_ffi::EXPORTED_SYMBOLS;

    fn header_symbols() -> Vec<String> {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../include/ndarray.h");
        let text = std::fs::read_to_string(path).expect("ABI header is part of the repo");

        let mut out = Vec::new();
        for line in text.lines() {
            let Some(rest) = line.trim().strip_prefix("ND_API ") else {
                continue;
            };
            let Some(open) = rest.find('(') else {
                continue;
            };
            let Some(name) = rest[..open].split_whitespace().last() else {
                continue;
            };
            let name = name.trim_start_matches('*');
            if name.starts_with("nd_") {
                out.push(name.to_string());
            }
        }
        out
    }

    #[test]
    fn test_header_matches_exported_symbols() {
        let mut from_header = header_symbols();
        let mut exported: Vec<String> =
            EXPORTED_SYMBOLS.iter().map(|s| s.to_string()).collect();
        from_header.sort();
        exported.sort();
        assert_eq!(exported, from_header);
    }

    #[test]
    fn test_symbol_list_has_no_duplicates() {
        let mut seen = std::collections::HashSet::new();
        for symbol in EXPORTED_SYMBOLS {
            assert!(seen.insert(symbol), "duplicate exported symbol {symbol}");
        }
    }
}
