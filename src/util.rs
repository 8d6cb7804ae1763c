//! Hex string helpers.
//!
//! Card tooling is sloppy about hex: codes arrive as `"93 3F 57 84"`,
//! `"933f578 4"` or worse. Everything here is whitespace- and case-tolerant;
//! parsing strips anything that isn't a hex digit first.

/// Uppercases and strips every character that is not a hex digit.
pub fn filter(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_hexdigit())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Parses a (dirty) hex string into bytes.
///
/// An odd number of digits is tolerated: the leading nibble becomes its own
/// first byte, so `"ABC"` parses as `[0x0A, 0xBC]`.
pub fn parse(s: &str) -> Vec<u8> {
    let clean = filter(s);
    let (head, pairs) = if clean.len() % 2 == 1 {
        clean.split_at(1)
    } else {
        clean.split_at(0)
    };

    let mut out = Vec::with_capacity((clean.len() + 1) / 2);
    if !head.is_empty() {
        // Filtered input, single digit: this cannot fail.
        out.push(u8::from_str_radix(head, 16).unwrap_or(0));
    }
    if let Ok(bytes) = hex::decode(pairs) {
        out.extend(bytes);
    }
    out
}

/// Formats bytes as continuous uppercase hex, the way replay scripts and
/// section headers want them.
pub fn encode(bytes: &[u8]) -> String {
    hex::encode_upper(bytes)
}

/// Formats bytes as space-separated uppercase hex (`"A0 A4 00 00 02"`),
/// used for human-facing log lines.
pub fn encode_spaced(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
