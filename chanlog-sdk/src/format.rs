//! Text decoding and IRC formatting-code removal.
//!
//! IRC carries no charset information. Lines are decoded as UTF-8 when
//! valid and as Windows-1252 otherwise, which is what legacy clients emit
//! in practice.

use std::sync::LazyLock;

use regex::Regex;

/// mIRC colours: `\x03` with optional `fg[,bg]`.
static COLOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x03(?:[0-9]{1,2}(?:,[0-9]{1,2})?)?").expect("static regex"));

/// Hex colours: `\x04` with optional `RRGGBB[,RRGGBB]`.
static HEX_COLOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x04(?:[0-9a-fA-F]{6}(?:,[0-9a-fA-F]{6})?)?").expect("static regex")
});

/// ANSI terminal escape sequences (CSI).
static ANSI_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;?]*[@-~]").expect("static regex"));

/// Bold, italics, underline, strikethrough, monospace, reverse.
static TOGGLES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\x02\x1d\x1f\x1e\x11\x16]").expect("static regex"));

const RESET: char = '\x0f';

/// Windows-1252 code points for bytes 0x80..=0x9F. Holes keep their
/// Latin-1 control character.
const CP1252_HIGH: [char; 32] = [
    '\u{20AC}', '\u{0081}', '\u{201A}', '\u{0192}', '\u{201E}', '\u{2026}', '\u{2020}', '\u{2021}',
    '\u{02C6}', '\u{2030}', '\u{0160}', '\u{2039}', '\u{0152}', '\u{008D}', '\u{017D}', '\u{008F}',
    '\u{0090}', '\u{2018}', '\u{2019}', '\u{201C}', '\u{201D}', '\u{2022}', '\u{2013}', '\u{2014}',
    '\u{02DC}', '\u{2122}', '\u{0161}', '\u{203A}', '\u{0153}', '\u{009D}', '\u{017E}', '\u{0178}',
];

/// Decode raw line bytes: UTF-8 if valid, Windows-1252 otherwise.
pub fn decode(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes
            .iter()
            .map(|&b| match b {
                0x80..=0x9F => CP1252_HIGH[(b - 0x80) as usize],
                _ => b as char,
            })
            .collect(),
    }
}

/// Remove colour codes, escape sequences and formatting toggles.
pub fn strip_formatting(text: &str) -> String {
    let text = COLOR.replace_all(text, "");
    let text = HEX_COLOR.replace_all(&text, "");
    let text = ANSI_ESCAPE.replace_all(&text, "");
    let text = TOGGLES.replace_all(&text, "");
    text.replace(RESET, "")
}
