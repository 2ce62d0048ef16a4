//! Captured-output helpers: marker detection, blank filtering and rendering.
//!
//! Output lines stay raw bytes until they are rendered into a comment or chat
//! message, where they are decoded lossily.

/// Printed by the tool when its backend state must be rebuilt.
pub const INIT_REQUIRED_MARKER: &[u8] = b"Backend reinitialization required.";
/// Printed by the tool when the local module cache is missing or stale.
pub const MODULES_NOT_LOADED_MARKER: &[u8] = b"Error loading modules:";
/// Lines carrying this marker are dropped from chat messages.
pub const CHAT_NOISE_MARKER: &[u8] = b"Refreshing state...";

/// True if `line` carries either recoverable-init marker.
pub fn is_recoverable_init_error(line: &[u8]) -> bool {
    contains(line, INIT_REQUIRED_MARKER) || contains(line, MODULES_NOT_LOADED_MARKER)
}

pub fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() {
        return true;
    }
    haystack.windows(needle.len()).any(|window| window == needle)
}

pub fn is_blank(line: &[u8]) -> bool {
    line.iter().all(u8::is_ascii_whitespace)
}

/// Remove empty and whitespace-only lines, keeping order. Idempotent.
pub fn filter_blank_lines(lines: Vec<Vec<u8>>) -> Vec<Vec<u8>> {
    lines.into_iter().filter(|line| !is_blank(line)).collect()
}

/// Strip a trailing `\n` or `\r\n`.
pub fn trim_line_end(mut line: Vec<u8>) -> Vec<u8> {
    if line.last() == Some(&b'\n') {
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
    }
    line
}

/// Decode lines lossily and join them with newlines.
pub fn decode_lines<'a, I>(lines: I) -> String
where
    I: IntoIterator<Item = &'a Vec<u8>>,
{
    lines
        .into_iter()
        .map(|line| String::from_utf8_lossy(line).trim_end().to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Chat body: every line without the noise marker, joined. Empty when nothing is left.
pub fn chat_text(lines: &[Vec<u8>]) -> String {
    let kept = lines
        .iter()
        .filter(|line| !is_blank(line) && !contains(line, CHAT_NOISE_MARKER));
    decode_lines(kept)
}
