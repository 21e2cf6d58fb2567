//! Incremental text assembly for streamed tokens.

/// Reassembles UTF-8 text from token byte pieces.
///
/// A single token may carry only part of a multi-byte character, so bytes are
/// buffered until they form complete characters. Invalid sequences are dropped.
#[derive(Debug, Default)]
pub struct Utf8Accumulator {
    buf: Vec<u8>,
}

impl Utf8Accumulator {
    /// Append bytes and return every complete character available so far.
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.buf.extend_from_slice(bytes);
        let mut out = String::new();

        loop {
            match std::str::from_utf8(&self.buf) {
                Ok(text) => {
                    out.push_str(text);
                    self.buf.clear();
                    break;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    if let Ok(text) = std::str::from_utf8(&self.buf[..valid]) {
                        out.push_str(text);
                    }
                    match err.error_len() {
                        Some(invalid) => {
                            self.buf.drain(..valid + invalid);
                        }
                        None => {
                            // Incomplete character at the end, wait for more bytes.
                            self.buf.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }

        out
    }

    /// Bytes still waiting for the rest of their character.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

/// Cuts a text stream at the first occurrence of a stop string.
///
/// Text that could be the beginning of the stop string is held back until the
/// next piece decides it, so the stop string itself is never emitted.
#[derive(Debug, Default)]
pub struct StopScanner {
    stop: String,
    pending: String,
    stopped: bool,
}

impl StopScanner {
    pub fn new(stop: Option<&str>) -> Self {
        Self {
            stop: stop.unwrap_or_default().to_string(),
            pending: String::new(),
            stopped: false,
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Feed the next piece and return the text that is safe to emit.
    pub fn push(&mut self, piece: &str) -> String {
        if self.stopped {
            return String::new();
        }
        if self.stop.is_empty() {
            return piece.to_string();
        }

        self.pending.push_str(piece);

        if let Some(idx) = self.pending.find(&self.stop) {
            let out = self.pending[..idx].to_string();
            self.pending.clear();
            self.stopped = true;
            return out;
        }

        let emit_len = self.pending.len() - held_back(&self.pending, &self.stop);
        self.pending.drain(..emit_len).collect()
    }

    /// Release held text once the stream has ended without the stop string.
    pub fn finish(&mut self) -> String {
        if self.stopped {
            return String::new();
        }
        std::mem::take(&mut self.pending)
    }
}

/// Length of the longest suffix of `text` that is a proper prefix of `stop`.
fn held_back(text: &str, stop: &str) -> usize {
    text.char_indices()
        .map(|(i, _)| i)
        .find(|&i| stop.starts_with(&text[i..]))
        .map(|i| text.len() - i)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_split_across_pieces() {
        let bytes = "あい".as_bytes();
        let mut acc = Utf8Accumulator::default();

        assert_eq!(acc.push(&bytes[..2]), "");
        assert_eq!(acc.pending(), 2);
        assert_eq!(acc.push(&bytes[2..4]), "あ");
        assert_eq!(acc.push(&bytes[4..]), "い");
        assert_eq!(acc.pending(), 0);
    }

    #[test]
    fn utf8_invalid_bytes_are_dropped() {
        let mut acc = Utf8Accumulator::default();
        assert_eq!(acc.push(&[b'a', 0xff, b'b']), "ab");
        assert_eq!(acc.pending(), 0);
    }

    #[test]
    fn stop_string_inside_one_piece() {
        let mut scanner = StopScanner::new(Some("ユーザー:"));
        assert_eq!(scanner.push("はい。\nユーザー: つぎ"), "はい。\n");
        assert!(scanner.is_stopped());
        assert_eq!(scanner.push("more"), "");
    }

    #[test]
    fn stop_string_split_across_pieces() {
        let mut scanner = StopScanner::new(Some("User:"));
        assert_eq!(scanner.push("Sure.\nUs"), "Sure.\n");
        assert_eq!(scanner.push("er"), "");
        assert_eq!(scanner.push(": next"), "");
        assert!(scanner.is_stopped());
    }

    #[test]
    fn false_start_is_released() {
        let mut scanner = StopScanner::new(Some("User:"));
        assert_eq!(scanner.push("a Us"), "a ");
        assert_eq!(scanner.push("ually"), "Usually");
        assert_eq!(scanner.push(" Use"), " ");
        assert_eq!(scanner.finish(), "Use");
        assert!(!scanner.is_stopped());
    }

    #[test]
    fn no_stop_string_passes_through() {
        let mut scanner = StopScanner::new(None);
        assert_eq!(scanner.push("anything"), "anything");
        assert_eq!(scanner.finish(), "");
    }
}
