//! Bounded last-meaningful-line extraction from a filter's stderr stream.
//!
//! This is a state machine over {no-line, partial-line, complete-line},
//! expressed as a small bounded buffer with an explicit "line complete"
//! flag, rather than the original's in-place pointer scanning over a fixed
//! `char[256]`. See `SPEC_FULL.md` §4.6 for the algorithm this follows.

/// Maximum payload length kept in the accumulator (255 bytes of text, the
/// 256th byte being the original implementation's null terminator).
const CAPACITY: usize = 255;

#[derive(Debug, Default, Clone)]
pub struct RejectReason {
    buf: String,
}

impl RejectReason {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one chunk of stderr output into the accumulator.
    ///
    /// `chunk` need not be valid UTF-8; filter output is treated as opaque
    /// text and decoded lossily, matching the C original's byte-oriented
    /// string handling closely enough for a human-readable SMTP reply.
    pub fn fold(&mut self, chunk: &[u8]) {
        let data = String::from_utf8_lossy(chunk);
        self.fold_str(&data);
    }

    fn fold_str(&mut self, data: &str) {
        let bytes = data.as_bytes();
        let mut end = bytes.len();
        let mut saw_newline = false;
        while end > 0 && (bytes[end - 1] as char).is_ascii_whitespace() {
            if bytes[end - 1] == b'\n' {
                saw_newline = true;
            }
            end -= 1;
        }

        if end > 0 {
            let truncated = if saw_newline { &data[..end] } else { data };
            match truncated.rfind('\n') {
                None => {
                    let continuation = truncated.trim_start();
                    if self.buf.ends_with('\n') {
                        self.buf.clear();
                    }
                    self.append(continuation);
                }
                Some(pos) => {
                    let last_line = truncated[pos + 1..].trim_start();
                    self.buf.clear();
                    self.append(last_line);
                }
            }
        }

        if saw_newline {
            self.append("\n");
        }
    }

    /// Bounded append, the Rust analogue of `strlcat`: appends as much as
    /// fits and silently drops the rest rather than growing unbounded or
    /// erroring.
    fn append(&mut self, s: &str) {
        let remaining = CAPACITY.saturating_sub(self.buf.len());
        if remaining == 0 {
            return;
        }
        let mut end = remaining.min(s.len());
        while end > 0 && !s.is_char_boundary(end) {
            end -= 1;
        }
        self.buf.push_str(&s[..end]);
    }

    /// Finalizes the accumulator into a reply-ready string: an empty
    /// accumulator becomes the literal `"Content Rejected"`, otherwise
    /// trailing whitespace is trimmed.
    pub fn finalize(self) -> String {
        if self.buf.is_empty() {
            "Content Rejected".to_string()
        } else {
            self.buf.trim_end().to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fold_all(chunks: &[&str]) -> String {
        let mut r = RejectReason::new();
        for c in chunks {
            r.fold(c.as_bytes());
        }
        r.finalize()
    }

    #[test]
    fn empty_accumulator_becomes_content_rejected() {
        assert_eq!(fold_all(&[]), "Content Rejected");
    }

    #[test]
    fn single_line_no_trailing_newline() {
        assert_eq!(fold_all(&["blocked: virus found"]), "blocked: virus found");
    }

    #[test]
    fn single_line_with_trailing_newline() {
        assert_eq!(fold_all(&["blocked: virus found\n"]), "blocked: virus found");
    }

    #[test]
    fn only_last_line_survives_multiline_chunk() {
        assert_eq!(
            fold_all(&["scanning...\nclean so far\nblocked: trojan\n"]),
            "blocked: trojan"
        );
    }

    #[test]
    fn partial_line_spans_two_chunks() {
        assert_eq!(fold_all(&["block", "ed: worm\n"]), "blocked: worm");
    }

    #[test]
    fn completed_line_is_replaced_by_next_line_not_concatenated() {
        // Once a line is marked complete (chunk ended in \n), the next
        // chunk starts a fresh line instead of appending to the old one.
        assert_eq!(fold_all(&["first line\n", "second line"]), "second line");
    }

    #[test]
    fn leading_whitespace_on_continuation_is_trimmed() {
        assert_eq!(fold_all(&["foo", "   bar\n"]), "foobar");
    }

    #[test]
    fn whitespace_only_chunk_does_not_reset_pending_line() {
        let mut r = RejectReason::new();
        r.fold(b"partial");
        r.fold(b"   ");
        assert_eq!(r.finalize(), "partial");
    }

    #[test]
    fn trailing_whitespace_without_newline_is_preserved_mid_stream() {
        // No newline in the trailing run: the original does not truncate,
        // so the space is retained until finalize() trims it.
        let mut r = RejectReason::new();
        r.fold(b"value  ");
        r.fold(b"more");
        assert_eq!(r.finalize(), "value  more");
    }
}
