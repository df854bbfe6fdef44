use std::io::{self, BufRead};

/// Counters kept while reading physical lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadStats {
    pub lines_read: usize,
    pub fragments: usize,
    pub blank_lines: usize,
}

/// Reads trimmed, non-blank lines from a log snapshot.
///
/// A physical line longer than `max_len` bytes is handed out as consecutive fragments of at most
/// `max_len` bytes each, so a single runaway line never grows the buffer without bound. The
/// continuation merger downstream gets a chance to stitch a split entry back together.
/// Fragments end on a UTF-8 character boundary; a character cut by the limit moves whole into
/// the next fragment.
pub struct BoundedLineReader<R> {
    inner: R,
    max_len: usize,
    buf: Vec<u8>,
    carry: Vec<u8>,
    stats: ReadStats,
}

impl<R: BufRead> BoundedLineReader<R> {
    pub fn new(inner: R, max_len: usize) -> Self {
        let max_len = max_len.max(1);
        Self {
            inner,
            max_len,
            buf: Vec::with_capacity(max_len.min(64 * 1024)),
            carry: Vec::with_capacity(4),
            stats: ReadStats::default(),
        }
    }

    pub fn stats(&self) -> ReadStats {
        self.stats
    }

    /// Fill `self.buf` with the next fragment.
    ///
    /// Returns `None` at end of input, otherwise whether the fragment ended a physical line.
    fn read_fragment(&mut self) -> io::Result<Option<bool>> {
        self.buf.clear();
        self.buf.append(&mut self.carry);
        loop {
            let available = match self.inner.fill_buf() {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };

            if available.is_empty() {
                return Ok(if self.buf.is_empty() { None } else { Some(true) });
            }

            let room = self.max_len - self.buf.len();
            let window = &available[..available.len().min(room)];
            match window.iter().position(|&b| b == b'\n') {
                Some(newline) => {
                    self.buf.extend_from_slice(&window[..newline]);
                    self.inner.consume(newline + 1);
                    return Ok(Some(true));
                }
                None => {
                    let taken = window.len();
                    self.buf.extend_from_slice(window);
                    self.inner.consume(taken);
                    if self.buf.len() >= self.max_len {
                        let split = char_boundary(&self.buf);
                        if split > 0 {
                            self.carry.extend_from_slice(&self.buf[split..]);
                            self.buf.truncate(split);
                        }
                        return Ok(Some(false));
                    }
                }
            }
        }
    }
}

/// Length of `bytes` without a trailing, incomplete UTF-8 sequence.
fn char_boundary(bytes: &[u8]) -> usize {
    let len = bytes.len();
    for i in (len.saturating_sub(4)..len).rev() {
        let lead = bytes[i];
        if lead & 0xC0 == 0x80 {
            continue;
        }
        let width = match lead {
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => 1,
        };
        return if i + width > len { i } else { len };
    }
    len
}

impl<R: BufRead> Iterator for BoundedLineReader<R> {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let complete = match self.read_fragment() {
                Ok(Some(complete)) => complete,
                Ok(None) => return None,
                Err(e) => return Some(Err(e)),
            };

            if complete {
                self.stats.lines_read += 1;
            } else {
                self.stats.fragments += 1;
            }

            let text = String::from_utf8_lossy(&self.buf);
            let trimmed = text.trim();
            if trimmed.is_empty() {
                self.stats.blank_lines += 1;
                continue;
            }
            return Some(Ok(trimmed.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufReader, Cursor};

    fn collect(input: &str, max_len: usize) -> (Vec<String>, ReadStats) {
        let mut reader = BoundedLineReader::new(Cursor::new(input.as_bytes().to_vec()), max_len);
        let lines = reader.by_ref().collect::<io::Result<Vec<_>>>().unwrap();
        (lines, reader.stats())
    }

    #[test]
    fn test_trims_and_skips_blank_lines() {
        let (lines, stats) = collect("  first  \n\n   \r\nsecond\r\n", 4096);
        assert_eq!(lines, vec!["first", "second"]);
        assert_eq!(stats.lines_read, 4);
        assert_eq!(stats.blank_lines, 2);
        assert_eq!(stats.fragments, 0);
    }

    #[test]
    fn test_last_line_without_newline() {
        let (lines, stats) = collect("one\ntwo", 4096);
        assert_eq!(lines, vec!["one", "two"]);
        assert_eq!(stats.lines_read, 2);
    }

    #[test]
    fn test_long_line_is_fragmented() {
        let (lines, stats) = collect("abcdefghij\nxy\n", 4);
        assert_eq!(lines, vec!["abcd", "efgh", "ij", "xy"]);
        assert_eq!(stats.fragments, 2);
        assert_eq!(stats.lines_read, 2);
    }

    #[test]
    fn test_fragment_boundary_on_exact_length() {
        // A line of exactly max_len bytes leaves its newline as an empty trailing fragment.
        let (lines, stats) = collect("abcd\nef\n", 4);
        assert_eq!(lines, vec!["abcd", "ef"]);
        assert_eq!(stats.fragments, 1);
        assert_eq!(stats.blank_lines, 1);
    }

    #[test]
    fn test_fragments_split_on_char_boundaries() {
        // "é" is two bytes and "€" three; both straddle the 4-byte limit.
        let (lines, stats) = collect("abcéd\nxyz€!\n", 4);
        assert_eq!(lines, vec!["abc", "éd", "xyz", "€!"]);
        assert_eq!(stats.fragments, 3);
        assert_eq!(stats.blank_lines, 1);
        assert!(lines.iter().all(|l| !l.contains('\u{FFFD}')));
    }

    #[test]
    fn test_fragmented_multibyte_line_rejoins_intact() {
        let message = "ОшибкаДоступаКБазеДанных";
        let (lines, _) = collect(&format!("{}\n", message), 7);
        assert!(lines.len() > 1);
        assert!(lines.iter().all(|l| l.len() <= 7));
        assert_eq!(lines.concat(), message);
    }

    #[test]
    fn test_limit_below_char_width_still_advances() {
        let (lines, stats) = collect("€\nok\n", 2);
        assert_eq!(lines.last().map(String::as_str), Some("ok"));
        assert_eq!(stats.lines_read, 2);
    }

    #[test]
    fn test_char_boundary() {
        assert_eq!(char_boundary(b"abcd"), 4);
        assert_eq!(char_boundary("abé".as_bytes()), 4);
        assert_eq!(char_boundary(&"abé".as_bytes()[..3]), 2);
        assert_eq!(char_boundary(&"a€".as_bytes()[..3]), 1);
        assert_eq!(char_boundary(b"ab\xff"), 3);
        assert_eq!(char_boundary(b""), 0);
    }

    #[test]
    fn test_small_internal_buffer() {
        let input = "a fairly long line that spans several reads\nshort\n";
        let inner = BufReader::with_capacity(3, Cursor::new(input.as_bytes().to_vec()));
        let lines: Vec<String> = BoundedLineReader::new(inner, 4096)
            .collect::<io::Result<_>>()
            .unwrap();
        assert_eq!(
            lines,
            vec!["a fairly long line that spans several reads", "short"]
        );
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let bytes = b"ok \xff\xfe bytes\n".to_vec();
        let lines: Vec<String> = BoundedLineReader::new(Cursor::new(bytes), 4096)
            .collect::<io::Result<_>>()
            .unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("ok "));
        assert!(lines[0].ends_with(" bytes"));
    }
}
