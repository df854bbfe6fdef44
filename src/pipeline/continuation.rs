use crate::parsers::{LineParser, ParsedError};

/// What the merger did with the lines it was fed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Records emitted from a single line.
    pub parsed: usize,
    /// Records emitted from a buffered line joined with its successor.
    pub merged: usize,
    /// Lines discarded without producing a record.
    pub dropped: usize,
}

/// Recovers entries wrapped over two physical lines.
///
/// Holds at most one unparsed line. A line that fails on its own is buffered; the next failing
/// line is retried joined to the buffered one with a single space. If that also fails both are
/// dropped. Any successful parse clears the buffer, and a line still buffered at end of input is
/// dropped.
pub struct ContinuationMerger<'p, I, P: ?Sized> {
    lines: I,
    parser: &'p P,
    pending: Option<String>,
    stats: MergeStats,
}

impl<'p, I, P> ContinuationMerger<'p, I, P>
where
    I: Iterator<Item = String>,
    P: LineParser + ?Sized,
{
    pub fn new(lines: I, parser: &'p P) -> Self {
        Self {
            lines,
            parser,
            pending: None,
            stats: MergeStats::default(),
        }
    }

    pub fn stats(&self) -> MergeStats {
        self.stats
    }

    /// Whether a line is currently buffered awaiting its continuation.
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    fn feed(&mut self, line: String) -> Option<ParsedError> {
        if let Ok(record) = self.parser.parse_line(&line) {
            if self.pending.take().is_some() {
                self.stats.dropped += 1;
            }
            self.stats.parsed += 1;
            return Some(record);
        }

        let Some(previous) = self.pending.take() else {
            self.pending = Some(line);
            return None;
        };

        let joined = format!("{} {}", previous.trim(), line.trim());
        match self.parser.parse_line(&joined) {
            Ok(record) => {
                self.stats.merged += 1;
                Some(record)
            }
            Err(_) => {
                self.stats.dropped += 2;
                None
            }
        }
    }
}

impl<I, P> Iterator for ContinuationMerger<'_, I, P>
where
    I: Iterator<Item = String>,
    P: LineParser + ?Sized,
{
    type Item = ParsedError;

    fn next(&mut self) -> Option<ParsedError> {
        loop {
            match self.lines.next() {
                Some(line) => {
                    if let Some(record) = self.feed(line) {
                        return Some(record);
                    }
                }
                None => {
                    if self.pending.take().is_some() {
                        self.stats.dropped += 1;
                    }
                    return None;
                }
            }
        }
    }
}
