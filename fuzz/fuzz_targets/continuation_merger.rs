#![no_main]

use std::io::Cursor;

use errdigest::readers::BoundedLineReader;
use errdigest::{ContinuationMerger, ErrorLogParser};
use libfuzzer_sys::fuzz_target;

const MAX_INPUT_LEN: usize = 16 * 1024;

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    // First byte picks the fragment size so short and long line limits both get exercised.
    let max_line = 8 + data[0] as usize * 4;
    let input = &data[1..data.len().min(MAX_INPUT_LEN)];

    let mut reader = BoundedLineReader::new(Cursor::new(input), max_line);
    let lines: Vec<String> = reader.by_ref().map_while(Result::ok).collect();
    let total = lines.len();

    let parser = ErrorLogParser::default();
    let mut merger = ContinuationMerger::new(lines.into_iter(), &parser);
    let emitted = merger.by_ref().count();
    let stats = merger.stats();

    assert_eq!(emitted, stats.parsed + stats.merged);
    assert_eq!(stats.parsed + 2 * stats.merged + stats.dropped, total);

    let read = reader.stats();
    assert_eq!(read.lines_read + read.fragments - read.blank_lines, total);
});
