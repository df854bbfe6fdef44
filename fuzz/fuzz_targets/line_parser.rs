#![no_main]

use errdigest::parsers::error_log::parse_line;
use errdigest::ErrorFingerprint;
use libfuzzer_sys::fuzz_target;

const MAX_LINE_LEN: usize = 4096;

fuzz_target!(|data: &[u8]| {
    let line = String::from_utf8_lossy(&data[..data.len().min(MAX_LINE_LEN)]);

    if let Ok(parsed) = parse_line(&line) {
        assert!(parsed.source_line > 0);
        assert!(!parsed.severity.is_empty());
        assert_eq!(ErrorFingerprint::for_error(&parsed).as_str().len(), 64);
    }
});
