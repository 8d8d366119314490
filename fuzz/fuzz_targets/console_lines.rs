#![no_main]

use libfuzzer_sys::fuzz_target;
use soakrig_core::line_codec::LineDecoder;
use soakrig_core::probe::{CaptureParser, ParseStep, ParserState, parse_marker};

const TAG: &str = "1016_090000-0001";

fuzz_target!(|data: &[u8]| {
    // First byte picks the chunk size so terminators land across reads.
    let Some((&chunk, rest)) = data.split_first() else {
        return;
    };
    let chunk = usize::from(chunk).max(1);

    let mut decoder = LineDecoder::new();
    let mut parser = CaptureParser::new(TAG, Some("[NSLog]".to_string()));
    let mut lines = Vec::new();
    for piece in rest.chunks(chunk) {
        lines.extend(decoder.push(piece));
    }
    lines.extend(decoder.finish());

    let mut payload = 0usize;
    for line in &lines {
        assert!(!line.is_empty());
        assert!(!line.contains(['\r', '\n']));

        if let Some(marker) = parse_marker(line) {
            assert!(!marker.tag.is_empty());
        }

        let before = parser.state();
        match parser.feed(line) {
            ParseStep::Payload => payload += 1,
            ParseStep::Closed | ParseStep::Missing => {
                assert_ne!(before, ParserState::Done);
                assert_eq!(parser.state(), ParserState::Done);
            }
            _ => {}
        }
    }
    assert_eq!(parser.payload().len(), payload);
});
