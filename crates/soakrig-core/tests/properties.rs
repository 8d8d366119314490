//! Property tests for line decoding, the line ring and the capture parser.

use proptest::prelude::*;
use soakrig_core::line_codec::{LineDecoder, split_lines};
use soakrig_core::probe::{CaptureParser, ParserState};
use soakrig_core::ring_buffer::RingBuffer;

fn console_bytes() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(
        prop_oneof![
            3 => prop::sample::select(b"abc xyz_0123".to_vec()),
            1 => Just(b'\r'),
            1 => Just(b'\n'),
            1 => Just(b' '),
            1 => Just(b'\t'),
        ],
        0..200,
    )
}

proptest! {
    #[test]
    fn decoded_lines_are_normalized(bytes in console_bytes()) {
        let mut decoder = LineDecoder::new();
        let mut lines = decoder.push(&bytes);
        lines.extend(decoder.finish());

        for line in &lines {
            prop_assert!(!line.is_empty());
            prop_assert!(!line.contains('\r'));
            prop_assert!(!line.contains('\n'));
        }

        // Everything between terminators survives untouched, whitespace too.
        let text = String::from_utf8(bytes).unwrap();
        let expected: Vec<String> = text
            .split(['\r', '\n'])
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .collect();
        prop_assert_eq!(lines, expected);
    }

    #[test]
    fn chunking_does_not_change_lines(bytes in console_bytes(), split in 0usize..200) {
        let split = split.min(bytes.len());
        let mut decoder = LineDecoder::new();
        let mut chunked = decoder.push(&bytes[..split]);
        chunked.extend(decoder.push(&bytes[split..]));
        chunked.extend(decoder.finish());

        let whole = split_lines(&String::from_utf8(bytes).unwrap());
        prop_assert_eq!(chunked, whole);
    }

    #[test]
    fn ring_keeps_newest_in_order(capacity in 1usize..32, count in 0usize..100) {
        let mut ring = RingBuffer::new(capacity);
        for i in 0..count {
            let evicted = ring.push(i);
            if i >= capacity {
                prop_assert_eq!(evicted, Some(i - capacity));
            } else {
                prop_assert_eq!(evicted, None);
            }
            prop_assert!(ring.len() <= capacity);
        }

        let held: Vec<usize> = ring.iter().copied().collect();
        let expected: Vec<usize> = (count.saturating_sub(capacity)..count).collect();
        prop_assert_eq!(held, expected);
        prop_assert_eq!(ring.total_pushed(), count as u64);
    }

    #[test]
    fn since_yields_only_newer_items(
        capacity in 1usize..32,
        before in 0usize..50,
        after in 0usize..50,
    ) {
        let mut ring = RingBuffer::new(capacity);
        for i in 0..before {
            ring.push(i);
        }
        let mark = ring.mark();
        for i in before..before + after {
            ring.push(i);
        }

        let newer: Vec<usize> = ring.since(mark).copied().collect();
        let first = (before + after).saturating_sub(capacity).max(before);
        let expected: Vec<usize> = (first..before + after).collect();
        prop_assert_eq!(newer, expected);
    }

    #[test]
    fn parser_collects_exactly_the_payload(
        payload in prop::collection::vec("[a-z0-9 ]{1,20}", 0..20),
        chatter in prop::collection::vec("[a-z]{1,10}", 0..5),
    ) {
        let tag = "1016_090000-0001";
        let mut parser = CaptureParser::new(tag, None);

        for line in &chatter {
            parser.feed(line);
        }
        parser.feed(&format!("__BEGIN__ {tag}"));
        for line in &payload {
            parser.feed(line);
        }
        parser.feed(&format!("__END__ {tag}"));
        // Anything after END is ignored.
        parser.feed("late");

        prop_assert_eq!(parser.state(), ParserState::Done);
        prop_assert_eq!(parser.payload(), payload.as_slice());
    }
}
