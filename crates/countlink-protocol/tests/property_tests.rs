//! Property-based tests for line framing and response parsing.
//!
//! Random inputs check that the decoder never panics on arbitrary bytes,
//! that framing is independent of how reads are chunked, and that every
//! well-formed counts line parses back to its values.

use bytes::BytesMut;
use proptest::prelude::*;
use tokio_util::codec::{Decoder, Encoder};

use countlink_protocol::{Command, LineCodec, parse_counts};

/// Strategy for response lines: printable ASCII without CR or LF.
fn response_line() -> impl Strategy<Value = String> {
    prop::string::string_regex("[ -~]{1,64}")
        .expect("Failed to create response line regex strategy")
        .prop_filter("line must not be blank", |line| !line.trim().is_empty())
}

/// Strategy for line endings the firmware may use.
fn terminator() -> impl Strategy<Value = &'static str> {
    prop_oneof![Just("\r"), Just("\n"), Just("\r\n")]
}

proptest! {
    /// Property: the decoder never panics, whatever arrives on the wire.
    #[test]
    fn prop_decode_arbitrary_bytes(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let mut codec = LineCodec::new();
        let mut buffer = BytesMut::from(&bytes[..]);
        while let Ok(Some(line)) = codec.decode(&mut buffer) {
            prop_assert!(!line.is_empty());
        }
    }

    /// Property: splitting a stream into arbitrary chunks yields the same lines.
    #[test]
    fn prop_chunking_does_not_change_lines(
        lines in prop::collection::vec((response_line(), terminator()), 1..8),
        chunk in 1usize..16,
    ) {
        let wire: String = lines.iter().map(|(line, end)| format!("{line}{end}")).collect();
        let expected: Vec<String> = lines.iter().map(|(line, _)| line.trim().to_string()).collect();

        let mut codec = LineCodec::new();
        let mut buffer = BytesMut::new();
        let mut decoded = Vec::new();
        for piece in wire.as_bytes().chunks(chunk) {
            buffer.extend_from_slice(piece);
            while let Some(line) = codec.decode(&mut buffer).unwrap() {
                decoded.push(line);
            }
        }

        prop_assert_eq!(decoded, expected);
    }

    /// Property: any printable single-line command is framed with exactly one CR.
    #[test]
    fn prop_encode_appends_single_terminator(command in "[ -~]{1,32}") {
        let mut codec = LineCodec::new();
        let mut out = BytesMut::new();
        codec.encode(command.as_str(), &mut out).unwrap();

        prop_assert_eq!(out.len(), command.len() + 1);
        prop_assert_eq!(out[out.len() - 1], b'\r');
        prop_assert!(!out[..out.len() - 1].contains(&b'\r'));
    }

    /// Property: a counts line with at least `channels + 1` integers parses
    /// to its first `channels` values and the overflow mask.
    #[test]
    fn prop_counts_line_parses(
        counts in prop::collection::vec(any::<u64>(), 8),
        overflow in 0u64..256,
        extra in prop::collection::vec(any::<u64>(), 0..3),
    ) {
        let mut fields: Vec<String> = counts.iter().map(u64::to_string).collect();
        fields.push(overflow.to_string());
        fields.extend(extra.iter().map(u64::to_string));
        let line = fields.join(" ");

        let reading = parse_counts("COUNTS?", &line, 8).unwrap();
        prop_assert_eq!(&reading.counts, &counts);
        prop_assert_eq!(reading.overflow, overflow);
    }

    /// Property: too few fields is always an invalid response, never a panic.
    #[test]
    fn prop_short_counts_line_is_rejected(counts in prop::collection::vec(any::<u64>(), 0..9)) {
        let line = counts.iter().map(u64::to_string).collect::<Vec<_>>().join(" ");
        prop_assert!(parse_counts("COUNTS?", &line, 8).is_err());
    }

    /// Property: window settings inside the accepted range render as `WINDOW <ns>`.
    #[test]
    fn prop_set_window_in_range(ns in 1u32..=10_000) {
        let command = Command::set_window(ns).unwrap();
        prop_assert_eq!(command.to_wire(), format!("WINDOW {ns}"));
    }

    /// Property: window settings outside the range never reach the wire.
    #[test]
    fn prop_set_window_out_of_range(ns in prop_oneof![Just(0u32), 10_001u32..]) {
        prop_assert!(Command::set_window(ns).is_err());
    }
}
