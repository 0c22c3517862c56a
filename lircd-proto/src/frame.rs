//! Reply-frame encoding and directive line splitting.
//!
//! Every reply is a multi-line frame delimited by `BEGIN` and `END`, echoing the caller's
//! directive line and carrying an optional counted `DATA` block. Encoding happens here at the
//! protocol boundary so routing logic never concatenates wire strings by hand.

const BEGIN: &str = "BEGIN\n";
const DATA: &str = "DATA\n";
const END: &str = "END\n";
const ERROR: &str = "ERROR\n";
const SUCCESS: &str = "SUCCESS\n";
const SIGHUP: &str = "SIGHUP\n";

/// Encodes a success frame without payload.
#[must_use]
pub fn success_frame(echo: &str) -> Vec<u8> {
    let echo = strip_line_ending(echo);
    format!("{BEGIN}{echo}\n{SUCCESS}{END}").into_bytes()
}

/// Encodes a success frame carrying a counted `DATA` block.
///
/// An empty payload collapses to the plain success frame; the `DATA` block is only present when
/// there is at least one payload line.
#[must_use]
pub fn success_data_frame(echo: &str, lines: &[String]) -> Vec<u8> {
    if lines.is_empty() {
        return success_frame(echo);
    }
    let echo = strip_line_ending(echo);
    let mut frame = format!("{BEGIN}{echo}\n{SUCCESS}{DATA}{}\n", lines.len());
    for line in lines {
        frame.push_str(line);
        frame.push('\n');
    }
    frame.push_str(END);
    frame.into_bytes()
}

/// Encodes an error frame; the message always travels in a `DATA` block.
#[must_use]
pub fn error_frame(echo: &str, message: &str) -> Vec<u8> {
    let echo = strip_line_ending(echo);
    let message = strip_line_ending(message);
    let count = message.lines().count().max(1);
    format!("{BEGIN}{echo}\n{ERROR}{DATA}{count}\n{message}\n{END}").into_bytes()
}

/// Encodes the unsolicited frame pushed to clients after a configuration reload.
#[must_use]
pub fn sighup_frame() -> Vec<u8> {
    format!("{BEGIN}{SIGHUP}{END}").into_bytes()
}

/// Splits a directive line into its name and the untouched remainder.
///
/// Returns `None` for blank lines. The remainder keeps internal spacing so routed arguments are
/// forwarded exactly as typed.
#[must_use]
pub fn split_directive(line: &str) -> Option<(&str, &str)> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.split_once(char::is_whitespace) {
        Some((directive, rest)) => Some((directive, rest.trim())),
        None => Some((trimmed, "")),
    }
}

/// Decoded argument of the SIMULATE control directive.
///
/// Callers pass `<remote> <keysym> <repeat> <scancode>` with a decimal repeat count and a hex
/// scancode; the backend wire form reverses the field order and fixes the field widths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulateKey {
    scancode: u64,
    repeat: u32,
    keysym: String,
    remote: String,
}

impl SimulateKey {
    /// Parses the caller-side argument layout.
    #[must_use]
    pub fn parse(input: &str) -> Option<Self> {
        let fields: Vec<&str> = input.split_whitespace().collect();
        let [remote, keysym, repeat, scancode] = fields.as_slice() else {
            return None;
        };
        Some(Self {
            scancode: u64::from_str_radix(scancode, 16).ok()?,
            repeat: repeat.parse().ok()?,
            keysym: (*keysym).to_owned(),
            remote: (*remote).to_owned(),
        })
    }

    /// Re-encodes the key event in the backend wire layout.
    #[must_use]
    pub fn to_wire(&self) -> String {
        format!(
            "{:016x} {:02x} {} {}",
            self.scancode, self.repeat, self.keysym, self.remote
        )
    }
}

fn strip_line_ending(text: &str) -> &str {
    text.trim_end_matches(['\n', '\r'])
}

#[cfg(test)]
mod tests {
    use super::{SimulateKey, error_frame, sighup_frame, split_directive, success_data_frame, success_frame};
    use googletest::prelude::*;
    use rstest::rstest;

    fn as_text(frame: Vec<u8>) -> String {
        String::from_utf8(frame).expect("frames are ASCII")
    }

    #[rstest]
    fn success_frame_echoes_the_directive() {
        assert_that!(
            as_text(success_frame("SEND_ONCE tv KEY_OK")),
            eq("BEGIN\nSEND_ONCE tv KEY_OK\nSUCCESS\nEND\n")
        );
    }

    #[rstest]
    fn success_data_frame_counts_payload_lines() {
        let payload = vec!["lame@/dev/null".to_owned(), "other@/dev/lirc0".to_owned()];
        assert_that!(
            as_text(success_data_frame("LIST_BACKENDS", &payload)),
            eq("BEGIN\nLIST_BACKENDS\nSUCCESS\nDATA\n2\nlame@/dev/null\nother@/dev/lirc0\nEND\n")
        );
    }

    #[rstest]
    fn empty_payload_omits_the_data_block() {
        assert_that!(
            as_text(success_data_frame("LIST_BACKENDS", &[])),
            eq("BEGIN\nLIST_BACKENDS\nSUCCESS\nEND\n")
        );
    }

    #[rstest]
    fn error_frame_always_carries_a_data_block() {
        assert_that!(
            as_text(error_frame("SEND_ONCE x y", "Backend unavailable")),
            eq("BEGIN\nSEND_ONCE x y\nERROR\nDATA\n1\nBackend unavailable\nEND\n")
        );
    }

    #[rstest]
    fn error_frame_strips_trailing_newlines_from_the_echo() {
        assert_that!(
            as_text(error_frame("VERSION\r\n", "nope\n")),
            eq("BEGIN\nVERSION\nERROR\nDATA\n1\nnope\nEND\n")
        );
    }

    #[rstest]
    fn sighup_frame_is_fixed() {
        assert_that!(as_text(sighup_frame()), eq("BEGIN\nSIGHUP\nEND\n"));
    }

    #[rstest]
    #[case("LIST", Some(("LIST", "")))]
    #[case("SEND_ONCE tv  KEY_OK", Some(("SEND_ONCE", "tv  KEY_OK")))]
    #[case("  VERSION  ", Some(("VERSION", "")))]
    #[case("", None)]
    #[case("   \t", None)]
    fn split_directive_separates_name_and_remainder(
        #[case] line: &str,
        #[case] expected: Option<(&str, &str)>,
    ) {
        assert_that!(split_directive(line), eq(expected));
    }

    #[rstest]
    fn simulate_key_reencodes_in_wire_order() {
        let key = SimulateKey::parse("tv KEY_OK 1 DEADBEEF").expect("well-formed input");
        assert_that!(key.to_wire(), eq("00000000deadbeef 01 KEY_OK tv"));
    }

    #[rstest]
    #[case("tv KEY_OK 1")]
    #[case("tv KEY_OK 1 DEADBEEF extra")]
    #[case("tv KEY_OK x DEADBEEF")]
    #[case("tv KEY_OK 1 GHIJ")]
    fn simulate_key_rejects_malformed_input(#[case] input: &str) {
        assert_that!(SimulateKey::parse(input), eq(&None));
    }
}
