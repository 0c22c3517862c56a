//! Reply-frame reassembly for backend command channels.

use tracing::warn;

/// Parser position inside one reply frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    /// Waiting for the opening `BEGIN` token.
    Begin,
    /// Waiting for the echoed directive name.
    Command,
    /// Waiting for `SUCCESS` or `ERROR`.
    Result,
    /// Waiting for `DATA` or an immediate `END`.
    Data,
    /// Waiting for the payload line count.
    LineCount,
    /// Consuming counted payload lines.
    Lines,
    /// Waiting for the closing `END` token.
    End,
    /// A full reply has been assembled.
    Done,
    /// No reply arrived before the command deadline.
    NoData,
    /// The frame violated the protocol.
    BadData,
}

/// Overall outcome of one parse cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyOutcome {
    /// Complete frame with `SUCCESS`.
    Ok,
    /// Complete frame with `ERROR`.
    Fail,
    /// Frame could not be parsed.
    CantParse,
    /// The command deadline expired first.
    Timeout,
    /// More lines are needed.
    Incomplete,
}

/// Deterministic FSM consuming reply lines from one backend until a full reply is assembled.
///
/// The owner feeds every line arriving on the command channel and checks [`is_completed`]
/// after each one; once complete, the command name, success flag and payload are available
/// until [`reset`] arms the parser for the next frame.
///
/// [`is_completed`]: ReplyParser::is_completed
/// [`reset`]: ReplyParser::reset
#[derive(Debug)]
pub struct ReplyParser {
    state: ParserState,
    command: String,
    success: bool,
    lines: Vec<String>,
    last_line: String,
    countdown: usize,
}

impl Default for ReplyParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplyParser {
    /// Creates a parser armed for a fresh frame.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: ParserState::Begin,
            command: String::new(),
            success: false,
            lines: Vec::new(),
            last_line: String::new(),
            countdown: 0,
        }
    }

    /// Re-arms the parser for the next frame.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Consumes one reply line; trailing whitespace is ignored.
    pub fn feed(&mut self, line: &str) {
        let input = line.trim_end_matches([' ', '\t', '\n', '\r']);
        self.last_line = input.to_owned();
        self.state = match self.state {
            ParserState::Begin => {
                if input == "BEGIN" {
                    ParserState::Command
                } else {
                    ParserState::BadData
                }
            }
            ParserState::Command => {
                if input.is_empty() {
                    ParserState::BadData
                } else {
                    self.command = input.to_owned();
                    ParserState::Result
                }
            }
            ParserState::Result => match input {
                "SUCCESS" => {
                    self.success = true;
                    ParserState::Data
                }
                "ERROR" => {
                    self.success = false;
                    ParserState::Data
                }
                _ => ParserState::BadData,
            },
            ParserState::Data => match input {
                "DATA" => ParserState::LineCount,
                "END" => ParserState::Done,
                _ => ParserState::BadData,
            },
            ParserState::LineCount => match input.parse::<usize>() {
                Ok(0) => ParserState::End,
                Ok(count) => {
                    self.countdown = count;
                    ParserState::Lines
                }
                Err(_) => ParserState::BadData,
            },
            ParserState::Lines => {
                if input.is_empty() {
                    ParserState::BadData
                } else {
                    self.lines.push(input.to_owned());
                    self.countdown -= 1;
                    if self.countdown == 0 {
                        ParserState::End
                    } else {
                        ParserState::Lines
                    }
                }
            }
            ParserState::End => {
                if input == "END" {
                    ParserState::Done
                } else {
                    ParserState::BadData
                }
            }
            state @ (ParserState::Done | ParserState::NoData | ParserState::BadData) => {
                warn!(line = input, "reply parser skipping data");
                state
            }
        };
        if self.state == ParserState::BadData {
            warn!(line = input, "reply parser: bad input");
        }
    }

    /// Reports whether a terminal state has been reached.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(
            self.state,
            ParserState::Done | ParserState::NoData | ParserState::BadData
        )
    }

    /// Returns the terminal outcome, or `Incomplete` while mid-frame.
    #[must_use]
    pub fn outcome(&self) -> ReplyOutcome {
        match self.state {
            ParserState::Done => {
                if self.success {
                    ReplyOutcome::Ok
                } else {
                    ReplyOutcome::Fail
                }
            }
            ParserState::BadData => ReplyOutcome::CantParse,
            ParserState::NoData => ReplyOutcome::Timeout,
            _ => ReplyOutcome::Incomplete,
        }
    }

    /// Returns the current parser position.
    #[must_use]
    pub fn state(&self) -> ParserState {
        self.state
    }

    /// Returns the directive name echoed by the reply.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Returns the assembled payload lines.
    #[must_use]
    pub fn payload(&self) -> &[String] {
        &self.lines
    }

    /// Returns the most recently consumed line, for diagnostics.
    #[must_use]
    pub fn last_line(&self) -> &str {
        &self.last_line
    }
}

#[cfg(test)]
mod tests {
    use super::{ParserState, ReplyOutcome, ReplyParser};
    use googletest::prelude::*;
    use rstest::rstest;

    fn feed_all(parser: &mut ReplyParser, lines: &[&str]) {
        for line in lines {
            parser.feed(line);
        }
    }

    #[rstest]
    fn assembles_a_success_reply_with_payload() {
        let mut parser = ReplyParser::new();
        feed_all(
            &mut parser,
            &[
                "BEGIN",
                "GET_BACKEND_INFO",
                "SUCCESS",
                "DATA",
                "1",
                "std 42 lame /dev/null",
                "END",
            ],
        );
        assert_that!(parser.is_completed(), eq(true));
        assert_that!(parser.outcome(), eq(ReplyOutcome::Ok));
        assert_that!(parser.command(), eq("GET_BACKEND_INFO"));
        assert_that!(
            parser.payload(),
            eq(&["std 42 lame /dev/null".to_owned()][..])
        );
    }

    #[rstest]
    fn assembles_a_payloadless_reply() {
        let mut parser = ReplyParser::new();
        feed_all(&mut parser, &["BEGIN", "SEND_ONCE Vol+", "SUCCESS", "END"]);
        assert_that!(parser.outcome(), eq(ReplyOutcome::Ok));
        assert_that!(parser.payload().is_empty(), eq(true));
    }

    #[rstest]
    fn error_replies_report_fail() {
        let mut parser = ReplyParser::new();
        feed_all(
            &mut parser,
            &["BEGIN", "SEND_ONCE Vol+", "ERROR", "DATA", "1", "transmission failed", "END"],
        );
        assert_that!(parser.outcome(), eq(ReplyOutcome::Fail));
        assert_that!(parser.last_line(), eq("END"));
    }

    #[rstest]
    fn zero_line_data_block_goes_straight_to_end() {
        let mut parser = ReplyParser::new();
        feed_all(&mut parser, &["BEGIN", "LIST", "SUCCESS", "DATA", "0", "END"]);
        assert_that!(parser.outcome(), eq(ReplyOutcome::Ok));
        assert_that!(parser.payload().is_empty(), eq(true));
    }

    #[rstest]
    #[case(&["nonsense"][..])]
    #[case(&["BEGIN", ""][..])]
    #[case(&["BEGIN", "LIST", "MAYBE"][..])]
    #[case(&["BEGIN", "LIST", "SUCCESS", "PAYLOAD"][..])]
    #[case(&["BEGIN", "LIST", "SUCCESS", "DATA", "x"][..])]
    #[case(&["BEGIN", "LIST", "SUCCESS", "DATA", "2", ""][..])]
    #[case(&["BEGIN", "LIST", "SUCCESS", "DATA", "1", "a", "TRAILER"][..])]
    fn malformed_frames_end_in_bad_data(#[case] lines: &[&str]) {
        let mut parser = ReplyParser::new();
        feed_all(&mut parser, lines);
        assert_that!(parser.state(), eq(ParserState::BadData));
        assert_that!(parser.outcome(), eq(ReplyOutcome::CantParse));
    }

    #[rstest]
    fn reset_rearms_for_the_next_frame() {
        let mut parser = ReplyParser::new();
        feed_all(&mut parser, &["BEGIN", "VERSION", "SUCCESS", "END"]);
        parser.reset();
        assert_that!(parser.state(), eq(ParserState::Begin));
        assert_that!(parser.outcome(), eq(ReplyOutcome::Incomplete));
        feed_all(&mut parser, &["BEGIN", "LIST", "ERROR", "END"]);
        assert_that!(parser.outcome(), eq(ReplyOutcome::Fail));
        assert_that!(parser.command(), eq("LIST"));
    }

    #[rstest]
    fn completed_parser_ignores_further_lines() {
        let mut parser = ReplyParser::new();
        feed_all(&mut parser, &["BEGIN", "VERSION", "SUCCESS", "END", "BEGIN"]);
        assert_that!(parser.state(), eq(ParserState::Done));
        assert_that!(parser.outcome(), eq(ReplyOutcome::Ok));
    }
}
