//! Wire-level protocol pieces shared by the broker engine and its tests.
//!
//! The dispatcher speaks a line-oriented request protocol with multi-line `BEGIN`/`END` reply
//! frames. This crate owns the three building blocks below the routing layer: incremental line
//! splitting, frame encoding, and the reply parser that reassembles backend reply frames.

pub mod frame;
pub mod line_buffer;
pub mod reply_parser;
