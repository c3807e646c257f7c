//! Line framing for the agent subprocess's stdio.
//!
//! Frames are raw bytes split on `\n`, so a line that is not valid UTF-8 is
//! still a line: the output duty can drop it on its own and keep going, and
//! the input duty can copy bytes through untouched. A maximum line length
//! keeps a child that never writes a newline from making the gateway buffer
//! without bound.
//!
//! The decoder never fails on content. [`tokio_util::codec::FramedRead`]
//! ends its stream after a decoder error, so an oversized line is reported
//! as [`Frame::TooLong`] instead and decoding resumes after its newline.

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::Decoder;

use crate::{AppError, Result};

/// Longest accepted line: 1 MiB, newline excluded.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// One decoded unit of input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete line, trailing `\n` included when the input had one.
    Line(Bytes),
    /// A line longer than the limit; its bytes were discarded.
    TooLong,
}

/// Newline-delimited byte codec with a [`MAX_LINE_BYTES`] limit.
#[derive(Debug)]
pub struct LineCodec {
    max: usize,
    next_index: usize,
    discarding: bool,
}

impl LineCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_BYTES)
    }

    /// Create a codec with a custom limit.
    #[must_use]
    pub fn with_max_length(max: usize) -> Self {
        Self {
            max,
            next_index: 0,
            discarding: false,
        }
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineCodec {
    type Item = Frame;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        loop {
            let read_to = src.len().min(self.max.saturating_add(1));
            let newline = src[self.next_index..read_to]
                .iter()
                .position(|b| *b == b'\n')
                .map(|offset| self.next_index + offset);

            match (self.discarding, newline) {
                (true, Some(at)) => {
                    src.advance(at + 1);
                    self.discarding = false;
                    self.next_index = 0;
                }
                (true, None) => {
                    src.advance(read_to);
                    self.next_index = 0;
                    if src.is_empty() {
                        return Ok(None);
                    }
                }
                (false, Some(at)) => {
                    self.next_index = 0;
                    return Ok(Some(Frame::Line(src.split_to(at + 1).freeze())));
                }
                (false, None) if src.len() > self.max => {
                    self.discarding = true;
                    self.next_index = 0;
                    return Ok(Some(Frame::TooLong));
                }
                (false, None) => {
                    self.next_index = read_to;
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        self.next_index = 0;
        if self.discarding {
            self.discarding = false;
            src.clear();
            return Ok(None);
        }
        if src.is_empty() {
            return Ok(None);
        }
        Ok(Some(Frame::Line(src.split().freeze())))
    }
}
