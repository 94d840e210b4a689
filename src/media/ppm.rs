//! Incremental binary PPM (`P6`) parser
//!
//! Input arrives in arbitrary chunks. Header fields are whitespace separated
//! tokens and only count once their terminating whitespace has been seen;
//! the body is exactly `width * height * 3` bytes following the single
//! whitespace byte after maxval.

use bytes::{Buf, Bytes, BytesMut};

use crate::error::MediaError;

/// Longest header token accepted before the buffered bytes are discarded
const MAX_TOKEN_LEN: usize = 16;

/// One decoded RGB frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    /// Packed RGB, 8 bits per sample
    pub data: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitMagic,
    AwaitDimensions { width: Option<u32> },
    AwaitMaxval { width: u32, height: u32 },
    AwaitBody { width: u32, height: u32 },
}

enum Step {
    Progress,
    Frame(RawFrame),
    NeedMore,
}

pub struct PpmParser {
    buf: BytesMut,
    state: State,
    max_dimension: u32,
}

impl PpmParser {
    pub fn new(max_dimension: u32) -> Self {
        Self {
            buf: BytesMut::new(),
            state: State::AwaitMagic,
            max_dimension,
        }
    }

    /// Feed a chunk, returning every frame it completes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<RawFrame> {
        self.buf.extend_from_slice(chunk);

        let mut frames = Vec::new();
        loop {
            match self.advance() {
                Ok(Step::Progress) => {}
                Ok(Step::Frame(frame)) => frames.push(frame),
                Ok(Step::NeedMore) => break,
                Err(e) => {
                    tracing::debug!("Discarding frame header: {}", e);
                    self.state = State::AwaitMagic;
                }
            }
        }
        frames
    }

    /// Drop buffered input and wait for the next magic
    pub fn reset(&mut self) {
        self.buf.clear();
        self.state = State::AwaitMagic;
    }

    /// Bytes held while waiting for more input
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    fn advance(&mut self) -> Result<Step, MediaError> {
        match self.state {
            State::AwaitMagic => {
                let Some(token) = self.take_token() else {
                    return Ok(Step::NeedMore);
                };
                if token != b"P6" {
                    return Err(MediaError::BadMagic(lossy(&token)));
                }
                self.state = State::AwaitDimensions { width: None };
            }
            State::AwaitDimensions { width } => {
                let Some(token) = self.take_token() else {
                    return Ok(Step::NeedMore);
                };
                let value = parse_number(&token)
                    .filter(|v| (1..=self.max_dimension).contains(v))
                    .ok_or_else(|| MediaError::InvalidDimensions(lossy(&token)))?;
                self.state = match width {
                    None => State::AwaitDimensions { width: Some(value) },
                    Some(width) => State::AwaitMaxval { width, height: value },
                };
            }
            State::AwaitMaxval { width, height } => {
                let Some(token) = self.take_token() else {
                    return Ok(Step::NeedMore);
                };
                parse_number(&token)
                    .filter(|v| (1..=255).contains(v))
                    .ok_or_else(|| MediaError::UnsupportedMaxval(lossy(&token)))?;
                self.state = State::AwaitBody { width, height };
            }
            State::AwaitBody { width, height } => {
                let len = width as usize * height as usize * 3;
                if self.buf.len() < len {
                    self.buf.reserve(len - self.buf.len());
                    return Ok(Step::NeedMore);
                }
                let data = self.buf.split_to(len).freeze();
                self.state = State::AwaitMagic;
                return Ok(Step::Frame(RawFrame { width, height, data }));
            }
        }
        Ok(Step::Progress)
    }

    /// Consume the next complete header token and its terminating whitespace
    /// byte. Leading whitespace and `#` comments are skipped.
    fn take_token(&mut self) -> Option<Vec<u8>> {
        loop {
            let skip = self.buf.iter().take_while(|b| b.is_ascii_whitespace()).count();
            self.buf.advance(skip);

            if self.buf.first() != Some(&b'#') {
                break;
            }
            let newline = self.buf.iter().position(|&b| b == b'\n')?;
            self.buf.advance(newline + 1);
        }

        match self.buf.iter().position(|b| b.is_ascii_whitespace()) {
            Some(end) => {
                let token = self.buf.split_to(end).to_vec();
                self.buf.advance(1);
                Some(token)
            }
            None if self.buf.len() > MAX_TOKEN_LEN => {
                let garbage = self.buf.split_to(MAX_TOKEN_LEN).to_vec();
                let rest = self.buf.iter().take_while(|b| !b.is_ascii_whitespace()).count();
                self.buf.advance(rest);
                Some(garbage)
            }
            None => None,
        }
    }
}

fn parse_number(token: &[u8]) -> Option<u32> {
    std::str::from_utf8(token).ok()?.parse().ok()
}

fn lossy(token: &[u8]) -> String {
    String::from_utf8_lossy(token).into_owned()
}
