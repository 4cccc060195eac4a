//! Streaming PackBits codec used for `.cap` printout storage.
//!
//! Captured jobs are written one byte at a time as they stream out of the
//! fan-out, so the encoder is a state machine rather than a buffer-at-once
//! transform: it tracks a pending literal span and a pending repeat run and
//! emits records as soon as they are decided.
//!
//! Record layout:
//! - literal: control byte `len - 1` (len 1..=128) followed by `len` raw bytes
//! - repeat: control byte `257 - count` (count 2..=128) followed by the value;
//!   longer runs continue with additional records of at most 127
//! - control byte 128 is reserved and skipped by the decoder

use std::io::{Read, Write};

const MAX_RUN: usize = 128;
const NOOP: u8 = 128;

#[derive(Debug, Clone, Copy, PartialEq)]
enum EncodeState {
    Idle,
    Literal,
    Repeat,
}

/// PackBits encoder over any byte sink.
///
/// Created per capture file and consumed by [`PackBitsWriter::finish`],
/// which flushes whatever run is still pending. Dropping the writer without
/// finishing loses that pending run.
pub struct PackBitsWriter<W: Write> {
    sink: W,
    state: EncodeState,
    last: u8,
    literal: [u8; MAX_RUN],
    literal_len: usize,
    repeat: usize,
}

impl<W: Write> PackBitsWriter<W> {
    pub fn new(sink: W) -> Self {
        PackBitsWriter {
            sink,
            state: EncodeState::Idle,
            last: 0,
            literal: [0; MAX_RUN],
            literal_len: 0,
            repeat: 0,
        }
    }

    fn flush_literal(&mut self) -> std::io::Result<()> {
        if self.literal_len > 0 {
            self.sink.write_all(&[(self.literal_len - 1) as u8])?;
            self.sink.write_all(&self.literal[..self.literal_len])?;
            self.literal_len = 0;
        }
        Ok(())
    }

    fn flush_repeat(&mut self) -> std::io::Result<()> {
        while self.repeat > 0 {
            // Continuation records use at most 127 so the remainder can
            // never be left at 1, which a repeat record cannot express.
            let size = if self.repeat <= MAX_RUN {
                self.repeat
            } else {
                MAX_RUN - 1
            };
            self.sink.write_all(&[(257 - size) as u8, self.last])?;
            self.repeat -= size;
        }
        Ok(())
    }

    /// Feed one byte of the uncompressed stream.
    pub fn write_byte(&mut self, byte: u8) -> std::io::Result<()> {
        match self.state {
            EncodeState::Idle => {
                self.state = EncodeState::Literal;
            }
            EncodeState::Literal => {
                if self.last != byte {
                    if self.literal_len >= MAX_RUN {
                        self.flush_literal()?;
                    }
                    self.literal[self.literal_len] = self.last;
                    self.literal_len += 1;
                } else {
                    self.flush_literal()?;
                    self.repeat = 2;
                    self.state = EncodeState::Repeat;
                }
            }
            EncodeState::Repeat => {
                if self.last == byte {
                    self.repeat += 1;
                } else {
                    self.flush_repeat()?;
                    self.state = EncodeState::Literal;
                }
            }
        }
        self.last = byte;
        Ok(())
    }

    /// Write a whole buffer through the byte-at-a-time state machine.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        for &byte in bytes {
            self.write_byte(byte)?;
        }
        Ok(())
    }

    /// Flush the pending run as if the input had ended and return the sink.
    pub fn finish(mut self) -> std::io::Result<W> {
        match self.state {
            EncodeState::Idle => {}
            EncodeState::Literal => {
                if self.literal_len >= MAX_RUN {
                    self.flush_literal()?;
                }
                self.literal[self.literal_len] = self.last;
                self.literal_len += 1;
                self.flush_literal()?;
            }
            EncodeState::Repeat => {
                self.flush_repeat()?;
            }
        }
        self.sink.flush()?;
        Ok(self.sink)
    }
}

#[derive(Debug, Clone, Copy)]
enum DecodeState {
    Idle,
    Literal { remaining: usize },
    Repeat { remaining: usize, value: u8 },
}

/// Streaming PackBits decoder, the inverse of [`PackBitsWriter`].
///
/// Reconstructs the original stream one byte per call. Truncated input ends
/// the stream cleanly rather than erroring mid-record, mirroring how a
/// partially written capture file is replayed as far as it goes.
pub struct PackBitsReader<R: Read> {
    source: R,
    state: DecodeState,
}

impl<R: Read> PackBitsReader<R> {
    pub fn new(source: R) -> Self {
        PackBitsReader {
            source,
            state: DecodeState::Idle,
        }
    }

    fn read_source(&mut self) -> std::io::Result<Option<u8>> {
        let mut byte = [0u8; 1];
        loop {
            match self.source.read(&mut byte) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(byte[0])),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Next byte of the decoded stream, or `None` at end of input.
    pub fn read_byte(&mut self) -> std::io::Result<Option<u8>> {
        loop {
            match &mut self.state {
                DecodeState::Idle => {
                    let control = match self.read_source()? {
                        Some(byte) => byte,
                        None => return Ok(None),
                    };
                    if control == NOOP {
                        continue;
                    }
                    if control > NOOP {
                        let value = match self.read_source()? {
                            Some(byte) => byte,
                            None => return Ok(None),
                        };
                        let count = 257 - control as usize;
                        self.state = DecodeState::Repeat {
                            remaining: count - 1,
                            value,
                        };
                        return Ok(Some(value));
                    }
                    let byte = match self.read_source()? {
                        Some(byte) => byte,
                        None => return Ok(None),
                    };
                    self.state = DecodeState::Literal {
                        remaining: control as usize,
                    };
                    return Ok(Some(byte));
                }
                DecodeState::Literal { remaining } => {
                    let remaining = *remaining;
                    if remaining == 0 {
                        self.state = DecodeState::Idle;
                        continue;
                    }
                    let byte = match self.read_source()? {
                        Some(byte) => byte,
                        None => return Ok(None),
                    };
                    self.state = DecodeState::Literal {
                        remaining: remaining - 1,
                    };
                    return Ok(Some(byte));
                }
                DecodeState::Repeat { remaining, value } => {
                    if *remaining == 0 {
                        self.state = DecodeState::Idle;
                        continue;
                    }
                    *remaining -= 1;
                    return Ok(Some(*value));
                }
            }
        }
    }

    pub fn into_inner(self) -> R {
        self.source
    }
}
