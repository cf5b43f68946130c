//! Bit-level I/O for JPEG-LS scan data.
//!
//! Scan data uses the JPEG-LS stuffing rule instead of JPEG's 0xFF00 escape:
//! after a 0xFF byte the next byte carries only 7 data bits with a zero MSB,
//! so a marker (0xFF followed by a byte >= 0x80) can never appear inside a scan.

use thiserror::Error;

use super::context::QBPP;

/// Errors found while reading scan data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub(crate) enum StreamError {
    #[error("unexpected end of scan data")]
    UnexpectedEnd,

    #[error("invalid Golomb code")]
    InvalidCode,

    #[error("prediction error out of range")]
    ErrorOutOfRange,

    #[error("run length exceeds the line")]
    RunOverflow,
}

/// Writes scan data MSB first.
#[derive(Debug)]
pub(crate) struct BitWriter {
    bytes: Vec<u8>,
    current: u32,
    filled: u32,
    capacity: u32,
}

impl BitWriter {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
            current: 0,
            filled: 0,
            capacity: 8,
        }
    }

    pub(crate) fn write_bit(&mut self, bit: u32) {
        self.current = (self.current << 1) | (bit & 1);
        self.filled += 1;
        if self.filled == self.capacity {
            self.emit();
        }
    }

    /// Write the low `count` bits of `value`.
    pub(crate) fn write_bits(&mut self, value: u32, count: u32) {
        for shift in (0..count).rev() {
            self.write_bit(value >> shift);
        }
    }

    pub(crate) fn write_zeros(&mut self, count: u32) {
        for _ in 0..count {
            self.write_bit(0);
        }
    }

    /// Limited-length Golomb code of `value` with parameter `k`.
    ///
    /// `limit` is the longest codeword in bits; values whose unary prefix would
    /// reach `limit - QBPP - 1` are escaped and sent as `value - 1` in QBPP bits.
    pub(crate) fn write_golomb(&mut self, value: u32, k: u32, limit: u32) {
        let threshold = limit - QBPP - 1;
        let high = value >> k;
        if high < threshold {
            self.write_zeros(high);
            self.write_bit(1);
            self.write_bits(value, k);
        } else {
            self.write_zeros(threshold);
            self.write_bit(1);
            self.write_bits(value - 1, QBPP);
        }
    }

    fn emit(&mut self) {
        let byte = self.current as u8;
        self.bytes.push(byte);
        self.capacity = if byte == 0xFF { 7 } else { 8 };
        self.current = 0;
        self.filled = 0;
    }

    /// Pad the final byte with zeros and return the scan bytes.
    pub(crate) fn finish(mut self) -> Vec<u8> {
        if self.filled > 0 {
            self.current <<= self.capacity - self.filled;
            self.emit();
        }
        // A trailing 0xFF must be followed by a stuffed byte so the next
        // marker stays recognizable.
        if self.capacity == 7 {
            self.bytes.push(0x00);
        }
        self.bytes
    }
}

/// Reads scan data written by [`BitWriter`].
#[derive(Debug)]
pub(crate) struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
    current: u32,
    left: u32,
    previous_ff: bool,
}

impl<'a> BitReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            current: 0,
            left: 0,
            previous_ff: false,
        }
    }

    /// Bytes consumed so far, including a partially read byte.
    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    fn fill(&mut self) -> Result<(), StreamError> {
        let byte = *self.data.get(self.pos).ok_or(StreamError::UnexpectedEnd)?;
        if self.previous_ff {
            if byte & 0x80 != 0 {
                // A marker, not data.
                return Err(StreamError::UnexpectedEnd);
            }
            self.left = 7;
        } else {
            self.left = 8;
        }
        self.current = u32::from(byte);
        self.previous_ff = byte == 0xFF;
        self.pos += 1;
        Ok(())
    }

    pub(crate) fn read_bit(&mut self) -> Result<u32, StreamError> {
        if self.left == 0 {
            self.fill()?;
        }
        self.left -= 1;
        Ok((self.current >> self.left) & 1)
    }

    pub(crate) fn read_bits(&mut self, count: u32) -> Result<u32, StreamError> {
        let mut value = 0;
        for _ in 0..count {
            value = (value << 1) | self.read_bit()?;
        }
        Ok(value)
    }

    /// Inverse of [`BitWriter::write_golomb`].
    pub(crate) fn read_golomb(&mut self, k: u32, limit: u32) -> Result<u32, StreamError> {
        let threshold = limit - QBPP - 1;
        let mut zeros = 0;
        while self.read_bit()? == 0 {
            zeros += 1;
            if zeros > threshold {
                return Err(StreamError::InvalidCode);
            }
        }

        if zeros < threshold {
            Ok((zeros << k) | self.read_bits(k)?)
        } else {
            Ok(self.read_bits(QBPP)? + 1)
        }
    }
}
