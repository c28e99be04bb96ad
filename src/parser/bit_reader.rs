//! Bounded bit-level reader over a data stream buffer.

use super::field_class::ByteOrder;
use crate::utils::error::DecodeError;

#[derive(Debug)]
pub struct BitReader<'a> {
    data: &'a [u8],
    /// Current position in bits
    pos: u64,
    /// Reads may not extend past this bit offset
    limit: u64,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            limit: data.len() as u64 * 8,
        }
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Total size of the underlying buffer in bits
    pub fn size_bits(&self) -> u64 {
        self.data.len() as u64 * 8
    }

    /// Set the read limit, clamped to the buffer size
    pub fn set_limit(&mut self, limit: u64) {
        self.limit = limit.min(self.size_bits());
    }

    pub fn seek(&mut self, pos: u64) {
        self.pos = pos;
    }

    /// Advance to the next multiple of `alignment` bits
    pub fn align(&mut self, alignment: u64) -> Result<(), DecodeError> {
        if alignment > 1 {
            let aligned = self.pos.div_ceil(alignment) * alignment;
            self.check(aligned - self.pos)?;
            self.pos = aligned;
        }
        Ok(())
    }

    fn check(&self, bits: u64) -> Result<(), DecodeError> {
        if self.pos.saturating_add(bits) > self.limit {
            return Err(DecodeError::OutOfBounds {
                offset: self.pos,
                requested: bits,
                limit: self.limit,
            });
        }
        Ok(())
    }

    /// Read `len` bits (at most 64) as an unsigned value
    ///
    /// Little-endian values take bits LSB-first from each byte and fill
    /// the result from its least significant bit. Big-endian values take
    /// bits MSB-first and fill the result from its most significant bit.
    pub fn read_bits(&mut self, len: u32, order: ByteOrder) -> Result<u64, DecodeError> {
        debug_assert!(len <= 64);
        let len64 = u64::from(len);
        self.check(len64)?;

        let value = if self.pos % 8 == 0 && len % 8 == 0 {
            let start = (self.pos / 8) as usize;
            let bytes = &self.data[start..start + (len / 8) as usize];
            match order {
                ByteOrder::Little => bytes
                    .iter()
                    .rev()
                    .fold(0u64, |acc, &b| (acc << 8) | u64::from(b)),
                ByteOrder::Big => bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b)),
            }
        } else {
            let mut v = 0u64;
            for i in 0..len64 {
                let bit_pos = self.pos + i;
                let byte = self.data[(bit_pos / 8) as usize];
                match order {
                    ByteOrder::Little => {
                        let bit = (byte >> (bit_pos % 8)) & 1;
                        v |= u64::from(bit) << i;
                    }
                    ByteOrder::Big => {
                        let bit = (byte >> (7 - bit_pos % 8)) & 1;
                        v = (v << 1) | u64::from(bit);
                    }
                }
            }
            v
        };

        self.pos += len64;
        Ok(value)
    }

    /// Read whole bytes; the position must be byte-aligned
    pub fn read_bytes(&mut self, count: u64) -> Result<&'a [u8], DecodeError> {
        self.align(8)?;
        let bits = count.checked_mul(8).ok_or(DecodeError::OutOfBounds {
            offset: self.pos,
            requested: u64::MAX,
            limit: self.limit,
        })?;
        self.check(bits)?;
        let start = (self.pos / 8) as usize;
        let bytes = &self.data[start..start + count as usize];
        self.pos += bits;
        Ok(bytes)
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.read_bits(8, ByteOrder::Little)? as u8)
    }
}
