// Cadenza
// Copyright (c) 2024 The Cadenza Project Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::errors::Result;
use crate::io::ByteStream;
use crate::util::bits::{sign_extend_leq32_to_i32, sign_extend_leq64_to_i64};

/// `BitStreamLtr` reads bits from most-significant to least-significant from
/// any source that implements [`ByteStream`].
///
/// Stated another way, if N bits are read from a `BitStreamLtr` then bit 0,
/// the first bit read, is the most-significant bit, and bit N-1, the last bit
/// read, is the least-significant.
///
/// The stream takes ownership of its source and refills an internal bit cache
/// from it byte-by-byte as reads demand.
pub struct BitStreamLtr<B: ByteStream> {
    reader: B,
    bits: u64,
    n_bits_left: u32,
}

impl<B: ByteStream> BitStreamLtr<B> {
    /// Instantiate a new `BitStreamLtr` with the given source.
    pub fn new(reader: B) -> Self {
        BitStreamLtr { reader, bits: 0, n_bits_left: 0 }
    }

    #[inline(always)]
    fn fetch_bits(&mut self) -> Result<()> {
        self.bits = u64::from(self.reader.read_byte()?) << 56;
        self.n_bits_left = u8::BITS;
        Ok(())
    }

    #[inline(always)]
    fn consume_bits(&mut self, num: u32) {
        self.n_bits_left -= num;
        self.bits <<= num;
    }

    /// Returns true iff the buffered bits are exhausted and the underlying
    /// source is at end-of-stream.
    pub fn is_eos(&mut self) -> bool {
        self.n_bits_left == 0 && self.reader.is_eos()
    }

    /// Discards any buffered bits so the next read starts at a byte boundary.
    /// The discarded bits are not required to be zero.
    pub fn realign(&mut self) {
        let skip = self.n_bits_left & 0x7;
        self.consume_bits(skip);
    }

    /// Read a single bit as a boolean value or returns an error.
    #[inline(always)]
    pub fn read_bit(&mut self) -> Result<bool> {
        if self.n_bits_left < 1 {
            self.fetch_bits()?;
        }

        let bit = self.bits & (1 << 63) != 0;

        self.consume_bits(1);
        Ok(bit)
    }

    /// Reads up to 32 bits and interprets them as an unsigned integer, or
    /// returns an error.
    #[inline(always)]
    pub fn read_bits_leq32(&mut self, mut bit_width: u32) -> Result<u32> {
        debug_assert!(bit_width <= u32::BITS);

        // Shift in two 32-bit operations instead of a single 64-bit operation
        // to avoid panicing when bit_width == 0 (and thus shifting right by
        // 64 bits). Reading up-to 32 bits at a time is the hot code-path.
        let mut bits = (self.bits >> u32::BITS) >> (u32::BITS - bit_width);

        while bit_width > self.n_bits_left {
            bit_width -= self.n_bits_left;

            self.fetch_bits()?;

            // Unlike the first shift, bit_width is always > 0 here so this
            // operation will never shift by > 63 bits.
            bits |= self.bits >> (u64::BITS - bit_width);
        }

        self.consume_bits(bit_width);

        Ok(bits as u32)
    }

    /// Reads up to 32 bits and interprets them as a signed two's complement
    /// integer, or returns an error.
    #[inline(always)]
    pub fn read_bits_leq32_signed(&mut self, bit_width: u32) -> Result<i32> {
        let value = self.read_bits_leq32(bit_width)?;
        Ok(sign_extend_leq32_to_i32(value, bit_width))
    }

    /// Reads up to 64 bits and interprets them as an unsigned integer, or
    /// returns an error.
    #[inline(always)]
    pub fn read_bits_leq64(&mut self, mut bit_width: u32) -> Result<u64> {
        debug_assert!(bit_width <= u64::BITS);

        // Hard-code the bit_width == 0 case as it is not possible to handle
        // both the bit_width == 0 and bit_width == 64 cases branchlessly.
        if bit_width == 0 {
            Ok(0)
        }
        else {
            // Since bit_width is always > 0, this shift operation is always
            // < 64, and will therefore never panic.
            let mut bits = self.bits >> (u64::BITS - bit_width);

            while bit_width > self.n_bits_left {
                bit_width -= self.n_bits_left;

                self.fetch_bits()?;

                bits |= self.bits >> (u64::BITS - bit_width);
            }

            // Shift in two parts to prevent panicing when bit_width == 64.
            self.consume_bits(bit_width - 1);
            self.consume_bits(1);

            Ok(bits)
        }
    }

    /// Reads up to 64 bits and interprets them as a signed two's complement
    /// integer, or returns an error.
    #[inline(always)]
    pub fn read_bits_leq64_signed(&mut self, bit_width: u32) -> Result<i64> {
        let value = self.read_bits_leq64(bit_width)?;
        Ok(sign_extend_leq64_to_i64(value, bit_width))
    }

    /// Reads and returns a unary zeros encoded integer, or an error. The
    /// terminating one bit is consumed.
    #[inline(always)]
    pub fn read_unary_zeros(&mut self) -> Result<u32> {
        let mut num = 0;

        loop {
            // Get the number of leading zeros in the cache. Bits beyond the
            // valid region of the cache are always zero.
            let n_zeros = self.bits.leading_zeros();

            if n_zeros >= self.n_bits_left {
                // All the remaining valid bits were zero.
                num += self.n_bits_left;
                self.fetch_bits()?;
            }
            else {
                // A one bit was encountered after `n_zeros` zero bits. Consume
                // the zero bits and the terminating one bit.
                num += n_zeros;

                self.consume_bits(n_zeros);
                self.consume_bits(1);

                break;
            }
        }

        Ok(num)
    }

    /// Reads one byte. The stream must be byte-aligned; used for skipping
    /// opaque metadata.
    #[inline(always)]
    pub fn read_aligned_byte(&mut self) -> Result<u8> {
        debug_assert!(self.n_bits_left & 0x7 == 0);
        Ok(self.read_bits_leq32(8)? as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::BitStreamLtr;
    use crate::io::BufReader;

    #[test]
    fn verify_bitstreamltr_read_bit() {
        // General tests.
        let mut bs = BitStreamLtr::new(BufReader::new(&[0b1010_1010]));

        assert_eq!(bs.read_bit().unwrap(), true);
        assert_eq!(bs.read_bit().unwrap(), false);
        assert_eq!(bs.read_bit().unwrap(), true);
        assert_eq!(bs.read_bit().unwrap(), false);
        assert_eq!(bs.read_bit().unwrap(), true);
        assert_eq!(bs.read_bit().unwrap(), false);
        assert_eq!(bs.read_bit().unwrap(), true);
        assert_eq!(bs.read_bit().unwrap(), false);

        // Error test.
        let mut bs = BitStreamLtr::new(BufReader::new(&[]));

        assert!(bs.read_bit().is_err());
    }

    #[test]
    fn verify_bitstreamltr_read_bits_leq32() {
        // General tests.
        let mut bs = BitStreamLtr::new(BufReader::new(&[0b1010_0101, 0b0111_1110, 0b1101_0011]));

        assert_eq!(bs.read_bits_leq32(4).unwrap(), 0b0000_0000_0000_1010);
        assert_eq!(bs.read_bits_leq32(4).unwrap(), 0b0000_0000_0000_0101);
        assert_eq!(bs.read_bits_leq32(13).unwrap(), 0b0000_1111_1101_1010);
        assert_eq!(bs.read_bits_leq32(3).unwrap(), 0b0000_0000_0000_0011);

        // Lower limit test.
        let mut bs = BitStreamLtr::new(BufReader::new(&[0xff, 0xff, 0xff, 0xff]));

        assert_eq!(bs.read_bits_leq32(0).unwrap(), 0);

        // Upper limit test.
        let mut bs = BitStreamLtr::new(BufReader::new(&[0xff, 0xff, 0xff, 0xff, 0x01]));

        assert_eq!(bs.read_bits_leq32(32).unwrap(), u32::MAX);
        assert_eq!(bs.read_bits_leq32(8).unwrap(), 0x01);

        // Test error cases.
        let mut bs = BitStreamLtr::new(BufReader::new(&[0xff]));

        assert!(bs.read_bits_leq32(9).is_err());
    }

    #[test]
    fn verify_bitstreamltr_read_bits_leq32_signed() {
        let mut bs = BitStreamLtr::new(BufReader::new(&[0xcf, 0x50]));

        assert_eq!(bs.read_bits_leq32_signed(4).unwrap(), -4);
        assert_eq!(bs.read_bits_leq32_signed(4).unwrap(), -1);
        assert_eq!(bs.read_bits_leq32_signed(4).unwrap(), 5);
        assert_eq!(bs.read_bits_leq32_signed(4).unwrap(), 0);
    }

    #[test]
    fn verify_bitstreamltr_read_bits_leq64() {
        // General tests.
        let mut bs = BitStreamLtr::new(BufReader::new(&[
            0x99, 0xaa, 0x55, 0xff, 0xff, 0x55, 0xaa, 0x99, //
            0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, //
        ]));

        assert_eq!(bs.read_bits_leq64(40).unwrap(), 0x99aa55ffff);
        assert_eq!(bs.read_bits_leq64(4).unwrap(), 0x05);
        assert_eq!(bs.read_bits_leq64(4).unwrap(), 0x05);
        assert_eq!(bs.read_bits_leq64(16).unwrap(), 0xaa99);
        assert_eq!(bs.read_bits_leq64(64).unwrap(), 0x1122334455667788);

        // Lower limit test.
        let mut bs = BitStreamLtr::new(BufReader::new(&[0xff; 8]));

        assert_eq!(bs.read_bits_leq64(0).unwrap(), 0);

        // Upper limit test.
        let mut bs = BitStreamLtr::new(BufReader::new(&[0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x01]));

        assert_eq!(bs.read_bits_leq64(64).unwrap(), u64::MAX);
        assert_eq!(bs.read_bits_leq64(8).unwrap(), 0x01);

        // Test error cases.
        let mut bs = BitStreamLtr::new(BufReader::new(&[0xff]));

        assert!(bs.read_bits_leq64(9).is_err());
    }

    #[test]
    fn verify_bitstreamltr_read_bits_leq64_signed() {
        // A 33-bit wide field, as read for a side channel at 32 bits per
        // sample, with the sign bit set.
        let mut bs = BitStreamLtr::new(BufReader::new(&[0x80, 0x00, 0x00, 0x00, 0x40]));

        assert_eq!(bs.read_bits_leq64_signed(33).unwrap(), -4_294_967_296);
    }

    #[test]
    fn verify_bitstreamltr_read_unary_zeros() {
        // General tests.
        let mut bs = BitStreamLtr::new(BufReader::new(&[
            0b0000_0001, 0b0001_0000, 0b0000_0000, 0b1000_0000, 0b1111_1011,
        ]));

        assert_eq!(bs.read_unary_zeros().unwrap(), 7);
        assert_eq!(bs.read_unary_zeros().unwrap(), 3);
        assert_eq!(bs.read_unary_zeros().unwrap(), 12);
        assert_eq!(bs.read_unary_zeros().unwrap(), 7);
        assert_eq!(bs.read_unary_zeros().unwrap(), 0);
        assert_eq!(bs.read_unary_zeros().unwrap(), 0);
        assert_eq!(bs.read_unary_zeros().unwrap(), 0);
        assert_eq!(bs.read_unary_zeros().unwrap(), 0);
        assert_eq!(bs.read_unary_zeros().unwrap(), 1);
        assert_eq!(bs.read_unary_zeros().unwrap(), 0);

        // Lower limit test.
        let mut bs = BitStreamLtr::new(BufReader::new(&[0x80]));

        assert_eq!(bs.read_unary_zeros().unwrap(), 0);

        // Error test.
        let mut bs = BitStreamLtr::new(BufReader::new(&[0x00, 0x00]));

        assert!(bs.read_unary_zeros().is_err());
    }

    #[test]
    fn verify_bitstreamltr_realign() {
        let mut bs = BitStreamLtr::new(BufReader::new(&[0b1011_1111, 0x5a, 0xc3]));

        assert_eq!(bs.read_bits_leq32(3).unwrap(), 0b101);

        // Discard the remaining five bits of the first byte.
        bs.realign();

        assert_eq!(bs.read_aligned_byte().unwrap(), 0x5a);
        assert_eq!(bs.read_aligned_byte().unwrap(), 0xc3);

        // Realigning an aligned stream consumes nothing.
        let mut bs = BitStreamLtr::new(BufReader::new(&[0x12, 0x34]));

        assert_eq!(bs.read_aligned_byte().unwrap(), 0x12);
        bs.realign();
        assert_eq!(bs.read_aligned_byte().unwrap(), 0x34);
    }

    #[test]
    fn verify_bitstreamltr_is_eos() {
        let mut bs = BitStreamLtr::new(BufReader::new(&[0xf0]));

        assert!(!bs.is_eos());

        assert_eq!(bs.read_bits_leq32(4).unwrap(), 0xf);

        // Bits remain buffered even though the source is exhausted.
        assert!(!bs.is_eos());

        assert_eq!(bs.read_bits_leq32(4).unwrap(), 0x0);

        assert!(bs.is_eos());
        assert!(bs.read_bit().is_err());
    }
}
