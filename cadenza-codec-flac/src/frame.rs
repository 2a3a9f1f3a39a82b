// Cadenza
// Copyright (c) 2024 The Cadenza Project Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use cadenza_core::errors::{bad_reserved_error, decode_error, reserved_error, unsupported_error};
use cadenza_core::errors::{Error, Result};
use cadenza_core::io::{BitStreamLtr, ByteStream};
use cadenza_core::util::bits::count_leading_ones;

/// The 14-bit frame synchronization code.
const FRAME_SYNC_CODE: u32 = 0b1111_1111_1111_10;

/// `BlockingStrategy` describes how a stream sequences its frames.
#[derive(Debug)]
pub enum BlockingStrategy {
    Fixed,
    Variable,
}

/// `BlockSequence` is the frame or sample number decoded from a frame header.
#[derive(Debug)]
pub enum BlockSequence {
    ByFrame(u32),
    BySample(u64),
}

/// `ChannelAssignment` describes the mapping between the subframes decoded
/// from a frame and the channels those samples belong to. It is also through
/// the `ChannelAssignment` that the decoder is instructed on how to
/// decorrelate stereo channels.
///
/// For LeftSide or RightSide channel assignments, one channel is stored
/// independently while the other stores a difference. The difference is
/// always stored as Left - Right. For the MidSide channel assignment, no
/// channel is stored independently, rather, a Mid (average) channel and a
/// difference channel are stored.
#[derive(Debug)]
pub enum ChannelAssignment {
    /// All channels are independently coded and no decorrelation step is
    /// required.
    Independent(u32),
    /// Channel 0 is the Left channel, and channel 1 is a difference channel.
    /// The Right channel is restored by subtracting the difference channel
    /// from the Left channel (R = L - D).
    LeftSide,
    /// Channel 0 is the Mid channel (L/2 + R/2), and channel 1 is the
    /// difference channel (L - R).
    MidSide,
    /// Channel 0 is the difference channel, and channel 1 is the Right
    /// channel. The Left channel is restored by adding the difference channel
    /// to the Right channel (L = R + D).
    RightSide,
}

impl ChannelAssignment {
    /// The number of coded subframes for this assignment.
    pub fn n_channels(&self) -> u32 {
        match *self {
            ChannelAssignment::Independent(n) => n,
            _ => 2,
        }
    }
}

pub struct FrameHeader {
    pub block_sequence: BlockSequence,
    pub block_size: u16,
    pub sample_rate: Option<u32>,
    pub sample_bit_size: Option<u32>,
    pub channel_assignment: ChannelAssignment,
}

/// Reads one frame header from the bit stream, which must be positioned at
/// the start of a frame. The trailing CRC-8 is consumed but not verified.
pub fn read_frame_header<B: ByteStream>(bs: &mut BitStreamLtr<B>) -> Result<FrameHeader> {
    let sync = bs.read_bits_leq32(14)?;

    if sync != FRAME_SYNC_CODE {
        return Err(Error::BadSync(sync as u16));
    }

    if bs.read_bit()? {
        return bad_reserved_error("frame header bit 15");
    }

    let blocking_strategy =
        if bs.read_bit()? { BlockingStrategy::Variable } else { BlockingStrategy::Fixed };

    let block_size_enc = bs.read_bits_leq32(4)?;
    let sample_rate_enc = bs.read_bits_leq32(4)?;
    let channels_enc = bs.read_bits_leq32(4)?;
    let bit_size_enc = bs.read_bits_leq32(3)?;

    if bs.read_bit()? {
        return bad_reserved_error("frame header bit 31");
    }

    let block_sequence = match blocking_strategy {
        // Fixed-blocksize streams sequence blocks by a frame number.
        BlockingStrategy::Fixed => BlockSequence::ByFrame(utf8_coded_number(bs)? as u32),
        // Variable-blocksize streams sequence blocks by a sample number.
        BlockingStrategy::Variable => BlockSequence::BySample(utf8_coded_number(bs)?),
    };

    let block_size = match block_size_enc {
        0x1 => 192,
        0x2..=0x5 => (576 << (block_size_enc - 2)) as u16,
        0x6 => bs.read_bits_leq32(8)? as u16 + 1,
        0x7 => {
            let size = bs.read_bits_leq32(16)?;
            if size == 0xffff {
                return decode_error("flac: block size not allowed to be greater than 65535");
            }
            size as u16 + 1
        }
        0x8..=0xf => (256 << (block_size_enc - 8)) as u16,
        _ => return reserved_error("flac: block size code 0"),
    };

    let sample_rate = match sample_rate_enc {
        0x0 => None, // Get from StreamInfo.
        0x1 => Some(88_200),
        0x2 => Some(176_400),
        0x3 => Some(192_000),
        0x4 => Some(8_000),
        0x5 => Some(16_000),
        0x6 => Some(22_050),
        0x7 => Some(24_000),
        0x8 => Some(32_000),
        0x9 => Some(44_100),
        0xa => Some(48_000),
        0xb => Some(96_000),
        0xc => Some(bs.read_bits_leq32(8)? * 1000),
        0xd => Some(bs.read_bits_leq32(16)?),
        0xe => Some(bs.read_bits_leq32(16)? * 10),
        _ => return reserved_error("flac: sample rate code 15"),
    };

    let sample_bit_size = match bit_size_enc {
        0x0 => None, // Get from StreamInfo.
        0x1 => Some(8),
        0x2 => Some(12),
        0x4 => Some(16),
        0x5 => Some(20),
        0x6 => Some(24),
        0x7 => Some(32),
        _ => return reserved_error("flac: sample bit size code 3"),
    };

    let channel_assignment = match channels_enc {
        0x0..=0x7 => ChannelAssignment::Independent(channels_enc + 1),
        0x8 => ChannelAssignment::LeftSide,
        0x9 => ChannelAssignment::RightSide,
        0xa => ChannelAssignment::MidSide,
        _ => return unsupported_error("flac: channel assignment set to reserved value"),
    };

    // The frame header CRC-8 is consumed but not verified.
    let _crc8 = bs.read_bits_leq32(8)?;

    Ok(FrameHeader { block_sequence, block_size, sample_rate, sample_bit_size, channel_assignment })
}

/// Decodes the frame header's UTF-8-style coded number. In this context,
/// UTF-8-style means the sequence may be up to 7 bytes long for a maximum
/// payload width of 36 bits.
///
/// The leading ones of the first byte give the total sequence length in
/// bytes; the payload is consumed and returned without further validation.
fn utf8_coded_number<B: ByteStream>(bs: &mut BitStreamLtr<B>) -> Result<u64> {
    let first = bs.read_bits_leq32(8)? as u8;

    let n_ones = count_leading_ones(first);

    if n_ones == 0 {
        return Ok(u64::from(first));
    }

    // Mask the length prefix (and the zero bit terminating it) out of the
    // first byte to get the high-order payload bits.
    let mask = if n_ones < 8 { 0x7f >> n_ones } else { 0 };
    let mut state = u64::from(first & mask);

    // Each continuation byte carries six payload bits.
    for _ in 1..n_ones {
        state = (state << 6) | u64::from(bs.read_bits_leq32(8)? & 0x3f);
    }

    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadenza_core::io::BufReader;

    fn coded_number(buf: &[u8]) -> u64 {
        let mut bs = BitStreamLtr::new(BufReader::new(buf));
        utf8_coded_number(&mut bs).unwrap()
    }

    #[test]
    fn verify_utf8_coded_number() {
        assert_eq!(coded_number(&[0x24]), 36);
        assert_eq!(coded_number(&[0xc2, 0xa2]), 162);
        assert_eq!(coded_number(&[0xe0, 0xa4, 0xb9]), 2361);
        assert_eq!(coded_number(&[0xe2, 0x82, 0xac]), 8364);
        assert_eq!(coded_number(&[0xf0, 0x90, 0x8d, 0x88]), 66376);
        // A 7-byte sequence carries a full 36-bit payload.
        assert_eq!(
            coded_number(&[0xfe, 0xbf, 0xbf, 0xbf, 0xbf, 0xbf, 0xbf]),
            0x000f_ffff_ffff
        );
    }

    #[test]
    fn verify_read_frame_header() {
        // Sync, no reserved bits, fixed blocking, block size code 1 (192),
        // sample rate code 9 (44100), independent mono, 8 bits per sample,
        // frame number 0, dummy CRC-8.
        let buf = [0xff, 0xf8, 0x19, 0x02, 0x00, 0xc2];
        let mut bs = BitStreamLtr::new(BufReader::new(&buf));

        let header = read_frame_header(&mut bs).unwrap();

        assert_eq!(header.block_size, 192);
        assert_eq!(header.sample_rate, Some(44100));
        assert_eq!(header.sample_bit_size, Some(8));
        assert_eq!(header.channel_assignment.n_channels(), 1);

        match header.block_sequence {
            BlockSequence::ByFrame(frame) => assert_eq!(frame, 0),
            _ => panic!("expected a frame number"),
        }
    }

    #[test]
    fn verify_read_frame_header_explicit_fields() {
        // Block size code 6 (8-bit value follows), sample rate code 12
        // (8-bit kHz value follows), left/side stereo, 16 bits per sample.
        let buf = [0xff, 0xf8, 0x6c, 0x88, 0x00, 0x0f, 0x2c, 0x5a];
        let mut bs = BitStreamLtr::new(BufReader::new(&buf));

        let header = read_frame_header(&mut bs).unwrap();

        // Explicit block size is coded minus one.
        assert_eq!(header.block_size, 16);
        assert_eq!(header.sample_rate, Some(44_000));
        assert_eq!(header.sample_bit_size, Some(16));

        match header.channel_assignment {
            ChannelAssignment::LeftSide => (),
            ref other => panic!("expected left/side assignment, got {:?}", other),
        }
    }

    #[test]
    fn verify_read_frame_header_bad_sync() {
        let buf = [0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        let mut bs = BitStreamLtr::new(BufReader::new(&buf));

        match read_frame_header(&mut bs) {
            Err(Error::BadSync(_)) => (),
            _ => panic!("expected a bad sync error"),
        }
    }

    #[test]
    fn verify_read_frame_header_reserved_block_size() {
        // Block size code 0 is reserved.
        let buf = [0xff, 0xf8, 0x09, 0x02, 0x00, 0xc2];
        let mut bs = BitStreamLtr::new(BufReader::new(&buf));

        match read_frame_header(&mut bs) {
            Err(Error::Reserved(_)) => (),
            _ => panic!("expected a reserved code point error"),
        }
    }
}
