// Cadenza
// Copyright (c) 2024 The Cadenza Project Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use cadenza_core::audio::{SampleBuffer, MAX_CHANNELS};
use cadenza_core::errors::{decode_error, illegal_state_error, reserved_error, unsupported_error};
use cadenza_core::errors::{Error, Result};
use cadenza_core::io::{BitStreamLtr, ByteStream};

use log::{debug, info};

use crate::frame::{read_frame_header, ChannelAssignment};
use crate::metadata::{MetadataBlockHeader, MetadataBlockType, StreamInfo};

/// The FLAC start of stream marker: "fLaC" in ASCII.
const FLAC_STREAM_MARKER: u32 = 0x664c_6143;

/// The default per-channel sample buffer capacity in samples.
pub const DEFAULT_BUFFER_LEN: usize = 8192;

/// The canonical fixed-predictor coefficients for orders 0 through 4.
const FIXED_PREDICTION_COEFFICIENTS: [&[i16]; 5] = [
    &[],
    &[1],
    &[2, -1],
    &[3, -3, 1],
    &[4, -6, 4, -1],
];

fn decorrelate_left_side(left: &[i64], side: &mut [i64]) {
    for (s, l) in side.iter_mut().zip(left) {
        *s = *l - *s;
    }
}

fn decorrelate_right_side(right: &[i64], side: &mut [i64]) {
    for (s, r) in side.iter_mut().zip(right) {
        *s += *r;
    }
}

fn decorrelate_mid_side(mid: &mut [i64], side: &mut [i64]) {
    // Mid (M) is given as M = L/2 + R/2 rounded down, while Side (S) is given
    // as S = L - R. The rounding loss in M is recovered from the parity of S:
    // R = M - (S >> 1) and L = R + S, with the shift arithmetic.
    for (m, s) in mid.iter_mut().zip(side.iter_mut()) {
        let side = *s;
        let right = *m - (side >> 1);
        *m = right + side;
        *s = right;
    }
}

/// The lifecycle of a [`FlacDecoder`]. Transitions only move forward:
/// `Init` to `HasMarker` to `HasMetadata` to `Complete`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DecoderState {
    /// The decoder has consumed nothing.
    Init,
    /// The stream marker has been read.
    HasMarker,
    /// All metadata blocks have been consumed; audio frames may be decoded.
    HasMetadata,
    /// The end of the stream has been reached.
    Complete,
}

/// Free Lossless Audio Codec (FLAC) pull decoder.
///
/// The caller drives the decoder: call [`FlacDecoder::decode_marker`] once,
/// call [`FlacDecoder::decode_metadata`] in a loop until the state reaches
/// [`DecoderState::HasMetadata`], then call [`FlacDecoder::decode_audio`] in
/// a loop until [`DecoderState::Complete`], consuming
/// [`FlacDecoder::block_size`] samples per channel from
/// [`FlacDecoder::block_data`] after each call.
pub struct FlacDecoder<B: ByteStream> {
    bs: BitStreamLtr<B>,
    state: DecoderState,
    streaminfo: StreamInfo,
    buf: SampleBuffer,
    coefficients: [i16; 32],
    block_size: u16,
    block_sample_rate: u32,
    n_decoded_samples: u64,
    n_frames: u64,
}

impl<B: ByteStream> FlacDecoder<B> {
    /// Instantiate a decoder over the given byte source with the default
    /// buffer capacity.
    pub fn new(source: B) -> Self {
        Self::with_capacity(source, DEFAULT_BUFFER_LEN)
    }

    /// Instantiate a decoder with an explicit per-channel buffer capacity in
    /// samples. Streams whose STREAMINFO declares a larger maximum block size
    /// are rejected with `BufferTooSmall`.
    pub fn with_capacity(source: B, capacity: usize) -> Self {
        FlacDecoder {
            bs: BitStreamLtr::new(source),
            state: DecoderState::Init,
            streaminfo: StreamInfo::default(),
            buf: SampleBuffer::with_capacity(capacity),
            coefficients: [0; 32],
            block_size: 0,
            block_sample_rate: 0,
            n_decoded_samples: 0,
            n_frames: 0,
        }
    }

    /// The current lifecycle state.
    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// The stream information block. Meaningful once the state has reached
    /// `HasMetadata`.
    pub fn streaminfo(&self) -> &StreamInfo {
        &self.streaminfo
    }

    /// The number of samples per channel produced by the last `decode_audio`
    /// call.
    pub fn block_size(&self) -> u16 {
        self.block_size
    }

    /// The effective sample rate of the last decoded frame. May differ from
    /// the STREAMINFO rate in a variable-rate stream.
    pub fn block_sample_rate(&self) -> u32 {
        self.block_sample_rate
    }

    /// The decoded samples of the last frame. Channel 0 is always the left
    /// channel and channel 1 the right channel, regardless of the on-wire
    /// channel assignment.
    pub fn block_data(&self) -> &SampleBuffer {
        &self.buf
    }

    /// Reads the 4-byte stream marker. Transitions `Init` to `HasMarker`.
    pub fn decode_marker(&mut self) -> Result<()> {
        if self.state != DecoderState::Init {
            return illegal_state_error("decode_marker");
        }

        let marker = self.bs.read_bits_leq32(32)?;

        if marker != FLAC_STREAM_MARKER {
            return Err(Error::BadMarker(marker));
        }

        self.state = DecoderState::HasMarker;
        Ok(())
    }

    /// Reads one metadata block. A STREAMINFO block populates the stream
    /// information; all other block bodies are skipped. On the last block,
    /// transitions `HasMarker` to `HasMetadata`.
    pub fn decode_metadata(&mut self) -> Result<()> {
        if self.state != DecoderState::HasMarker {
            return illegal_state_error("decode_metadata");
        }

        let header = MetadataBlockHeader::read(&mut self.bs)?;

        match header.block_type {
            MetadataBlockType::StreamInfo => {
                let streaminfo = StreamInfo::read(&mut self.bs)?;

                if usize::from(streaminfo.channel_count) > MAX_CHANNELS {
                    return unsupported_error("flac: more than two channels");
                }

                if usize::from(streaminfo.max_block_size) > self.buf.capacity() {
                    return Err(Error::BufferTooSmall {
                        required: streaminfo.max_block_size,
                        capacity: self.buf.capacity(),
                    });
                }

                self.streaminfo = streaminfo;
            }
            ref block_type => {
                // All other block bodies are opaque at this level.
                for _ in 0..header.block_len {
                    self.bs.read_aligned_byte()?;
                }

                info!("skipped {:?} metadata block of {} bytes", block_type, header.block_len);
            }
        }

        if header.is_last {
            self.state = DecoderState::HasMetadata;
        }

        Ok(())
    }

    /// Decodes one audio frame, or transitions to `Complete` if the stream
    /// ends at a frame boundary. Calling again after `Complete` is a no-op.
    pub fn decode_audio(&mut self) -> Result<()> {
        match self.state {
            DecoderState::HasMetadata => (),
            DecoderState::Complete => return Ok(()),
            _ => return illegal_state_error("decode_audio"),
        }

        if self.bs.is_eos() {
            self.state = DecoderState::Complete;

            debug!(
                "end of stream after {} frames, {} samples per channel",
                self.n_frames, self.n_decoded_samples
            );

            return Ok(());
        }

        let header = read_frame_header(&mut self.bs)?;

        // Fall back to STREAMINFO for the fields the frame header leaves
        // implicit.
        let bits_per_sample = match header.sample_bit_size {
            Some(bps) => bps,
            None => self.streaminfo.sample_bit_size,
        };

        self.block_sample_rate = match header.sample_rate {
            Some(rate) => rate,
            None => self.streaminfo.sample_rate,
        };

        let n_channels = header.channel_assignment.n_channels() as usize;

        if n_channels > MAX_CHANNELS {
            return unsupported_error("flac: more than two channels");
        }

        if usize::from(header.block_size) > self.buf.capacity() {
            return Err(Error::BufferTooSmall {
                required: header.block_size,
                capacity: self.buf.capacity(),
            });
        }

        self.block_size = header.block_size;
        self.buf.resize_active(usize::from(header.block_size));

        debug!(
            "frame {}: [{:?}] block_size={} sample_rate={} bps={} channels={:?}",
            self.n_frames,
            header.block_sequence,
            header.block_size,
            self.block_sample_rate,
            bits_per_sample,
            header.channel_assignment
        );

        // Read each subframe based on the channel assignment. For the
        // decorrelated assignments the side (difference) channel carries one
        // extra bit per sample.
        match header.channel_assignment {
            ChannelAssignment::Independent(channels) => {
                for ch in 0..channels as usize {
                    read_subframe(
                        &mut self.bs,
                        bits_per_sample,
                        &mut self.coefficients,
                        self.buf.chan_mut(ch),
                    )?;
                }
            }
            ChannelAssignment::LeftSide => {
                let (left, side) = self.buf.chan_pair_mut(0, 1);

                read_subframe(&mut self.bs, bits_per_sample, &mut self.coefficients, left)?;
                read_subframe(&mut self.bs, bits_per_sample + 1, &mut self.coefficients, side)?;

                decorrelate_left_side(left, side);
            }
            ChannelAssignment::MidSide => {
                let (mid, side) = self.buf.chan_pair_mut(0, 1);

                read_subframe(&mut self.bs, bits_per_sample, &mut self.coefficients, mid)?;
                read_subframe(&mut self.bs, bits_per_sample + 1, &mut self.coefficients, side)?;

                decorrelate_mid_side(mid, side);
            }
            ChannelAssignment::RightSide => {
                let (side, right) = self.buf.chan_pair_mut(0, 1);

                read_subframe(&mut self.bs, bits_per_sample + 1, &mut self.coefficients, side)?;
                read_subframe(&mut self.bs, bits_per_sample, &mut self.coefficients, right)?;

                // The channel 0 slot holds the reconstructed left channel
                // afterwards.
                decorrelate_right_side(right, side);
            }
        }

        // Zero padding up to byte alignment, then the frame footer CRC-16.
        // Neither is checked.
        self.bs.realign();
        let _crc16 = self.bs.read_bits_leq32(16)?;

        self.n_decoded_samples += u64::from(header.block_size);
        self.n_frames += 1;

        Ok(())
    }
}

// Subframe decoding.

#[derive(Debug)]
enum SubFrameType {
    Constant,
    Verbatim,
    FixedLinear(u32),
    Linear(u32),
}

/// Reads one subframe into `buf`, which must already be sized to the frame's
/// block length.
fn read_subframe<B: ByteStream>(
    bs: &mut BitStreamLtr<B>,
    frame_bps: u32,
    coefficients: &mut [i16; 32],
    buf: &mut [i64],
) -> Result<()> {
    // The first subframe bit is padding and is not enforced to be zero.
    let _ = bs.read_bit()?;

    // The next 6 bits designate the subframe type.
    let subframe_type_enc = bs.read_bits_leq32(6)?;

    let subframe_type = match subframe_type_enc {
        0x00 => SubFrameType::Constant,
        0x01 => SubFrameType::Verbatim,
        // The fixed predictor only supports orders between 0 and 4.
        0x08..=0x0c => SubFrameType::FixedLinear(subframe_type_enc & 0x07),
        0x20..=0x3f => SubFrameType::Linear((subframe_type_enc & 0x1f) + 1),
        _ => return reserved_error("flac: subframe type"),
    };

    // If the wasted bits flag is set, unary decode the number of dropped low
    // order bits per sample.
    let wasted_bits = if bs.read_bit()? { bs.read_unary_zeros()? + 1 } else { 0 };

    // Samples are coded at the frame depth minus the dropped bits.
    let bps = frame_bps - wasted_bits;

    match subframe_type {
        SubFrameType::Constant => decode_constant(bs, bps, buf)?,
        SubFrameType::Verbatim => decode_verbatim(bs, bps, buf)?,
        SubFrameType::FixedLinear(order) => decode_fixed(bs, bps, order, buf)?,
        SubFrameType::Linear(order) => decode_lpc(bs, bps, order, coefficients, buf)?,
    }

    // Shift the buffer in place to restore the dropped magnitude.
    if wasted_bits > 0 {
        for sample in buf.iter_mut() {
            *sample <<= wasted_bits;
        }
    }

    Ok(())
}

fn decode_constant<B: ByteStream>(
    bs: &mut BitStreamLtr<B>,
    bps: u32,
    buf: &mut [i64],
) -> Result<()> {
    let const_sample = bs.read_bits_leq64_signed(bps)?;

    for sample in buf.iter_mut() {
        *sample = const_sample;
    }

    Ok(())
}

fn decode_verbatim<B: ByteStream>(
    bs: &mut BitStreamLtr<B>,
    bps: u32,
    buf: &mut [i64],
) -> Result<()> {
    for sample in buf.iter_mut() {
        *sample = bs.read_bits_leq64_signed(bps)?;
    }

    Ok(())
}

fn decode_fixed<B: ByteStream>(
    bs: &mut BitStreamLtr<B>,
    bps: u32,
    order: u32,
    buf: &mut [i64],
) -> Result<()> {
    // The first `order` samples are stored verbatim to warm up the predictor.
    decode_verbatim(bs, bps, &mut buf[..order as usize])?;

    decode_residual(bs, order, buf)?;

    restore_prediction(FIXED_PREDICTION_COEFFICIENTS[order as usize], 0, buf);

    Ok(())
}

fn decode_lpc<B: ByteStream>(
    bs: &mut BitStreamLtr<B>,
    bps: u32,
    order: u32,
    coefficients: &mut [i16; 32],
    buf: &mut [i64],
) -> Result<()> {
    debug_assert!(order >= 1 && order <= 32);

    decode_verbatim(bs, bps, &mut buf[..order as usize])?;

    // Quantized coefficient precision in bits, coded minus one.
    let precision = bs.read_bits_leq32(4)? + 1;

    if precision > 15 {
        return reserved_error("flac: lpc coefficient precision");
    }

    // The quantization shift is coded signed, but a negative shift amount is
    // undefined. Clamp it to zero.
    let shift = bs.read_bits_leq32_signed(5)?.max(0) as u32;

    for c in coefficients.iter_mut().take(order as usize) {
        *c = bs.read_bits_leq32_signed(precision)? as i16;
    }

    decode_residual(bs, order, buf)?;

    restore_prediction(&coefficients[..order as usize], shift, buf);

    Ok(())
}

fn decode_residual<B: ByteStream>(
    bs: &mut BitStreamLtr<B>,
    order: u32,
    buf: &mut [i64],
) -> Result<()> {
    let method_enc = bs.read_bits_leq32(2)?;

    // The Rice and Rice2 coding methods differ only in the bit width of the
    // per-partition parameter.
    let param_bit_width = match method_enc {
        0x0 => 4,
        0x1 => 5,
        _ => return reserved_error("flac: residual coding method"),
    };

    let partition_order = bs.read_bits_leq32(4)?;

    // The number of partitions is 2^order, and all partitions are the same
    // length, so the partition count must evenly divide the block.
    let n_partitions = 1u32 << partition_order;

    if buf.len() % n_partitions as usize != 0 {
        return Err(Error::BadPartitioning {
            block_size: buf.len() as u16,
            partitions: n_partitions,
        });
    }

    let partition_len = buf.len() / n_partitions as usize;

    // The warm-up samples occupy the head of the first partition.
    if order as usize > partition_len {
        return decode_error("flac: residual partition too small for predictor order");
    }

    for i in 0..n_partitions as usize {
        let start = i * partition_len + if i == 0 { order as usize } else { 0 };
        let end = (i + 1) * partition_len;

        decode_rice_partition(bs, param_bit_width, &mut buf[start..end])?;
    }

    Ok(())
}

fn decode_rice_partition<B: ByteStream>(
    bs: &mut BitStreamLtr<B>,
    param_bit_width: u32,
    buf: &mut [i64],
) -> Result<()> {
    let rice_param = bs.read_bits_leq32(param_bit_width)?;

    // A parameter of all ones (0xf for a 4-bit parameter, 0x1f for a 5-bit
    // parameter) escapes to fixed-width binary residuals.
    if rice_param < (1 << param_bit_width) - 1 {
        for sample in buf.iter_mut() {
            let q = bs.read_unary_zeros()?;
            let r = bs.read_bits_leq32(rice_param)?;
            *sample = rice_signed_to_i64((u64::from(q) << rice_param) | u64::from(r));
        }
    }
    else {
        // A width of zero is legal and yields all-zero residuals.
        let residual_bits = bs.read_bits_leq32(5)?;

        for sample in buf.iter_mut() {
            *sample = bs.read_bits_leq64_signed(residual_bits)?;
        }
    }

    Ok(())
}

#[inline(always)]
fn rice_signed_to_i64(word: u64) -> i64 {
    // Input  => 0  1  2  3  4  5  6 ...
    // Output => 0 -1  1 -2  2 -3  3 ...
    //
    //  - If even: output = input / 2
    //  - If odd:  output = -(input / 2) - 1
    let div2 = (word >> 1) as i64;

    // For odd inputs sign is -1, for even inputs it is 0. XORing div2 with -1
    // yields -div2 - 1, XORing with 0 yields div2.
    let sign = -((word & 0x1) as i64);

    div2 ^ sign
}

/// Rebuilds samples in place from residuals. On entry, the first
/// `coeffs.len()` entries of `buf` hold warm-up samples and the remainder
/// holds residuals. All arithmetic is 64-bit.
fn restore_prediction(coeffs: &[i16], shift: u32, buf: &mut [i64]) {
    let order = coeffs.len();

    for i in order..buf.len() {
        // coeffs[0] weighs the most recent sample.
        let predicted = coeffs
            .iter()
            .zip(buf[i - order..i].iter().rev())
            .map(|(&c, &s)| i64::from(c) * s)
            .sum::<i64>();

        buf[i] += predicted >> shift;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_rice_signed_to_i64() {
        assert_eq!(rice_signed_to_i64(0), 0);
        assert_eq!(rice_signed_to_i64(1), -1);
        assert_eq!(rice_signed_to_i64(2), 1);
        assert_eq!(rice_signed_to_i64(3), -2);
        assert_eq!(rice_signed_to_i64(4), 2);
        assert_eq!(rice_signed_to_i64(5), -3);
        assert_eq!(rice_signed_to_i64(6), 3);
        assert_eq!(rice_signed_to_i64(7), -4);
        assert_eq!(rice_signed_to_i64(8), 4);
        assert_eq!(rice_signed_to_i64(9), -5);
        assert_eq!(rice_signed_to_i64(10), 5);
    }

    #[test]
    fn verify_restore_prediction_fixed_orders() {
        // Order 1: each sample is the previous sample plus the residual.
        let mut buf = [5, 1, 1, 1];
        restore_prediction(FIXED_PREDICTION_COEFFICIENTS[1], 0, &mut buf);
        assert_eq!(buf, [5, 6, 7, 8]);

        // Order 2 with zero residuals extrapolates the line through the
        // warm-up samples.
        let mut buf = [10, 20, 0, 0, 0];
        restore_prediction(FIXED_PREDICTION_COEFFICIENTS[2], 0, &mut buf);
        assert_eq!(buf, [10, 20, 30, 40, 50]);

        // Order 0 predicts nothing.
        let mut buf = [3, -7, 11];
        restore_prediction(FIXED_PREDICTION_COEFFICIENTS[0], 0, &mut buf);
        assert_eq!(buf, [3, -7, 11]);
    }

    #[test]
    fn verify_restore_prediction_shift() {
        // pred = (3*buf[i-1] - 1*buf[i-2]) >> 2.
        let mut buf = [100, 90, 38, 33];
        restore_prediction(&[3, -1], 2, &mut buf);
        assert_eq!(buf, [100, 90, 80, 70]);
    }

    #[test]
    fn verify_decorrelate_mid_side() {
        let mut mid = [100, 100];
        let mut side = [4, -4];

        decorrelate_mid_side(&mut mid, &mut side);

        assert_eq!(mid, [102, 98]);
        assert_eq!(side, [98, 102]);
    }

    #[test]
    fn verify_decorrelate_left_side() {
        let left = [1000, -1000];
        let mut side = [400, -400];

        decorrelate_left_side(&left, &mut side);

        assert_eq!(side, [600, -600]);
    }

    #[test]
    fn verify_decorrelate_right_side() {
        let right = [600, -600];
        let mut side = [400, -400];

        decorrelate_right_side(&right, &mut side);

        assert_eq!(side, [1000, -1000]);
    }
}
