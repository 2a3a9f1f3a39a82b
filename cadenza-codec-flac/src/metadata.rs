// Cadenza
// Copyright (c) 2024 The Cadenza Project Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use cadenza_core::errors::{decode_error, Result};
use cadenza_core::io::{BitStreamLtr, ByteStream};

/// The FLAC metadata block types.
#[derive(Debug, PartialEq, Eq)]
pub enum MetadataBlockType {
    StreamInfo,
    Padding,
    Application,
    SeekTable,
    VorbisComment,
    Cuesheet,
    Picture,
    Unknown(u8),
}

/// A metadata block header: the last-block flag, the block type, and the byte
/// length of the block body.
pub struct MetadataBlockHeader {
    pub is_last: bool,
    pub block_type: MetadataBlockType,
    pub block_len: u32,
}

impl MetadataBlockHeader {
    /// Read a metadata block header.
    pub fn read<B: ByteStream>(bs: &mut BitStreamLtr<B>) -> Result<MetadataBlockHeader> {
        let is_last = bs.read_bit()?;

        let block_type_id = bs.read_bits_leq32(7)? as u8;

        let block_type = match block_type_id {
            0 => MetadataBlockType::StreamInfo,
            1 => MetadataBlockType::Padding,
            2 => MetadataBlockType::Application,
            3 => MetadataBlockType::SeekTable,
            4 => MetadataBlockType::VorbisComment,
            5 => MetadataBlockType::Cuesheet,
            6 => MetadataBlockType::Picture,
            _ => MetadataBlockType::Unknown(block_type_id),
        };

        let block_len = bs.read_bits_leq32(24)?;

        Ok(MetadataBlockHeader { is_last, block_type, block_len })
    }
}

/// `StreamInfo` carries the global invariants of the audio stream, filled
/// once from the mandatory first metadata block and read-only thereafter.
#[derive(Clone, Debug, Default)]
pub struct StreamInfo {
    /// The minimum and maximum number of samples per channel per block.
    pub min_block_size: u16,
    pub max_block_size: u16,
    /// The minimum and maximum byte length of an encoded frame. Either value
    /// may be 0 if unknown.
    pub min_frame_size: u32,
    pub max_frame_size: u32,
    /// The sample rate in Hz.
    pub sample_rate: u32,
    /// The number of audio channels.
    pub channel_count: u8,
    /// The number of bits per sample of the stream.
    pub sample_bit_size: u32,
    /// The total number of inter-channel sample frames, if known.
    pub sample_count: Option<u64>,
    /// The MD5 signature of the decoded audio, if present. Parsed but never
    /// verified.
    pub md5: Option<[u8; 16]>,
}

impl StreamInfo {
    /// Read the fixed 34-byte STREAMINFO block body, including the trailing
    /// MD5 signature.
    pub fn read<B: ByteStream>(bs: &mut BitStreamLtr<B>) -> Result<StreamInfo> {
        let mut info = StreamInfo::default();

        // Read the block length bounds in number of samples.
        info.min_block_size = bs.read_bits_leq32(16)? as u16;
        info.max_block_size = bs.read_bits_leq32(16)? as u16;

        if info.max_block_size == 0 {
            return decode_error("flac: maximum block length is zero");
        }

        if info.max_block_size < info.min_block_size {
            return decode_error("flac: maximum block length is less than the minimum block length");
        }

        // Read the frame byte length bounds. A value of 0 for either
        // indicates the respective byte length is unknown.
        info.min_frame_size = bs.read_bits_leq32(24)?;
        info.max_frame_size = bs.read_bits_leq32(24)?;

        if info.min_frame_size > 0
            && info.max_frame_size > 0
            && info.max_frame_size < info.min_frame_size
        {
            return decode_error("flac: maximum frame length is less than the minimum frame length");
        }

        info.sample_rate = bs.read_bits_leq32(20)?;

        if info.sample_rate == 0 {
            return decode_error("flac: stream sample rate is zero");
        }

        // Channels are coded minus one.
        info.channel_count = bs.read_bits_leq32(3)? as u8 + 1;

        // Bits per sample are coded minus one. Valid widths are 4-32.
        info.sample_bit_size = bs.read_bits_leq32(5)? + 1;

        if info.sample_bit_size < 4 {
            return decode_error("flac: stream bits per sample are out of bounds");
        }

        // The total sample count. A value of 0 indicates a stream of unknown
        // length.
        info.sample_count = match bs.read_bits_leq64(36)? {
            0 => None,
            count => Some(count),
        };

        // Read the decoded audio MD5 signature. If the buffer is zeroed then
        // no signature is present. It is never verified either way.
        let mut md5 = [0u8; 16];
        for byte in md5.iter_mut() {
            *byte = bs.read_aligned_byte()?;
        }

        if md5 != [0u8; 16] {
            info.md5 = Some(md5);
        }

        Ok(info)
    }
}
