// Cadenza
// Copyright (c) 2024 The Cadenza Project Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

use std::fs::File;
use std::io::BufWriter;
use std::process;

use cadenza_codec_flac::{DecoderState, FlacDecoder};
use cadenza_core::errors::{unsupported_error, Result};
use cadenza_core::io::ReadSourceStream;
use cadenza_format_wav::{WavStreamDescriptor, WavWriter};

use clap::{App, Arg};
use log::{error, info};

/// Per-channel sample buffer capacity, large enough for any FLAC block size.
const BUFFER_LEN: usize = 65536;

fn main() {
    pretty_env_logger::init();

    let matches = App::new("Cadenza")
        .version("0.1.0")
        .about("Decode a FLAC stream to a WAVE file")
        .arg(
            Arg::with_name("INPUT")
                .help("The input FLAC file path")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::with_name("OUTPUT")
                .help("The output WAVE file path")
                .required(true)
                .index(2),
        )
        .get_matches();

    let input = matches.value_of("INPUT").unwrap();
    let output = matches.value_of("OUTPUT").unwrap();

    if let Err(err) = run(input, output) {
        error!("{}", err);
        process::exit(1);
    }
}

fn run(input: &str, output: &str) -> Result<()> {
    let source = ReadSourceStream::new(File::open(input)?);
    let mut decoder = FlacDecoder::with_capacity(source, BUFFER_LEN);

    decoder.decode_marker()?;

    while decoder.state() != DecoderState::HasMetadata {
        decoder.decode_metadata()?;
    }

    let info = decoder.streaminfo().clone();

    info!(
        "stream: {} Hz, {} channels, {} bits/sample, {:?} total samples",
        info.sample_rate, info.channel_count, info.sample_bit_size, info.sample_count
    );

    // The WAVE header carries the stream sizes up front, so the total sample
    // count must be known before any audio is decoded.
    let n_frames = match info.sample_count {
        Some(count) => count,
        None => return unsupported_error("wav: streams of unknown length"),
    };

    let mut writer = WavWriter::new(BufWriter::new(File::create(output)?));

    writer.write_header(&WavStreamDescriptor {
        sample_rate: info.sample_rate,
        bits_per_sample: info.sample_bit_size,
        n_channels: u16::from(info.channel_count),
        n_frames,
    })?;

    loop {
        decoder.decode_audio()?;

        if decoder.state() == DecoderState::Complete {
            break;
        }

        if decoder.block_sample_rate() != info.sample_rate {
            return unsupported_error("flac: variable sample rate streams");
        }

        let block = decoder.block_data();

        for i in 0..usize::from(decoder.block_size()) {
            for ch in 0..usize::from(info.channel_count) {
                writer.write_sample(block.chan(ch)[i] as i32)?;
            }
        }
    }

    writer.finish()?;

    Ok(())
}
