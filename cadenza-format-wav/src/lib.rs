// Cadenza
// Copyright (c) 2024 The Cadenza Project Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `cadenza-format-wav` serializes signed integer PCM samples into a
//! canonical RIFF/WAVE file: one `fmt ` chunk followed by one `data` chunk,
//! all multi-byte fields little-endian.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

use std::io::Write;

use cadenza_core::errors::{illegal_state_error, unsupported_error, Result};

use log::debug;

/// The stream parameters required to emit a WAVE header.
#[derive(Clone, Copy, Debug)]
pub struct WavStreamDescriptor {
    /// The sample rate in Hz.
    pub sample_rate: u32,
    /// The number of bits per sample: 8, 16, 24, or 32.
    pub bits_per_sample: u32,
    /// The number of interleaved channels.
    pub n_channels: u16,
    /// The total number of inter-channel sample frames.
    pub n_frames: u64,
}

/// `WavWriter` emits a WAVE PCM file onto any [`std::io::Write`] sink.
///
/// The header is written once up front from a [`WavStreamDescriptor`], then
/// one sample at a time is serialized at the descriptor's bit depth. Samples
/// must be supplied interleaved, channel-major within each frame.
pub struct WavWriter<W: Write> {
    inner: W,
    bits_per_sample: u32,
}

impl<W: Write> WavWriter<W> {
    /// Instantiate a new `WavWriter` by taking ownership of the provided
    /// sink.
    pub fn new(inner: W) -> Self {
        WavWriter { inner, bits_per_sample: 0 }
    }

    /// Writes the RIFF/WAVE header. Must be called once before any samples
    /// are written.
    pub fn write_header(&mut self, desc: &WavStreamDescriptor) -> Result<()> {
        match desc.bits_per_sample {
            8 | 16 | 24 | 32 => (),
            _ => return unsupported_error("wav: bits per sample must be 8, 16, 24, or 32"),
        }

        let bytes_per_sample = desc.bits_per_sample / 8;
        let block_align = u32::from(desc.n_channels) * bytes_per_sample;
        let byte_rate = desc.sample_rate * block_align;
        let data_len = desc.n_frames * u64::from(block_align);

        // The RIFF chunk size field leaves no room for more than 4 GiB.
        if data_len > u64::from(u32::MAX - 36) {
            return unsupported_error("wav: stream too large for a riff file");
        }

        debug!("wave header: {:?}, data_len={}", desc, data_len);

        self.inner.write_all(b"RIFF")?;
        self.inner.write_all(&(36 + data_len as u32).to_le_bytes())?;
        self.inner.write_all(b"WAVE")?;

        self.inner.write_all(b"fmt ")?;
        self.inner.write_all(&16u32.to_le_bytes())?;
        self.inner.write_all(&1u16.to_le_bytes())?; // PCM
        self.inner.write_all(&desc.n_channels.to_le_bytes())?;
        self.inner.write_all(&desc.sample_rate.to_le_bytes())?;
        self.inner.write_all(&byte_rate.to_le_bytes())?;
        self.inner.write_all(&(block_align as u16).to_le_bytes())?;
        self.inner.write_all(&(desc.bits_per_sample as u16).to_le_bytes())?;

        self.inner.write_all(b"data")?;
        self.inner.write_all(&(data_len as u32).to_le_bytes())?;

        self.bits_per_sample = desc.bits_per_sample;

        Ok(())
    }

    /// Serializes one sample at the header's bit depth.
    pub fn write_sample(&mut self, sample: i32) -> Result<()> {
        match self.bits_per_sample {
            // 8-bit WAVE PCM is unsigned with a +128 bias.
            8 => self.inner.write_all(&[(sample + 128) as u8])?,
            16 => self.inner.write_all(&(sample as i16).to_le_bytes())?,
            24 => self.inner.write_all(&sample.to_le_bytes()[..3])?,
            32 => self.inner.write_all(&sample.to_le_bytes())?,
            _ => return illegal_state_error("write_sample before write_header"),
        }

        Ok(())
    }

    /// Flushes and returns the underlying sink.
    pub fn finish(mut self) -> Result<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn writer() -> WavWriter<Vec<u8>> {
        WavWriter::new(Vec::new())
    }

    #[test]
    fn verify_header() {
        let mut wav = writer();

        wav.write_header(&WavStreamDescriptor {
            sample_rate: 44100,
            bits_per_sample: 16,
            n_channels: 2,
            n_frames: 100,
        })
        .unwrap();

        let bytes = wav.finish().unwrap();

        // 100 stereo frames of 16-bit samples occupy 400 bytes.
        #[rustfmt::skip]
        let expected: [u8; 44] = [
            b'R', b'I', b'F', b'F',
            0xb4, 0x01, 0x00, 0x00, // 36 + 400
            b'W', b'A', b'V', b'E',
            b'f', b'm', b't', b' ',
            0x10, 0x00, 0x00, 0x00, // fmt chunk length 16
            0x01, 0x00,             // PCM
            0x02, 0x00,             // 2 channels
            0x44, 0xac, 0x00, 0x00, // 44100 Hz
            0x10, 0xb1, 0x02, 0x00, // byte rate 176400
            0x04, 0x00,             // block align
            0x10, 0x00,             // 16 bits per sample
            b'd', b'a', b't', b'a',
            0x90, 0x01, 0x00, 0x00, // data length 400
        ];

        assert_eq!(&bytes[..], &expected[..]);
    }

    #[test]
    fn verify_sample_widths() {
        let desc = |bits| WavStreamDescriptor {
            sample_rate: 8000,
            bits_per_sample: bits,
            n_channels: 1,
            n_frames: 0,
        };

        let mut wav = writer();
        wav.write_header(&desc(8)).unwrap();
        wav.write_sample(-128).unwrap();
        wav.write_sample(0).unwrap();
        wav.write_sample(127).unwrap();
        assert_eq!(&wav.finish().unwrap()[44..], &[0x00, 0x80, 0xff]);

        let mut wav = writer();
        wav.write_header(&desc(16)).unwrap();
        wav.write_sample(-2).unwrap();
        assert_eq!(&wav.finish().unwrap()[44..], &[0xfe, 0xff]);

        let mut wav = writer();
        wav.write_header(&desc(24)).unwrap();
        wav.write_sample(-1).unwrap();
        wav.write_sample(0x123456).unwrap();
        assert_eq!(&wav.finish().unwrap()[44..], &[0xff, 0xff, 0xff, 0x56, 0x34, 0x12]);

        let mut wav = writer();
        wav.write_header(&desc(32)).unwrap();
        wav.write_sample(i32::MIN).unwrap();
        assert_eq!(&wav.finish().unwrap()[44..], &[0x00, 0x00, 0x00, 0x80]);
    }

    #[test]
    fn verify_unsupported_depth() {
        let mut wav = writer();

        let result = wav.write_header(&WavStreamDescriptor {
            sample_rate: 44100,
            bits_per_sample: 12,
            n_channels: 1,
            n_frames: 0,
        });

        assert!(result.is_err());
    }

    #[test]
    fn verify_sample_before_header() {
        let mut wav = writer();

        assert!(wav.write_sample(0).is_err());
    }
}
