// Cadenza
// Copyright (c) 2024 The Cadenza Project Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `cadenza-codec-flac` decodes a native Free Lossless Audio Codec (FLAC)
//! bitstream into blocks of signed integer PCM samples.
//!
//! The [`FlacDecoder`] facade is pull-based: the caller reads the stream
//! marker with [`FlacDecoder::decode_marker`], consumes metadata blocks with
//! [`FlacDecoder::decode_metadata`] until the state reaches
//! [`DecoderState::HasMetadata`], then decodes one audio frame per
//! [`FlacDecoder::decode_audio`] call until [`DecoderState::Complete`].

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod decoder;
pub mod frame;
pub mod metadata;

pub use decoder::{DecoderState, FlacDecoder, DEFAULT_BUFFER_LEN};
pub use metadata::StreamInfo;
